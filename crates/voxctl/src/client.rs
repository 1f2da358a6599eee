//! HTTP client for the voxd bridge.

use std::io::Write;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use vox_core::{Message, SkillStatus};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not running at {addr}\n  → start with: voxd\n  → or set VOXD_ADDR if using a different address")]
    ConnectionFailed { addr: String },

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("unauthorized: check VOXD_TOKEN env var or --token flag")]
    Unauthorized,

    #[error(
        "daemon not ready after {timeout_ms}ms at {addr}\n  → ensure voxd is running\n  → check VOXD_TOKEN if auth is enabled"
    )]
    DaemonNotReady { addr: String, timeout_ms: u64 },
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let addr = e
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            ClientError::ConnectionFailed { addr }
        } else {
            ClientError::HttpError {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

/// Request payload for POST /utterances.
#[derive(Debug, Serialize)]
pub struct UtteranceRequest {
    pub utterances: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

/// Request payload for POST /skills/{id}/converse.
#[derive(Debug, Serialize)]
pub struct ConverseRequest {
    pub utterances: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// Response from the converse endpoint.
#[derive(Debug, Deserialize)]
pub struct ConverseResponse {
    pub skill_id: String,
    pub result: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListSkillsResponse {
    skills: Vec<SkillStatus>,
}

/// Error response from API.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Default total timeout for the daemon readiness probe.
const DEFAULT_READY_TIMEOUT_MS: u64 = 5000;

/// Initial backoff delay for the readiness probe.
const INITIAL_BACKOFF_MS: u64 = 200;

/// HTTP client for voxd.
#[derive(Debug)]
pub struct Client {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            http: reqwest::Client::new(),
        }
    }

    /// Returns the daemon address (for error messages).
    pub fn addr(&self) -> &str {
        &self.base_url
    }

    /// Probe `/health`. Err only when the connection itself failed.
    pub async fn check_health(&self) -> Result<bool, ClientError> {
        let url = format!("{}/health", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        Ok(response.status().is_success())
    }

    /// Wait for the daemon with exponential backoff, 5s in total.
    pub async fn wait_for_ready(&self) -> Result<(), ClientError> {
        self.wait_for_ready_with_timeout(DEFAULT_READY_TIMEOUT_MS)
            .await
    }

    /// Wait for the daemon to become ready with a custom timeout.
    pub async fn wait_for_ready_with_timeout(&self, timeout_ms: u64) -> Result<(), ClientError> {
        let start = std::time::Instant::now();
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match self.check_health().await {
                Ok(true) => return Ok(()),
                Ok(false) | Err(_) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    if elapsed >= timeout_ms {
                        return Err(ClientError::DaemonNotReady {
                            addr: self.base_url.clone(),
                            timeout_ms,
                        });
                    }

                    eprintln!(
                        "waiting for daemon at {} (retrying in {}ms)",
                        self.base_url, backoff_ms
                    );

                    let remaining = timeout_ms.saturating_sub(elapsed);
                    let sleep_ms = backoff_ms.min(remaining);
                    tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;

                    backoff_ms = backoff_ms.saturating_mul(2);
                }
            }
        }
    }

    /// Build headers with optional auth token.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    fn skill_url(&self, skill_id: &str, action: &str) -> String {
        format!(
            "{}/skills/{}/{}",
            self.base_url,
            urlencoding::encode(skill_id),
            action
        )
    }

    /// Handle error response from API.
    async fn handle_error(&self, response: reqwest::Response, subject: &str) -> ClientError {
        let status = response.status().as_u16();

        if status == 401 {
            return ClientError::Unauthorized;
        }

        if status == 404 {
            return ClientError::SkillNotFound(subject.to_string());
        }

        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| "unknown error".to_string());

        ClientError::HttpError { status, message }
    }

    /// Inject an utterance turn.
    /// POST /utterances
    pub async fn say(&self, req: UtteranceRequest) -> Result<(), ClientError> {
        let url = format!("{}/utterances", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&req)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response, "utterances").await);
        }
        Ok(())
    }

    /// List registered skills.
    /// GET /skills
    pub async fn list_skills(&self) -> Result<Vec<SkillStatus>, ClientError> {
        let url = format!("{}/skills", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response, "skills").await);
        }

        let body: ListSkillsResponse = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

        Ok(body.skills)
    }

    /// Activate, deactivate or keep a skill.
    /// POST /skills/{id}/{action}
    pub async fn skill_action(&self, skill_id: &str, action: &str) -> Result<(), ClientError> {
        let url = self.skill_url(skill_id, action);
        let response = self.http.post(&url).headers(self.headers()).send().await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response, skill_id).await);
        }
        Ok(())
    }

    /// Offer utterances to one skill.
    /// POST /skills/{id}/converse
    pub async fn converse(
        &self,
        skill_id: &str,
        req: ConverseRequest,
    ) -> Result<ConverseResponse, ClientError> {
        let url = self.skill_url(skill_id, "converse");
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&req)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response, skill_id).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// Fetch the daemon's skill counters.
    /// GET /metrics
    pub async fn metrics(&self) -> Result<Value, ClientError> {
        let url = format!("{}/metrics", self.base_url);
        let response = self.http.get(&url).headers(self.headers()).send().await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response, "metrics").await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// Print bus messages as they arrive, one JSON line per message, until the
    /// stream ends or `limit` messages were printed.
    /// GET /events
    pub async fn tail_events(
        &self,
        msg_type: Option<&str>,
        limit: Option<usize>,
    ) -> Result<(), ClientError> {
        use futures::StreamExt;

        let mut url = format!("{}/events", self.base_url);
        if let Some(t) = msg_type {
            url = format!("{}?type={}", url, urlencoding::encode(t));
        }
        let response = self.http.get(&url).headers(self.headers()).send().await?;

        if !response.status().is_success() {
            return Err(self.handle_error(response, "events").await);
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut printed = 0usize;
        let mut stdout = std::io::stdout();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ClientError::IoError(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Events are separated by a blank line.
            while let Some(end) = buffer.find("\n\n") {
                let event_str = buffer[..end].to_string();
                buffer = buffer[end + 2..].to_string();

                if let Some(message) = parse_sse_message(&event_str) {
                    crate::render::print_message(&message);
                    stdout
                        .flush()
                        .map_err(|e| ClientError::IoError(e.to_string()))?;
                    printed += 1;
                    if limit.is_some_and(|max| printed >= max) {
                        return Ok(());
                    }
                }
            }
        }

        Ok(())
    }
}

/// Parse one SSE event into a bus message. Keepalives and malformed events yield `None`.
fn parse_sse_message(event_str: &str) -> Option<Message> {
    let data: Vec<&str> = event_str
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect();
    if data.is_empty() {
        return None;
    }
    serde_json::from_str(&data.join("\n")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message_event() {
        let event_str = r#"event: speak
data: {"type":"speak","data":{"utterance":"hello"},"context":{}}"#;

        let message = parse_sse_message(event_str).unwrap();
        assert_eq!(message.msg_type, "speak");
        assert_eq!(message.data_str("utterance"), Some("hello"));
    }

    #[test]
    fn parse_message_ignores_keepalive() {
        assert!(parse_sse_message(":").is_none());
        assert!(parse_sse_message("event: speak").is_none());
    }

    #[test]
    fn parse_message_handles_invalid_json() {
        let event_str = "event: speak\ndata: not valid json";
        assert!(parse_sse_message(event_str).is_none());
    }

    #[test]
    fn parse_message_tolerates_whitespace() {
        let event_str = "event:   speak\ndata:   {\"type\":\"speak\"}  ";
        let message = parse_sse_message(event_str).unwrap();
        assert_eq!(message.msg_type, "speak");
        assert!(message.data.is_empty());
    }

    // --- Client construction tests ---

    #[test]
    fn client_trims_trailing_slash() {
        let client = Client::new("http://localhost:7710/", None);
        assert_eq!(client.base_url, "http://localhost:7710");
    }

    #[test]
    fn client_stores_auth_token() {
        let client = Client::new("http://localhost:7710", Some("my-secret-token"));
        assert_eq!(client.token, Some("my-secret-token".to_string()));
    }

    #[test]
    fn client_headers_include_auth_when_token_set() {
        let client = Client::new("http://localhost:7710", Some("test-token"));
        let headers = client.headers();
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer test-token");
    }

    #[test]
    fn client_headers_omit_auth_when_no_token() {
        let client = Client::new("http://localhost:7710", None);
        assert!(client.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn skill_urls_are_encoded() {
        let client = Client::new("http://localhost:7710", None);
        assert_eq!(
            client.skill_url("skill date.neon", "activate"),
            "http://localhost:7710/skills/skill%20date.neon/activate"
        );
    }

    // --- Readiness probe tests ---

    #[tokio::test]
    async fn check_health_fails_when_daemon_not_running() {
        let client = Client::new("http://127.0.0.1:19999", None);
        assert!(client.check_health().await.is_err());
    }

    #[tokio::test]
    async fn wait_for_ready_times_out_when_daemon_not_running() {
        let client = Client::new("http://127.0.0.1:19999", None);
        let result = client.wait_for_ready_with_timeout(100).await;

        match result {
            Err(ClientError::DaemonNotReady { addr, timeout_ms }) => {
                assert_eq!(addr, "http://127.0.0.1:19999");
                assert_eq!(timeout_ms, 100);
            }
            _ => panic!("expected DaemonNotReady error"),
        }
    }

    #[test]
    fn connection_failed_error_suggests_start_command() {
        let err = ClientError::ConnectionFailed {
            addr: "http://127.0.0.1:7710".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("voxd"));
        assert!(msg.contains("VOXD_ADDR"));
    }

    #[test]
    fn unauthorized_error_suggests_token_options() {
        let msg = ClientError::Unauthorized.to_string();
        assert!(msg.contains("VOXD_TOKEN"));
        assert!(msg.contains("--token"));
    }
}
