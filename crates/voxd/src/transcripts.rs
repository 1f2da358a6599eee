//! Transcript persistence.
//!
//! Layout under the transcripts directory:
//! - `<YYYY-MM-DD>/<user>.tsv`: one `timestamp\tuser\tutterance` line per turn
//! - `audio/<sha256>.wav`: raw audio, content-addressed

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(f64),
}

pub type Result<T> = std::result::Result<T, TranscriptError>;

/// Persists what a user said.
pub trait TranscriptWriter: Send + Sync {
    /// Record one turn, returning a reference to the stored artifact: the audio file when
    /// audio was given, otherwise the transcript file.
    fn write_transcript(
        &self,
        user: &str,
        utterance: &str,
        timestamp: f64,
        audio: Option<&[u8]>,
    ) -> Result<PathBuf>;
}

/// Writes transcripts to the local filesystem.
#[derive(Debug, Clone)]
pub struct FileTranscriptWriter {
    root: PathBuf,
}

impl FileTranscriptWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_audio(&self, audio: &[u8]) -> Result<PathBuf> {
        let dir = self.root.join("audio");
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.wav", checksum(audio)));
        if !path.exists() {
            fs::write(&path, audio)?;
        }
        Ok(path)
    }
}

impl TranscriptWriter for FileTranscriptWriter {
    fn write_transcript(
        &self,
        user: &str,
        utterance: &str,
        timestamp: f64,
        audio: Option<&[u8]>,
    ) -> Result<PathBuf> {
        let at = datetime_from_epoch(timestamp)?;
        let day_dir = self.root.join(at.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&day_dir)?;

        let user = sanitize_user(user);
        let transcript = day_dir.join(format!("{user}.tsv"));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&transcript)?;
        let line = utterance.replace(['\t', '\n', '\r'], " ");
        writeln!(file, "{timestamp:.3}\t{user}\t{line}")?;

        match audio {
            Some(bytes) => self.store_audio(bytes),
            None => Ok(transcript),
        }
    }
}

/// SHA256 of `bytes`, hex encoded.
fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn datetime_from_epoch(timestamp: f64) -> Result<DateTime<Utc>> {
    if !timestamp.is_finite() {
        return Err(TranscriptError::InvalidTimestamp(timestamp));
    }
    let micros = (timestamp * 1_000_000.0) as i64;
    DateTime::from_timestamp_micros(micros).ok_or(TranscriptError::InvalidTimestamp(timestamp))
}

/// Keep user names usable as file names.
fn sanitize_user(user: &str) -> String {
    let cleaned: String = user
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "local".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // 2024-03-09T12:00:00Z
    const NOON: f64 = 1_709_985_600.0;

    #[test]
    fn appends_lines_per_user_and_day() {
        let tmp = TempDir::new().unwrap();
        let writer = FileTranscriptWriter::new(tmp.path());

        let first = writer
            .write_transcript("alice", "what time is it", NOON, None)
            .unwrap();
        let second = writer
            .write_transcript("alice", "and the\tdate", NOON + 5.0, None)
            .unwrap();

        assert_eq!(first, tmp.path().join("2024-03-09").join("alice.tsv"));
        assert_eq!(first, second);
        let content = fs::read_to_string(&first).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "1709985600.000\talice\twhat time is it");
        assert!(lines[1].ends_with("\talice\tand the date"));
    }

    #[test]
    fn audio_is_content_addressed() {
        let tmp = TempDir::new().unwrap();
        let writer = FileTranscriptWriter::new(tmp.path());
        let audio = b"RIFF....WAVE";

        let path = writer
            .write_transcript("bob", "hello", NOON, Some(audio))
            .unwrap();

        assert_eq!(path.parent().unwrap(), tmp.path().join("audio"));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("{}.wav", checksum(audio))
        );
        assert_eq!(fs::read(&path).unwrap(), audio);

        let again = writer
            .write_transcript("bob", "hello again", NOON, Some(audio))
            .unwrap();
        assert_eq!(path, again);
    }

    #[test]
    fn user_names_are_sanitized() {
        assert_eq!(sanitize_user("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_user(""), "local");
        assert_eq!(sanitize_user("jo.doe-1"), "jo.doe-1");
    }

    #[test]
    fn rejects_non_finite_timestamps() {
        let tmp = TempDir::new().unwrap();
        let writer = FileTranscriptWriter::new(tmp.path());
        let err = writer
            .write_transcript("alice", "hi", f64::NAN, None)
            .unwrap_err();
        assert!(matches!(err, TranscriptError::InvalidTimestamp(_)));
    }

    #[test]
    fn checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
