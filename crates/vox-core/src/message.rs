//! Bus message envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::Context;
use crate::events::MessageType;

/// A message on the bus: channel name, data payload, and routing/turn context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub context: Context,
}

impl Message {
    pub fn new(msg_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
            context: Context::new(),
        }
    }

    /// Build a message from a serializable payload struct.
    ///
    /// Payloads that do not serialize to a JSON object produce empty data.
    pub fn from_payload<T: Serialize>(msg_type: MessageType, payload: &T) -> Self {
        Self::new(msg_type.as_str(), to_data(payload))
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn is(&self, msg_type: MessageType) -> bool {
        self.msg_type == msg_type.as_str()
    }

    /// Deserialize the data payload into a typed struct.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.data.clone()))
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// String list stored under `key`; non-string entries are skipped.
    pub fn data_strings(&self, key: &str) -> Vec<String> {
        self.data
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// A new message continuing this conversation.
    ///
    /// The context is copied and `source`/`destination` are swapped so the reply
    /// routes back to whoever sent this message.
    pub fn reply(&self, msg_type: impl Into<String>, data: Map<String, Value>) -> Self {
        let mut context = self.context.clone();
        let source = context.remove("source");
        let destination = context.remove("destination");
        if let Some(source) = source {
            context.insert("destination", source);
        }
        if let Some(destination) = destination {
            context.insert("source", destination);
        }
        Self {
            msg_type: msg_type.into(),
            data,
            context,
        }
    }

    /// Typed variant of [`Message::reply`].
    pub fn reply_with<T: Serialize>(&self, msg_type: MessageType, payload: &T) -> Self {
        self.reply(msg_type.as_str(), to_data(payload))
    }

    /// Reply on `<msg_type>.response`.
    pub fn response(&self, data: Map<String, Value>) -> Self {
        self.reply(format!("{}.response", self.msg_type), data)
    }
}

/// Serialize a payload struct into message data.
pub fn to_data<T: Serialize>(payload: &T) -> Map<String, Value> {
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{IntentAbortedPayload, UtterancePayload};
    use serde_json::json;

    #[test]
    fn reply_swaps_source_and_destination() {
        let mut context = Context::new();
        context.insert("source", "audio");
        context.insert("destination", "skills");
        context.insert("user", "alice");
        let msg = Message::new("ping", Map::new()).with_context(context);

        let reply = msg.reply("pong", Map::new());
        assert_eq!(reply.msg_type, "pong");
        assert_eq!(reply.context.get_str("destination"), Some("audio"));
        assert_eq!(reply.context.get_str("source"), Some("skills"));
        assert_eq!(reply.context.get_str("user"), Some("alice"));
    }

    #[test]
    fn response_appends_suffix() {
        let msg = Message::new(MessageType::Utterance.as_str(), Map::new());
        let response = msg.response(Map::new());
        assert!(response.is(MessageType::UtteranceAccepted));
    }

    #[test]
    fn typed_payload_round_trips_through_data() {
        let msg = Message::from_payload(
            MessageType::IntentAborted,
            &IntentAbortedPayload {
                utterances: vec!["  ".to_string()],
                lang: "en-us".to_string(),
            },
        );
        let payload: IntentAbortedPayload = msg.payload().unwrap();
        assert_eq!(payload.utterances, vec!["  "]);
        assert_eq!(msg.data_str("lang"), Some("en-us"));
    }

    #[test]
    fn data_strings_skips_non_strings() {
        let data = json!({"utterances": ["a", 1, "b"]}).as_object().cloned().unwrap();
        let msg = Message::new("x", data);
        assert_eq!(msg.data_strings("utterances"), vec!["a", "b"]);
        assert!(msg.data_strings("missing").is_empty());
    }

    #[test]
    fn message_deserializes_wire_format() {
        let msg: Message = serde_json::from_str(
            r#"{"type":"recognizer_loop:utterance","data":{"utterances":["hi"]},"context":{}}"#,
        )
        .unwrap();
        assert!(msg.is(MessageType::Utterance));
        let payload: UtterancePayload = msg.payload().unwrap();
        assert_eq!(payload.utterances, vec!["hi"]);
    }
}
