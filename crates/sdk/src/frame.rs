//! Inbound realtime frame model.
//!
//! Frames arriving on the leader's realtime channel are UTF-8 JSON objects
//! carrying a mandatory `event` discriminator string; the remaining fields
//! are the event-specific payload. The SDK does not interpret payloads;
//! they are handed to owners as structured JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured record received on the leader's realtime channel.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerFrame {
    /// Event-kind discriminator, e.g. `"question"` or `"score_update"`.
    pub event: String,

    /// Event-specific payload fields, preserved as structured JSON.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

impl ServerFrame {
    /// Parses a raw inbound text frame.
    ///
    /// Fails if the text is not a JSON object or if the `event`
    /// discriminator is missing or not a string. Callers drop failed frames
    /// with a diagnostic; a parse failure never tears down the connection.
    pub(crate) fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Returns a payload field by name, if present.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_discriminated_frame() {
        let frame =
            ServerFrame::parse(r#"{"event":"question","prompt":"Capital of France?","seconds":20}"#)
                .unwrap();

        assert_eq!(frame.event, "question");
        assert_eq!(frame.field("prompt").and_then(Value::as_str), Some("Capital of France?"));
        assert_eq!(frame.field("seconds").and_then(Value::as_u64), Some(20));
    }

    #[test]
    fn payload_may_be_empty() {
        let frame = ServerFrame::parse(r#"{"event":"game_over"}"#).unwrap();

        assert_eq!(frame.event, "game_over");
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn missing_discriminator_is_rejected() {
        assert!(ServerFrame::parse(r#"{"prompt":"orphan"}"#).is_err());
    }

    #[test]
    fn non_string_discriminator_is_rejected() {
        assert!(ServerFrame::parse(r#"{"event":7}"#).is_err());
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(ServerFrame::parse("[1,2,3]").is_err());
        assert!(ServerFrame::parse("not json at all").is_err());
    }

    #[test]
    fn nested_payload_preserved() {
        let frame = ServerFrame::parse(
            r#"{"event":"score_update","scores":{"alice":3,"bob":1}}"#,
        )
        .unwrap();

        let scores = frame.field("scores").unwrap();
        assert_eq!(scores["alice"], 3);
        assert_eq!(scores["bob"], 1);
    }

    #[test]
    fn absent_field_is_none() {
        let frame = ServerFrame::parse(r#"{"event":"player_joined","name":"carol"}"#).unwrap();
        assert!(frame.field("missing").is_none());
    }
}
