//! Chat adapter
//!
//! Aggregates a Slack-style workspace listing (joined channels, reactions and
//! presence) into collaboration counters.

use serde::Deserialize;
use serde_json::Value;

use super::SourceAdapter;
use crate::error::SignalError;
use crate::metadata::MetadataSnapshot;
use crate::types::MetadataSource;

/// Chat payload adapter
pub struct ChatAdapter;

impl SourceAdapter for ChatAdapter {
    fn source(&self) -> MetadataSource {
        MetadataSource::Chat
    }

    fn to_snapshot(&self, raw_json: &str) -> Result<MetadataSnapshot, SignalError> {
        let payload: ChatPayload = serde_json::from_str(raw_json)
            .map_err(|e| SignalError::PayloadParse(format!("chat workspace: {}", e)))?;

        let last_active = payload
            .presence
            .and_then(|p| p.last_activity)
            .unwrap_or(Value::Null);

        Ok(MetadataSnapshot::new()
            .with("channel_count", payload.channels.len() as u64)
            .with("reaction_count", payload.reactions.len() as u64)
            .with("last_active", last_active))
    }
}

#[derive(Debug, Deserialize)]
struct ChatPayload {
    #[serde(default)]
    channels: Vec<Value>,
    #[serde(default, alias = "items")]
    reactions: Vec<Value>,
    #[serde(default)]
    presence: Option<Presence>,
}

#[derive(Debug, Deserialize)]
struct Presence {
    /// ISO 8601 string or Unix seconds
    #[serde(default)]
    last_activity: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_aggregation() {
        let json = r#"{
            "channels": [{"id": "C1"}, {"id": "C2"}, {"id": "C3"}],
            "reactions": [{"type": "message"}, {"type": "message"}],
            "presence": {"presence": "active", "last_activity": "2024-01-15T22:40:00+10:00"}
        }"#;
        let snapshot = ChatAdapter.to_snapshot(json).unwrap();

        assert_eq!(snapshot.count("channel_count").unwrap(), 3.0);
        assert_eq!(snapshot.count("reaction_count").unwrap(), 2.0);
        assert_eq!(snapshot.timestamp_hour("last_active").unwrap(), Some(22));
    }

    #[test]
    fn test_reactions_listed_as_items() {
        let json = r#"{"items": [{}, {}, {}, {}], "presence": {"last_activity": 1705359600}}"#;
        let snapshot = ChatAdapter.to_snapshot(json).unwrap();

        assert_eq!(snapshot.count("reaction_count").unwrap(), 4.0);
        assert_eq!(snapshot.count("channel_count").unwrap(), 0.0);
        assert_eq!(snapshot.timestamp_hour("last_active").unwrap(), Some(23));
    }

    #[test]
    fn test_missing_presence() {
        let snapshot = ChatAdapter.to_snapshot(r#"{"channels": []}"#).unwrap();
        assert!(!snapshot.contains("last_active"));
        assert_eq!(snapshot.timestamp_hour("last_active").unwrap(), None);
    }

    #[test]
    fn test_invalid_payload() {
        assert!(matches!(
            ChatAdapter.to_snapshot(r#"{"channels": 3}"#),
            Err(SignalError::PayloadParse(_))
        ));
    }
}
