//! Email adapter
//!
//! Aggregates a mailbox message listing (Gmail `messages.list` shape) into
//! message and thread counts. Only message and thread identifiers are read.

use serde::Deserialize;
use std::collections::HashSet;

use super::SourceAdapter;
use crate::error::SignalError;
use crate::metadata::MetadataSnapshot;
use crate::types::MetadataSource;

/// Thread counting only looks at this many messages from the head of the listing
pub const MAX_ANALYZED_MESSAGES: usize = 100;

/// Email payload adapter
pub struct EmailAdapter;

impl SourceAdapter for EmailAdapter {
    fn source(&self) -> MetadataSource {
        MetadataSource::Email
    }

    fn to_snapshot(&self, raw_json: &str) -> Result<MetadataSnapshot, SignalError> {
        let payload: EmailPayload = serde_json::from_str(raw_json)
            .map_err(|e| SignalError::PayloadParse(format!("message listing: {}", e)))?;

        let analyzed = &payload.messages[..payload.messages.len().min(MAX_ANALYZED_MESSAGES)];
        let threads: HashSet<&str> = analyzed
            .iter()
            .filter_map(|m| m.thread_id.as_deref())
            .collect();

        Ok(MetadataSnapshot::new()
            .with("total_messages", payload.messages.len() as u64)
            .with("messages_analyzed", analyzed.len() as u64)
            .with("thread_count", threads.len() as u64))
    }
}

#[derive(Debug, Deserialize)]
struct EmailPayload {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    #[serde(rename = "threadId", default)]
    thread_id: Option<String>,
}
