//! Provider payload adapters
//!
//! These adapters turn provider listings the caller has already fetched into the
//! metadata snapshots the engine consumes. They only count and time-stamp; no
//! message content, titles or attendees are carried into a snapshot.

mod calendar;
mod chat;
mod email;

pub use calendar::{CalendarAdapter, AFTER_HOURS_START_HOUR};
pub use chat::ChatAdapter;
pub use email::{EmailAdapter, MAX_ANALYZED_MESSAGES};

use crate::error::SignalError;
use crate::metadata::MetadataSnapshot;
use crate::types::MetadataSource;

/// Trait for provider payload adapters
pub trait SourceAdapter {
    /// Source this adapter produces snapshots for
    fn source(&self) -> MetadataSource;

    /// Parse a raw provider payload and aggregate it into a snapshot
    fn to_snapshot(&self, raw_json: &str) -> Result<MetadataSnapshot, SignalError>;
}

/// The adapter for `source`
pub fn adapter_for(source: MetadataSource) -> Box<dyn SourceAdapter> {
    match source {
        MetadataSource::Calendar => Box::new(CalendarAdapter),
        MetadataSource::Chat => Box::new(ChatAdapter),
        MetadataSource::Email => Box::new(EmailAdapter),
    }
}
