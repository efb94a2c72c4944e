//! Calendar adapter
//!
//! Aggregates a calendar event listing (Google Calendar `events.list` shape) into
//! meeting counts and durations.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Timelike};
use serde::Deserialize;

use super::SourceAdapter;
use crate::error::SignalError;
use crate::metadata::MetadataSnapshot;
use crate::types::MetadataSource;

/// Meetings starting at or after this local hour count as after hours
pub const AFTER_HOURS_START_HOUR: u32 = 18;

/// Calendar payload adapter
pub struct CalendarAdapter;

impl SourceAdapter for CalendarAdapter {
    fn source(&self) -> MetadataSource {
        MetadataSource::Calendar
    }

    fn to_snapshot(&self, raw_json: &str) -> Result<MetadataSnapshot, SignalError> {
        let payload: CalendarPayload = serde_json::from_str(raw_json)
            .map_err(|e| SignalError::PayloadParse(format!("calendar events: {}", e)))?;

        let mut total_duration_hours = 0.0;
        let mut after_hours_meetings = 0u32;

        for event in &payload.items {
            let start = event.start.instant()?;
            let end = event.end.instant()?;

            total_duration_hours += start.hours_until(&end);
            if start.local_hour() >= AFTER_HOURS_START_HOUR {
                after_hours_meetings += 1;
            }
        }

        let total_meetings = payload.items.len();
        let average_duration_hours = if total_meetings > 0 {
            total_duration_hours / total_meetings as f64
        } else {
            0.0
        };

        Ok(MetadataSnapshot::new()
            .with("total_meetings", total_meetings as u64)
            .with("total_duration_hours", total_duration_hours)
            .with("after_hours_meetings", after_hours_meetings)
            .with("average_duration_hours", average_duration_hours))
    }
}

#[derive(Debug, Deserialize)]
struct CalendarPayload {
    #[serde(default)]
    items: Vec<CalendarEvent>,
}

#[derive(Debug, Deserialize)]
struct CalendarEvent {
    start: EventTime,
    end: EventTime,
}

/// Either a timed instant or an all-day date
#[derive(Debug, Deserialize)]
struct EventTime {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    date: Option<String>,
}

enum Instant {
    Zoned(DateTime<FixedOffset>),
    AllDay(NaiveDateTime),
}

impl EventTime {
    fn instant(&self) -> Result<Instant, SignalError> {
        if let Some(date_time) = &self.date_time {
            return DateTime::parse_from_rfc3339(date_time)
                .map(Instant::Zoned)
                .map_err(|_| SignalError::TimestampParse {
                    field: "dateTime".to_string(),
                    value: date_time.clone(),
                });
        }

        let date = self
            .date
            .as_deref()
            .ok_or_else(|| {
                SignalError::PayloadParse("event time has neither dateTime nor date".to_string())
            })?;
        let parse_error = || SignalError::TimestampParse {
            field: "date".to_string(),
            value: date.to_string(),
        };
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| parse_error())?
            .and_hms_opt(0, 0, 0)
            .map(Instant::AllDay)
            .ok_or_else(parse_error)
    }
}

impl Instant {
    fn local(&self) -> NaiveDateTime {
        match self {
            Instant::Zoned(dt) => dt.naive_local(),
            Instant::AllDay(dt) => *dt,
        }
    }

    fn local_hour(&self) -> u32 {
        self.local().hour()
    }

    /// Elapsed hours; mixed timed/all-day pairs compare wall-clock times.
    /// Events that end before they start count as zero.
    fn hours_until(&self, end: &Instant) -> f64 {
        let elapsed = match (self, end) {
            (Instant::Zoned(a), Instant::Zoned(b)) => *b - *a,
            _ => end.local() - self.local(),
        };
        (elapsed.num_seconds() as f64 / 3600.0).max(0.0)
    }
}
