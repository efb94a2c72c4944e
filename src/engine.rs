//! Signal derivation engine
//!
//! Scores per-source metadata snapshots against the loaded rules and emits typed
//! signals. Each rule is an independent function; a rule that fails (bad field
//! type, unparseable timestamp) is logged and contributes nothing, while the
//! remaining rules still run.
//!
//! Rules are evaluated in a fixed order and their signals are returned in that
//! order: meeting overload, after-hours activity, chat activity, email pattern.
//!
//! Meeting overload and after-hours activity only emit when their score clears
//! a gate. Chat activity and email pattern always emit, and their severity alone
//! tells low from high engagement.

use serde_json::Value;
use std::path::Path;

use crate::error::SignalError;
use crate::metadata::MetadataSnapshot;
use crate::nudge;
use crate::rules::RuleConfig;
use crate::types::{MetadataSource, Nudge, Signal, SignalMetadata, SignalType, UserContext};

/// Meeting overload emits only above this score
pub const MEETING_OVERLOAD_GATE: f64 = 0.7;

/// After-hours activity emits only above this score
pub const AFTER_HOURS_GATE: f64 = 0.6;

const MEETING_FIELDS: &[&str] = &["total_meetings", "total_duration_hours"];
const AFTER_HOURS_CALENDAR_FIELDS: &[&str] = &["after_hours_meetings"];
const AFTER_HOURS_CHAT_FIELDS: &[&str] = &["last_active"];
const CHAT_FIELDS: &[&str] = &["channel_count", "reaction_count"];
const EMAIL_FIELDS: &[&str] = &["total_messages", "thread_count"];

/// Stateless signal engine over an immutable rule configuration
#[derive(Debug, Clone, Default)]
pub struct SignalEngine {
    rules: RuleConfig,
}

impl SignalEngine {
    pub fn new(rules: RuleConfig) -> Self {
        Self { rules }
    }

    /// Build an engine from a rule file; falls back to defaults if it cannot be loaded
    pub fn from_path(path: &Path) -> Self {
        Self::new(RuleConfig::load(path))
    }

    pub fn rules(&self) -> &RuleConfig {
        &self.rules
    }

    /// Derive signals for `user` from whichever snapshots are available.
    ///
    /// Empty snapshots count as absent. With no snapshots the result is empty.
    pub fn process_metadata(
        &self,
        user: &UserContext,
        calendar: Option<&MetadataSnapshot>,
        chat: Option<&MetadataSnapshot>,
        email: Option<&MetadataSnapshot>,
    ) -> Vec<Signal> {
        let calendar = calendar.filter(|s| !s.is_empty());
        let chat = chat.filter(|s| !s.is_empty());
        let email = email.filter(|s| !s.is_empty());

        let mut signals = Vec::new();

        if let Some(calendar) = calendar {
            signals.extend(isolate(
                SignalType::MeetingOverload,
                self.meeting_overload(user, calendar),
            ));
        }

        if calendar.is_some() || chat.is_some() {
            signals.extend(isolate(
                SignalType::AfterHoursActivity,
                self.after_hours_activity(user, calendar, chat),
            ));
        }

        if let Some(chat) = chat {
            signals.extend(isolate(
                SignalType::SlackActivity,
                self.chat_activity(user, chat),
            ));
        }

        if let Some(email) = email {
            signals.extend(isolate(
                SignalType::EmailPattern,
                self.email_pattern(user, email),
            ));
        }

        signals
    }

    /// Generate a nudge for a signal; see [`nudge::generate_nudge`]
    pub fn generate_nudge(&self, signal: &Signal) -> Option<Nudge> {
        nudge::generate_nudge(&self.rules, signal)
    }

    fn meeting_overload(
        &self,
        user: &UserContext,
        calendar: &MetadataSnapshot,
    ) -> Result<Option<Signal>, SignalError> {
        let params = self.rules.params(SignalType::MeetingOverload);
        let total_meetings = calendar.count("total_meetings")?;
        let total_duration = calendar.count("total_duration_hours")?;

        let meeting_score = saturating_ratio(total_meetings, params.threshold);
        let duration_score = saturating_ratio(total_duration, params.secondary_threshold);
        let score = params.weights.0 * meeting_score + params.weights.1 * duration_score;

        if score <= MEETING_OVERLOAD_GATE {
            return Ok(None);
        }

        let mut metadata = SignalMetadata::new();
        metadata.insert("total_meetings".to_string(), number(total_meetings));
        metadata.insert("total_duration_hours".to_string(), number(total_duration));
        metadata.insert("meeting_threshold".to_string(), number(params.threshold));
        metadata.insert(
            "duration_threshold".to_string(),
            number(params.secondary_threshold),
        );

        let confidence = coverage(&[(calendar, MEETING_FIELDS)]);

        Ok(Some(Signal::new(
            user.user_id,
            SignalType::MeetingOverload,
            &[MetadataSource::Calendar],
            score,
            confidence,
            metadata,
        )))
    }

    /// Calendar and chat contributions are summed, not averaged, so chat alone
    /// tops out at its weight and cannot clear the gate with default weights.
    fn after_hours_activity(
        &self,
        user: &UserContext,
        calendar: Option<&MetadataSnapshot>,
        chat: Option<&MetadataSnapshot>,
    ) -> Result<Option<Signal>, SignalError> {
        let params = self.rules.params(SignalType::AfterHoursActivity);
        let mut score = 0.0;
        let mut metadata = SignalMetadata::new();
        let mut sources = Vec::new();
        let mut inputs: Vec<(&MetadataSnapshot, &[&str])> = Vec::with_capacity(2);

        if let Some(calendar) = calendar {
            let after_hours_meetings = calendar.count("after_hours_meetings")?;
            metadata.insert(
                "after_hours_meetings".to_string(),
                number(after_hours_meetings),
            );
            score += saturating_ratio(after_hours_meetings, params.threshold) * params.weights.0;
            sources.push(MetadataSource::Calendar);
            inputs.push((calendar, AFTER_HOURS_CALENDAR_FIELDS));
        }

        if let Some(chat) = chat {
            if let Some(hour) = chat.timestamp_hour("last_active")? {
                metadata.insert("last_active_hour".to_string(), Value::from(hour));
                if f64::from(hour) >= params.secondary_threshold {
                    score += params.weights.1;
                    metadata.insert("late_night_chat".to_string(), Value::Bool(true));
                    // Key used by existing nudge templates
                    metadata.insert("late_night_slack".to_string(), Value::Bool(true));
                }
            }
            sources.push(MetadataSource::Chat);
            inputs.push((chat, AFTER_HOURS_CHAT_FIELDS));
        }

        if score <= AFTER_HOURS_GATE {
            return Ok(None);
        }

        Ok(Some(Signal::new(
            user.user_id,
            SignalType::AfterHoursActivity,
            &sources,
            score,
            coverage(&inputs),
            metadata,
        )))
    }

    fn chat_activity(
        &self,
        user: &UserContext,
        chat: &MetadataSnapshot,
    ) -> Result<Option<Signal>, SignalError> {
        let params = self.rules.params(SignalType::SlackActivity);
        let channel_count = chat.count("channel_count")?;
        let reaction_count = chat.count("reaction_count")?;

        let channel_score = saturating_ratio(channel_count, params.threshold);
        let reaction_score = saturating_ratio(reaction_count, params.secondary_threshold);
        let score = params.weights.0 * channel_score + params.weights.1 * reaction_score;

        let mut metadata = SignalMetadata::new();
        metadata.insert("channel_count".to_string(), number(channel_count));
        metadata.insert("reaction_count".to_string(), number(reaction_count));
        metadata.insert("channel_threshold".to_string(), number(params.threshold));
        metadata.insert(
            "reaction_threshold".to_string(),
            number(params.secondary_threshold),
        );

        let confidence = coverage(&[(chat, CHAT_FIELDS)]);

        Ok(Some(Signal::new(
            user.user_id,
            SignalType::SlackActivity,
            &[MetadataSource::Chat],
            score,
            confidence,
            metadata,
        )))
    }

    fn email_pattern(
        &self,
        user: &UserContext,
        email: &MetadataSnapshot,
    ) -> Result<Option<Signal>, SignalError> {
        let params = self.rules.params(SignalType::EmailPattern);
        let total_messages = email.count("total_messages")?;
        let thread_count = email.count("thread_count")?;

        let message_score = saturating_ratio(total_messages, params.threshold);
        let thread_score = saturating_ratio(thread_count, params.secondary_threshold);
        let score = params.weights.0 * message_score + params.weights.1 * thread_score;

        let mut metadata = SignalMetadata::new();
        metadata.insert("total_messages".to_string(), number(total_messages));
        metadata.insert("thread_count".to_string(), number(thread_count));
        metadata.insert("message_threshold".to_string(), number(params.threshold));
        metadata.insert(
            "thread_threshold".to_string(),
            number(params.secondary_threshold),
        );

        let confidence = coverage(&[(email, EMAIL_FIELDS)]);

        Ok(Some(Signal::new(
            user.user_id,
            SignalType::EmailPattern,
            &[MetadataSource::Email],
            score,
            confidence,
            metadata,
        )))
    }
}

/// Contain one rule's outcome: errors are logged and dropped
fn isolate(
    signal_type: SignalType,
    outcome: Result<Option<Signal>, SignalError>,
) -> Option<Signal> {
    match outcome {
        Ok(Some(signal)) => {
            tracing::debug!(
                signal_type = %signal_type,
                severity = signal.severity,
                confidence = signal.confidence,
                "signal emitted"
            );
            Some(signal)
        }
        Ok(None) => {
            tracing::debug!(signal_type = %signal_type, "score below gate, no signal");
            None
        }
        Err(e) => {
            tracing::error!(signal_type = %signal_type, error = %e, "error processing signal rule");
            None
        }
    }
}

/// `value / threshold` capped to [0, 1]. Zero, negative or NaN thresholds saturate to 1.
fn saturating_ratio(value: f64, threshold: f64) -> f64 {
    if threshold.is_nan() || threshold <= 0.0 {
        return 1.0;
    }
    (value / threshold).clamp(0.0, 1.0)
}

/// Share of expected input fields actually present across the given snapshots
fn coverage(inputs: &[(&MetadataSnapshot, &[&str])]) -> f64 {
    let expected: usize = inputs.iter().map(|(_, fields)| fields.len()).sum();
    if expected == 0 {
        return 0.0;
    }
    let present = inputs
        .iter()
        .flat_map(|(snapshot, fields)| fields.iter().filter(move |f| snapshot.contains(f)))
        .count();
    present as f64 / expected as f64
}

/// Whole numbers are stored as integers so templates render `15`, not `15.0`
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{NudgeTemplate, SignalRule};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    fn user() -> UserContext {
        UserContext::new(Uuid::new_v4())
    }

    fn engine() -> SignalEngine {
        SignalEngine::default()
    }

    fn calendar(meetings: f64, hours: f64, after_hours: f64) -> MetadataSnapshot {
        MetadataSnapshot::new()
            .with("total_meetings", meetings)
            .with("total_duration_hours", hours)
            .with("after_hours_meetings", after_hours)
    }

    fn chat(channels: u64, reactions: u64, last_active: &str) -> MetadataSnapshot {
        MetadataSnapshot::new()
            .with("channel_count", channels)
            .with("reaction_count", reactions)
            .with("last_active", last_active)
    }

    fn types(signals: &[Signal]) -> Vec<SignalType> {
        signals.iter().map(|s| s.signal_type).collect()
    }

    #[test]
    fn test_no_metadata_yields_no_signals() {
        let signals = engine().process_metadata(&user(), None, None, None);
        assert!(signals.is_empty());

        let empty = MetadataSnapshot::new();
        let signals = engine().process_metadata(&user(), Some(&empty), Some(&empty), Some(&empty));
        assert!(signals.is_empty());
    }

    #[test]
    fn test_meeting_overload_fires_at_saturation() {
        let cal = calendar(15.0, 25.0, 0.0);
        let signals = engine().process_metadata(&user(), Some(&cal), None, None);

        let meeting = &signals[0];
        assert_eq!(meeting.signal_type, SignalType::MeetingOverload);
        assert!((meeting.severity - 1.0).abs() < 1e-9);
        assert_eq!(meeting.source, "calendar");
        assert_eq!(meeting.confidence, 1.0);
        assert_eq!(meeting.metadata["total_meetings"], json!(15));
        assert_eq!(meeting.metadata["total_duration_hours"], json!(25));
        assert_eq!(meeting.metadata["meeting_threshold"], json!(12));
        assert_eq!(meeting.metadata["duration_threshold"], json!(20));
    }

    #[test]
    fn test_meeting_overload_gated_below_threshold() {
        // 0.6 * 0.5 + 0.4 * 0.4 = 0.46
        let cal = calendar(6.0, 8.0, 0.0);
        let signals = engine().process_metadata(&user(), Some(&cal), None, None);
        assert!(!types(&signals).contains(&SignalType::MeetingOverload));
    }

    #[test]
    fn test_meeting_overload_zero_meetings_never_fires() {
        for hours in [0.0, 10.0, 20.0, 100.0] {
            let cal = calendar(0.0, hours, 0.0);
            let signals = engine().process_metadata(&user(), Some(&cal), None, None);
            assert!(!types(&signals).contains(&SignalType::MeetingOverload));
        }
    }

    #[test]
    fn test_meeting_overload_gate_is_strict() {
        let rules = RuleConfig::default().with_rule(
            SignalType::MeetingOverload,
            SignalRule {
                threshold: None,
                secondary_threshold: None,
                weights: Some(vec![0.7, 0.0]),
            },
        );
        // 0.7 * 1.0 + 0.0 * 1.0 lands exactly on the gate
        let cal = calendar(12.0, 20.0, 0.0);
        let signals = SignalEngine::new(rules).process_metadata(&user(), Some(&cal), None, None);
        assert!(!types(&signals).contains(&SignalType::MeetingOverload));
    }

    #[test]
    fn test_after_hours_calendar_and_late_chat() {
        let cal = calendar(0.0, 0.0, 3.0);
        let late = chat(2, 5, "2024-01-15T22:10:00");
        let signals = engine().process_metadata(&user(), Some(&cal), Some(&late), None);

        let after_hours = signals
            .iter()
            .find(|s| s.signal_type == SignalType::AfterHoursActivity)
            .unwrap();
        assert!((after_hours.severity - 1.0).abs() < 1e-9);
        assert_eq!(after_hours.source, "calendar+chat");
        assert_eq!(after_hours.metadata["after_hours_meetings"], json!(3));
        assert_eq!(after_hours.metadata["late_night_chat"], json!(true));
        assert_eq!(after_hours.metadata["late_night_slack"], json!(true));
        assert_eq!(after_hours.metadata["last_active_hour"], json!(22));
    }

    #[test]
    fn test_after_hours_accepts_timestamps_without_seconds() {
        let cal = calendar(0.0, 0.0, 3.0);
        for last_active in ["2024-01-15T22:10", "2024-01-15T22:10+10:00", "2024-01-15 22:10"] {
            let late = chat(2, 5, last_active);
            let signals = engine().process_metadata(&user(), Some(&cal), Some(&late), None);

            assert_eq!(
                types(&signals),
                vec![SignalType::AfterHoursActivity, SignalType::SlackActivity],
                "last_active = {:?}",
                last_active
            );
            assert!((signals[0].severity - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_after_hours_late_chat_alone_caps_at_half() {
        let late = chat(2, 5, "2024-01-15T23:30:00");
        let signals = engine().process_metadata(&user(), None, Some(&late), None);

        // Chat-only contribution is exactly 0.5, below the 0.6 gate
        assert_eq!(types(&signals), vec![SignalType::SlackActivity]);
    }

    #[test]
    fn test_after_hours_calendar_alone() {
        // 3 after-hours meetings saturate at 0.5, which is below the gate
        let cal = calendar(0.0, 0.0, 6.0);
        let signals = engine().process_metadata(&user(), Some(&cal), None, None);
        assert!(signals.is_empty());
    }

    #[test]
    fn test_after_hours_partial_calendar_plus_late_chat() {
        // 2/3 * 0.5 + 0.5 = 0.833
        let cal = calendar(0.0, 0.0, 2.0);
        let late = chat(0, 0, "2024-01-15T21:00:00");
        let signals = engine().process_metadata(&user(), Some(&cal), Some(&late), None);

        let after_hours = signals
            .iter()
            .find(|s| s.signal_type == SignalType::AfterHoursActivity)
            .unwrap();
        assert!((after_hours.severity - (2.0 / 3.0 * 0.5 + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_after_hours_daytime_chat_does_not_contribute() {
        let cal = calendar(0.0, 0.0, 3.0);
        let day = chat(2, 5, "2024-01-15T20:59:59");
        let signals = engine().process_metadata(&user(), Some(&cal), Some(&day), None);
        assert!(!types(&signals).contains(&SignalType::AfterHoursActivity));
    }

    #[test]
    fn test_chat_activity_always_emitted() {
        let busy = chat(10, 50, "2024-01-15T10:00:00");
        let signals = engine().process_metadata(&user(), None, Some(&busy), None);
        assert_eq!(signals.len(), 1);
        assert!((signals[0].severity - 1.0).abs() < 1e-9);

        // Unlike meeting overload, a near-zero score still emits
        let quiet = chat(1, 0, "2024-01-15T10:00:00");
        let signals = engine().process_metadata(&user(), None, Some(&quiet), None);
        assert_eq!(types(&signals), vec![SignalType::SlackActivity]);
        assert!((signals[0].severity - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_email_pattern_always_emitted() {
        let email = MetadataSnapshot::new()
            .with("total_messages", 50)
            .with("thread_count", 3);
        let signals = engine().process_metadata(&user(), None, None, Some(&email));

        assert_eq!(types(&signals), vec![SignalType::EmailPattern]);
        // 0.5 * 0.5 + 0.5 * 0.1
        assert!((signals[0].severity - 0.3).abs() < 1e-9);
        assert_eq!(signals[0].metadata["message_threshold"], json!(100));
    }

    #[test]
    fn test_evaluation_order() {
        let cal = calendar(20.0, 30.0, 3.0);
        let late = chat(10, 50, "2024-01-15T22:00:00");
        let email = MetadataSnapshot::new().with("total_messages", 10);
        let signals = engine().process_metadata(&user(), Some(&cal), Some(&late), Some(&email));

        assert_eq!(
            types(&signals),
            vec![
                SignalType::MeetingOverload,
                SignalType::AfterHoursActivity,
                SignalType::SlackActivity,
                SignalType::EmailPattern,
            ]
        );
    }

    #[test]
    fn test_rule_failure_is_isolated() {
        let cal = MetadataSnapshot::new()
            .with("total_meetings", "lots")
            .with("total_duration_hours", 30)
            .with("after_hours_meetings", 3);
        let bad_chat = chat(10, 50, "not a timestamp");
        let email = MetadataSnapshot::new()
            .with("total_messages", 100)
            .with("thread_count", 30);

        let signals = engine().process_metadata(&user(), Some(&cal), Some(&bad_chat), Some(&email));

        // Meeting overload and after-hours fail; chat and email still run
        assert_eq!(
            types(&signals),
            vec![SignalType::SlackActivity, SignalType::EmailPattern]
        );
    }

    #[test]
    fn test_non_positive_thresholds_saturate() {
        let rules = RuleConfig::default()
            .with_rule(
                SignalType::MeetingOverload,
                SignalRule {
                    threshold: Some(0.0),
                    secondary_threshold: Some(-4.0),
                    weights: None,
                },
            )
            .with_rule(
                SignalType::EmailPattern,
                SignalRule {
                    threshold: Some(0.0),
                    secondary_threshold: Some(0.0),
                    weights: None,
                },
            );
        let engine = SignalEngine::new(rules);

        let cal = calendar(1.0, 1.0, 0.0);
        let email = MetadataSnapshot::new().with("total_messages", 1);
        let signals = engine.process_metadata(&user(), Some(&cal), None, Some(&email));

        assert_eq!(signals.len(), 2);
        assert!(signals.iter().all(|s| (s.severity - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_saturating_ratio() {
        assert_eq!(saturating_ratio(6.0, 12.0), 0.5);
        assert_eq!(saturating_ratio(24.0, 12.0), 1.0);
        assert_eq!(saturating_ratio(5.0, 0.0), 1.0);
        assert_eq!(saturating_ratio(0.0, 0.0), 1.0);
        assert_eq!(saturating_ratio(5.0, -1.0), 1.0);
        assert_eq!(saturating_ratio(5.0, f64::NAN), 1.0);
        assert_eq!(saturating_ratio(-5.0, 10.0), 0.0);
    }

    #[test]
    fn test_configured_weights_are_used() {
        let rules = RuleConfig::default().with_rule(
            SignalType::SlackActivity,
            SignalRule {
                threshold: None,
                secondary_threshold: None,
                weights: Some(vec![1.0, 0.0]),
            },
        );
        let engine = SignalEngine::new(rules);
        let half = chat(5, 50, "");
        let signals = engine.process_metadata(&user(), None, Some(&half), None);
        assert!((signals[0].severity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_reflects_missing_fields() {
        let cal = MetadataSnapshot::new().with("total_meetings", 40);
        let signals = engine().process_metadata(&user(), Some(&cal), None, None);

        // 0.6 * 1.0 + 0.4 * 0.0 = 0.6, gated
        assert!(signals.is_empty());

        let email = MetadataSnapshot::new().with("total_messages", 200);
        let signals = engine().process_metadata(&user(), None, None, Some(&email));
        assert_eq!(signals[0].confidence, 0.5);
    }

    #[test]
    fn test_processing_is_idempotent() {
        let user = user();
        let cal = calendar(14.0, 22.0, 2.0);
        let late = chat(7, 31, "2024-01-15T21:45:00+11:00");
        let email = MetadataSnapshot::new()
            .with("total_messages", 77)
            .with("thread_count", 12);

        let first = engine().process_metadata(&user, Some(&cal), Some(&late), Some(&email));
        let second = engine().process_metadata(&user, Some(&cal), Some(&late), Some(&email));

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.signal_type, b.signal_type);
            assert_eq!(a.severity, b.severity);
            assert_eq!(a.confidence, b.confidence);
            assert_eq!(a.metadata, b.metadata);
            assert_eq!(a.user_id, user.user_id);
        }
    }

    #[test]
    fn test_generate_nudge_through_engine() {
        let rules = RuleConfig::default().with_template(
            SignalType::MeetingOverload,
            NudgeTemplate::new("{total_meetings} meetings against a limit of {meeting_threshold}"),
        );
        let engine = SignalEngine::new(rules);
        let cal = calendar(15.0, 25.0, 0.0);
        let signals = engine.process_metadata(&user(), Some(&cal), None, None);

        let nudge = engine.generate_nudge(&signals[0]).unwrap();
        assert_eq!(nudge.message, "15 meetings against a limit of 12");
        assert_eq!(nudge.signal_id, Some(signals[0].id));
    }

    #[test]
    fn test_missing_rule_file_uses_defaults() {
        let path = std::env::temp_dir().join(format!("tend-absent-{}.yaml", Uuid::new_v4()));
        let engine = SignalEngine::from_path(&path);
        assert!(engine.rules().is_empty());

        let cal = calendar(15.0, 25.0, 0.0);
        let signals = engine.process_metadata(&user(), Some(&cal), None, None);
        assert_eq!(types(&signals), vec![SignalType::MeetingOverload]);
    }
}
