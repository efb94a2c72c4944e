//! Core types for Tend signals
//!
//! This module defines the value objects produced by the signal engine: typed
//! signals, the nudges derived from them, and the user context they belong to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::SignalError;

/// Scalar metadata attached to signals and nudges, keyed by field name
pub type SignalMetadata = BTreeMap<String, Value>;

/// Wellbeing signal types produced by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    MeetingOverload,
    AfterHoursActivity,
    SlackActivity,
    EmailPattern,
}

impl SignalType {
    /// All signal types in engine evaluation order
    pub const ALL: [SignalType; 4] = [
        SignalType::MeetingOverload,
        SignalType::AfterHoursActivity,
        SignalType::SlackActivity,
        SignalType::EmailPattern,
    ];

    /// Wire name, also used as the rule and template key
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::MeetingOverload => "meeting_overload",
            SignalType::AfterHoursActivity => "after_hours_activity",
            SignalType::SlackActivity => "slack_activity",
            SignalType::EmailPattern => "email_pattern",
        }
    }

    /// Look up a signal type by its wire name
    pub fn from_key(key: &str) -> Option<SignalType> {
        Self::ALL.into_iter().find(|t| t.as_str() == key)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata source a snapshot was collected from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    Calendar,
    Chat,
    Email,
}

impl MetadataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataSource::Calendar => "calendar",
            MetadataSource::Chat => "chat",
            MetadataSource::Email => "email",
        }
    }
}

/// Organisational role of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Employee,
    Manager,
    Admin,
}

/// The user a derivation runs for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    /// User identifier
    pub user_id: Uuid,
    /// User role
    #[serde(default)]
    pub role: UserRole,
    /// Team the user belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<Uuid>,
}

impl UserContext {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: UserRole::Employee,
            team_id: None,
        }
    }
}

/// A scored, typed observation derived from behavioral metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Signal identifier, generated on creation
    pub id: Uuid,
    /// Owning user
    pub user_id: Uuid,
    /// Signal type
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    /// Contributing sources joined with `+` (e.g. `calendar+chat`)
    pub source: String,
    /// Severity (0-1)
    pub severity: f64,
    /// Confidence in the severity (0-1)
    pub confidence: f64,
    /// Raw counts and thresholds used to compute the severity
    pub metadata: SignalMetadata,
    /// When the signal was created
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Create a signal, clamping severity and confidence to [0, 1]
    pub fn new(
        user_id: Uuid,
        signal_type: SignalType,
        sources: &[MetadataSource],
        severity: f64,
        confidence: f64,
        metadata: SignalMetadata,
    ) -> Self {
        let source = sources
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join("+");

        Self {
            id: Uuid::new_v4(),
            user_id,
            signal_type,
            source,
            severity: clamp_unit(severity),
            confidence: clamp_unit(confidence),
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Nudge priority level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgePriority {
    Low,
    Medium,
    High,
}

/// A user-facing templated message generated from a high-severity signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nudge {
    /// Nudge identifier
    pub id: Uuid,
    /// Owning user
    pub user_id: Uuid,
    /// Parent signal, if any
    pub signal_id: Option<Uuid>,
    /// Nudge type (the parent signal type's wire name for engine-built nudges)
    #[serde(rename = "type")]
    pub nudge_type: String,
    /// Short title
    pub title: String,
    /// Template-expanded message
    pub message: String,
    /// Optional follow-up link
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    /// Priority
    pub priority: NudgePriority,
    /// Context copied from the parent signal
    pub metadata: SignalMetadata,
    /// Whether the owner has read the nudge
    #[serde(default)]
    pub is_read: bool,
    /// When the nudge was created
    pub created_at: DateTime<Utc>,
}

impl Nudge {
    /// Mark the nudge as read on behalf of `user_id`.
    ///
    /// Only the owning user may toggle the read state.
    pub fn mark_read(&mut self, user_id: Uuid) -> Result<(), SignalError> {
        if self.user_id != user_id {
            return Err(SignalError::NotOwner {
                nudge_id: self.id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        self.is_read = true;
        Ok(())
    }
}

/// Clamp a score into [0, 1]; non-finite values collapse to 0
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
