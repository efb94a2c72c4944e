//! Derivation pipeline orchestration
//!
//! This module provides the public API for turning one user's metadata batch into
//! signals and nudges: Batch JSON → Engine (signals) → Nudge generation → Outcome.
//! Persisting the outcome is up to the caller.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::engine::SignalEngine;
use crate::error::SignalError;
use crate::metadata::MetadataSnapshot;
use crate::rules::RuleConfig;
use crate::types::{Nudge, Signal, UserContext};

/// One user's metadata for a processing cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivationBatch {
    /// User the metadata belongs to
    pub user: UserContext,
    /// Calendar snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar: Option<MetadataSnapshot>,
    /// Chat snapshot
    #[serde(default, alias = "slack", skip_serializing_if = "Option::is_none")]
    pub chat: Option<MetadataSnapshot>,
    /// Email snapshot
    #[serde(default, alias = "gmail", skip_serializing_if = "Option::is_none")]
    pub email: Option<MetadataSnapshot>,
}

impl DerivationBatch {
    pub fn new(user: UserContext) -> Self {
        Self {
            user,
            calendar: None,
            chat: None,
            email: None,
        }
    }
}

/// Signals and nudges derived for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivationOutcome {
    pub user_id: Uuid,
    pub signals: Vec<Signal>,
    pub nudges: Vec<Nudge>,
}

/// Parse a derivation batch from JSON
pub fn parse_batch(json: &str) -> Result<DerivationBatch, SignalError> {
    serde_json::from_str(json)
        .map_err(|e| SignalError::InvalidBatch(format!("Failed to parse derivation batch: {}", e)))
}

/// Convert a batch JSON to outcome JSON using default rules (stateless, one-shot).
///
/// # Example
/// ```ignore
/// let outcome_json = metadata_to_signals(batch_json)?;
/// ```
pub fn metadata_to_signals(batch_json: &str) -> Result<String, SignalError> {
    SignalProcessor::default().derive_json(batch_json)
}

/// Processor holding a loaded engine, reusable across users and threads
#[derive(Debug, Clone, Default)]
pub struct SignalProcessor {
    engine: SignalEngine,
}

impl SignalProcessor {
    pub fn new(engine: SignalEngine) -> Self {
        Self { engine }
    }

    pub fn with_rules(rules: RuleConfig) -> Self {
        Self::new(SignalEngine::new(rules))
    }

    /// Load rules from `path`, falling back to defaults if they cannot be read
    pub fn from_rules_path(path: &Path) -> Self {
        Self::new(SignalEngine::from_path(path))
    }

    pub fn engine(&self) -> &SignalEngine {
        &self.engine
    }

    /// Derive signals for a batch, then a nudge for each qualifying signal
    pub fn derive(&self, batch: &DerivationBatch) -> DerivationOutcome {
        let signals = self.engine.process_metadata(
            &batch.user,
            batch.calendar.as_ref(),
            batch.chat.as_ref(),
            batch.email.as_ref(),
        );
        let nudges = signals
            .iter()
            .filter_map(|signal| self.engine.generate_nudge(signal))
            .collect();

        tracing::debug!(
            user_id = %batch.user.user_id,
            signals = signals.len(),
            "derived signals for batch"
        );

        DerivationOutcome {
            user_id: batch.user.user_id,
            signals,
            nudges,
        }
    }

    /// Parse a batch JSON, derive it and serialize the outcome
    pub fn derive_json(&self, batch_json: &str) -> Result<String, SignalError> {
        let batch = parse_batch(batch_json)?;
        Ok(serde_json::to_string(&self.derive(&batch))?)
    }

    /// Derive many batches in parallel; outcomes keep the input order
    pub fn derive_many(&self, batches: &[DerivationBatch]) -> Vec<DerivationOutcome> {
        batches.par_iter().map(|batch| self.derive(batch)).collect()
    }
}
