//! Tend Signals - Rule-driven wellbeing signal engine
//!
//! Tend turns aggregated workplace metadata (calendar, chat and email counts, never
//! content) into scored wellbeing signals, and high-severity signals into nudges,
//! through a deterministic pipeline: metadata snapshots → rule evaluation →
//! signal scoring → nudge templating.
//!
//! ## Modules
//!
//! - **Sources**: Aggregate provider listings into metadata snapshots
//! - **Rules**: Versioned thresholds, weights and nudge templates
//! - **Engine**: Score snapshots into signals and signals into nudges

pub mod engine;
pub mod error;
pub mod metadata;
pub mod nudge;
pub mod pipeline;
pub mod rules;
pub mod sources;
pub mod types;

pub use engine::SignalEngine;
pub use error::SignalError;
pub use metadata::MetadataSnapshot;
pub use pipeline::{metadata_to_signals, DerivationBatch, DerivationOutcome, SignalProcessor};
pub use rules::{NudgeTemplate, RuleConfig, RuleParams, SignalRule};
pub use types::{
    MetadataSource, Nudge, NudgePriority, Signal, SignalType, UserContext, UserRole,
};

/// Crate version reported by the CLI
pub const TEND_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "tend-signals";
