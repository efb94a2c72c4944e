//! Error types for Tend signals

use thiserror::Error;

/// Errors that can occur while loading rules or deriving signals
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Failed to read rule file {path}: {source}")]
    RuleFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rule file {path}: {message}")]
    RuleFileParse { path: String, message: String },

    #[error("Invalid rule entry '{entry}': {message}")]
    InvalidRule { entry: String, message: String },

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Metadata field '{field}' has unexpected type: {found}")]
    InvalidField { field: String, found: String },

    #[error("Timestamp parse error in '{field}': {value}")]
    TimestampParse { field: String, value: String },

    #[error("Malformed template: {0}")]
    TemplateSyntax(String),

    #[error("Template references missing field: {0}")]
    TemplateField(String),

    #[error("Template field '{field}' cannot be formatted: {message}")]
    TemplateValue { field: String, message: String },

    #[error("Nudge {nudge_id} is not owned by user {user_id}")]
    NotOwner { nudge_id: String, user_id: String },

    #[error("Failed to parse provider payload: {0}")]
    PayloadParse(String),

    #[error("Invalid derivation batch: {0}")]
    InvalidBatch(String),
}
