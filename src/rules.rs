//! Rule configuration store
//!
//! Holds the versioned per-signal scoring parameters and nudge templates. Rules
//! are loaded from a YAML or JSON document once at start-up and are read-only
//! afterwards; reloading means building a new engine.
//!
//! Loading is fail-open: a missing or unparseable file yields an empty
//! configuration, and every parameter the file does not provide resolves to the
//! engine default for that signal type. Malformed entries are dropped one by one
//! so a single bad rule never discards the rest of the file.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::SignalError;
use crate::nudge::validate_template;
use crate::types::{NudgePriority, SignalType};

/// Highest rule document version this build understands
pub const RULES_VERSION: u32 = 1;

/// Key holding nudge templates in the rule document
const NUDGES_KEY: &str = "nudges";

/// Key holding the document version
const VERSION_KEY: &str = "version";

/// Keys a rule entry may carry, legacy aliases included
const RULE_KEYS: &[&str] = &[
    "threshold",
    "meeting_threshold",
    "channel_threshold",
    "message_threshold",
    "secondary_threshold",
    "duration_threshold",
    "reaction_threshold",
    "thread_threshold",
    "weights",
];

/// Resolved scoring parameters for one signal type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleParams {
    /// Saturation point of the primary counter
    pub threshold: f64,
    /// Saturation point of the secondary counter (hour of day for after-hours)
    pub secondary_threshold: f64,
    /// Weights of the primary and secondary components
    pub weights: (f64, f64),
}

impl RuleParams {
    /// Engine defaults used for anything the rule file does not provide
    pub fn defaults(signal_type: SignalType) -> Self {
        match signal_type {
            SignalType::MeetingOverload => Self {
                threshold: 12.0,
                secondary_threshold: 20.0,
                weights: (0.6, 0.4),
            },
            SignalType::AfterHoursActivity => Self {
                threshold: 3.0,
                secondary_threshold: 21.0,
                weights: (0.5, 0.5),
            },
            SignalType::SlackActivity => Self {
                threshold: 10.0,
                secondary_threshold: 50.0,
                weights: (0.4, 0.6),
            },
            SignalType::EmailPattern => Self {
                threshold: 100.0,
                secondary_threshold: 30.0,
                weights: (0.5, 0.5),
            },
        }
    }
}

/// A rule entry as written in the rule document; absent values fall back to defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalRule {
    #[serde(
        default,
        alias = "meeting_threshold",
        alias = "channel_threshold",
        alias = "message_threshold",
        skip_serializing_if = "Option::is_none"
    )]
    pub threshold: Option<f64>,
    #[serde(
        default,
        alias = "duration_threshold",
        alias = "reaction_threshold",
        alias = "thread_threshold",
        skip_serializing_if = "Option::is_none"
    )]
    pub secondary_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
}

impl SignalRule {
    fn validate(&self, entry: &str) -> Result<(), SignalError> {
        let invalid = |message: String| SignalError::InvalidRule {
            entry: entry.to_string(),
            message,
        };

        for (name, value) in [
            ("threshold", self.threshold),
            ("secondary_threshold", self.secondary_threshold),
        ] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(invalid(format!("{} must be finite", name)));
                }
            }
        }

        if let Some(weights) = &self.weights {
            if weights.len() != 2 {
                return Err(invalid(format!(
                    "weights must be a pair, got {} values",
                    weights.len()
                )));
            }
            if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(invalid("weights must be finite and non-negative".to_string()));
            }
        }

        Ok(())
    }

    /// Overlay this entry on the defaults for `signal_type`
    fn resolve(&self, signal_type: SignalType) -> RuleParams {
        let defaults = RuleParams::defaults(signal_type);
        RuleParams {
            threshold: self.threshold.unwrap_or(defaults.threshold),
            secondary_threshold: self
                .secondary_threshold
                .unwrap_or(defaults.secondary_threshold),
            weights: match self.weights.as_deref() {
                Some([a, b]) => (*a, *b),
                _ => defaults.weights,
            },
        }
    }
}

/// Nudge template for one signal type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NudgeTemplate {
    /// Message with `{field}` placeholders filled from signal metadata
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<NudgePriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
}

impl NudgeTemplate {
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
            title: None,
            priority: None,
            action_url: None,
        }
    }
}

/// Templates may be written as a bare string or as a full record
#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateEntry {
    Bare(String),
    Full(NudgeTemplate),
}

/// Serialization format of a rule document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    Yaml,
    Json,
}

impl RuleFormat {
    /// Pick the format from a file extension; anything but `.json` is YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => RuleFormat::Json,
            _ => RuleFormat::Yaml,
        }
    }
}

/// Result of a strict load: the usable configuration plus every dropped entry or ignored key
#[derive(Debug)]
pub struct RuleLoad {
    pub config: RuleConfig,
    pub rejected: Vec<SignalError>,
}

/// Versioned scoring parameters and nudge templates
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleConfig {
    /// Document version; 0 for the empty fallback configuration
    pub version: u32,
    rules: BTreeMap<SignalType, SignalRule>,
    nudges: BTreeMap<SignalType, NudgeTemplate>,
}

impl RuleConfig {
    /// Load rules from `path`, falling back to an empty configuration on failure
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(load) => {
                for rejected in &load.rejected {
                    tracing::warn!(path = %path.display(), error = %rejected, "ignoring malformed rule entry");
                }
                tracing::debug!(
                    path = %path.display(),
                    version = load.config.version,
                    rules = load.config.rules.len(),
                    templates = load.config.nudges.len(),
                    "loaded signal rules"
                );
                load.config
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to load signal rules, using defaults");
                Self::default()
            }
        }
    }

    /// Load rules from `path`, failing on unreadable or unparseable documents
    pub fn try_load(path: &Path) -> Result<RuleLoad, SignalError> {
        let content = fs::read_to_string(path).map_err(|source| SignalError::RuleFileRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, RuleFormat::from_path(path)).map_err(|e| match e {
            SignalError::RuleFileParse { message, .. } => SignalError::RuleFileParse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parse a rule document
    pub fn parse(content: &str, format: RuleFormat) -> Result<RuleLoad, SignalError> {
        let parse_error = |message: String| SignalError::RuleFileParse {
            path: "<string>".to_string(),
            message,
        };

        let document: Value = match format {
            RuleFormat::Yaml => {
                serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))?
            }
            RuleFormat::Json => {
                serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))?
            }
        };

        let entries = match document {
            Value::Object(entries) => entries,
            // An empty YAML document parses as null
            Value::Null => serde_json::Map::new(),
            _ => return Err(parse_error("rule document must be a mapping".to_string())),
        };

        let mut config = RuleConfig {
            version: RULES_VERSION,
            ..Self::default()
        };
        let mut rejected = Vec::new();

        for (key, value) in entries {
            match key.as_str() {
                VERSION_KEY => match value.as_u64() {
                    Some(v) => {
                        config.version = u32::try_from(v).unwrap_or(u32::MAX);
                        if config.version > RULES_VERSION {
                            tracing::warn!(
                                version = config.version,
                                supported = RULES_VERSION,
                                "rule document is newer than this build"
                            );
                        }
                    }
                    None => rejected.push(SignalError::InvalidRule {
                        entry: VERSION_KEY.to_string(),
                        message: "version must be a non-negative integer".to_string(),
                    }),
                },
                NUDGES_KEY => config.parse_templates(value, &mut rejected),
                _ => match SignalType::from_key(&key) {
                    Some(signal_type) => match parse_rule(&key, value, &mut rejected) {
                        Ok(rule) => {
                            config.rules.insert(signal_type, rule);
                        }
                        Err(e) => rejected.push(e),
                    },
                    None => rejected.push(SignalError::InvalidRule {
                        entry: key,
                        message: "unknown signal type".to_string(),
                    }),
                },
            }
        }

        Ok(RuleLoad { config, rejected })
    }

    /// Parse a YAML rule document, logging and dropping malformed entries
    #[cfg(test)]
    pub(crate) fn from_yaml_str(content: &str) -> Result<Self, SignalError> {
        let load = Self::parse(content, RuleFormat::Yaml)?;
        for rejected in &load.rejected {
            tracing::warn!(error = %rejected, "ignoring malformed rule entry");
        }
        Ok(load.config)
    }

    fn parse_templates(&mut self, value: Value, rejected: &mut Vec<SignalError>) {
        let entries = match value {
            Value::Object(entries) => entries,
            _ => {
                rejected.push(SignalError::InvalidRule {
                    entry: NUDGES_KEY.to_string(),
                    message: "nudges must be a mapping of signal type to template".to_string(),
                });
                return;
            }
        };

        for (key, value) in entries {
            let entry = format!("{}.{}", NUDGES_KEY, key);
            let Some(signal_type) = SignalType::from_key(&key) else {
                rejected.push(SignalError::InvalidRule {
                    entry,
                    message: "unknown signal type".to_string(),
                });
                continue;
            };

            match parse_template(&entry, value) {
                Ok(template) => {
                    self.nudges.insert(signal_type, template);
                }
                Err(e) => rejected.push(e),
            }
        }
    }

    /// Add or replace a rule entry
    pub fn with_rule(mut self, signal_type: SignalType, rule: SignalRule) -> Self {
        self.rules.insert(signal_type, rule);
        self
    }

    /// Add or replace a nudge template
    pub fn with_template(mut self, signal_type: SignalType, template: NudgeTemplate) -> Self {
        self.nudges.insert(signal_type, template);
        self
    }

    /// Resolved parameters for `signal_type`
    pub fn params(&self, signal_type: SignalType) -> RuleParams {
        self.rules
            .get(&signal_type)
            .map(|rule| rule.resolve(signal_type))
            .unwrap_or_else(|| RuleParams::defaults(signal_type))
    }

    /// The rule entry as loaded, if the document had one
    pub fn rule(&self, signal_type: SignalType) -> Option<&SignalRule> {
        self.rules.get(&signal_type)
    }

    pub fn template(&self, signal_type: SignalType) -> Option<&NudgeTemplate> {
        self.nudges.get(&signal_type)
    }

    /// Whether neither rules nor templates were loaded
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.nudges.is_empty()
    }
}

/// Parse one rule entry. Unknown keys are reported and ignored; the rest of the
/// entry still applies.
fn parse_rule(
    entry: &str,
    value: Value,
    rejected: &mut Vec<SignalError>,
) -> Result<SignalRule, SignalError> {
    let value = match value {
        Value::Object(mut fields) => {
            let unknown: Vec<String> = fields
                .keys()
                .filter(|key| !RULE_KEYS.contains(&key.as_str()))
                .cloned()
                .collect();
            for key in unknown {
                fields.remove(&key);
                rejected.push(SignalError::InvalidRule {
                    entry: format!("{}.{}", entry, key),
                    message: "unknown rule key, ignored".to_string(),
                });
            }
            Value::Object(fields)
        }
        other => other,
    };

    let rule: SignalRule =
        serde_json::from_value(value).map_err(|e| SignalError::InvalidRule {
            entry: entry.to_string(),
            message: e.to_string(),
        })?;
    rule.validate(entry)?;
    Ok(rule)
}

fn parse_template(entry: &str, value: Value) -> Result<NudgeTemplate, SignalError> {
    let template = match serde_json::from_value::<TemplateEntry>(value) {
        Ok(TemplateEntry::Bare(template)) => NudgeTemplate::new(&template),
        Ok(TemplateEntry::Full(template)) => template,
        Err(e) => {
            return Err(SignalError::InvalidRule {
                entry: entry.to_string(),
                message: e.to_string(),
            })
        }
    };

    if template.template.trim().is_empty() {
        return Err(SignalError::InvalidRule {
            entry: entry.to_string(),
            message: "template is empty".to_string(),
        });
    }
    validate_template(&template.template).map_err(|e| SignalError::InvalidRule {
        entry: entry.to_string(),
        message: e.to_string(),
    })?;

    Ok(template)
}
