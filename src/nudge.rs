//! Nudge generation
//!
//! Turns a high-severity signal into a user-facing message by expanding the
//! template configured for its type with the signal's metadata.
//!
//! Templates use `{field}` placeholders and `{{` / `}}` for literal braces.
//! Numbers take an optional `[,][.N][f|d|%]` format spec: thousands grouping,
//! precision, then fixed, integer or percent presentation, as in
//! `{total_duration_hours:.1f}`, `{total_messages:,}` or `{share:.0%}`.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::SignalError;
use crate::rules::{NudgeTemplate, RuleConfig};
use crate::types::{Nudge, NudgePriority, Signal, SignalMetadata, SignalType};

/// Signals must score strictly above this to produce a nudge
pub const NUDGE_SEVERITY_THRESHOLD: f64 = 0.7;

/// Severity at which an unconfigured priority becomes `high`
const HIGH_PRIORITY_SEVERITY: f64 = 0.9;

/// One parsed piece of a template
#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Literal(&'a str),
    Brace(char),
    Field { name: &'a str, format: FieldFormat },
}

/// Parsed `[,][.N][f|d|%]` format spec
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct FieldFormat {
    grouping: bool,
    precision: Option<usize>,
    kind: FormatKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
enum FormatKind {
    #[default]
    General,
    Fixed,
    Integer,
    Percent,
}

/// Precision used by `f` and `%` when none is given
const DEFAULT_PRECISION: usize = 6;

/// Generate a nudge for `signal` if it is severe enough and a template exists.
///
/// Template failures are logged and yield `None`.
pub fn generate_nudge(rules: &RuleConfig, signal: &Signal) -> Option<Nudge> {
    let template = rules.template(signal.signal_type)?;

    if signal.severity <= NUDGE_SEVERITY_THRESHOLD {
        tracing::debug!(
            signal_type = %signal.signal_type,
            severity = signal.severity,
            "severity at or below nudge threshold"
        );
        return None;
    }

    match build_nudge(signal, template) {
        Ok(nudge) => {
            tracing::debug!(signal_type = %signal.signal_type, nudge_id = %nudge.id, "generated nudge");
            Some(nudge)
        }
        Err(e) => {
            tracing::error!(
                signal_type = %signal.signal_type,
                signal_id = %signal.id,
                error = %e,
                "error generating nudge"
            );
            None
        }
    }
}

/// Build a nudge for `signal` from `template`, without any severity gate
pub fn build_nudge(signal: &Signal, template: &NudgeTemplate) -> Result<Nudge, SignalError> {
    let message = render_template(&template.template, &signal.metadata)?;

    Ok(Nudge {
        id: Uuid::new_v4(),
        user_id: signal.user_id,
        signal_id: Some(signal.id),
        nudge_type: signal.signal_type.as_str().to_string(),
        title: template
            .title
            .clone()
            .unwrap_or_else(|| default_title(signal.signal_type).to_string()),
        message,
        action_url: template.action_url.clone(),
        priority: template
            .priority
            .unwrap_or_else(|| priority_for_severity(signal.severity)),
        metadata: signal.metadata.clone(),
        is_read: false,
        created_at: Utc::now(),
    })
}

fn default_title(signal_type: SignalType) -> &'static str {
    match signal_type {
        SignalType::MeetingOverload => "Your meeting load is high",
        SignalType::AfterHoursActivity => "You've been working late",
        SignalType::SlackActivity => "Chat activity is running high",
        SignalType::EmailPattern => "Your inbox is busy",
    }
}

fn priority_for_severity(severity: f64) -> NudgePriority {
    if severity >= HIGH_PRIORITY_SEVERITY {
        NudgePriority::High
    } else {
        NudgePriority::Medium
    }
}

/// Check template syntax without rendering
pub fn validate_template(template: &str) -> Result<(), SignalError> {
    parse_template(template).map(|_| ())
}

/// Expand `{field}` placeholders with values from `metadata`
pub fn render_template(template: &str, metadata: &SignalMetadata) -> Result<String, SignalError> {
    let mut out = String::with_capacity(template.len());

    for segment in parse_template(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Brace(c) => out.push(c),
            Segment::Field { name, format } => {
                let value = metadata
                    .get(name)
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| SignalError::TemplateField(name.to_string()))?;
                out.push_str(&format_value(name, value, format)?);
            }
        }
    }

    Ok(out)
}

fn format_value(name: &str, value: &Value, format: FieldFormat) -> Result<String, SignalError> {
    let n = match value {
        Value::Number(n) => n,
        Value::String(s) => return Ok(s.clone()),
        other => return Ok(other.to_string()),
    };
    let f = n.as_f64().unwrap_or(f64::NAN);

    let formatted = match (format.kind, format.precision) {
        (FormatKind::General, Some(p)) => format!("{:.*}", p, f),
        (FormatKind::General, None) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.to_string(),
            (_, Some(u)) => u.to_string(),
            _ => f.to_string(),
        },
        (FormatKind::Fixed, p) => format!("{:.*}", p.unwrap_or(DEFAULT_PRECISION), f),
        (FormatKind::Percent, p) => {
            format!("{:.*}%", p.unwrap_or(DEFAULT_PRECISION), f * 100.0)
        }
        (FormatKind::Integer, _) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.to_string(),
            (_, Some(u)) => u.to_string(),
            _ => {
                return Err(SignalError::TemplateValue {
                    field: name.to_string(),
                    message: format!("'d' needs an integer, got {}", n),
                })
            }
        },
    };

    Ok(if format.grouping {
        group_thousands(&formatted)
    } else {
        formatted
    })
}

/// Insert `,` every three digits of the integer part
fn group_thousands(formatted: &str) -> String {
    let (sign, unsigned) = match formatted.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", formatted),
    };
    let int_end = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    let (int_part, tail) = unsigned.split_at(int_end);

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    format!("{}{}{}", sign, grouped, tail)
}

fn parse_template(template: &str) -> Result<Vec<Segment<'_>>, SignalError> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        if pos > 0 {
            segments.push(Segment::Literal(&rest[..pos]));
        }
        let brace = rest.as_bytes()[pos];
        let after = &rest[pos + 1..];

        if brace == b'}' {
            if let Some(tail) = after.strip_prefix('}') {
                segments.push(Segment::Brace('}'));
                rest = tail;
                continue;
            }
            return Err(SignalError::TemplateSyntax(format!(
                "single '}}' at byte {}",
                template.len() - rest.len() + pos
            )));
        }

        if let Some(tail) = after.strip_prefix('{') {
            segments.push(Segment::Brace('{'));
            rest = tail;
            continue;
        }

        let close = after
            .find('}')
            .ok_or_else(|| SignalError::TemplateSyntax("unclosed '{'".to_string()))?;
        segments.push(parse_field(&after[..close])?);
        rest = &after[close + 1..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }

    Ok(segments)
}

fn parse_field(body: &str) -> Result<Segment<'_>, SignalError> {
    let (name, spec) = match body.split_once(':') {
        Some((name, spec)) => (name, Some(spec)),
        None => (body, None),
    };

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SignalError::TemplateSyntax(format!(
            "invalid field name '{}'",
            body
        )));
    }

    let format = match spec {
        None => FieldFormat::default(),
        Some(spec) => parse_format(name, spec)?,
    };

    Ok(Segment::Field { name, format })
}

fn parse_format(name: &str, spec: &str) -> Result<FieldFormat, SignalError> {
    let unsupported = || {
        SignalError::TemplateSyntax(format!(
            "unsupported format spec '{}' for field '{}' (expected [,][.N][f|d|%])",
            spec, name
        ))
    };

    let mut rest = spec;
    let grouping = match rest.strip_prefix(',') {
        Some(tail) => {
            rest = tail;
            true
        }
        None => false,
    };

    let precision = match rest.strip_prefix('.') {
        Some(tail) => {
            let digits = tail
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(tail.len());
            if digits == 0 {
                return Err(unsupported());
            }
            let precision = tail[..digits].parse::<usize>().map_err(|_| unsupported())?;
            rest = &tail[digits..];
            Some(precision)
        }
        None => None,
    };

    let kind = match rest {
        "" => FormatKind::General,
        "f" => FormatKind::Fixed,
        "d" if precision.is_none() => FormatKind::Integer,
        "%" => FormatKind::Percent,
        _ => return Err(unsupported()),
    };

    Ok(FieldFormat {
        grouping,
        precision,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetadataSource;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn metadata() -> SignalMetadata {
        let mut metadata = SignalMetadata::new();
        metadata.insert("total_meetings".to_string(), json!(15));
        metadata.insert("total_duration_hours".to_string(), json!(25.26));
        metadata.insert("late_night_chat".to_string(), json!(true));
        metadata.insert("source_name".to_string(), json!("calendar"));
        metadata
    }

    fn signal_with_severity(severity: f64) -> Signal {
        Signal::new(
            Uuid::new_v4(),
            SignalType::MeetingOverload,
            &[MetadataSource::Calendar],
            severity,
            1.0,
            metadata(),
        )
    }

    fn rules_with_meeting_template() -> RuleConfig {
        RuleConfig::default().with_template(
            SignalType::MeetingOverload,
            NudgeTemplate::new("You had {total_meetings} meetings this week."),
        )
    }

    #[test]
    fn test_render_substitutes_fields() {
        let rendered = render_template(
            "{total_meetings} meetings, {total_duration_hours:.1f}h from {source_name} ({late_night_chat})",
            &metadata(),
        )
        .unwrap();
        assert_eq!(rendered, "15 meetings, 25.3h from calendar (true)");
    }

    #[test]
    fn test_render_escaped_braces() {
        let rendered = render_template("{{literal}} {total_meetings}}}", &metadata()).unwrap();
        assert_eq!(rendered, "{literal} 15}");
    }

    #[test]
    fn test_render_missing_field() {
        let err = render_template("{after_hours_meetings} late meetings", &metadata()).unwrap_err();
        assert!(matches!(err, SignalError::TemplateField(ref f) if f == "after_hours_meetings"));
    }

    #[test]
    fn test_template_syntax_errors() {
        for bad in ["{unclosed", "stray } brace", "{}", "{a.b}", "{x:>10}", "{x:.f}"] {
            assert!(
                matches!(validate_template(bad), Err(SignalError::TemplateSyntax(_))),
                "expected syntax error for {:?}",
                bad
            );
        }
        assert!(validate_template("plain text").is_ok());
    }

    #[test]
    fn test_render_number_format_specs() {
        let mut metadata = SignalMetadata::new();
        metadata.insert("total_messages".to_string(), json!(1234567));
        metadata.insert("total_duration_hours".to_string(), json!(1234.5));
        metadata.insert("thread_count".to_string(), json!(-4321));
        metadata.insert("share".to_string(), json!(0.25));
        metadata.insert("total_meetings".to_string(), json!(15));

        let rendered = render_template(
            "{total_messages:,} | {total_duration_hours:,.2f} | {thread_count:,d} | {share:.0%} | {total_meetings:d} | {total_meetings:.1f}",
            &metadata,
        )
        .unwrap();
        assert_eq!(rendered, "1,234,567 | 1,234.50 | -4,321 | 25% | 15 | 15.0");
    }

    #[test]
    fn test_integer_spec_rejects_fractional_value() {
        let err = render_template("{total_duration_hours:d}", &metadata()).unwrap_err();
        assert!(
            matches!(err, SignalError::TemplateValue { ref field, .. } if field == "total_duration_hours")
        );
    }

    #[test]
    fn test_unsupported_spec_is_named() {
        let err = validate_template("{total_messages:>10}").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'>10'"), "{}", message);
        assert!(message.contains("total_messages"), "{}", message);

        assert!(validate_template("{x:.2d}").is_err());
        assert!(validate_template("{x:}").is_ok());
    }

    #[test]
    fn test_nudge_generated_above_threshold() {
        let rules = rules_with_meeting_template();
        let signal = signal_with_severity(0.71);

        let nudge = generate_nudge(&rules, &signal).unwrap();
        assert_eq!(nudge.message, "You had 15 meetings this week.");
        assert_eq!(nudge.signal_id, Some(signal.id));
        assert_eq!(nudge.user_id, signal.user_id);
        assert_eq!(nudge.nudge_type, "meeting_overload");
        assert_eq!(nudge.title, "Your meeting load is high");
        assert_eq!(nudge.priority, NudgePriority::Medium);
        assert_eq!(nudge.metadata, signal.metadata);
        assert!(!nudge.is_read);
    }

    #[test]
    fn test_no_nudge_at_threshold() {
        let rules = rules_with_meeting_template();
        assert!(generate_nudge(&rules, &signal_with_severity(0.70)).is_none());
        assert!(generate_nudge(&rules, &signal_with_severity(0.2)).is_none());
    }

    #[test]
    fn test_no_nudge_without_template() {
        let signal = signal_with_severity(0.95);
        assert!(generate_nudge(&RuleConfig::default(), &signal).is_none());
    }

    #[test]
    fn test_missing_field_yields_no_nudge() {
        let rules = RuleConfig::default().with_template(
            SignalType::MeetingOverload,
            NudgeTemplate::new("{after_hours_meetings} meetings after hours"),
        );
        assert!(generate_nudge(&rules, &signal_with_severity(0.9)).is_none());
    }

    #[test]
    fn test_configured_title_priority_and_action() {
        let template = NudgeTemplate {
            template: "Block some focus time".to_string(),
            title: Some("Protect your focus".to_string()),
            priority: Some(NudgePriority::Low),
            action_url: Some("https://app.trytend.com.au/focus".to_string()),
        };
        let rules = RuleConfig::default().with_template(SignalType::MeetingOverload, template);

        let nudge = generate_nudge(&rules, &signal_with_severity(0.95)).unwrap();
        assert_eq!(nudge.title, "Protect your focus");
        assert_eq!(nudge.priority, NudgePriority::Low);
        assert_eq!(nudge.action_url.as_deref(), Some("https://app.trytend.com.au/focus"));
    }

    #[test]
    fn test_priority_from_severity() {
        let rules = rules_with_meeting_template();
        let nudge = generate_nudge(&rules, &signal_with_severity(0.92)).unwrap();
        assert_eq!(nudge.priority, NudgePriority::High);
    }
}
