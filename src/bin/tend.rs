//! Tend CLI - Command-line interface for Tend Signals
//!
//! Commands:
//! - derive: Derive signals and nudges from metadata batches
//! - aggregate: Aggregate a raw provider listing into a metadata snapshot
//! - check-rules: Validate a rule file and report resolved parameters
//! - schema: Print batch and outcome schema information

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use tend_signals::pipeline::{parse_batch, DerivationBatch, SignalProcessor};
use tend_signals::rules::{RuleConfig, RULES_VERSION};
use tend_signals::sources::adapter_for;
use tend_signals::{MetadataSource, SignalError, SignalType, PRODUCER_NAME, TEND_VERSION};

/// Tend - Rule-driven wellbeing signals from workplace metadata
#[derive(Parser)]
#[command(name = "tend")]
#[command(author = "Tend")]
#[command(version = TEND_VERSION)]
#[command(about = "Derive wellbeing signals and nudges from workplace metadata", long_about = None)]
struct Cli {
    /// Rule file (YAML, or JSON by extension); built-in defaults when absent
    #[arg(long, global = true, env = "TEND_RULES")]
    rules: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive signals and nudges from metadata batches
    Derive {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Aggregate a raw provider listing into a metadata snapshot
    Aggregate {
        /// Provider the listing came from
        #[arg(short, long, value_enum)]
        source: SourceArg,

        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Validate a rule file and report resolved parameters
    CheckRules {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one batch per line)
    Ndjson,
    /// JSON array of batches, or a single batch object
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one outcome per line)
    Ndjson,
    /// JSON array of outcomes
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SourceArg {
    /// Calendar event listing
    Calendar,
    /// Chat workspace activity
    Chat,
    /// Mailbox message listing
    Email,
}

impl From<SourceArg> for MetadataSource {
    fn from(source: SourceArg) -> Self {
        match source {
            SourceArg::Calendar => MetadataSource::Calendar,
            SourceArg::Chat => MetadataSource::Chat,
            SourceArg::Email => MetadataSource::Email,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (derivation batch)
    Input,
    /// Output schema (derivation outcome)
    Output,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("TEND_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> Result<(), TendCliError> {
    let rules = cli.rules.as_deref();

    match cli.command {
        Commands::Derive {
            input,
            output,
            input_format,
            output_format,
        } => cmd_derive(&input, &output, input_format, output_format, rules),

        Commands::Aggregate { source, input } => cmd_aggregate(source.into(), &input),

        Commands::CheckRules { json } => cmd_check_rules(rules, json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

fn cmd_derive(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    rules: Option<&Path>,
) -> Result<(), TendCliError> {
    let input_data = read_input(input)?;

    let batches = match input_format {
        InputFormat::Ndjson => parse_ndjson(&input_data)?,
        InputFormat::Json => parse_array(&input_data)?,
    };

    if batches.is_empty() {
        return Err(TendCliError::NoBatches);
    }

    let processor = match rules {
        Some(path) => SignalProcessor::from_rules_path(path),
        None => SignalProcessor::default(),
    };

    let outcomes = processor.derive_many(&batches);
    tracing::info!(
        batches = batches.len(),
        signals = outcomes.iter().map(|o| o.signals.len()).sum::<usize>(),
        nudges = outcomes.iter().map(|o| o.nudges.len()).sum::<usize>(),
        "derivation complete"
    );

    let output_data = format_output(&outcomes, &output_format)?;
    write_output(output, &output_data)
}

fn cmd_aggregate(source: MetadataSource, input: &Path) -> Result<(), TendCliError> {
    let input_data = read_input(input)?;
    let snapshot = adapter_for(source).to_snapshot(&input_data)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn cmd_check_rules(rules: Option<&Path>, json: bool) -> Result<(), TendCliError> {
    let mut checks: Vec<RuleCheck> = Vec::new();

    checks.push(RuleCheck {
        name: "rules_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Supported rule document version {}", RULES_VERSION),
    });

    let config = match rules {
        None => {
            checks.push(RuleCheck {
                name: "rule_file".to_string(),
                status: CheckStatus::Warning,
                message: "No rule file given (--rules or TEND_RULES); using built-in defaults"
                    .to_string(),
            });
            RuleConfig::default()
        }
        Some(path) => match RuleConfig::try_load(path) {
            Ok(load) => {
                let status = if load.config.version > RULES_VERSION {
                    CheckStatus::Warning
                } else {
                    CheckStatus::Ok
                };
                checks.push(RuleCheck {
                    name: "rule_file".to_string(),
                    status,
                    message: format!(
                        "{} parsed (version {})",
                        path.display(),
                        load.config.version
                    ),
                });

                for rejected in &load.rejected {
                    checks.push(RuleCheck {
                        name: "rule_entry".to_string(),
                        status: CheckStatus::Warning,
                        message: format!("Rejected: {}", rejected),
                    });
                }
                load.config
            }
            Err(e) => {
                checks.push(RuleCheck {
                    name: "rule_file".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                });
                RuleConfig::default()
            }
        },
    };

    for signal_type in SignalType::ALL {
        let params = config.params(signal_type);
        let origin = if config.rule(signal_type).is_some() {
            "configured"
        } else {
            "default"
        };
        let template = if config.template(signal_type).is_some() {
            "nudge template set"
        } else {
            "no nudge template"
        };
        checks.push(RuleCheck {
            name: signal_type.as_str().to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "{}: threshold={}, secondary_threshold={}, weights=({}, {}); {}",
                origin,
                params.threshold,
                params.secondary_threshold,
                params.weights.0,
                params.weights.1,
                template
            ),
        });
    }

    // Check stdin is available (for `derive --input -`)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        RuleCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        RuleCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (ready for derive --input -)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = RuleReport {
        producer: PRODUCER_NAME.to_string(),
        version: TEND_VERSION.to_string(),
        rules_path: rules.map(|p| p.display().to_string()),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Tend Rule Check");
        println!("===============");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!(
            "Rules:    {}",
            report.rules_path.as_deref().unwrap_or("(built-in defaults)")
        );
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(TendCliError::ChecksFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), TendCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input Schema: derivation batch");
                println!();
                println!("One batch per user and processing cycle:");
                println!();
                println!("- user: {{ user_id (uuid), role (employee|manager|admin), team_id }}");
                println!("- calendar: {{ total_meetings, total_duration_hours, after_hours_meetings, average_duration_hours }}");
                println!("- chat (alias slack): {{ channel_count, reaction_count, last_active }}");
                println!("- email (alias gmail): {{ total_messages, messages_analyzed, thread_count }}");
                println!();
                println!("Every snapshot is optional; null or empty snapshots count as absent.");
                println!("last_active accepts an ISO-8601 string or Unix seconds.");
                println!();
                println!("Use 'tend aggregate' to build snapshots from raw provider listings.");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output Schema: derivation outcome");
                println!();
                println!("- user_id: User the outcome belongs to");
                println!("- signals: Array of signals containing:");
                println!("  - id, user_id, type, source, created_at");
                println!("  - severity, confidence: both in [0, 1]");
                println!("  - metadata: rule inputs and thresholds that produced the score");
                println!("- nudges: Array of nudges containing:");
                println!("  - id, user_id, signal_id, type, title, message, action_url");
                println!("  - priority (low|medium|high), metadata, is_read, created_at");
                println!();
                println!(
                    "Signal types: {}",
                    SignalType::ALL
                        .iter()
                        .map(|t| t.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
        }
    }

    Ok(())
}

// Helper functions

fn read_input(input: &Path) -> Result<String, TendCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), TendCliError> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn parse_ndjson(data: &str) -> Result<Vec<DerivationBatch>, TendCliError> {
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            parse_batch(line.trim()).map_err(|e| {
                TendCliError::ParseError(format!("line {}: {}", index + 1, e))
            })
        })
        .collect()
}

fn parse_array(data: &str) -> Result<Vec<DerivationBatch>, TendCliError> {
    let value: serde_json::Value = serde_json::from_str(data)?;
    match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)
            .map_err(|e| TendCliError::ParseError(format!("Failed to parse batches: {}", e))),
        _ => serde_json::from_value(value)
            .map(|batch| vec![batch])
            .map_err(|e| TendCliError::ParseError(format!("Failed to parse batch: {}", e))),
    }
}

fn format_output<T: Serialize>(outcomes: &[T], format: &OutputFormat) -> Result<String, TendCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for outcome in outcomes {
                lines.push(serde_json::to_string(outcome)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(outcomes)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(outcomes)?),
    }
}

fn get_input_json_schema() -> String {
    let counter = serde_json::json!({ "type": ["number", "null"], "minimum": 0 });
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "tend.derivation_batch",
        "description": "One user's metadata snapshots for a processing cycle",
        "type": "object",
        "required": ["user"],
        "properties": {
            "user": {
                "type": "object",
                "required": ["user_id"],
                "properties": {
                    "user_id": { "type": "string", "format": "uuid" },
                    "role": { "type": "string", "enum": ["employee", "manager", "admin"] },
                    "team_id": { "type": ["string", "null"], "format": "uuid" }
                }
            },
            "calendar": {
                "type": ["object", "null"],
                "properties": {
                    "total_meetings": counter,
                    "total_duration_hours": counter,
                    "after_hours_meetings": counter,
                    "average_duration_hours": counter
                }
            },
            "chat": {
                "type": ["object", "null"],
                "properties": {
                    "channel_count": counter,
                    "reaction_count": counter,
                    "last_active": { "type": ["string", "number", "null"] }
                }
            },
            "email": {
                "type": ["object", "null"],
                "properties": {
                    "total_messages": counter,
                    "messages_analyzed": counter,
                    "thread_count": counter
                }
            }
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    let unit = serde_json::json!({ "type": "number", "minimum": 0, "maximum": 1 });
    let signal_types: Vec<&str> = SignalType::ALL.iter().map(|t| t.as_str()).collect();
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "tend.derivation_outcome",
        "description": "Signals and nudges derived for one user",
        "type": "object",
        "required": ["user_id", "signals", "nudges"],
        "properties": {
            "user_id": { "type": "string", "format": "uuid" },
            "signals": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "user_id", "type", "source", "severity", "confidence", "metadata", "created_at"],
                    "properties": {
                        "id": { "type": "string", "format": "uuid" },
                        "user_id": { "type": "string", "format": "uuid" },
                        "type": { "type": "string", "enum": signal_types },
                        "source": { "type": "string" },
                        "severity": unit,
                        "confidence": unit,
                        "metadata": { "type": "object" },
                        "created_at": { "type": "string", "format": "date-time" }
                    }
                }
            },
            "nudges": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "user_id", "type", "title", "message", "priority", "is_read", "created_at"],
                    "properties": {
                        "id": { "type": "string", "format": "uuid" },
                        "user_id": { "type": "string", "format": "uuid" },
                        "signal_id": { "type": ["string", "null"], "format": "uuid" },
                        "type": { "type": "string" },
                        "title": { "type": "string" },
                        "message": { "type": "string" },
                        "action_url": { "type": "string" },
                        "priority": { "type": "string", "enum": ["low", "medium", "high"] },
                        "metadata": { "type": "object" },
                        "is_read": { "type": "boolean" },
                        "created_at": { "type": "string", "format": "date-time" }
                    }
                }
            }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum TendCliError {
    Io(io::Error),
    Signal(SignalError),
    Json(serde_json::Error),
    NoBatches,
    ChecksFailed,
    ParseError(String),
}

impl From<io::Error> for TendCliError {
    fn from(e: io::Error) -> Self {
        TendCliError::Io(e)
    }
}

impl From<SignalError> for TendCliError {
    fn from(e: SignalError) -> Self {
        TendCliError::Signal(e)
    }
}

impl From<serde_json::Error> for TendCliError {
    fn from(e: serde_json::Error) -> Self {
        TendCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<TendCliError> for CliError {
    fn from(e: TendCliError) -> Self {
        match e {
            TendCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            TendCliError::Signal(e) => {
                let (code, hint) = match &e {
                    SignalError::PayloadParse(_)
                    | SignalError::TimestampParse { .. }
                    | SignalError::InvalidField { .. } => (
                        "PAYLOAD_ERROR",
                        "Ensure the listing matches the selected --source",
                    ),
                    SignalError::InvalidBatch(_) => {
                        ("INVALID_BATCH", "Run 'tend schema input' for the batch shape")
                    }
                    _ => ("SIGNAL_ERROR", "Run 'tend check-rules' for details"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            TendCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            TendCliError::NoBatches => CliError {
                code: "NO_BATCHES".to_string(),
                message: "No batches found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            TendCliError::ChecksFailed => CliError {
                code: "CHECKS_FAILED".to_string(),
                message: "One or more rule checks failed".to_string(),
                hint: Some("Review the rule check report for details".to_string()),
            },
            TendCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct RuleReport {
    producer: String,
    version: String,
    rules_path: Option<String>,
    checks: Vec<RuleCheck>,
}

#[derive(Serialize)]
struct RuleCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
