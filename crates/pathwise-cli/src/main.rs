mod config;
mod telemetry;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use config::{OutputFormat, Settings};
use pathwise_core::decision::evaluate_decision_point;
use pathwise_core::{
    can_progress, check_interactions, evaluate_transition, EngineError, ErrorClass, PatientData,
    Protocol, SessionRecord, StepId, StepRef, TherapyType, TreatmentInstance,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

/// Exit status when the progression gate blocks.
const BLOCKED_EXIT: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "pathwise",
    about = "Navigate treatment protocols and gate progression on patient safety",
    version
)]
struct Cli {
    /// YAML settings file
    #[arg(long, env = "PATHWISE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (overrides the settings file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output format (overrides the settings file)
    #[arg(long, value_enum, global = true)]
    output: Option<OutputFormat>,

    /// Check protocol documents against the JSON Schema before loading
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a protocol and report its structure
    Validate(ProtocolArgs),
    /// Evaluate one decision point against patient data
    Decide(DecideArgs),
    /// Show the current step and where the patient goes next
    Next(NextArgs),
    /// Gate entry into a step: safety rules plus medication interactions
    Check(CheckArgs),
    /// List medication interactions for a therapy
    Interactions(InteractionArgs),
}

#[derive(Args, Debug)]
struct ProtocolArgs {
    /// Protocol document (YAML or JSON)
    protocol: PathBuf,
}

#[derive(Args, Debug)]
struct DecideArgs {
    protocol: PathBuf,
    /// Sequence order of the decision point
    #[arg(long)]
    step: u32,
    /// Patient data document (YAML or JSON)
    #[arg(long)]
    patient: PathBuf,
}

#[derive(Args, Debug)]
struct NextArgs {
    protocol: PathBuf,
    /// Completed step ids, comma separated
    #[arg(long, value_delimiter = ',')]
    completed: Vec<u64>,
    /// Session history document; completed sessions count as completed steps
    #[arg(long)]
    sessions: Option<PathBuf>,
    #[arg(long)]
    patient: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    protocol: PathBuf,
    /// Sequence order of the step to enter
    #[arg(long)]
    step: u32,
    #[arg(long)]
    patient: PathBuf,
    /// Therapy for the interaction check (defaults to the protocol's)
    #[arg(long, value_parser = parse_therapy)]
    therapy: Option<TherapyType>,
}

#[derive(Args, Debug)]
struct InteractionArgs {
    #[arg(long)]
    patient: PathBuf,
    /// Therapy type, e.g. psilocybin or stem_cell (defaults to the settings file)
    #[arg(long, value_parser = parse_therapy)]
    therapy: Option<TherapyType>,
}

/// Wrapper around every printed result.
#[derive(Debug, Serialize)]
struct Envelope<'a, T: Serialize> {
    command: &'a str,
    generated_at: DateTime<Utc>,
    result: T,
}

#[derive(Debug, Serialize)]
struct ProtocolSummary {
    id: u64,
    name: String,
    version: String,
    therapy_type: TherapyType,
    steps: Vec<StepRef>,
    decision_points: usize,
    safety_rules: usize,
    unbranched_outcomes: Vec<UnbranchedOutcome>,
}

#[derive(Debug, Serialize)]
struct UnbranchedOutcome {
    step: StepId,
    outcome: String,
}

#[derive(Debug, Serialize)]
struct DecisionResult {
    step: StepRef,
    outcome: String,
    next_step_order: Option<u32>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?.with_overrides(
        cli.log_level.clone(),
        cli.output,
        cli.strict,
    );
    telemetry::init(&settings.log_level)?;

    run(cli.command, &settings)
}

fn run(command: Command, settings: &Settings) -> Result<ExitCode> {
    match command {
        Command::Validate(args) => {
            let protocol = load_protocol(&args.protocol, settings)?;
            emit(settings.output, "validate", &summarize(&protocol))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Decide(args) => {
            let protocol = load_protocol(&args.protocol, settings)?;
            let patient: PatientData = load_document(&args.patient)?;
            let step = protocol
                .step_at(args.step)
                .ok_or_else(|| engine_error(EngineError::NoStepAtSequence { order: args.step }))?;
            let outcome = evaluate_decision_point(step, &patient).map_err(engine_error)?;

            let result = DecisionResult {
                step: step.into(),
                outcome: outcome.to_string(),
                next_step_order: step.branch_for(outcome).map(|b| b.next_step_order),
            };
            emit(settings.output, "decide", &result)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Next(args) => {
            let protocol = load_protocol(&args.protocol, settings)?;
            let mut instance = match &args.sessions {
                Some(path) => {
                    let sessions: Vec<SessionRecord> = load_document(path)?;
                    TreatmentInstance::from_sessions(protocol.info.id, &sessions)
                }
                None => TreatmentInstance::new(protocol.info.id),
            };
            instance.completed.extend(args.completed.iter().copied().map(StepId));

            let patient: Option<PatientData> =
                args.patient.as_deref().map(load_document).transpose()?;
            let transition =
                evaluate_transition(&protocol, &instance, patient.as_ref()).map_err(engine_error)?;

            let blocked = transition
                .gate
                .as_ref()
                .is_some_and(|gate| !gate.can_progress);
            emit(settings.output, "next", &transition)?;
            Ok(exit_for(blocked))
        }
        Command::Check(args) => {
            let protocol = load_protocol(&args.protocol, settings)?;
            let patient: PatientData = load_document(&args.patient)?;
            let step = protocol
                .step_at(args.step)
                .ok_or_else(|| engine_error(EngineError::NoStepAtSequence { order: args.step }))?;
            let therapy = args.therapy.unwrap_or(protocol.info.therapy_type);

            let check = can_progress(step, &patient, Some(therapy));
            info!(
                step = %step.id,
                can_progress = check.can_progress,
                risk_score = check.risk_score,
                "Progression checked"
            );
            emit(settings.output, "check", &check)?;
            Ok(exit_for(!check.can_progress))
        }
        Command::Interactions(args) => {
            let therapy = args
                .therapy
                .or(settings.default_therapy)
                .ok_or_else(|| anyhow!("no therapy given and no default_therapy configured"))?;
            let patient: PatientData = load_document(&args.patient)?;
            let interactions = check_interactions(&patient.medications(), therapy);
            emit(settings.output, "interactions", &interactions)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_protocol(path: &Path, settings: &Settings) -> Result<Protocol> {
    let protocol = Protocol::from_file(path, settings.validate_schema)
        .with_context(|| format!("failed to load protocol {}", path.display()))?;
    info!(
        protocol = %protocol.info.name,
        version = %protocol.info.version,
        steps = protocol.steps().len(),
        "Protocol loaded"
    );
    Ok(protocol)
}

/// Read a YAML or JSON document, choosing the parser by extension.
fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&contents).with_context(|| format!("invalid JSON in {}", path.display()))
    } else {
        serde_yaml::from_str(&contents).with_context(|| format!("invalid YAML in {}", path.display()))
    }
}

fn summarize(protocol: &Protocol) -> ProtocolSummary {
    let steps = protocol.steps();
    ProtocolSummary {
        id: protocol.info.id,
        name: protocol.info.name.clone(),
        version: protocol.info.version.clone(),
        therapy_type: protocol.info.therapy_type,
        steps: steps.iter().map(StepRef::from).collect(),
        decision_points: steps.iter().filter(|s| s.is_decision_point()).count(),
        safety_rules: steps.iter().map(|s| s.safety_rules.len()).sum(),
        unbranched_outcomes: protocol
            .unbranched_outcomes()
            .into_iter()
            .map(|(step, outcome)| UnbranchedOutcome { step, outcome })
            .collect(),
    }
}

fn emit<T: Serialize>(format: OutputFormat, command: &str, result: &T) -> Result<()> {
    let envelope = Envelope {
        command,
        generated_at: Utc::now(),
        result,
    };
    println!("{}", render(format, &envelope)?);
    Ok(())
}

fn render<T: Serialize>(format: OutputFormat, value: &T) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    })
}

fn exit_for(blocked: bool) -> ExitCode {
    if blocked {
        ExitCode::from(BLOCKED_EXIT)
    } else {
        ExitCode::SUCCESS
    }
}

/// Prefix engine failures with who has to fix them.
fn engine_error(err: EngineError) -> anyhow::Error {
    let owner = match err.class() {
        ErrorClass::Authoring => "protocol authoring defect",
        ErrorClass::DataCompleteness => "incomplete patient data",
        ErrorClass::DomainBoundary => "value outside protocol coverage",
    };
    anyhow!(err).context(owner)
}

fn parse_therapy(value: &str) -> Result<TherapyType, String> {
    TherapyType::parse(value).ok_or_else(|| format!("unknown therapy type '{}'", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_next_command() {
        let cli = Cli::try_parse_from([
            "pathwise",
            "next",
            "protocol.yaml",
            "--completed",
            "1,2,3",
            "--output",
            "yaml",
        ])
        .unwrap();
        assert_eq!(cli.output, Some(OutputFormat::Yaml));
        match cli.command {
            Command::Next(args) => {
                assert_eq!(args.completed, vec![1, 2, 3]);
                assert!(args.patient.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_therapy_flag() {
        let cli = Cli::try_parse_from([
            "pathwise",
            "interactions",
            "--patient",
            "patient.json",
            "--therapy",
            "Stem-Cell",
        ])
        .unwrap();
        match cli.command {
            Command::Interactions(args) => assert_eq!(args.therapy, Some(TherapyType::StemCell)),
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Cli::try_parse_from([
            "pathwise",
            "interactions",
            "--patient",
            "patient.json",
            "--therapy",
            "homeopathy",
        ])
        .is_err());
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = Envelope {
            command: "interactions",
            generated_at: Utc::now(),
            result: json!([]),
        };
        let rendered: serde_json::Value =
            serde_json::from_str(&render(OutputFormat::Json, &envelope).unwrap()).unwrap();
        assert_eq!(rendered["command"], "interactions");
        assert!(rendered["generated_at"].is_string());
        assert_eq!(rendered["result"], json!([]));
    }

    #[test]
    fn test_engine_error_context() {
        let err = engine_error(EngineError::NoStepAtSequence { order: 7 });
        assert_eq!(err.to_string(), "protocol authoring defect");
        assert_eq!(err.root_cause().to_string(), "No step at sequence order 7");
    }

    #[test]
    fn test_summary_counts() {
        let protocol = Protocol::from_yaml(
            r#"
id: 2
name: "Testosterone Replacement"
version: "1.0"
therapy_type: testosterone
steps:
  - id: 1
    sequence_order: 1
    step_type: screening
    title: "Baseline Labs"
    safety_rules:
      - condition: { type: lab_value, name: hematocrit, operator: greater_than, threshold: 52 }
        severity: warning
  - id: 2
    sequence_order: 2
    step_type: dosing
    title: "Initiation"
"#,
        )
        .unwrap();
        let summary = summarize(&protocol);
        assert_eq!(summary.steps.len(), 2);
        assert_eq!(summary.decision_points, 0);
        assert_eq!(summary.safety_rules, 1);
        assert!(summary.unbranched_outcomes.is_empty());
    }
}
