// crates/deep-research-cli/src/main.rs
// ============================================================================
// Module: Deep Research CLI Entry Point
// Description: Thin operator shell over the orchestrator engine.
// Purpose: Map operator commands onto engine operations and emit one
//          envelope.
// Dependencies: clap, deep-research-{config, core, engine, resolver}, serde
// ============================================================================

//! ## Overview
//! The CLI is a thin shell: every command resolves to one engine operation
//! and emits exactly one machine-readable envelope on stdout in JSON mode
//! (incidental logs go to stderr), or a short human summary in text mode.
//! The process exit code is zero iff the envelope's `ok` is true.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use deep_research_config::ProcessEnv;
use deep_research_config::resolve_policy;
use deep_research_core::CodedError;
use deep_research_core::Driver;
use deep_research_core::Envelope;
use deep_research_core::EnvelopeContract;
use deep_research_core::EnvelopeHalt;
use deep_research_core::ErrorCode;
use deep_research_core::HaltArtifact;
use deep_research_core::QuerySpec;
use deep_research_core::RunId;
use deep_research_core::RunLayout;
use deep_research_core::RunPolicy;
use deep_research_core::Sensitivity;
use deep_research_core::Stage;
use deep_research_engine::AgentResultArgs;
use deep_research_engine::CitationLadder;
use deep_research_engine::CitationValidatorTool;
use deep_research_engine::FixtureDriver;
use deep_research_engine::InitArgs;
use deep_research_engine::PivotAnalyzerTool;
use deep_research_engine::ReplayTool;
use deep_research_engine::TaskDriver;
use deep_research_engine::ToolSet;
use deep_research_engine::Wave2PlannerTool;
use deep_research_engine::fixture_doc_for_rerun;
use deep_research_resolver::HttpFetcher;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum OutputMode {
    /// Human-readable summary.
    #[default]
    Text,
    /// Exactly one JSON envelope on stdout.
    Json,
}

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "deep-research", disable_help_subcommand = true)]
struct Cli {
    /// Output mode.
    #[arg(long, value_enum, default_value_t = OutputMode::Text, global = true)]
    output: OutputMode,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Driver selection for tick execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum DriverArg {
    /// Deterministic replay from recorded fixtures.
    Fixture,
    /// Prompt-out mode for operator-run agents.
    #[default]
    Task,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new run root.
    Init {
        /// Absolute run root directory to create.
        #[arg(long)]
        run_root: PathBuf,
        /// Run identifier (safe path segment).
        #[arg(long)]
        run_id: String,
        /// Research query text.
        #[arg(long)]
        query: String,
        /// Query sensitivity classification.
        #[arg(long, value_enum, default_value = "normal")]
        sensitivity: SensitivityArg,
        /// Seed default perspectives and the wave-1 plan.
        #[arg(long)]
        write_perspectives: bool,
    },
    /// Perform one tick of forward progress.
    Tick {
        /// Manifest path of the run.
        #[arg(long)]
        manifest: PathBuf,
        /// Execution driver.
        #[arg(long, value_enum, default_value = "task")]
        driver: DriverArg,
        /// Fixture document for the fixture driver.
        #[arg(long)]
        fixtures: Option<PathBuf>,
        /// Operator-supplied reason.
        #[arg(long, default_value = "operator tick")]
        reason: String,
    },
    /// Perform a bounded multi-tick run.
    Run {
        /// Manifest path of the run.
        #[arg(long)]
        manifest: PathBuf,
        /// Execution driver.
        #[arg(long, value_enum, default_value = "task")]
        driver: DriverArg,
        /// Fixture document for the fixture driver.
        #[arg(long)]
        fixtures: Option<PathBuf>,
        /// Maximum ticks before the run halts with TICK_CAP_EXCEEDED.
        #[arg(long, default_value_t = 32)]
        max_ticks: u64,
        /// Operator-supplied reason.
        #[arg(long, default_value = "operator run")]
        reason: String,
    },
    /// Explicitly advance the stage machine.
    StageAdvance {
        /// Manifest path of the run.
        #[arg(long)]
        manifest: PathBuf,
        /// Requested next stage (required when multiple edges exist).
        #[arg(long)]
        requested_next: Option<String>,
        /// Operator-supplied reason.
        #[arg(long, default_value = "operator stage-advance")]
        reason: String,
    },
    /// Merge drafted perspective candidates and promote.
    PerspectivesDraft {
        /// Manifest path of the run.
        #[arg(long)]
        manifest: PathBuf,
        /// Approve a draft held for human review.
        #[arg(long)]
        approve_draft: bool,
    },
    /// Ingest one external agent output.
    AgentResult {
        /// Manifest path of the run.
        #[arg(long)]
        manifest: PathBuf,
        /// Stage the output belongs to.
        #[arg(long)]
        stage: String,
        /// Perspective the output targets.
        #[arg(long)]
        perspective: String,
        /// Path the output is ingested from.
        #[arg(long)]
        input: PathBuf,
        /// Driver-assigned agent run identifier.
        #[arg(long)]
        agent_run_id: String,
        /// Overwrite a prompt-digest conflict.
        #[arg(long)]
        force: bool,
        /// Operator-supplied reason.
        #[arg(long, default_value = "operator agent-result")]
        reason: String,
    },
    /// Print the run status summary.
    Status {
        /// Manifest path of the run.
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Print a deep inspection of the run root.
    Inspect {
        /// Manifest path of the run.
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Enumerate current blockers and resume commands.
    Triage {
        /// Manifest path of the run.
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Pause a running run.
    Pause {
        /// Manifest path of the run.
        #[arg(long)]
        manifest: PathBuf,
        /// Operator-supplied reason.
        #[arg(long, default_value = "operator pause")]
        reason: String,
    },
    /// Resume a paused run.
    Resume {
        /// Manifest path of the run.
        #[arg(long)]
        manifest: PathBuf,
        /// Operator-supplied reason.
        #[arg(long, default_value = "operator resume")]
        reason: String,
    },
    /// Cancel a run.
    Cancel {
        /// Manifest path of the run.
        #[arg(long)]
        manifest: PathBuf,
        /// Operator-supplied reason.
        #[arg(long, default_value = "operator cancel")]
        reason: String,
    },
    /// Summarize the latest online fixtures capture.
    CaptureFixtures {
        /// Manifest path of the run.
        #[arg(long)]
        manifest: PathBuf,
    },
    /// Replay the run's recorded fixtures for one tick.
    Rerun {
        /// Manifest path of the run.
        #[arg(long)]
        manifest: PathBuf,
        /// Operator-supplied reason.
        #[arg(long, default_value = "operator rerun")]
        reason: String,
    },
}

/// Sensitivity argument mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SensitivityArg {
    /// Normal query.
    Normal,
    /// Restricted query.
    Restricted,
    /// Web access forbidden.
    NoWeb,
}

impl From<SensitivityArg> for Sensitivity {
    fn from(value: SensitivityArg) -> Self {
        match value {
            SensitivityArg::Normal => Self::Normal,
            SensitivityArg::Restricted => Self::Restricted,
            SensitivityArg::NoWeb => Self::NoWeb,
        }
    }
}

// ============================================================================
// SECTION: Output Policy
// ============================================================================

/// Explicit output policy threaded into every handler.
struct CliPolicy {
    /// Selected output mode.
    mode: OutputMode,
}

impl CliPolicy {
    /// Emits the envelope on stdout per the selected mode.
    #[allow(
        clippy::print_stdout,
        reason = "The envelope sink is the one sanctioned stdout writer."
    )]
    fn emit(&self, envelope: &Envelope) {
        match self.mode {
            OutputMode::Json => match serde_json::to_string(envelope) {
                Ok(text) => println!("{text}"),
                Err(err) => {
                    tracing::error!(error = %err, "envelope serialization failed");
                }
            },
            OutputMode::Text => {
                if envelope.ok {
                    println!("{}: ok", envelope.command);
                    if let Some(result) = &envelope.result
                        && let Ok(text) = serde_json::to_string_pretty(result)
                    {
                        println!("{text}");
                    }
                } else {
                    if let Some(error) = &envelope.error {
                        println!("{}: {} ({})", envelope.command, error.message, error.code);
                    }
                    if let Some(halt) = &envelope.halt {
                        if let Some(summary) = &halt.blockers_summary {
                            println!("blockers: {summary}");
                        }
                        for command in &halt.next_commands {
                            println!("next: {command}");
                        }
                    }
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point.
fn main() -> ExitCode {
    init_tracing();
    let invocation = std::env::args().collect::<Vec<String>>().join(" ");
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // clap renders help/usage itself; surface parse failures as a
            // coded envelope only in machine mode.
            let args: Vec<String> = std::env::args().collect();
            let wants_json = args.iter().any(|arg| arg == "--output=json")
                || args.windows(2).any(|pair| pair[0] == "--output" && pair[1] == "json");
            if wants_json {
                let policy = CliPolicy {
                    mode: OutputMode::Json,
                };
                let error = CodedError::new(ErrorCode::CliParseError, err.to_string());
                policy.emit(&Envelope::failure(
                    "parse",
                    EnvelopeContract {
                        cli_invocation: invocation,
                        ..EnvelopeContract::default()
                    },
                    &error,
                    None,
                ));
                return ExitCode::FAILURE;
            }
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };

    let policy = CliPolicy {
        mode: cli.output,
    };
    let command_name = command_name(&cli.command);
    let manifest_path = command_manifest(&cli.command);

    let outcome = dispatch(&cli.command);
    let contract = build_contract(&invocation, manifest_path.as_deref());
    let envelope = match outcome {
        Ok(result) => Envelope::success(command_name, contract, result),
        Err(error) => {
            let halt = manifest_path.as_deref().and_then(|path| halt_section(path, &error));
            Envelope::failure(command_name, contract, &error, halt)
        }
    };
    policy.emit(&envelope);
    if envelope.ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

/// Initializes stderr tracing.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("DEEP_RESEARCH_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Returns the stable command name for the envelope.
const fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Init { .. } => "init",
        Commands::Tick { .. } => "tick",
        Commands::Run { .. } => "run",
        Commands::StageAdvance { .. } => "stage-advance",
        Commands::PerspectivesDraft { .. } => "perspectives-draft",
        Commands::AgentResult { .. } => "agent-result",
        Commands::Status { .. } => "status",
        Commands::Inspect { .. } => "inspect",
        Commands::Triage { .. } => "triage",
        Commands::Pause { .. } => "pause",
        Commands::Resume { .. } => "resume",
        Commands::Cancel { .. } => "cancel",
        Commands::CaptureFixtures { .. } => "capture-fixtures",
        Commands::Rerun { .. } => "rerun",
    }
}

/// Returns the manifest path argument of a command, when it has one.
fn command_manifest(command: &Commands) -> Option<PathBuf> {
    match command {
        Commands::Init { .. } => None,
        Commands::Tick { manifest, .. }
        | Commands::Run { manifest, .. }
        | Commands::StageAdvance { manifest, .. }
        | Commands::PerspectivesDraft { manifest, .. }
        | Commands::AgentResult { manifest, .. }
        | Commands::Status { manifest }
        | Commands::Inspect { manifest }
        | Commands::Triage { manifest }
        | Commands::Pause { manifest, .. }
        | Commands::Resume { manifest, .. }
        | Commands::Cancel { manifest, .. }
        | Commands::CaptureFixtures { manifest }
        | Commands::Rerun { manifest, .. } => Some(manifest.clone()),
    }
}

/// Builds the envelope contract, tolerating unreadable manifests.
fn build_contract(invocation: &str, manifest_path: Option<&Path>) -> EnvelopeContract {
    let mut contract = EnvelopeContract {
        cli_invocation: invocation.to_string(),
        ..EnvelopeContract::default()
    };
    let Some(path) = manifest_path else {
        return contract;
    };
    contract.manifest_path = Some(path.display().to_string());
    if let Ok(snapshot) = deep_research_store::read_manifest(path) {
        let layout = RunLayout::from_manifest(&snapshot.manifest);
        contract.run_id = Some(snapshot.manifest.run_id.to_string());
        contract.run_root = Some(layout.root().display().to_string());
        contract.gates_path = Some(layout.gates_path().display().to_string());
        contract.stage_current = Some(snapshot.manifest.stage.current.to_string());
        contract.status = Some(snapshot.manifest.status.as_str().to_string());
    }
    contract
}

/// Populates the halt envelope section from the latest halt artifact.
fn halt_section(manifest_path: &Path, error: &CodedError) -> Option<EnvelopeHalt> {
    let snapshot = deep_research_store::read_manifest(manifest_path).ok()?;
    let layout = RunLayout::from_manifest(&snapshot.manifest);
    let halt: HaltArtifact =
        deep_research_store::read_json_optional(&layout.halt_latest_path()).ok()??;
    if halt.error.code != error.code {
        return None;
    }
    Some(EnvelopeHalt {
        tick_index: halt.tick_index,
        tick_path: layout.halt_tick_path(halt.tick_index).display().to_string(),
        latest_path: layout.halt_latest_path().display().to_string(),
        blockers_summary: Some(halt.blockers.summary()),
        next_commands: halt.next_commands,
    })
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Dispatches one parsed command to its engine operation.
fn dispatch(command: &Commands) -> Result<Value, CodedError> {
    match command {
        Commands::Init {
            run_root,
            run_id,
            query,
            sensitivity,
            write_perspectives,
        } => {
            let run_id = RunId::new(run_id.clone())
                .map_err(|err| CodedError::new(ErrorCode::InvalidArgs, err.to_string()))?;
            let outcome = deep_research_engine::init_run(&InitArgs {
                run_root: run_root.clone(),
                run_id,
                query: QuerySpec {
                    text: query.clone(),
                    sensitivity: (*sensitivity).into(),
                    constraints: Vec::new(),
                },
                limits: None,
                write_perspectives: *write_perspectives,
            })
            .map_err(deep_research_engine::EngineError::into_coded)?;
            to_value(&outcome)
        }
        Commands::Tick {
            manifest,
            driver,
            fixtures,
            reason,
        } => {
            let (policy, gates_path) = run_context(manifest)?;
            let (driver, tools) = build_driver(*driver, fixtures.as_deref(), manifest, &policy)?;
            let report = deep_research_engine::tick(
                manifest,
                &gates_path,
                reason,
                &policy,
                driver.as_ref(),
                &tools,
            )?;
            to_value(&report)
        }
        Commands::Run {
            manifest,
            driver,
            fixtures,
            max_ticks,
            reason,
        } => {
            let (policy, gates_path) = run_context(manifest)?;
            let (driver, tools) = build_driver(*driver, fixtures.as_deref(), manifest, &policy)?;
            let report = deep_research_engine::run_ticks(
                manifest,
                &gates_path,
                reason,
                &policy,
                driver.as_ref(),
                &tools,
                *max_ticks,
            )?;
            to_value(&report)
        }
        Commands::StageAdvance {
            manifest,
            requested_next,
            reason,
        } => {
            let requested = requested_next
                .as_deref()
                .map(str::parse::<Stage>)
                .transpose()
                .map_err(|err| CodedError::new(ErrorCode::InvalidArgs, err.to_string()))?;
            deep_research_engine::stage_advance(manifest, requested, reason)
                .map_err(deep_research_engine::EngineError::into_coded)
        }
        Commands::PerspectivesDraft {
            manifest,
            approve_draft,
        } => deep_research_engine::perspectives_draft(manifest, *approve_draft)
            .map_err(deep_research_engine::EngineError::into_coded),
        Commands::AgentResult {
            manifest,
            stage,
            perspective,
            input,
            agent_run_id,
            force,
            reason,
        } => {
            let stage = stage
                .parse::<Stage>()
                .map_err(|err| CodedError::new(ErrorCode::InvalidArgs, err.to_string()))?;
            let perspective_id = deep_research_core::PerspectiveId::new(perspective.clone())
                .map_err(|err| CodedError::new(ErrorCode::InvalidArgs, err.to_string()))?;
            let outcome = deep_research_engine::agent_result(&AgentResultArgs {
                manifest_path: manifest.clone(),
                stage,
                perspective_id,
                input_path: input.clone(),
                agent_run_id: deep_research_core::AgentRunId::new(agent_run_id.clone()),
                reason: reason.clone(),
                force: *force,
            })
            .map_err(deep_research_engine::EngineError::into_coded)?;
            to_value(&outcome)
        }
        Commands::Status { manifest } => deep_research_engine::status(manifest)
            .map_err(deep_research_engine::EngineError::into_coded),
        Commands::Inspect { manifest } => deep_research_engine::inspect(manifest)
            .map_err(deep_research_engine::EngineError::into_coded),
        Commands::Triage { manifest } => deep_research_engine::triage(manifest)
            .map_err(deep_research_engine::EngineError::into_coded),
        Commands::Pause { manifest, reason } => deep_research_engine::pause(manifest, reason)
            .map(|revision| json!({ "status": "paused", "revision": revision }))
            .map_err(deep_research_engine::EngineError::into_coded),
        Commands::Resume { manifest, reason } => deep_research_engine::resume(manifest, reason)
            .map(|revision| json!({ "status": "running", "revision": revision }))
            .map_err(deep_research_engine::EngineError::into_coded),
        Commands::Cancel { manifest, reason } => deep_research_engine::cancel(manifest, reason)
            .map(|revision| json!({ "status": "cancelled", "revision": revision }))
            .map_err(deep_research_engine::EngineError::into_coded),
        Commands::CaptureFixtures { manifest } => {
            deep_research_engine::capture_fixtures(manifest)
                .map_err(deep_research_engine::EngineError::into_coded)
        }
        Commands::Rerun { manifest, reason } => {
            let (policy, gates_path) = run_context(manifest)?;
            let doc = fixture_doc_for_rerun(manifest)
                .map_err(deep_research_engine::EngineError::into_coded)?;
            let tools = replay_tools(&doc);
            let driver = FixtureDriver::new(doc);
            let report = deep_research_engine::tick(
                manifest,
                &gates_path,
                reason,
                &policy,
                &driver,
                &tools,
            )?;
            to_value(&report)
        }
    }
}

/// Serializes an outcome into the envelope result value.
fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, CodedError> {
    serde_json::to_value(value)
        .map_err(|err| CodedError::new(ErrorCode::CliError, err.to_string()))
}

/// Resolves the run policy and gates path for a manifest.
fn run_context(manifest_path: &Path) -> Result<(RunPolicy, PathBuf), CodedError> {
    let snapshot = deep_research_store::read_manifest(manifest_path)
        .map_err(|err| CodedError::new(err.code(), err.to_string()))?;
    let layout = RunLayout::from_manifest(&snapshot.manifest);
    let policy = resolve_policy(layout.root(), &ProcessEnv)
        .map_err(|err| CodedError::new(err.code(), err.to_string()))?;
    Ok((policy, layout.gates_path()))
}

/// Builds the driver and tool set for a tick.
fn build_driver(
    driver: DriverArg,
    fixtures: Option<&Path>,
    manifest_path: &Path,
    policy: &RunPolicy,
) -> Result<(Box<dyn Driver>, ToolSet), CodedError> {
    match driver {
        DriverArg::Task => {
            let mut tools = ToolSet::new();
            tools.register(Box::new(PivotAnalyzerTool));
            tools.register(Box::new(Wave2PlannerTool));
            let fetcher = HttpFetcher::new(&policy.resolver)
                .map_err(|err| CodedError::new(ErrorCode::CliError, err))?;
            tools.register(Box::new(CitationValidatorTool::new(CitationLadder::direct_only(
                &policy.ladder,
                Box::new(fetcher),
            ))));
            Ok((Box::new(TaskDriver), tools))
        }
        DriverArg::Fixture => {
            let driver = match fixtures {
                Some(path) => FixtureDriver::load(path)
                    .map_err(deep_research_engine::EngineError::into_coded)?,
                None => {
                    let doc = fixture_doc_for_rerun(manifest_path)
                        .map_err(deep_research_engine::EngineError::into_coded)?;
                    FixtureDriver::new(doc)
                }
            };
            let tools = replay_tools(driver.doc());
            Ok((Box::new(driver), tools))
        }
    }
}

/// Builds the replay tool set from a fixture document.
fn replay_tools(doc: &deep_research_engine::FixtureDoc) -> ToolSet {
    let mut tools = ToolSet::new();
    tools.register(Box::new(PivotAnalyzerTool));
    tools.register(Box::new(Wave2PlannerTool));
    let recorded = doc.tools.get("citation_validator").cloned().unwrap_or_default();
    tools.register(Box::new(ReplayTool::new("citation_validator", recorded)));
    tools
}
