// crates/deep-research-engine/src/lib.rs
// ============================================================================
// Module: Deep Research Engine Library
// Description: Tick engine, stage procedures, ingest, drivers, and triage.
// Purpose: Execute the durable, stage-gated research pipeline.
// Dependencies: deep-research-{config, core, resolver, store}
// ============================================================================

//! ## Overview
//! `deep-research-engine` is the execution core: the tick engine that
//! performs one bounded unit of forward progress under the run lock, the
//! per-stage procedures, the prompt-digest-bound agent ingest surface, the
//! three execution drivers, halt/triage emission, and the run lifecycle
//! operations behind the operator surface.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod citations;
pub mod docs;
pub mod drivers;
pub mod error;
pub mod halt;
pub mod ingest;
pub mod lifecycle;
pub mod metrics;
pub mod observe;
pub mod perspectives;
pub mod stages;
pub mod tick;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use citations::CitationLadder;
pub use citations::CitationRecord;
pub use citations::CitationStatus;
pub use citations::CitationValidatorTool;
pub use citations::LadderRung;
pub use citations::PivotAnalyzerTool;
pub use citations::Wave2PlannerTool;
pub use docs::RetryDirectives;
pub use docs::ReviewBundle;
pub use docs::ReviewDecision;
pub use docs::UrlMapDoc;
pub use docs::UrlMapEntry;
pub use drivers::FixtureAgentReply;
pub use drivers::FixtureDoc;
pub use drivers::FixtureDriver;
pub use drivers::LiveDriver;
pub use drivers::RecordedToolCall;
pub use drivers::ReplayTool;
pub use drivers::TaskDriver;
pub use drivers::ToolSet;
pub use error::EngineError;
pub use halt::triage_blockers;
pub use halt::write_halt;
pub use ingest::AgentResultArgs;
pub use ingest::AgentResultOutcome;
pub use ingest::agent_result;
pub use lifecycle::InitArgs;
pub use lifecycle::InitOutcome;
pub use lifecycle::RunLoopReport;
pub use lifecycle::cancel;
pub use lifecycle::capture_fixtures;
pub use lifecycle::fixture_doc_for_rerun;
pub use lifecycle::init_run;
pub use lifecycle::inspect;
pub use lifecycle::pause;
pub use lifecycle::perspectives_draft;
pub use lifecycle::resume;
pub use lifecycle::run_ticks;
pub use lifecycle::stage_advance;
pub use lifecycle::status;
pub use lifecycle::triage;
pub use metrics::MetricsWriteOutcome;
pub use metrics::run_metrics_write;
pub use perspectives::MergeOutcome;
pub use perspectives::MergeStatus;
pub use perspectives::PerspectivesState;
pub use perspectives::PerspectivesStateStatus;
pub use perspectives::build_wave_plan;
pub use perspectives::merge_candidates;
pub use stages::EngineChecks;
pub use stages::ProcedureOutcome;
pub use stages::StageContext;
pub use stages::run_stage;
pub use tick::TickReport;
pub use tick::tick;
