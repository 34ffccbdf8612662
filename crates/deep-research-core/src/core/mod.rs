// crates/deep-research-core/src/core/mod.rs
// ============================================================================
// Module: Deep Research Core Types
// Description: Canonical documents, identifiers, and record types.
// Purpose: Single home for every durable schema in a run root.
// Dependencies: serde, serde_jcs, serde_json, sha2, time
// ============================================================================

//! ## Overview
//! Core types model every durable document the orchestrator writes: the
//! manifest, gates, perspectives, wave plans, sidecars, observability
//! streams, halt artifacts, and the CLI envelope. All documents are treated
//! as untrusted on load and validated fail-closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod agent;
pub mod envelope;
pub mod errors;
pub mod gates;
pub mod halt;
pub mod hashing;
pub mod identifiers;
pub mod layout;
pub mod manifest;
pub mod observe;
pub mod perspective;
pub mod policy;
pub mod stage;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use agent::AGENT_OUTPUT_META_SCHEMA_VERSION;
pub use agent::AgentOutputMeta;
pub use envelope::CLI_SCHEMA_VERSION;
pub use envelope::Envelope;
pub use envelope::EnvelopeContract;
pub use envelope::EnvelopeError;
pub use envelope::EnvelopeHalt;
pub use errors::CodedError;
pub use errors::ErrorCode;
pub use gates::ALL_GATES;
pub use gates::GATES_SCHEMA_VERSION;
pub use gates::GateId;
pub use gates::GateRecord;
pub use gates::GateStatus;
pub use gates::GatesDoc;
pub use halt::BlockedTransition;
pub use halt::HALT_SCHEMA_VERSION;
pub use halt::HaltArtifact;
pub use halt::HaltBlockers;
pub use halt::HaltError;
pub use halt::RelatedPaths;
pub use hashing::HashError;
pub use hashing::canonical_json_bytes;
pub use hashing::digest_bytes;
pub use hashing::digest_text;
pub use hashing::digest_value;
pub use identifiers::AgentRunId;
pub use identifiers::IdentifierError;
pub use identifiers::PerspectiveId;
pub use identifiers::RunId;
pub use layout::RunLayout;
pub use manifest::ArtifactPaths;
pub use manifest::ArtifactsSection;
pub use manifest::MANIFEST_SCHEMA_VERSION;
pub use manifest::Manifest;
pub use manifest::ManifestError;
pub use manifest::QuerySpec;
pub use manifest::RunLimits;
pub use manifest::RunStatus;
pub use manifest::Sensitivity;
pub use manifest::StageState;
pub use manifest::StageTransition;
pub use observe::AuditRecord;
pub use observe::EventType;
pub use observe::FailureKind;
pub use observe::RUN_METRICS_SCHEMA_VERSION;
pub use observe::RunMetrics;
pub use observe::StageOutcome;
pub use observe::TICK_MARKER_SCHEMA_VERSION;
pub use observe::TIMEOUT_CHECKPOINT_SCHEMA_VERSION;
pub use observe::TelemetryEvent;
pub use observe::TickLedgerRecord;
pub use observe::TickMarker;
pub use observe::TickPhase;
pub use observe::TimeoutCheckpoint;
pub use perspective::CandidateDoc;
pub use perspective::CandidateFlags;
pub use perspective::PERSPECTIVES_SCHEMA_VERSION;
pub use perspective::Perspective;
pub use perspective::PerspectiveCandidate;
pub use perspective::PerspectivesDoc;
pub use perspective::PromptContract;
pub use perspective::ToolPolicy;
pub use perspective::Track;
pub use perspective::WAVE_PLAN_SCHEMA_VERSION;
pub use perspective::WavePlan;
pub use perspective::WavePlanEntry;
pub use policy::HeartbeatPolicy;
pub use policy::LadderPolicy;
pub use policy::RUN_POLICY_SCHEMA_VERSION;
pub use policy::ResolverPolicy;
pub use policy::RetryBudget;
pub use policy::RunPolicy;
pub use policy::STALE_TICK_MARKER_SECONDS;
pub use policy::StageTimeouts;
pub use policy::TickPolicy;
pub use stage::ALL_STAGES;
pub use stage::Stage;
pub use stage::StageParseError;
pub use time::Timestamp;
