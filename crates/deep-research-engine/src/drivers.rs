// crates/deep-research-engine/src/drivers.rs
// ============================================================================
// Module: Execution Drivers
// Description: Fixture replay, live execution, and task prompt-out drivers.
// Purpose: Acquire agent output through one strategy seam per execution mode.
// Dependencies: deep-research-core, deep-research-store, serde
// ============================================================================

//! ## Overview
//! Three drivers implement the core [`Driver`] seam. The fixture driver
//! replays recorded agent replies and tool envelopes deterministically; the
//! live driver delegates to an injected callable; the task driver never runs
//! agents inline: the tick engine writes prompts out and the operator
//! ingests results through `agent-result`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::Path;

use deep_research_core::AgentInvocation;
use deep_research_core::AgentReply;
use deep_research_core::AgentRunId;
use deep_research_core::Driver;
use deep_research_core::DriverError;
use deep_research_core::DriverKind;
use deep_research_core::Stage;
use deep_research_core::Tool;
use deep_research_core::ToolEnvelope;
use deep_research_core::ToolFailure;
use deep_research_core::ToolResult;
use deep_research_store::read_json;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;

// ============================================================================
// SECTION: Fixture Document
// ============================================================================

/// Schema version for fixture documents.
pub const FIXTURES_SCHEMA_VERSION: &str = "fixtures.v1";

/// One recorded agent reply in a fixture document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureAgentReply {
    /// Recorded markdown output.
    pub markdown: String,
    /// Recorded agent run identifier.
    pub agent_run_id: String,
    /// Recorded model label.
    pub model: Option<String>,
}

/// Replayable fixture document.
///
/// # Invariants
/// - Agent replies are keyed `"{stage}/{perspective_id}"`.
/// - Tool envelopes are keyed by tool name and consumed in recorded order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureDoc {
    /// Fixture schema version.
    pub schema_version: String,
    /// Recorded agent replies.
    #[serde(default)]
    pub agents: BTreeMap<String, FixtureAgentReply>,
    /// Recorded tool envelopes.
    #[serde(default)]
    pub tools: BTreeMap<String, Vec<ToolEnvelope>>,
}

impl Default for FixtureDoc {
    fn default() -> Self {
        Self {
            schema_version: FIXTURES_SCHEMA_VERSION.to_string(),
            agents: BTreeMap::new(),
            tools: BTreeMap::new(),
        }
    }
}

impl FixtureDoc {
    /// Returns the agent key for a stage and perspective.
    #[must_use]
    pub fn agent_key(stage: Stage, perspective_id: &str) -> String {
        format!("{stage}/{perspective_id}")
    }
}

// ============================================================================
// SECTION: Fixture Driver
// ============================================================================

/// Driver replaying recorded agent replies.
#[derive(Debug, Clone)]
pub struct FixtureDriver {
    /// Loaded fixture document.
    doc: FixtureDoc,
}

impl FixtureDriver {
    /// Creates a fixture driver from an in-memory document.
    #[must_use]
    pub const fn new(doc: FixtureDoc) -> Self {
        Self {
            doc,
        }
    }

    /// Loads a fixture driver from a fixture document on disk.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the document is unreadable or invalid.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let doc: FixtureDoc = read_json(path)?;
        Ok(Self::new(doc))
    }

    /// Returns the fixture document.
    #[must_use]
    pub const fn doc(&self) -> &FixtureDoc {
        &self.doc
    }
}

impl Driver for FixtureDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Fixture
    }

    fn run_agent(&self, invocation: &AgentInvocation<'_>) -> Result<AgentReply, DriverError> {
        let key = FixtureDoc::agent_key(invocation.stage, invocation.perspective_id.as_str());
        let Some(recorded) = self.doc.agents.get(&key) else {
            return Err(DriverError::FixtureMissing {
                stage: invocation.stage,
                perspective_id: invocation.perspective_id.clone(),
            });
        };
        Ok(AgentReply {
            markdown: recorded.markdown.clone(),
            agent_run_id: AgentRunId::new(recorded.agent_run_id.clone()),
            model: recorded.model.clone(),
        })
    }
}

// ============================================================================
// SECTION: Live Driver
// ============================================================================

/// Callable executing one agent invocation interactively.
pub type LiveAgentFn = dyn Fn(&AgentInvocation<'_>) -> Result<AgentReply, DriverError> + Send + Sync;

/// Driver delegating to an injected interactive callable.
pub struct LiveDriver {
    /// Injected agent executor.
    run: Box<LiveAgentFn>,
}

impl LiveDriver {
    /// Creates a live driver around an agent executor.
    #[must_use]
    pub fn new(run: Box<LiveAgentFn>) -> Self {
        Self {
            run,
        }
    }
}

impl Driver for LiveDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Live
    }

    fn run_agent(&self, invocation: &AgentInvocation<'_>) -> Result<AgentReply, DriverError> {
        (self.run)(invocation)
    }
}

// ============================================================================
// SECTION: Task Driver
// ============================================================================

/// Driver for prompt-out mode; agents never run inline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskDriver;

impl Driver for TaskDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Task
    }

    fn run_agent(&self, _invocation: &AgentInvocation<'_>) -> Result<AgentReply, DriverError> {
        Err(DriverError::InlineExecutionUnsupported)
    }
}

// ============================================================================
// SECTION: Tool Set
// ============================================================================

/// One recorded tool call with its envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedToolCall {
    /// Tool name.
    pub tool: String,
    /// Arguments passed to the tool.
    pub args: Value,
    /// Envelope the tool returned.
    pub envelope: ToolEnvelope,
}

/// Registry of collaborator tools with call recording for fixture capture.
///
/// # Invariants
/// - Every executed envelope is recorded in call order.
pub struct ToolSet {
    /// Registered tools keyed by name.
    tools: BTreeMap<&'static str, Box<dyn Tool>>,
    /// Recorded calls, in execution order.
    recorded: RefCell<Vec<RecordedToolCall>>,
}

impl ToolSet {
    /// Creates an empty tool set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            recorded: RefCell::new(Vec::new()),
        }
    }

    /// Registers a tool, replacing any prior registration of the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    /// Executes a registered tool and records the envelope.
    pub fn execute(&self, name: &str, args: &Value) -> ToolResult<Value> {
        let result = self.tools.get(name).map_or_else(
            || {
                ToolResult::Err(ToolFailure {
                    code: "TOOL_NOT_REGISTERED".to_string(),
                    message: format!("tool not registered: {name}"),
                    details: None,
                })
            },
            |tool| tool.execute(args),
        );
        let envelope = ToolEnvelope::from(result.clone());
        self.recorded.borrow_mut().push(RecordedToolCall {
            tool: name.to_string(),
            args: args.clone(),
            envelope,
        });
        result
    }

    /// Drains the recorded calls for fixture capture.
    #[must_use]
    pub fn take_recorded(&self) -> Vec<RecordedToolCall> {
        self.recorded.borrow_mut().drain(..).collect()
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SECTION: Replay Tool
// ============================================================================

/// Tool replaying recorded envelopes in order.
pub struct ReplayTool {
    /// Replayed tool name.
    name: &'static str,
    /// Remaining envelopes in recorded order.
    envelopes: RefCell<VecDeque<ToolEnvelope>>,
}

impl ReplayTool {
    /// Creates a replay tool from recorded envelopes.
    #[must_use]
    pub fn new(name: &'static str, envelopes: Vec<ToolEnvelope>) -> Self {
        Self {
            name,
            envelopes: RefCell::new(envelopes.into()),
        }
    }
}

impl Tool for ReplayTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn execute(&self, _args: &Value) -> ToolResult<Value> {
        match self.envelopes.borrow_mut().pop_front() {
            Some(envelope) => ToolResult::from(envelope),
            None => ToolResult::Err(ToolFailure {
                code: "FIXTURE_EXHAUSTED".to_string(),
                message: format!("no recorded envelope left for tool: {}", self.name),
                details: None,
            }),
        }
    }
}
