// crates/deep-research-engine/tests/common/mod.rs
// ============================================================================
// Module: Engine Test Helpers
// Description: Shared run-root builders and fixture assembly for engine
//              tests.
// ============================================================================
//! ## Overview
//! Builders creating seeded run roots, fixture documents keyed to the
//! generated wave plans, and replayable tool sets.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    dead_code,
    reason = "Test-only output, assertions, and selectively used helpers."
)]

use std::path::Path;
use std::path::PathBuf;

use deep_research_core::QuerySpec;
use deep_research_core::RunId;
use deep_research_core::RunLayout;
use deep_research_core::RunLimits;
use deep_research_core::Sensitivity;
use deep_research_core::Stage;
use deep_research_core::ToolEnvelope;
use deep_research_core::WavePlan;
use deep_research_engine::FixtureAgentReply;
use deep_research_engine::FixtureDoc;
use deep_research_engine::InitArgs;
use deep_research_engine::PivotAnalyzerTool;
use deep_research_engine::ReplayTool;
use deep_research_engine::ToolSet;
use deep_research_engine::Wave2PlannerTool;
use deep_research_engine::init_run;
use deep_research_store::read_json;

/// Seeded run paths for one test run.
pub struct SeededRun {
    /// Manifest path.
    pub manifest_path: PathBuf,
    /// Gates path.
    pub gates_path: PathBuf,
    /// Run layout.
    pub layout: RunLayout,
}

/// Creates a run root seeded with perspectives and the wave-1 plan.
pub fn seeded_run(root: &Path, max_wave1_agents: u32) -> SeededRun {
    let run_root = root.join("run");
    let outcome = init_run(&InitArgs {
        run_root: run_root.clone(),
        run_id: RunId::new("r1").expect("run id"),
        query: QuerySpec {
            text: "State of the field".to_string(),
            sensitivity: Sensitivity::Normal,
            constraints: Vec::new(),
        },
        limits: Some(RunLimits {
            max_wave1_agents,
            ..RunLimits::default()
        }),
        write_perspectives: true,
    })
    .expect("init run");
    let layout = RunLayout::from_root(run_root);
    SeededRun {
        manifest_path: PathBuf::from(outcome.manifest_path),
        gates_path: layout.gates_path(),
        layout,
    }
}

/// Creates a bare run root in the `init` stage.
pub fn bare_run(root: &Path) -> SeededRun {
    let run_root = root.join("run");
    let outcome = init_run(&InitArgs {
        run_root: run_root.clone(),
        run_id: RunId::new("r1").expect("run id"),
        query: QuerySpec {
            text: "State of the field".to_string(),
            sensitivity: Sensitivity::Normal,
            constraints: Vec::new(),
        },
        limits: None,
        write_perspectives: false,
    })
    .expect("init run");
    let layout = RunLayout::from_root(run_root);
    SeededRun {
        manifest_path: PathBuf::from(outcome.manifest_path),
        gates_path: layout.gates_path(),
        layout,
    }
}

/// Unique, citation-bearing agent markdown for one perspective.
pub fn agent_markdown(perspective: &str, url: &str) -> String {
    format!(
        "## Findings\n\nCoverage for {perspective} remains consistent across sources.\n\
         Supporting detail for {perspective} is at {url} [1].\n\n## Sources\n\n\
         Sources reviewed for {perspective}: {url}\n"
    )
}

/// Builds fixture agent replies for every entry of a wave plan.
pub fn fixture_for_wave(doc: &mut FixtureDoc, layout: &RunLayout, wave: u8) {
    let plan: WavePlan = read_json(&layout.wave_plan_path(wave)).expect("wave plan");
    let stage = if wave == 1 { Stage::Wave1 } else { Stage::Wave2 };
    for (index, entry) in plan.entries.iter().enumerate() {
        let url = format!("https://example.com/w{wave}-{index}");
        doc.agents.insert(
            FixtureDoc::agent_key(stage, entry.perspective_id.as_str()),
            FixtureAgentReply {
                markdown: agent_markdown(entry.perspective_id.as_str(), &url),
                agent_run_id: format!("agent-w{wave}-{index}"),
                model: Some("fixture-model".to_string()),
            },
        );
    }
}

/// Tool set with deterministic planners and a replayed citation validator.
pub fn replay_tool_set(validator_envelopes: Vec<ToolEnvelope>) -> ToolSet {
    let mut tools = ToolSet::new();
    tools.register(Box::new(PivotAnalyzerTool));
    tools.register(Box::new(Wave2PlannerTool));
    tools.register(Box::new(ReplayTool::new("citation_validator", validator_envelopes)));
    tools
}

/// Builds a valid citation-validator envelope for the given URLs.
pub fn valid_citations_envelope(urls: &[String]) -> ToolEnvelope {
    let records: Vec<serde_json::Value> = urls
        .iter()
        .map(|url| {
            serde_json::json!({
                "url": url,
                "status": "valid",
                "rung": "direct",
                "attempts": 1,
                "last_status": 200,
                "error": null,
            })
        })
        .collect();
    ToolEnvelope {
        ok: true,
        value: Some(serde_json::json!({ "records": records, "blocked": [] })),
        error: None,
    }
}
