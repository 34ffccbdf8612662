// crates/deep-research-engine/src/stages.rs
// ============================================================================
// Module: Stage Procedures
// Description: Per-stage work units dispatched by the tick engine.
// Purpose: Produce stage artifacts, evaluate gates, and request advancement.
// Dependencies: deep-research-core, deep-research-resolver,
//               deep-research-store, serde_json
// ============================================================================

//! ## Overview
//! Each procedure performs the bounded work for its stage: driving agents
//! through the driver seam, invoking collaborator tools, writing artifacts,
//! recording gate decisions, and finally naming the transition it wants. The
//! tick engine evaluates that transition through the stage machine and
//! commits it; procedures never write the manifest themselves.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use deep_research_core::AgentInvocation;
use deep_research_core::AgentOutputMeta;
use deep_research_core::CandidateDoc;
use deep_research_core::CodedError;
use deep_research_core::CustomPredicate;
use deep_research_core::Driver;
use deep_research_core::DriverKind;
use deep_research_core::ErrorCode;
use deep_research_core::GateId;
use deep_research_core::GatesDoc;
use deep_research_core::Manifest;
use deep_research_core::PerspectiveId;
use deep_research_core::PerspectivesDoc;
use deep_research_core::RunLayout;
use deep_research_core::RunPolicy;
use deep_research_core::RunStatus;
use deep_research_core::Stage;
use deep_research_core::Timestamp;
use deep_research_core::WavePlan;
use deep_research_core::digest_bytes;
use deep_research_core::digest_text;
use deep_research_core::runtime::predicates;
use deep_research_resolver::FetchFailure;
use deep_research_resolver::FetchMethod;
use deep_research_resolver::FetchResponse;
use deep_research_resolver::HttpFetcher;
use deep_research_resolver::ThreadSleeper;
use deep_research_resolver::UrlFetcher;
use deep_research_resolver::cache_path;
use deep_research_resolver::resolve_batch;
use deep_research_store::read_json;
use deep_research_store::read_json_optional;
use deep_research_store::write_bytes_atomic;
use deep_research_store::write_json_atomic;
use serde_json::Value;
use serde_json::json;

use crate::citations::CitationRecord;
use crate::citations::CitationStatus;
use crate::docs::BLOCKED_URLS_SCHEMA_VERSION;
use crate::docs::BlockedUrlsDoc;
use crate::docs::ONLINE_FIXTURES_SCHEMA_VERSION;
use crate::docs::OnlineFixturesDoc;
use crate::docs::REVIEW_BUNDLE_SCHEMA_VERSION;
use crate::docs::RetryDirectives;
use crate::docs::ReviewBundle;
use crate::docs::ReviewDecision;
use crate::docs::SUMMARY_META_SCHEMA_VERSION;
use crate::docs::SummaryMeta;
use crate::docs::URL_MAP_SCHEMA_VERSION;
use crate::docs::UrlMapDoc;
use crate::docs::UrlMapEntry;
use crate::drivers::ToolSet;
use crate::error::EngineError;
use crate::perspectives::MergeStatus;
use crate::perspectives::PERSPECTIVES_STATE_SCHEMA_VERSION;
use crate::perspectives::PerspectivesState;
use crate::perspectives::PerspectivesStateStatus;
use crate::perspectives::build_wave_plan;
use crate::perspectives::merge_candidates;
use crate::perspectives::normalize_candidate_doc;
use crate::perspectives::render_drafting_prompt;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Drafting agents expected for the perspectives stage.
pub const PERSPECTIVE_DRAFT_AGENTS: [&str; 2] = ["draft-1", "draft-2"];
/// Minimum citation coverage accepted by the reviewer.
const REVIEW_MIN_CITATION_COVERAGE: f64 = 0.8;
/// Maximum duplicate-line rate accepted by the reviewer.
const REVIEW_MAX_DUPLICATE_RATE: f64 = 0.25;
/// Maximum uncited numeric claims accepted by the reviewer.
const REVIEW_MAX_UNCITED_NUMERICS: u32 = 8;

// ============================================================================
// SECTION: Procedure Outcome
// ============================================================================

/// Result of one stage procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureOutcome {
    /// Transition the procedure wants; `None` plans a retry.
    pub requested_next: Option<Stage>,
    /// Run status override committed with the transition.
    pub status_override: Option<RunStatus>,
}

impl ProcedureOutcome {
    /// Outcome requesting a transition.
    #[must_use]
    pub const fn advance(next: Stage) -> Self {
        Self {
            requested_next: Some(next),
            status_override: None,
        }
    }

    /// Outcome planning a retry of the current stage.
    #[must_use]
    pub const fn retry() -> Self {
        Self {
            requested_next: None,
            status_override: None,
        }
    }
}

/// Context handed to every stage procedure.
pub struct StageContext<'a> {
    /// Run layout.
    pub layout: &'a RunLayout,
    /// Manifest snapshot.
    pub manifest: &'a Manifest,
    /// Gates document path.
    pub gates_path: &'a Path,
    /// Resolved run policy.
    pub policy: &'a RunPolicy,
    /// Execution driver.
    pub driver: &'a dyn Driver,
    /// Collaborator tool set.
    pub tools: &'a ToolSet,
    /// Current tick index.
    pub tick_index: u64,
}

impl StageContext<'_> {
    /// Loads the gates document, defaulting when absent.
    fn load_gates(&self) -> Result<GatesDoc, EngineError> {
        Ok(read_json_optional(self.gates_path)?.unwrap_or_default())
    }

    /// Persists the gates document.
    fn save_gates(&self, gates: &GatesDoc) -> Result<(), EngineError> {
        write_json_atomic(self.gates_path, gates)?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Runs the procedure for the manifest's current stage.
///
/// # Errors
///
/// Returns [`EngineError`] when the stage work fails; blocked transitions
/// are raised by the tick engine after this returns.
pub fn run_stage(ctx: &StageContext<'_>) -> Result<ProcedureOutcome, EngineError> {
    match ctx.manifest.stage.current {
        Stage::Init => run_init(ctx),
        Stage::Perspectives => run_perspectives(ctx),
        Stage::Wave1 => run_wave(ctx, 1),
        Stage::Pivot => run_pivot(ctx),
        Stage::Wave2 => run_wave(ctx, 2),
        Stage::Citations => run_citations(ctx),
        Stage::Summaries => run_summaries(ctx),
        Stage::Synthesis => run_synthesis(ctx),
        Stage::Review => run_review(ctx),
        Stage::Finalize => Ok(ProcedureOutcome {
            requested_next: Some(Stage::Done),
            status_override: Some(RunStatus::Completed),
        }),
        Stage::Done => Err(EngineError::Coded(CodedError::new(
            ErrorCode::InvalidState,
            "run is already done",
        ))),
    }
}

// ============================================================================
// SECTION: Init and Perspectives
// ============================================================================

/// Init stage: move to perspectives, or straight to wave1 when the
/// perspectives document and wave-1 plan already exist.
fn run_init(ctx: &StageContext<'_>) -> Result<ProcedureOutcome, EngineError> {
    let shortcut_ready =
        ctx.layout.perspectives_path().exists() && ctx.layout.wave_plan_path(1).exists();
    if shortcut_ready {
        return Ok(ProcedureOutcome::advance(Stage::Wave1));
    }
    Ok(ProcedureOutcome::advance(Stage::Perspectives))
}

/// Perspectives stage: collect drafted candidates, then merge and promote.
fn run_perspectives(ctx: &StageContext<'_>) -> Result<ProcedureOutcome, EngineError> {
    let now = Timestamp::now();
    let state: Option<PerspectivesState> =
        read_json_optional(&ctx.layout.perspectives_state_path())?;
    if state.as_ref().is_some_and(|state| state.status == PerspectivesStateStatus::Promoted) {
        return Ok(ProcedureOutcome::advance(Stage::Wave1));
    }

    // Ensure every drafting prompt exists on disk.
    let mut missing = Vec::new();
    for draft in PERSPECTIVE_DRAFT_AGENTS {
        let draft_id = PerspectiveId::new(draft).map_err(invalid_identifier)?;
        let prompt_path = ctx.layout.operator_prompt_path(Stage::Perspectives, &draft_id);
        let prompt_md =
            render_drafting_prompt(&ctx.manifest.run_id, &ctx.manifest.query, draft);
        if !prompt_path.exists() {
            write_bytes_atomic(&prompt_path, prompt_md.as_bytes())?;
        }
        let output_path = ctx.layout.operator_perspective_output_path(&draft_id);
        let meta_path = ctx.layout.operator_perspective_meta_path(&draft_id);
        let fresh = read_json_optional::<AgentOutputMeta>(&meta_path)?
            .is_some_and(|meta| meta.prompt_digest == digest_text(&prompt_md));
        if !fresh {
            missing.push((draft_id, prompt_md, prompt_path, output_path, meta_path));
        }
    }

    if !missing.is_empty() {
        match ctx.driver.kind() {
            DriverKind::Task => {
                return Err(run_agent_required(ctx, Stage::Perspectives, &missing));
            }
            DriverKind::Fixture | DriverKind::Live => {
                for (draft_id, prompt_md, _prompt_path, output_path, meta_path) in &missing {
                    let invocation = AgentInvocation {
                        run_root: ctx.layout.root(),
                        stage: Stage::Perspectives,
                        perspective_id: draft_id,
                        prompt_md: prompt_md.as_str(),
                    };
                    let reply = ctx.driver.run_agent(&invocation)?;
                    let raw: Value = serde_json::from_str(&reply.markdown).map_err(|err| {
                        EngineError::Coded(CodedError::new(
                            ErrorCode::PerspectivesOutputInvalid,
                            format!("drafting agent output is not json: {err}"),
                        ))
                    })?;
                    let normalized = normalize_candidate_doc(&ctx.manifest.run_id, &raw)?;
                    write_json_atomic(output_path, &normalized)?;
                    let meta = AgentOutputMeta::new(
                        digest_text(prompt_md),
                        reply.agent_run_id.clone(),
                        now,
                        "driver".to_string(),
                    );
                    write_json_atomic(meta_path, &meta)?;
                }
            }
        }
    }

    promote_perspectives(ctx, now)
}

/// Merges every collected candidate document and promotes or holds.
fn promote_perspectives(
    ctx: &StageContext<'_>,
    now: Timestamp,
) -> Result<ProcedureOutcome, EngineError> {
    let mut docs: Vec<CandidateDoc> = Vec::new();
    let mut ingested: Vec<String> = Vec::new();
    for draft in PERSPECTIVE_DRAFT_AGENTS {
        let draft_id = PerspectiveId::new(draft).map_err(invalid_identifier)?;
        let output_path = ctx.layout.operator_perspective_output_path(&draft_id);
        if let Some(doc) = read_json_optional::<CandidateDoc>(&output_path)? {
            docs.push(doc);
            ingested.push(draft.to_string());
        }
    }
    if docs.is_empty() {
        return Err(EngineError::Coded(CodedError::new(
            ErrorCode::InvalidState,
            "no perspective candidate documents have been ingested",
        )));
    }

    let outcome = merge_candidates(&ctx.manifest.run_id, &docs)?;
    match outcome.status {
        MergeStatus::AwaitingHumanReview => {
            write_json_atomic(&ctx.layout.perspectives_draft_path(), &outcome.doc)?;
            write_json_atomic(&ctx.layout.perspectives_state_path(), &PerspectivesState {
                schema_version: PERSPECTIVES_STATE_SCHEMA_VERSION.to_string(),
                status: PerspectivesStateStatus::AwaitingHumanReview,
                ingested,
                merged_digest: None,
                updated_at: now,
            })?;
            Err(EngineError::Coded(CodedError::new(
                ErrorCode::HumanReviewRequired,
                "perspective merge is awaiting human review",
            )))
        }
        MergeStatus::Promoted => {
            write_json_atomic(&ctx.layout.perspectives_path(), &outcome.doc)?;
            let plan = build_wave_plan(
                1,
                &ctx.manifest.query,
                &outcome.doc,
                ctx.manifest.limits.max_wave1_agents,
            )?;
            write_json_atomic(&ctx.layout.wave_plan_path(1), &plan)?;
            let merged_digest = outcome.doc.digest()?;
            write_json_atomic(&ctx.layout.perspectives_state_path(), &PerspectivesState {
                schema_version: PERSPECTIVES_STATE_SCHEMA_VERSION.to_string(),
                status: PerspectivesStateStatus::Promoted,
                ingested,
                merged_digest: Some(merged_digest),
                updated_at: now,
            })?;
            let mut gates = ctx.load_gates()?;
            gates.record_pass(
                GateId::A,
                now,
                Some(json!({
                    "candidates": docs.iter().map(|doc| doc.candidates.len()).sum::<usize>(),
                    "merged": outcome.doc.perspectives.len(),
                })),
            );
            ctx.save_gates(&gates)?;
            Ok(ProcedureOutcome::advance(Stage::Wave1))
        }
    }
}

// ============================================================================
// SECTION: Waves
// ============================================================================

/// Wave stage: acquire every planned output, review, and gate.
fn run_wave(ctx: &StageContext<'_>, wave: u8) -> Result<ProcedureOutcome, EngineError> {
    let now = Timestamp::now();

    if wave == 1
        && let Some(outcome) = consume_retry_directives(ctx, now)?
    {
        return Ok(outcome);
    }

    let stage = if wave == 1 { Stage::Wave1 } else { Stage::Wave2 };
    let plan: WavePlan = read_json(&ctx.layout.wave_plan_path(wave))?;
    let doc: PerspectivesDoc = read_json(&ctx.layout.perspectives_path())?;
    let current_digest = doc.digest()?;
    if plan.is_stale(&current_digest) {
        let code =
            if wave == 1 { ErrorCode::Wave1PlanStale } else { ErrorCode::Wave2PlanStale };
        return Err(EngineError::Coded(CodedError::new(
            code,
            format!("wave {wave} plan digest no longer matches perspectives.json"),
        )));
    }

    let mut missing = Vec::new();
    for entry in &plan.entries {
        let output_path = ctx.layout.wave_output_path(wave, &entry.perspective_id);
        let meta_path = ctx.layout.wave_meta_path(wave, &entry.perspective_id);
        let fresh = read_json_optional::<AgentOutputMeta>(&meta_path)?
            .is_some_and(|meta| meta.prompt_digest == digest_text(&entry.prompt_md));
        if !(fresh && output_path.exists()) {
            missing.push((
                entry.perspective_id.clone(),
                entry.prompt_md.clone(),
                ctx.layout.operator_prompt_path(stage, &entry.perspective_id),
                output_path,
                meta_path,
            ));
        }
    }

    if !missing.is_empty() {
        match ctx.driver.kind() {
            DriverKind::Task => {
                for (_, prompt_md, prompt_path, _, _) in &missing {
                    write_bytes_atomic(prompt_path, prompt_md.as_bytes())?;
                }
                return Err(run_agent_required(ctx, stage, &missing));
            }
            DriverKind::Fixture | DriverKind::Live => {
                for (perspective_id, prompt_md, _, output_path, meta_path) in &missing {
                    let invocation = AgentInvocation {
                        run_root: ctx.layout.root(),
                        stage,
                        perspective_id,
                        prompt_md: prompt_md.as_str(),
                    };
                    let reply = ctx.driver.run_agent(&invocation)?;
                    write_bytes_atomic(output_path, reply.markdown.as_bytes())?;
                    let mut meta = AgentOutputMeta::new(
                        digest_text(prompt_md),
                        reply.agent_run_id.clone(),
                        now,
                        "driver".to_string(),
                    );
                    meta.model = reply.model.clone();
                    write_json_atomic(meta_path, &meta)?;
                }
            }
        }
    }

    // Review the wave: every output must be non-empty.
    let mut total_bytes: u64 = 0;
    let mut empty: Vec<String> = Vec::new();
    for entry in &plan.entries {
        let output_path = ctx.layout.wave_output_path(wave, &entry.perspective_id);
        let len = fs::metadata(&output_path).map(|meta| meta.len()).unwrap_or(0);
        total_bytes += len;
        if len == 0 {
            empty.push(entry.perspective_id.as_str().to_string());
        }
    }

    let gate = if wave == 1 { GateId::B } else { GateId::D };
    let mut gates = ctx.load_gates()?;
    if empty.is_empty() {
        gates.record_pass(
            gate,
            now,
            Some(json!({
                "agents": plan.entries.len(),
                "total_bytes": total_bytes,
            })),
        );
        ctx.save_gates(&gates)?;
        let next = if wave == 1 { Stage::Pivot } else { Stage::Citations };
        Ok(ProcedureOutcome::advance(next))
    } else {
        gates.record_fail(gate, now, Some(format!("empty outputs: {}", empty.join(", "))));
        ctx.save_gates(&gates)?;
        Ok(ProcedureOutcome::retry())
    }
}

/// Consumes unconsumed retry directives before the retry executes.
///
/// Returns the self-edge outcome when directives were taken.
fn consume_retry_directives(
    ctx: &StageContext<'_>,
    now: Timestamp,
) -> Result<Option<ProcedureOutcome>, EngineError> {
    let path = ctx.layout.retry_directives_path();
    let Some(mut directives) = read_json_optional::<RetryDirectives>(&path)? else {
        return Ok(None);
    };
    if directives.consumed_at.is_some() {
        return Ok(None);
    }
    // Mark consumed before touching any output: at-most-once retry.
    directives.consumed_at = Some(now);
    write_json_atomic(&path, &directives)?;
    for perspective_id in &directives.perspective_ids {
        let _ = fs::remove_file(ctx.layout.wave_output_path(1, perspective_id));
        let _ = fs::remove_file(ctx.layout.wave_meta_path(1, perspective_id));
    }
    Ok(Some(ProcedureOutcome::advance(Stage::Wave1)))
}

// ============================================================================
// SECTION: Pivot
// ============================================================================

/// Pivot stage: analyze wave-1 coverage and plan wave 2.
fn run_pivot(ctx: &StageContext<'_>) -> Result<ProcedureOutcome, EngineError> {
    let now = Timestamp::now();
    let doc: PerspectivesDoc = read_json(&ctx.layout.perspectives_path())?;

    let perspectives_arg: Vec<Value> = doc
        .perspectives
        .iter()
        .map(|perspective| {
            json!({
                "id": perspective.id,
                "title": perspective.title,
                "domain": perspective.domain,
                "track": perspective.track,
                "questions": perspective.questions,
            })
        })
        .collect();
    let analysis = ctx
        .tools
        .execute("pivot_analyzer", &json!({ "perspectives": perspectives_arg }))
        .into_result()?;
    let followups = analysis.get("followups").cloned().unwrap_or(Value::Array(Vec::new()));

    let planned = ctx
        .tools
        .execute(
            "wave2_planner",
            &json!({
                "run_id": ctx.manifest.run_id,
                "followups": followups,
                "max_agents": ctx.manifest.limits.max_wave2_agents,
            }),
        )
        .into_result()?;
    let candidates = planned.get("candidates").cloned().unwrap_or(Value::Array(Vec::new()));
    let candidate_doc = normalize_candidate_doc(
        &ctx.manifest.run_id,
        &json!({
            "run_id": ctx.manifest.run_id,
            "candidates": candidates,
        }),
    )?;
    let merged = merge_candidates(&ctx.manifest.run_id, &[candidate_doc])?;

    let plan = build_wave_plan(
        2,
        &ctx.manifest.query,
        &merged.doc,
        ctx.manifest.limits.max_wave2_agents,
    )?;
    // Pin wave 2 to the promoted perspectives document, not the follow-up set.
    let doc_digest = doc.digest()?;
    let plan = WavePlan {
        perspectives_digest: doc_digest,
        ..plan
    };
    write_json_atomic(&ctx.layout.wave_plan_path(2), &plan)?;

    let mut gates = ctx.load_gates()?;
    gates.record_pass(
        GateId::C,
        now,
        Some(json!({
            "followups": plan.entries.len(),
        })),
    );
    ctx.save_gates(&gates)?;

    Ok(ProcedureOutcome::advance(Stage::Wave2))
}

// ============================================================================
// SECTION: Citations
// ============================================================================

/// Citations stage: validate every cited URL and resolve redirects.
fn run_citations(ctx: &StageContext<'_>) -> Result<ProcedureOutcome, EngineError> {
    let now = Timestamp::now();
    let urls = collect_cited_urls(ctx)?;

    let validated = ctx
        .tools
        .execute("citation_validator", &json!({ "urls": urls }))
        .into_result()?;
    let records: Vec<CitationRecord> = validated
        .get("records")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|err| {
            EngineError::Coded(CodedError::new(
                ErrorCode::ToolFailed,
                format!("citation_validator returned malformed records: {err}"),
            ))
        })?
        .unwrap_or_default();

    let resolved = resolve_redirect_urls(ctx, &urls, now);

    for record in &records {
        deep_research_store::append_jsonl(&ctx.layout.citations_records_path(), record)?;
    }
    let mut entries = std::collections::BTreeMap::new();
    for record in &records {
        entries.insert(record.url.clone(), UrlMapEntry {
            status: record.status,
            resolved_url: resolved.get(&record.url).cloned(),
        });
    }
    write_json_atomic(&ctx.layout.url_map_path(), &UrlMapDoc {
        schema_version: URL_MAP_SCHEMA_VERSION.to_string(),
        entries,
    })?;
    let blocked: Vec<String> = records
        .iter()
        .filter(|record| record.status == CitationStatus::Blocked)
        .map(|record| record.url.clone())
        .collect();
    write_json_atomic(&ctx.layout.blocked_urls_path(), &BlockedUrlsDoc {
        schema_version: BLOCKED_URLS_SCHEMA_VERSION.to_string(),
        blocked,
    })?;

    capture_online_fixtures(ctx, now)?;

    Ok(ProcedureOutcome::advance(Stage::Summaries))
}

/// Collects distinct cited URLs from wave outputs in first-seen order.
fn collect_cited_urls(ctx: &StageContext<'_>) -> Result<Vec<String>, EngineError> {
    let mut urls = Vec::new();
    let mut seen = std::collections::BTreeSet::new();
    for wave in [1_u8, 2] {
        let plan: Option<WavePlan> = read_json_optional(&ctx.layout.wave_plan_path(wave))?;
        let Some(plan) = plan else { continue };
        for entry in &plan.entries {
            let output_path = ctx.layout.wave_output_path(wave, &entry.perspective_id);
            let Ok(text) = fs::read_to_string(&output_path) else { continue };
            for url in extract_urls(&text) {
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }
    }
    Ok(urls)
}

/// Extracts `http(s)://` URLs from markdown text.
fn extract_urls(text: &str) -> Vec<String> {
    let mut urls = Vec::new();
    for token in text.split_whitespace() {
        let start = token.find("http://").or_else(|| token.find("https://"));
        let Some(start) = start else { continue };
        let candidate = &token[start ..];
        let trimmed = candidate.trim_end_matches([')', ']', '>', '.', ',', ';', '"', '\'']);
        if !trimmed.is_empty() {
            urls.push(trimmed.to_string());
        }
    }
    urls
}

/// Resolves redirect-wrapper URLs through the redirect resolver.
///
/// Fixture runs stay offline: the resolver sees a fetcher that fails closed
/// immediately, so only cache hits resolve.
fn resolve_redirect_urls(
    ctx: &StageContext<'_>,
    urls: &[String],
    now: Timestamp,
) -> std::collections::BTreeMap<String, String> {
    let redirect_urls: Vec<String> =
        urls.iter().filter(|url| looks_like_redirect(url)).cloned().collect();
    if redirect_urls.is_empty() {
        return std::collections::BTreeMap::new();
    }
    let cache_file = cache_path(ctx.layout.root());
    let sleeper = ThreadSleeper;
    let outcome = if ctx.driver.kind() == DriverKind::Fixture {
        resolve_batch(
            &OfflineFetcher,
            &sleeper,
            &ctx.policy.resolver,
            &cache_file,
            &redirect_urls,
            now,
        )
    } else {
        match HttpFetcher::new(&ctx.policy.resolver) {
            Ok(fetcher) => resolve_batch(
                &fetcher,
                &sleeper,
                &ctx.policy.resolver,
                &cache_file,
                &redirect_urls,
                now,
            ),
            Err(err) => {
                tracing::warn!(error = %err, "redirect resolver client build failed");
                return std::collections::BTreeMap::new();
            }
        }
    };
    outcome
        .resolutions
        .into_iter()
        .filter_map(|resolution| {
            resolution.resolved_url.map(|resolved| (resolution.input_url, resolved))
        })
        .collect()
}

/// Returns true for URLs that look like redirect wrappers.
fn looks_like_redirect(url: &str) -> bool {
    url.contains("/url?") || url.contains("grounding-api-redirect") || url.contains("perimeterx")
}

/// Fetcher that fails closed immediately; used for offline fixture runs.
struct OfflineFetcher;

impl UrlFetcher for OfflineFetcher {
    fn fetch(&self, _method: FetchMethod, _url: &str) -> Result<FetchResponse, FetchFailure> {
        Err(FetchFailure {
            message: "offline fixture run".to_string(),
            transient: false,
        })
    }
}

/// Writes the recorded tool envelopes as an online fixtures capture.
fn capture_online_fixtures(ctx: &StageContext<'_>, now: Timestamp) -> Result<(), EngineError> {
    let calls = ctx.tools.take_recorded();
    if calls.is_empty() {
        return Ok(());
    }
    let token = format!("tick-{:04}", ctx.tick_index);
    let doc = OnlineFixturesDoc {
        schema_version: ONLINE_FIXTURES_SCHEMA_VERSION.to_string(),
        token: token.clone(),
        captured_at: now,
        calls,
    };
    write_json_atomic(&ctx.layout.online_fixtures_path(&token), &doc)?;
    write_json_atomic(&ctx.layout.online_fixtures_latest_path(), &doc)?;
    Ok(())
}

// ============================================================================
// SECTION: Summaries and Synthesis
// ============================================================================

/// Summaries stage: deterministic per-perspective summarization.
fn run_summaries(ctx: &StageContext<'_>) -> Result<ProcedureOutcome, EngineError> {
    let now = Timestamp::now();
    let cap = usize::try_from(ctx.manifest.limits.max_summary_bytes).unwrap_or(usize::MAX);
    for wave in [1_u8, 2] {
        let plan: Option<WavePlan> = read_json_optional(&ctx.layout.wave_plan_path(wave))?;
        let Some(plan) = plan else { continue };
        for entry in &plan.entries {
            let output_path = ctx.layout.wave_output_path(wave, &entry.perspective_id);
            let Ok(source) = fs::read_to_string(&output_path) else { continue };
            let summary = summarize(&source, &entry.perspective_id, cap);
            let summary_path = ctx.layout.summary_path(&entry.perspective_id);
            write_bytes_atomic(&summary_path, summary.as_bytes())?;
            write_json_atomic(&ctx.layout.summary_meta_path(&entry.perspective_id), &SummaryMeta {
                schema_version: SUMMARY_META_SCHEMA_VERSION.to_string(),
                source_path: output_path.display().to_string(),
                source_digest: digest_bytes(source.as_bytes()),
                generated_at: now,
            })?;
        }
    }
    Ok(ProcedureOutcome::advance(Stage::Synthesis))
}

/// Builds one summary, byte-capped on line boundaries.
fn summarize(source: &str, perspective_id: &PerspectiveId, cap: usize) -> String {
    let mut summary = format!("# Summary: {perspective_id}\n\n");
    for line in source.lines() {
        if summary.len() + line.len() + 1 > cap {
            break;
        }
        summary.push_str(line);
        summary.push('\n');
    }
    summary
}

/// Synthesis stage: compose the final synthesis from summaries and the url
/// map.
fn run_synthesis(ctx: &StageContext<'_>) -> Result<ProcedureOutcome, EngineError> {
    let now = Timestamp::now();
    let doc: PerspectivesDoc = read_json(&ctx.layout.perspectives_path())?;
    let url_map: Option<UrlMapDoc> = read_json_optional(&ctx.layout.url_map_path())?;

    let mut synthesis = String::new();
    synthesis.push_str(&format!("# Final Synthesis\n\n## Query\n\n{}\n", ctx.manifest.query.text));

    for wave in [1_u8, 2] {
        let plan: Option<WavePlan> = read_json_optional(&ctx.layout.wave_plan_path(wave))?;
        let Some(plan) = plan else { continue };
        for entry in &plan.entries {
            let summary_path = ctx.layout.summary_path(&entry.perspective_id);
            let Ok(summary) = fs::read_to_string(&summary_path) else { continue };
            let title = doc
                .find(&entry.perspective_id)
                .map_or_else(|| entry.perspective_id.to_string(), |p| p.title.clone());
            synthesis.push_str(&format!("\n## {title}\n\n"));
            for line in summary.lines().skip(2) {
                synthesis.push_str(line);
                synthesis.push('\n');
            }
        }
    }

    if let Some(url_map) = &url_map {
        synthesis.push_str("\n## Sources\n\n");
        for (url, entry) in &url_map.entries {
            if entry.status == CitationStatus::Valid {
                let cited = entry.resolved_url.as_deref().unwrap_or(url);
                synthesis.push_str(&format!("- {cited}\n"));
            }
        }
    }

    write_bytes_atomic(&ctx.layout.synthesis_path(), synthesis.as_bytes())?;
    write_json_atomic(&ctx.layout.synthesis_meta_path(), &SummaryMeta {
        schema_version: SUMMARY_META_SCHEMA_VERSION.to_string(),
        source_path: ctx.layout.summaries_dir().display().to_string(),
        source_digest: digest_bytes(synthesis.as_bytes()),
        generated_at: now,
    })?;

    Ok(ProcedureOutcome::advance(Stage::Review))
}

// ============================================================================
// SECTION: Review
// ============================================================================

/// Review stage: evaluate the synthesis and decide the next transition.
fn run_review(ctx: &StageContext<'_>) -> Result<ProcedureOutcome, EngineError> {
    let now = Timestamp::now();
    let synthesis = fs::read_to_string(ctx.layout.synthesis_path()).map_err(|err| {
        EngineError::Coded(CodedError::new(
            ErrorCode::InvalidState,
            format!("final synthesis unreadable: {err}"),
        ))
    })?;
    let url_map: Option<UrlMapDoc> = read_json_optional(&ctx.layout.url_map_path())?;

    let citation_coverage = url_map.as_ref().map_or(1.0, |map| {
        let total = map.entries.len();
        if total == 0 {
            return 1.0;
        }
        let valid =
            map.entries.values().filter(|entry| entry.status == CitationStatus::Valid).count();
        // Entry counts are small; the f64 conversion is exact in practice.
        valid as f64 / total as f64
    });
    let duplicate_rate = duplicate_line_rate(&synthesis);
    let uncited_numeric_count = uncited_numeric_lines(&synthesis);

    let previous: Option<ReviewBundle> = read_json_optional(&ctx.layout.review_bundle_path())?;
    let iteration = previous.as_ref().map_or(1, |bundle| bundle.iteration + 1);
    if iteration > ctx.manifest.limits.max_review_iterations {
        return Err(EngineError::Coded(CodedError::new(
            ErrorCode::InvalidState,
            format!(
                "review iterations exhausted ({}/{})",
                iteration, ctx.manifest.limits.max_review_iterations
            ),
        )));
    }

    let mut notes = Vec::new();
    let decision = if citation_coverage < REVIEW_MIN_CITATION_COVERAGE {
        notes.push(format!(
            "citation coverage {citation_coverage:.2} below {REVIEW_MIN_CITATION_COVERAGE:.2}"
        ));
        ReviewDecision::RerunWave2
    } else if duplicate_rate > REVIEW_MAX_DUPLICATE_RATE
        || uncited_numeric_count > REVIEW_MAX_UNCITED_NUMERICS
    {
        notes.push(format!(
            "duplicate rate {duplicate_rate:.2}, uncited numerics {uncited_numeric_count}"
        ));
        ReviewDecision::RewriteSynthesis
    } else {
        ReviewDecision::Approve
    };

    let bundle = ReviewBundle {
        schema_version: REVIEW_BUNDLE_SCHEMA_VERSION.to_string(),
        decision,
        iteration,
        citation_coverage,
        duplicate_rate,
        uncited_numeric_count,
        notes,
        generated_at: now,
    };
    write_json_atomic(&ctx.layout.review_bundle_path(), &bundle)?;

    let metrics = json!({
        "citation_coverage": citation_coverage,
        "duplicate_rate": duplicate_rate,
        "uncited_numeric_count": uncited_numeric_count,
        "iteration": iteration,
    });
    let mut gates = ctx.load_gates()?;
    match decision {
        ReviewDecision::Approve => {
            gates.record_pass(GateId::E, now, Some(metrics.clone()));
            gates.record_pass(GateId::F, now, Some(metrics));
            ctx.save_gates(&gates)?;
            Ok(ProcedureOutcome::advance(Stage::Finalize))
        }
        ReviewDecision::RerunWave2 => {
            gates.record_fail(GateId::D, now, Some("reopened by review".to_string()));
            gates.record_fail(GateId::E, now, Some("citation coverage below floor".to_string()));
            ctx.save_gates(&gates)?;
            Ok(ProcedureOutcome::advance(Stage::Wave2))
        }
        ReviewDecision::RewriteSynthesis => {
            gates.record_fail(GateId::E, now, Some("synthesis quality below floor".to_string()));
            gates.record_fail(GateId::F, now, None);
            ctx.save_gates(&gates)?;
            Ok(ProcedureOutcome::advance(Stage::Synthesis))
        }
    }
}

/// Fraction of repeated non-empty lines in the synthesis.
fn duplicate_line_rate(text: &str) -> f64 {
    let mut seen = std::collections::BTreeSet::new();
    let mut total: u32 = 0;
    let mut duplicates: u32 = 0;
    for line in text.lines() {
        let normalized = line.trim();
        if normalized.is_empty() || normalized.starts_with('#') {
            continue;
        }
        total += 1;
        if !seen.insert(normalized.to_string()) {
            duplicates += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    f64::from(duplicates) / f64::from(total)
}

/// Count of body lines carrying numerals with no nearby citation.
fn uncited_numeric_lines(text: &str) -> u32 {
    let mut count: u32 = 0;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let has_digit = trimmed.chars().any(|character| character.is_ascii_digit());
        let cited = trimmed.contains("http") || trimmed.contains('[');
        if has_digit && !cited {
            count += 1;
        }
    }
    count
}

// ============================================================================
// SECTION: Custom Predicates
// ============================================================================

/// Custom predicate evaluator backed by run artifacts.
pub struct EngineChecks<'a> {
    /// Run layout.
    pub layout: &'a RunLayout,
    /// Manifest snapshot.
    pub manifest: &'a Manifest,
    /// Gates snapshot.
    pub gates: &'a GatesDoc,
}

impl CustomPredicate for EngineChecks<'_> {
    fn holds(&self, name: &str) -> Result<bool, String> {
        match name {
            predicates::RETRY_DIRECTIVES_PRESENT => {
                let directives: Option<RetryDirectives> =
                    read_json_optional(&self.layout.retry_directives_path())
                        .map_err(|err| err.to_string())?;
                Ok(directives.is_some_and(|d| d.consumed_at.is_none()))
            }
            predicates::WAVE1_OUTPUTS_COMPLETE => self.wave_outputs_complete(1),
            predicates::WAVE2_OUTPUTS_COMPLETE => self.wave_outputs_complete(2),
            predicates::SUMMARIES_COMPLETE => self.summaries_complete(),
            predicates::GATE_D_REOPENED => {
                Ok(self.gates.status(GateId::D) == deep_research_core::GateStatus::Fail)
            }
            predicates::SCAFFOLD_REWRITE_REQUESTED => {
                let bundle: Option<ReviewBundle> =
                    read_json_optional(&self.layout.review_bundle_path())
                        .map_err(|err| err.to_string())?;
                Ok(bundle.is_some_and(|b| b.decision == ReviewDecision::RewriteSynthesis))
            }
            other => Err(format!("unknown predicate: {other}")),
        }
    }
}

impl EngineChecks<'_> {
    /// Returns whether every wave plan entry has a digest-fresh output.
    fn wave_outputs_complete(&self, wave: u8) -> Result<bool, String> {
        let plan: Option<WavePlan> = read_json_optional(&self.layout.wave_plan_path(wave))
            .map_err(|err| err.to_string())?;
        let Some(plan) = plan else {
            return Ok(false);
        };
        let doc: Option<PerspectivesDoc> =
            read_json_optional(&self.layout.perspectives_path()).map_err(|err| err.to_string())?;
        let Some(doc) = doc else {
            return Ok(false);
        };
        let current_digest = doc.digest().map_err(|err| err.to_string())?;
        if plan.is_stale(&current_digest) {
            return Err(format!("wave {wave} plan is stale"));
        }
        for entry in &plan.entries {
            let meta: Option<AgentOutputMeta> =
                read_json_optional(&self.layout.wave_meta_path(wave, &entry.perspective_id))
                    .map_err(|err| err.to_string())?;
            let fresh =
                meta.is_some_and(|meta| meta.prompt_digest == digest_text(&entry.prompt_md));
            let present = self.layout.wave_output_path(wave, &entry.perspective_id).exists();
            if !(fresh && present) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns whether every planned perspective has a capped summary.
    fn summaries_complete(&self) -> Result<bool, String> {
        let cap = self.manifest.limits.max_summary_bytes;
        for wave in [1_u8, 2] {
            let plan: Option<WavePlan> = read_json_optional(&self.layout.wave_plan_path(wave))
                .map_err(|err| err.to_string())?;
            let Some(plan) = plan else { continue };
            for entry in &plan.entries {
                let path = self.layout.summary_path(&entry.perspective_id);
                let len = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
                if len == 0 || len > cap {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps an identifier construction failure to an argument error.
fn invalid_identifier(err: deep_research_core::IdentifierError) -> EngineError {
    EngineError::Coded(CodedError::new(ErrorCode::InvalidArgs, err.to_string()))
}

/// Builds the `RUN_AGENT_REQUIRED` error enumerating missing perspectives.
fn run_agent_required(
    ctx: &StageContext<'_>,
    stage: Stage,
    missing: &[(PerspectiveId, String, std::path::PathBuf, std::path::PathBuf, std::path::PathBuf)],
) -> EngineError {
    let missing_perspectives: Vec<Value> = missing
        .iter()
        .map(|(perspective_id, prompt_md, prompt_path, output_path, meta_path)| {
            json!({
                "perspective_id": perspective_id,
                "prompt_path": prompt_path.display().to_string(),
                "output_path": output_path.display().to_string(),
                "meta_path": meta_path.display().to_string(),
                "prompt_digest": digest_text(prompt_md),
            })
        })
        .collect();
    EngineError::Coded(CodedError::with_details(
        ErrorCode::RunAgentRequired,
        format!("{} agent output(s) must be produced for stage {stage}", missing.len()),
        json!({
            "stage": stage,
            "manifest_path": ctx.layout.manifest_path().display().to_string(),
            "missing_perspectives": missing_perspectives,
        }),
    ))
}
