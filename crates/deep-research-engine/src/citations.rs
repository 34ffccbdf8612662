// crates/deep-research-engine/src/citations.rs
// ============================================================================
// Module: Citation Validation Ladder
// Description: Direct-fetch-first citation validation with escalation rungs.
// Purpose: Produce the citations record set behind the black-box validator
//          tool.
// Dependencies: deep-research-core, deep-research-resolver, serde
// ============================================================================

//! ## Overview
//! The validator climbs a ladder per URL: direct fetch, then BrightData,
//! then Apify. Transient failures retry within a rung's attempt budget;
//! terminal failures escalate to the next rung; a rung without a configured
//! fetcher is skipped. The ladder itself is exposed to stage procedures as a
//! black-box [`Tool`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use deep_research_core::LadderPolicy;
use deep_research_core::Tool;
use deep_research_core::ToolFailure;
use deep_research_core::ToolResult;
use deep_research_resolver::FetchMethod;
use deep_research_resolver::UrlFetcher;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Records
// ============================================================================

/// Validation status for one citation URL.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationStatus {
    /// The URL was fetched successfully.
    Valid,
    /// The URL actively refused access on every rung.
    Blocked,
    /// The URL could not be validated.
    Failed,
}

/// One citation validation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationRecord {
    /// Validated URL.
    pub url: String,
    /// Validation status.
    pub status: CitationStatus,
    /// Ladder rung that produced the decision.
    pub rung: Option<String>,
    /// Total fetch attempts across rungs.
    pub attempts: u32,
    /// Last HTTP status observed.
    pub last_status: Option<u16>,
    /// Last error text observed.
    pub error: Option<String>,
}

// ============================================================================
// SECTION: Ladder
// ============================================================================

/// One ladder rung with its attempt budget.
pub struct LadderRung {
    /// Stable rung name (`direct`, `brightdata`, `apify`).
    pub name: &'static str,
    /// Fetch attempts permitted on this rung.
    pub max_attempts: u32,
    /// Fetcher for the rung; a rung without one is skipped.
    pub fetcher: Option<Box<dyn UrlFetcher>>,
}

/// Citation validation ladder.
///
/// # Invariants
/// - Rungs are consulted in declaration order.
pub struct CitationLadder {
    /// Ordered rungs.
    rungs: Vec<LadderRung>,
}

impl CitationLadder {
    /// Builds a ladder with only the direct rung configured.
    #[must_use]
    pub fn direct_only(policy: &LadderPolicy, fetcher: Box<dyn UrlFetcher>) -> Self {
        Self {
            rungs: vec![
                LadderRung {
                    name: "direct",
                    max_attempts: policy.direct_fetch_max_attempts,
                    fetcher: Some(fetcher),
                },
                LadderRung {
                    name: "brightdata",
                    max_attempts: policy.brightdata_max_attempts,
                    fetcher: None,
                },
                LadderRung {
                    name: "apify",
                    max_attempts: policy.apify_max_attempts,
                    fetcher: None,
                },
            ],
        }
    }

    /// Builds a ladder from explicit rungs.
    #[must_use]
    pub fn new(rungs: Vec<LadderRung>) -> Self {
        Self {
            rungs,
        }
    }

    /// Validates one URL by climbing the ladder.
    #[must_use]
    pub fn validate(&self, url: &str) -> CitationRecord {
        let mut total_attempts: u32 = 0;
        let mut last_status: Option<u16> = None;
        let mut last_error: Option<String> = None;
        let mut saw_blocked = false;

        for rung in &self.rungs {
            let Some(fetcher) = &rung.fetcher else {
                continue;
            };
            let mut attempt: u32 = 0;
            while attempt < rung.max_attempts {
                attempt += 1;
                total_attempts += 1;
                match fetcher.fetch(FetchMethod::Get, url) {
                    Ok(response) => {
                        last_status = Some(response.status);
                        if (200 .. 300).contains(&response.status) {
                            return CitationRecord {
                                url: url.to_string(),
                                status: CitationStatus::Valid,
                                rung: Some(rung.name.to_string()),
                                attempts: total_attempts,
                                last_status,
                                error: None,
                            };
                        }
                        if response.status == 401 || response.status == 403 {
                            saw_blocked = true;
                            last_error = Some(format!("access refused: {}", response.status));
                            break;
                        }
                        if response.status == 408
                            || response.status == 429
                            || response.status >= 500
                        {
                            last_error = Some(format!("http status {}", response.status));
                            continue;
                        }
                        last_error = Some(format!("http status {}", response.status));
                        break;
                    }
                    Err(failure) => {
                        last_error = Some(failure.message.clone());
                        if failure.transient {
                            continue;
                        }
                        break;
                    }
                }
            }
        }

        CitationRecord {
            url: url.to_string(),
            status: if saw_blocked { CitationStatus::Blocked } else { CitationStatus::Failed },
            rung: None,
            attempts: total_attempts,
            last_status,
            error: last_error,
        }
    }
}

// ============================================================================
// SECTION: Validator Tool
// ============================================================================

/// Black-box citation validator tool wrapping the ladder.
pub struct CitationValidatorTool {
    /// Validation ladder.
    ladder: CitationLadder,
}

impl CitationValidatorTool {
    /// Creates the validator tool.
    #[must_use]
    pub const fn new(ladder: CitationLadder) -> Self {
        Self {
            ladder,
        }
    }
}

impl Tool for CitationValidatorTool {
    fn name(&self) -> &'static str {
        "citation_validator"
    }

    fn execute(&self, args: &Value) -> ToolResult<Value> {
        let Some(urls) = args.get("urls").and_then(Value::as_array) else {
            return ToolResult::Err(ToolFailure {
                code: "INVALID_ARGS".to_string(),
                message: "citation_validator requires a urls array".to_string(),
                details: None,
            });
        };
        let mut records = Vec::with_capacity(urls.len());
        let mut blocked = Vec::new();
        for url in urls {
            let Some(url) = url.as_str() else {
                return ToolResult::Err(ToolFailure {
                    code: "INVALID_ARGS".to_string(),
                    message: "urls entries must be strings".to_string(),
                    details: None,
                });
            };
            let record = self.ladder.validate(url);
            if record.status == CitationStatus::Blocked {
                blocked.push(url.to_string());
            }
            records.push(record);
        }
        match serde_json::to_value(&records) {
            Ok(records_value) => ToolResult::Ok(json!({
                "records": records_value,
                "blocked": blocked,
            })),
            Err(err) => ToolResult::Err(ToolFailure {
                code: "SERIALIZATION".to_string(),
                message: err.to_string(),
                details: None,
            }),
        }
    }
}

// ============================================================================
// SECTION: Pivot Analyzer Tool
// ============================================================================

/// Deterministic pivot analyzer producing follow-up angles from wave-1
/// coverage.
#[derive(Debug, Clone, Copy, Default)]
pub struct PivotAnalyzerTool;

impl Tool for PivotAnalyzerTool {
    fn name(&self) -> &'static str {
        "pivot_analyzer"
    }

    fn execute(&self, args: &Value) -> ToolResult<Value> {
        let Some(perspectives) = args.get("perspectives").and_then(Value::as_array) else {
            return ToolResult::Err(ToolFailure {
                code: "INVALID_ARGS".to_string(),
                message: "pivot_analyzer requires a perspectives array".to_string(),
                details: None,
            });
        };
        let followups: Vec<Value> = perspectives
            .iter()
            .filter_map(|perspective| {
                let title = perspective.get("title").and_then(Value::as_str)?;
                let domain = perspective.get("domain").and_then(Value::as_str)?;
                Some(json!({
                    "title": format!("{title}: primary sources"),
                    "domain": domain,
                    "track": "independent",
                    "questions": [
                        format!("Corroborate the key claims under \"{title}\" with primary sources."),
                        format!("Identify disagreements between sources covering \"{title}\"."),
                    ],
                }))
            })
            .collect();
        ToolResult::Ok(json!({
            "followups": followups,
        }))
    }
}

// ============================================================================
// SECTION: Wave-2 Planner Tool
// ============================================================================

/// Deterministic wave-2 planner turning follow-ups into candidate angles.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wave2PlannerTool;

impl Tool for Wave2PlannerTool {
    fn name(&self) -> &'static str {
        "wave2_planner"
    }

    fn execute(&self, args: &Value) -> ToolResult<Value> {
        let Some(followups) = args.get("followups").and_then(Value::as_array) else {
            return ToolResult::Err(ToolFailure {
                code: "INVALID_ARGS".to_string(),
                message: "wave2_planner requires a followups array".to_string(),
                details: None,
            });
        };
        let max_agents = args.get("max_agents").and_then(Value::as_u64).unwrap_or(u64::MAX);
        let candidates: Vec<Value> = followups
            .iter()
            .take(usize::try_from(max_agents).unwrap_or(usize::MAX))
            .map(|followup| {
                json!({
                    "id": null,
                    "title": followup.get("title").cloned().unwrap_or(Value::Null),
                    "domain": followup.get("domain").cloned().unwrap_or(Value::Null),
                    "track": followup.get("track").cloned().unwrap_or(Value::from("independent")),
                    "agent_type": "researcher",
                    "questions": followup.get("questions").cloned().unwrap_or(Value::Null),
                    "prompt_contract": {
                        "max_words": 1200,
                        "max_sources": 12,
                        "tool_budget": 20,
                        "must_include_sections": ["Findings", "Sources"],
                    },
                })
            })
            .collect();
        ToolResult::Ok(json!({
            "candidates": candidates,
        }))
    }
}
