//! Domain types for a proposal review job.
//!
//! A [`Job`] is the durable record driven through the review pipeline by the
//! orchestrator. `JobStatus`, `Decision`, and `StageKey` are stored as plain
//! TEXT columns in the store, so each follows the `as_str()`/`from_str()`
//! pattern rather than relying solely on a serde string representation.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// One independently reviewable unit of a submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Segment {
    pub id: String,
    pub title: String,
    pub content: String,
}

/// Machine-inferred or human-recorded approve/hold verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    #[default]
    Pending,
    Approved,
    OnHold,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::OnHold => "on-hold",
        }
    }
}

impl FromStr for Decision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "on-hold" => Ok(Self::OnHold),
            other => Err(anyhow::anyhow!("unknown decision: {other}")),
        }
    }
}

/// A retrieved exemplar case used as prompt context for stages 2-6.
/// Opaque to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BestPracticeRecord {
    pub title: String,
    pub tech_type: String,
    pub business_domain: String,
    pub division: String,
    pub problem_as_was: String,
    pub solution_to_be: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tips: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Output produced by one stage for one segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StageOutput {
    /// Stage 1 (retrieval): the ordered list of records returned to later stages.
    Records(Vec<BestPracticeRecord>),
    /// Stages 2-5: free-form review text.
    Text(String),
    /// Stage 6 (final synthesis).
    Final {
        report_html: String,
        llm_decision: Decision,
        decision_reason: String,
    },
}

/// One entry of `metadata.segment_reports`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentReport {
    pub id: String,
    pub title: String,
    pub report: String,
    pub decision: Decision,
    pub reason: String,
}

/// The structured metadata bag. Top-level keys overwrite on patch except
/// `agent_results`, which is merged key-wise (patch wins per name) — the
/// only non-trivial merge rule in the store.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MetadataBag {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agent_results: BTreeMap<String, StageOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_decision: Option<FinalDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hitl_stages: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segment_reports: Vec<SegmentReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalDecision {
    pub decision: Decision,
    pub reason: String,
}

impl MetadataBag {
    /// Deep-merge a patch into this bag per the §4.1 merge rule: every
    /// top-level field overwrites except `agent_results`, which merges
    /// key-wise with the patch winning per stage name.
    pub fn merge(&mut self, patch: MetadataBag) {
        for (name, output) in patch.agent_results {
            self.agent_results.insert(name, output);
        }
        if patch.final_decision.is_some() {
            self.final_decision = patch.final_decision;
        }
        if patch.report.is_some() {
            self.report = patch.report;
        }
        if !patch.hitl_stages.is_empty() {
            self.hitl_stages = patch.hitl_stages;
        }
        if !patch.segment_reports.is_empty() {
            self.segment_reports = patch.segment_reports;
        }
    }
}

/// Open enumeration of progress labels. The canonical single-segment
/// sequence is `pending -> bp_done -> objective_done -> data_done ->
/// risk_done -> roi_done -> completed`; on any fatal error, `error`. The
/// set is open and values beyond these are permitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus(pub String);

impl JobStatus {
    pub fn pending() -> Self {
        Self("pending".to_string())
    }
    pub fn error() -> Self {
        Self("error".to_string())
    }
    pub fn completed() -> Self {
        Self("completed".to_string())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobStatus {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A durable job record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: i64,
    pub title: String,
    pub domain: String,
    pub division: String,
    pub proposal_content: String,
    pub segments: Vec<Segment>,
    pub hitl_stages: Vec<u8>,
    pub status: String,
    pub human_decision: Decision,
    pub llm_decision: Decision,
    pub metadata: MetadataBag,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create a new job. `job_id`/timestamps/status/decisions
/// are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub title: String,
    pub domain: String,
    pub division: String,
    pub proposal_content: String,
    pub segments: Vec<Segment>,
    pub hitl_stages: Vec<u8>,
}

/// A field-level patch applied by `update_job`. `None` fields are left
/// untouched; `metadata` is deep-merged rather than overwritten.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub title: Option<String>,
    pub domain: Option<String>,
    pub division: Option<String>,
    pub proposal_content: Option<String>,
    pub hitl_stages: Option<Vec<u8>>,
    pub status: Option<String>,
    pub human_decision: Option<Decision>,
    pub llm_decision: Option<Decision>,
    pub metadata: Option<MetadataBag>,
}

/// Filters accepted by the admin list surface.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<String>,
    pub human_decision: Option<Decision>,
    pub llm_decision: Option<Decision>,
    pub query: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self { offset: 0, limit: 50 }
    }
}

/// Stable names for `metadata.agent_results` keys, matching the display
/// names used on the Progress Channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKey {
    BpScouter,
    ObjectiveReviewer,
    DataFeasibility,
    Risk,
    Roi,
    FinalGenerator,
}

impl StageKey {
    pub fn number(&self) -> u8 {
        match self {
            Self::BpScouter => 1,
            Self::ObjectiveReviewer => 2,
            Self::DataFeasibility => 3,
            Self::Risk => 4,
            Self::Roi => 5,
            Self::FinalGenerator => 6,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::BpScouter),
            2 => Some(Self::ObjectiveReviewer),
            3 => Some(Self::DataFeasibility),
            4 => Some(Self::Risk),
            5 => Some(Self::Roi),
            6 => Some(Self::FinalGenerator),
            _ => None,
        }
    }

    pub fn agent_name(&self) -> &'static str {
        match self {
            Self::BpScouter => "BP_Scouter",
            Self::ObjectiveReviewer => "Objective_Reviewer",
            Self::DataFeasibility => "Data_Feasibility",
            Self::Risk => "Risk_Reviewer",
            Self::Roi => "ROI_Reviewer",
            Self::FinalGenerator => "Final_Generator",
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            Self::BpScouter => "bp_done",
            Self::ObjectiveReviewer => "objective_done",
            Self::DataFeasibility => "data_done",
            Self::Risk => "risk_done",
            Self::Roi => "roi_done",
            Self::FinalGenerator => "completed",
        }
    }
}
