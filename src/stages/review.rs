//! Stages 2-5 (Objective, Data feasibility, Risk, ROI). All four share one
//! shape: evaluate the proposal and BP context from a fixed focus area,
//! optionally incorporating HITL feedback into a regeneration prompt.

use crate::effects::{CompleteOptions, Effects};
use crate::errors::OrchestratorError;
use crate::job::{Job, StageKey};

use super::{serialize_bp_records, truncate_for_prompt, StageContext};

impl StageKey {
    /// Fixed evaluation focus for stages 2-5. Stage 1 and 6 have their own
    /// prompt builders and are not represented here.
    fn focus_description(&self) -> &'static str {
        match self {
            Self::ObjectiveReviewer => {
                "goal clarity, strategic alignment, and feasibility of stated objectives"
            }
            Self::DataFeasibility => "data availability, expected quality, and accessibility",
            Self::Risk => "technical, schedule, and personnel risks",
            Self::Roi => "expected benefit and investment ratio",
            Self::BpScouter | Self::FinalGenerator => {
                unreachable!("stages 1 and 6 have dedicated prompt builders")
            }
        }
    }
}

/// Build the prompt for one regeneration of stage `kind`. Exposed
/// separately from `run_review_stage` so prompt content can be asserted on
/// directly in tests without a mock LLM round-trip.
pub fn build_review_prompt(
    kind: StageKey,
    job: &Job,
    ctx: &StageContext,
    truncate_budget: usize,
) -> String {
    let proposal = truncate_for_prompt(&job.proposal_content, truncate_budget);
    let bp = serialize_bp_records(&ctx.bp);
    let mut prompt = format!(
        "You are reviewing a proposal for {}.\n\nProposal:\n{proposal}\n\nBest-Practice context:\n{bp}\n",
        kind.focus_description(),
    );
    if let Some(feedback) = ctx.user_feedback.get(&kind.number()) {
        prompt.push_str(&format!(
            "\nThe human reviewer previously requested this revision: {feedback}\n"
        ));
    }
    prompt
}

/// Run one stage-2..5 invocation: build the prompt and call the LLM.
///
/// The LLM gateway already retries once on transient failure (§7); a
/// second failure here is a primary-stage LLM failure and is propagated so
/// the orchestrator can emit `error` and abort the segment, rather than
/// silently degrading like the retrieval or quality-gate fallbacks do.
pub async fn run_review_stage(
    kind: StageKey,
    job: &Job,
    ctx: &StageContext,
    effects: &Effects,
    truncate_budget: usize,
) -> Result<String, OrchestratorError> {
    let prompt = build_review_prompt(kind, job, ctx, truncate_budget);
    effects
        .llm
        .complete(&prompt, CompleteOptions::default())
        .await
        .map_err(|e| OrchestratorError::LlmFailed {
            stage: kind.agent_name().to_string(),
            message: e.to_string(),
        })
}
