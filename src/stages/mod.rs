//! Stage Library (C6): six stage implementations sharing a common
//! contract. Every stage is a pure function `(job_snapshot, upstream, bp)
//! -> (text, quality)` plus the injected [`Effects`] handle; no stage
//! module imports another stage module (§9).

pub mod review;

use std::collections::BTreeMap;

use crate::effects::{CompleteOptions, Effects, RetrievalMethod, RetrieveOptions};
use crate::errors::OrchestratorError;
use crate::job::{BestPracticeRecord, Job, StageOutput};
use crate::progress::ProgressEvent;

/// Accumulated context threaded through one segment's stage sequence.
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    pub bp: Vec<BestPracticeRecord>,
    /// Keyed by `StageKey::agent_name()`.
    pub upstream: BTreeMap<String, StageOutput>,
    /// HITL feedback text to incorporate into a stage's regeneration prompt,
    /// keyed by stage number.
    pub user_feedback: BTreeMap<u8, String>,
}

/// Clip an upstream text input to a fixed character budget to cap token
/// usage (§4.4). Never emits more than `budget` characters.
pub fn truncate_for_prompt(text: &str, budget: usize) -> String {
    text.chars().take(budget).collect()
}

/// Compact, opaque-to-the-orchestrator serialization of BP records for
/// prompt context.
pub fn serialize_bp_records(records: &[BestPracticeRecord]) -> String {
    records
        .iter()
        .map(|r| format!("- {} : {}", r.title, r.summary))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fixed stub list substituted when the retrieval gateway fails, so the
/// pipeline can proceed degraded (§4.4 stage 1).
pub fn stub_bp_records() -> Vec<BestPracticeRecord> {
    vec![BestPracticeRecord {
        title: "일반 제조 공정 개선 사례".to_string(),
        tech_type: "프로세스 자동화".to_string(),
        business_domain: "제조".to_string(),
        division: "공통".to_string(),
        problem_as_was: "수작업 공정으로 인한 지연".to_string(),
        solution_to_be: "자동화 라인 도입".to_string(),
        summary: "대표적인 제조 효율화 벤치마크".to_string(),
        tips: None,
        link: None,
    }]
}

/// Stage 1 (Retrieval / BP Scouter). Never subject to HITL. On gateway
/// failure, substitutes [`stub_bp_records`] and still emits `bp_cases`.
pub async fn run_retrieval_stage(
    job: &Job,
    effects: &Effects,
    retrieval_k: usize,
) -> Vec<BestPracticeRecord> {
    let query = format!("{} {} {}", job.domain, job.division, job.proposal_content);
    let records = effects
        .retrieval
        .retrieve(
            &query,
            RetrieveOptions {
                k: retrieval_k,
                method: RetrievalMethod::Rrf,
            },
        )
        .await
        .unwrap_or_else(|_| stub_bp_records());

    effects.progress.emit(
        job.job_id,
        ProgressEvent::BpCases {
            records: records.clone(),
        },
    );
    records
}

/// Stage 6 (Final synthesis). Consumes stages 2-5 plus BP records,
/// produces an accordion-structured HTML report, and classifies the
/// segment's decision.
///
/// Like stages 2-5, a primary LLM failure here is fatal and propagated;
/// only the secondary classification call (§4.9) defaults on failure.
pub async fn run_final_stage(
    job: &Job,
    ctx: &StageContext,
    effects: &Effects,
    truncate_budget: usize,
) -> Result<StageOutput, OrchestratorError> {
    use crate::job::StageKey;

    let sections: Vec<(&str, String)> = [
        StageKey::ObjectiveReviewer,
        StageKey::DataFeasibility,
        StageKey::Risk,
        StageKey::Roi,
    ]
    .into_iter()
    .map(|key| {
        let text = match ctx.upstream.get(key.agent_name()) {
            Some(StageOutput::Text(t)) => t.clone(),
            _ => String::new(),
        };
        (key.agent_name(), truncate_for_prompt(&text, truncate_budget))
    })
    .collect();

    let prompt = format!(
        "Synthesize a final review report from the following stage outputs and Best-Practice \
         context. Produce accordion-structured HTML with a summary section followed by one \
         section per stage.\n\nBest-Practice records:\n{}\n\n{}",
        serialize_bp_records(&ctx.bp),
        sections
            .iter()
            .map(|(name, text)| format!("## {name}\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    );

    let report_html = effects
        .llm
        .complete(&prompt, CompleteOptions::default())
        .await
        .map_err(|e| OrchestratorError::LlmFailed {
            stage: StageKey::FinalGenerator.agent_name().to_string(),
            message: e.to_string(),
        })?;

    let (decision, reason) =
        crate::decision::classify_final_decision(effects.llm.as_ref(), &report_html).await;

    Ok(StageOutput::Final {
        report_html,
        llm_decision: decision,
        decision_reason: reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::mock::{effects, MockLlm, MockRetrieval};
    use crate::job::{Decision, Job, MetadataBag};
    use chrono::Utc;

    fn test_job() -> Job {
        Job {
            job_id: 1,
            title: "title".into(),
            domain: "manufacturing".into(),
            division: "memory".into(),
            proposal_content: "proposal text".into(),
            segments: vec![],
            hitl_stages: vec![],
            status: "pending".into(),
            human_decision: Decision::Pending,
            llm_decision: Decision::Pending,
            metadata: MetadataBag::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn truncate_never_exceeds_budget() {
        let long = "x".repeat(5000);
        assert_eq!(truncate_for_prompt(&long, 800).chars().count(), 800);
    }

    #[test]
    fn truncate_is_a_no_op_under_budget() {
        assert_eq!(truncate_for_prompt("short", 800), "short");
    }

    #[tokio::test]
    async fn retrieval_stage_falls_back_to_stub_on_gateway_failure() {
        let fx = effects(MockLlm::new(vec![]), MockRetrieval::failing());
        let job = test_job();
        let mut rx = fx.progress.subscribe(job.job_id);
        let records = run_retrieval_stage(&job, &fx, 5).await;
        assert_eq!(records, stub_bp_records());
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ProgressEvent::BpCases { .. }));
    }

    #[tokio::test]
    async fn retrieval_stage_uses_gateway_records_on_success() {
        let record = BestPracticeRecord {
            title: "실제 사례".into(),
            tech_type: "AI".into(),
            business_domain: "제조".into(),
            division: "메모리".into(),
            problem_as_was: "p".into(),
            solution_to_be: "s".into(),
            summary: "sum".into(),
            tips: None,
            link: None,
        };
        let fx = effects(
            MockLlm::new(vec![]),
            MockRetrieval::with_records(vec![record.clone()]),
        );
        let job = test_job();
        let records = run_retrieval_stage(&job, &fx, 5).await;
        assert_eq!(records, vec![record]);
    }

    #[tokio::test]
    async fn final_stage_classifies_decision_from_report() {
        let fx = effects(
            MockLlm::new(vec![
                "<div>report</div>",
                "{\"decision\": \"approved\", \"reason\": \"ok\"}",
            ]),
            MockRetrieval::with_records(vec![]),
        );
        let job = test_job();
        let ctx = StageContext::default();
        let output = run_final_stage(&job, &ctx, &fx, 800).await.unwrap();
        match output {
            StageOutput::Final {
                llm_decision,
                decision_reason,
                ..
            } => {
                assert_eq!(llm_decision, Decision::Approved);
                assert_eq!(decision_reason, "ok");
            }
            _ => panic!("expected StageOutput::Final"),
        }
    }
}
