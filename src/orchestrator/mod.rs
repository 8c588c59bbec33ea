//! Review Orchestrator (C7): drives a job through the stages, owns HITL
//! gating, the bounded retry loop, metadata merge, and multi-segment
//! fanout. Each job's orchestration runs on its own independent
//! asynchronous task, spawned by the submission handler immediately after
//! the job is created.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument};

use crate::config::Config;
use crate::effects::Effects;
use crate::errors::OrchestratorError;
use crate::feedback::FeedbackInbox;
use crate::job::store::Store;
use crate::job::{Decision, Job, JobPatch, MetadataBag, Segment, SegmentReport, StageKey, StageOutput};
use crate::progress::{PageStatus, ProgressEvent};
use crate::quality::assess_quality;
use crate::stages::review::run_review_stage;
use crate::stages::{run_final_stage, run_retrieval_stage, StageContext};

pub const MAX_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct OrchestratorDeps {
    pub store: Store,
    pub feedback: Arc<FeedbackInbox>,
    pub effects: Effects,
    pub config: Arc<Config>,
}

struct SegmentOutcome {
    report: String,
    decision: Decision,
    reason: String,
}

/// Run the full orchestration for one job: every segment in order, each
/// through the six stages, persisting and streaming as it goes. Spawned as
/// a fire-and-forget task by the submission handler.
#[instrument(skip(deps), fields(job_id = job_id))]
pub async fn run_job(job_id: i64, deps: OrchestratorDeps) {
    if let Err(e) = run_job_inner(job_id, &deps).await {
        error!(job_id, error = %e, "job orchestration failed");
        deps.effects.progress.emit(
            job_id,
            ProgressEvent::Error {
                message: e.to_string(),
            },
        );
        let _ = deps
            .store
            .update_job(
                job_id,
                JobPatch {
                    status: Some("error".to_string()),
                    ..Default::default()
                },
            )
            .await;
        deps.effects.progress.teardown(job_id);
    }
}

async fn run_job_inner(job_id: i64, deps: &OrchestratorDeps) -> Result<(), OrchestratorError> {
    let job = deps.store.get_job(job_id).await?;
    let segments = effective_segments(&job);
    let total = segments.len();

    let mut reports: Vec<SegmentReport> = Vec::with_capacity(total);

    for (i, segment) in segments.iter().enumerate() {
        let current = i + 1;
        deps.effects.progress.emit(
            job_id,
            ProgressEvent::PageProgress {
                job_id,
                current,
                total,
                status: PageStatus::Processing,
                page_title: Some(segment.title.clone()),
            },
        );

        let outcome = run_segment(job_id, &job, segment, deps).await?;

        reports.push(SegmentReport {
            id: segment.id.clone(),
            title: segment.title.clone(),
            report: outcome.report.clone(),
            decision: outcome.decision,
            reason: outcome.reason.clone(),
        });

        deps.store
            .update_job(
                job_id,
                JobPatch {
                    metadata: Some(MetadataBag {
                        segment_reports: reports.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await?;

        deps.effects.progress.emit(
            job_id,
            ProgressEvent::PageCompleted {
                current,
                total,
                page_title: segment.title.clone(),
                page_id: segment.id.clone(),
                page_report: outcome.report.clone(),
                page_decision: outcome.decision,
                page_decision_reason: outcome.reason.clone(),
            },
        );
    }

    // The job's top-level decision mirrors the last segment's synthesis
    // (open question (a), resolved in DESIGN.md): each segment is reviewed
    // independently and a single-segment job has exactly one verdict.
    let last = reports
        .last()
        .ok_or_else(|| OrchestratorError::Other(anyhow::anyhow!("job has no segments to review")))?;
    let final_decision = last.decision;
    let final_reason = last.reason.clone();
    let final_report = last.report.clone();
    let decisions: Vec<Decision> = reports.iter().map(|r| r.decision).collect();

    deps.store
        .update_job(
            job_id,
            JobPatch {
                status: Some("completed".to_string()),
                llm_decision: Some(final_decision),
                metadata: Some(MetadataBag {
                    report: Some(final_report.clone()),
                    final_decision: Some(crate::job::FinalDecision {
                        decision: final_decision,
                        reason: final_reason.clone(),
                    }),
                    segment_reports: reports,
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await?;

    deps.effects.progress.emit(
        job_id,
        ProgressEvent::Completed {
            report: final_report,
            decision: final_decision,
            decision_reason: final_reason,
            decisions,
        },
    );
    deps.effects.progress.teardown(job_id);
    Ok(())
}

/// A job with no explicit segments is reviewed as a single segment over
/// its whole `proposal_content`.
fn effective_segments(job: &Job) -> Vec<Segment> {
    if job.segments.is_empty() {
        vec![Segment {
            id: "0".to_string(),
            title: job.title.clone(),
            content: job.proposal_content.clone(),
        }]
    } else {
        job.segments.clone()
    }
}

async fn run_segment(
    job_id: i64,
    job: &Job,
    segment: &Segment,
    deps: &OrchestratorDeps,
) -> Result<SegmentOutcome, OrchestratorError> {
    // Stages operate over the segment's own content; everything else about
    // the job (domain, division, hitl_stages) is shared across segments.
    let segment_job = Job {
        proposal_content: segment.content.clone(),
        ..job.clone()
    };

    let mut ctx = StageContext::default();

    emit_agent_status(deps, job_id, StageKey::BpScouter, PageStatus::Processing, None);
    let bp = run_retrieval_stage(&segment_job, &deps.effects, deps.config.retrieval_k).await;
    ctx.bp = bp.clone();
    persist_stage_result(job_id, deps, StageKey::BpScouter, StageOutput::Records(bp)).await?;
    emit_agent_status(deps, job_id, StageKey::BpScouter, PageStatus::Completed, None);

    for key in [
        StageKey::ObjectiveReviewer,
        StageKey::DataFeasibility,
        StageKey::Risk,
        StageKey::Roi,
    ] {
        let result = stage_loop(job_id, key, &segment_job, &mut ctx, deps).await?;
        ctx.upstream
            .insert(key.agent_name().to_string(), StageOutput::Text(result));
    }

    let final_output = stage_loop_final(job_id, &segment_job, &mut ctx, deps).await?;
    match final_output {
        StageOutput::Final {
            report_html,
            llm_decision,
            decision_reason,
        } => Ok(SegmentOutcome {
            report: report_html,
            decision: llm_decision,
            reason: decision_reason,
        }),
        _ => unreachable!("final stage always produces StageOutput::Final"),
    }
}

/// Persist one stage's result into `metadata.agent_results[key]`. Must
/// complete before the next stage starts (§4.5 durability invariant).
async fn persist_stage_result(
    job_id: i64,
    deps: &OrchestratorDeps,
    key: StageKey,
    output: StageOutput,
) -> Result<(), OrchestratorError> {
    let mut bag = MetadataBag::default();
    bag.agent_results.insert(key.agent_name().to_string(), output);
    deps.store
        .update_job(
            job_id,
            JobPatch {
                status: Some(key.status_label().to_string()),
                metadata: Some(bag),
                ..Default::default()
            },
        )
        .await?;
    Ok(())
}

/// The bounded HITL retry loop for stages 2-5 (§4.5 `stage_loop`).
async fn stage_loop(
    job_id: i64,
    key: StageKey,
    job: &Job,
    ctx: &mut StageContext,
    deps: &OrchestratorDeps,
) -> Result<String, OrchestratorError> {
    deps.feedback.reset(job_id);
    let mut attempt = 0u32;

    loop {
        emit_agent_status(deps, job_id, key, PageStatus::Processing, None);
        let result =
            run_review_stage(key, job, ctx, &deps.effects, deps.config.prompt_truncate_chars).await?;
        persist_stage_result(job_id, deps, key, StageOutput::Text(result.clone())).await?;
        emit_agent_status(deps, job_id, key, PageStatus::Completed, None);

        if !job.hitl_stages.contains(&key.number()) {
            return Ok(result);
        }

        let quality = assess_quality(deps.effects.llm.as_ref(), key.agent_name(), &result).await;
        deps.effects.progress.emit(
            job_id,
            ProgressEvent::Interrupt {
                job_id,
                agent: key.agent_name().to_string(),
                results: result.clone(),
                feedback_suggestion: quality.suggestion,
                quality_issues: quality.issues,
            },
        );

        let fb = deps
            .feedback
            .await_feedback(job_id, Duration::from_secs(deps.config.feedback_timeout_secs))
            .await;

        if fb.is_effectively_skip() {
            return Ok(result);
        }
        if attempt >= MAX_RETRIES {
            return Ok(result);
        }
        attempt += 1;
        ctx.user_feedback.insert(key.number(), fb.text.unwrap_or_default());
        deps.feedback.reset(job_id);
    }
}

/// The HITL retry loop for stage 6, mirroring `stage_loop` but over the
/// `StageOutput::Final` shape.
async fn stage_loop_final(
    job_id: i64,
    job: &Job,
    ctx: &mut StageContext,
    deps: &OrchestratorDeps,
) -> Result<StageOutput, OrchestratorError> {
    let key = StageKey::FinalGenerator;
    deps.feedback.reset(job_id);
    let mut attempt = 0u32;

    loop {
        emit_agent_status(deps, job_id, key, PageStatus::Processing, None);
        let result = run_final_stage(job, ctx, &deps.effects, deps.config.prompt_truncate_chars).await?;
        persist_stage_result(job_id, deps, key, result.clone()).await?;
        emit_agent_status(deps, job_id, key, PageStatus::Completed, None);

        if !job.hitl_stages.contains(&key.number()) {
            return Ok(result);
        }

        let report_text = match &result {
            StageOutput::Final { report_html, .. } => report_html.clone(),
            _ => String::new(),
        };
        let quality = assess_quality(deps.effects.llm.as_ref(), key.agent_name(), &report_text).await;
        deps.effects.progress.emit(
            job_id,
            ProgressEvent::Interrupt {
                job_id,
                agent: key.agent_name().to_string(),
                results: report_text,
                feedback_suggestion: quality.suggestion,
                quality_issues: quality.issues,
            },
        );

        let fb = deps
            .feedback
            .await_feedback(job_id, Duration::from_secs(deps.config.feedback_timeout_secs))
            .await;

        if fb.is_effectively_skip() {
            return Ok(result);
        }
        if attempt >= MAX_RETRIES {
            return Ok(result);
        }
        attempt += 1;
        ctx.user_feedback.insert(key.number(), fb.text.unwrap_or_default());
        deps.feedback.reset(job_id);
    }
}

fn emit_agent_status(
    deps: &OrchestratorDeps,
    job_id: i64,
    key: StageKey,
    status: PageStatus,
    message: Option<String>,
) {
    deps.effects.progress.emit(
        job_id,
        ProgressEvent::StageStatus {
            agent: key.agent_name().to_string(),
            status,
            message,
        },
    );
    info!(job_id, agent = key.agent_name(), ?status, "stage status");
}

/// Spawn a job's orchestration on its own task, matching the "submission
/// never blocks on orchestration" requirement (§4.5).
pub fn spawn_job(job_id: i64, deps: OrchestratorDeps) {
    tokio::spawn(async move { run_job(job_id, deps).await });
}
