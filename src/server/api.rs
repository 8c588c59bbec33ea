//! HTTP routes for job submission, inspection, and HITL feedback.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};

use crate::errors::ApiError;
use crate::feedback::Feedback;
use crate::job::{Decision, Job, JobFilter, JobPatch, NewJob, Page, Segment};
use crate::orchestrator::{self, OrchestratorDeps};

use super::state::SharedState;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/:id", get(get_job).patch(patch_job).delete(delete_job))
        .route("/jobs/:id/feedback", post(submit_feedback))
        .route("/jobs/:id/events", get(super::ws::events_handler))
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct CreateJobRequest {
    title: String,
    domain: String,
    division: String,
    proposal_content: String,
    #[serde(default)]
    segments: Vec<Segment>,
    #[serde(default)]
    hitl_stages: Vec<u8>,
}

async fn create_job(
    State(state): State<SharedState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.proposal_content.trim().is_empty() && req.segments.is_empty() {
        return Err(ApiError::BadRequest(
            "proposal_content or segments is required".to_string(),
        ));
    }
    if let Some(index) = req.segments.iter().position(|s| s.content.trim().is_empty()) {
        return Err(ApiError::BadRequest(format!(
            "segment {index} has no content"
        )));
    }

    let job_id = state
        .store
        .create_job(NewJob {
            title: req.title,
            domain: req.domain,
            division: req.division,
            proposal_content: req.proposal_content,
            segments: req.segments,
            hitl_stages: req.hitl_stages,
        })
        .await
        .map_err(ApiError::from)?;

    orchestrator::spawn_job(
        job_id,
        OrchestratorDeps {
            store: state.store.clone(),
            feedback: state.feedback.clone(),
            effects: state.effects.clone(),
            config: state.config.clone(),
        },
    );

    let job = state.store.get_job(job_id).await.map_err(ApiError::from)?;
    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
    human_decision: Option<String>,
    llm_decision: Option<String>,
    q: Option<String>,
    offset: Option<i64>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct JobList {
    jobs: Vec<Job>,
}

async fn list_jobs(
    State(state): State<SharedState>,
    Query(params): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let parse_decision = |s: &Option<String>| -> Result<Option<Decision>, ApiError> {
        s.as_deref()
            .map(|v| v.parse().map_err(|_| ApiError::BadRequest(format!("invalid decision: {v}"))))
            .transpose()
    };

    let filter = JobFilter {
        status: params.status,
        human_decision: parse_decision(&params.human_decision)?,
        llm_decision: parse_decision(&params.llm_decision)?,
        query: params.q,
    };
    let page = Page {
        offset: params.offset.unwrap_or(0),
        limit: params.limit.unwrap_or(50),
    };

    let jobs = state.store.list_jobs(filter, page).await.map_err(ApiError::from)?;
    Ok(Json(JobList { jobs }))
}

async fn get_job(State(state): State<SharedState>, Path(id): Path<i64>) -> Result<impl IntoResponse, ApiError> {
    let job = state.store.get_job(id).await.map_err(ApiError::from)?;
    Ok(Json(job))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchJobRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    division: Option<String>,
    #[serde(default)]
    proposal_content: Option<String>,
    #[serde(default)]
    hitl_stages: Option<Vec<u8>>,
    #[serde(default)]
    human_decision: Option<String>,
}

async fn patch_job(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<PatchJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let human_decision = req
        .human_decision
        .as_deref()
        .map(|v| v.parse().map_err(|_| ApiError::BadRequest(format!("invalid decision: {v}"))))
        .transpose()?;

    let job = state
        .store
        .update_job(
            id,
            JobPatch {
                title: req.title,
                domain: req.domain,
                division: req.division,
                proposal_content: req.proposal_content,
                hitl_stages: req.hitl_stages,
                human_decision,
                ..Default::default()
            },
        )
        .await
        .map_err(ApiError::from)?;
    Ok(Json(job))
}

async fn delete_job(State(state): State<SharedState>, Path(id): Path<i64>) -> Result<impl IntoResponse, ApiError> {
    state.store.delete_job(id).await.map_err(ApiError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct FeedbackRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    skip: bool,
}

async fn submit_feedback(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<FeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Existence check so feedback posted against an unknown job 404s rather
    // than silently populating an inbox slot nothing will ever read.
    state.store.get_job(id).await.map_err(ApiError::from)?;
    state.feedback.publish(
        id,
        Feedback {
            text: req.text,
            skip: req.skip,
        },
    );
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::mock::{MockLlm, MockRetrieval};
    use crate::job::store::{SqliteStore, Store};
    use crate::progress::ProgressHub;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let progress = Arc::new(ProgressHub::new());
        Arc::new(super::super::state::AppState {
            store: Store::new(SqliteStore::open_in_memory().unwrap()),
            progress: progress.clone(),
            feedback: Arc::new(crate::feedback::FeedbackInbox::new()),
            effects: crate::effects::Effects {
                llm: Arc::new(MockLlm::new(vec![
                    "objective", "data", "risk", "roi", "<div>r</div>",
                    "{\"decision\": \"approved\", \"reason\": \"ok\"}",
                ])),
                retrieval: Arc::new(MockRetrieval::with_records(vec![])),
                progress,
            },
            config: Arc::new(crate::config::Config {
                data_dir: std::env::temp_dir(),
                db_path: std::env::temp_dir().join("unused.db"),
                listen_addr: "127.0.0.1".into(),
                port: 0,
                llm_timeout_secs: 5,
                retrieval_timeout_secs: 5,
                feedback_timeout_secs: 1,
                retrieval_k: 5,
                prompt_truncate_chars: 800,
                log_format: crate::config::LogFormat::Pretty,
            }),
        })
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let app = api_router().with_state(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_job_returns_201_and_persists() {
        let app = api_router().with_state(test_state());
        let body = serde_json::json!({
            "title": "title",
            "domain": "제조",
            "division": "메모리",
            "proposal_content": "운영 효율 개선",
        });
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let job: Job = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(job.title, "title");
        assert_eq!(job.status, "pending");
    }

    #[tokio::test]
    async fn get_missing_job_returns_404() {
        let app = api_router().with_state(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/jobs/999").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn feedback_on_missing_job_returns_404() {
        let app = api_router().with_state(test_state());
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/jobs/999/feedback")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"skip\": true}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
