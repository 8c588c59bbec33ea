//! HTTP/WS boundary (C8): job submission, inspection, HITL feedback, and
//! the live progress stream.

pub mod api;
pub mod state;
pub mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::effects::Effects;
use crate::feedback::FeedbackInbox;
use crate::job::store::{SqliteStore, Store};
use crate::progress::ProgressHub;

use state::{AppState, SharedState};

pub fn build_router(state: SharedState) -> Router {
    api::api_router().with_state(state).layer(CorsLayer::permissive())
}

/// Open the job store, build shared state, and serve until `Ctrl+C`.
pub async fn start_server(config: Config, effects: Effects) -> Result<()> {
    config.ensure_directories()?;
    let sqlite = SqliteStore::open(&config.db_path).context("failed to open job store")?;
    let store = Store::new(sqlite);

    let state: SharedState = Arc::new(AppState {
        store,
        progress: effects.progress.clone(),
        feedback: Arc::new(FeedbackInbox::new()),
        effects,
        config: Arc::new(config.clone()),
    });

    let app = build_router(state);
    let addr = format!("{}:{}", config.listen_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    tracing::info!(%addr, "proposalgate listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::mock::{MockLlm, MockRetrieval};
    use crate::feedback::FeedbackInbox;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let progress = Arc::new(ProgressHub::new());
        Arc::new(AppState {
            store: Store::new(SqliteStore::open_in_memory().unwrap()),
            progress: progress.clone(),
            feedback: Arc::new(FeedbackInbox::new()),
            effects: Effects {
                llm: Arc::new(MockLlm::new(vec![])),
                retrieval: Arc::new(MockRetrieval::with_records(vec![])),
                progress,
            },
            config: Arc::new(Config {
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
    async fn build_router_serves_health_check() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"ok");
    }
}
