//! The effects interface injected into every stage: `{llm, retrieval,
//! progress}` (§9 design note). Stages are pure functions over
//! `(job_snapshot, upstream, bp)` plus this handle; no stage imports
//! another stage, and tests substitute deterministic mocks here instead of
//! depending on real LLM non-determinism.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::OrchestratorError;
use crate::job::BestPracticeRecord;

#[derive(Debug, Clone, Default)]
pub struct CompleteOptions {
    pub enable_sequential_thinking: bool,
    pub use_tool_search: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMethod {
    Rrf,
    Bm25,
    Knn,
    Cc,
}

impl Default for RetrievalMethod {
    fn default() -> Self {
        Self::Rrf
    }
}

#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub k: usize,
    pub method: RetrievalMethod,
}

/// C1: single request/response text completion.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        opts: CompleteOptions,
    ) -> Result<String, OrchestratorError>;
}

/// C2: given a query and domain tags, return ranked Best-Practice records.
#[async_trait]
pub trait RetrievalGateway: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        opts: RetrieveOptions,
    ) -> Result<Vec<BestPracticeRecord>, OrchestratorError>;
}

/// Real LLM gateway, speaking to an HTTP completion endpoint. One retry on
/// transient failure, matching §7's "primary LLM calls get at most one
/// in-stage retry on transient failure."
pub struct HttpLlmGateway {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpLlmGateway {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }

    async fn complete_once(
        &self,
        prompt: &str,
        opts: &CompleteOptions,
    ) -> Result<String, OrchestratorError> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            prompt: &'a str,
            enable_sequential_thinking: bool,
            use_tool_search: bool,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            text: String,
        }

        let resp = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&self.endpoint)
                .json(&Req {
                    prompt,
                    enable_sequential_thinking: opts.enable_sequential_thinking,
                    use_tool_search: opts.use_tool_search,
                })
                .send(),
        )
        .await
        .map_err(|_| OrchestratorError::LlmFailed {
            stage: "llm".into(),
            message: "request timed out".into(),
        })?
        .map_err(|e| OrchestratorError::LlmFailed {
            stage: "llm".into(),
            message: e.to_string(),
        })?;

        let parsed: Resp = resp.json().await.map_err(|e| OrchestratorError::LlmFailed {
            stage: "llm".into(),
            message: format!("invalid response body: {e}"),
        })?;
        Ok(parsed.text)
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn complete(
        &self,
        prompt: &str,
        opts: CompleteOptions,
    ) -> Result<String, OrchestratorError> {
        match self.complete_once(prompt, &opts).await {
            Ok(text) => Ok(text),
            Err(_) => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                self.complete_once(prompt, &opts).await
            }
        }
    }
}

/// Real retrieval gateway. Failures are not retried (§7); the caller falls
/// back to the stub Best-Practice set.
pub struct HttpRetrievalGateway {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpRetrievalGateway {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl RetrievalGateway for HttpRetrievalGateway {
    async fn retrieve(
        &self,
        query: &str,
        opts: RetrieveOptions,
    ) -> Result<Vec<BestPracticeRecord>, OrchestratorError> {
        let method = match opts.method {
            RetrievalMethod::Rrf => "rrf",
            RetrievalMethod::Bm25 => "bm25",
            RetrievalMethod::Knn => "knn",
            RetrievalMethod::Cc => "cc",
        };
        let resp = tokio::time::timeout(
            self.timeout,
            self.client
                .get(&self.endpoint)
                .query(&[("q", query), ("k", &opts.k.to_string()), ("method", method)])
                .send(),
        )
        .await
        .map_err(|_| OrchestratorError::Other(anyhow::anyhow!("retrieval request timed out")))?
        .map_err(|e| OrchestratorError::Other(anyhow::anyhow!(e)))?;

        resp.json::<Vec<BestPracticeRecord>>()
            .await
            .map_err(|e| OrchestratorError::Other(anyhow::anyhow!(e)))
    }
}

/// The bundle of effects handed to each stage invocation.
#[derive(Clone)]
pub struct Effects {
    pub llm: Arc<dyn LlmGateway>,
    pub retrieval: Arc<dyn RetrievalGateway>,
    pub progress: Arc<crate::progress::ProgressHub>,
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    #[tokio::test]
    async fn mock_llm_returns_queued_responses_in_order() {
        let mock = MockLlm::new(vec!["first", "second"]);
        let first = mock.complete("p", CompleteOptions::default()).await.unwrap();
        let second = mock.complete("p", CompleteOptions::default()).await.unwrap();
        assert_eq!(first, "first");
        assert_eq!(second, "second");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_retrieval_failing_returns_error() {
        let mock = MockRetrieval::failing();
        let result = mock
            .retrieve("q", RetrieveOptions { k: 5, method: RetrievalMethod::Rrf })
            .await;
        assert!(result.is_err());
    }
}
