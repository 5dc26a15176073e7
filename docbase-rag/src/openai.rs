//! HTTP model backends speaking the OpenAI wire format.
//!
//! Works against the hosted OpenAI API as well as local servers that mimic it
//! (llama.cpp `server`, Ollama, LM Studio). This module is only available
//! when the `openai` feature is enabled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::document::Embedding;
use crate::embedding::{EmbeddingModelLoader, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::inference::CompletionModel;

/// The default base URL, the hosted OpenAI API.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Budget for one embedding request, connection included.
pub const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Endpoint {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl Endpoint {
    fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client: reqwest::Client::new(), base_url, api_key: None }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(self.url(path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

// ── wire types ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: usize,
    temperature: f32,
    stop: &'a [&'a str],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail =
        serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
    format!("server returned {status}: {detail}")
}

// ── embeddings ─────────────────────────────────────────────────────

/// An [`EmbeddingProvider`] calling `POST {base_url}/embeddings`.
///
/// # Example
///
/// ```rust,ignore
/// use docbase_rag::openai::OpenAiEmbeddingProvider;
///
/// let provider = OpenAiEmbeddingProvider::new("http://localhost:8080/v1", "all-minilm", 384)
///     .with_api_key("sk-...");
/// ```
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingProvider {
    endpoint: Endpoint,
    model: String,
    dimensions: usize,
    timeout: Duration,
}

impl OpenAiEmbeddingProvider {
    /// Create a provider for `model` producing `dimensions`-long vectors.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            endpoint: Endpoint::new(base_url),
            model: model.into(),
            dimensions,
            timeout: DEFAULT_EMBEDDING_TIMEOUT,
        }
    }

    /// Authenticate requests with a bearer token.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.endpoint.api_key = Some(api_key.into());
        self
    }

    /// Bound every request, connection included. Defaults to
    /// [`DEFAULT_EMBEDDING_TIMEOUT`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The model name sent with each request.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn failure(&self, message: String) -> RagError {
        RagError::Embedding { provider: self.model.clone(), message }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| self.failure("server returned no embedding".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, batch_size = texts.len(), "requesting embeddings");

        let response = self
            .endpoint
            .post("embeddings")
            .timeout(self.timeout)
            .json(&EmbeddingRequest { model: &self.model, input: texts })
            .send()
            .await
            .map_err(|e| {
                error!(model = %self.model, error = %e, "embedding request failed");
                if e.is_timeout() {
                    RagError::Timeout { operation: "embedding".into(), budget: self.timeout }
                } else if e.is_connect() {
                    RagError::ModelUnavailable { model: self.model.clone(), message: e.to_string() }
                } else {
                    self.failure(format!("request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let detail = error_detail(response).await;
            error!(model = %self.model, %detail, "embedding request rejected");
            return Err(self.failure(detail));
        }

        let mut body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| self.failure(format!("failed to parse response: {e}")))?;
        body.data.sort_by_key(|d| d.index);
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Loads an [`OpenAiEmbeddingProvider`] after one test embedding.
///
/// The test request verifies reachability and the advertised dimension, so a
/// misconfigured server fails at load time with
/// [`RagError::ModelUnavailable`] instead of on the first batch.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingLoader {
    provider: OpenAiEmbeddingProvider,
}

impl OpenAiEmbeddingLoader {
    /// Wrap a configured provider.
    pub fn new(provider: OpenAiEmbeddingProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl EmbeddingModelLoader for OpenAiEmbeddingLoader {
    fn model_name(&self) -> &str {
        &self.provider.model
    }

    fn dimensions(&self) -> usize {
        self.provider.dimensions
    }

    async fn load(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let unavailable = |message: String| RagError::ModelUnavailable {
            model: self.provider.model.clone(),
            message,
        };
        let sample = self.provider.embed("ping").await.map_err(|e| unavailable(e.to_string()))?;
        if sample.len() != self.provider.dimensions {
            return Err(unavailable(format!(
                "server produces {}-dimensional vectors, expected {}",
                sample.len(),
                self.provider.dimensions
            )));
        }
        info!(model = %self.provider.model, url = %self.provider.endpoint.base_url, "embedding server reachable");
        Ok(Arc::new(self.provider.clone()))
    }
}

// ── completions ────────────────────────────────────────────────────

/// A [`CompletionModel`] calling `POST {base_url}/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiCompletionModel {
    endpoint: Endpoint,
    model: String,
    temperature: f32,
}

impl OpenAiCompletionModel {
    /// Create a client for `model`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self { endpoint: Endpoint::new(base_url), model: model.into(), temperature: 0.7 }
    }

    /// Authenticate requests with a bearer token.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.endpoint.api_key = Some(api_key.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl CompletionModel for OpenAiCompletionModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn is_available(&self) -> bool {
        let mut request = self.endpoint.client.get(self.endpoint.url("models"));
        if let Some(key) = &self.endpoint.api_key {
            request = request.bearer_auth(key);
        }
        matches!(
            request.timeout(Duration::from_secs(2)).send().await,
            Ok(response) if response.status().is_success()
        )
    }

    async fn complete(&self, prompt: &str, max_tokens: usize, timeout: Duration) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            prompt,
            max_tokens,
            temperature: self.temperature,
            stop: &["Question:", "\n\n---"],
        };
        let response = self
            .endpoint
            .post("completions")
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(model = %self.model, error = %e, "completion request failed");
                if e.is_timeout() {
                    RagError::Timeout { operation: "completion".into(), budget: timeout }
                } else if e.is_connect() {
                    RagError::ModelUnavailable { model: self.model.clone(), message: e.to_string() }
                } else {
                    RagError::Inference { model: self.model.clone(), message: e.to_string() }
                }
            })?;

        if !response.status().is_success() {
            let detail = error_detail(response).await;
            return Err(RagError::Inference { model: self.model.clone(), message: detail });
        }

        let body: CompletionResponse = response.json().await.map_err(|e| RagError::Inference {
            model: self.model.clone(),
            message: format!("failed to parse response: {e}"),
        })?;
        body.choices.into_iter().next().map(|c| c.text).ok_or_else(|| RagError::Inference {
            model: self.model.clone(),
            message: "server returned no choices".into(),
        })
    }
}
