//! Query embedding against an OpenAI-compatible `/embeddings` endpoint.
//!
//! - Applies the configured prompt template to the raw query
//! - Retries rate limits and transient failures with a bounded policy
//! - Verifies the returned vector has the configured dimension

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, EmbeddingConfig, OPENAI_API_KEY_ENV};
use crate::search::retry::{RetryPolicy, Retryable};

/// Task description used by the `instruct-v1` template.
const INSTRUCT_V1_TASK: &str = "Given a movie query, analyze the plot elements and themes to retrieve relevant movie names and descriptions that match the query";

/// How the raw query is wrapped before embedding.
///
/// Catalog vectors and query vectors must be produced with a matching
/// template. Changing it without re-embedding the catalog silently degrades
/// retrieval, so every variant carries a version string that is logged and
/// reported with results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptTemplate {
    /// The query is embedded as typed
    #[default]
    #[serde(rename = "raw")]
    Raw,
    /// `Instruct: {task}\nQuery: {query}`
    #[serde(rename = "instruct-v1")]
    InstructV1,
}

impl PromptTemplate {
    pub fn version(&self) -> &'static str {
        match self {
            PromptTemplate::Raw => "raw",
            PromptTemplate::InstructV1 => "instruct-v1",
        }
    }

    pub fn apply(&self, query: &str) -> String {
        match self {
            PromptTemplate::Raw => query.to_string(),
            PromptTemplate::InstructV1 => format!("Instruct: {INSTRUCT_V1_TASK}\nQuery: {query}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding service rejected credentials: {0}")]
    Unauthenticated(String),

    #[error("embedding service rate limited the request: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("embedding service rejected the input: {0}")]
    MalformedInput(String),

    #[error("embedding service unavailable: {0}")]
    Unavailable(String),

    #[error("embedding service timed out")]
    Timeout,

    #[error("embedding service returned an unexpected response: {0}")]
    MalformedResponse(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        // timeouts and outages surface to the caller instead of eating the request deadline
        matches!(self, EmbeddingError::RateLimited { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            EmbeddingError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EmbeddingError::Timeout
        } else if err.is_decode() {
            EmbeddingError::MalformedResponse(err.to_string())
        } else {
            EmbeddingError::Unavailable(err.to_string())
        }
    }
}

/// Turns query text into a vector.
#[async_trait]
pub trait QueryEmbedder: Send + Sync {
    async fn embed(&self, query: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Length of every vector returned by `embed`.
    fn dimensions(&self) -> usize;

    fn template(&self) -> PromptTemplate {
        PromptTemplate::Raw
    }
}

/// Embeddings client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    template: PromptTemplate,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    /// Builds the client. A blank key fails here, before any request is made.
    pub fn new(api_key: &str, config: &EmbeddingConfig) -> Result<Self, ConfigError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(ConfigError::MissingCredential(OPENAI_API_KEY_ENV));
        }
        if config.model.trim().is_empty() {
            return Err(ConfigError::Invalid("missing embedding model name".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| ConfigError::Invalid("invalid OpenAI API key".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|err| {
                ConfigError::Invalid(format!("failed to build OpenAI HTTP client: {err}"))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimensions: config.dimensions,
            template: config.prompt_template,
            retry: config.retry,
        })
    }

    async fn request_once(&self, input: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: [input],
            dimensions: Some(self.dimensions),
            encoding_format: "float",
        };

        let resp = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let retry_after = retry_after_hint(resp.headers());
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status(status, body, retry_after));
        }

        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|err| EmbeddingError::MalformedResponse(err.to_string()))?;
        parsed.data.sort_by_key(|entry| entry.index);

        parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| EmbeddingError::MalformedResponse("no embedding returned".into()))
    }
}

#[async_trait]
impl QueryEmbedder for OpenAiEmbedder {
    async fn embed(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let input = self.template.apply(query);
        log::debug!(
            "embedding query with model={} template={}",
            self.model,
            self.template.version()
        );

        let embedding = self.retry.run(|| self.request_once(&input)).await?;
        check_dimensions(embedding, self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn template(&self) -> PromptTemplate {
        self.template
    }
}

pub fn check_dimensions(embedding: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbeddingError> {
    if embedding.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            got: embedding.len(),
        });
    }
    Ok(embedding)
}

fn classify_status(status: StatusCode, body: String, retry_after: Option<Duration>) -> EmbeddingError {
    let message = format!("{status}: {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => EmbeddingError::Unauthenticated(message),
        StatusCode::TOO_MANY_REQUESTS => EmbeddingError::RateLimited {
            message,
            retry_after,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => EmbeddingError::Timeout,
        s if s.is_client_error() => EmbeddingError::MalformedInput(message),
        _ => EmbeddingError::Unavailable(message),
    }
}

/// Reads `retry-after-ms` (OpenAI) or `retry-after` in seconds.
fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
    };

    if let Some(ms) = header("retry-after-ms").and_then(|v| v.parse::<f64>().ok()) {
        if ms.is_finite() && ms >= 0.0 {
            return Some(Duration::from_millis(ms as u64));
        }
    }

    header("retry-after")
        .and_then(|v| v.parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
