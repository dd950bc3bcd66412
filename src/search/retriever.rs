//! Similarity retrieval against the vector store's `match_movies` RPC.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::search::postgrest::{ApiError, PostgrestClient};

/// A movie id surfaced by the similarity query, not yet enriched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityCandidate {
    #[serde(alias = "movie_id")]
    pub id: i64,
    pub similarity: f32,
    #[serde(default)]
    pub vote_count: Option<i64>,
    #[serde(default)]
    pub popularity: Option<f64>,
}

/// Retrieval parameters. Construct through [`SimilarityQuery::bounded`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityQuery {
    /// Minimum score the store considers; zero or negative admits everything
    pub threshold: f32,
    pub count: usize,
    pub min_vote_count: Option<i64>,
}

impl SimilarityQuery {
    pub fn bounded(
        threshold: f32,
        count: usize,
        min_vote_count: Option<i64>,
        max_count: usize,
    ) -> Result<Self, RetrievalError> {
        if !threshold.is_finite() {
            return Err(RetrievalError::MalformedParameters(format!(
                "threshold must be finite, got {threshold}"
            )));
        }
        if count == 0 || count > max_count {
            return Err(RetrievalError::MalformedParameters(format!(
                "match count must be between 1 and {max_count}, got {count}"
            )));
        }
        if let Some(votes) = min_vote_count.filter(|v| *v < 0) {
            return Err(RetrievalError::MalformedParameters(format!(
                "minimum vote count must not be negative, got {votes}"
            )));
        }

        Ok(Self {
            threshold,
            count,
            min_vote_count,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("similarity search timed out: {0}")]
    Timeout(String),

    #[error("similarity search parameters rejected: {0}")]
    MalformedParameters(String),

    #[error("similarity store unavailable: {0}")]
    Unavailable(String),

    #[error("similarity store returned an unexpected response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for RetrievalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RetrievalError::Timeout(err.to_string())
        } else if err.is_decode() {
            RetrievalError::MalformedResponse(err.to_string())
        } else {
            RetrievalError::Unavailable(err.to_string())
        }
    }
}

/// Nearest-neighbor lookup over the catalog vectors.
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    /// Candidates in store order. An empty list is a valid answer.
    async fn find_similar(
        &self,
        embedding: &[f32],
        query: &SimilarityQuery,
    ) -> Result<Vec<SimilarityCandidate>, RetrievalError>;
}

#[derive(Serialize)]
struct MatchMoviesParams<'a> {
    query_embedding: &'a [f32],
    match_threshold: f32,
    match_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_vote_count: Option<i64>,
}

/// Calls a PostgREST RPC such as `match_movies(query_embedding, match_threshold, match_count)`.
pub struct PostgrestSimilarityStore {
    client: PostgrestClient,
    function: String,
}

impl PostgrestSimilarityStore {
    pub fn new(client: PostgrestClient, function: &str) -> Self {
        Self {
            client,
            function: function.to_string(),
        }
    }
}

#[async_trait]
impl SimilarityStore for PostgrestSimilarityStore {
    async fn find_similar(
        &self,
        embedding: &[f32],
        query: &SimilarityQuery,
    ) -> Result<Vec<SimilarityCandidate>, RetrievalError> {
        let params = MatchMoviesParams {
            query_embedding: embedding,
            match_threshold: query.threshold,
            match_count: query.count,
            min_vote_count: query.min_vote_count,
        };

        let resp = self.client.rpc(&self.function).json(&params).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let api_err = ApiError::parse(&body);
            let message = api_err.describe(status);

            return Err(if api_err.is_statement_timeout() {
                RetrievalError::Timeout(message)
            } else if status.is_client_error() {
                RetrievalError::MalformedParameters(message)
            } else {
                RetrievalError::Unavailable(message)
            });
        }

        let candidates: Vec<SimilarityCandidate> = resp
            .json()
            .await
            .map_err(|err| RetrievalError::MalformedResponse(err.to_string()))?;

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_query_accepts_negative_threshold() {
        let query = SimilarityQuery::bounded(-1.0, 20, None, 200).unwrap();
        assert_eq!(query.count, 20);
        assert!(query.threshold < 0.0);
    }

    #[test]
    fn test_bounded_query_rejects_unbounded_count() {
        assert!(matches!(
            SimilarityQuery::bounded(0.0, 0, None, 200),
            Err(RetrievalError::MalformedParameters(_))
        ));
        assert!(matches!(
            SimilarityQuery::bounded(0.0, 201, None, 200),
            Err(RetrievalError::MalformedParameters(_))
        ));
    }

    #[test]
    fn test_bounded_query_rejects_negative_votes() {
        assert!(matches!(
            SimilarityQuery::bounded(0.0, 10, Some(-5), 200),
            Err(RetrievalError::MalformedParameters(_))
        ));
        assert!(SimilarityQuery::bounded(0.0, 10, Some(50), 200).is_ok());
    }

    #[test]
    fn test_bounded_query_rejects_nan_threshold() {
        assert!(SimilarityQuery::bounded(f32::NAN, 10, None, 200).is_err());
    }

    #[test]
    fn test_candidate_deserialize() {
        let rows: Vec<SimilarityCandidate> = serde_json::from_str(
            r#"[
                {"id": 1, "similarity": 0.9, "vote_count": 5, "popularity": 1.5, "content": "x"},
                {"movie_id": 2, "similarity": 0.89},
                {"id": 3, "similarity": 0.5, "vote_count": null}
            ]"#,
        )
        .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].vote_count, Some(5));
        assert_eq!(rows[1].id, 2);
        assert_eq!(rows[1].vote_count, None);
        assert_eq!(rows[2].vote_count, None);
    }

    #[test]
    fn test_params_omit_missing_vote_filter() {
        let embedding = [0.1f32, 0.2];
        let params = MatchMoviesParams {
            query_embedding: &embedding,
            match_threshold: 0.0,
            match_count: 20,
            min_vote_count: None,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["match_count"], 20);
        assert!(value.get("min_vote_count").is_none());
        assert_eq!(value["query_embedding"].as_array().unwrap().len(), 2);
    }
}
