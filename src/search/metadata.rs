//! Metadata lookup and the ranked-order join.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::movies::{MovieCatalog, MovieRecord, RankedResult};
use crate::search::postgrest::{in_filter, ApiError, PostgrestClient};
use crate::search::retriever::SimilarityCandidate;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("metadata store timed out: {0}")]
    Timeout(String),

    #[error("metadata store returned an unexpected response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for MetadataError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            MetadataError::Timeout(err.to_string())
        } else if err.is_decode() {
            MetadataError::MalformedResponse(err.to_string())
        } else {
            MetadataError::Unavailable(err.to_string())
        }
    }
}

/// Source of full movie records.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Rows for the given ids in any order. Unknown ids are simply absent.
    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<MovieRecord>, MetadataError>;

    /// Short label for logs and the health endpoint.
    fn name(&self) -> &'static str;

    /// Cheap reachability check for the health endpoint.
    async fn ping(&self) -> Result<(), MetadataError> {
        Ok(())
    }
}

/// Movies CSV held in memory.
pub struct CsvMetadataStore {
    movies: HashMap<i64, MovieRecord>,
}

impl CsvMetadataStore {
    pub fn new(catalog: MovieCatalog) -> Self {
        Self {
            movies: catalog.movies,
        }
    }
}

#[async_trait]
impl MetadataStore for CsvMetadataStore {
    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<MovieRecord>, MetadataError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.movies.get(id))
            .cloned()
            .collect())
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}

/// Columns read into [`MovieRecord`]. The table also stores each movie's
/// embedding, which must never be pulled into a metadata lookup.
pub const MOVIE_COLUMNS: &str = "id,title,tagline,overview,poster_path,release_date,vote_average,genres,adult,original_language,popularity,vote_count,video,original_title,imdb_id";

/// Query string for a PostgREST lookup of `ids`.
pub fn lookup_query(ids: &[i64]) -> [(&'static str, String); 2] {
    [("select", MOVIE_COLUMNS.to_string()), ("id", in_filter(ids))]
}

/// Movies table behind PostgREST.
pub struct RestMetadataStore {
    client: PostgrestClient,
    table: String,
}

impl RestMetadataStore {
    pub fn new(client: PostgrestClient, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl MetadataStore for RestMetadataStore {
    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<MovieRecord>, MetadataError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let resp = self
            .client
            .table(&self.table)
            .query(&lookup_query(ids))
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let api_err = ApiError::parse(&body);
            let message = api_err.describe(status);
            return Err(if api_err.is_statement_timeout() {
                MetadataError::Timeout(message)
            } else {
                MetadataError::Unavailable(message)
            });
        }

        resp.json()
            .await
            .map_err(|err| MetadataError::MalformedResponse(err.to_string()))
    }

    fn name(&self) -> &'static str {
        "rest"
    }

    async fn ping(&self) -> Result<(), MetadataError> {
        let resp = self
            .client
            .table(&self.table)
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MetadataError::Unavailable(ApiError::parse(&body).describe(status)));
        }
        Ok(())
    }
}

/// Ranked results after the join, with the number of ids that had no row.
#[derive(Debug, Default)]
pub struct Enriched {
    pub results: Vec<RankedResult>,
    pub dropped: usize,
}

/// Fetches metadata for `ranked` and joins it back in ranked order.
///
/// Ids without a metadata row are dropped and counted. A store failure fails
/// the whole join.
pub async fn enrich(
    ranked: &[SimilarityCandidate],
    store: &dyn MetadataStore,
) -> Result<Enriched, MetadataError> {
    if ranked.is_empty() {
        return Ok(Enriched::default());
    }

    let ids: Vec<i64> = ranked.iter().map(|c| c.id).collect();
    let mut rows: HashMap<i64, MovieRecord> = store
        .fetch_by_ids(&ids)
        .await?
        .into_iter()
        .map(|movie| (movie.id, movie))
        .collect();

    let mut enriched = Enriched {
        results: Vec::with_capacity(ranked.len()),
        dropped: 0,
    };

    for candidate in ranked {
        match rows.remove(&candidate.id) {
            Some(movie) => enriched.results.push(RankedResult {
                movie,
                score: Some(candidate.similarity),
            }),
            None => {
                log::debug!("no metadata for movie {}", candidate.id);
                enriched.dropped += 1;
            }
        }
    }

    if enriched.dropped > 0 {
        log::warn!(
            "dropped {} ranked movies without metadata (store={})",
            enriched.dropped,
            store.name()
        );
    }

    Ok(enriched)
}
