//! Search pipeline: embed -> retrieve -> rank -> enrich.
//!
//! Each step depends on the previous one's output, so they run in sequence
//! under a single request deadline. Dropping the returned future (deadline
//! or client disconnect) cancels any outstanding external call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::Config;
use crate::movies::{MovieRecord, RankedResult};
use crate::search::embeddings::QueryEmbedder;
use crate::search::errors::SearchError;
use crate::search::metadata::{enrich, MetadataStore};
use crate::search::ranking::{rank, RankingPolicy};
use crate::search::retriever::{SimilarityQuery, SimilarityStore};

/// Request-independent pipeline settings.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub retrieval: SimilarityQuery,
    pub ranking: RankingPolicy,
    pub request_timeout: Duration,
    /// Largest id list ever sent to the metadata store
    pub max_lookup_ids: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Result<Self, SearchError> {
        let sim = &config.similarity;
        let retrieval = SimilarityQuery::bounded(
            sim.match_threshold,
            sim.match_count,
            sim.min_vote_count,
            sim.max_match_count,
        )?;

        Ok(Self {
            retrieval,
            ranking: config.ranking,
            request_timeout: Duration::from_secs(config.server.request_timeout_secs),
            max_lookup_ids: sim.max_match_count,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchMeta {
    /// Candidates returned by the similarity store
    pub candidates: usize,
    pub duplicates: usize,
    pub below_threshold: usize,
    /// Ranked candidates cut by the result cap
    pub truncated: usize,
    /// Ranked ids without a metadata row
    pub dropped: usize,
    pub returned: usize,
    pub template: &'static str,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<RankedResult>,
    pub meta: SearchMeta,
}

pub struct SearchPipeline {
    embedder: Arc<dyn QueryEmbedder>,
    similarity: Arc<dyn SimilarityStore>,
    metadata: Arc<dyn MetadataStore>,
    settings: PipelineSettings,
}

impl SearchPipeline {
    pub fn new(
        embedder: Arc<dyn QueryEmbedder>,
        similarity: Arc<dyn SimilarityStore>,
        metadata: Arc<dyn MetadataStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            embedder,
            similarity,
            metadata,
            settings,
        }
    }

    pub fn metadata_source(&self) -> &'static str {
        self.metadata.name()
    }

    /// Runs a search. `limit` may only lower the configured result cap.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<SearchOutcome, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidInput("query must not be empty".into()));
        }

        let mut ranking = self.settings.ranking;
        match limit {
            Some(0) => return Err(SearchError::InvalidInput("limit must be at least 1".into())),
            Some(limit) => ranking.max_results = ranking.max_results.min(limit),
            None => {}
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.settings.request_timeout, self.run(query, &ranking))
            .await
            .map_err(|_| {
                log::warn!(
                    "search exceeded {}s deadline: {query:?}",
                    self.settings.request_timeout.as_secs()
                );
                SearchError::timeout("request deadline exceeded")
            })?;

        outcome.map(|mut outcome| {
            outcome.meta.latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            log::info!(
                "search {query:?}: candidates={} below_threshold={} duplicates={} dropped={} returned={} latency_ms={:.1}",
                outcome.meta.candidates,
                outcome.meta.below_threshold,
                outcome.meta.duplicates,
                outcome.meta.dropped,
                outcome.meta.returned,
                outcome.meta.latency_ms,
            );
            outcome
        })
    }

    async fn run(&self, query: &str, ranking: &RankingPolicy) -> Result<SearchOutcome, SearchError> {
        let embedding = self.embedder.embed(query).await?;
        if embedding.len() != self.embedder.dimensions() {
            return Err(SearchError::MalformedResponse(format!(
                "embedding has {} dimensions, expected {}",
                embedding.len(),
                self.embedder.dimensions()
            )));
        }

        let candidates = self
            .similarity
            .find_similar(&embedding, &self.settings.retrieval)
            .await?;
        let received = candidates.len();

        let mut ranked = rank(candidates, ranking);
        // the store was asked for at most `retrieval.count`; never trust it further
        ranked.ranked.truncate(self.settings.retrieval.count);
        log::debug!("ranked ids: {:?}", ranked.ids());

        let enriched = enrich(&ranked.ranked, self.metadata.as_ref()).await?;

        Ok(SearchOutcome {
            meta: SearchMeta {
                candidates: received,
                duplicates: ranked.duplicates,
                below_threshold: ranked.below_threshold,
                truncated: ranked.truncated,
                dropped: enriched.dropped,
                returned: enriched.results.len(),
                template: self.embedder.template().version(),
                latency_ms: 0.0,
            },
            results: enriched.results,
        })
    }

    /// Reports whether the metadata store answers within the request deadline.
    pub async fn check_health(&self) -> Result<(), SearchError> {
        tokio::time::timeout(self.settings.request_timeout, self.metadata.ping())
            .await
            .map_err(|_| SearchError::timeout("health check deadline exceeded"))??;
        Ok(())
    }

    /// Fetches movies by id in request order, ignoring repeats and unknown ids.
    pub async fn movies_by_ids(&self, ids: &[i64]) -> Result<Vec<MovieRecord>, SearchError> {
        let mut seen = HashSet::with_capacity(ids.len());
        let ids: Vec<i64> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        if ids.len() > self.settings.max_lookup_ids {
            return Err(SearchError::InvalidInput(format!(
                "at most {} ids may be requested at once, got {}",
                self.settings.max_lookup_ids,
                ids.len()
            )));
        }
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let fetch = self.metadata.fetch_by_ids(&ids);
        let rows = tokio::time::timeout(self.settings.request_timeout, fetch)
            .await
            .map_err(|_| SearchError::timeout("request deadline exceeded"))??;

        let mut by_id: HashMap<i64, MovieRecord> =
            rows.into_iter().map(|movie| (movie.id, movie)).collect();

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}
