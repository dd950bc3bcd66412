//! In-memory stand-ins for the embedding API and the stores.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::movies::{MovieCatalog, MovieRecord};
use crate::search::embeddings::{EmbeddingError, PromptTemplate, QueryEmbedder};
use crate::search::metadata::{CsvMetadataStore, MetadataError, MetadataStore};
use crate::search::pipeline::{PipelineSettings, SearchPipeline};
use crate::search::ranking::RankingPolicy;
use crate::search::retriever::{
    RetrievalError, SimilarityCandidate, SimilarityQuery, SimilarityStore,
};

pub const DIMS: usize = 4;

#[derive(Default)]
pub struct FakeEmbedder {
    pub calls: AtomicUsize,
    pub fail_with: Mutex<Option<EmbeddingError>>,
    /// Length of the returned vector; `DIMS` when unset
    pub returned_dims: Option<usize>,
    pub delay: Option<Duration>,
}

#[async_trait]
impl QueryEmbedder for FakeEmbedder {
    async fn embed(&self, _query: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.fail_with.lock().unwrap().take() {
            return Err(err);
        }
        Ok(vec![0.5; self.returned_dims.unwrap_or(DIMS)])
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn template(&self) -> PromptTemplate {
        PromptTemplate::Raw
    }
}

#[derive(Default)]
pub struct FakeSimilarityStore {
    pub calls: AtomicUsize,
    pub candidates: Vec<SimilarityCandidate>,
    pub fail_with: Mutex<Option<RetrievalError>>,
    pub last_query: Mutex<Option<SimilarityQuery>>,
}

impl FakeSimilarityStore {
    pub fn with(candidates: Vec<SimilarityCandidate>) -> Self {
        Self {
            candidates,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SimilarityStore for FakeSimilarityStore {
    async fn find_similar(
        &self,
        _embedding: &[f32],
        query: &SimilarityQuery,
    ) -> Result<Vec<SimilarityCandidate>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock().unwrap() = Some(*query);
        if let Some(err) = self.fail_with.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.candidates.clone())
    }
}

/// Wraps the CSV store to count lookups and inject failures.
pub struct FakeMetadataStore {
    pub calls: AtomicUsize,
    pub requested: Mutex<Vec<i64>>,
    pub fail_with: Mutex<Option<MetadataError>>,
    pub unreachable: AtomicBool,
    inner: CsvMetadataStore,
}

impl FakeMetadataStore {
    pub fn with(movies: Vec<MovieRecord>) -> Self {
        let mut catalog = MovieCatalog::default();
        for movie in movies {
            catalog.movies.insert(movie.id, movie);
        }
        Self {
            calls: AtomicUsize::new(0),
            requested: Mutex::new(vec![]),
            fail_with: Mutex::new(None),
            unreachable: AtomicBool::new(false),
            inner: CsvMetadataStore::new(catalog),
        }
    }
}

#[async_trait]
impl MetadataStore for FakeMetadataStore {
    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<MovieRecord>, MetadataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.requested.lock().unwrap() = ids.to_vec();
        if let Some(err) = self.fail_with.lock().unwrap().take() {
            return Err(err);
        }
        // reversed so callers cannot rely on store order
        let mut rows = self.inner.fetch_by_ids(ids).await?;
        rows.reverse();
        Ok(rows)
    }

    fn name(&self) -> &'static str {
        "fake"
    }

    async fn ping(&self) -> Result<(), MetadataError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(MetadataError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

pub fn movie(id: i64, title: &str, vote_count: i64) -> MovieRecord {
    MovieRecord {
        id,
        title: title.to_string(),
        tagline: None,
        overview: format!("{title} overview"),
        poster_path: None,
        release_date: None,
        vote_average: 7.0,
        genres: vec![],
        adult: false,
        original_language: "en".into(),
        popularity: 1.0,
        vote_count,
        video: false,
        original_title: title.to_string(),
        imdb_id: None,
    }
}

pub fn candidate(id: i64, similarity: f32, vote_count: Option<i64>) -> SimilarityCandidate {
    SimilarityCandidate {
        id,
        similarity,
        vote_count,
        popularity: None,
    }
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        retrieval: SimilarityQuery::bounded(0.0, 20, None, 200).unwrap(),
        ranking: RankingPolicy {
            acceptance_threshold: 0.0,
            tie_epsilon: 0.01,
            max_results: 20,
        },
        request_timeout: Duration::from_secs(5),
        max_lookup_ids: 200,
    }
}

/// Pipeline over fakes, with handles kept for call assertions.
pub struct Harness {
    pub embedder: Arc<FakeEmbedder>,
    pub similarity: Arc<FakeSimilarityStore>,
    pub metadata: Arc<FakeMetadataStore>,
    pub pipeline: Arc<SearchPipeline>,
}

impl Harness {
    pub fn new(
        embedder: FakeEmbedder,
        similarity: FakeSimilarityStore,
        metadata: FakeMetadataStore,
        settings: PipelineSettings,
    ) -> Self {
        let embedder = Arc::new(embedder);
        let similarity = Arc::new(similarity);
        let metadata = Arc::new(metadata);
        let pipeline = Arc::new(SearchPipeline::new(
            embedder.clone(),
            similarity.clone(),
            metadata.clone(),
            settings,
        ));
        Self {
            embedder,
            similarity,
            metadata,
            pipeline,
        }
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.embedder.calls.load(Ordering::SeqCst),
            self.similarity.calls.load(Ordering::SeqCst),
            self.metadata.calls.load(Ordering::SeqCst),
        )
    }
}
