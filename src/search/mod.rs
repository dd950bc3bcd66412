//! Semantic movie search.
//!
//! A query is embedded, matched against the catalog vectors, re-ranked so
//! near-ties favor widely voted titles, and joined with movie metadata.

pub mod embeddings;
pub mod errors;
pub mod metadata;
pub mod pipeline;
pub mod postgrest;
pub mod ranking;
pub mod retriever;
pub mod retry;

pub use embeddings::{OpenAiEmbedder, PromptTemplate, QueryEmbedder};
pub use errors::{ErrorKind, SearchError};
pub use metadata::{CsvMetadataStore, MetadataStore, RestMetadataStore};
pub use pipeline::{PipelineSettings, SearchOutcome, SearchPipeline};
pub use postgrest::PostgrestClient;
pub use ranking::RankingPolicy;
pub use retriever::{PostgrestSimilarityStore, SimilarityStore};
pub use retry::RetryPolicy;
