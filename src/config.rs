use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::search::{PromptTemplate, RankingPolicy, RetryPolicy};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
/// Must match the model the catalog vectors were built with.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 15;

const DEFAULT_REST_URL: &str = "http://localhost:54321/rest/v1";
const DEFAULT_MATCH_FUNCTION: &str = "match_movies";
const DEFAULT_MATCH_COUNT: usize = 20;
/// Hard cap on candidates per request; also bounds metadata lookups.
const DEFAULT_MAX_MATCH_COUNT: usize = 200;
const DEFAULT_SIMILARITY_TIMEOUT_SECS: u64 = 10;

const DEFAULT_MOVIES_CSV: &str = "movies_metadata.csv";
const DEFAULT_MOVIES_TABLE: &str = "movies";

/// Environment variable holding the embedding API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Environment variable holding the vector/metadata store key.
pub const STORE_API_KEY_ENV: &str = "SUPABASE_SERVICE_ROLE_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("{0} environment variable is not set")]
    MissingCredential(&'static str),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Deadline for a whole search request, external calls included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible API root, `/embeddings` is appended
    #[serde(default = "default_openai_base")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Expected vector length; also sent to the API to request reduced vectors
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    /// Template applied to the raw query before embedding
    #[serde(default)]
    pub prompt_template: PromptTemplate,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            timeout_secs: default_embedding_timeout_secs(),
            prompt_template: PromptTemplate::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// PostgREST root of the vector store
    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    /// Name of the similarity RPC
    #[serde(default = "default_match_function")]
    pub function: String,

    /// Minimum score the store should consider. Zero or negative admits everything.
    #[serde(default)]
    pub match_threshold: f32,

    /// Candidates requested per query
    #[serde(default = "default_match_count")]
    pub match_count: usize,

    /// Upper bound for `match_count` and for id lists sent to the metadata store
    #[serde(default = "default_max_match_count")]
    pub max_match_count: usize,

    /// Drop obscure titles store-side
    #[serde(default)]
    pub min_vote_count: Option<i64>,

    #[serde(default = "default_similarity_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            function: default_match_function(),
            match_threshold: 0.0,
            match_count: default_match_count(),
            max_match_count: default_max_match_count(),
            min_vote_count: None,
            timeout_secs: default_similarity_timeout_secs(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataSource {
    /// `movies_metadata.csv` loaded into memory at startup
    #[default]
    Csv,
    /// PostgREST table on the same store as the vectors
    Rest,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default)]
    pub source: MetadataSource,

    /// Relative paths resolve against the config directory
    #[serde(default = "default_movies_csv")]
    pub csv_path: String,

    #[serde(default = "default_movies_table")]
    pub table: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            source: MetadataSource::default(),
            csv_path: default_movies_csv(),
            table: default_movies_table(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub similarity: SimilarityConfig,
    #[serde(default)]
    pub ranking: RankingPolicy,
    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_openai_base() -> String {
    DEFAULT_OPENAI_BASE.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_dimensions() -> usize {
    DEFAULT_EMBEDDING_DIMENSIONS
}

fn default_embedding_timeout_secs() -> u64 {
    DEFAULT_EMBEDDING_TIMEOUT_SECS
}

fn default_rest_url() -> String {
    DEFAULT_REST_URL.to_string()
}

fn default_match_function() -> String {
    DEFAULT_MATCH_FUNCTION.to_string()
}

fn default_match_count() -> usize {
    DEFAULT_MATCH_COUNT
}

fn default_max_match_count() -> usize {
    DEFAULT_MAX_MATCH_COUNT
}

fn default_similarity_timeout_secs() -> u64 {
    DEFAULT_SIMILARITY_TIMEOUT_SECS
}

fn default_movies_csv() -> String {
    DEFAULT_MOVIES_CSV.to_string()
}

fn default_movies_table() -> String {
    DEFAULT_MOVIES_TABLE.to_string()
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.server.request_timeout_secs == 0 {
            return invalid("server.request_timeout_secs must be greater than 0".into());
        }

        let emb = &self.embedding;
        if emb.dimensions == 0 {
            return invalid("embedding.dimensions must be greater than 0".into());
        }
        if emb.model.trim().is_empty() {
            return invalid("embedding.model must not be empty".into());
        }
        if emb.timeout_secs == 0 {
            return invalid("embedding.timeout_secs must be greater than 0".into());
        }
        if emb.retry.max_attempts == 0 {
            return invalid("embedding.retry.max_attempts must be at least 1".into());
        }
        if let Err(err) = url::Url::parse(&emb.base_url) {
            return invalid(format!("embedding.base_url '{}' is invalid: {err}", emb.base_url));
        }

        let sim = &self.similarity;
        if sim.match_count == 0 {
            return invalid("similarity.match_count must be greater than 0".into());
        }
        if sim.match_count > sim.max_match_count {
            return invalid(format!(
                "similarity.match_count ({}) exceeds similarity.max_match_count ({})",
                sim.match_count, sim.max_match_count
            ));
        }
        if matches!(sim.min_vote_count, Some(v) if v < 0) {
            return invalid("similarity.min_vote_count must not be negative".into());
        }
        if sim.function.trim().is_empty() {
            return invalid("similarity.function must not be empty".into());
        }
        if sim.timeout_secs == 0 {
            return invalid("similarity.timeout_secs must be greater than 0".into());
        }
        if let Err(err) = url::Url::parse(&sim.rest_url) {
            return invalid(format!("similarity.rest_url '{}' is invalid: {err}", sim.rest_url));
        }

        let rank = &self.ranking;
        if !rank.tie_epsilon.is_finite() || rank.tie_epsilon < 0.0 {
            return invalid(format!(
                "ranking.tie_epsilon must be a non-negative number, got {}",
                rank.tie_epsilon
            ));
        }
        if !rank.acceptance_threshold.is_finite() {
            return invalid("ranking.acceptance_threshold must be finite".into());
        }
        if rank.max_results == 0 {
            return invalid("ranking.max_results must be greater than 0".into());
        }

        Ok(())
    }

    /// Loads `config.yaml` from `base_path`, writing defaults when it does not exist.
    pub fn load_with(base_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let base_path = base_path.as_ref();
        let path = base_path.join(CONFIG_FILE);
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(base_path).map_err(io_err)?;

        // create new if does not exist
        if !path.exists() {
            std::fs::write(&path, serde_yml::to_string(&Self::default())?).map_err(io_err)?;
        }

        let config_str = std::fs::read_to_string(&path).map_err(io_err)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.base_path.join(CONFIG_FILE);
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&path, config_str).map_err(|source| ConfigError::Io { path, source })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolves the movies CSV against the config directory.
    pub fn movies_csv_path(&self) -> PathBuf {
        let csv = Path::new(&self.metadata.csv_path);
        if csv.is_absolute() {
            csv.to_path_buf()
        } else {
            self.base_path.join(csv)
        }
    }
}

/// Reads a secret from the environment, treating blank values as missing.
pub fn credential(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingCredential(var))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path()).unwrap();

        assert!(tmp.path().join(CONFIG_FILE).exists());
        assert_eq!(config.server.bind, DEFAULT_BIND);
        assert_eq!(config.embedding.dimensions, DEFAULT_EMBEDDING_DIMENSIONS);
        assert_eq!(config.similarity.match_count, DEFAULT_MATCH_COUNT);
        assert_eq!(config.metadata.source, MetadataSource::Csv);
    }

    #[test]
    fn test_partial_file_is_upgraded() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "ranking:\n  tie_epsilon: 0.05\n  max_results: 5\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path()).unwrap();
        assert!((config.ranking.tie_epsilon - 0.05).abs() < f32::EPSILON);
        assert_eq!(config.ranking.max_results, 5);

        let saved = std::fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("similarity:"));
        assert!(saved.contains("match_movies"));
    }

    #[test]
    fn test_match_count_above_cap_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "similarity:\n  match_count: 500\n  max_match_count: 100\n",
        )
        .unwrap();

        let result = Config::load_with(tmp.path());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_negative_epsilon_is_rejected() {
        let mut config = Config::default();
        config.ranking.tie_epsilon = -0.1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_negative_match_threshold_is_allowed() {
        let mut config = Config::default();
        config.similarity.match_threshold = -1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_yaml() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "server: [unclosed").unwrap();
        assert!(matches!(
            Config::load_with(tmp.path()),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_relative_csv_path_resolves_against_base() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::load_with(tmp.path()).unwrap();
        assert_eq!(config.movies_csv_path(), tmp.path().join(DEFAULT_MOVIES_CSV));

        config.metadata.csv_path = "/data/movies.csv".into();
        assert_eq!(config.movies_csv_path(), PathBuf::from("/data/movies.csv"));
    }
}
