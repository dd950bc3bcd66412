use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use homedir::my_home;

use crate::{
    config::{self, Config, MetadataSource},
    movies::MovieCatalog,
    search::{
        CsvMetadataStore, MetadataStore, OpenAiEmbedder, PipelineSettings,
        PostgrestClient, PostgrestSimilarityStore, RestMetadataStore, SearchPipeline,
    },
};

/// Overrides the config directory.
pub const HOME_ENV: &str = "MOVIE_SEARCH_HOME";

/// Builds configuration and the search pipeline from the environment
pub struct AppFactory;

impl AppFactory {
    /// Config directory: `$MOVIE_SEARCH_HOME` or `~/.local/share/movie-search`
    pub fn get_base_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path);
        }
        if let Some(path) = std::env::var_os(HOME_ENV).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }

        let home = my_home()
            .context("could not determine home directory")?
            .context("home directory path is empty")?;
        Ok(home.join(".local/share/movie-search"))
    }

    pub fn create_config(base_path: &Path) -> Result<Config> {
        Config::load_with(base_path)
            .with_context(|| format!("failed to load config from {}", base_path.display()))
    }

    /// Wires the production pipeline. Missing credentials fail here rather
    /// than on the first request.
    pub fn create_pipeline(config: &Config) -> Result<SearchPipeline> {
        let openai_key = config::credential(config::OPENAI_API_KEY_ENV)?;
        let store_key = config::credential(config::STORE_API_KEY_ENV)?;

        let embedder = OpenAiEmbedder::new(&openai_key, &config.embedding)?;

        let sim = &config.similarity;
        let store_client = PostgrestClient::new(
            &sim.rest_url,
            &store_key,
            Duration::from_secs(sim.timeout_secs),
        )?;
        let similarity = PostgrestSimilarityStore::new(store_client.clone(), &sim.function);

        let metadata = Self::create_metadata_store(config, store_client)?;
        let settings = PipelineSettings::from_config(config)?;

        log::info!(
            "search pipeline ready: model={} dims={} template={} function={} metadata={}",
            config.embedding.model,
            config.embedding.dimensions,
            config.embedding.prompt_template.version(),
            sim.function,
            metadata.name(),
        );

        Ok(SearchPipeline::new(
            Arc::new(embedder),
            Arc::new(similarity),
            metadata,
            settings,
        ))
    }

    fn create_metadata_store(
        config: &Config,
        client: PostgrestClient,
    ) -> Result<Arc<dyn MetadataStore>> {
        match config.metadata.source {
            MetadataSource::Csv => {
                let path = config.movies_csv_path();
                let catalog = MovieCatalog::load(&path)
                    .with_context(|| format!("failed to load movies from {}", path.display()))?;
                if catalog.skipped > 0 {
                    log::warn!("skipped {} unparsable movie rows", catalog.skipped);
                }
                log::info!("loaded {} movies from {}", catalog.len(), path.display());
                Ok(Arc::new(CsvMetadataStore::new(catalog)))
            }
            MetadataSource::Rest => Ok(Arc::new(RestMetadataStore::new(
                client,
                &config.metadata.table,
            ))),
        }
    }
}
