use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::factory::HOME_ENV;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding config.yaml and the movies CSV
    #[clap(long, env = HOME_ENV, global = true)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP search service.
    Serve {
        /// Overrides server.bind from config.yaml
        #[clap(short, long)]
        bind: Option<String>,
    },

    /// Run a single search and print the results as JSON
    Search {
        /// Free-text description of the movie
        #[clap(allow_hyphen_values = true)]
        query: String,

        /// Maximum number of results
        #[clap(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Print the effective configuration
    Config {},
}
