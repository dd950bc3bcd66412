use clap::Parser;

mod cli;
mod config;
mod factory;
mod movies;
mod search;
#[cfg(test)]
mod tests;
mod web;

use factory::AppFactory;

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    let base_path = AppFactory::get_base_path(args.config_dir)?;
    let mut config = AppFactory::create_config(&base_path)?;

    match args.command {
        cli::Command::Config {} => {
            println!("# {}", base_path.display());
            print!("{}", serde_yml::to_string(&config)?);
            Ok(())
        }

        cli::Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let pipeline = AppFactory::create_pipeline(&config)?;
            web::start_daemon(pipeline, &config.server.bind)
        }

        cli::Command::Search { query, limit } => {
            let pipeline = AppFactory::create_pipeline(&config)?;
            let outcome = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(pipeline.search(&query, limit))?;

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
    }
}
