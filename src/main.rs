use anyhow::Context;
use clap::Parser;
use forecast_cache::app::App;
use forecast_cache::cache::ForecastCache;
use forecast_cache::cli::{Args, CacheAction, Command};
use forecast_cache::config::Config;
use forecast_cache::keys::decode_key;
use forecast_cache::logging::setup_logging;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config and setup logging first so startup logs are never silently dropped
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);

    match args.command() {
        Command::Serve => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                commit = env!("GIT_COMMIT_SHORT"),
                environment = if cfg!(debug_assertions) {
                    "development"
                } else {
                    "production"
                },
                "starting forecast-cache"
            );

            let app = match App::new(config) {
                Ok(app) => app,
                Err(e) => {
                    error!(error = ?e, "failed to initialize application");
                    return ExitCode::FAILURE;
                }
            };
            app.run().await
        }
        Command::Cache { action } => match run_cache_command(&config, action) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = ?e, "cache command failed");
                ExitCode::FAILURE
            }
        },
    }
}

/// Operate on the file-backed cache under `CACHE_DIR` and print JSON to stdout.
fn run_cache_command(config: &Config, action: CacheAction) -> Result<(), anyhow::Error> {
    match action {
        CacheAction::Decode { key } => {
            let filters = decode_key(&key).context("Failed to decode cache key")?;
            println!("{}", serde_json::to_string_pretty(&filters)?);
        }
        CacheAction::Stats => {
            let cache = open_file_cache(config)?;
            println!("{}", serde_json::to_string_pretty(&cache.stats())?);
        }
        CacheAction::Clear => {
            let cache = open_file_cache(config)?;
            let removed = cache.len();
            cache.clear();
            info!(removed, "cache cleared");
        }
    }
    Ok(())
}

fn open_file_cache(config: &Config) -> Result<ForecastCache, anyhow::Error> {
    let store = config.open_file_store().with_context(|| {
        format!(
            "Failed to open cache directory {}",
            config.cache_dir.display()
        )
    })?;
    Ok(ForecastCache::new(Arc::new(store), config.cache_config()))
}
