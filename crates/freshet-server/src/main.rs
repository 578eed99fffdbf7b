use std::env;

use anyhow::Context;
use freshet_core::BackgroundPoller;
use freshet_server::config::AppConfig;
use freshet_server::config::loader::load_config;
use tokio::runtime::Handle;

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From FRESHET_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (freshet.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (FRESHET_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        let missing = matches!(
            e,
            dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound
        );
        if !missing {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    freshet_server::observability::init_tracing();

    let (config_path, source) = resolve_config_path();
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = %config_path,
        source = %source,
        "Configuration loaded"
    );
    freshet_server::observability::apply_logging_level(&cfg.logging.level);
    freshet_server::metrics::init_metrics();

    if let Err(err) = run(cfg).await {
        tracing::error!(error = %format!("{err:#}"), "Freshet stopped with an error");
        std::process::exit(1);
    }
}

async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    match freshet_server::connect_bulk_cache(&cfg.redis).await {
        Ok(_) => tracing::info!(namespace = %cfg.redis.namespace, "Bulk ticker cache ready"),
        Err(e) => tracing::warn!(
            error = %e,
            "Redis unavailable, bulk ticker cache reads will miss until it recovers"
        ),
    }

    let poller = if cfg.poller.enabled {
        let location = cfg
            .poller
            .source
            .as_deref()
            .context("poller.source is required when the poller is enabled")?;
        let source = freshet_server::blob_source_for(location, Handle::current())?;
        let (poller, model) = BackgroundPoller::spawn_parsed(
            cfg.poller.poller_config("model"),
            source,
            |bytes: &[u8]| {
                serde_json::from_slice::<serde_json::Value>(bytes)
                    .map_err(|e| freshet_core::Error::blob(format!("model is not JSON: {e}")))
            },
        )?;
        Some((poller, model))
    } else {
        tracing::info!("Blob poller disabled");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    if let Some((poller, model)) = poller {
        let updates = poller.update_count();
        let stopped = tokio::task::spawn_blocking(move || poller.shutdown())
            .await
            .context("poller shutdown task panicked")?;
        tracing::info!(
            updates,
            loaded = model.load().is_some(),
            clean = stopped,
            "Blob poller shut down"
        );
    }

    if let Some(text) = freshet_server::metrics::render_metrics() {
        tracing::debug!(metrics = %text, "Final metrics snapshot");
    }
    Ok(())
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: FRESHET_CONFIG
/// 3. Default: freshet.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return (path, ConfigSource::CliArgument);
            }
        }
    }

    if let Ok(path) = env::var("FRESHET_CONFIG") {
        if !path.is_empty() {
            return (path, ConfigSource::EnvironmentVariable);
        }
    }

    ("freshet.toml".to_string(), ConfigSource::Default)
}
