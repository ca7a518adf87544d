use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use futures_util::future::join_all;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use lever::Lever;
use lever::domain::{MemoryPolicy, NetworkPolicy};
use lever::infrastructure::handlers::DirectoryAssetResolver;
use lever::infrastructure::{CliArgs, ConfigStore, LeverConfig};

fn init_logging(config: &LeverConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<LeverConfig> {
    let store = ConfigStore::new()?;
    let mut config = store.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

async fn create_lever(config: LeverConfig) -> Result<Lever> {
    let assets = Arc::new(DirectoryAssetResolver::new(std::env::current_dir()?));
    let lever = Lever::builder()
        .config(config)
        .asset_resolver(assets)?
        .build()
        .await?;
    Ok(lever)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = lever::VERSION, "Starting {}", lever::NAME);

    let lever = create_lever(config).await?;

    let mut memory_policy = MemoryPolicy::empty();
    if args.no_memory_cache {
        memory_policy = MemoryPolicy::NO_CACHE | MemoryPolicy::NO_STORE;
    }
    let mut network_policy = NetworkPolicy::empty();
    if args.offline {
        network_policy |= NetworkPolicy::OFFLINE;
    }
    if args.no_disk_cache {
        network_policy |= NetworkPolicy::NO_CACHE | NetworkPolicy::NO_STORE;
    }

    let mut loads = Vec::with_capacity(args.uris.len());
    for uri in &args.uris {
        let mut creator = lever
            .load_uri(uri)?
            .memory_policy(memory_policy, &[])
            .network_policy(network_policy, &[]);
        if let Some(priority) = args.priority {
            creator = creator.priority(priority)?;
        }
        if let Some((width, height)) = args.resize {
            creator = creator.resize(width, height)?;
        }
        loads.push(async move { (uri, creator.load().await) });
    }

    let mut failures = 0usize;
    for (uri, outcome) in join_all(loads).await {
        match outcome {
            Ok(bitmap) => println!("{uri}: {}x{}", bitmap.width(), bitmap.height()),
            Err(e) => {
                failures += 1;
                warn!(%uri, error = %e, "Load failed");
                println!("{uri}: failed: {e}");
            }
        }
    }

    lever.flush().await;
    println!("{}", lever.snapshot());
    lever.shutdown();

    if failures > 0 {
        color_eyre::eyre::bail!("{failures} of {} loads failed", args.uris.len());
    }
    Ok(())
}
