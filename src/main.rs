use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use picfetch::application::ResourceManager;
use picfetch::domain::entities::ResourcePriority;
use picfetch::infrastructure::config::load_config;

/// Log verbosity level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    Info,
    /// Warning level.
    #[default]
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Fetch images through the prioritized cache/store/network pipeline.
#[derive(Debug, Parser)]
#[command(name = "picfetch", version, about, long_about = None)]
struct Cli {
    /// Image URLs to fetch.
    #[arg(required = true, value_name = "URL")]
    urls: Vec<String>,

    /// Fetch with high priority (protected cache bucket, queue precedence).
    #[arg(long)]
    high_priority: bool,

    /// Skip persisting downloaded images to the disk store.
    #[arg(long)]
    no_save: bool,

    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Disk store directory override.
    #[arg(long, value_name = "PATH")]
    storage_dir: Option<PathBuf>,

    /// Cap on simultaneous downloads.
    #[arg(long, value_name = "N")]
    max_concurrent: Option<usize>,

    /// Entry budget of the high-priority cache bucket.
    #[arg(long, value_name = "N")]
    high_limit: Option<usize>,

    /// Entry budget of the low-priority cache bucket.
    #[arg(long, value_name = "N")]
    low_limit: Option<usize>,

    /// Per-request timeout in seconds.
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Log verbosity level.
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
}

fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = Some(dir);
    }
    if let Some(max) = cli.max_concurrent {
        config.max_concurrent = max;
    }
    if let Some(limit) = cli.high_limit {
        config.high_cache_limit = limit;
    }
    if let Some(limit) = cli.low_limit {
        config.low_cache_limit = limit;
    }
    if let Some(timeout) = cli.timeout_secs {
        config.timeout_secs = timeout;
    }

    let manager = ResourceManager::with_default_fetcher(&config)?;
    info!(version = picfetch::VERSION, urls = cli.urls.len(), "fetching");

    let priority = if cli.high_priority {
        ResourcePriority::High
    } else {
        ResourcePriority::Low
    };
    let save = !cli.no_save;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut failures = 0usize;
    let mut requested = 0usize;
    for url in &cli.urls {
        let tx = tx.clone();
        let reported_url = url.clone();
        let completion: picfetch::application::CompletionFn = Box::new(move |result| {
            let _ = tx.send((reported_url, result));
        });
        match manager.request(url, priority, save, None, Some(completion), None) {
            Ok(()) => requested += 1,
            Err(e) => {
                eprintln!("{url}  error: {e}");
                failures += 1;
            }
        }
    }
    drop(tx);

    for _ in 0..requested {
        let Some((url, result)) = rx.recv().await else {
            break;
        };
        match result {
            Ok(loaded) => {
                println!(
                    "{url}  {}x{}  ({})",
                    loaded.image.width(),
                    loaded.image.height(),
                    loaded.source
                );
            }
            Err(e) => {
                eprintln!("{url}  error: {e}");
                failures += 1;
            }
        }
    }

    info!(
        stored_bytes = manager.storage_bytes().await,
        "fetch run complete"
    );
    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
