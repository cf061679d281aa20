//! Fetcher CLI
//!
//! Local execution entry point for scrape and load runs.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fetcher::{
    error::Result,
    models::{Config, dedupe_channels, load_channels},
    pipeline,
    provider::WebPreviewProvider,
    storage::{LocalStorage, WatermarkStore},
    utils::logging,
};

/// Telegram channel fetcher for the medical data warehouse
#[derive(Parser, Debug)]
#[command(
    name = "fetcher",
    version,
    about = "Incremental Telegram channel scraper and warehouse loader"
)]
struct Cli {
    /// Project root; all data paths are resolved against it
    #[arg(short, long, default_value = ".", global = true)]
    root: PathBuf,

    /// Config file (default: {root}/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch new messages from every channel
    Scrape {
        /// Scrape only these channels instead of the configured list
        #[arg(long = "channel", value_name = "CHANNEL")]
        channels: Vec<String>,
    },

    /// Load the day partitions into Postgres
    #[cfg(feature = "warehouse")]
    Load {
        /// Input directory (default: DATA_LAKE_DIR, then paths.messages_dir)
        #[arg(long)]
        data_lake_dir: Option<PathBuf>,
    },

    /// Print the resolved channel list
    Channels,

    /// Validate configuration
    Validate,

    /// Show stored watermarks
    Info,
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.root.join("config.toml"));
    let loaded = Config::load(&config_path);
    let mut config = loaded.as_ref().cloned().unwrap_or_default();

    let log_file = config
        .logging
        .file_enabled
        .then(|| cli.root.join(&config.paths.log_file));
    logging::init(&config.logging.level, cli.verbose, log_file.as_deref());

    match &loaded {
        Ok(_) => log::info!("Loaded configuration from {}", config_path.display()),
        Err(e) => log::warn!(
            "Config load failed from {}: {}. Using defaults.",
            config_path.display(),
            e
        ),
    }
    config.apply_env();

    let storage = LocalStorage::new(&cli.root, config.paths.clone());
    let resolve_channels = |explicit: &[String]| {
        if explicit.is_empty() {
            load_channels(&config.channels, &cli.root.join(&config.paths.channels_file))
        } else {
            dedupe_channels(explicit)
        }
    };

    match &cli.command {
        Command::Scrape { channels } => {
            config.validate()?;
            let channels = resolve_channels(channels);
            if channels.is_empty() {
                log::warn!("No channels to scrape");
                return Ok(());
            }

            let provider = WebPreviewProvider::new(&config.provider)?;
            let summary =
                pipeline::run_scraper(&config, &cli.root, &provider, &storage, &channels).await?;

            for report in &summary.channels {
                log::info!(
                    "  {:<24} {:?}: {} new, {} media, watermark {}",
                    report.result.channel,
                    report.status,
                    report.result.new_messages,
                    report.result.media_downloaded,
                    report.result.last_message_id
                );
            }
        }

        #[cfg(feature = "warehouse")]
        Command::Load { data_lake_dir } => {
            let dir = data_lake_dir
                .clone()
                .or_else(|| config.warehouse.data_lake_dir.as_ref().map(PathBuf::from))
                .unwrap_or_else(|| cli.root.join(&config.paths.messages_dir));

            pipeline::run_loader(&config, &dir).await?;
        }

        Command::Channels => {
            for channel in resolve_channels(&[]) {
                println!("{channel}");
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("Config OK");
        }

        Command::Info => {
            log::info!("Project root: {}", cli.root.display());
            let marks = storage.load_watermarks().await;
            if marks.is_empty() {
                log::info!("No watermarks stored yet.");
            }
            for (channel, mark) in &marks.channels {
                match mark.updated_at {
                    Some(at) => println!("{channel}\t{}\t{}", mark.last_message_id, at.to_rfc3339()),
                    None => println!("{channel}\t{}", mark.last_message_id),
                }
            }
        }
    }

    Ok(())
}
