use anyhow::{Context, Result};
use arcgis_import::arcgis::canonicalize;
use arcgis_import::config::Config;
use arcgis_import::datasource::{ArcGisDatasource, Datasource};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Import feature data from ArcGIS map services
#[derive(Parser, Debug)]
#[command(name = "arcgis-import", version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level for debugging (RUST_LOG overrides it)
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Verify TLS certificates and host names
    #[arg(long, global = true)]
    verify_tls: bool,

    /// Maximum number of features requested per query
    #[arg(long, global = true)]
    max_records: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the canonical layer URL for an ArcGIS service URL
    Canonicalize { url: String },
    /// Fetch layer metadata and print the resource descriptor
    Metadata { url: String },
    /// Fetch metadata and all features of a layer
    Fetch {
        url: String,

        /// Write the result to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the effective configuration
    Config {
        /// Persist the effective configuration
        #[arg(long)]
        save: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Default filter directive for this crate, `None` when logging is off
    fn directive(self) -> Option<&'static str> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some("arcgis_import=error"),
            LogLevel::Warn => Some("arcgis_import=warn"),
            LogLevel::Info => Some("arcgis_import=info"),
            LogLevel::Debug => Some("arcgis_import=debug,reqwest=debug"),
            LogLevel::Trace => Some("arcgis_import=trace,reqwest=trace"),
        }
    }
}

/// `RUST_LOG` wins over `--log-level`; with neither set nothing is logged
fn log_filter(level: LogLevel) -> Option<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Some(filter),
        Err(_) => level.directive().map(EnvFilter::new),
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(filter) = log_filter(level) else {
        return Ok(None);
    };

    let log_path = get_log_path();
    let log_dir = log_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (writer, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .init();

    tracing::info!("arcgis-import {} logging to {:?}", env!("CARGO_PKG_VERSION"), log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("arcgis-import").join("arcgis-import.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".arcgis-import").join("arcgis-import.log");
    }
    PathBuf::from("arcgis-import.log")
}

/// Merge CLI flags over the persisted configuration (CLI > config)
fn effective_config(args: &Args) -> Config {
    let mut config = Config::load();
    if args.verify_tls {
        config.verify_peer = true;
        config.verify_host = true;
    }
    if let Some(max_records) = args.max_records {
        config.max_records_per_query = Some(max_records);
    }
    config
}

fn build_datasource(config: &Config) -> Result<ArcGisDatasource> {
    let source = ArcGisDatasource::new(&config.http_client_config())
        .context("Failed to initialize ArcGIS datasource")?;
    Ok(match config.max_records_per_query {
        Some(max_records) => source.with_max_records_per_query(max_records),
        None => source,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;
    let config = effective_config(&args);

    match &args.command {
        Command::Canonicalize { url } => {
            println!("{}", canonicalize(url)?);
        }
        Command::Metadata { url } => {
            let mut source = build_datasource(&config)?;
            let descriptor = source
                .get_resource_metadata(url)
                .await
                .with_context(|| format!("Failed to fetch metadata for {url}"))?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }
        Command::Fetch { url, output } => {
            let mut source = build_datasource(&config)?;
            source
                .get_resource_metadata(url)
                .await
                .with_context(|| format!("Failed to fetch metadata for {url}"))?;
            let features = source
                .get_resource(url)
                .await
                .with_context(|| format!("Failed to fetch features for {url}"))?;

            let result = json!({
                "metadata": source.metadata(),
                "features": features,
            });
            let rendered = serde_json::to_string_pretty(&result)?;

            match output {
                Some(path) => {
                    std::fs::write(path, rendered)
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    eprintln!("Wrote {} features to {:?}", features.len(), path);
                }
                None => println!("{rendered}"),
            }
        }
        Command::Config { save } => {
            if *save {
                config.save().context("Failed to save configuration")?;
            }
            if let Some(path) = Config::config_path() {
                eprintln!("Config file: {:?}", path);
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
