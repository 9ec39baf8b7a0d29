mod cli;
mod config;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use harvest_logging::{
    harvest_error, harvest_info, harvest_warn, LogDestination, DEFAULT_LOG_FILE,
};
use harvester_engine::{
    Downloader, FetchSettings, HarvestOptions, HarvestSettings, Harvester, ReqwestFetcher,
};
use log::LevelFilter;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Command, DownloadArgs, HarvestArgs, DEFAULT_OUTPUT_DIR, DEFAULT_TOKEN_ENV};
use crate::config::AppConfig;
use crate::progress::ConsoleProgress;

/// Conventional status for a run stopped by Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            harvest_error!("{:#}", err);
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let path = cli
        .log_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
    let (destination, level) = if cli.verbose {
        (LogDestination::Both(path), LevelFilter::Debug)
    } else {
        (LogDestination::File(path), LevelFilter::Info)
    };
    harvest_logging::initialize(destination, level);
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Harvest(args) => cmd_harvest(args, &config).await,
        Command::Download(args) => cmd_download(args, &config).await,
        Command::GetJson { url } => cmd_get_json(&url, &config).await,
    }
}

async fn cmd_harvest(args: HarvestArgs, config: &AppConfig) -> Result<ExitCode> {
    let mut settings = HarvestSettings::default();
    config.apply(&mut settings);
    if let Some(concurrency) = args.concurrency {
        settings.concurrency = concurrency;
    }

    let token_env = args
        .token_env
        .or_else(|| config.token_env.clone())
        .unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string());
    let options = HarvestOptions {
        output_dir: args
            .output
            .or_else(|| config.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        file_type: args
            .file_type
            .map(Into::into)
            .or(config.file_type)
            .unwrap_or_default(),
        recursive: !args.no_recursive && config.recursive.unwrap_or(true),
        auth: read_token(&token_env),
        image_dir: args.image_dir.or_else(|| config.image_dir.clone()),
    };

    let harvester = Harvester::new(settings).context("failed to set up HTTP client")?;
    let cancel = CancellationToken::new();
    spawn_ctrl_c_watcher(cancel.clone());

    let sink = ConsoleProgress::new(false);
    let report = harvester
        .harvest(&args.origin, &options, &sink, &cancel)
        .await
        .with_context(|| format!("cannot harvest {}", args.origin))?;

    println!("{}", report.summary_line());
    for error in &report.errors {
        println!("  {} ({}): {}", error.location, error.stage, error.reason);
    }
    if report.cancelled {
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_download(args: DownloadArgs, config: &AppConfig) -> Result<ExitCode> {
    let mut settings = FetchSettings::default();
    if let Some(user_agent) = &config.user_agent {
        settings.user_agent = user_agent.clone();
    }
    // Weights routinely exceed the page-sized default cap.
    settings.max_bytes = u64::MAX;
    settings.request_timeout = std::time::Duration::from_secs(60 * 60);

    let auth = args.token_env.as_deref().and_then(read_token);
    let downloader = Downloader::new(ReqwestFetcher::new(settings)?);
    let file = downloader
        .download_to_dir(
            &args.url,
            &args.dir,
            args.name.as_deref(),
            auth.as_deref(),
            &ConsoleProgress::new(true),
        )
        .await
        .with_context(|| format!("download of {} failed", args.url))?;
    println!("Saved {} ({} bytes)", file.path.display(), file.bytes_written);
    Ok(ExitCode::SUCCESS)
}

async fn cmd_get_json(url: &str, config: &AppConfig) -> Result<ExitCode> {
    let mut settings = FetchSettings::default();
    if let Some(user_agent) = &config.user_agent {
        settings.user_agent = user_agent.clone();
    }
    let fetcher = ReqwestFetcher::new(settings)?;
    harvest_info!("Making request to {}", url);
    let document = fetcher
        .fetch_json(url)
        .await
        .with_context(|| format!("request to {url} failed"))?;
    if let Some(object) = document.as_object() {
        harvest_info!("Received {} top-level entries", object.len());
    }
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(ExitCode::SUCCESS)
}

fn read_token(var: &str) -> Option<String> {
    match std::env::var(var) {
        Ok(token) if !token.trim().is_empty() => Some(token.trim().to_string()),
        _ => {
            harvest_info!("{} not set; using anonymous access", var);
            None
        }
    }
}

fn spawn_ctrl_c_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            harvest_warn!("Interrupted; finishing the current candidate");
            eprintln!("Interrupted, stopping after the current candidate...");
            cancel.cancel();
        }
    });
}
