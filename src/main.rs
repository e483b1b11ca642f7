//! CLI entry point for the gallery downloader.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use exdownloader_core::download::{
    DEFAULT_CONCURRENCY, DEFAULT_WAVE_DELAY, DownloadOptions, DownloadOrchestrator,
    LocalFilesystem, fetch_thumbnail,
};
use exdownloader_core::queue::{GalleryQueue, QueueRunner, RunOutcome};
use exdownloader_core::session::{DEFAULT_REQUEST_TIMEOUT_SECS, ProxyConfig, Session};
use exdownloader_core::site::utils::site_root;
use exdownloader_core::site::{
    GalleryCatalog, SiteClient, fetch_account_limits, parse_gallery_address,
};
use exdownloader_core::{Database, SqliteMetadataCache};
use tracing::{debug, error, info, warn};
use url::Url;

mod cli;
mod config;
mod progress;

use cli::Args;
use config::{FileConfig, load_file_config};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
    let file = load_file_config(args.config.as_deref())?;

    let mut addresses = Vec::new();
    let mut failed = false;
    for raw in &args.galleries {
        match parse_gallery_address(raw) {
            Ok((url, _)) => addresses.push((raw.clone(), url)),
            Err(err) => {
                error!(address = %raw, error = %err, "skipping gallery");
                failed = true;
            }
        }
    }

    let session = Arc::new(build_session(&args, &file, &addresses));
    let client = session.connect().context("failed to build HTTP client")?;

    if args.show_limits {
        show_limits(&client, &args.site).await;
        if args.galleries.is_empty() {
            return Ok(ExitCode::SUCCESS);
        }
    }

    let options = DownloadOptions {
        output_dir: args
            .output_dir
            .clone()
            .or_else(|| file.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(".")),
        rename_by_index: args.rename_by_index || file.rename_by_index.unwrap_or(false),
        overwrite: args.overwrite || file.overwrite.unwrap_or(false),
    };
    let thumbnails = args.thumbnails || file.thumbnails.unwrap_or(false);

    let db = match &file.cache_path {
        Some(path) => Database::new(path)
            .await
            .with_context(|| format!("failed to open metadata cache {}", path.display()))?,
        None => Database::new_in_memory().await?,
    };
    let catalog = GalleryCatalog::new(Arc::new(SqliteMetadataCache::new(db.clone())));

    let queue = GalleryQueue::new();
    for (raw, _) in &addresses {
        let gallery = match catalog.information(&client, raw).await {
            Ok(gallery) => gallery,
            Err(err) => {
                failed = true;
                if let Some(ban) = err.ban_condition() {
                    error!(remaining = %ban, "IP is temporarily banned; try again later");
                    db.close().await;
                    return Ok(ExitCode::FAILURE);
                }
                error!(address = %raw, error = %err, "failed to fetch gallery information");
                continue;
            }
        };
        if thumbnails {
            let dir = options.gallery_dir(&gallery);
            match fetch_thumbnail(&client, &LocalFilesystem, &gallery, &dir).await {
                Ok(path) => debug!(path = %path.display(), "cover saved"),
                Err(err) => warn!(gallery_id = gallery.id, error = %err, "cover not saved"),
            }
        }
        queue.enqueue(gallery);
    }

    let concurrency = args
        .concurrency
        .map(usize::from)
        .or(file.concurrency)
        .unwrap_or(DEFAULT_CONCURRENCY);
    let wave_delay = file
        .wave_delay_ms
        .map_or(DEFAULT_WAVE_DELAY, Duration::from_millis);
    let orchestrator =
        Arc::new(DownloadOrchestrator::new(concurrency)?.with_wave_delay(wave_delay));
    let runner = Arc::new(QueueRunner::new(
        queue.clone(),
        Arc::clone(&session),
        orchestrator,
        options,
    ));

    let (progress, stop_progress) =
        progress::spawn_progress_ui(!args.quiet && io::stderr().is_terminal(), &queue);
    let ctrl_c = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling active gallery");
                runner.cancel();
            }
        })
    };

    let report = runner.run_until_idle().await;
    ctrl_c.abort();
    stop_progress.cancel();
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    info!(completed = report.completed.len(), "queue finished");
    match report.outcome {
        RunOutcome::Idle | RunOutcome::Completed(_) => {}
        RunOutcome::Cancelled(entry) => {
            info!(entry = %entry, "download cancelled; gallery returned to the queue");
            failed = true;
        }
        RunOutcome::Halted { entry, error } => {
            failed = true;
            match error.ban_condition() {
                Some(ban) => error!(entry = %entry, remaining = %ban, "IP is temporarily banned"),
                None => error!(entry = %entry, error = %error, "gallery halted"),
            }
        }
        RunOutcome::Blocked(entry) => {
            failed = true;
            error!(entry = %entry, "queue blocked by an unfinished gallery");
        }
    }

    db.close().await;
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Session with proxy and login cookies for every site the run touches.
fn build_session(args: &Args, file: &FileConfig, addresses: &[(String, Url)]) -> Session {
    let timeout = Duration::from_secs(
        file.request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
    );
    let mut session = Session::new(timeout);
    if let Some(credentials) = &file.credentials {
        let mut roots = vec![site_root(&args.site)];
        for (_, url) in addresses {
            let root = site_root(url);
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
        for root in &roots {
            session = session.with_credentials(root, credentials);
        }
    }

    let file_proxy = file.proxy();
    session.set_proxy(ProxyConfig::new(
        args.http_proxy.clone().unwrap_or(file_proxy.http_proxy),
        args.https_proxy.clone().unwrap_or(file_proxy.https_proxy),
    ));
    session
}

async fn show_limits(client: &SiteClient, site: &Url) {
    let home = match site.join("home.php") {
        Ok(home) => home,
        Err(err) => {
            error!(site = %site, error = %err, "invalid site address");
            return;
        }
    };
    match fetch_account_limits(client, &home).await {
        Ok(limits) => println!(
            "Image limits: {} / {} used ({} remaining)",
            limits.used,
            limits.limit,
            limits.remaining()
        ),
        Err(err) => error!(error = %err, "failed to read account limits"),
    }
}
