//! CLI entry point for the igscraper tool.

use std::collections::HashMap;

use clap::Parser;
use igscraper_core::{Config, RunOptions, Scraper};
use tracing::{debug, error, info};

mod cli;

use cli::{Args, exit_code};

#[tokio::main]
async fn main() {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
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

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let mut headers = HashMap::new();
    if let Some(session_id) = &args.session_id {
        headers.insert("Cookie".to_string(), format!("sessionid={session_id}"));
    }
    if let Some(csrf_token) = &args.csrf_token {
        headers.insert("X-CSRFToken".to_string(), csrf_token.clone());
    }
    if let Some(user_agent) = &args.user_agent {
        headers.insert("User-Agent".to_string(), user_agent.clone());
    }

    let config = Config {
        workers: usize::from(args.workers),
        retry_max_attempts: u32::from(args.max_retries),
        output_base_dir: args.output.clone(),
        headers,
        ..Config::default()
    };

    let scraper = Scraper::new(config);

    // Ctrl-C cancels the session; the checkpoint survives for --resume.
    let cancel = scraper.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing in-flight downloads");
            cancel.cancel();
        }
    });

    let opts = RunOptions {
        resume: args.resume,
        force_restart: args.force_restart,
    };

    info!(handle = %args.handle, "starting download session");
    match scraper.run(&args.handle, opts).await {
        Ok(summary) => {
            info!(
                downloaded = summary.downloaded,
                already_present = summary.already_present,
                failed = summary.failed,
                pages = summary.pages_processed,
                "session complete"
            );
            if summary.failed > 0 {
                info!(
                    failed = summary.failed,
                    "some downloads failed; re-run with --resume to retry"
                );
            }
        }
        Err(err) => {
            error!(kind = %err.kind(), error = %err, "session failed");
            std::process::exit(exit_code(err.kind()));
        }
    }
}
