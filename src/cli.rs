//! CLI argument definitions using clap derive macros.

use clap::Parser;

use igscraper_core::ErrorKind;
use igscraper_core::config::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_WORKERS};

/// Download all public photos of an account, resumably.
///
/// igscraper walks the account's timeline page by page, downloads every
/// photo concurrently under a shared rate limit, and checkpoints progress so
/// an interrupted run can be resumed with --resume.
#[derive(Parser, Debug)]
#[command(name = "igscraper")]
#[command(author, version, about)]
pub struct Args {
    /// Account handle to harvest
    pub handle: String,

    /// Continue from an existing checkpoint
    #[arg(long)]
    pub resume: bool,

    /// Discard any existing checkpoint and start over
    #[arg(long, conflicts_with = "resume")]
    pub force_restart: bool,

    /// Directory under which <handle>_photos/ is created
    #[arg(short, long, default_value = ".")]
    pub output: std::path::PathBuf,

    /// Number of concurrent download workers (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_WORKERS as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub workers: u8,

    /// Maximum retry attempts per request (0 = unbounded, max 10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_RETRY_ATTEMPTS as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Session id header forwarded to the provider
    #[arg(long, env = "IGSCRAPER_SESSION_ID")]
    pub session_id: Option<String>,

    /// CSRF token header forwarded to the provider
    #[arg(long, env = "IGSCRAPER_CSRF_TOKEN")]
    pub csrf_token: Option<String>,

    /// User-Agent header forwarded to the provider
    #[arg(long, env = "IGSCRAPER_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Maps a session error kind onto the process exit code.
///
/// Categories: authentication (3), target not found (4), rate limit
/// exhausted (5), network exhausted (6), interrupted (130), internal or
/// malformed durable state (1). Configuration errors (2) never reach this
/// mapping; clap reports bad usage with its own exit code before a session
/// starts.
#[must_use]
pub fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Auth => 3,
        ErrorKind::NotFound => 4,
        ErrorKind::RateLimit => 5,
        ErrorKind::Network | ErrorKind::ServerError => 6,
        ErrorKind::Canceled => 130,
        ErrorKind::Parsing | ErrorKind::Unknown => 1,
    }
}
