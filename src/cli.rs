use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::site::DEFAULT_BASE_URL;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download a book into one txt or epub file. Re-running resumes.
    Download(DownloadArgs),
    /// Print the chapter list of a book without downloading.
    Chapters(ChaptersArgs),
    /// Show progress and unresolved chapters recorded in a save directory.
    Status(StatusArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Txt,
    Epub,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Book id as it appears in the site URL.
    #[arg(long)]
    pub book: String,

    /// Save directory (status file, failure report and the output file).
    #[arg(long)]
    pub out: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Txt)]
    pub format: OutputFormat,

    /// First chapter to download (1-based, inclusive).
    #[arg(long)]
    pub start: Option<usize>,

    /// Last chapter to download (1-based, inclusive).
    #[arg(long)]
    pub end: Option<usize>,

    /// Concurrent chapter fetches.
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Retry rounds over failed chapters after the first pass.
    #[arg(long, default_value_t = 3)]
    pub max_retry_rounds: u32,

    /// Fetch attempts per chapter within a round.
    #[arg(long, default_value_t = 3)]
    pub fetch_retries: u32,

    /// Per-page HTTP timeout in seconds.
    #[arg(long, default_value_t = 20)]
    pub page_timeout_secs: u64,

    /// Site root.
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,
}

#[derive(Debug, Args)]
pub struct ChaptersArgs {
    /// Book id as it appears in the site URL.
    #[arg(long)]
    pub book: String,

    /// Site root.
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Save directory used by `download`.
    #[arg(long)]
    pub out: String,
}
