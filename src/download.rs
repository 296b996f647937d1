use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::cli::DownloadArgs;
use crate::fetch::{HttpFetcher, HttpFetcherConfig};
use crate::interrupt::InterruptCoordinator;
use crate::pipeline::{
    ChapterRange, DownloadRequest, Orchestrator, PipelineConfig, RunContext, RunOutcome,
    RunSummary,
};
use crate::site::ShubaSite;

pub async fn run(args: DownloadArgs) -> anyhow::Result<()> {
    if args.workers == 0 {
        anyhow::bail!("--workers must be at least 1");
    }

    let save_dir = PathBuf::from(&args.out);
    let config = PipelineConfig {
        workers: args.workers,
        fetch_retries: args.fetch_retries,
        max_retry_rounds: args.max_retry_rounds,
        ..PipelineConfig::default()
    };
    let fetcher_config = HttpFetcherConfig {
        page_timeout: Duration::from_secs(args.page_timeout_secs),
        ..HttpFetcherConfig::from_env()
    };
    let site = ShubaSite::new(&args.base_url).context("parse --base-url")?;

    let interrupt = InterruptCoordinator::new();
    let listener = interrupt.listen_for_signals();

    let ctx = Arc::new(RunContext::new(
        config.clone(),
        save_dir.clone(),
        Arc::new(HttpFetcher::new(fetcher_config, config.workers)),
        Arc::new(site),
        interrupt,
    ));

    let request = DownloadRequest {
        book_id: args.book.clone(),
        format: args.format,
        range: ChapterRange {
            start: args.start,
            end: args.end,
        },
    };
    tracing::info!(
        book = %request.book_id,
        out = %save_dir.display(),
        format = ?request.format,
        workers = config.workers,
        "download"
    );

    let outcome = Orchestrator::new(ctx).run(&request).await;
    listener.abort();

    match outcome.context("download book")? {
        RunOutcome::AlreadyComplete { book, requested } => {
            println!(
                "{}: all {requested} requested chapters are already downloaded.",
                book.name
            );
            println!(
                "Delete {} to download again.",
                crate::status_store::status_path(&save_dir).display()
            );
        }
        RunOutcome::Finished(summary) => print_summary(&summary, false),
        RunOutcome::Interrupted(summary) => print_summary(&summary, true),
    }

    Ok(())
}

fn print_summary(summary: &RunSummary, interrupted: bool) {
    if interrupted {
        println!("Interrupted. Progress has been saved.");
    }
    println!("Book:         {} ({})", summary.book.name, summary.book.author);
    println!("Requested:    {}", summary.requested);
    println!("Pending:      {}", summary.pending);
    println!("Succeeded:    {}", summary.succeeded);
    println!("Failed:       {}", summary.failures.len());
    println!("Success rate: {:.1}%", summary.success_rate());
    if summary.retry_rounds > 0 {
        println!("Retry rounds: {}", summary.retry_rounds);
    }
    match &summary.artifact {
        Some(path) => println!("Saved to:     {}", path.display()),
        None => println!("No output file was written."),
    }
    if summary.resumed {
        println!("Chapters from earlier runs stay in the output files of those runs.");
    }

    if !summary.failures.is_empty() {
        println!();
        println!("Unresolved chapters:");
        for failure in &summary.failures {
            println!(
                "  #{} {} [{}] {}",
                failure.index, failure.title, failure.id, failure.url
            );
        }
    }

    if interrupted || !summary.failures.is_empty() {
        println!();
        println!("Run the same command again to resume; finished chapters are skipped.");
    }
}
