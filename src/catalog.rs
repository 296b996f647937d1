use std::sync::Arc;

use anyhow::Context as _;

use crate::cli::ChaptersArgs;
use crate::fetch::{Fetcher as _, HttpFetcher, HttpFetcherConfig};
use crate::interrupt::InterruptCoordinator;
use crate::pipeline::{PipelineConfig, RunContext, resolve_book};
use crate::site::ShubaSite;

/// Prints the numbered chapter list so users can pick `--start`/`--end`.
pub async fn run(args: ChaptersArgs) -> anyhow::Result<()> {
    let site = ShubaSite::new(&args.base_url).context("parse --base-url")?;
    let fetcher = Arc::new(HttpFetcher::new(HttpFetcherConfig::from_env(), 1));
    let ctx = RunContext::new(
        PipelineConfig::default(),
        std::env::temp_dir(),
        fetcher.clone(),
        Arc::new(site),
        InterruptCoordinator::new(),
    );

    let resolved = resolve_book(&ctx, &args.book).await;
    fetcher.shutdown().await;
    let resolved = resolved.context("resolve book")?;

    println!("{} ({})", resolved.meta.name, resolved.meta.author);
    println!("{} chapters", resolved.chapters.len());
    let width = resolved.chapters.len().to_string().len();
    for chapter in &resolved.chapters {
        println!("{:>width$}  {}", chapter.index + 1, chapter.title);
    }
    Ok(())
}
