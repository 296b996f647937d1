use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;

use crate::cli::OutputFormat;
use crate::formats::{BookMeta, ChapterDescriptor, FailureRecord};
use crate::output::{artifact_path, span_artifact_path, writer_for};
use crate::pipeline::batch::BatchRunner;
use crate::pipeline::context::RunContext;
use crate::pipeline::retry::{RetryOutcome, RetryScheduler};
use crate::status_store;

/// Inclusive chapter range in 1-based numbering, as typed by users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChapterRange {
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl ChapterRange {
    pub fn is_full(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Keeps the chapters whose 0-based index falls inside the range.
    pub fn apply(&self, chapters: Vec<ChapterDescriptor>) -> anyhow::Result<Vec<ChapterDescriptor>> {
        if self.start == Some(0) || self.end == Some(0) {
            anyhow::bail!("chapter numbers start at 1");
        }
        let start = self.start.map_or(0, |n| n - 1);
        let end = self.end.map_or(usize::MAX, |n| n - 1);
        if start > end {
            anyhow::bail!(
                "start chapter {} is after end chapter {}",
                start + 1,
                end + 1
            );
        }

        let total = chapters.len();
        let selected = chapters
            .into_iter()
            .filter(|chapter| (start..=end).contains(&chapter.index))
            .collect::<Vec<_>>();
        if selected.is_empty() {
            anyhow::bail!("no chapters in requested range (book has {total} chapters)");
        }
        Ok(selected)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub book_id: String,
    pub format: OutputFormat,
    pub range: ChapterRange,
}

#[derive(Debug, Clone)]
pub struct ResolvedBook {
    pub meta: BookMeta,
    pub chapters: Vec<ChapterDescriptor>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub book: BookMeta,
    pub requested: usize,
    pub pending: usize,
    pub succeeded: usize,
    pub retry_rounds: u32,
    pub failures: Vec<FailureRecord>,
    pub artifact: Option<PathBuf>,
    /// Earlier runs already completed some chapters of this save directory.
    pub resumed: bool,
}

impl RunSummary {
    pub fn success_rate(&self) -> f64 {
        if self.pending == 0 {
            return 100.0;
        }
        self.succeeded as f64 * 100.0 / self.pending as f64
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Every requested chapter was already in the status file; nothing was written.
    AlreadyComplete { book: BookMeta, requested: usize },
    Finished(RunSummary),
    /// Cancelled mid-run; the partial artifact and status were still saved.
    Interrupted(RunSummary),
}

/// Fetches the book page and chapter list. Either coming back empty aborts.
pub async fn resolve_book(ctx: &RunContext, book_id: &str) -> anyhow::Result<ResolvedBook> {
    let book_url = ctx.site.book_url(book_id);
    tracing::info!(book_id, url = %book_url, "resolve book metadata");
    let html = fetch_setup_page(ctx, &book_url, ctx.site.book_ready_selector())
        .await
        .context("fetch book page")?;
    let meta = ctx
        .site
        .parse_book(&html)
        .ok_or_else(|| anyhow::anyhow!("book metadata not found at {book_url}; check the book id"))?;
    tracing::info!(name = %meta.name, author = %meta.author, "book resolved");

    let catalog_url = ctx.site.catalog_url(book_id);
    tracing::info!(url = %catalog_url, "resolve chapter list");
    let html = fetch_setup_page(ctx, &catalog_url, ctx.site.catalog_ready_selector())
        .await
        .context("fetch chapter list")?;
    let chapters = ctx.site.parse_chapters(&html);
    if chapters.is_empty() {
        anyhow::bail!("no chapters found at {catalog_url}");
    }
    tracing::info!(chapters = chapters.len(), "chapter list resolved");

    Ok(ResolvedBook { meta, chapters })
}

async fn fetch_setup_page(
    ctx: &RunContext,
    url: &str,
    ready_selector: Option<&str>,
) -> anyhow::Result<String> {
    let html = tokio::time::timeout(ctx.config.attempt_timeout, ctx.fetcher.fetch(url, ready_selector))
        .await
        .with_context(|| format!("timed out fetching {url}"))??;
    if html.trim().is_empty() {
        anyhow::bail!("empty page: {url}");
    }
    Ok(html)
}

/// Sequences one download run from resolution to the final flush.
pub struct Orchestrator {
    ctx: Arc<RunContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    /// Transport resources are released on every exit path.
    pub async fn run(&self, request: &DownloadRequest) -> anyhow::Result<RunOutcome> {
        let outcome = self.try_run(request).await;
        self.ctx.fetcher.shutdown().await;
        outcome
    }

    async fn try_run(&self, request: &DownloadRequest) -> anyhow::Result<RunOutcome> {
        let ctx = &self.ctx;

        let ResolvedBook { meta, chapters } = resolve_book(ctx, &request.book_id).await?;

        let chapters = request.range.apply(chapters).context("apply chapter range")?;
        if request.range.is_full() {
            tracing::info!(chapters = chapters.len(), "downloading all chapters");
        } else {
            tracing::info!(
                chapters = chapters.len(),
                start = ?request.range.start,
                end = ?request.range.end,
                "downloading chapter range"
            );
        }

        tokio::fs::create_dir_all(ctx.save_dir())
            .await
            .with_context(|| format!("create save dir: {}", ctx.save_dir().display()))?;
        let status = status_store::load(ctx.save_dir()).await;
        tracing::info!(completed = status.len(), "status loaded");

        let pending = chapters
            .iter()
            .filter(|chapter| !status.contains(&chapter.id))
            .cloned()
            .collect::<Vec<_>>();
        if pending.is_empty() {
            tracing::info!(requested = chapters.len(), "all requested chapters already downloaded");
            return Ok(RunOutcome::AlreadyComplete {
                book: meta,
                requested: chapters.len(),
            });
        }
        tracing::info!(pending = pending.len(), name = %meta.name, "chapters to download");

        let resumed = !status.is_empty();
        ctx.state().lock().await.status = status;

        let runner = BatchRunner::new(Arc::clone(ctx));
        let failures = runner.run(pending.clone()).await;
        let retry = RetryScheduler::new(runner).run(failures).await;

        let summary = self
            .finish(meta, request, chapters.len(), pending.len(), resumed, retry)
            .await;
        if ctx.interrupt.is_cancelled() {
            Ok(RunOutcome::Interrupted(summary))
        } else {
            Ok(RunOutcome::Finished(summary))
        }
    }

    /// Writes the (possibly partial) artifact, then the status file and the
    /// failure report. Write errors here are logged, not returned.
    ///
    /// A resumed run never overwrites an existing artifact: the chapters it
    /// holds are only recorded in the status file.
    async fn finish(
        &self,
        book: BookMeta,
        request: &DownloadRequest,
        requested: usize,
        pending: usize,
        resumed: bool,
        retry: RetryOutcome,
    ) -> RunSummary {
        let ctx = &self.ctx;
        let (results, span) = {
            let state = ctx.state().lock().await;
            let first = state.results.keys().next().copied();
            let last = state.results.keys().next_back().copied();
            (
                state.results.values().cloned().collect::<Vec<_>>(),
                first.zip(last),
            )
        };
        let succeeded = results.len();

        let artifact = if results.is_empty() {
            tracing::warn!("no chapters were downloaded; skipping artifact");
            None
        } else {
            let writer = writer_for(request.format);
            let full_path = artifact_path(ctx.save_dir(), &book.name, writer.as_ref());
            let existing = tokio::fs::try_exists(&full_path).await.unwrap_or(false);
            let path = match span {
                Some((first, last)) if resumed && existing => {
                    let path = span_artifact_path(
                        ctx.save_dir(),
                        &book.name,
                        first + 1,
                        last + 1,
                        writer.as_ref(),
                    );
                    tracing::info!(
                        kept = %full_path.display(),
                        path = %path.display(),
                        "resumed run; keeping earlier artifact"
                    );
                    path
                }
                _ => full_path,
            };
            let write_path = path.clone();
            let write_book = book.clone();
            let written = tokio::task::spawn_blocking(move || {
                writer.write(&write_path, &write_book, &results)
            })
            .await
            .context("join artifact writer")
            .and_then(|written| written);
            match written {
                Ok(()) => {
                    tracing::info!(path = %path.display(), chapters = succeeded, "artifact written");
                    Some(path)
                }
                Err(err) => {
                    tracing::error!(path = %path.display(), ?err, "failed to write artifact");
                    None
                }
            }
        };

        ctx.persist_status().await;

        let failures = retry
            .failures
            .iter()
            .map(FailureRecord::from)
            .collect::<Vec<_>>();
        for failure in &failures {
            tracing::warn!(
                index = failure.index,
                id = %failure.id,
                title = %failure.title,
                url = %failure.url,
                "chapter unresolved"
            );
        }
        if let Err(err) = status_store::save_failure_report(ctx.save_dir(), &failures).await {
            tracing::warn!(?err, "failed to save failure report");
        }

        RunSummary {
            book,
            requested,
            pending,
            succeeded,
            retry_rounds: retry.rounds,
            failures,
            artifact,
            resumed,
        }
    }
}
