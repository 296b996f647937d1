use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::formats::{ChapterDescriptor, ChapterResult};
use crate::interrupt::InterruptCoordinator;
use crate::pipeline::context::{RunContext, persist_locked};

/// One sweep over a set of chapters with a fixed pool of workers.
#[derive(Clone)]
pub struct BatchRunner {
    ctx: Arc<RunContext>,
}

struct BatchShared {
    ctx: Arc<RunContext>,
    queue: Mutex<mpsc::Receiver<ChapterDescriptor>>,
    /// Set once the batch has returned; late completions are discarded.
    sealed: AtomicBool,
    done: AtomicUsize,
    total: usize,
}

impl BatchRunner {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Attempts every chapter in `pending` and returns the ones that were not
    /// acquired, in their original order. Chapters skipped because of
    /// cancellation are returned too.
    pub async fn run(&self, pending: Vec<ChapterDescriptor>) -> Vec<ChapterDescriptor> {
        if pending.is_empty() {
            return pending;
        }

        let workers = self.ctx.config.workers.max(1).min(pending.len());
        let (tx, rx) = mpsc::channel::<ChapterDescriptor>(workers);
        let shared = Arc::new(BatchShared {
            ctx: Arc::clone(&self.ctx),
            queue: Mutex::new(rx),
            sealed: AtomicBool::new(false),
            done: AtomicUsize::new(0),
            total: pending.len(),
        });

        tracing::info!(chapters = pending.len(), workers, "batch started");

        let mut join_set = JoinSet::new();
        for worker in 0..workers {
            join_set.spawn(worker_loop(worker, Arc::clone(&shared)));
        }

        let mut dispatched = 0_usize;
        for chapter in &pending {
            let permit = tokio::select! {
                biased;
                _ = self.ctx.interrupt.cancelled() => None,
                permit = tx.reserve() => permit.ok(),
            };
            let Some(permit) = permit else {
                break;
            };
            permit.send(chapter.clone());
            dispatched += 1;
        }
        drop(tx);

        if dispatched < pending.len() {
            tracing::info!(
                dispatched,
                skipped = pending.len() - dispatched,
                "dispatch stopped by interrupt"
            );
        }

        wait_for_workers(&mut join_set, &self.ctx.interrupt, self.ctx.config.cancel_grace).await;
        // Abandoned fetches finish on their own; `sealed` keeps them out of the results.
        join_set.detach_all();

        shared.sealed.store(true, Ordering::SeqCst);
        let state = self.ctx.state().lock().await;
        let failures = pending
            .into_iter()
            .filter(|chapter| !state.results.contains_key(&chapter.index))
            .collect::<Vec<_>>();

        tracing::info!(
            succeeded = shared.total - failures.len(),
            failed = failures.len(),
            "batch finished"
        );
        failures
    }
}

async fn wait_for_workers(
    join_set: &mut JoinSet<()>,
    interrupt: &InterruptCoordinator,
    grace: Duration,
) {
    let drain = async {
        while let Some(joined) = join_set.join_next().await {
            if let Err(err) = joined {
                tracing::error!(?err, "batch worker failed");
            }
        }
    };
    tokio::pin!(drain);

    tokio::select! {
        _ = &mut drain => {}
        _ = interrupt.cancelled() => {
            if tokio::time::timeout(grace, &mut drain).await.is_err() {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "in-flight fetches did not finish within grace period; abandoning them"
                );
            }
        }
    }
}

async fn worker_loop(worker: usize, shared: Arc<BatchShared>) {
    let ctx = &shared.ctx;
    loop {
        let next = {
            let mut queue = shared.queue.lock().await;
            queue.recv().await
        };
        let Some(chapter) = next else {
            break;
        };
        if ctx.interrupt.is_cancelled() {
            break;
        }

        tracing::debug!(worker, chapter_index = chapter.index, id = %chapter.id, "chapter started");
        let content = acquire_chapter(ctx, &chapter).await;
        let done = shared.done.fetch_add(1, Ordering::SeqCst) + 1;

        match content {
            Some(content) => {
                if record_success(&shared, &chapter, content).await {
                    tracing::info!(
                        chapter_index = chapter.index,
                        title = %chapter.title,
                        done,
                        total = shared.total,
                        "chapter downloaded"
                    );
                }
            }
            None => {
                tracing::warn!(
                    chapter_index = chapter.index,
                    id = %chapter.id,
                    title = %chapter.title,
                    done,
                    total = shared.total,
                    "chapter download failed"
                );
            }
        }
    }
}

/// Fetches and extracts one chapter, retrying up to the configured count.
/// `None` means the chapter failed for this round.
async fn acquire_chapter(ctx: &RunContext, chapter: &ChapterDescriptor) -> Option<String> {
    let config = &ctx.config;
    let attempts = config.fetch_retries.max(1);

    for attempt in 1..=attempts {
        if ctx.interrupt.is_cancelled() {
            return None;
        }

        let fetched = tokio::time::timeout(
            config.attempt_timeout,
            ctx.fetcher
                .fetch(&chapter.url, ctx.site.chapter_ready_selector()),
        )
        .await;

        match fetched {
            Ok(Ok(html)) if !html.trim().is_empty() => {
                let content = ctx
                    .site
                    .extract(&html, &chapter.title)
                    .map(|text| normalize_content(&text))
                    .filter(|text| !text.is_empty());
                if content.is_some() {
                    return content;
                }
                tracing::debug!(chapter_index = chapter.index, attempt, "chapter content not found");
            }
            Ok(Ok(_)) => {
                tracing::debug!(chapter_index = chapter.index, attempt, "empty page");
            }
            Ok(Err(err)) => {
                tracing::debug!(chapter_index = chapter.index, attempt, ?err, "fetch failed");
            }
            Err(_) => {
                tracing::debug!(
                    chapter_index = chapter.index,
                    attempt,
                    timeout_ms = config.attempt_timeout.as_millis() as u64,
                    "fetch timed out"
                );
            }
        }

        if attempt < attempts && !ctx.interrupt.sleep(config.retry_delay).await {
            return None;
        }
    }

    None
}

async fn record_success(shared: &BatchShared, chapter: &ChapterDescriptor, content: String) -> bool {
    let ctx = &shared.ctx;
    let mut state = ctx.state().lock().await;
    if shared.sealed.load(Ordering::SeqCst) {
        tracing::debug!(chapter_index = chapter.index, "discarding chapter finished after batch ended");
        return false;
    }

    state.results.insert(
        chapter.index,
        ChapterResult {
            title: chapter.title.clone(),
            content,
        },
    );
    state.status.insert(chapter.id.clone());

    let interval = ctx.config.checkpoint_interval;
    let recorded = state.results.len();
    if interval > 0 && recorded % interval == 0 && persist_locked(ctx.save_dir(), &state.status).await {
        tracing::info!(recorded, completed = state.status.len(), "checkpoint saved");
    }
    true
}

/// Strips leftover tags, trims every line and collapses runs of three or more
/// blank lines into one.
pub fn normalize_content(raw: &str) -> String {
    let without_tags = strip_tags(raw).replace('\r', "");

    let mut out = String::with_capacity(without_tags.len());
    let mut blank_run = 0_usize;
    let flush_blanks = |out: &mut String, blank_run: usize| {
        let keep = if blank_run >= 3 { 1 } else { blank_run };
        for _ in 0..keep {
            out.push('\n');
        }
    };

    for line in without_tags.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            flush_blanks(&mut out, blank_run);
        }
        blank_run = 0;
        out.push_str(line);
    }

    out
}

fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(lt) = rest.find('<') {
        out.push_str(&rest[..lt]);
        let after = &rest[lt + 1..];
        match after.find('>') {
            Some(gt) if gt > 0 => rest = &after[gt + 1..],
            _ => {
                out.push('<');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
