use std::time::Duration;

use crate::formats::ChapterDescriptor;
use crate::pipeline::batch::BatchRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Nothing left to retry.
    Resolved,
    RoundsExhausted,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub failures: Vec<ChapterDescriptor>,
    /// Retry rounds actually run, not counting the initial pass.
    pub rounds: u32,
    pub stop_reason: StopReason,
}

/// Re-submits failed chapters to the [`BatchRunner`] for a bounded number of
/// rounds with a cooldown in between.
pub struct RetryScheduler {
    runner: BatchRunner,
    max_rounds: u32,
    cooldown: Duration,
}

impl RetryScheduler {
    pub fn new(runner: BatchRunner) -> Self {
        let config = &runner.context().config;
        let max_rounds = config.max_retry_rounds;
        let cooldown = config.round_cooldown;
        Self {
            runner,
            max_rounds,
            cooldown,
        }
    }

    pub async fn run(&self, mut failures: Vec<ChapterDescriptor>) -> RetryOutcome {
        let ctx = self.runner.context();
        let mut rounds = 0_u32;

        let stop_reason = loop {
            {
                let state = ctx.state().lock().await;
                failures.retain(|chapter| !state.status.contains(&chapter.id));
            }

            if ctx.interrupt.is_cancelled() {
                break StopReason::Cancelled;
            }
            if failures.is_empty() {
                break StopReason::Resolved;
            }
            if rounds >= self.max_rounds {
                break StopReason::RoundsExhausted;
            }

            rounds += 1;
            tracing::warn!(
                failed = failures.len(),
                round = rounds,
                max_rounds = self.max_rounds,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "retrying failed chapters"
            );
            for chapter in failures.iter().take(5) {
                tracing::info!(chapter_index = chapter.index, id = %chapter.id, title = %chapter.title, "queued for retry");
            }
            if failures.len() > 5 {
                tracing::info!(more = failures.len() - 5, "more chapters queued for retry");
            }

            if !ctx.interrupt.sleep(self.cooldown).await {
                break StopReason::Cancelled;
            }
            failures = self.runner.run(failures).await;
        };

        tracing::info!(rounds, remaining = failures.len(), ?stop_reason, "retry scheduler done");
        RetryOutcome {
            failures,
            rounds,
            stop_reason,
        }
    }
}
