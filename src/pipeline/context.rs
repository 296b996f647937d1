use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::fetch::Fetcher;
use crate::formats::ChapterResult;
use crate::interrupt::InterruptCoordinator;
use crate::site::Site;
use crate::status_store::{self, StatusSet};

/// Numeric pipeline parameters.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent fetches. Kept at 1 by default to look less like a bot.
    pub workers: usize,
    /// Fetch attempts per chapter within one round.
    pub fetch_retries: u32,
    pub retry_delay: Duration,
    /// Extra rounds over the failure list after the initial pass.
    pub max_retry_rounds: u32,
    pub round_cooldown: Duration,
    /// Flush the status file every this many recorded results (0 disables).
    pub checkpoint_interval: usize,
    /// Upper bound for a single fetch call.
    pub attempt_timeout: Duration,
    /// How long a cancelled batch waits for in-flight fetches.
    pub cancel_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            fetch_retries: 3,
            retry_delay: Duration::from_secs(2),
            max_retry_rounds: 3,
            round_cooldown: Duration::from_secs(3),
            checkpoint_interval: 10,
            attempt_timeout: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(1),
        }
    }
}

/// Mutable state shared by every worker of a run. All access goes through
/// [`RunContext::state`].
#[derive(Debug, Default)]
pub struct RunState {
    /// Chapters acquired in this run, keyed by index.
    pub results: BTreeMap<usize, ChapterResult>,
    pub status: StatusSet,
}

/// Everything a run needs, passed explicitly to each stage.
pub struct RunContext {
    pub config: PipelineConfig,
    pub save_dir: PathBuf,
    pub fetcher: Arc<dyn Fetcher>,
    pub site: Arc<dyn Site>,
    pub interrupt: InterruptCoordinator,
    state: Mutex<RunState>,
}

impl RunContext {
    pub fn new(
        config: PipelineConfig,
        save_dir: impl Into<PathBuf>,
        fetcher: Arc<dyn Fetcher>,
        site: Arc<dyn Site>,
        interrupt: InterruptCoordinator,
    ) -> Self {
        Self {
            config,
            save_dir: save_dir.into(),
            fetcher,
            site,
            interrupt,
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn state(&self) -> &Mutex<RunState> {
        &self.state
    }

    /// Writes the status set while holding the state lock. Failures are
    /// logged; the run keeps its in-memory progress.
    pub async fn persist_status(&self) -> bool {
        let state = self.state.lock().await;
        persist_locked(&self.save_dir, &state.status).await
    }
}

pub(crate) async fn persist_locked(save_dir: &Path, status: &StatusSet) -> bool {
    match status_store::save(save_dir, status).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(?err, completed = status.len(), "failed to save status");
            false
        }
    }
}
