//! Download orchestration: one batch pass, bounded retry rounds, then the
//! final flush of artifact, status file and failure report.

pub mod batch;
pub mod context;
pub mod orchestrator;
pub mod retry;

pub use batch::{BatchRunner, normalize_content};
pub use context::{PipelineConfig, RunContext, RunState};
pub use orchestrator::{
    ChapterRange, DownloadRequest, Orchestrator, ResolvedBook, RunOutcome, RunSummary,
    resolve_book,
};
pub use retry::{RetryOutcome, RetryScheduler, StopReason};
