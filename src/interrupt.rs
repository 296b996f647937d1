use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared cancellation signal for one run.
///
/// Signal handlers only flip the token; flushing happens in ordinary code that
/// polls [`InterruptCoordinator::is_cancelled`].
#[derive(Debug, Clone, Default)]
pub struct InterruptCoordinator {
    token: CancellationToken,
}

impl InterruptCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn request_cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::warn!("interrupt requested; stopping new work and saving progress");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Sleeps for `duration`, returning early on cancellation. Returns `false`
    /// when cut short.
    pub async fn sleep(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Spawns a task that turns SIGINT/SIGTERM into a cancellation request.
    /// A second signal during the flush exits the process immediately.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(forward_signals(tx));
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator
                .handle_interrupts(rx, || std::process::exit(FORCED_EXIT_CODE))
                .await;
        })
    }

    /// The first interrupt requests a graceful stop; the second calls `force`.
    pub async fn handle_interrupts<F>(&self, mut signals: mpsc::Receiver<&'static str>, force: F)
    where
        F: FnOnce(),
    {
        let Some(first) = signals.recv().await else {
            return;
        };
        tracing::info!(signal = first, "received signal");
        self.request_cancel();

        let Some(second) = signals.recv().await else {
            return;
        };
        tracing::warn!(signal = second, "second interrupt; exiting without saving");
        force();
    }
}

/// Conventional exit status for termination by SIGINT.
const FORCED_EXIT_CODE: i32 = 130;

#[cfg(unix)]
async fn forward_signals(tx: mpsc::Sender<&'static str>) {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    async fn recv(signal: &mut Option<Signal>) -> Option<()> {
        match signal {
            Some(signal) => signal.recv().await,
            None => std::future::pending().await,
        }
    }

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|err| tracing::debug!(?err, "SIGTERM handler unavailable"))
        .ok();
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|err| tracing::debug!(?err, "SIGINT handler unavailable"))
        .ok();
    if sigterm.is_none() && sigint.is_none() {
        tracing::warn!("signal handlers unavailable; falling back to ctrl_c");
        forward_ctrl_c(tx).await;
        return;
    }

    loop {
        let name = tokio::select! {
            Some(()) = recv(&mut sigterm) => "SIGTERM",
            Some(()) = recv(&mut sigint) => "SIGINT",
            else => break,
        };
        if tx.send(name).await.is_err() {
            break;
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(tx: mpsc::Sender<&'static str>) {
    forward_ctrl_c(tx).await;
}

async fn forward_ctrl_c(tx: mpsc::Sender<&'static str>) {
    while tokio::signal::ctrl_c().await.is_ok() {
        if tx.send("Ctrl+C").await.is_err() {
            break;
        }
    }
}
