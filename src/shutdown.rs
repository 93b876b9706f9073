use std::io;

use clap::ValueEnum;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// What happens once an interrupt or termination signal arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ShutdownMode {
    /// Broadcast the shutdown signal and let every device pair drain, bounded by the grace
    /// period.
    #[default]
    Graceful,
    /// Broadcast the shutdown signal and terminate the process right away. Names still buffered
    /// by the log writers are lost.
    FastExit,
}

/// Listen for SIGINT and SIGTERM and cancel `shutdown` on the first one.
///
/// The handlers are registered before this returns.
pub fn install(shutdown: CancellationToken, mode: ShutdownMode) -> io::Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        let received = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            // Nothing left to interrupt.
            _ = shutdown.cancelled() => return,
        };

        info!(signal = received, "shutting down...");
        shutdown.cancel();

        if mode == ShutdownMode::FastExit {
            std::process::exit(0);
        }
    }))
}
