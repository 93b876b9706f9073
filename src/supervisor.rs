use std::future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::device::{self, registry, DeviceStream};
use crate::error::KeytrailError;
use crate::event::EVENT_SIZE;
use crate::key_code::KeyCodeTable;
use crate::shutdown;
use crate::watcher::{DeviceWatcher, WatchReport, WriterLink};
use crate::writer::LogWriter;
use crate::KeytrailResult;

/// Events buffered per read from a device.
const READ_BATCH: usize = 64;

/// The outcome of one watcher/writer pair.
#[derive(Debug)]
pub struct PairReport {
    pub watch: WatchReport,
    /// Names the writer persisted.
    pub written: u64,
}

/// Run a watcher and its writer until both have stopped.
///
/// Both run in the calling task, so dropping the returned future stops the writer as well. A
/// writer failure is returned as soon as it happens, even if the watcher is still waiting for
/// input.
pub async fn run_pair<R, W>(
    watcher: DeviceWatcher<R>,
    writer: LogWriter<W>,
    capacity: usize,
) -> KeytrailResult<PairReport>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (names, names_rx) = mpsc::channel(capacity);
    let (stop, stop_rx) = oneshot::channel();

    let watching = watcher.run(WriterLink { names, stop });
    let writing = writer.run(names_rx, stop_rx);
    tokio::pin!(watching, writing);

    tokio::select! {
        watch = &mut watching => {
            let written = writing.await?;
            Ok(PairReport { watch, written })
        }
        written = &mut writing => {
            // Only a failed writer stops before its watcher.
            let written = written?;
            let watch = watching.await;
            Ok(PairReport { watch, written })
        }
    }
}

type PairResult = KeytrailResult<Option<PairReport>>;

/// Wait for every pair in `pairs` to stop.
///
/// Once `shutdown` is cancelled the pairs get `grace` to drain; those still running afterwards
/// are aborted. A pair failing with an error cancels `shutdown`, aborts the others and is
/// returned.
pub(crate) async fn join_pairs(
    mut pairs: JoinSet<PairResult>,
    shutdown: &CancellationToken,
    grace: Duration,
) -> KeytrailResult<Vec<PairReport>> {
    let mut reports = Vec::with_capacity(pairs.len());
    let mut draining = false;
    let mut deadline: Option<Instant> = None;

    loop {
        let grace_expired = async move {
            match deadline {
                Some(deadline) => time::sleep_until(deadline).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            joined = pairs.join_next() => match joined {
                Some(joined) => {
                    if let Some(report) = on_pair_exit(joined, shutdown, &mut pairs)? {
                        reports.push(report);
                    }
                }
                None => break,
            },
            _ = shutdown.cancelled(), if !draining => {
                draining = true;
                deadline = Instant::now().checked_add(grace);
            }
            _ = grace_expired => {
                warn!(remaining = pairs.len(), "grace period over, aborting devices");
                pairs.abort_all();
                break;
            }
        }
    }

    Ok(reports)
}

fn on_pair_exit(
    joined: Result<PairResult, JoinError>,
    shutdown: &CancellationToken,
    pairs: &mut JoinSet<PairResult>,
) -> PairResult {
    match joined {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(err)) => {
            error!("{err}");
            shutdown.cancel();
            pairs.abort_all();
            Err(err)
        }
        Err(err) if err.is_cancelled() => Ok(None),
        Err(err) => {
            warn!("device task failed: {err}");
            Ok(None)
        }
    }
}

/// Owns the key code table, the discovered devices and the shutdown signal.
pub struct Supervisor {
    config: Arc<Config>,
    keymap: Arc<KeyCodeTable>,
    devices: Vec<PathBuf>,
    shutdown: CancellationToken,
}

impl Supervisor {
    /// Build the key code table and discover the devices to watch.
    ///
    /// Both steps are fatal on failure.
    pub fn start(config: Config) -> KeytrailResult<Self> {
        let keymap = KeyCodeTable::load(&config.key_codes)?;
        info!(keys = keymap.len(), "loaded key codes");

        let mut devices = registry::discover(&config.registry, &config.device_dir)?;

        if config.keyboards_only {
            devices = device::retain_keyboards(devices);

            if devices.is_empty() {
                return Err(KeytrailError::NoDevicesFound(config.registry.clone()));
            }
        }

        Ok(Self {
            config: Arc::new(config),
            keymap: Arc::new(keymap),
            devices,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn devices(&self) -> &[PathBuf] {
        &self.devices
    }

    /// The signal that stops every watcher once cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Watch every device until all of them have stopped.
    ///
    /// A persistence failure on any device stops all of them and is returned. After shutdown
    /// has been signalled, pairs still running when the grace period ends are aborted.
    pub async fn run(self) -> KeytrailResult<Vec<PairReport>> {
        let _signals = shutdown::install(self.shutdown.clone(), self.config.shutdown)?;

        let mut pairs = JoinSet::new();

        for path in &self.devices {
            pairs.spawn(watch_device(
                path.clone(),
                Arc::clone(&self.keymap),
                Arc::clone(&self.config),
                self.shutdown.clone(),
            ));
        }

        let reports = join_pairs(pairs, &self.shutdown, self.config.grace).await?;

        info!("all devices stopped");

        Ok(reports)
    }
}

/// Open one device and run its pair. A device that can't be opened is skipped.
async fn watch_device(
    path: PathBuf,
    keymap: Arc<KeyCodeTable>,
    config: Arc<Config>,
    shutdown: CancellationToken,
) -> KeytrailResult<Option<PairReport>> {
    let handle = device::device_handle(&path);

    let events = match DeviceStream::open(&path) {
        Ok(events) => events,
        Err(err) => {
            warn!(device = %handle, "skipping device: {err}");
            return Ok(None);
        }
    };

    info!(
        device = %handle,
        name = events.name().unwrap_or("unknown"),
        "watching {}",
        path.display()
    );

    let writer = LogWriter::create(&config.log_dir, &handle, config.idle_flush).await?;
    let events = BufReader::with_capacity(EVENT_SIZE * READ_BATCH, events);
    let watcher = DeviceWatcher::new(handle, events, keymap, shutdown);

    run_pair(watcher, writer, config.channel_capacity)
        .await
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::WatchExit;
    use std::io;

    const GRACE: Duration = Duration::from_secs(2);

    fn cancelled_report(handle: &str) -> PairReport {
        PairReport {
            watch: WatchReport {
                handle: handle.to_string(),
                presses: 0,
                exit: WatchExit::Cancelled,
            },
            written: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn grace_period_starts_on_cancellation() {
        let shutdown = CancellationToken::new();
        let mut pairs = JoinSet::new();
        pairs.spawn(future::pending::<PairResult>());

        let cancel = shutdown.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(10)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let reports = join_pairs(pairs, &shutdown, GRACE).await.unwrap();
        let elapsed = started.elapsed();

        assert!(reports.is_empty());
        assert!(elapsed >= Duration::from_secs(12), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(13), "returned after {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn pairs_draining_within_the_grace_period_are_reported() {
        let shutdown = CancellationToken::new();
        let mut pairs = JoinSet::new();

        let token = shutdown.clone();
        pairs.spawn(async move {
            token.cancelled().await;
            time::sleep(GRACE / 2).await;
            Ok(Some(cancelled_report("event0")))
        });
        pairs.spawn(future::pending::<PairResult>());
        shutdown.cancel();

        let reports = join_pairs(pairs, &shutdown, GRACE).await.unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].watch.handle, "event0");
    }

    #[tokio::test]
    async fn failed_pair_stops_the_others() {
        let shutdown = CancellationToken::new();
        let mut pairs = JoinSet::new();
        pairs.spawn(future::pending::<PairResult>());
        pairs.spawn(async {
            Err(KeytrailError::Persistence {
                path: PathBuf::from("event1.log"),
                source: io::Error::new(io::ErrorKind::Other, "disk full"),
            })
        });

        let err = join_pairs(pairs, &shutdown, GRACE).await.unwrap_err();

        assert!(matches!(err, KeytrailError::Persistence { .. }));
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn skipped_devices_are_not_reported() {
        let shutdown = CancellationToken::new();
        let mut pairs = JoinSet::new();
        pairs.spawn(async { Ok(None) });
        pairs.spawn(async { Ok(Some(cancelled_report("event3"))) });

        let reports = join_pairs(pairs, &shutdown, GRACE).await.unwrap();

        assert_eq!(reports.len(), 1);
        assert!(!shutdown.is_cancelled());
    }
}
