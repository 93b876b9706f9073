//! Per-device reader that turns key presses into symbolic names.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::KeytrailError;
use crate::event::{self, KeyEvent, KeyEventCause};
use crate::key_code::{KeyCodeTable, KeyName};

/// The producer side of a watcher/writer pair.
#[derive(Debug)]
pub struct WriterLink {
    /// Names of the pressed keys, in the order they were read.
    pub names: mpsc::Sender<KeyName>,
    /// Tells the writer to flush and stop.
    pub stop: oneshot::Sender<()>,
}

/// Why a watcher stopped reading.
#[derive(Debug)]
pub enum WatchExit {
    /// The shutdown signal was broadcast.
    Cancelled,
    /// The device stream failed or ended.
    StreamEnded(KeytrailError),
    /// The paired writer is no longer receiving.
    WriterGone,
}

/// What a watcher did before it stopped.
#[derive(Debug)]
pub struct WatchReport {
    /// The handle of the watched device (e.g. `event3`).
    pub handle: String,
    /// Number of key presses forwarded to the writer.
    pub presses: u64,
    /// Why the watcher stopped.
    pub exit: WatchExit,
}

/// Reads one device and forwards the name of every pressed key.
pub struct DeviceWatcher<R> {
    handle: String,
    events: R,
    keymap: Arc<KeyCodeTable>,
    shutdown: CancellationToken,
}

impl<R> DeviceWatcher<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(
        handle: impl Into<String>,
        events: R,
        keymap: Arc<KeyCodeTable>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            handle: handle.into(),
            events,
            keymap,
            shutdown,
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Read events until the device fails, the writer goes away or shutdown is signalled.
    ///
    /// The writer is told to stop on every exit path.
    pub async fn run(mut self, link: WriterLink) -> WatchReport {
        let WriterLink { names, stop } = link;
        let mut presses = 0;

        let exit = loop {
            if self.shutdown.is_cancelled() {
                break WatchExit::Cancelled;
            }

            let raw = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break WatchExit::Cancelled,
                decoded = event::read_event(&mut self.events) => match decoded {
                    Ok(raw) => raw,
                    Err(err) => break WatchExit::StreamEnded(err),
                },
            };

            // Releases, autorepeat and non-key events are dropped.
            let code = match KeyEvent::try_from(&raw) {
                Ok(KeyEvent {
                    cause: KeyEventCause::Press,
                    code,
                    ts,
                }) => {
                    trace!(device = %self.handle, ?ts, code, "key press");
                    code
                }
                _ => continue,
            };

            let name = self.keymap.lookup(code);

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break WatchExit::Cancelled,
                sent = names.send(name) => {
                    if sent.is_err() {
                        break WatchExit::WriterGone;
                    }
                    presses += 1;
                }
            }
        };

        match &exit {
            WatchExit::Cancelled => debug!(device = %self.handle, "watcher cancelled"),
            WatchExit::StreamEnded(err) => {
                warn!(device = %self.handle, "stopped reading device: {err}")
            }
            WatchExit::WriterGone => warn!(device = %self.handle, "log writer went away"),
        }

        // The writer may already be gone.
        let _ = stop.send(());

        WatchReport {
            handle: self.handle,
            presses,
            exit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::codes::{EV_KEY, EV_REL, EV_SYN};
    use crate::event::RawEvent;
    use std::io::Cursor;

    const KEY_A: u16 = 30;
    const KEY_B: u16 = 48;

    fn keymap() -> Arc<KeyCodeTable> {
        let header = "#define KEY_A 30\n#define KEY_B 48\n";
        Arc::new(KeyCodeTable::from_reader(header.as_bytes()).unwrap())
    }

    fn stream(events: &[RawEvent]) -> Cursor<Vec<u8>> {
        Cursor::new(events.iter().flat_map(|ev| ev.to_bytes()).collect())
    }

    fn link(capacity: usize) -> (WriterLink, mpsc::Receiver<KeyName>, oneshot::Receiver<()>) {
        let (names, names_rx) = mpsc::channel(capacity);
        let (stop, stop_rx) = oneshot::channel();

        (WriterLink { names, stop }, names_rx, stop_rx)
    }

    fn drain(rx: &mut mpsc::Receiver<KeyName>) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(name) = rx.try_recv() {
            names.push(name.to_string());
        }
        names
    }

    #[tokio::test]
    async fn forwards_only_presses() {
        let events = stream(&[
            RawEvent::new(EV_KEY, KEY_A, 1),
            RawEvent::new(EV_SYN, 0, 0),
            RawEvent::new(EV_KEY, KEY_A, 0),
            RawEvent::new(EV_KEY, KEY_B, 1),
            RawEvent::new(EV_KEY, KEY_B, 2),
            RawEvent::new(EV_REL, 0, 5),
        ]);
        let (link, mut names, stop) = link(100);

        let report = DeviceWatcher::new("event0", events, keymap(), CancellationToken::new())
            .run(link)
            .await;

        assert_eq!(drain(&mut names), ["A", "B"]);
        assert_eq!(report.presses, 2);
        assert!(matches!(
            report.exit,
            WatchExit::StreamEnded(KeytrailError::StreamClosed)
        ));
        assert!(stop.await.is_ok());
    }

    #[tokio::test]
    async fn unknown_codes_are_forwarded_as_placeholders() {
        let events = stream(&[RawEvent::new(EV_KEY, 999, 1)]);
        let (link, mut names, _stop) = link(100);

        DeviceWatcher::new("event0", events, keymap(), CancellationToken::new())
            .run(link)
            .await;

        assert_eq!(drain(&mut names), ["Unknown(999)"]);
    }

    #[tokio::test]
    async fn truncated_stream_ends_the_watcher() {
        let mut bytes = RawEvent::new(EV_KEY, KEY_A, 1).to_bytes().to_vec();
        bytes.extend_from_slice(&RawEvent::new(EV_KEY, KEY_B, 1).to_bytes()[..10]);
        let (link, mut names, stop) = link(100);

        let report = DeviceWatcher::new("event0", Cursor::new(bytes), keymap(), CancellationToken::new())
            .run(link)
            .await;

        assert_eq!(drain(&mut names), ["A"]);
        assert!(matches!(
            report.exit,
            WatchExit::StreamEnded(KeytrailError::ShortRead { got: 10, .. })
        ));
        assert!(stop.await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_watcher_forwards_nothing() {
        let events = stream(&[RawEvent::new(EV_KEY, KEY_A, 1)]);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let (link, mut names, stop) = link(100);

        let report = DeviceWatcher::new("event0", events, keymap(), shutdown)
            .run(link)
            .await;

        assert!(matches!(report.exit, WatchExit::Cancelled));
        assert!(drain(&mut names).is_empty());
        assert!(stop.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_while_blocked_on_a_full_channel() {
        let events = stream(&[
            RawEvent::new(EV_KEY, KEY_A, 1),
            RawEvent::new(EV_KEY, KEY_B, 1),
        ]);
        let shutdown = CancellationToken::new();
        let (link, mut names, _stop) = link(1);

        let watcher = DeviceWatcher::new("event0", events, keymap(), shutdown.clone());
        let running = tokio::spawn(watcher.run(link));

        // The first name fills the channel and the second send blocks. The paused clock only
        // advances once the watcher is parked.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        shutdown.cancel();
        let report = running.await.unwrap();

        assert!(matches!(report.exit, WatchExit::Cancelled));
        assert_eq!(report.presses, 1);
        assert_eq!(drain(&mut names), ["A"]);
    }

    #[tokio::test]
    async fn dropped_writer_stops_the_watcher() {
        let events = stream(&[RawEvent::new(EV_KEY, KEY_A, 1)]);
        let (link, names, _stop) = link(100);
        drop(names);

        let report = DeviceWatcher::new("event0", events, keymap(), CancellationToken::new())
            .run(link)
            .await;

        assert!(matches!(report.exit, WatchExit::WriterGone));
        assert_eq!(report.presses, 0);
    }
}
