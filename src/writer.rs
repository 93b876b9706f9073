//! Per-device log file writer.
//!
//! Names are appended back to back with no separator. A line break is written, and the buffer
//! flushed, once no name has arrived for the idle interval.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::debug;

use crate::error::KeytrailError;
use crate::key_code::KeyName;
use crate::KeytrailResult;

const LOG_EXTENSION: &str = "log";

/// Deadline used when the idle interval doesn't fit the clock: about 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// The log file of the device identified by `handle`.
pub fn log_path(log_dir: &Path, handle: &str) -> PathBuf {
    log_dir.join(format!("{handle}.{LOG_EXTENSION}"))
}

/// Buffers key names and writes them to one log file.
pub struct LogWriter<W: AsyncWrite> {
    path: PathBuf,
    out: BufWriter<W>,
    idle: Duration,
    /// Whether names were written since the last line break.
    line_open: bool,
}

impl LogWriter<fs::File> {
    /// Open (or create) the log file of `handle` under `log_dir` for appending.
    pub async fn create(log_dir: &Path, handle: &str, idle: Duration) -> KeytrailResult<Self> {
        let path = log_path(log_dir, handle);

        let persistence = |source| KeytrailError::Persistence {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(log_dir).await.map_err(persistence)?;

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
            .map_err(persistence)?;

        Ok(Self::new(path, file, idle))
    }
}

impl<W> LogWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(path: PathBuf, out: W, idle: Duration) -> Self {
        Self {
            path,
            out: BufWriter::new(out),
            idle,
            line_open: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consume names until told to stop or until the channel closes.
    ///
    /// On a stop notification the names still queued in the channel are written before the file
    /// is closed. Returns the number of names written.
    pub async fn run(
        mut self,
        mut names: mpsc::Receiver<KeyName>,
        mut stop: oneshot::Receiver<()>,
    ) -> KeytrailResult<u64> {
        let timer = time::sleep_until(self.idle_deadline());
        tokio::pin!(timer);

        let mut written = 0;

        loop {
            tokio::select! {
                _ = &mut stop => {
                    names.close();

                    while let Ok(name) = names.try_recv() {
                        self.append(&name).await?;
                        written += 1;
                    }

                    break;
                }
                received = names.recv() => match received {
                    Some(name) => {
                        self.append(&name).await?;
                        written += 1;
                        timer.as_mut().reset(self.idle_deadline());
                    }
                    None => break,
                },
                () = &mut timer => {
                    self.end_line().await?;
                    timer.as_mut().reset(self.idle_deadline());
                }
            }
        }

        self.close().await?;

        debug!(log = %self.path.display(), written, "log writer stopped");

        Ok(written)
    }

    fn idle_deadline(&self) -> Instant {
        let now = Instant::now();

        now.checked_add(self.idle)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now)
    }

    async fn append(&mut self, name: &KeyName) -> KeytrailResult<()> {
        let text = name.to_string();

        self.out
            .write_all(text.as_bytes())
            .await
            .map_err(|source| self.persistence(source))?;
        self.line_open = true;

        Ok(())
    }

    /// Terminate the current line and flush, unless nothing was written since the last one.
    async fn end_line(&mut self) -> KeytrailResult<()> {
        if !self.line_open {
            return Ok(());
        }

        self.out
            .write_all(b"\n")
            .await
            .map_err(|source| self.persistence(source))?;
        self.out
            .flush()
            .await
            .map_err(|source| self.persistence(source))?;
        self.line_open = false;

        Ok(())
    }

    async fn close(&mut self) -> KeytrailResult<()> {
        self.out
            .flush()
            .await
            .map_err(|source| self.persistence(source))?;
        self.out
            .shutdown()
            .await
            .map_err(|source| self.persistence(source))
    }

    fn persistence(&self, source: io::Error) -> KeytrailError {
        KeytrailError::Persistence {
            path: self.path.clone(),
            source,
        }
    }
}
