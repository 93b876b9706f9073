use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeytrailError {
    #[error("cannot read {what} from {}: {source}", .path.display())]
    SourceUnavailable {
        what: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("malformed key definition ({reason}): {line}")]
    ParseFailure { line: String, reason: String },
    #[error("no input devices found in {}", .0.display())]
    NoDevicesFound(PathBuf),
    #[error("failed to open device {}: {source}", .path.display())]
    DeviceOpen { path: PathBuf, source: io::Error },
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("event stream closed")]
    StreamClosed,
    #[error("failed to write log file {}: {source}", .path.display())]
    Persistence { path: PathBuf, source: io::Error },
    #[error("unsupported event type: {0}")]
    UnsupportedEventType(u16),
    #[error("invalid key event: {0}")]
    InvalidKeyEvent(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
