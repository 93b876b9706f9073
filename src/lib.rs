//! This crate records the keys pressed on Linux input devices into per-device log files.
//!
//! The input devices are discovered through the kernel's device registry using
//! [`registry::discover`]. Each device gets a [`DeviceWatcher`], which decodes the raw
//! `input_event` records and forwards the [`KeyName`] of every key press, and a [`LogWriter`],
//! which appends those names to `<log dir>/<handle>.log`. The [`Supervisor`] wires everything
//! together and owns the shutdown signal.
//!
//! # Example
//!
//! Watch every device with the default configuration. Note reading the event devices requires
//! root privileges.
//!
//! ```no_run
//! use keytrail::{Config, KeytrailError, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), KeytrailError> {
//!     let supervisor = Supervisor::start(Config::default())?;
//!
//!     for report in supervisor.run().await? {
//!         println!("{}: {} keys", report.watch.handle, report.written);
//!     }
//!
//!     Ok(())
//! }
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("This crate only works on Linux");

pub mod config;
pub mod device;
mod error;
pub mod event;
pub mod key_code;
pub mod logging;
pub mod shutdown;
pub mod supervisor;
pub mod watcher;
pub mod writer;

pub use config::Config;
pub use device::registry;
pub use error::KeytrailError;
pub use key_code::{KeyCodeTable, KeyName};
pub use shutdown::ShutdownMode;
pub use supervisor::{run_pair, PairReport, Supervisor};
pub use watcher::{DeviceWatcher, WatchExit, WatchReport};
pub use writer::LogWriter;

pub type KeytrailResult<T> = Result<T, KeytrailError>;
