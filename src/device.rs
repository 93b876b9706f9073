pub(crate) mod ioctl;
pub mod registry;

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::ready;
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::warn;

use crate::error::KeytrailError;
use crate::KeytrailResult;

/// The handle identifying a device (e.g. `event3` for `/dev/input/event3`).
///
/// The handle also names the device's log file.
pub fn device_handle(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => path.display().to_string().replace('/', "_"),
    }
}

/// An evdev character device, read without blocking the runtime.
#[derive(Debug)]
pub struct InputDevice {
    /// The name reported by the kernel, if it could be queried.
    name: Option<String>,
    /// The file descriptor of the open input device file.
    async_fd: AsyncFd<File>,
}

impl InputDevice {
    fn new(file: File) -> io::Result<Self> {
        ioctl::set_nonblocking(&file)?;
        let name = ioctl::read_name(&file).ok();

        Ok(Self {
            name,
            async_fd: AsyncFd::new(file)?,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl AsyncRead for InputDevice {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            let mut guard = ready!(this.async_fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();

            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.read(unfilled)
            }) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(err)) => return Poll::Ready(Err(err)),
                Err(_would_block) => continue,
            }
        }
    }
}

/// The byte stream a device watcher reads events from.
#[derive(Debug)]
pub enum DeviceStream {
    /// A live evdev character device.
    Evdev(InputDevice),
    /// A regular file holding previously recorded events.
    Replay(tokio::fs::File),
}

impl DeviceStream {
    /// Open the device at `path`.
    ///
    /// Character devices are read through the reactor; anything else is treated as a recording
    /// and read until its end.
    pub fn open(path: &Path) -> KeytrailResult<Self> {
        let open_failure = |source| KeytrailError::DeviceOpen {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(open_failure)?;
        let file_type = file.metadata().map_err(open_failure)?.file_type();

        if file_type.is_char_device() {
            Ok(DeviceStream::Evdev(
                InputDevice::new(file).map_err(open_failure)?,
            ))
        } else {
            Ok(DeviceStream::Replay(tokio::fs::File::from_std(file)))
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            DeviceStream::Evdev(device) => device.name(),
            DeviceStream::Replay(_) => None,
        }
    }
}

impl AsyncRead for DeviceStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            DeviceStream::Evdev(device) => Pin::new(device).poll_read(cx, buf),
            DeviceStream::Replay(file) => Pin::new(file).poll_read(cx, buf),
        }
    }
}

/// Check whether the device at `path` advertises keyboard capabilities.
///
/// Files that aren't character devices can't be probed and are assumed to be keyboards.
pub fn is_keyboard(path: &Path) -> KeytrailResult<bool> {
    let open_failure = |source| KeytrailError::DeviceOpen {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(open_failure)?;

    if !file.metadata().map_err(open_failure)?.file_type().is_char_device() {
        return Ok(true);
    }

    let flags = ioctl::read_event_flags(&file).map_err(open_failure)?;

    Ok(ioctl::has_keyboard_flags(flags))
}

/// Keep only the devices that advertise keyboard capabilities.
pub fn retain_keyboards(devices: Vec<PathBuf>) -> Vec<PathBuf> {
    devices
        .into_iter()
        .filter(|path| match is_keyboard(path) {
            Ok(keyboard) => keyboard,
            Err(err) => {
                warn!("cannot probe device: {err}");
                false
            }
        })
        .collect()
}
