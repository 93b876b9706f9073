//! Discovery of input devices through the kernel's device registry (`/proc/bus/input/devices`).

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::KeytrailError;
use crate::KeytrailResult;

/// Prefix of the registry lines that list a device's handlers.
const HANDLERS_PREFIX: &str = "H: Handlers=";

/// Prefix of the handler tokens backed by an event device.
const EVENT_HANDLE_PREFIX: &str = "event";

/// Find the event devices advertised by the registry at `registry`.
///
/// Each handle is resolved to a path under `device_dir`. The registry order is preserved.
pub fn discover(registry: &Path, device_dir: &Path) -> KeytrailResult<Vec<PathBuf>> {
    let unavailable = |source| KeytrailError::SourceUnavailable {
        what: "device registry",
        path: registry.to_path_buf(),
        source,
    };

    let file = File::open(registry).map_err(unavailable)?;
    let devices = parse_registry(BufReader::new(file), device_dir).map_err(unavailable)?;

    if devices.is_empty() {
        return Err(KeytrailError::NoDevicesFound(registry.to_path_buf()));
    }

    debug!(count = devices.len(), "discovered input devices");

    Ok(devices)
}

/// Extract the event device paths from a registry listing.
pub fn parse_registry(reader: impl BufRead, device_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut devices = Vec::new();

    for line in reader.lines() {
        let line = line?;

        let Some(handlers) = line.strip_prefix(HANDLERS_PREFIX) else {
            continue;
        };

        devices.extend(
            handlers
                .split_whitespace()
                .filter(|handle| handle.starts_with(EVENT_HANDLE_PREFIX))
                .map(|handle| device_dir.join(handle)),
        );
    }

    Ok(devices)
}
