use std::fs::File;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, RawFd};

use crate::event::codes::{EV_KEY, EV_MSC, EV_REP, EV_SYN};

const IOC_NRBITS: libc::c_ulong = 8;
const IOC_TYPEBITS: libc::c_ulong = 8;
const IOC_SIZEBITS: libc::c_ulong = 14;
const IOC_NRSHIFT: libc::c_ulong = 0;
const IOC_TYPESHIFT: libc::c_ulong = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: libc::c_ulong = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: libc::c_ulong = IOC_SIZESHIFT + IOC_SIZEBITS;
const IOC_READ: libc::c_ulong = 2;

/// Set the `O_NONBLOCK` flag for the specified file.
pub(crate) fn set_nonblocking(f: &File) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(f.as_raw_fd(), libc::F_GETFL) };

    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let res = unsafe { libc::fcntl(f.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) };

    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Read the name of the specified input device using the `EVIOCGNAME` ioctl.
pub(crate) fn read_name(f: &File) -> io::Result<String> {
    const DEVICE_NAME_MAX_LEN: usize = 256;

    let mut device_name = [0u8; DEVICE_NAME_MAX_LEN];

    let eviocgname = (IOC_READ << IOC_DIRSHIFT)
        | (('E' as libc::c_ulong) << IOC_TYPESHIFT)
        | (0x06 << IOC_NRSHIFT)
        | ((device_name.len() as libc::c_ulong) << IOC_SIZESHIFT);

    ioctl(
        f.as_raw_fd(),
        eviocgname,
        device_name.as_mut_ptr() as *mut libc::c_ulong,
    )?;

    let len = device_name
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(device_name.len());

    Ok(String::from_utf8_lossy(&device_name[..len]).into())
}

/// Read the event types supported by the specified device using the `EVIOCGBIT` ioctl.
pub(crate) fn read_event_flags(f: &File) -> io::Result<libc::c_ulong> {
    let mut ev_flags: libc::c_ulong = 0;

    let eviocgbit = (IOC_READ << IOC_DIRSHIFT)
        | (('E' as libc::c_ulong) << IOC_TYPESHIFT)
        | (0x20 << IOC_NRSHIFT)
        | ((mem::size_of::<libc::c_ulong>() as libc::c_ulong) << IOC_SIZESHIFT);

    ioctl(
        f.as_raw_fd(),
        eviocgbit,
        (&mut ev_flags) as *mut libc::c_ulong,
    )?;

    Ok(ev_flags)
}

/// Check whether the specified `flags` indicate the device is a keyboard.
pub(crate) fn has_keyboard_flags(flags: libc::c_ulong) -> bool {
    const KEYBOARD_FLAGS: libc::c_ulong =
        (1 << EV_SYN) | (1 << EV_KEY) | (1 << EV_MSC) | (1 << EV_REP);

    (flags & KEYBOARD_FLAGS) == KEYBOARD_FLAGS
}

fn ioctl(fd: RawFd, request: libc::c_ulong, buf: *mut libc::c_ulong) -> io::Result<()> {
    let res = unsafe { libc::ioctl(fd, request as _, buf) };

    if res < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
