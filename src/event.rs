pub mod codes;

use std::mem;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::KeytrailError;
use crate::KeytrailResult;
use codes::{EV_KEY, EV_KEY_PRESS, EV_KEY_RELEASE, EV_KEY_REPEAT};

/// Width of each of the two `timeval` fields (`tv_sec`, `tv_usec`).
const TIME_FIELD_LEN: usize = mem::size_of::<libc::c_long>();

const TYPE_OFFSET: usize = 2 * TIME_FIELD_LEN;
const CODE_OFFSET: usize = TYPE_OFFSET + 2;
const VALUE_OFFSET: usize = CODE_OFFSET + 2;

/// The size of one `struct input_event` record.
pub const EVENT_SIZE: usize = VALUE_OFFSET + 4;

/// A `struct input_event` as read from an input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub sec: i64,
    pub usec: i64,
    pub type_: u16,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    pub fn new(type_: u16, code: u16, value: i32) -> Self {
        Self {
            sec: 0,
            usec: 0,
            type_,
            code,
            value,
        }
    }

    /// Decode a little-endian record.
    pub fn from_bytes(buf: &[u8; EVENT_SIZE]) -> Self {
        Self {
            sec: read_time_field(&buf[..TIME_FIELD_LEN]),
            usec: read_time_field(&buf[TIME_FIELD_LEN..TYPE_OFFSET]),
            type_: u16::from_le_bytes([buf[TYPE_OFFSET], buf[TYPE_OFFSET + 1]]),
            code: u16::from_le_bytes([buf[CODE_OFFSET], buf[CODE_OFFSET + 1]]),
            value: i32::from_le_bytes([
                buf[VALUE_OFFSET],
                buf[VALUE_OFFSET + 1],
                buf[VALUE_OFFSET + 2],
                buf[VALUE_OFFSET + 3],
            ]),
        }
    }

    /// Encode the event in the layout the kernel uses.
    pub fn to_bytes(&self) -> [u8; EVENT_SIZE] {
        let mut buf = [0u8; EVENT_SIZE];

        buf[..TIME_FIELD_LEN].copy_from_slice(&self.sec.to_le_bytes()[..TIME_FIELD_LEN]);
        buf[TIME_FIELD_LEN..TYPE_OFFSET].copy_from_slice(&self.usec.to_le_bytes()[..TIME_FIELD_LEN]);
        buf[TYPE_OFFSET..CODE_OFFSET].copy_from_slice(&self.type_.to_le_bytes());
        buf[CODE_OFFSET..VALUE_OFFSET].copy_from_slice(&self.code.to_le_bytes());
        buf[VALUE_OFFSET..].copy_from_slice(&self.value.to_le_bytes());

        buf
    }

    /// The time the kernel recorded the event at, if it is representable.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let nsec = u32::try_from(self.usec.checked_mul(1000)?).ok()?;

        DateTime::from_timestamp(self.sec, nsec)
    }
}

fn read_time_field(bytes: &[u8]) -> i64 {
    let mut word = [0u8; 8];
    word[..bytes.len()].copy_from_slice(bytes);

    if bytes.len() == 4 {
        i32::from_le_bytes([word[0], word[1], word[2], word[3]]) as i64
    } else {
        i64::from_le_bytes(word)
    }
}

/// Read exactly one event record from `reader`.
///
/// Hitting the end of the stream on a record boundary yields [`KeytrailError::StreamClosed`];
/// hitting it in the middle of a record yields [`KeytrailError::ShortRead`]. Both are terminal:
/// the stream is not resynchronized.
pub async fn read_event<R>(reader: &mut R) -> KeytrailResult<RawEvent>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; EVENT_SIZE];
    let mut filled = 0;

    while filled < EVENT_SIZE {
        let n = reader.read(&mut buf[filled..]).await?;

        if n == 0 {
            return Err(if filled == 0 {
                KeytrailError::StreamClosed
            } else {
                KeytrailError::ShortRead {
                    expected: EVENT_SIZE,
                    got: filled,
                }
            });
        }

        filled += n;
    }

    Ok(RawEvent::from_bytes(&buf))
}

/// A key event (EV_KEY).
#[derive(Debug, PartialEq)]
pub struct KeyEvent {
    /// The timestamp of the event.
    pub ts: Option<DateTime<Utc>>,
    /// The action that triggered the event.
    pub cause: KeyEventCause,
    /// The key code of the key that triggered the event.
    pub code: u16,
}

/// The reason a `KeyEvent` fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventCause {
    /// The key was pressed.
    Press,
    /// The key was released.
    Release,
    /// The key is being held down.
    Repeat,
}

impl TryFrom<&RawEvent> for KeyEvent {
    type Error = KeytrailError;

    fn try_from(ev: &RawEvent) -> Result<Self, Self::Error> {
        if ev.type_ != EV_KEY {
            return Err(KeytrailError::UnsupportedEventType(ev.type_));
        }

        let cause = match ev.value {
            EV_KEY_RELEASE => KeyEventCause::Release,
            EV_KEY_PRESS => KeyEventCause::Press,
            EV_KEY_REPEAT => KeyEventCause::Repeat,
            n => {
                return Err(KeytrailError::InvalidKeyEvent(format!(
                    "invalid value for EV_KEY: {n}"
                )))
            }
        };

        Ok(Self {
            ts: ev.timestamp(),
            cause,
            code: ev.code,
        })
    }
}
