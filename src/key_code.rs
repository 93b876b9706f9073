//! Mapping from numeric key codes to symbolic key names.
//!
//! The table is built once from the kernel's `input-event-codes.h` (or any file using the same
//! `#define KEY_<NAME> <CODE>` layout) and then shared read-only by every device watcher.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::KeytrailError;
use crate::KeytrailResult;

/// Prefixes of the lines that define key and button codes.
const DEFINITION_MARKERS: [&str; 2] = ["#define KEY_", "#define BTN_"];

/// Length of the `KEY_`/`BTN_` prefix stripped from the defined identifier.
const NAME_PREFIX_LEN: usize = 4;

/// The symbolic name of a key, as written to the log files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyName {
    /// The code was found in the table.
    Known(Arc<str>),
    /// The code has no entry in the table.
    Unknown(u16),
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyName::Known(name) => f.write_str(name),
            KeyName::Unknown(code) => write!(f, "Unknown({code})"),
        }
    }
}

/// An immutable code -> name table.
#[derive(Debug, Default, Clone)]
pub struct KeyCodeTable {
    names: HashMap<u16, Arc<str>>,
}

impl KeyCodeTable {
    /// Build the table from the definition file at `path`.
    ///
    /// Fails only if the file cannot be opened or read. Malformed definitions are skipped with a
    /// warning.
    pub fn load(path: &Path) -> KeytrailResult<Self> {
        let unavailable = |source| KeytrailError::SourceUnavailable {
            what: "key codes",
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(unavailable)?;
        let table = Self::from_reader(BufReader::new(file)).map_err(unavailable)?;

        debug!(entries = table.len(), source = %path.display(), "built key code table");

        Ok(table)
    }

    /// Build the table from a line-oriented definition source.
    pub fn from_reader(reader: impl BufRead) -> io::Result<Self> {
        let mut names = HashMap::new();

        for line in reader.lines() {
            let line = line?;

            match parse_definition(&line) {
                Some(Ok((code, name))) => {
                    names.insert(code, Arc::from(name));
                }
                Some(Err(err)) => warn!("skipping key definition: {err}"),
                None => {}
            }
        }

        Ok(Self { names })
    }

    /// Look up the symbolic name of `code`.
    pub fn lookup(&self, code: u16) -> KeyName {
        match self.names.get(&code) {
            Some(name) => KeyName::Known(Arc::clone(name)),
            None => KeyName::Unknown(code),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Parse a `#define KEY_<NAME> <CODE>` line.
///
/// Returns `None` for lines that don't carry a key or button definition.
fn parse_definition(line: &str) -> Option<KeytrailResult<(u16, &str)>> {
    if !DEFINITION_MARKERS
        .iter()
        .any(|marker| line.starts_with(marker))
    {
        return None;
    }

    let malformed = |reason: &str| {
        Some(Err(KeytrailError::ParseFailure {
            line: line.to_string(),
            reason: reason.to_string(),
        }))
    };

    let mut fields = line.split_whitespace().skip(1);
    let (Some(ident), Some(value)) = (fields.next(), fields.next()) else {
        return malformed("missing code");
    };

    let name = match ident.get(NAME_PREFIX_LEN..) {
        Some(name) if !name.is_empty() => name,
        _ => return malformed("empty name"),
    };

    match parse_code(value) {
        Some(code) => Some(Ok((code, name))),
        None => malformed("code is not a number"),
    }
}

fn parse_code(value: &str) -> Option<u16> {
    match value.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "\
#ifndef _INPUT_EVENT_CODES_H
#define _INPUT_EVENT_CODES_H

#define EV_KEY			0x01

#define KEY_RESERVED		0
#define KEY_ESC			1
#define KEY_1			2
#define KEY_A			30
#define KEY_MIN_INTERESTING	KEY_MUTE
#define BTN_MISC		0x100
#define BTN_LEFT		0x110
#define KEY_CNT			(KEY_MAX+1)
#define KEY_BROKEN
";

    fn table() -> KeyCodeTable {
        KeyCodeTable::from_reader(HEADER.as_bytes()).unwrap()
    }

    #[test]
    fn maps_decimal_definitions() {
        let table = table();

        assert_eq!(table.lookup(0).to_string(), "RESERVED");
        assert_eq!(table.lookup(1).to_string(), "ESC");
        assert_eq!(table.lookup(2).to_string(), "1");
        assert_eq!(table.lookup(30), KeyName::Known(Arc::from("A")));
    }

    #[test]
    fn maps_hex_button_definitions() {
        let table = table();

        assert_eq!(table.lookup(0x100).to_string(), "MISC");
        assert_eq!(table.lookup(0x110).to_string(), "LEFT");
    }

    #[test]
    fn skips_aliases_and_expressions() {
        // RESERVED, ESC, 1, A, MISC, LEFT
        assert_eq!(table().len(), 6);
    }

    #[test]
    fn unknown_codes_are_synthesized() {
        let table = table();

        assert_eq!(table.lookup(999), KeyName::Unknown(999));
        assert_eq!(table.lookup(999).to_string(), "Unknown(999)");
        assert_eq!(KeyCodeTable::default().lookup(30).to_string(), "Unknown(30)");
    }

    #[test]
    fn later_definitions_win() {
        let table = KeyCodeTable::from_reader("#define KEY_OLD 7\n#define KEY_NEW 7\n".as_bytes())
            .unwrap();

        assert_eq!(table.lookup(7).to_string(), "NEW");
    }

    #[test]
    fn parse_definition_classifies_lines() {
        assert!(parse_definition("#define EV_KEY 0x01").is_none());
        assert!(parse_definition("/* KEY_A */").is_none());
        assert!(matches!(
            parse_definition("#define KEY_A 30"),
            Some(Ok((30, "A")))
        ));
        assert!(matches!(
            parse_definition("#define KEY_HANGUEL KEY_HANGEUL"),
            Some(Err(KeytrailError::ParseFailure { .. }))
        ));
        assert!(matches!(
            parse_definition("#define KEY_TOOBIG 70000"),
            Some(Err(KeytrailError::ParseFailure { .. }))
        ));
    }

    #[test]
    fn missing_source_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = KeyCodeTable::load(&dir.path().join("missing.h")).unwrap_err();

        assert!(matches!(err, KeytrailError::SourceUnavailable { .. }));
    }
}
