//! Text codec for the INI-style settings file.
//!
//! Format:
//! ```text
//! ; comment            (also "# comment")
//! [USB device]
//! device=Raspberry Pi Pico
//! [watch]
//! directory=/media/user/RPI-RP2
//! ```
//!
//! - Whitespace around section names, keys and values is trimmed.
//! - A value with leading or trailing whitespace is written inside double
//!   quotes, as is one that is itself wrapped in quotes.  On input one pair
//!   of surrounding quotes is removed.
//! - Every entry must belong to a section.
//! - Values are escaped on output: `\` → `\\`, newline → `\n`, CR → `\r`.
//!   On input an unknown escape such as `\U` is kept literally, so a
//!   hand-written Windows path still reads back as written.
//! - Comments are not retained on rewrite.

use thiserror::Error;

use super::record::ConfigRecord;

/// Error produced when the settings text cannot be parsed or a name is invalid.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IniError {
    /// A line is neither a section header, an entry, a comment nor blank.
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// A section name or key cannot be represented in the file.
    #[error("invalid name {name:?}: {message}")]
    InvalidName { name: String, message: &'static str },
}

/// Parses settings text into a [`ConfigRecord`].
///
/// # Errors
///
/// Returns [`IniError::Syntax`] with a 1-based line number for the first
/// malformed line.
pub fn parse(text: &str) -> Result<ConfigRecord, IniError> {
    let mut record = ConfigRecord::new();
    let mut current: Option<String> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();

        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let name = rest.strip_suffix(']').ok_or_else(|| IniError::Syntax {
                line: line_no,
                message: "unterminated section header".to_string(),
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(IniError::Syntax {
                    line: line_no,
                    message: "empty section name".to_string(),
                });
            }
            record.section_mut(name);
            current = Some(name.to_string());
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(IniError::Syntax {
                line: line_no,
                message: format!("expected `key=value`, found {line:?}"),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(IniError::Syntax {
                line: line_no,
                message: "empty key".to_string(),
            });
        }
        let Some(section) = current.as_deref() else {
            return Err(IniError::Syntax {
                line: line_no,
                message: format!("entry {key:?} appears before any section"),
            });
        };
        record.set(section, key, &unescape(unquote(value.trim())));
    }

    Ok(record)
}

/// Renders a [`ConfigRecord`] back to text.
///
/// Sections are separated by a blank line; empty sections are kept so that a
/// parse/render cycle does not silently drop them.
pub fn render(record: &ConfigRecord) -> String {
    let mut out = String::new();
    for (i, section) in record.sections().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push('[');
        out.push_str(section.name());
        out.push_str("]\n");
        for (key, value) in section.entries() {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote(&escape(value)));
            out.push('\n');
        }
    }
    out
}

/// Validates a section name for [`render`].
///
/// # Errors
///
/// Rejects empty names, names with surrounding whitespace, line breaks or `]`.
pub fn check_section_name(name: &str) -> Result<(), IniError> {
    check_common(name)?;
    if name.contains(']') {
        return Err(IniError::InvalidName {
            name: name.to_string(),
            message: "section names cannot contain `]`",
        });
    }
    Ok(())
}

/// Validates a key for [`render`].
///
/// # Errors
///
/// Rejects empty keys, keys with surrounding whitespace, line breaks, `=`,
/// keys starting with `[`, and keys starting with a comment marker.
pub fn check_key(key: &str) -> Result<(), IniError> {
    check_common(key)?;
    if key.contains('=') {
        return Err(IniError::InvalidName {
            name: key.to_string(),
            message: "keys cannot contain `=`",
        });
    }
    if key.starts_with(['[', ';', '#']) {
        return Err(IniError::InvalidName {
            name: key.to_string(),
            message: "keys cannot start with `[`, `;` or `#`",
        });
    }
    Ok(())
}

fn check_common(name: &str) -> Result<(), IniError> {
    let message = if name.is_empty() {
        "must not be empty"
    } else if name.trim() != name {
        "must not have leading or trailing whitespace"
    } else if name.contains(['\n', '\r']) {
        "must not contain line breaks"
    } else {
        return Ok(());
    };
    Err(IniError::InvalidName {
        name: name.to_string(),
        message,
    })
}

fn is_quoted(value: &str) -> bool {
    value.len() >= 2 && value.starts_with('"') && value.ends_with('"')
}

fn quote(value: &str) -> String {
    if value.trim() != value || is_quoted(value) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

fn unquote(value: &str) -> &str {
    if is_quoted(value) {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('\\') => {
                out.push('\\');
                chars.next();
            }
            Some('n') => {
                out.push('\n');
                chars.next();
            }
            Some('r') => {
                out.push('\r');
                chars.next();
            }
            _ => out.push('\\'),
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
