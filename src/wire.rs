//! Canonical wire encoding of advertisements.
//!
//! A payload is a header table plus a short text body:
//!
//! ```text
//! headers: sender, timestamp, correlation, event, [sum], [oldname | newname]
//! body:    <identifier> <size> <atime> <mtime> <mode>    (create, rename)
//!          <identifier>                                  (remove)
//! ```
//!
//! Timestamps are UTC `YYYYMMDDHHMMSS`, followed by `.` and the fractional
//! seconds (trailing zeros trimmed) when non-zero. `size` is decimal, `mode`
//! is octal padded to four digits. In the body, `%`, space, tab, CR and LF in
//! the identifier are percent-encoded.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::advertisement::{Advertisement, EventKind, FileAttributes, MessageHeaders, RenameLink};
use crate::checksum::Digest;

/// Header names.
pub mod header {
    pub const SENDER: &str = "sender";
    pub const TIMESTAMP: &str = "timestamp";
    pub const CORRELATION: &str = "correlation";
    pub const EVENT: &str = "event";
    pub const SUM: &str = "sum";
    pub const OLDNAME: &str = "oldname";
    pub const NEWNAME: &str = "newname";
}

/// Content type advertised for the body.
pub const CONTENT_TYPE: &str = "text/plain";

/// Errors decoding a payload received from the broker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("missing header '{0}'")]
    MissingHeader(&'static str),

    #[error("invalid value '{value}' for header '{name}'")]
    InvalidHeader { name: &'static str, value: String },

    #[error("malformed body: {0}")]
    MalformedBody(String),
}

/// Header table and body of one published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePayload {
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl WirePayload {
    pub fn encode(advertisement: &Advertisement) -> Self {
        let meta = advertisement.headers();
        let mut headers = BTreeMap::new();
        headers.insert(header::SENDER.to_string(), meta.sender.clone());
        headers.insert(header::TIMESTAMP.to_string(), format_timestamp(&meta.timestamp));
        headers.insert(header::CORRELATION.to_string(), meta.correlation.to_string());
        headers.insert(
            header::EVENT.to_string(),
            advertisement.kind().token().to_string(),
        );
        match &meta.rename {
            Some(RenameLink::OldName(old)) => {
                headers.insert(header::OLDNAME.to_string(), old.clone());
            }
            Some(RenameLink::NewName(new)) => {
                headers.insert(header::NEWNAME.to_string(), new.clone());
            }
            None => {}
        }

        let identifier = escape_identifier(advertisement.identifier());
        let body = match advertisement.file() {
            Some(file) => {
                headers.insert(header::SUM.to_string(), file.sum.to_string());
                format!(
                    "{} {} {} {} {:04o}",
                    identifier,
                    file.size,
                    format_timestamp(&file.atime),
                    format_timestamp(&file.mtime),
                    file.mode
                )
            }
            None => identifier,
        };

        Self { headers, body }
    }

    /// Recovers the advertisement a producer encoded. Unknown headers are ignored.
    pub fn decode(&self) -> Result<Advertisement, DecodeError> {
        let kind_token = self.header(header::EVENT)?;
        let kind = EventKind::from_token(kind_token).ok_or_else(|| DecodeError::InvalidHeader {
            name: header::EVENT,
            value: kind_token.to_string(),
        })?;

        let timestamp = self.header(header::TIMESTAMP)?;
        let correlation = self.header(header::CORRELATION)?;
        let headers = MessageHeaders {
            sender: self.header(header::SENDER)?.to_string(),
            timestamp: parse_timestamp(timestamp).ok_or_else(|| DecodeError::InvalidHeader {
                name: header::TIMESTAMP,
                value: timestamp.to_string(),
            })?,
            correlation: Uuid::parse_str(correlation).map_err(|_| DecodeError::InvalidHeader {
                name: header::CORRELATION,
                value: correlation.to_string(),
            })?,
            rename: self.rename_link()?,
        };

        let fields: Vec<&str> = self.body.split(' ').collect();
        let identifier = unescape_identifier(fields[0])?;
        if identifier.is_empty() {
            return Err(DecodeError::MalformedBody("empty identifier".to_string()));
        }

        let file = match (kind, fields.as_slice()) {
            (EventKind::Remove, [_]) => None,
            (EventKind::Create | EventKind::RenameTo, [_, size, atime, mtime, mode]) => {
                let sum = self.header(header::SUM)?;
                Some(FileAttributes {
                    size: size.parse().map_err(|_| body_field("size", size))?,
                    atime: parse_timestamp(atime).ok_or_else(|| body_field("atime", atime))?,
                    mtime: parse_timestamp(mtime).ok_or_else(|| body_field("mtime", mtime))?,
                    mode: u32::from_str_radix(mode, 8).map_err(|_| body_field("mode", mode))?,
                    sum: sum.parse::<Digest>().map_err(|_| DecodeError::InvalidHeader {
                        name: header::SUM,
                        value: sum.to_string(),
                    })?,
                })
            }
            _ => {
                return Err(DecodeError::MalformedBody(format!(
                    "{} fields for a {} event",
                    fields.len(),
                    kind
                )))
            }
        };

        Ok(Advertisement::from_parts(identifier, kind, file, headers))
    }

    fn header(&self, name: &'static str) -> Result<&str, DecodeError> {
        self.headers
            .get(name)
            .map(String::as_str)
            .ok_or(DecodeError::MissingHeader(name))
    }

    fn rename_link(&self) -> Result<Option<RenameLink>, DecodeError> {
        match (
            self.headers.get(header::OLDNAME),
            self.headers.get(header::NEWNAME),
        ) {
            (None, None) => Ok(None),
            (Some(old), None) => Ok(Some(RenameLink::OldName(old.clone()))),
            (None, Some(new)) => Ok(Some(RenameLink::NewName(new.clone()))),
            (Some(_), Some(new)) => Err(DecodeError::InvalidHeader {
                name: header::NEWNAME,
                value: new.clone(),
            }),
        }
    }
}

fn body_field(name: &str, value: &str) -> DecodeError {
    DecodeError::MalformedBody(format!("invalid {} '{}'", name, value))
}

/// Formats a timestamp in the wire encoding.
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    let seconds = time.format("%Y%m%d%H%M%S").to_string();
    match time.timestamp_subsec_nanos() {
        0 => seconds,
        nanos => {
            let fraction = format!("{:09}", nanos);
            format!("{}.{}", seconds, fraction.trim_end_matches('0'))
        }
    }
}

/// Parses a timestamp in the wire encoding.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let (seconds, fraction) = match s.split_once('.') {
        Some((seconds, fraction)) => (seconds, Some(fraction)),
        None => (s, None),
    };
    if seconds.len() != 14 || !seconds.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let nanos = match fraction {
        None => 0,
        Some(f) if (1..=9).contains(&f.len()) && f.bytes().all(|b| b.is_ascii_digit()) => {
            f.parse::<u32>().ok()? * 10u32.pow(9 - f.len() as u32)
        }
        Some(_) => return None,
    };

    let year = seconds[0..4].parse().ok()?;
    let month = seconds[4..6].parse().ok()?;
    let day = seconds[6..8].parse().ok()?;
    let hour = seconds[8..10].parse().ok()?;
    let minute = seconds[10..12].parse().ok()?;
    let second = seconds[12..14].parse().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_nano_opt(hour, minute, second, nanos)
        .map(|t| t.and_utc())
}

fn escape_identifier(identifier: &str) -> String {
    let mut escaped = String::with_capacity(identifier.len());
    for c in identifier.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ' ' => escaped.push_str("%20"),
            '\t' => escaped.push_str("%09"),
            '\r' => escaped.push_str("%0D"),
            '\n' => escaped.push_str("%0A"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn unescape_identifier(escaped: &str) -> Result<String, DecodeError> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let byte = escaped
                .get(i + 1..i + 3)
                .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| {
                    DecodeError::MalformedBody(format!("bad escape in '{}'", escaped))
                })?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|_| DecodeError::MalformedBody(format!("identifier '{}' is not UTF-8", escaped)))
}
