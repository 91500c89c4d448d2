// src/capture/tnetstring.rs
//! Frame codec for the proxy dump container.
//!
//! Each record is a length-prefixed value: ASCII digits, a colon, the payload,
//! then a single type byte. Dicts and lists nest by concatenating encoded
//! values inside the payload. The encoder exists so tests can synthesize
//! captures without a live proxy.

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TnetError {
    #[error("truncated frame: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("invalid length prefix")]
    InvalidLength,

    #[error("unknown type byte 0x{0:02x}")]
    UnknownType(u8),

    #[error("invalid payload for type '{kind}': {detail}")]
    InvalidPayload { kind: char, detail: String },
}

/// One decoded container value.
#[derive(Debug, Clone, PartialEq)]
pub enum TValue {
    Bytes(Vec<u8>),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    List(Vec<TValue>),
    Dict(Vec<(TValue, TValue)>),
}

impl TValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            TValue::Bytes(b) => Some(b),
            TValue::Str(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// String view of a text-ish value. Byte strings qualify only when they
    /// hold valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TValue::Str(s) => Some(s),
            TValue::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            TValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            TValue::Float(f) => Some(*f),
            TValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[TValue]> {
        match self {
            TValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Dict lookup by textual key.
    pub fn get(&self, key: &str) -> Option<&TValue> {
        match self {
            TValue::Dict(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

/// Length prefixes are capped at nine digits, which bounds a single frame
/// below 1 GB and rejects runaway garbage early.
const MAX_LENGTH_DIGITS: usize = 9;

/// Split one complete frame off the front of `input` without decoding its
/// contents. Only the length prefix is validated, which lets a caller keep
/// its place in the stream even when a frame's payload turns out to be junk.
pub fn frame(input: &[u8]) -> Result<(&[u8], &[u8]), TnetError> {
    let (colon, len) = length_prefix(input)?;
    let needed = colon + 1 + len + 1;
    if input.len() < needed {
        return Err(TnetError::Truncated {
            needed: needed - input.len(),
        });
    }
    Ok((&input[..needed], &input[needed..]))
}

fn length_prefix(input: &[u8]) -> Result<(usize, usize), TnetError> {
    let colon = input
        .iter()
        .take(MAX_LENGTH_DIGITS + 1)
        .position(|&b| b == b':')
        .ok_or(TnetError::InvalidLength)?;
    if colon == 0 {
        return Err(TnetError::InvalidLength);
    }
    let digits = &input[..colon];
    if !digits.iter().all(|b| b.is_ascii_digit()) {
        return Err(TnetError::InvalidLength);
    }
    let len: usize = std::str::from_utf8(digits)
        .map_err(|_| TnetError::InvalidLength)?
        .parse()
        .map_err(|_| TnetError::InvalidLength)?;
    Ok((colon, len))
}

/// Parse one value off the front of `input`, returning it and the remainder.
pub fn parse(input: &[u8]) -> Result<(TValue, &[u8]), TnetError> {
    let (colon, len) = length_prefix(input)?;
    let body_start = colon + 1;
    let needed = body_start + len + 1;
    if input.len() < needed {
        return Err(TnetError::Truncated {
            needed: needed - input.len(),
        });
    }
    let payload = &input[body_start..body_start + len];
    let type_byte = input[body_start + len];
    let rest = &input[needed..];

    let value = match type_byte {
        b',' => TValue::Bytes(payload.to_vec()),
        b';' => TValue::Str(
            std::str::from_utf8(payload)
                .map_err(|e| TnetError::InvalidPayload {
                    kind: ';',
                    detail: e.to_string(),
                })?
                .to_string(),
        ),
        b'#' => TValue::Int(parse_ascii(payload, '#')?),
        b'^' => TValue::Float(parse_ascii(payload, '^')?),
        b'!' => match payload {
            b"true" => TValue::Bool(true),
            b"false" => TValue::Bool(false),
            other => {
                return Err(TnetError::InvalidPayload {
                    kind: '!',
                    detail: String::from_utf8_lossy(other).into_owned(),
                })
            }
        },
        b'~' => {
            if len != 0 {
                return Err(TnetError::InvalidPayload {
                    kind: '~',
                    detail: format!("null with {len}-byte payload"),
                });
            }
            TValue::Null
        }
        b']' => {
            let mut items = Vec::new();
            let mut inner = payload;
            while !inner.is_empty() {
                let (item, next) = parse(inner)?;
                items.push(item);
                inner = next;
            }
            TValue::List(items)
        }
        b'}' => {
            let mut pairs = Vec::new();
            let mut inner = payload;
            while !inner.is_empty() {
                let (key, next) = parse(inner)?;
                if next.is_empty() {
                    return Err(TnetError::InvalidPayload {
                        kind: '}',
                        detail: "dict key without value".into(),
                    });
                }
                let (value, next) = parse(next)?;
                pairs.push((key, value));
                inner = next;
            }
            TValue::Dict(pairs)
        }
        other => return Err(TnetError::UnknownType(other)),
    };
    Ok((value, rest))
}

fn parse_ascii<T: std::str::FromStr>(payload: &[u8], kind: char) -> Result<T, TnetError> {
    std::str::from_utf8(payload)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TnetError::InvalidPayload {
            kind,
            detail: String::from_utf8_lossy(payload).into_owned(),
        })
}

/// Encode one value.
pub fn dump(value: &TValue) -> Vec<u8> {
    let (payload, type_byte) = match value {
        TValue::Bytes(b) => (b.clone(), b','),
        TValue::Str(s) => (s.as_bytes().to_vec(), b';'),
        TValue::Int(i) => (i.to_string().into_bytes(), b'#'),
        TValue::Float(f) => (format_float(*f).into_bytes(), b'^'),
        TValue::Bool(b) => (
            if *b { b"true".to_vec() } else { b"false".to_vec() },
            b'!',
        ),
        TValue::Null => (Vec::new(), b'~'),
        TValue::List(items) => {
            let mut buf = Vec::new();
            for item in items {
                buf.extend(dump(item));
            }
            (buf, b']')
        }
        TValue::Dict(pairs) => {
            let mut buf = Vec::new();
            for (k, v) in pairs {
                buf.extend(dump(k));
                buf.extend(dump(v));
            }
            (buf, b'}')
        }
    };
    let mut out = payload.len().to_string().into_bytes();
    out.push(b':');
    out.extend(payload);
    out.push(type_byte);
    out
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}
