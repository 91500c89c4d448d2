// src/capture/mod.rs
//! Capture parser: turns a proxy session dump into an ordered
//! `CaptureSession` of HTTP exchanges.
//!
//! The container is a stream of framed flow records (see `tnetstring`).
//! Outer framing damage is fatal — there is no way to resynchronize a
//! length-prefixed stream — but a record whose frame is intact and whose
//! contents are garbage only costs that one record.

pub mod decode;
pub mod tnetstring;

use std::path::Path;

use chrono::DateTime;
use log::warn;
use thiserror::Error;

use crate::models::{BodyContent, CaptureSession, Exchange, MalformedRecord, ResponsePart};
use self::tnetstring::{TValue, TnetError};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture file not found: {path}")]
    NotFound { path: String },

    #[error("failed to read capture {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("capture truncated at record {index}: {source}")]
    Truncated { index: usize, source: TnetError },

    #[error("not a recognized capture container (record {index}): {source}")]
    Malformed { index: usize, source: TnetError },
}

impl CaptureSession {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<CaptureSession, CaptureError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            let path = path.display().to_string();
            if e.kind() == std::io::ErrorKind::NotFound {
                CaptureError::NotFound { path }
            } else {
                CaptureError::Io { path, source: e }
            }
        })?;
        CaptureSession::from_bytes(&data, &path.display().to_string())
    }

    /// Parse a capture already in memory. `origin` labels the session in
    /// results and reports.
    pub fn from_bytes(data: &[u8], origin: &str) -> Result<CaptureSession, CaptureError> {
        let mut exchanges = Vec::new();
        let mut malformed = Vec::new();
        let mut non_http_records = 0usize;

        let mut rest = data;
        let mut index = 0usize;
        while !rest.is_empty() {
            // Framing damage is fatal (no way to resynchronize the stream),
            // but a frame whose contents will not decode only costs itself.
            let (raw_record, next) = match tnetstring::frame(rest) {
                Ok(ok) => ok,
                Err(source @ TnetError::Truncated { .. }) => {
                    return Err(CaptureError::Truncated { index, source })
                }
                Err(source) => return Err(CaptureError::Malformed { index, source }),
            };
            rest = next;
            let outcome = match tnetstring::parse(raw_record) {
                Ok((record, _)) => exchange_from_record(&record, index),
                Err(e) => Err(format!("undecodable record: {e}")),
            };
            match outcome {
                Ok(Some(exchange)) => exchanges.push(exchange),
                Ok(None) => non_http_records += 1,
                Err(reason) => {
                    warn!("capture {origin}: record {index} unusable: {reason}");
                    malformed.push(MalformedRecord { index, reason });
                }
            }
            index += 1;
        }

        if exchanges.is_empty() {
            warn!("capture {origin} holds no HTTP exchanges");
        }

        Ok(CaptureSession {
            origin: origin.to_string(),
            exchanges,
            malformed,
            non_http_records,
        })
    }
}

/// Interpret one framed record. `Ok(None)` means a valid non-HTTP flow.
fn exchange_from_record(record: &TValue, index: usize) -> Result<Option<Exchange>, String> {
    let kind = record
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or("record has no flow type")?;
    if kind != "http" {
        return Ok(None);
    }

    let request = record.get("request").ok_or("http flow has no request")?;
    let method = text_field(request, "method")?;
    let url = pretty_url(request)?;
    let request_headers = header_pairs(request.get("headers"));
    let request_body = body_field(request, &request_headers);
    let timestamp = request
        .get("timestamp_start")
        .and_then(|v| v.as_float())
        .and_then(|secs| DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32));

    let response = match record.get("response") {
        None | Some(TValue::Null) => None,
        Some(resp) => {
            let status = resp
                .get("status_code")
                .and_then(|v| v.as_int())
                .ok_or("response has no status code")?;
            let headers = header_pairs(resp.get("headers"));
            let body = body_field(resp, &headers);
            Some(ResponsePart {
                status: u16::try_from(status).map_err(|_| format!("bad status code {status}"))?,
                headers,
                body,
            })
        }
    };

    Ok(Some(Exchange {
        index,
        method,
        url,
        request_headers,
        request_body,
        response,
        timestamp,
    }))
}

fn text_field(dict: &TValue, key: &str) -> Result<String, String> {
    dict.get(key)
        .ok_or_else(|| format!("missing field {key:?}"))?
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| format!("field {key:?} is not text"))
}

/// scheme://host[:port]/path with default ports elided.
fn pretty_url(request: &TValue) -> Result<String, String> {
    let scheme = text_field(request, "scheme")?;
    let host = text_field(request, "host")?;
    let path = text_field(request, "path")?;
    let port = request.get("port").and_then(|v| v.as_int());
    let default_port = match scheme.as_str() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    let authority = match port {
        Some(p) if Some(p) != default_port => format!("{host}:{p}"),
        _ => host,
    };
    Ok(format!("{scheme}://{authority}{path}"))
}

/// Header lists arrive as `[[name, value], ...]`; byte values outside UTF-8
/// degrade to lossy text, which is all the scanner can use anyway.
fn header_pairs(value: Option<&TValue>) -> Vec<(String, String)> {
    let Some(items) = value.and_then(|v| v.as_list()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|pair| {
            let kv = pair.as_list()?;
            let name = kv.first()?.as_bytes()?;
            let val = kv.get(1)?.as_bytes()?;
            Some((
                String::from_utf8_lossy(name).into_owned(),
                String::from_utf8_lossy(val).into_owned(),
            ))
        })
        .collect()
}

fn body_field(message: &TValue, headers: &[(String, String)]) -> BodyContent {
    match message.get("content") {
        None | Some(TValue::Null) => BodyContent::Empty,
        Some(content) => match content.as_bytes() {
            Some(raw) => decode::decode_body(raw, headers),
            None => BodyContent::Binary {
                bytes: Vec::new(),
                reason: "content field is not a byte string".into(),
            },
        },
    }
}
