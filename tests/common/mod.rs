#![allow(dead_code)]
//! Shared fixtures: synthesize capture containers without a live proxy.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;

use leakprobe::capture::tnetstring::{dump, TValue};

fn b(s: &[u8]) -> TValue {
    TValue::Bytes(s.to_vec())
}

fn header_list(headers: &[(&str, &str)]) -> TValue {
    TValue::List(
        headers
            .iter()
            .map(|(k, v)| TValue::List(vec![b(k.as_bytes()), b(v.as_bytes())]))
            .collect(),
    )
}

/// One encoded HTTP flow record.
pub fn flow_record(
    method: &str,
    host: &str,
    path: &str,
    request_headers: &[(&str, &str)],
    request_body: &[u8],
    response: Option<(i64, &[(&str, &str)], &[u8])>,
) -> Vec<u8> {
    let request = TValue::Dict(vec![
        (b(b"http_version"), b(b"HTTP/1.1")),
        (b(b"method"), b(method.as_bytes())),
        (b(b"scheme"), b(b"https")),
        (b(b"host"), b(host.as_bytes())),
        (b(b"port"), TValue::Int(443)),
        (b(b"path"), b(path.as_bytes())),
        (b(b"headers"), header_list(request_headers)),
        (b(b"content"), b(request_body)),
        (b(b"timestamp_start"), TValue::Float(1754600000.0)),
    ]);
    let response = match response {
        None => TValue::Null,
        Some((status, headers, body)) => TValue::Dict(vec![
            (b(b"http_version"), b(b"HTTP/1.1")),
            (b(b"status_code"), TValue::Int(status)),
            (b(b"reason"), b(b"OK")),
            (b(b"headers"), header_list(headers)),
            (b(b"content"), b(body)),
            (b(b"timestamp_start"), TValue::Float(1754600000.2)),
        ]),
    };
    let flow = TValue::Dict(vec![
        (b(b"type"), b(b"http")),
        (b(b"version"), TValue::Int(22)),
        (b(b"request"), request),
        (b(b"response"), response),
    ]);
    dump(&flow)
}

/// POST with a 200/empty response — the common telemetry export shape.
pub fn export_flow(host: &str, path: &str, body: &[u8]) -> Vec<u8> {
    flow_record(
        "POST",
        host,
        path,
        &[("content-type", "application/json")],
        body,
        Some((200, &[], b"")),
    )
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Wrap `data` in chunked transfer framing, split after `first` bytes.
pub fn chunk(data: &[u8], first: usize) -> Vec<u8> {
    let split = first.min(data.len());
    let mut out = Vec::new();
    for part in [&data[..split], &data[split..]] {
        if part.is_empty() {
            continue;
        }
        out.extend(format!("{:x}\r\n", part.len()).into_bytes());
        out.extend_from_slice(part);
        out.extend(b"\r\n");
    }
    out.extend(b"0\r\n\r\n");
    out
}

/// Write frames out as a capture file; keep the handle alive while reading.
pub fn write_capture(frames: &[Vec<u8>]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp capture");
    for frame in frames {
        file.write_all(frame).expect("write capture frame");
    }
    file.flush().expect("flush capture");
    file
}
