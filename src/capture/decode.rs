// src/capture/decode.rs
//! Body decode pipeline: transfer decoding, content decoding, then UTF-8.
//!
//! A failure at any stage downgrades the body to `BodyContent::Binary` with
//! the reason recorded. Nothing in here returns an error to the caller; a
//! body that will not decode must not cost the rest of the session.

use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use log::debug;

use crate::models::{header_lookup, BodyContent};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Run the full pipeline for one message body.
///
/// Wire order governs: chunked framing wraps the content coding, so
/// de-chunking happens before decompression.
pub fn decode_body(raw: &[u8], headers: &[(String, String)]) -> BodyContent {
    if raw.is_empty() {
        return BodyContent::Empty;
    }
    let wire_size = raw.len();
    let mut data = raw.to_vec();

    if is_chunked(headers) {
        match dechunk(&data) {
            Ok(unchunked) => data = unchunked,
            Err(reason) => {
                return BodyContent::Binary {
                    bytes: raw.to_vec(),
                    reason: format!("chunked decode failed: {reason}"),
                }
            }
        }
    }

    match content_encoding(headers) {
        Some(enc) if enc == "gzip" || enc == "x-gzip" => match gunzip(&data) {
            Ok(plain) => data = plain,
            Err(e) => {
                return BodyContent::Binary {
                    bytes: raw.to_vec(),
                    reason: format!("gzip decode failed: {e}"),
                }
            }
        },
        Some(enc) if enc == "deflate" => match inflate(&data) {
            Ok(plain) => data = plain,
            Err(e) => {
                return BodyContent::Binary {
                    bytes: raw.to_vec(),
                    reason: format!("deflate decode failed: {e}"),
                }
            }
        },
        Some(enc) if enc == "identity" => {}
        Some(enc) => {
            return BodyContent::Binary {
                bytes: raw.to_vec(),
                reason: format!("unsupported content-encoding: {enc}"),
            }
        }
        // Proxy dumps frequently lack the header even when the payload is
        // gzipped; sniff the magic and fall through untouched if it lied.
        None if data.starts_with(&GZIP_MAGIC) => {
            if let Ok(plain) = gunzip(&data) {
                data = plain;
            } else {
                debug!("gzip magic present but stream did not inflate; keeping raw bytes");
            }
        }
        None => {}
    }

    match String::from_utf8(data) {
        Ok(text) => BodyContent::Text { text, wire_size },
        Err(e) => BodyContent::Binary {
            bytes: raw.to_vec(),
            reason: format!("invalid utf-8 at byte {}", e.utf8_error().valid_up_to()),
        },
    }
}

fn is_chunked(headers: &[(String, String)]) -> bool {
    header_lookup(headers, "transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false)
}

fn content_encoding(headers: &[(String, String)]) -> Option<String> {
    header_lookup(headers, "content-encoding").map(|v| v.trim().to_ascii_lowercase())
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    // "deflate" means zlib-wrapped on the wire, but some senders ship the
    // bare stream; accept both.
    let mut out = Vec::new();
    match ZlibDecoder::new(data).read_to_end(&mut out) {
        Ok(_) => Ok(out),
        Err(_) => {
            let mut out = Vec::new();
            DeflateDecoder::new(data).read_to_end(&mut out)?;
            Ok(out)
        }
    }
}

/// Remove chunked transfer framing: hex size line, chunk, CRLF, terminated by
/// a zero-size chunk. Trailers are discarded.
fn dechunk(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    loop {
        let line_end = find_crlf(data, pos).ok_or("missing chunk size line")?;
        let size_str = std::str::from_utf8(&data[pos..line_end])
            .map_err(|_| "chunk size line is not ASCII".to_string())?;
        // Chunk extensions after ';' are legal and irrelevant here.
        let size_str = size_str.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| format!("bad chunk size {size_str:?}"))?;
        pos = line_end + 2;
        if size == 0 {
            return Ok(out);
        }
        let chunk_end = pos
            .checked_add(size)
            .filter(|&e| e <= data.len())
            .ok_or("chunk overruns body")?;
        out.extend_from_slice(&data[pos..chunk_end]);
        if data.get(chunk_end..chunk_end + 2) != Some(b"\r\n".as_slice()) {
            return Err("chunk missing trailing CRLF".into());
        }
        pos = chunk_end + 2;
    }
}

fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn chunk(data: &[u8], sizes: &[usize]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut rest = data;
        for &s in sizes {
            let (head, tail) = rest.split_at(s.min(rest.len()));
            out.extend(format!("{:x}\r\n", head.len()).into_bytes());
            out.extend_from_slice(head);
            out.extend(b"\r\n");
            rest = tail;
        }
        out.extend(b"0\r\n\r\n");
        out
    }

    fn hdr(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn plain_utf8_passes_through() {
        let body = decode_body(b"hello world", &[]);
        assert_eq!(body.text(), Some("hello world"));
        assert_eq!(body.wire_size(), 11);
    }

    #[test]
    fn empty_body_is_empty() {
        assert_eq!(decode_body(b"", &[]), BodyContent::Empty);
    }

    #[test]
    fn gzip_with_header_decodes() {
        let raw = gzip(b"compressed payload");
        let body = decode_body(&raw, &hdr(&[("Content-Encoding", "gzip")]));
        assert_eq!(body.text(), Some("compressed payload"));
        assert_eq!(body.wire_size(), raw.len());
    }

    #[test]
    fn gzip_without_header_is_sniffed() {
        let raw = gzip(b"no header here");
        let body = decode_body(&raw, &[]);
        assert_eq!(body.text(), Some("no header here"));
    }

    #[test]
    fn chunked_then_gzip_decodes_in_wire_order() {
        let compressed = gzip(b"It begins with the Bill of Rights text.");
        let framed = chunk(&compressed, &[7, compressed.len() - 7]);
        let headers = hdr(&[
            ("Transfer-Encoding", "chunked"),
            ("Content-Encoding", "gzip"),
        ]);
        let body = decode_body(&framed, &headers);
        assert_eq!(body.text(), Some("It begins with the Bill of Rights text."));
    }

    #[test]
    fn chunked_alone_decodes() {
        let framed = chunk(b"abcdefghij", &[4, 6]);
        let body = decode_body(&framed, &hdr(&[("transfer-encoding", "chunked")]));
        assert_eq!(body.text(), Some("abcdefghij"));
    }

    #[test]
    fn broken_chunk_framing_keeps_raw_bytes() {
        let body = decode_body(b"zz\r\nnot a chunk", &hdr(&[("Transfer-Encoding", "chunked")]));
        match body {
            BodyContent::Binary { bytes, reason } => {
                assert_eq!(bytes, b"zz\r\nnot a chunk");
                assert!(reason.contains("chunked"), "reason was: {reason}");
            }
            other => panic!("expected binary fallback, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_encoding_keeps_raw_bytes() {
        let body = decode_body(b"\x00\x01", &hdr(&[("Content-Encoding", "br")]));
        match body {
            BodyContent::Binary { reason, .. } => assert!(reason.contains("br")),
            other => panic!("expected binary fallback, got {other:?}"),
        }
    }

    #[test]
    fn invalid_utf8_keeps_raw_bytes_with_offset() {
        let body = decode_body(b"ok\xffnot", &[]);
        match body {
            BodyContent::Binary { reason, .. } => assert!(reason.contains("byte 2")),
            other => panic!("expected binary fallback, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_gzip_with_header_keeps_raw_bytes() {
        let mut raw = gzip(b"payload");
        let mid = raw.len() / 2;
        raw.truncate(mid);
        let body = decode_body(&raw, &hdr(&[("Content-Encoding", "gzip")]));
        assert!(matches!(body, BodyContent::Binary { .. }));
    }
}
