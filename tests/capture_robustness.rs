//! Parser resilience: compressed bodies, damaged records, idempotence.

mod common;

use common::{chunk, export_flow, flow_record, gzip, write_capture};
use leakprobe::capture::{CaptureError, CaptureSession};
use leakprobe::models::{ScanExpectation, Verdict};
use leakprobe::scanner::{self, ScanConfig};

const HOST: &str = "ingest.telemetry.example.com";

#[test]
fn gzip_chunked_body_round_trips_to_the_scanner() {
    let plain = br#"{"prompt":"In 2 sentences what is the Bill of Rights?"}"#;
    let compressed = gzip(plain);
    let framed = chunk(&compressed, 11);
    let file = write_capture(&[flow_record(
        "POST",
        HOST,
        "/v1/traces",
        &[
            ("content-type", "application/json"),
            ("content-encoding", "gzip"),
            ("transfer-encoding", "chunked"),
        ],
        &framed,
        Some((200, &[], b"")),
    )]);

    let session = CaptureSession::from_file(file.path()).unwrap();
    let result = scanner::scan_session(
        &session,
        None,
        "Bill of Rights",
        ScanExpectation::MustFind,
        &ScanConfig::default(),
    )
    .unwrap();

    assert_eq!(result.verdict(), Verdict::Pass);
    assert_eq!(result.matches.len(), 1);
}

#[test]
fn one_corrupted_record_does_not_poison_the_session() {
    // A frame with an intact length prefix around undecodable contents.
    let garbage = b"8:\xde\xad\xbe\xef\xde\xad\xbe\xef}".to_vec();
    let file = write_capture(&[
        export_flow(HOST, "/v1/traces", b"{\"a\":1}"),
        garbage,
        export_flow(HOST, "/v1/metrics", b"{\"b\":2}"),
    ]);

    let session = CaptureSession::from_file(file.path()).unwrap();
    assert_eq!(session.exchanges.len(), 2);
    assert_eq!(session.malformed.len(), 1);
    assert_eq!(session.malformed[0].index, 1);

    // The damaged record surfaces as "not scanned", so a must-not-find
    // verdict cannot silently rest on it.
    let result = scanner::scan_session(
        &session,
        None,
        "anything",
        ScanExpectation::MustNotFind,
        &ScanConfig::default(),
    )
    .unwrap();
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].source_id, "record 1");
}

#[test]
fn undecodable_body_is_flagged_not_scanned() {
    let file = write_capture(&[export_flow(HOST, "/v1/traces", b"\xff\xfe\x00binary")]);
    let session = CaptureSession::from_file(file.path()).unwrap();
    assert_eq!(session.exchanges.len(), 1);

    let result = scanner::scan_session(
        &session,
        None,
        "needle",
        ScanExpectation::MustNotFind,
        &ScanConfig::default(),
    )
    .unwrap();
    assert!(result.matches.is_empty());
    assert_eq!(result.skipped.len(), 1);
    assert!(result.skipped[0].reason.contains("utf-8"));
}

#[test]
fn parsing_is_idempotent() {
    let file = write_capture(&[
        export_flow(HOST, "/v1/traces", b"{\"a\":1}"),
        export_flow(HOST, "/v1/logs", b"{\"b\":2}"),
    ]);
    let first = CaptureSession::from_file(file.path()).unwrap();
    let second = CaptureSession::from_file(file.path()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn truncated_container_is_a_hard_error() {
    let mut frames = vec![export_flow(HOST, "/v1/traces", b"{}")];
    frames.push(b"400:this frame never finishes".to_vec());
    let file = write_capture(&frames);
    match CaptureSession::from_file(file.path()) {
        Err(CaptureError::Truncated { index: 1, .. }) => {}
        other => panic!("expected truncation at record 1, got {other:?}"),
    }
}

#[test]
fn empty_container_is_an_empty_session_not_an_error() {
    let file = write_capture(&[]);
    let session = CaptureSession::from_file(file.path()).unwrap();
    assert!(session.exchanges.is_empty());

    // Scanning an empty session still computes a verdict.
    let result = scanner::scan_session(
        &session,
        None,
        "needle",
        ScanExpectation::MustNotFind,
        &ScanConfig::default(),
    )
    .unwrap();
    assert_eq!(result.verdict(), Verdict::Pass);
    assert_eq!(result.sources_scanned, 0);
}
