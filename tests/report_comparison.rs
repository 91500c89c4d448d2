//! Before/after comparison artifact built from real scans.

mod common;

use common::{export_flow, write_capture};
use leakprobe::capture::CaptureSession;
use leakprobe::models::{ScanExpectation, Verdict};
use leakprobe::reporting::{ReportDocument, SourceInfo};
use leakprobe::scanner::{self, ScanConfig};

const PROMPT: &str = "In 2 sentences what is the Bill of Rights?";
const HOST: &str = "ingest.telemetry.example.com";

fn scan_file(
    file: &tempfile::NamedTempFile,
    expectation: ScanExpectation,
) -> (leakprobe::models::ScanResult, String) {
    let session = CaptureSession::from_file(file.path()).unwrap();
    let result = scanner::scan_session(
        &session,
        None,
        PROMPT,
        expectation,
        &ScanConfig::default(),
    )
    .unwrap();
    (result, session.origin)
}

#[test]
fn comparison_report_tells_the_whole_story() {
    let before_body = format!("{{\"prompt\":\"{PROMPT}\"}}");
    let before = write_capture(&[export_flow(HOST, "/v1/traces", before_body.as_bytes())]);
    let after = write_capture(&[export_flow(
        HOST,
        "/v1/traces",
        b"{\"prompt\":\"[Scrubbed due to 'prompt']\"}",
    )]);

    let (before_result, before_origin) = scan_file(&before, ScanExpectation::MustFind);
    let (after_result, after_origin) = scan_file(&after, ScanExpectation::MustNotFind);

    let mut doc = ReportDocument::new(PROMPT);
    doc.push(
        "before (no scrubbing)",
        before_result,
        SourceInfo::capture(&before_origin, before_body.len()),
    );
    doc.push(
        "after (scrubbing enabled)",
        after_result,
        SourceInfo::capture(&after_origin, 41),
    );

    assert_eq!(doc.overall_verdict(), Verdict::Pass);

    let text = doc.render();
    // Fixed section order, both runs present.
    let summary = text.find("## Summary").unwrap();
    let evidence = text.find("## Evidence").unwrap();
    let excerpts = text.find("## Excerpts").unwrap();
    assert!(summary < evidence && evidence < excerpts);
    assert!(text.contains("before (no scrubbing)"));
    assert!(text.contains("after (scrubbing enabled)"));

    // The baseline excerpt proves the prompt was on the wire; the scrubbed
    // run contributes no content, only an elision marker.
    assert!(text.contains(PROMPT));
    assert!(!text.contains("[Scrubbed due to 'prompt']"));
    assert!(text.contains("held no occurrence and are elided"));
}

#[test]
fn report_written_to_disk_matches_the_render() {
    let before_body = format!("{{\"prompt\":\"{PROMPT}\"}}");
    let before = write_capture(&[export_flow(HOST, "/v1/traces", before_body.as_bytes())]);
    let (result, origin) = scan_file(&before, ScanExpectation::MustFind);

    let mut doc = ReportDocument::new(PROMPT);
    doc.push("before (no scrubbing)", result, SourceInfo::capture(&origin, 0));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("BEFORE.md");
    doc.write_to_file(&path).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), doc.render());
}

#[test]
fn failed_scrub_is_reported_unredacted() {
    let leaky_body = format!("{{\"prompt\":\"{PROMPT}\"}}");
    let after = write_capture(&[export_flow(HOST, "/v1/traces", leaky_body.as_bytes())]);
    let (result, origin) = scan_file(&after, ScanExpectation::MustNotFind);

    let mut doc = ReportDocument::new(PROMPT);
    doc.push(
        "after (scrubbing enabled)",
        result,
        SourceInfo::capture(&origin, leaky_body.len()),
    );

    assert_eq!(doc.overall_verdict(), Verdict::Fail);
    let text = doc.render();
    assert!(text.contains("**UNEXPECTED:**"));
    // The offending excerpt is the proof of failure and is shown in full.
    assert!(text.contains(PROMPT));
}
