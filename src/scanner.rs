// src/scanner.rs
//! Content scanner: literal substring search over named text fields.
//!
//! Matching is case-sensitive and literal on purpose. Scrubbing typically
//! replaces the sensitive string with placeholder text full of regex
//! metacharacters; a literal comparison cannot be fooled by either side.
//! Every source and field is visited — the evidence list is exhaustive, and
//! the report generator depends on that for before/after comparisons.

use thiserror::Error;

use crate::models::{
    BodyContent, CaptureSession, Exchange, MalformedRecord, Match, MatchLocation, RemoteRecord,
    ScanExpectation, ScanResult, SkippedField,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScanError {
    /// An empty pattern trivially matches everything and would turn the
    /// validation into a no-op.
    #[error("target string is empty")]
    EmptyTarget,
}

/// Scan tunables.
#[derive(Debug, Clone, Copy)]
pub struct ScanConfig {
    /// Characters of context kept on each side of a hit in the excerpt.
    pub excerpt_context: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            excerpt_context: 150,
        }
    }
}

pub enum FieldText<'a> {
    Text(&'a str),
    /// Present but not scannable; the payload is the reason.
    Unscannable(&'a str),
}

pub struct FieldView<'a> {
    pub location: MatchLocation,
    pub name: Option<&'a str>,
    pub content: FieldText<'a>,
}

/// Anything exposing an ordered set of named text fields to scan.
pub trait Scannable {
    fn source_id(&self) -> String;
    fn fields(&self) -> Vec<FieldView<'_>>;
}

impl Scannable for Exchange {
    fn source_id(&self) -> String {
        format!("exchange {}", self.index)
    }

    fn fields(&self) -> Vec<FieldView<'_>> {
        let mut out = Vec::new();
        push_body(&mut out, MatchLocation::RequestBody, &self.request_body);
        push_headers(&mut out, &self.request_headers);
        if let Some(resp) = &self.response {
            push_body(&mut out, MatchLocation::ResponseBody, &resp.body);
            push_headers(&mut out, &resp.headers);
        }
        out
    }
}

fn push_body<'a>(out: &mut Vec<FieldView<'a>>, location: MatchLocation, body: &'a BodyContent) {
    match body {
        BodyContent::Empty => {}
        BodyContent::Text { text, .. } => out.push(FieldView {
            location,
            name: None,
            content: FieldText::Text(text),
        }),
        BodyContent::Binary { reason, .. } => out.push(FieldView {
            location,
            name: None,
            content: FieldText::Unscannable(reason),
        }),
    }
}

fn push_headers<'a>(out: &mut Vec<FieldView<'a>>, headers: &'a [(String, String)]) {
    for (name, value) in headers {
        out.push(FieldView {
            location: MatchLocation::HeaderName,
            name: Some(name),
            content: FieldText::Text(name),
        });
        out.push(FieldView {
            location: MatchLocation::HeaderValue,
            name: Some(name),
            content: FieldText::Text(value),
        });
    }
}

impl Scannable for MalformedRecord {
    fn source_id(&self) -> String {
        format!("record {}", self.index)
    }

    fn fields(&self) -> Vec<FieldView<'_>> {
        vec![FieldView {
            location: MatchLocation::Record,
            name: None,
            content: FieldText::Unscannable(&self.reason),
        }]
    }
}

impl Scannable for RemoteRecord {
    fn source_id(&self) -> String {
        self.record_id.clone()
    }

    fn fields(&self) -> Vec<FieldView<'_>> {
        self.fields
            .iter()
            .map(|(name, value)| FieldView {
                location: MatchLocation::RecordField,
                name: Some(name),
                content: FieldText::Text(value),
            })
            .collect()
    }
}

/// Scan an ordered set of sources for `target`.
///
/// Each field contributes at most one match, at its first occurrence. Fields
/// that cannot be scanned land in `skipped` so a must-not-find verdict can
/// never pass on the strength of undecodable content going unexamined.
pub fn scan<'a, I>(
    sources: I,
    target: &str,
    expectation: ScanExpectation,
    config: &ScanConfig,
) -> Result<ScanResult, ScanError>
where
    I: IntoIterator<Item = &'a dyn Scannable>,
{
    if target.is_empty() {
        return Err(ScanError::EmptyTarget);
    }

    let mut matches = Vec::new();
    let mut skipped = Vec::new();
    let mut sources_scanned = 0usize;

    for source in sources {
        sources_scanned += 1;
        let source_id = source.source_id();
        for field in source.fields() {
            match field.content {
                FieldText::Text(text) => {
                    if let Some(at) = text.find(target) {
                        matches.push(Match {
                            source_id: source_id.clone(),
                            location: field.location,
                            field: field.name.map(|n| n.to_string()),
                            excerpt: excerpt_around(
                                text,
                                at,
                                target.len(),
                                config.excerpt_context,
                            ),
                        });
                    }
                }
                FieldText::Unscannable(reason) => skipped.push(SkippedField {
                    source_id: source_id.clone(),
                    location: field.location,
                    field: field.name.map(|n| n.to_string()),
                    reason: reason.to_string(),
                }),
            }
        }
    }

    Ok(ScanResult::new(expectation, matches, skipped, sources_scanned))
}

/// Scan a whole session: exchanges (optionally host-filtered) plus any
/// malformed records, which are always carried so they surface as skipped.
pub fn scan_session(
    session: &CaptureSession,
    host_filter: Option<&str>,
    target: &str,
    expectation: ScanExpectation,
    config: &ScanConfig,
) -> Result<ScanResult, ScanError> {
    let sources: Vec<&dyn Scannable> = session
        .exchanges_for_host(host_filter)
        .into_iter()
        .map(|e| e as &dyn Scannable)
        .chain(session.malformed.iter().map(|m| m as &dyn Scannable))
        .collect();
    scan(sources, target, expectation, config)
}

pub fn scan_records(
    records: &[RemoteRecord],
    target: &str,
    expectation: ScanExpectation,
    config: &ScanConfig,
) -> Result<ScanResult, ScanError> {
    scan(
        records.iter().map(|r| r as &dyn Scannable),
        target,
        expectation,
        config,
    )
}

/// Window of up to `context` characters on each side of the hit, cut on
/// character boundaries, with ellipses marking truncation.
fn excerpt_around(text: &str, at: usize, match_len: usize, context: usize) -> String {
    let match_end = at + match_len;
    let begin = if context == 0 {
        at
    } else {
        text[..at]
            .char_indices()
            .rev()
            .nth(context - 1)
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    let end = text[match_end..]
        .char_indices()
        .nth(context)
        .map(|(i, _)| match_end + i)
        .unwrap_or(text.len());

    let mut out = String::new();
    if begin > 0 {
        out.push('…');
    }
    out.push_str(&text[begin..end]);
    if end < text.len() {
        out.push('…');
    }
    out
}
