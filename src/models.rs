use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One HTTP request/response pair reconstructed from a capture.
///
/// The response is optional: a capture may end with an unanswered request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    /// Position of this exchange within the capture (record order == wire order).
    pub index: usize,
    pub method: String,
    pub url: String,
    pub request_headers: Vec<(String, String)>,
    pub request_body: BodyContent,
    pub response: Option<ResponsePart>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePart {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: BodyContent,
}

impl Exchange {
    /// Case-insensitive request header lookup (first value wins).
    pub fn request_header(&self, name: &str) -> Option<&str> {
        header_lookup(&self.request_headers, name)
    }

    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }

    /// Wire size of the request body in bytes, before any decoding.
    pub fn request_wire_size(&self) -> usize {
        self.request_body.wire_size()
    }
}

pub(crate) fn header_lookup<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// A message body after the decode pipeline has run.
///
/// Decoding never fails the exchange: anything that cannot be turned into
/// text is kept as raw bytes with the reason it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BodyContent {
    Empty,
    Text { text: String, wire_size: usize },
    Binary { bytes: Vec<u8>, reason: String },
}

impl BodyContent {
    pub fn text(&self) -> Option<&str> {
        match self {
            BodyContent::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn wire_size(&self) -> usize {
        match self {
            BodyContent::Empty => 0,
            BodyContent::Text { wire_size, .. } => *wire_size,
            BodyContent::Binary { bytes, .. } => bytes.len(),
        }
    }
}

/// A capture record whose outer frame was intact but whose contents could not
/// be reconstructed into an `Exchange`. Kept so a scan can report it as
/// "not scanned" instead of pretending it never existed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedRecord {
    pub index: usize,
    pub reason: String,
}

/// An ordered view of one proxy session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSession {
    pub origin: String,
    pub exchanges: Vec<Exchange>,
    pub malformed: Vec<MalformedRecord>,
    /// Records in the container that were valid but not HTTP (TCP/DNS flows).
    pub non_http_records: usize,
}

impl CaptureSession {
    /// Exchanges whose host contains `filter` (case-insensitive), or all of
    /// them when no filter is given.
    pub fn exchanges_for_host(&self, filter: Option<&str>) -> Vec<&Exchange> {
        match filter {
            None => self.exchanges.iter().collect(),
            Some(f) => {
                let needle = f.to_ascii_lowercase();
                self.exchanges
                    .iter()
                    .filter(|e| {
                        e.host()
                            .map(|h| h.to_ascii_lowercase().contains(&needle))
                            .unwrap_or(false)
                    })
                    .collect()
            }
        }
    }
}

/// What the caller asserts about the target string before scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanExpectation {
    MustFind,
    MustNotFind,
}

impl std::fmt::Display for ScanExpectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanExpectation::MustFind => write!(f, "must-find"),
            ScanExpectation::MustNotFind => write!(f, "must-not-find"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

/// Where inside a source a hit (or a skip) was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchLocation {
    RequestBody,
    ResponseBody,
    HeaderName,
    HeaderValue,
    RecordField,
    /// A whole record that never decomposed into fields (malformed capture
    /// entries); only ever appears on skips, never on matches.
    Record,
}

impl std::fmt::Display for MatchLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchLocation::RequestBody => "request-body",
            MatchLocation::ResponseBody => "response-body",
            MatchLocation::HeaderName => "header-name",
            MatchLocation::HeaderValue => "header-value",
            MatchLocation::RecordField => "record-field",
            MatchLocation::Record => "record",
        };
        write!(f, "{s}")
    }
}

/// One confirmed occurrence of the target string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub source_id: String,
    pub location: MatchLocation,
    /// Header or record field name, where the location has one.
    pub field: Option<String>,
    /// Bounded window of text centered on the hit.
    pub excerpt: String,
}

/// A field that existed but could not be text-scanned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedField {
    pub source_id: String,
    pub location: MatchLocation,
    pub field: Option<String>,
    pub reason: String,
}

/// Outcome of scanning a set of sources for one target string.
///
/// Built only through [`ScanResult::new`], which pins the invariant
/// `found == !matches.is_empty()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub expectation: ScanExpectation,
    pub found: bool,
    pub matches: Vec<Match>,
    pub skipped: Vec<SkippedField>,
    pub sources_scanned: usize,
}

impl ScanResult {
    pub fn new(
        expectation: ScanExpectation,
        matches: Vec<Match>,
        skipped: Vec<SkippedField>,
        sources_scanned: usize,
    ) -> Self {
        ScanResult {
            expectation,
            found: !matches.is_empty(),
            matches,
            skipped,
            sources_scanned,
        }
    }

    pub fn verdict(&self) -> Verdict {
        match (self.expectation, self.found) {
            (ScanExpectation::MustFind, true) => Verdict::Pass,
            (ScanExpectation::MustNotFind, false) => Verdict::Pass,
            _ => Verdict::Fail,
        }
    }
}

/// One record returned by the telemetry store's query API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub record_id: String,
    /// Field order follows the query result's column order.
    pub fields: Vec<(String, String)>,
}
