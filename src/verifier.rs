// src/verifier.rs
//! Remote verifier: polls the telemetry store's read API until records for
//! the run under test appear, then hands their fields to the content scanner.
//!
//! Transient failures (network, non-2xx, malformed payloads) are logged and
//! retried; only exhausting the poll budget is fatal, and that failure is
//! "could not determine", never a verdict.

use std::time::Duration;

use log::{debug, info, warn};
use rquest::header;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use crate::models::{RemoteRecord, ScanExpectation, ScanResult};
use crate::scanner::{self, ScanConfig, ScanError};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("invalid query endpoint: {0}")]
    Endpoint(String),

    #[error("query request failed: {0}")]
    Http(#[from] rquest::Error),

    #[error("query endpoint returned HTTP {0}")]
    Status(u16),

    #[error("malformed query response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum VerifierError {
    /// The store never produced records for the run inside the budget. This
    /// is not a FAIL: nothing was determined either way.
    #[error("no telemetry records within {waited:?} after {attempts} attempts")]
    Timeout { waited: Duration, attempts: u32 },

    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Identifies the run under test. The target string is deliberately not part
/// of the query — the scanner is the single authority on matching, so a
/// scrubbing placeholder can't skew what the store returns.
#[derive(Debug, Clone)]
pub struct TelemetryQuery {
    pub lookback_minutes: u32,
    pub limit: u32,
    /// Optional attribute filter on the emitting service.
    pub service: Option<String>,
}

impl Default for TelemetryQuery {
    fn default() -> Self {
        TelemetryQuery {
            lookback_minutes: 10,
            limit: 20,
            service: None,
        }
    }
}

impl TelemetryQuery {
    /// Human-readable form for report metadata.
    pub fn describe(&self) -> String {
        let mut s = format!(
            "records from the last {} min (limit {})",
            self.lookback_minutes, self.limit
        );
        if let Some(service) = &self.service {
            s.push_str(&format!(", service {service}"));
        }
        s
    }

    fn sql(&self) -> String {
        let service_clause = match &self.service {
            Some(service) => format!(
                " AND service_name = '{}'",
                service.replace('\'', "''")
            ),
            None => String::new(),
        };
        format!(
            "SELECT span_id, start_timestamp, span_name, message, attributes \
             FROM records \
             WHERE start_timestamp > now() - interval '{} minutes'{service_clause} \
             ORDER BY start_timestamp DESC LIMIT {}",
            self.lookback_minutes, self.limit
        )
    }
}

/// Poll-loop tunables.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Hard budget for the whole loop.
    pub timeout: Duration,
    pub initial_interval: Duration,
    /// Backoff doubles per attempt, capped here.
    pub max_interval: Duration,
    /// Per-request timeout handed to the HTTP client; must stay below the
    /// poll budget so a hung request cannot swallow it.
    pub request_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            timeout: Duration::from_secs(60),
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// The read side of a telemetry store: one authenticated query, a batch of
/// records back.
#[allow(async_fn_in_trait)]
pub trait TelemetryBackend {
    async fn fetch(&self, query: &TelemetryQuery) -> Result<Vec<RemoteRecord>, BackendError>;
}

/// Production backend: HTTPS JSON query endpoint, bearer-token auth,
/// column-oriented result payload.
pub struct HttpTelemetryBackend {
    client: rquest::Client,
    endpoint: String,
    token: String,
}

impl HttpTelemetryBackend {
    pub fn new(endpoint: &str, token: &str, request_timeout: Duration) -> Result<Self, BackendError> {
        url::Url::parse(endpoint).map_err(|e| BackendError::Endpoint(format!("{endpoint}: {e}")))?;
        let client = rquest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(HttpTelemetryBackend {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

impl TelemetryBackend for HttpTelemetryBackend {
    async fn fetch(&self, query: &TelemetryQuery) -> Result<Vec<RemoteRecord>, BackendError> {
        let resp = self
            .client
            .get(format!("{}/v1/query", self.endpoint))
            .query(&[("sql", query.sql())])
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }
        let text = resp.text().await?;
        let payload: Value = serde_json::from_str(&text)
            .map_err(|e| BackendError::Malformed(e.to_string()))?;
        records_from_columns(&payload)
    }
}

/// Transpose a column-oriented payload (`columns: [{name, values}]`) into
/// one record per row. Null cells are dropped; everything else becomes text.
pub(crate) fn records_from_columns(payload: &Value) -> Result<Vec<RemoteRecord>, BackendError> {
    let columns = payload
        .get("columns")
        .and_then(|c| c.as_array())
        .ok_or_else(|| BackendError::Malformed("no columns array".into()))?;

    let mut names: Vec<&str> = Vec::with_capacity(columns.len());
    let mut value_cols: Vec<&Vec<Value>> = Vec::with_capacity(columns.len());
    for col in columns {
        let name = col
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| BackendError::Malformed("column without a name".into()))?;
        let values = col
            .get("values")
            .and_then(|v| v.as_array())
            .ok_or_else(|| BackendError::Malformed(format!("column {name:?} without values")))?;
        names.push(name);
        value_cols.push(values);
    }

    let rows = value_cols.iter().map(|v| v.len()).max().unwrap_or(0);
    let id_col = names.iter().position(|n| *n == "span_id" || *n == "id");

    let mut records = Vec::with_capacity(rows);
    for row in 0..rows {
        let mut fields = Vec::new();
        for (name, values) in names.iter().zip(&value_cols) {
            match values.get(row) {
                None | Some(Value::Null) => {}
                Some(Value::String(s)) => fields.push((name.to_string(), s.clone())),
                Some(other) => fields.push((name.to_string(), other.to_string())),
            }
        }
        let record_id = id_col
            .and_then(|c| value_cols[c].get(row))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("record {row}"));
        records.push(RemoteRecord { record_id, fields });
    }
    Ok(records)
}

/// Poll `backend` until records appear or the budget runs out, then scan the
/// returned records' fields for `target`.
pub async fn verify<B: TelemetryBackend>(
    backend: &B,
    query: &TelemetryQuery,
    target: &str,
    expectation: ScanExpectation,
    poll: &PollConfig,
    scan_config: &ScanConfig,
) -> Result<ScanResult, VerifierError> {
    // Reject a useless target before spending the poll budget on it.
    if target.is_empty() {
        return Err(ScanError::EmptyTarget.into());
    }

    let started = Instant::now();
    let mut interval = poll.initial_interval;
    let mut attempts = 0u32;

    loop {
        let elapsed = started.elapsed();
        if elapsed >= poll.timeout {
            return Err(VerifierError::Timeout {
                waited: elapsed,
                attempts,
            });
        }

        attempts += 1;
        match backend.fetch(query).await {
            Ok(records) if !records.is_empty() => {
                info!(
                    "telemetry query returned {} record(s) on attempt {attempts}",
                    records.len()
                );
                return Ok(scanner::scan_records(&records, target, expectation, scan_config)?);
            }
            Ok(_) => debug!("telemetry query empty on attempt {attempts}, still waiting"),
            Err(e) => warn!("telemetry query failed on attempt {attempts}: {e}"),
        }

        let remaining = poll
            .timeout
            .checked_sub(started.elapsed())
            .unwrap_or(Duration::ZERO);
        tokio::time::sleep(interval.min(remaining)).await;
        interval = (interval * 2).min(poll.max_interval);
    }
}
