// src/reporting/markdown.rs
//! Markdown comparison report: Summary, Evidence, Excerpts — in that order,
//! always.
//!
//! Rendering is deterministic: the same results produce byte-identical
//! output, so two runs can be diffed. The generation timestamp is the only
//! volatile value and lives on a single delimited header line, supplied by
//! the caller (omit it for fully reproducible artifacts).

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::presets::ASCII_MARKDOWN;
use comfy_table::Table;

use crate::models::{ScanExpectation, ScanResult, Verdict};

/// Where a result came from, for the report's Summary table.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub origin: String,
    /// Wire bytes examined, where the source can tell us.
    pub wire_bytes: Option<usize>,
}

impl SourceInfo {
    pub fn capture(origin: &str, wire_bytes: usize) -> Self {
        SourceInfo {
            origin: origin.to_string(),
            wire_bytes: Some(wire_bytes),
        }
    }

    pub fn query(description: &str) -> Self {
        SourceInfo {
            origin: description.to_string(),
            wire_bytes: None,
        }
    }
}

pub struct ReportEntry {
    pub label: String,
    pub result: ScanResult,
    pub source: SourceInfo,
}

/// Write-once report artifact.
pub struct ReportDocument {
    target: String,
    generated_at: Option<DateTime<Utc>>,
    entries: Vec<ReportEntry>,
}

impl ReportDocument {
    pub fn new(target: &str) -> Self {
        ReportDocument {
            target: target.to_string(),
            generated_at: None,
            entries: Vec::new(),
        }
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = Some(at);
        self
    }

    pub fn push(&mut self, label: &str, result: ScanResult, source: SourceInfo) {
        self.entries.push(ReportEntry {
            label: label.to_string(),
            result,
            source,
        });
    }

    /// PASS only when every entry passes.
    pub fn overall_verdict(&self) -> Verdict {
        if self
            .entries
            .iter()
            .all(|e| e.result.verdict() == Verdict::Pass)
        {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# Scrubbing Validation Report\n\n");
        if let Some(at) = self.generated_at {
            out.push_str(&format!(
                "> Generated: {}\n\n",
                at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        out.push_str(&format!("**Target string:** `{}`\n\n", self.target));

        self.render_summary(&mut out);
        self.render_evidence(&mut out);
        self.render_excerpts(&mut out);
        out
    }

    fn render_summary(&self, out: &mut String) {
        out.push_str("## Summary\n\n");
        let mut table = Table::new();
        table.load_preset(ASCII_MARKDOWN);
        table.set_header(vec![
            "Run",
            "Source",
            "Expectation",
            "Sources",
            "Matches",
            "Not scanned",
            "Bytes",
            "Verdict",
        ]);
        for entry in &self.entries {
            let r = &entry.result;
            table.add_row(vec![
                entry.label.clone(),
                entry.source.origin.clone(),
                r.expectation.to_string(),
                r.sources_scanned.to_string(),
                r.matches.len().to_string(),
                r.skipped.len().to_string(),
                entry
                    .source
                    .wire_bytes
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "-".into()),
                r.verdict().to_string(),
            ]);
        }
        out.push_str(&table.to_string());
        out.push_str("\n\n");

        let overall = self.overall_verdict();
        match overall {
            Verdict::Pass => out.push_str(":white_check_mark: **Overall: PASS**\n\n"),
            Verdict::Fail => out.push_str(":x: **Overall: FAIL**\n\n"),
        }
    }

    fn render_evidence(&self, out: &mut String) {
        out.push_str("## Evidence\n\n");
        for entry in &self.entries {
            out.push_str(&format!("### {}\n\n", entry.label));
            let r = &entry.result;
            if r.matches.is_empty() {
                out.push_str("No occurrences of the target string.\n\n");
            } else {
                let mut table = Table::new();
                table.load_preset(ASCII_MARKDOWN);
                table.set_header(vec!["Source", "Location", "Field"]);
                for m in &r.matches {
                    table.add_row(vec![
                        m.source_id.clone(),
                        m.location.to_string(),
                        m.field.clone().unwrap_or_else(|| "-".into()),
                    ]);
                }
                out.push_str(&table.to_string());
                out.push_str("\n\n");
            }
            if !r.skipped.is_empty() {
                out.push_str(&format!(
                    ":warning: Not scanned ({} field(s)):\n\n",
                    r.skipped.len()
                ));
                for s in &r.skipped {
                    out.push_str(&format!(
                        "- {} / {}: {}\n",
                        s.source_id, s.location, s.reason
                    ));
                }
                out.push('\n');
            }
        }
    }

    fn render_excerpts(&self, out: &mut String) {
        out.push_str("## Excerpts\n\n");
        for entry in &self.entries {
            out.push_str(&format!("### {}\n\n", entry.label));
            let r = &entry.result;

            if r.expectation == ScanExpectation::MustNotFind && r.found {
                out.push_str(
                    ":x: **UNEXPECTED:** the target string reached this sink; the excerpts below are the proof of failure.\n\n",
                );
            }

            for m in &r.matches {
                let field = m
                    .field
                    .as_deref()
                    .map(|f| format!(", field `{f}`"))
                    .unwrap_or_default();
                out.push_str(&format!("**{}** ({}{field}):\n\n", m.source_id, m.location));
                out.push_str("```\n");
                out.push_str(&m.excerpt);
                out.push_str("\n```\n\n");
            }

            // Everything that held no match is elided rather than reproduced:
            // the report only ever shows content that proves something.
            let clean = r.sources_scanned
                - r.matches
                    .iter()
                    .map(|m| &m.source_id)
                    .collect::<std::collections::BTreeSet<_>>()
                    .len();
            if r.matches.is_empty() {
                out.push_str(&format!(
                    ":white_check_mark: No excerpts; {} source(s) held no occurrence and are elided.\n\n",
                    r.sources_scanned
                ));
            } else if clean > 0 {
                out.push_str(&format!(
                    "_{clean} source(s) held no occurrence and are elided._\n\n"
                ));
            }
        }
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let rendered = self.render();
        let mut file = File::create(path.as_ref())
            .with_context(|| format!("failed to create report {}", path.as_ref().display()))?;
        file.write_all(rendered.as_bytes())
            .context("failed to write report")?;
        Ok(())
    }
}
