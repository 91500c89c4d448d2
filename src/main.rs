use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use leakprobe::capture::CaptureSession;
use leakprobe::cli::{Cli, Command};
use leakprobe::models::{Exchange, ScanExpectation, ScanResult, Verdict};
use leakprobe::reporting::{ReportDocument, SourceInfo};
use leakprobe::scanner::{self, ScanConfig};
use leakprobe::verifier::{self, HttpTelemetryBackend, PollConfig, TelemetryQuery};

// Exit codes: 0 = PASS, 1 = verdict FAIL, 2 = the test could not run.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    match run(cli).await {
        Ok(Verdict::Pass) => ExitCode::SUCCESS,
        Ok(Verdict::Fail) => ExitCode::from(1),
        Err(e) => {
            eprintln!("{} {e:#}", "[ERROR]".red().bold());
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<Verdict> {
    let verbose = cli.verbose;
    match cli.command {
        Command::Scan {
            capture,
            target,
            expect,
            host,
            context,
            json_out,
        } => run_scan(
            capture,
            &target,
            expect.expectation(),
            host.as_deref(),
            context,
            json_out,
            verbose,
        ),
        Command::Verify {
            target,
            expect,
            endpoint,
            token_env,
            minutes,
            limit,
            service,
            timeout,
            poll_interval,
        } => {
            run_verify(
                &target,
                expect.expectation(),
                &endpoint,
                &token_env,
                TelemetryQuery {
                    lookback_minutes: minutes,
                    limit,
                    service,
                },
                timeout,
                poll_interval,
                verbose,
            )
            .await
        }
        Command::Report {
            target,
            before,
            after,
            host,
            output,
        } => run_report(&target, &before, after.as_deref(), host.as_deref(), &output),
    }
}

fn run_scan(
    capture: PathBuf,
    target: &str,
    expectation: ScanExpectation,
    host: Option<&str>,
    context: usize,
    json_out: Option<PathBuf>,
    verbose: bool,
) -> Result<Verdict> {
    println!("Analyzing: {}", capture.display());
    println!("Searching for: '{target}'");

    let session = CaptureSession::from_file(&capture)?;
    let scoped = session.exchanges_for_host(host);
    println!("Total exchanges: {}", session.exchanges.len());
    if let Some(h) = host {
        println!("Matching host '{h}': {}", scoped.len());
    }
    if !session.malformed.is_empty() {
        println!(
            "{} {} record(s) could not be parsed and will count as not scanned",
            "[WARN]".yellow(),
            session.malformed.len()
        );
    }

    let config = ScanConfig {
        excerpt_context: context,
    };
    let result = scanner::scan_session(&session, host, target, expectation, &config)?;

    print_matches(&result, verbose);

    if let Some(path) = json_out {
        let json = serde_json::to_string_pretty(&result).context("failed to serialize result")?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Saved scan result to {}", path.display());
    }

    Ok(announce(&result))
}

#[allow(clippy::too_many_arguments)]
async fn run_verify(
    target: &str,
    expectation: ScanExpectation,
    endpoint: &str,
    token_env: &str,
    query: TelemetryQuery,
    timeout_secs: u64,
    poll_interval_secs: u64,
    verbose: bool,
) -> Result<Verdict> {
    let token = std::env::var(token_env)
        .with_context(|| format!("{token_env} not set; a read token for the query API is required"))?;

    println!(
        "{} Querying telemetry store for: '{target}'",
        "[INFO]".yellow()
    );
    println!("{} Scope: {}", "[INFO]".yellow(), query.describe());

    let poll = PollConfig {
        timeout: Duration::from_secs(timeout_secs),
        initial_interval: Duration::from_secs(poll_interval_secs),
        max_interval: Duration::from_secs(poll_interval_secs.max(30)),
        request_timeout: Duration::from_secs(10.min(timeout_secs.max(1))),
    };
    let backend = HttpTelemetryBackend::new(endpoint, &token, poll.request_timeout)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}").unwrap());
    spinner.set_message("Polling telemetry store...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let outcome = verifier::verify(
        &backend,
        &query,
        target,
        expectation,
        &poll,
        &ScanConfig::default(),
    )
    .await;
    spinner.finish_and_clear();

    let result = outcome?;
    info!(
        "scanned {} stored record(s), {} match(es)",
        result.sources_scanned,
        result.matches.len()
    );
    print_matches(&result, verbose);
    Ok(announce(&result))
}

fn run_report(
    target: &str,
    before: &std::path::Path,
    after: Option<&std::path::Path>,
    host: Option<&str>,
    output: &std::path::Path,
) -> Result<Verdict> {
    let config = ScanConfig::default();
    let mut doc = ReportDocument::new(target).with_timestamp(Utc::now());

    let before_session = CaptureSession::from_file(before)?;
    let scoped = before_session.exchanges_for_host(host);
    let bytes = wire_bytes(&scoped);
    let result = scanner::scan_session(
        &before_session,
        host,
        target,
        ScanExpectation::MustFind,
        &config,
    )?;
    print_entry_line("before (no scrubbing)", &result);
    doc.push(
        "before (no scrubbing)",
        result,
        SourceInfo::capture(&before_session.origin, bytes),
    );

    if let Some(after) = after {
        let after_session = CaptureSession::from_file(after)?;
        let scoped = after_session.exchanges_for_host(host);
        let bytes = wire_bytes(&scoped);
        let result = scanner::scan_session(
            &after_session,
            host,
            target,
            ScanExpectation::MustNotFind,
            &config,
        )?;
        print_entry_line("after (scrubbing enabled)", &result);
        doc.push(
            "after (scrubbing enabled)",
            result,
            SourceInfo::capture(&after_session.origin, bytes),
        );
    }

    doc.write_to_file(output)?;
    println!("Report written to {}", output.display());
    Ok(doc.overall_verdict())
}

fn wire_bytes(exchanges: &[&Exchange]) -> usize {
    exchanges
        .iter()
        .map(|e| {
            e.request_wire_size()
                + e.response
                    .as_ref()
                    .map(|r| r.body.wire_size())
                    .unwrap_or(0)
        })
        .sum()
}

fn print_entry_line(label: &str, result: &ScanResult) {
    let verdict = result.verdict();
    let colored_verdict = match verdict {
        Verdict::Pass => verdict.to_string().green().bold(),
        Verdict::Fail => verdict.to_string().red().bold(),
    };
    println!(
        "{colored_verdict} {label}: {} match(es) across {} source(s)",
        result.matches.len(),
        result.sources_scanned
    );
}

fn print_matches(result: &ScanResult, verbose: bool) {
    println!("String found: {}", result.found);
    if !result.skipped.is_empty() {
        println!(
            "{} {} field(s) could not be scanned",
            "[WARN]".yellow(),
            result.skipped.len()
        );
    }
    if !verbose || result.matches.is_empty() {
        return;
    }

    println!("\n{}", "Matches".bold().underline());
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Source", "Location", "Field", "Excerpt"]);
    for m in &result.matches {
        table.add_row(vec![
            m.source_id.clone(),
            m.location.to_string(),
            m.field.clone().unwrap_or_else(|| "-".into()),
            m.excerpt.chars().take(80).collect::<String>(),
        ]);
    }
    println!("{table}");
}

fn announce(result: &ScanResult) -> Verdict {
    let verdict = result.verdict();
    match (verdict, result.expectation) {
        (Verdict::Pass, ScanExpectation::MustFind) => {
            println!("\n{} String was found as expected", "[PASS]".green().bold());
        }
        (Verdict::Pass, ScanExpectation::MustNotFind) => {
            println!(
                "\n{} String was NOT found as expected",
                "[PASS]".green().bold()
            );
        }
        (Verdict::Fail, ScanExpectation::MustFind) => {
            println!(
                "\n{} String was NOT found (expected to find it)",
                "[FAIL]".red().bold()
            );
        }
        (Verdict::Fail, ScanExpectation::MustNotFind) => {
            println!(
                "\n{} String WAS found (expected NOT to find it)",
                "[FAIL]".red().bold()
            );
        }
    }
    verdict
}
