use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::models::ScanExpectation;

#[derive(Parser, Debug)]
#[command(name = "leakprobe")]
#[command(version)]
#[command(about = "Validates that telemetry scrubbing keeps a sensitive string off the wire and out of the telemetry store.", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output (raises log level, prints sample matches).
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan a proxy capture file for the target string.
    Scan {
        /// Path to the capture file.
        capture: PathBuf,

        /// Exact string to search for (literal, case-sensitive).
        target: String,

        #[command(flatten)]
        expect: ExpectArgs,

        /// Only scan exchanges whose host contains this substring.
        #[arg(long)]
        host: Option<String>,

        /// Characters of context around each excerpt.
        #[arg(long, default_value_t = 150)]
        context: usize,

        /// Write the full scan result as JSON to this path.
        #[arg(long)]
        json_out: Option<PathBuf>,
    },

    /// Poll the telemetry store's read API and scan the stored records.
    Verify {
        /// Exact string to search for (literal, case-sensitive).
        target: String,

        #[command(flatten)]
        expect: ExpectArgs,

        /// Base URL of the telemetry query API.
        #[arg(long)]
        endpoint: String,

        /// Environment variable holding the read token.
        #[arg(long, default_value = "TELEMETRY_READ_TOKEN")]
        token_env: String,

        /// How many minutes to look back.
        #[arg(long, default_value_t = 10)]
        minutes: u32,

        /// Maximum records to retrieve.
        #[arg(long, default_value_t = 20)]
        limit: u32,

        /// Restrict to records emitted by this service.
        #[arg(long)]
        service: Option<String>,

        /// Overall poll budget in seconds.
        #[arg(long, default_value_t = 60)]
        timeout: u64,

        /// Initial seconds between polls (doubles per attempt, capped at 30).
        #[arg(long, default_value_t = 5)]
        poll_interval: u64,
    },

    /// Scan before/after captures and write a markdown comparison report.
    Report {
        /// Exact string to search for (literal, case-sensitive).
        target: String,

        /// Capture taken without scrubbing (expected to contain the target).
        #[arg(long)]
        before: PathBuf,

        /// Capture taken with scrubbing (expected not to contain it).
        #[arg(long)]
        after: Option<PathBuf>,

        /// Only scan exchanges whose host contains this substring.
        #[arg(long)]
        host: Option<String>,

        /// Where to write the report.
        #[arg(long, default_value = "report.md")]
        output: PathBuf,
    },
}

/// Exactly one expectation must be stated; a scan without one proves nothing.
#[derive(ClapArgs, Debug)]
#[group(required = true, multiple = false)]
pub struct ExpectArgs {
    /// Expect the target string to be present (baseline run).
    #[arg(long)]
    pub expect_found: bool,

    /// Expect the target string to be absent (scrubbed run).
    #[arg(long)]
    pub expect_not_found: bool,
}

impl ExpectArgs {
    pub fn expectation(&self) -> ScanExpectation {
        if self.expect_found {
            ScanExpectation::MustFind
        } else {
            ScanExpectation::MustNotFind
        }
    }
}
