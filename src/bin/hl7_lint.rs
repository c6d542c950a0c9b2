//! Parse and validate ER7 messages.
//!
//! Usage:
//!   hl7_lint [OPTIONS] [FILE.hl7 ...]
//!   hl7_lint < message.hl7
//!
//! Each input holds one message; `\n` and `\r\n` line ends are accepted as segment
//! separators. MLLP-framed input is unwrapped first.
//!
//! Options:
//!   --human, -H   Human-readable output
//!   --strict      Build the tree with strict validation (unknown names fail the parse)
//!
//! Exit status is 1 when any input fails to parse or has validation errors.
//! Set RUST_LOG (e.g. `RUST_LOG=hl7er7=debug`) for parser diagnostics.

use anyhow::Context;
use hl7er7::mllp::{MllpDecoder, START_BLOCK};
use hl7er7::{parse_message, Config, ValidationIssue, ValidationLevel};
use std::io::{self, Read};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy)]
enum OutputStyle {
    Compact,
    Human,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Severity {
    Error,
    Warning,
}

fn print_issue(path: &str, severity: Severity, issue: &ValidationIssue, style: OutputStyle) {
    let severity_str = match severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };
    match style {
        OutputStyle::Compact => {
            println!("{}: {}: {}", path, severity_str, issue);
        }
        OutputStyle::Human => {
            println!("  {} {}", path, issue.path);
            println!("    {}: {}", severity_str, issue.message);
        }
    }
}

/// Segment-separated ER7 text of one input.
fn normalize(raw: &[u8]) -> anyhow::Result<String> {
    if raw.contains(&START_BLOCK) {
        let mut decoder = MllpDecoder::new();
        decoder.push(raw);
        if let Some(message) = decoder.next_message() {
            return Ok(message?);
        }
    }
    let text = std::str::from_utf8(raw).context("input is not UTF-8")?;
    Ok(text.replace("\r\n", "\r").replace('\n', "\r").trim_end_matches('\r').to_string())
}

#[derive(Default)]
struct Totals {
    errors: usize,
    warnings: usize,
}

/// Returns true when the input has errors.
fn lint(path: &str, raw: &[u8], config: &Config, style: OutputStyle, totals: &mut Totals) -> bool {
    let text = match normalize(raw) {
        Ok(t) => t,
        Err(e) => {
            println!("{}: error: {:#}", path, e);
            totals.errors += 1;
            return true;
        }
    };
    let message = match parse_message(&text, config) {
        Ok(m) => m,
        Err(e) => {
            println!("{}: error: {}", path, e);
            totals.errors += 1;
            return true;
        }
    };
    let report = message.validation_report();
    for issue in &report.errors {
        print_issue(path, Severity::Error, issue, style);
    }
    for issue in &report.warnings {
        print_issue(path, Severity::Warning, issue, style);
    }
    totals.errors += report.errors.len();
    totals.warnings += report.warnings.len();
    !report.is_valid()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let style = if let Some(pos) = args.iter().position(|a| a == "--human" || a == "-H") {
        args.remove(pos);
        OutputStyle::Human
    } else {
        OutputStyle::Compact
    };
    let strict = if let Some(pos) = args.iter().position(|a| a == "--strict") {
        args.remove(pos);
        true
    } else {
        false
    };

    let mut config = Config::new()?;
    if strict {
        config = config.validation_level(ValidationLevel::Strict);
    }

    let mut has_error = false;
    let mut totals = Totals::default();

    if args.is_empty() {
        let mut raw = Vec::new();
        io::stdin().read_to_end(&mut raw)?;
        has_error |= lint("<stdin>", &raw, &config, style, &mut totals);
    } else {
        for path in &args {
            let raw = match std::fs::read(path) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("{}: {}", path, e);
                    has_error = true;
                    continue;
                }
            };
            has_error |= lint(path, &raw, &config, style, &mut totals);
        }
    }

    if totals.errors > 0 || totals.warnings > 0 {
        eprintln!(
            "hl7_lint: {} error(s), {} warning(s)",
            totals.errors, totals.warnings
        );
    }
    if has_error {
        std::process::exit(1);
    }
    Ok(())
}
