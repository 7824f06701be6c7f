//! `check-toc`: report a PDF's outline structure as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use docprep::check_toc::{check_toc, save_report};
use docprep::cli::{bold, green, init_logging};
use std::path::PathBuf;

/// Analyse a PDF table of contents.
#[derive(Parser, Debug)]
#[command(
    name = "check-toc",
    version,
    about = "Analyse a PDF outline and report page spans, character counts and per-level statistics",
    arg_required_else_help = true
)]
struct Cli {
    /// PDF file to analyse.
    pdf: PathBuf,

    /// Print the JSON report to stdout instead of writing <stem>/toc.json.
    #[arg(long)]
    stdout: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet, false);

    let report = check_toc(&cli.pdf)
        .await
        .with_context(|| format!("Failed to analyse {}", cli.pdf.display()))?;

    if cli.stdout {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
        return Ok(());
    }

    let path = save_report(&report, &cli.pdf)?;
    if !cli.quiet {
        match (&report.error, &report.summary) {
            (Some(e), _) => eprintln!("{}  {}", report.pdf_name, e),
            (None, Some(s)) => eprintln!(
                "{} {}  {} pages, {} levels, {} entries",
                green("✔"),
                bold(&report.pdf_name),
                report.total_pages,
                s.max_level,
                report.toc.as_ref().map_or(0, Vec::len)
            ),
            (None, None) => {}
        }
        eprintln!("   → {}", path.display());
    }
    Ok(())
}
