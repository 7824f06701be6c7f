//! `split-pdf`: write one PDF per table-of-contents item.

use anyhow::{Context, Result};
use clap::Parser;
use docprep::cli::{bold, cyan, dim, green, init_logging};
use docprep::split_pdf_by_toc;
use std::path::PathBuf;

/// Split a PDF by its outline.
#[derive(Parser, Debug)]
#[command(
    name = "split-pdf",
    version,
    about = "Split a PDF into one file per table-of-contents item",
    arg_required_else_help = true
)]
struct Cli {
    /// PDF file to split.
    pdf: PathBuf,

    /// Deepest outline level to split at (1 = chapters only).
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    level: u32,

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

    let report = split_pdf_by_toc(&cli.pdf, cli.level)
        .await
        .with_context(|| format!("Failed to split {}", cli.pdf.display()))?;

    if !cli.quiet {
        for f in &report.files {
            eprintln!(
                "  {} {}  {}",
                green("✓"),
                f.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
                dim(&format!("pages {}-{} ({})", f.start_page, f.end_page, f.page_count))
            );
        }
        for title in report.out_of_order.iter().chain(&report.empty) {
            eprintln!("  {} skipped: {}", cyan("⚠"), title);
        }
        eprintln!(
            "{} {} files from {} ({} pages)  →  {}",
            green("✔"),
            bold(&report.files.len().to_string()),
            report.pdf_name,
            report.total_pages,
            bold(&report.output_dir.display().to_string())
        );
    }
    Ok(())
}
