//! `gen-slides`: generate slide images from a JSON outline.
//!
//! Exits with status 1 when any slide failed; the failure report is then
//! written to `FAILURES.json` and echoed on stdout between markers.

use anyhow::{Context, Result};
use clap::Parser;
use docprep::cli::{block_on, bold, cyan, green, init_logging, load_env, red, CliProgressCallback};
use docprep::env::image_api_keys;
use docprep::pipeline::input;
use docprep::slides::{self, GeminiImageApi, KeyRing, SlideDeck, SlideGenerator};
use docprep::SlideConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Generate slide images with the Gemini image API.
#[derive(Parser, Debug)]
#[command(
    name = "gen-slides",
    version,
    about = "Generate slide images from a JSON outline with the Gemini image API",
    arg_required_else_help = true
)]
struct Cli {
    /// Slide outline JSON.
    json: PathBuf,

    /// Output directory (default: <json dir>/<json stem>_images).
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Environment file (default: .env next to the JSON, then ./.env).
    #[arg(short, long)]
    env_file: Option<PathBuf>,

    /// Slides to generate, e.g. 5, 5,7,9 or 1-3,8.
    #[arg(short, long)]
    slides: Option<String>,

    /// HTTP timeout per request in seconds.
    #[arg(long, default_value_t = 300, env = "GEN_SLIDES_TIMEOUT")]
    timeout: u64,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let show_progress = !cli.quiet && !cli.no_progress;
    init_logging(cli.verbose, cli.quiet, show_progress);

    let json = input::resolve_file(&cli.json)?;
    let json_dir = json
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    load_env(
        cli.env_file.as_deref(),
        &[json_dir.join(".env"), PathBuf::from(".env")],
    )?;
    block_on(run(cli, json, show_progress))
}

async fn run(cli: Cli, json: PathBuf, show_progress: bool) -> Result<()> {

    let targets = match &cli.slides {
        Some(spec) => {
            let set = slides::parse_slide_numbers(spec);
            if set.is_empty() {
                anyhow::bail!("No valid slide numbers in '{spec}'");
            }
            Some(set)
        }
        None => None,
    };

    let deck = SlideDeck::load(&json).await?;
    let keys = KeyRing::new(image_api_keys()?)?;
    let mut builder = SlideConfig::builder();
    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_dir(dir);
    }
    let config = builder.build()?;
    let api = GeminiImageApi::new(Duration::from_secs(cli.timeout))?;

    let mut generator = SlideGenerator::new(Arc::new(api), keys, config);
    if show_progress {
        generator = generator.with_progress(CliProgressCallback::new("slides"));
    }
    let run = generator
        .run(&deck, &json, targets.as_ref())
        .await
        .context("Slide generation failed")?;

    if !cli.quiet {
        let total = run.total();
        eprintln!(
            "{} {}/{} slides in {:.1}s  →  {}",
            if run.failure_count == 0 { green("✔") } else { cyan("⚠") },
            bold(&run.success_count.to_string()),
            total,
            run.elapsed.as_secs_f64(),
            bold(&run.output_dir.display().to_string()),
        );
        if total > 0 {
            eprintln!("   {:.1}s per slide", run.elapsed.as_secs_f64() / total as f64);
        }
    }

    if run.failure_count == 0 {
        return Ok(());
    }

    let report = run.failure_report(&json);
    let path = report.save(&run.output_dir)?;
    if !cli.quiet {
        eprintln!("   {} failed slides: {:?}", red(&run.failure_count.to_string()), run.failed_pages);
        eprintln!("   report: {}", path.display());
    }
    println!("{}", report.framed()?);
    std::process::exit(1);
}
