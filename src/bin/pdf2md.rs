//! `pdf2md`: convert a PDF to Markdown, then caption every image.
//!
//! A thin shim over [`docprep::pdf_to_markdown`] and
//! [`docprep::ImageDescriber`].

use anyhow::{Context, Result};
use clap::Parser;
use docprep::cli::{block_on, bold, cyan, dim, green, init_logging, load_env, red, CliProgressCallback};
use docprep::progress::{self, SharedProgress};
use docprep::{pdf_to_markdown, CaptionModel, ConvertEngine, ConvertOptions, DescribeConfig, ImageDescriber};
use std::path::PathBuf;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Text extraction + GPT captions
  pdf2md -p book.pdf

  # Gemini captions, custom prompt
  pdf2md -p book.pdf -m gemini --prompt caption.txt

  # Let the vision model transcribe every page
  pdf2md -p scanned.pdf --engine vision

  # Only convert, no captions (no API key needed)
  pdf2md -p book.pdf --no-describe

OUTPUT (next to the PDF):
  book.md                  Markdown
  book.md.backup           Markdown before captions were added
  images/                  embedded images
  image-cache_book.json    caption cache; re-runs skip cached images

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY           OpenAI API key (-m gpt)
  GOOGLE_API_KEY           Google API key (-m gemini), GEMINI_API_KEY also accepted
  OPENAI_MODEL             Override the GPT model (default gpt-4.1-mini)
  GOOGLE_MODEL             Override the Gemini model (default gemini-3-pro-preview)
  PDFIUM_LIB_PATH          Path to libpdfium (file or directory)
"#;

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModelArg {
    Gpt,
    Gemini,
}

impl From<ModelArg> for CaptionModel {
    fn from(v: ModelArg) -> Self {
        match v {
            ModelArg::Gpt => CaptionModel::Gpt,
            ModelArg::Gemini => CaptionModel::Gemini,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EngineArg {
    Text,
    Vision,
}

impl From<EngineArg> for ConvertEngine {
    fn from(v: EngineArg) -> Self {
        match v {
            EngineArg::Text => ConvertEngine::Text,
            EngineArg::Vision => ConvertEngine::Vision,
        }
    }
}

/// Convert a PDF to Markdown and caption its images.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md",
    version,
    about = "Convert a PDF to Markdown and caption every image with a vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file to convert.
    #[arg(short, long)]
    pdf: PathBuf,

    /// Caption model family.
    #[arg(short, long, value_enum, default_value = "gpt", env = "PDF2MD_MODEL")]
    model: ModelArg,

    /// Page conversion engine.
    #[arg(long, value_enum, default_value = "text", env = "PDF2MD_ENGINE")]
    engine: EngineArg,

    /// Caption prompt template ({context_before}, {context_after}, {image_path}, {alt_text}).
    #[arg(long, env = "PDF2MD_PROMPT")]
    prompt: Option<PathBuf>,

    /// Captions in flight at once.
    #[arg(short, long, default_value_t = 20, env = "PDF2MD_CONCURRENCY")]
    concurrency: usize,

    /// Characters of context sent on each side of an image.
    #[arg(long, default_value_t = 1111, env = "PDF2MD_CONTEXT_CHARS")]
    context_chars: usize,

    /// Concurrent page requests for the vision engine.
    #[arg(long, default_value_t = 10, env = "PDF2MD_PAGE_CONCURRENCY")]
    page_concurrency: usize,

    /// Only convert; skip captioning.
    #[arg(long)]
    no_describe: bool,

    /// Load environment variables from this file instead of ./.env.
    #[arg(short, long)]
    env_file: Option<PathBuf>,

    /// Disable the progress bar.
    #[arg(long, env = "PDF2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2MD_QUIET")]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let show_progress = !cli.quiet && !cli.no_progress;
    init_logging(cli.verbose, cli.quiet, show_progress);
    load_env(cli.env_file.as_deref(), &[PathBuf::from(".env")])?;
    block_on(run(cli, show_progress))
}

async fn run(cli: Cli, show_progress: bool) -> Result<()> {

    let mut builder = DescribeConfig::builder()
        .model(cli.model.into())
        .concurrency(cli.concurrency)
        .context_chars(cli.context_chars);
    if let Some(ref p) = cli.prompt {
        builder = builder.prompt_file(p);
    }

    let options = ConvertOptions {
        engine: cli.engine.into(),
        page_concurrency: cli.page_concurrency,
        ..ConvertOptions::default()
    };
    let page_progress: SharedProgress = if show_progress && matches!(options.engine, ConvertEngine::Vision) {
        CliProgressCallback::new("pages") as SharedProgress
    } else {
        progress::noop()
    };

    let config = builder.build()?;
    let output = pdf_to_markdown(&cli.pdf, &options, &config, page_progress)
        .await
        .context("Conversion failed")?;

    if !cli.quiet {
        eprintln!(
            "{}  {} pages, {} images  {}ms  →  {}",
            if output.failed_pages.is_empty() { green("✔") } else { cyan("⚠") },
            output.total_pages,
            output.image_count,
            output.duration_ms,
            bold(&output.layout.markdown.display().to_string()),
        );
        if !output.failed_pages.is_empty() {
            eprintln!("   {} pages failed: {:?}", red(&output.failed_pages.len().to_string()), output.failed_pages);
        }
    }

    if cli.no_describe {
        return Ok(());
    }

    let config = DescribeConfig {
        cache_path: Some(output.layout.cache.clone()),
        ..config
    };
    let mut describer = ImageDescriber::new(config);
    if show_progress {
        describer = describer.with_progress(CliProgressCallback::new("images"));
    }
    let report = describer
        .run(&output.layout.markdown)
        .await
        .context("Captioning failed")?;

    if !cli.quiet {
        eprintln!(
            "{}  {} images: {} cached, {} described, {} failed, {} skipped",
            if report.failed == 0 { green("✔") } else { cyan("⚠") },
            report.total,
            report.cached,
            report.described,
            report.failed,
            report.skipped,
        );
        for (path, reason) in report.problems.iter().take(10) {
            eprintln!("   {} {}", dim(path), reason);
        }
        if let Some(ref b) = report.backup_path {
            eprintln!("   backup: {}", dim(&b.display().to_string()));
        }
    }
    Ok(())
}
