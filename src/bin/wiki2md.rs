//! `wiki2md`: convert `![[image]]` wiki embeds to Markdown and caption
//! empty-alt images in place.

use anyhow::{Context, Result};
use clap::Parser;
use docprep::cli::{block_on, bold, cyan, dim, green, init_logging, load_env, CliProgressCallback};
use docprep::pipeline::input;
use docprep::wiki::{build_image_index, default_vault, process_note, DryRunReport, WikiRun, VAULT_ENV_VAR};
use docprep::{CaptionModel, DescribeConfig};
use std::path::PathBuf;

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

/// Convert wiki image links and caption images in a Markdown note.
#[derive(Parser, Debug)]
#[command(
    name = "wiki2md",
    version,
    about = "Rewrite ![[image.png]] wiki links to ![](path) and caption images without alt text",
    arg_required_else_help = true
)]
struct Cli {
    /// Markdown note to process.
    file: PathBuf,

    /// Show what would change without writing anything.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Caption model family.
    #[arg(short, long, value_enum, default_value = "gpt", env = "WIKI2MD_MODEL")]
    model: ModelArg,

    /// Only convert links; skip captioning.
    #[arg(long)]
    no_describe: bool,

    /// Vault root used to find images (default: $WIKI2MD_VAULT, else the note's directory).
    #[arg(long)]
    vault: Option<PathBuf>,

    /// Caption prompt template file.
    #[arg(long, env = "WIKI2MD_PROMPT")]
    prompt: Option<PathBuf>,

    /// Captions in flight at once.
    #[arg(short, long, default_value_t = 20, env = "WIKI2MD_CONCURRENCY")]
    concurrency: usize,

    /// Load environment variables from this file instead of ./.env.
    #[arg(short, long)]
    env_file: Option<PathBuf>,

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
    let show_progress = !cli.quiet && !cli.no_progress && !cli.dry_run;
    init_logging(cli.verbose, cli.quiet, show_progress);
    load_env(cli.env_file.as_deref(), &[PathBuf::from(".env")])?;
    block_on(run(cli, show_progress))
}

async fn run(cli: Cli, show_progress: bool) -> Result<()> {

    let file = input::resolve_file(&cli.file)?;
    let vault = default_vault(cli.vault.as_deref(), &file);
    if !vault.is_dir() {
        anyhow::bail!(
            "Vault directory not found: {} (set --vault or {})",
            vault.display(),
            VAULT_ENV_VAR
        );
    }

    if cli.dry_run {
        let content = input::read_text(&file).await?;
        let index = build_image_index(&vault);
        println!("{}", bold(&format!("Dry run: {}", file.display())));
        print!("{}", DryRunReport::scan(&content, &index, &vault, !cli.no_describe).render());
        return Ok(());
    }

    let mut builder = DescribeConfig::wiki_builder()
        .model(cli.model.into())
        .concurrency(cli.concurrency);
    if let Some(ref p) = cli.prompt {
        builder = builder.prompt_file(p);
    }
    let mut run = WikiRun::new(builder.build()?, &vault);
    run.describe = !cli.no_describe;
    if show_progress {
        run.progress = CliProgressCallback::new("images");
    }

    let report = process_note(&file, &run)
        .await
        .with_context(|| format!("Failed to process {}", file.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} {} wiki links converted",
            green("✔"),
            bold(&report.links.converted.to_string())
        );
        if !report.links.unresolved.is_empty() {
            eprintln!(
                "   {} not found in vault: {}",
                cyan("⚠"),
                report.links.unresolved.join(", ")
            );
        }
        if let Some(stats) = &report.captions {
            eprintln!(
                "{} captions: {} total, {} success, {} failed, {} skipped",
                if stats.failed == 0 { green("✔") } else { cyan("⚠") },
                stats.total,
                stats.success,
                stats.failed,
                stats.skipped
            );
            for (path, reason) in stats.problems.iter().take(10) {
                eprintln!("   {} {}", dim(path), reason);
            }
        }
    }
    Ok(())
}
