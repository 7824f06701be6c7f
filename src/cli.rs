//! Terminal plumbing shared by the binaries: logging setup, colours and an
//! `indicatif` progress bar behind [`ProgressCallback`].

use crate::progress::ProgressCallback;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── ANSI colour helpers ──────────────────────────────────────────────────

pub fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
pub fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
pub fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
pub fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
pub fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Install the stderr tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `--verbose` → debug, `--quiet` or an
/// active progress bar → error, else info.
pub fn init_logging(verbose: bool, quiet: bool, show_progress: bool) {
    let filter = if verbose {
        "debug"
    } else if quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();
}

/// Load the first `.env` found (`explicit` first, then `candidates`) into the
/// process environment. A missing explicit file is an error; missing
/// candidates are not.
///
/// Must run before [`block_on`] starts the runtime's worker threads.
pub fn load_env(explicit: Option<&Path>, candidates: &[PathBuf]) -> anyhow::Result<()> {
    crate::env::load_env_file(explicit, candidates)?;
    Ok(())
}

/// Run `fut` to completion on a fresh multi-threaded runtime.
pub fn block_on<F: Future<Output = anyhow::Result<()>>>(fut: F) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to start the async runtime: {e}"))?
        .block_on(fut)
}

/// Progress bar for a batch of images, pages or slides.
pub struct CliProgressCallback {
    bar: ProgressBar,
    noun: &'static str,
}

impl CliProgressCallback {
    /// Hidden until `on_start`, so a batch with nothing to do draws nothing.
    pub fn new(noun: &'static str) -> Arc<Self> {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden());
        Arc::new(Self { bar, noun })
    }
}

impl ProgressCallback for CliProgressCallback {
    fn on_start(&self, total: usize) {
        let style = ProgressStyle::with_template(&format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {}  ⏱ {{elapsed_precise}}  ETA {{eta_precise}}",
            self.noun
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_draw_target(ProgressDrawTarget::stderr());
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Working");
        self.bar.reset_eta();
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_item_complete(&self, done: usize, total: usize, label: &str) {
        self.bar
            .println(format!("  {} {:>3}/{:<3}  {}", green("✓"), done, total, dim(label)));
        self.bar.inc(1);
    }

    fn on_item_error(&self, done: usize, total: usize, label: &str, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            done,
            total,
            label,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_finish(&self, total: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(success_count);
        if failed == 0 {
            eprintln!("{} {} {} done", green("✔"), bold(&success_count.to_string()), self.noun);
        } else {
            eprintln!(
                "{} {}/{} {} done  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                self.noun,
                red(&failed.to_string()),
            );
        }
    }
}
