//! # docprep
//!
//! Document-prep utilities for notes and books:
//!
//! * [`check_toc`] reports a PDF outline as JSON, with per-entry page spans,
//!   character counts and per-level statistics.
//! * [`split`] writes one PDF per outline item at a chosen depth.
//! * [`convert`] turns a PDF into Markdown plus an `images/` folder, and
//!   [`describe`] captions every image in that Markdown with a vision LLM.
//! * [`wiki`] rewrites `![[image.png]]` wiki embeds to standard Markdown and
//!   captions images that have no alt text.
//! * [`slides`] batch-generates slide images from a JSON outline.
//!
//! ## Caption pipeline
//!
//! ```text
//! Markdown
//!  │
//!  ├─ 1. Scan     find ![alt](path) and context windows
//!  ├─ 2. Cache    md5(path + context) → previous caption
//!  ├─ 3. Encode   image file → base64 ImageData
//!  ├─ 4. VLM      bounded-concurrency calls with retries
//!  └─ 5. Rewrite  caption into alt text, atomic write
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use docprep::{ImageDescriber, DescribeConfig, CaptionModel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads OPENAI_API_KEY from the environment.
//!     let config = DescribeConfig::builder()
//!         .model(CaptionModel::Gpt)
//!         .cache_path("image-cache_book.json")
//!         .build()?;
//!     let report = ImageDescriber::new(config).run("book.md").await?;
//!     eprintln!("{} described, {} cached", report.described, report.cached);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | The five binaries (clap, anyhow, indicatif, tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod check_toc;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod convert;
pub mod describe;
pub mod env;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod slides;
pub mod split;
pub mod toc;
pub mod wiki;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use check_toc::{check_toc, TocReport};
pub use config::{
    CaptionModel, ConvertEngine, ConvertOptions, DescribeConfig, DescribeConfigBuilder, SlideConfig,
    SlideConfigBuilder,
};
pub use convert::{pdf_to_markdown, ConvertOutput};
pub use describe::{DescribeReport, ImageDescriber};
pub use error::{DocPrepError, ItemError};
pub use pipeline::llm::Captioner;
pub use progress::{ProgressCallback, SharedProgress};
pub use split::{split_pdf_by_toc, SplitReport};
pub use toc::TocEntry;
pub use wiki::{process_note, WikiReport, WikiRun};
