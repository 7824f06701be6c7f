//! Pipeline stages shared by the tools.
//!
//! Each submodule implements one step; the tool modules at the crate root
//! wire them together.
//!
//! ## Caption data flow
//!
//! ```text
//! input ──▶ scan ──▶ cache? ──▶ encode ──▶ llm ──▶ rewrite
//! (read)   (regex)  (md5 key)  (base64)   (VLM)   (alt text)
//! ```
//!
//! 1. [`input`]  : validate paths, read text, atomic writes
//! 2. [`scan`]   : find image references and their context windows
//! 3. [`cache`]  : skip images already captioned in the same context
//! 4. [`encode`] : base64-wrap image files and page rasters
//! 5. [`llm`]    : the only stage with network I/O; owns retries
//! 6. [`rewrite`]: splice captions back into the document
//!
//! [`pdf`] wraps every pdfium call and [`postprocess`] cleans generated
//! Markdown.

pub mod cache;
pub mod encode;
pub mod input;
pub mod llm;
pub mod pdf;
pub mod postprocess;
pub mod rewrite;
pub mod scan;
