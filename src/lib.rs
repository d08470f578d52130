//! # ebook2pdf
//!
//! A CLI utility to convert DRM-free EPUB, MOBI and AZW books into PDF files.
//!
//! ## Modes
//!
//! - `preserve-formatting`: sections are printed by headless Chromium, so
//!   styling and images survive
//! - `plain-text`: tag-stripped text typeset directly into the PDF
//! - `fixed-layout`: one page per section image, for manga and comics
//!
//! ## Usage
//!
//! ```bash
//! ebook2pdf book.epub
//! ebook2pdf --mode fixed-layout --direction R2L manga.epub -o manga.pdf
//! ebook2pdf --check-deps
//! ```

pub mod builder;
pub mod config;
pub mod deps;
pub mod error;
pub mod extractor;
pub mod loader;
mod pdf_merger;
pub mod pipeline;
pub mod reporter;
pub mod resources;

pub use config::{ConvertOptions, Direction, Mode, PageLayout, PaperSize, PdfOptions, TextOptions};
pub use deps::Dependencies;
pub use error::{ConvertError, Result};
pub use pdf_merger::PdfMerger;
pub use pipeline::{convert, Converter};
pub use reporter::Report;
