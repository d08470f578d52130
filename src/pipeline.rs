use colored::*;
use std::path::Path;
use tracing::{debug, info};

use crate::builder::DocumentBuilder;
use crate::config::{ConvertOptions, Mode};
use crate::deps::Dependencies;
use crate::error::Result;
use crate::extractor::{Extractor, SectionOutcome};
use crate::loader::{Book, Loader};
use crate::reporter::{Report, Reporter};

/// Runs one conversion: load, extract, build, report. Each stage finishes
/// before the next starts; every temporary file lives in the book's
/// resource table and is removed when the conversion returns.
pub struct Converter<'a> {
    options: &'a ConvertOptions,
    deps: &'a Dependencies,
}

impl<'a> Converter<'a> {
    pub fn new(options: &'a ConvertOptions, deps: &'a Dependencies) -> Self {
        Self { options, deps }
    }

    pub async fn convert(&self, input: &Path) -> Result<Report> {
        // fail before touching the input when the browser is missing
        if self.options.mode == Mode::PreserveFormatting {
            self.deps.require_chrome()?;
        }

        let output = self.options.output_path(input);
        info!("Converting \"{}\" ({} mode)", input.display().to_string().green(), self.options.mode);

        let Book {
            document,
            sections,
            resources,
        } = Loader::open(input)?;
        debug!(
            "{} book \"{}\" by {}",
            document.format,
            document.metadata.title,
            document.metadata.author.as_deref().unwrap_or("unknown author")
        );

        let extractor = Extractor::new(&resources, self.options.mode);
        let mut extracted = Vec::new();
        let mut skipped = Vec::new();
        for section in sections {
            match extractor.extract(section?) {
                SectionOutcome::Extracted(section) => extracted.push(section),
                SectionOutcome::Skipped(section) => skipped.push(section),
            }
        }
        debug!("Extracted {} sections, skipped {}", extracted.len(), skipped.len());

        let builder = DocumentBuilder::new(self.options, self.deps, &resources);
        let (built, build_skipped) = builder.build(&document, extracted, &output).await?;
        skipped.extend(build_skipped);

        Ok(Reporter::report(&built, &skipped))
    }
}

/// Convenience wrapper around [`Converter`].
pub async fn convert(input: &Path, options: &ConvertOptions, deps: &Dependencies) -> Result<Report> {
    Converter::new(options, deps).convert(input).await
}
