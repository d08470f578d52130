//! Final statistics about a written PDF.

use std::fmt;
use std::fs;
use tracing::warn;

use crate::builder::OutputDocument;
use crate::extractor::SkippedSection;

#[derive(Debug, Clone)]
pub struct Report {
    pub path: std::path::PathBuf,
    pub byte_size: u64,
    pub page_count: usize,
    pub image_count: usize,
    /// Indices of the rendered sections, in output order.
    pub sections: Vec<usize>,
    pub skipped: Vec<SkippedSection>,
}

pub struct Reporter;

impl Reporter {
    /// Collects statistics by inspecting the file on disk. Never fails:
    /// when the file cannot be inspected the builder's own numbers are used.
    pub fn report(output: &OutputDocument, skipped: &[SkippedSection]) -> Report {
        let byte_size = match fs::metadata(&output.path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("Cannot stat {}: {}", output.path.display(), e);
                output.byte_size
            }
        };

        let page_count = match lopdf::Document::load(&output.path) {
            Ok(pdf) => pdf.get_pages().len(),
            Err(e) => {
                warn!(
                    "Cannot reopen {} to count pages, using build count: {}",
                    output.path.display(),
                    e
                );
                output.page_count
            }
        };

        let mut skipped = skipped.to_vec();
        skipped.sort_by_key(|s| s.index);

        Report {
            path: output.path.clone(),
            byte_size,
            page_count,
            image_count: output.image_count,
            sections: output.sections.clone(),
            skipped,
        }
    }
}

/// Formats a byte count as B, KB or MB.
pub fn human_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;

    let value = bytes as f64;
    if value >= MB {
        format!("{:.2} MB", value / MB)
    } else if value >= KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{} B", bytes)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Output:   {}", self.path.display())?;
        writeln!(f, "Size:     {}", human_size(self.byte_size))?;
        writeln!(f, "Pages:    {}", self.page_count)?;
        writeln!(f, "Images:   {}", self.image_count)?;
        write!(f, "Sections: {} rendered, {} skipped", self.sections.len(), self.skipped.len())?;
        for section in &self.skipped {
            write!(f, "\n  - section {} ({}): {}", section.index + 1, section.href, section.reason)?;
        }
        Ok(())
    }
}
