//! Error types for the conversion pipeline.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ebook2pdf operations.
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Document-level failures. Section-level problems are not errors, see
/// [`crate::extractor::SectionOutcome`].
#[derive(Error, Debug)]
pub enum ConvertError {
    /// The input is missing, corrupted or DRM-protected.
    #[error("Cannot read {}: {reason}", path.display())]
    UnreadableInput { path: PathBuf, reason: String },

    /// The file extension is not one of the supported e-book formats.
    #[error("Unsupported file format '{extension}' for {}. Supported formats: .epub, .mobi, .prc, .azw, .azw3", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// A required external tool could not be found.
    #[error("Missing dependency: {name}")]
    MissingDependency { name: String, suggestion: String },

    /// The assembled document could not be produced or written.
    #[error("Failed to render PDF: {0}")]
    Render(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ConvertError {
    pub(crate) fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnreadableInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Corrective hint shown to the user alongside the error, if any.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::MissingDependency { suggestion, .. } => Some(suggestion),
            Self::UnreadableInput { reason, .. } if reason.contains("DRM") => {
                Some("Only DRM-free books can be converted.")
            }
            Self::UnsupportedFormat { .. } => {
                Some("Convert the book to EPUB first, e.g. with Calibre's ebook-convert.")
            }
            _ => None,
        }
    }
}

impl From<lopdf::Error> for ConvertError {
    fn from(e: lopdf::Error) -> Self {
        Self::Render(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dependency_suggestion() {
        let err = ConvertError::MissingDependency {
            name: "chromium".to_string(),
            suggestion: "install chromium".to_string(),
        };
        assert_eq!(err.to_string(), "Missing dependency: chromium");
        assert_eq!(err.suggestion(), Some("install chromium"));
    }

    #[test]
    fn test_drm_suggestion() {
        let err = ConvertError::unreadable("book.epub", "DRM-protected (META-INF/rights.xml)");
        assert!(err.to_string().contains("book.epub"));
        assert!(err.suggestion().is_some());

        let err = ConvertError::unreadable("book.epub", "not a ZIP archive");
        assert!(err.suggestion().is_none());
    }
}
