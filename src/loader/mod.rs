//! Input loading: format detection, DRM checks, resource extraction and the
//! lazy section sequence.

mod epub;
mod mobi;

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{ConvertError, Result};
use crate::resources::ResourceTable;

pub use self::mobi::PalmDatabase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Epub,
    Mobi,
    Azw3,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Epub => "EPUB",
            Format::Mobi => "MOBI",
            Format::Azw3 => "AZW3",
        };
        f.write_str(name)
    }
}

/// Determines the declared format from the file extension.
pub fn detect_format(path: &Path) -> Result<Format> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "epub" => Ok(Format::Epub),
        "mobi" | "prc" | "azw" => Ok(Format::Mobi),
        "azw3" => Ok(Format::Azw3),
        _ => Err(ConvertError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                format!(".{extension}")
            },
        }),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub title: String,
    pub author: Option<String>,
    pub language: Option<String>,
}

/// The source e-book.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub format: Format,
    pub metadata: Metadata,
}

/// One content unit in reading order.
#[derive(Debug, Clone)]
pub struct Section {
    /// Position in the source; output order follows it.
    pub index: usize,
    /// Container path of the markup, base for relative references.
    pub href: String,
    pub media_type: String,
    /// Raw markup.
    pub data: Vec<u8>,
}

/// An opened, validated book.
pub struct Book {
    pub document: Document,
    pub sections: Sections,
    pub resources: ResourceTable,
}

/// Single-pass iterator over the sections of a book, in source order.
/// Re-reading a book means opening it again. A section that cannot be read
/// from the container ends the conversion with
/// [`ConvertError::UnreadableInput`].
pub struct Sections {
    inner: SectionsInner,
    total: usize,
}

enum SectionsInner {
    Epub(epub::EpubSections),
    Mobi(std::vec::IntoIter<Section>),
}

impl Sections {
    /// Number of sections the container declares.
    pub fn total(&self) -> usize {
        self.total
    }
}

impl Iterator for Sections {
    type Item = Result<Section>;

    fn next(&mut self) -> Option<Result<Section>> {
        match &mut self.inner {
            SectionsInner::Epub(sections) => sections.next(),
            SectionsInner::Mobi(sections) => sections.next().map(Ok),
        }
    }
}

pub struct Loader;

impl Loader {
    /// Opens `path`, failing with [`ConvertError::UnreadableInput`] or
    /// [`ConvertError::UnsupportedFormat`] unless the whole book is readable.
    pub fn open(path: &Path) -> Result<Book> {
        let format = detect_format(path)?;

        if !path.is_file() {
            return Err(ConvertError::unreadable(path, "file not found"));
        }

        info!("Opening {} as {}", path.display(), format);

        let mut resources = ResourceTable::new()?;
        let (metadata, sections) = match format {
            Format::Epub => {
                let (metadata, sections) = epub::open(path, &mut resources)?;
                let total = sections.total();
                (metadata, Sections { inner: SectionsInner::Epub(sections), total })
            }
            Format::Mobi | Format::Azw3 => {
                let (metadata, sections) = mobi::open(path, &mut resources)?;
                let total = sections.len();
                (metadata, Sections { inner: SectionsInner::Mobi(sections.into_iter()), total })
            }
        };

        info!(
            "\"{}\": {} sections, {} resources",
            metadata.title,
            sections.total(),
            resources.len()
        );

        Ok(Book {
            document: Document {
                path: path.to_path_buf(),
                format,
                metadata,
            },
            sections,
            resources,
        })
    }
}

fn fallback_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("a.epub")).unwrap(), Format::Epub);
        assert_eq!(detect_format(Path::new("A.EPUB")).unwrap(), Format::Epub);
        assert_eq!(detect_format(Path::new("a.mobi")).unwrap(), Format::Mobi);
        assert_eq!(detect_format(Path::new("a.azw")).unwrap(), Format::Mobi);
        assert_eq!(detect_format(Path::new("a.azw3")).unwrap(), Format::Azw3);
    }

    #[test]
    fn test_detect_unsupported_format() {
        let err = detect_format(Path::new("notes.txt")).unwrap_err();
        match err {
            ConvertError::UnsupportedFormat { extension, .. } => assert_eq!(extension, ".txt"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            detect_format(Path::new("README")),
            Err(ConvertError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let err = Loader::open(Path::new("/definitely/not/here.epub")).err().unwrap();
        assert!(matches!(err, ConvertError::UnreadableInput { .. }));
    }

    #[test]
    fn test_fallback_title() {
        assert_eq!(fallback_title(Path::new("dir/My Book.epub")), "My Book");
    }
}
