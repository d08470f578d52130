//! Document building: turns extracted sections into a single PDF and writes
//! it to disk.

mod browser;
mod images;
mod text;

pub use self::browser::HtmlRenderer;
pub use self::images::compose as compose_pages;
pub use self::text::TextTypesetter;

use colored::*;
use lopdf::{dictionary, Document as PdfDocument, Object, StringFormat};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{ConvertOptions, Mode};
use crate::deps::Dependencies;
use crate::error::{ConvertError, Result};
use crate::extractor::{ExtractedSection, SkippedSection};
use crate::loader::Document;
use crate::resources::ResourceTable;

const PRODUCER: &str = concat!("ebook2pdf ", env!("CARGO_PKG_VERSION"));

/// The finished PDF as written to disk.
#[derive(Debug, Clone)]
pub struct OutputDocument {
    pub path: PathBuf,
    /// Indices of the rendered sections, in source order.
    pub sections: Vec<usize>,
    /// Pages counted while building.
    pub page_count: usize,
    pub image_count: usize,
    pub byte_size: u64,
}

pub struct DocumentBuilder<'a> {
    options: &'a ConvertOptions,
    deps: &'a Dependencies,
    resources: &'a ResourceTable,
}

struct Assembled {
    pdf: PdfDocument,
    sections: Vec<usize>,
    pages: usize,
    images: usize,
    skipped: Vec<SkippedSection>,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(options: &'a ConvertOptions, deps: &'a Dependencies, resources: &'a ResourceTable) -> Self {
        Self {
            options,
            deps,
            resources,
        }
    }

    /// Renders `sections` in order and writes the result to `output`.
    /// Nothing is written unless the whole document could be produced.
    pub async fn build(
        &self,
        document: &Document,
        sections: Vec<ExtractedSection>,
        output: &Path,
    ) -> Result<(OutputDocument, Vec<SkippedSection>)> {
        if sections.is_empty() {
            return Err(ConvertError::Render("no sections could be rendered".to_string()));
        }

        info!("Building {} output from {} sections", self.options.mode, sections.len());

        let mut assembled = match self.options.mode {
            Mode::PreserveFormatting => self.build_html(&sections).await?,
            Mode::PlainText => self.build_text(document, &sections)?,
            Mode::FixedLayout => self.build_pages(&sections)?,
        };

        if assembled.pages == 0 {
            return Err(ConvertError::Render("no sections could be rendered".to_string()));
        }

        set_info(&mut assembled.pdf, document);
        self.set_catalog_entries(&mut assembled.pdf, document)?;
        assembled.pdf.prune_objects();
        assembled.pdf.compress();

        let mut bytes = Vec::new();
        assembled
            .pdf
            .save_to(&mut bytes)
            .map_err(|e| ConvertError::Render(format!("Failed to serialize PDF: {}", e)))?;
        write_atomically(output, &bytes)?;

        info!("Saved PDF to {}", output.display().to_string().green());

        let built = OutputDocument {
            path: output.to_path_buf(),
            sections: assembled.sections,
            page_count: assembled.pages,
            image_count: assembled.images,
            byte_size: bytes.len() as u64,
        };
        Ok((built, assembled.skipped))
    }

    async fn build_html(&self, sections: &[ExtractedSection]) -> Result<Assembled> {
        let chrome = self.deps.require_chrome()?;
        let renderer = HtmlRenderer::new(chrome, &self.options.pdf, self.resources.scratch_dir());
        let rendered = renderer.render(sections).await?;

        let images: BTreeSet<&str> = sections
            .iter()
            .flat_map(|section| section.images.iter().map(String::as_str))
            .collect();

        Ok(Assembled {
            pdf: rendered.pdf,
            sections: sections.iter().map(|s| s.index).collect(),
            pages: rendered.pages,
            images: images.len(),
            skipped: Vec::new(),
        })
    }

    fn build_text(&self, document: &Document, sections: &[ExtractedSection]) -> Result<Assembled> {
        let typeset = TextTypesetter::new(&self.options.text).typeset(&document.metadata, sections)?;
        debug!("Typeset {} sections into {} pages", sections.len(), typeset.pages);

        Ok(Assembled {
            pdf: typeset.pdf,
            sections: sections.iter().map(|s| s.index).collect(),
            pages: typeset.pages,
            images: 0,
            skipped: Vec::new(),
        })
    }

    fn build_pages(&self, sections: &[ExtractedSection]) -> Result<Assembled> {
        let composed = compose_pages(sections)?;
        Ok(Assembled {
            pdf: composed.pdf,
            images: composed.pages,
            pages: composed.pages,
            sections: composed.rendered,
            skipped: composed.skipped,
        })
    }

    /// Catalog entries: `/Lang` from the book metadata, plus page layout and
    /// reading direction for fixed-layout output.
    fn set_catalog_entries(&self, pdf: &mut PdfDocument, document: &Document) -> Result<()> {
        let root = pdf
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|e| ConvertError::Render(format!("PDF has no catalog: {}", e)))?;
        let catalog = pdf
            .get_object_mut(root)
            .and_then(Object::as_dict_mut)
            .map_err(|e| ConvertError::Render(format!("PDF has no catalog: {}", e)))?;

        if let Some(language) = document.metadata.language.as_deref().filter(|l| !l.trim().is_empty()) {
            catalog.set("Lang", text_string(language.trim()));
        }

        if self.options.mode != Mode::FixedLayout {
            return Ok(());
        }
        catalog.set("PageLayout", Object::Name(self.options.layout.pdf_name().as_bytes().to_vec()));
        catalog.set(
            "ViewerPreferences",
            dictionary! {
                "Direction" => Object::Name(self.options.direction.pdf_name().as_bytes().to_vec()),
            },
        );
        debug!(
            "Viewer preferences: layout {}, direction {}",
            self.options.layout.pdf_name(),
            self.options.direction.pdf_name()
        );
        Ok(())
    }
}

fn set_info(pdf: &mut PdfDocument, document: &Document) {
    let mut info = dictionary! {
        "Title" => text_string(&document.metadata.title),
        "Producer" => text_string(PRODUCER),
    };
    if let Some(author) = &document.metadata.author {
        info.set("Author", text_string(author));
    }
    let info_id = pdf.add_object(info);
    pdf.trailer.set("Info", info_id);
}

/// PDF text string: literal for ASCII, UTF-16BE with a byte order mark
/// otherwise.
fn text_string(value: &str) -> Object {
    if value.is_ascii() {
        return Object::String(value.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xfe, 0xff];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Writes through a temporary file in the target directory that is renamed
/// into place, so `path` either holds the complete PDF or is left untouched.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)
        .map_err(|e| ConvertError::Render(format!("Failed to create {}: {}", dir.display(), e)))?;

    let mut file = tempfile::Builder::new()
        .prefix(".ebook2pdf-")
        .suffix(".pdf")
        .tempfile_in(&dir)
        .map_err(|e| ConvertError::Render(format!("Failed to create temporary file in {}: {}", dir.display(), e)))?;
    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| ConvertError::Render(format!("Failed to write PDF: {}", e)))?;
    file.persist(path)
        .map_err(|e| ConvertError::Render(format!("Failed to save {}: {}", path.display(), e.error)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::SectionContent;
    use crate::loader::{Format, Metadata};

    fn document(title: &str) -> Document {
        Document {
            path: PathBuf::from("book.epub"),
            format: Format::Epub,
            metadata: Metadata {
                title: title.to_string(),
                author: Some("Writer".to_string()),
                language: Some("en".to_string()),
            },
        }
    }

    fn text_section(index: usize, text: &str) -> ExtractedSection {
        ExtractedSection {
            index,
            href: format!("ch{index}.xhtml"),
            content: SectionContent::Text(vec![text.to_string()]),
            images: Vec::new(),
        }
    }

    #[test]
    fn test_text_string() {
        match text_string("Plain") {
            Object::String(bytes, StringFormat::Literal) => assert_eq!(bytes, b"Plain"),
            other => panic!("unexpected {other:?}"),
        }
        match text_string("é") {
            Object::String(bytes, StringFormat::Hexadecimal) => assert_eq!(bytes, vec![0xfe, 0xff, 0x00, 0xe9]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_write_atomically_replaces_target() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("nested/out.pdf");
        write_atomically(&target, b"first").unwrap();
        write_atomically(&target, b"second").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"second");
        // no temporary files left behind
        assert_eq!(fs::read_dir(target.parent().unwrap()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_build_plain_text() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("book.pdf");
        let options = ConvertOptions::new(Mode::PlainText);
        let deps = Dependencies::default();
        let resources = ResourceTable::new().unwrap();
        let builder = DocumentBuilder::new(&options, &deps, &resources);

        let sections = vec![text_section(0, "First."), text_section(2, "Third.")];
        let (built, skipped) = builder.build(&document("Título"), sections, &output).await.unwrap();

        assert!(skipped.is_empty());
        assert_eq!(built.sections, vec![0, 2]);
        assert_eq!(built.page_count, 2);
        assert_eq!(built.image_count, 0);
        assert_eq!(built.byte_size, fs::metadata(&output).unwrap().len());

        let pdf = PdfDocument::load(&output).unwrap();
        assert_eq!(pdf.get_pages().len(), 2);
        let info_id = pdf.trailer.get(b"Info").and_then(Object::as_reference).unwrap();
        let info = pdf.get_object(info_id).and_then(Object::as_dict).unwrap();
        assert!(info.has(b"Title"));
        assert!(info.has(b"Author"));

        let catalog = pdf.catalog().unwrap();
        match catalog.get(b"Lang").unwrap() {
            Object::String(bytes, _) => assert_eq!(bytes, b"en"),
            other => panic!("unexpected {other:?}"),
        }
        // viewer preferences only apply to fixed layout
        assert!(!catalog.has(b"ViewerPreferences"));
    }

    #[tokio::test]
    async fn test_build_without_sections_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("empty.pdf");
        let options = ConvertOptions::new(Mode::PlainText);
        let deps = Dependencies::default();
        let resources = ResourceTable::new().unwrap();
        let builder = DocumentBuilder::new(&options, &deps, &resources);

        let err = builder.build(&document("Empty"), Vec::new(), &output).await.unwrap_err();
        assert!(matches!(err, ConvertError::Render(_)));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_preserve_formatting_requires_chrome() {
        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("book.pdf");
        let options = ConvertOptions::new(Mode::PreserveFormatting);
        let deps = Dependencies::default();
        let resources = ResourceTable::new().unwrap();
        let builder = DocumentBuilder::new(&options, &deps, &resources);

        let section = ExtractedSection {
            index: 0,
            href: "ch0.xhtml".to_string(),
            content: SectionContent::Html("<html><body>x</body></html>".to_string()),
            images: Vec::new(),
        };
        let err = builder.build(&document("Book"), vec![section], &output).await.unwrap_err();
        assert!(matches!(err, ConvertError::MissingDependency { .. }));
        assert!(!output.exists());
    }
}
