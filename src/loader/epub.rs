use ::epub::doc::EpubDoc;
use regex::Regex;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};
use zip::ZipArchive;

use super::{fallback_title, Metadata, Section};
use crate::error::{ConvertError, Result};
use crate::resources::{mime_for, ResourceTable};

/// Algorithms used for font obfuscation, which is not DRM.
const FONT_OBFUSCATION: &[&str] = &[
    "http://www.idpf.org/2008/embedding",
    "http://ns.adobe.com/pdf/enc#RC",
];

static RE_ALGORITHM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Algorithm\s*=\s*["']([^"']+)["']"#).expect("valid algorithm regex")
});

pub(super) struct EpubSections {
    doc: EpubDoc<BufReader<File>>,
    path: PathBuf,
    next: usize,
    total: usize,
}

impl EpubSections {
    pub(super) fn total(&self) -> usize {
        self.total
    }
}

impl Iterator for EpubSections {
    type Item = Result<Section>;

    fn next(&mut self) -> Option<Result<Section>> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let current = if self.doc.set_current_chapter(index) {
            self.doc.get_current()
        } else {
            None
        };
        let href = self
            .doc
            .get_current_path()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|| format!("section_{index}.xhtml"));

        let Some((data, media_type)) = current else {
            return Some(Err(ConvertError::unreadable(
                &self.path,
                format!("section {} ({href}) cannot be read from the container", index + 1),
            )));
        };

        Some(Ok(Section {
            index,
            href,
            media_type,
            data,
        }))
    }
}

pub(super) fn open(path: &Path, resources: &mut ResourceTable) -> Result<(Metadata, EpubSections)> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|e| ConvertError::unreadable(path, format!("not a valid EPUB (ZIP) container: {e}")))?;

    if archive.by_name("META-INF/container.xml").is_err() {
        return Err(ConvertError::unreadable(path, "META-INF/container.xml is missing"));
    }

    check_drm(path, &mut archive)?;
    extract_resources(path, &mut archive, resources)?;

    let mut doc = EpubDoc::new(path)
        .map_err(|e| ConvertError::unreadable(path, format!("invalid EPUB package: {e}")))?;

    let metadata = Metadata {
        title: doc
            .get_title()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| fallback_title(path)),
        author: doc.mdata("creator").map(|m| m.value.trim().to_string()),
        language: doc.mdata("language").map(|m| m.value.trim().to_string()),
    };

    let total = doc.get_num_chapters();
    if total == 0 {
        return Err(ConvertError::unreadable(path, "the spine lists no sections"));
    }
    check_spine(path, &mut doc, &mut archive, total)?;

    Ok((
        metadata,
        EpubSections {
            doc,
            path: path.to_path_buf(),
            next: 0,
            total,
        },
    ))
}

/// Reads every spine item through the archive so that a missing or
/// corrupted section fails the whole book before anything is rendered.
fn check_spine(
    path: &Path,
    doc: &mut EpubDoc<BufReader<File>>,
    archive: &mut ZipArchive<BufReader<File>>,
    total: usize,
) -> Result<()> {
    for index in 0..total {
        let entry_name = doc
            .set_current_chapter(index)
            .then(|| doc.get_current_path())
            .flatten()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .ok_or_else(|| ConvertError::unreadable(path, format!("spine item {} has no resource", index + 1)))?;

        let mut entry = archive.by_name(&entry_name).map_err(|e| {
            ConvertError::unreadable(path, format!("section {entry_name} is missing from the container: {e}"))
        })?;
        // reading to the end also verifies the CRC
        io::copy(&mut entry, &mut io::sink())
            .map_err(|e| ConvertError::unreadable(path, format!("section {entry_name} is corrupted: {e}")))?;
    }
    doc.set_current_chapter(0);
    Ok(())
}

fn check_drm(path: &Path, archive: &mut ZipArchive<BufReader<File>>) -> Result<()> {
    if archive.by_name("META-INF/rights.xml").is_ok() {
        return Err(ConvertError::unreadable(path, "DRM-protected (META-INF/rights.xml present)"));
    }

    let encryption = match archive.by_name("META-INF/encryption.xml") {
        Ok(mut entry) => {
            let mut xml = String::new();
            entry
                .read_to_string(&mut xml)
                .map_err(|e| ConvertError::unreadable(path, format!("cannot read encryption.xml: {e}")))?;
            xml
        }
        Err(_) => return Ok(()),
    };

    if let Some(algorithm) = drm_algorithm(&encryption) {
        return Err(ConvertError::unreadable(
            path,
            format!("DRM-protected (content encrypted with {algorithm})"),
        ));
    }

    debug!("encryption.xml only declares font obfuscation");
    Ok(())
}

/// First encryption algorithm that is not plain font obfuscation.
fn drm_algorithm(encryption_xml: &str) -> Option<String> {
    RE_ALGORITHM
        .captures_iter(encryption_xml)
        .map(|caps| caps[1].to_string())
        .find(|algorithm| !FONT_OBFUSCATION.contains(&algorithm.as_str()))
}

fn extract_resources(
    path: &Path,
    archive: &mut ZipArchive<BufReader<File>>,
    resources: &mut ResourceTable,
) -> Result<()> {
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ConvertError::unreadable(path, format!("corrupted archive entry #{i}: {e}")))?;

        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let Some(mime) = mime_for(&name) else {
            continue;
        };

        let mut data = Vec::new();
        if let Err(e) = entry.read_to_end(&mut data) {
            return Err(ConvertError::unreadable(path, format!("corrupted resource {name}: {e}")));
        }
        if data.is_empty() {
            warn!("Skipping empty resource {}", name);
            continue;
        }
        resources.insert(&name, mime, &data)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn stored_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, data) in entries {
            zip.start_file(*name, stored).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn open_archive(dir: &Path, bytes: &[u8]) -> (PathBuf, ZipArchive<BufReader<File>>) {
        let path = dir.join("book.epub");
        std::fs::write(&path, bytes).unwrap();
        let archive = ZipArchive::new(BufReader::new(File::open(&path).unwrap())).unwrap();
        (path, archive)
    }

    #[test]
    fn test_extract_resources_copies_known_types() {
        let dir = tempfile::TempDir::new().unwrap();
        let bytes = stored_zip(&[
            ("OEBPS/Images/a.png", b"png data"),
            ("OEBPS/Fonts/serif.otf", b"OTTO"),
            ("OEBPS/Images/empty.png", b""),
            ("OEBPS/notes.bin", b"ignored"),
        ]);
        let (path, mut archive) = open_archive(dir.path(), &bytes);
        let mut resources = ResourceTable::new().unwrap();

        extract_resources(&path, &mut archive, &mut resources).unwrap();
        assert_eq!(resources.len(), 2);
        let image = resources.get("OEBPS/Images/a.png").unwrap();
        assert_eq!(std::fs::read(&image.local_path).unwrap(), b"png data");
        assert_eq!(resources.get("OEBPS/Fonts/serif.otf").unwrap().mime, "font/otf");
    }

    #[test]
    fn test_declared_entry_size_is_not_trusted() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut bytes = stored_zip(&[("OEBPS/Images/a.png", b"png data")]);

        // claim ~4 GiB uncompressed in the central directory
        let central = bytes
            .windows(4)
            .position(|w| w == [0x50, 0x4b, 0x01, 0x02])
            .unwrap();
        bytes[central + 24..central + 28].copy_from_slice(&0xFFFF_FFF0u32.to_le_bytes());

        let Ok(archive) = ZipArchive::new(Cursor::new(bytes.clone())) else {
            // rejected while reading the directory, nothing to extract
            return;
        };
        drop(archive);
        let (path, mut archive) = open_archive(dir.path(), &bytes);
        let mut resources = ResourceTable::new().unwrap();

        match extract_resources(&path, &mut archive, &mut resources) {
            Ok(()) => {
                let image = resources.get("OEBPS/Images/a.png").unwrap();
                assert_eq!(image.size, 8);
            }
            Err(err) => assert!(matches!(err, ConvertError::UnreadableInput { .. })),
        }
    }

    #[test]
    fn test_font_obfuscation_is_not_drm() {
        let xml = r#"<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
            <EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
              <EncryptionMethod Algorithm="http://www.idpf.org/2008/embedding"/>
            </EncryptedData></encryption>"#;
        assert_eq!(drm_algorithm(xml), None);
    }

    #[test]
    fn test_aes_is_drm() {
        let xml = r#"<EncryptionMethod Algorithm="http://ns.adobe.com/pdf/enc#RC"/>
            <EncryptionMethod Algorithm='http://www.w3.org/2001/04/xmlenc#aes128-cbc'/>"#;
        assert_eq!(
            drm_algorithm(xml).as_deref(),
            Some("http://www.w3.org/2001/04/xmlenc#aes128-cbc")
        );
    }
}
