//! MOBI / AZW / AZW3 loading.
//!
//! Text and metadata come from the `mobi` crate. The Palm record table is
//! read here only to reject encrypted books and to pull out image records,
//! which the markup references by record number.

use ::mobi::Mobi;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

use super::{fallback_title, Metadata, Section};
use crate::error::{ConvertError, Result};
use crate::resources::ResourceTable;

const HEADER_LEN: usize = 78;
const NO_IMAGES: u32 = 0xFFFF_FFFF;
/// Every MOBI section shares this base; image hrefs are relative to it.
const MOBI_BASE_HREF: &str = "index.html";

static RE_PAGEBREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<mbp:pagebreak\s*/?>").expect("valid pagebreak regex"));
static RE_RECINDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)recindex\s*=\s*["']?(\d+)["']?"#).expect("valid recindex regex")
});
static RE_KINDLE_EMBED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"kindle:embed:([0-9A-Va-v]{4})(\?[^'\x22\s>]*)?").expect("valid kindle:embed regex")
});
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Minimal view of a Palm database: its type/creator and record table.
#[derive(Debug)]
pub struct PalmDatabase<'a> {
    data: &'a [u8],
    kind: [u8; 8],
    offsets: Vec<usize>,
}

impl<'a> PalmDatabase<'a> {
    pub fn parse(data: &'a [u8]) -> std::result::Result<Self, String> {
        if data.len() < HEADER_LEN {
            return Err(format!("file too short for a Palm database ({} bytes)", data.len()));
        }

        let mut kind = [0u8; 8];
        kind.copy_from_slice(&data[60..68]);
        let count = u16::from_be_bytes([data[76], data[77]]) as usize;

        let table_end = HEADER_LEN + count * 8;
        if data.len() < table_end {
            return Err("record table is truncated".to_string());
        }

        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let at = HEADER_LEN + i * 8;
            let offset = read_u32(data, at).unwrap_or(u32::MAX) as usize;
            if offset > data.len() || offsets.last().is_some_and(|&prev| offset < prev) {
                return Err(format!("record {i} points outside the file"));
            }
            offsets.push(offset);
        }

        Ok(Self { data, kind, offsets })
    }

    pub fn is_book(&self) -> bool {
        &self.kind == b"BOOKMOBI" || &self.kind == b"TEXtREAd"
    }

    pub fn record_count(&self) -> usize {
        self.offsets.len()
    }

    pub fn record(&self, index: usize) -> Option<&'a [u8]> {
        let start = *self.offsets.get(index)?;
        let end = self.offsets.get(index + 1).copied().unwrap_or(self.data.len());
        self.data.get(start..end)
    }

    /// PalmDOC encryption type from record 0; non-zero means DRM.
    pub fn encryption(&self) -> u16 {
        self.record(0)
            .and_then(|r| r.get(12..14))
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .unwrap_or(0)
    }

    /// Record index of the first image, from the MOBI header.
    pub fn first_image(&self) -> Option<usize> {
        let record0 = self.record(0)?;
        if record0.get(16..20) != Some(b"MOBI".as_slice()) {
            return None;
        }
        match read_u32(record0, 108)? {
            NO_IMAGES => None,
            index => Some(index as usize),
        }
    }
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn image_kind(record: &[u8]) -> Option<(&'static str, &'static str)> {
    if record.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(("jpg", "image/jpeg"))
    } else if record.starts_with(b"\x89PNG") {
        Some(("png", "image/png"))
    } else if record.starts_with(b"GIF8") {
        Some(("gif", "image/gif"))
    } else {
        None
    }
}

pub(super) fn open(path: &Path, resources: &mut ResourceTable) -> Result<(Metadata, Vec<Section>)> {
    let bytes = fs::read(path)?;

    let database = PalmDatabase::parse(&bytes).map_err(|reason| ConvertError::unreadable(path, reason))?;
    if !database.is_book() {
        return Err(ConvertError::unreadable(path, "not a MOBI/AZW container"));
    }
    match database.encryption() {
        0 => {}
        kind => {
            return Err(ConvertError::unreadable(
                path,
                format!("DRM-protected (encryption type {kind})"),
            ))
        }
    }

    let images = extract_images(&database, resources)?;

    let book = Mobi::new(bytes.clone())
        .map_err(|e| ConvertError::unreadable(path, format!("MOBI parse error: {e}")))?;

    let title = book.title();
    let metadata = Metadata {
        title: if title.trim().is_empty() {
            fallback_title(path)
        } else {
            title.trim().to_string()
        },
        author: book.author().map(|a| a.trim().to_string()),
        language: None,
    };

    let html = rewrite_image_references(&book.content_as_string_lossy(), &images);
    let sections = split_sections(&html);
    if sections.is_empty() {
        return Err(ConvertError::unreadable(path, "the book contains no text"));
    }

    Ok((metadata, sections))
}

/// Extracts image records; keys are the 1-based numbers the markup uses.
fn extract_images(database: &PalmDatabase<'_>, resources: &mut ResourceTable) -> Result<BTreeMap<usize, String>> {
    let mut images = BTreeMap::new();
    let Some(first) = database.first_image() else {
        return Ok(images);
    };

    for index in first..database.record_count() {
        let Some(record) = database.record(index) else {
            break;
        };
        let Some((extension, mime)) = image_kind(record) else {
            continue;
        };
        let number = index - first + 1;
        let href = format!("images/{number:05}.{extension}");
        resources.insert(&href, mime, record)?;
        images.insert(number, href);
    }

    debug!("Extracted {} image records", images.len());
    Ok(images)
}

/// Turns `recindex="N"` and `kindle:embed:XXXX` references into plain
/// relative paths.
fn rewrite_image_references(html: &str, images: &BTreeMap<usize, String>) -> String {
    let html = RE_RECINDEX.replace_all(html, |caps: &Captures<'_>| {
        let number = caps[1].parse::<usize>().ok();
        match number.and_then(|n| images.get(&n)) {
            Some(href) => format!("src=\"{href}\""),
            None => caps[0].to_string(),
        }
    });

    RE_KINDLE_EMBED
        .replace_all(&html, |caps: &Captures<'_>| {
            match decode_base32(&caps[1]).and_then(|n| images.get(&n)) {
                Some(href) => href.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// KF8 resource numbers are base 32 using the digits `0-9A-V`.
fn decode_base32(digits: &str) -> Option<usize> {
    digits
        .chars()
        .try_fold(0usize, |acc, c| c.to_digit(32).map(|d| acc * 32 + d as usize))
}

fn split_sections(html: &str) -> Vec<Section> {
    RE_PAGEBREAK
        .split(html)
        .filter(|chunk| has_content(chunk))
        .enumerate()
        .map(|(index, chunk)| Section {
            index,
            href: MOBI_BASE_HREF.to_string(),
            media_type: "application/xhtml+xml".to_string(),
            data: chunk.as_bytes().to_vec(),
        })
        .collect()
}

fn has_content(chunk: &str) -> bool {
    chunk.to_ascii_lowercase().contains("<img") || !RE_TAG.replace_all(chunk, "").trim().is_empty()
}
