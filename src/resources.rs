//! Images and stylesheets extracted from the container for the length of one
//! conversion run.

use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;
use url::Url;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Resource {
    /// Path inside the container, e.g. `OEBPS/Images/cover.jpg`.
    pub href: String,
    pub mime: &'static str,
    pub size: u64,
    /// Extracted copy inside the run's temporary directory.
    pub local_path: PathBuf,
}

impl Resource {
    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }

    pub fn file_url(&self) -> Option<Url> {
        Url::from_file_path(&self.local_path).ok()
    }
}

/// Flat collection of extracted resources, keyed by container path.
///
/// Owns the per-invocation temporary directory: every extracted file, and
/// anything else the builder writes under [`ResourceTable::scratch_dir`], is
/// removed when the table is dropped.
#[derive(Debug)]
pub struct ResourceTable {
    dir: TempDir,
    resources: BTreeMap<String, Resource>,
}

impl ResourceTable {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("ebook2pdf-").tempdir()?;
        fs::create_dir_all(dir.path().join("resources"))?;
        Ok(Self {
            dir,
            resources: BTreeMap::new(),
        })
    }

    /// Writes `data` to the temp directory and records it under `href`.
    ///
    /// The copy keeps the container layout below `resources/`, so relative
    /// `url(...)` references inside extracted stylesheets still resolve.
    pub fn insert(&mut self, href: &str, mime: &'static str, data: &[u8]) -> Result<&Resource> {
        let root = self.dir.path().join("resources");
        let mut local_path = root.join(local_relative_path(href));
        if local_path == root || local_path.exists() {
            // unnamed or colliding after normalization
            local_path = root
                .join("_renamed")
                .join(format!("{:05}-{}", self.resources.len(), file_name(href)));
        }
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&local_path, data)?;

        let resource = Resource {
            href: href.to_string(),
            mime,
            size: data.len() as u64,
            local_path,
        };
        debug!("Extracted {} ({} bytes)", href, resource.size);
        self.resources.insert(href.to_string(), resource);
        Ok(&self.resources[href])
    }

    pub fn get(&self, href: &str) -> Option<&Resource> {
        self.resources.get(href)
    }

    /// Resolves a reference found in the section at `base` to a resource.
    pub fn resolve(&self, base: &str, reference: &str) -> Option<&Resource> {
        resolve_href(base, reference).and_then(|href| self.get(&href))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Directory for transient files written during the build.
    pub fn scratch_dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Container path with empty, `.` and `..` segments dropped, so that every
/// copy stays inside the resource directory.
fn local_relative_path(href: &str) -> PathBuf {
    href.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect()
}

fn file_name(href: &str) -> String {
    let name = href.rsplit('/').next().unwrap_or(href);
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Media type for the resource kinds worth extracting, by file extension.
pub fn mime_for(href: &str) -> Option<&'static str> {
    let extension = href.rsplit('.').next()?.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "css" => "text/css",
        "otf" => "font/otf",
        "ttf" => "font/ttf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => return None,
    };
    Some(mime)
}

/// Resolves `reference` relative to the container path `base`.
///
/// Returns the decoded container path, or `None` for external and `data:`
/// URLs.
pub fn resolve_href(base: &str, reference: &str) -> Option<String> {
    let root = Url::parse("epub:///").ok()?;
    let base = root.join(base).ok()?;
    let resolved = base.join(reference.trim()).ok()?;
    if resolved.scheme() != "epub" {
        return None;
    }

    let path = resolved.path().trim_start_matches('/');
    let decoded = percent_decode_str(path).decode_utf8().ok()?;
    if decoded.is_empty() {
        None
    } else {
        Some(decoded.into_owned())
    }
}
