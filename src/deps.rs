//! Discovery of the external tools a conversion needs.
//!
//! Parsing and PDF writing are compiled in; the only runtime dependency is a
//! Chromium (or Chrome) executable for `preserve-formatting` mode.

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ConvertError, Result};

const CHROME_NAMES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

#[cfg(target_os = "macos")]
const CHROME_LOCATIONS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

#[cfg(target_os = "windows")]
const CHROME_LOCATIONS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const CHROME_LOCATIONS: &[&str] = &[];

pub const CHROME: &str = "chromium";
const CHROME_SUGGESTION: &str = "Install Chromium (e.g. `apt install chromium` or `brew install --cask chromium`), \
     point --chrome / CHROME_PATH at an existing Chrome binary, or use --mode plain-text";

/// Libraries linked into the binary, reported by `--check-deps` for completeness.
pub const BUILT_IN: &[(&str, &str)] = &[
    ("epub", "EPUB container parsing"),
    ("mobi", "MOBI/AZW text and metadata"),
    ("lopdf", "PDF assembly"),
    ("image", "image decoding"),
];

/// Which external tools were found. Passed explicitly into the stages that
/// need them.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    pub chrome: Option<PathBuf>,
}

/// One line of `--check-deps` output.
#[derive(Debug, Clone)]
pub struct DependencyStatus {
    pub name: &'static str,
    pub location: Option<PathBuf>,
    pub suggestion: &'static str,
}

impl fmt::Display for DependencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(path) => write!(f, "{}: found at {}", self.name, path.display()),
            None => write!(f, "{}: not found. {}", self.name, self.suggestion),
        }
    }
}

impl Dependencies {
    /// Probe using the process `PATH`.
    pub fn probe(explicit_chrome: Option<&Path>) -> Self {
        Self::probe_in(explicit_chrome, env::var_os("PATH"))
    }

    /// Probe against an explicit search path.
    pub fn probe_in(explicit_chrome: Option<&Path>, search_path: Option<OsString>) -> Self {
        Self {
            chrome: find_chrome(explicit_chrome, search_path),
        }
    }

    pub fn statuses(&self) -> Vec<DependencyStatus> {
        vec![DependencyStatus {
            name: CHROME,
            location: self.chrome.clone(),
            suggestion: CHROME_SUGGESTION,
        }]
    }

    pub fn missing(&self) -> Vec<DependencyStatus> {
        self.statuses()
            .into_iter()
            .filter(|status| status.location.is_none())
            .collect()
    }

    pub fn require_chrome(&self) -> Result<&Path> {
        self.chrome
            .as_deref()
            .ok_or_else(|| ConvertError::MissingDependency {
                name: CHROME.to_string(),
                suggestion: CHROME_SUGGESTION.to_string(),
            })
    }
}

fn find_chrome(explicit: Option<&Path>, search_path: Option<OsString>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        // a bare name such as `chromium-dev` is looked up on the search path
        if let Ok(found) = which::which_in(path, search_path.clone(), current_dir()) {
            return Some(found);
        }
        debug!("Explicit Chrome path {} does not exist", path.display());
        return None;
    }

    for name in CHROME_NAMES {
        if let Ok(found) = which::which_in(name, search_path.clone(), current_dir()) {
            debug!("Found {} at {}", name, found.display());
            return Some(found);
        }
    }

    CHROME_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

fn current_dir() -> PathBuf {
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
