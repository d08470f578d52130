//! Per-section content extraction.
//!
//! Extraction never aborts a run: every section ends up either
//! [`SectionOutcome::Extracted`] or [`SectionOutcome::Skipped`] with a reason.

use regex::{Captures, Regex};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::config::Mode;
use crate::loader::Section;
use crate::resources::{Resource, ResourceTable};

/// Keeps images at their natural size while fitting them onto the page.
const PAGE_FIT_STYLE: &str = "<style>\
img, svg, image { max-width: 100% !important; max-height: 100vh; height: auto; object-fit: contain; }\
img, svg, figure { break-inside: avoid; page-break-inside: avoid; }\
</style>";

/// `url(...)` in inline styles and `<style>` blocks. Quotes may be serialized
/// as `&quot;` inside attributes.
static RE_CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*(?:&quot;|['"])?([^'"()]+?)(?:&quot;|['"])?\s*\)"#).expect("valid css url regex")
});

const SKIPPED_TEXT_ELEMENTS: &[&str] = &["head", "script", "style", "noscript", "template"];

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul", "ol", "dl", "dt", "dd",
    "blockquote", "table", "tr", "section", "article", "aside", "header", "footer", "nav",
    "figure", "figcaption", "hr", "pre", "address", "body",
];

#[derive(Debug, Clone)]
pub enum SectionContent {
    /// Sanitized markup with resource references pointing at local copies.
    Html(String),
    /// Paragraphs of plain text; `\n` inside a paragraph is a hard line break.
    Text(Vec<String>),
    /// The single image making up a fixed-layout page.
    PageImage(Resource),
}

#[derive(Debug, Clone)]
pub struct ExtractedSection {
    pub index: usize,
    pub href: String,
    pub content: SectionContent,
    /// Container paths of the images this section embeds.
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSection {
    pub index: usize,
    pub href: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum SectionOutcome {
    Extracted(ExtractedSection),
    Skipped(SkippedSection),
}

pub struct Extractor<'a> {
    resources: &'a ResourceTable,
    mode: Mode,
}

impl<'a> Extractor<'a> {
    pub fn new(resources: &'a ResourceTable, mode: Mode) -> Self {
        Self { resources, mode }
    }

    pub fn extract(&self, section: Section) -> SectionOutcome {
        let Section {
            index,
            href,
            media_type,
            data,
        } = section;

        let skip = |reason: String| {
            warn!("Skipping section {} ({}): {}", index + 1, href, reason);
            SectionOutcome::Skipped(SkippedSection {
                index,
                href: href.clone(),
                reason,
            })
        };

        if !is_markup(&media_type) {
            return skip(format!("unsupported media type '{media_type}'"));
        }
        let markup = match String::from_utf8(data) {
            Ok(markup) => markup,
            Err(e) => return skip(format!("markup is not valid UTF-8: {e}")),
        };
        let markup = markup.trim_start_matches('\u{feff}');

        let document = Html::parse_document(markup);
        let (content, images) = match self.mode {
            Mode::PreserveFormatting => self.to_html(document, &href),
            Mode::PlainText => (SectionContent::Text(to_paragraphs(&document)), Vec::new()),
            Mode::FixedLayout => match self.page_image(&document, &href) {
                Some(resource) => {
                    let images = vec![resource.href.clone()];
                    (SectionContent::PageImage(resource.clone()), images)
                }
                None => return skip("no page image".to_string()),
            },
        };

        debug!(
            "Section {} ({}): {} bytes of markup, {} images",
            index + 1,
            href,
            markup.len(),
            images.len()
        );

        SectionOutcome::Extracted(ExtractedSection {
            index,
            href,
            content,
            images,
        })
    }

    fn to_html(&self, mut document: Html, base: &str) -> (SectionContent, Vec<String>) {
        remove_elements(&mut document, "script");
        let references = collect_references(&document);
        let mut html = document.html();
        let mut images = Vec::new();

        for reference in references {
            let Some(resource) = self.resources.resolve(base, &reference) else {
                debug!("Unresolved reference '{}' in {}", reference, base);
                continue;
            };
            let Some(url) = resource.file_url() else {
                continue;
            };
            html = replace_reference(&html, &reference, url.as_str());
            if resource.is_image() && !images.contains(&resource.href) {
                images.push(resource.href.clone());
            }
        }

        let html = self.rewrite_css_urls(&html, base, &mut images);
        let html = match html.find("</head>") {
            Some(at) => format!("{}{}{}", &html[..at], PAGE_FIT_STYLE, &html[at..]),
            None => format!("{PAGE_FIT_STYLE}{html}"),
        };
        (SectionContent::Html(html), images)
    }

    /// Points `url(...)` references in embedded CSS at the local copies.
    /// Linked stylesheets need no rewriting: their copies keep the container
    /// layout, so their relative urls resolve on their own.
    fn rewrite_css_urls(&self, html: &str, base: &str, images: &mut Vec<String>) -> String {
        RE_CSS_URL
            .replace_all(html, |caps: &Captures<'_>| {
                let reference = caps[1].trim().replace("&amp;", "&");
                let resolved = self
                    .resources
                    .resolve(base, &reference)
                    .and_then(|resource| Some((resource, resource.file_url()?)));
                match resolved {
                    Some((resource, url)) => {
                        if resource.is_image() && !images.contains(&resource.href) {
                            images.push(resource.href.clone());
                        }
                        format!("url({})", url.as_str().replace('&', "&amp;"))
                    }
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    fn page_image(&self, document: &Html, base: &str) -> Option<&'a Resource> {
        collect_references(document)
            .into_iter()
            .filter_map(|reference| self.resources.resolve(base, &reference))
            .find(|resource| resource.is_image())
    }
}

fn is_markup(media_type: &str) -> bool {
    media_type.is_empty() || media_type.contains("html") || media_type.contains("svg")
}

fn remove_elements(document: &mut Html, name: &str) {
    let Ok(selector) = Selector::parse(name) else {
        return;
    };
    let ids: Vec<_> = document.select(&selector).map(|element| element.id()).collect();
    for id in ids {
        if let Some(mut node) = document.tree.get_mut(id) {
            node.detach();
        }
    }
}

/// Attribute values that may point at container resources, in document
/// order and without duplicates.
fn collect_references(document: &Html) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut references = Vec::new();

    for element in document.root_element().descendants().filter_map(ElementRef::wrap) {
        let name = element.value().name();
        for (attribute, value) in element.value().attrs() {
            let wanted = matches!(
                (name, attribute),
                ("img", "src") | ("image", "href") | ("image", "xlink:href") | ("link", "href")
            );
            if wanted && !value.trim().is_empty() && seen.insert(value.to_string()) {
                references.push(value.to_string());
            }
        }
    }
    references
}

/// Rewrites every `src`/`href` attribute whose serialized value equals
/// `reference`.
fn replace_reference(html: &str, reference: &str, replacement: &str) -> String {
    let serialized = reference
        .replace('&', "&amp;")
        .replace('\u{a0}', "&nbsp;")
        .replace('"', "&quot;");
    let pattern = format!(r#"(\s(?:src|href|xlink:href)=")({})(")"#, regex::escape(&serialized));
    let Ok(re) = Regex::new(&pattern) else {
        return html.to_string();
    };
    let replacement = replacement.replace('&', "&amp;");
    re.replace_all(html, |caps: &Captures<'_>| format!("{}{}\"", &caps[1], replacement))
        .into_owned()
}

fn to_paragraphs(document: &Html) -> Vec<String> {
    let mut collector = TextCollector::default();
    collector.walk(document.root_element(), false);
    collector.finish()
}

#[derive(Default)]
struct TextCollector {
    paragraphs: Vec<String>,
    current: String,
}

impl TextCollector {
    fn walk(&mut self, element: ElementRef<'_>, preformatted: bool) {
        for child in element.children() {
            if let Some(text) = child.value().as_text() {
                if preformatted {
                    self.current.push_str(text);
                } else {
                    self.push_collapsed(text);
                }
                continue;
            }
            let Some(child) = ElementRef::wrap(child) else {
                continue;
            };

            let name = child.value().name();
            if SKIPPED_TEXT_ELEMENTS.contains(&name) {
                continue;
            }
            if name == "br" {
                let trimmed = self.current.trim_end_matches(' ').len();
                self.current.truncate(trimmed);
                self.current.push('\n');
                continue;
            }

            let block = BLOCK_ELEMENTS.contains(&name);
            if block {
                self.break_paragraph();
            }
            self.walk(child, preformatted || name == "pre");
            if block {
                self.break_paragraph();
            }
        }
    }

    fn push_collapsed(&mut self, text: &str) {
        for c in text.chars() {
            if c.is_whitespace() {
                if !self.current.is_empty() && !self.current.ends_with(|c: char| c == ' ' || c == '\n') {
                    self.current.push(' ');
                }
            } else {
                self.current.push(c);
            }
        }
    }

    fn break_paragraph(&mut self) {
        let paragraph = self
            .current
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n");
        let paragraph = paragraph.trim_matches(|c: char| c == '\n' || c == ' ');
        if !paragraph.is_empty() {
            self.paragraphs.push(paragraph.to_string());
        }
        self.current.clear();
    }

    fn finish(mut self) -> Vec<String> {
        self.break_paragraph();
        self.paragraphs
    }
}
