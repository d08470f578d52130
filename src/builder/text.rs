//! Plain-text typesetting straight into PDF content streams, using the
//! standard 14 fonts so nothing has to be embedded.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};

use crate::config::TextOptions;
use crate::error::Result;
use crate::extractor::{ExtractedSection, SectionContent};
use crate::loader::Metadata;

/// Courier advances 600/1000 em for every glyph.
const COURIER_ADVANCE: f32 = 0.6;
/// Upper bound for the Helvetica variants, used when wrapping headers.
const HELVETICA_ADVANCE: f32 = 0.6;

const BODY_FONT: &str = "F1";
const TITLE_FONT: &str = "F2";
const AUTHOR_FONT: &str = "F3";

pub struct TextTypesetter {
    page_width: f32,
    page_height: f32,
    margin: f32,
    font_size: f32,
    leading: f32,
}

pub struct TypesetText {
    pub pdf: Document,
    pub pages: usize,
}

impl TextTypesetter {
    pub fn new(options: &TextOptions) -> Self {
        let (page_width, page_height) = options.paper.points();
        let font_size = options.font_size.clamp(4.0, 72.0);
        Self {
            page_width,
            page_height,
            margin: (options.margin * 72.0) as f32,
            font_size,
            leading: font_size * 1.3,
        }
    }

    fn chars_per_line(&self, size: f32, advance: f32) -> usize {
        let usable = self.page_width - 2.0 * self.margin;
        ((usable / (size * advance)).floor() as usize).max(1)
    }

    /// Lays out the header and every section, each section starting on a
    /// fresh page.
    pub fn typeset(&self, metadata: &Metadata, sections: &[ExtractedSection]) -> Result<TypesetText> {
        let mut pages = PageCursor::new(self);

        self.header(&mut pages, metadata);

        let body_chars = self.chars_per_line(self.font_size, COURIER_ADVANCE);
        for (position, section) in sections.iter().enumerate() {
            if position > 0 {
                pages.new_page();
            }
            let SectionContent::Text(paragraphs) = &section.content else {
                continue;
            };
            for paragraph in paragraphs {
                for hard_line in paragraph.split('\n') {
                    for line in wrap(hard_line, body_chars) {
                        pages.line(BODY_FONT, self.font_size, self.leading, &line);
                    }
                }
                pages.gap(self.leading * 0.5);
            }
        }

        let page_ops = pages.finish();
        let count = page_ops.len();
        Ok(TypesetText {
            pdf: self.assemble(page_ops)?,
            pages: count,
        })
    }

    fn header(&self, pages: &mut PageCursor<'_>, metadata: &Metadata) {
        let title_size = self.font_size * 1.8;
        let title_chars = self.chars_per_line(title_size, HELVETICA_ADVANCE);
        for line in wrap(&metadata.title, title_chars) {
            pages.line(TITLE_FONT, title_size, title_size * 1.25, &line);
        }

        if let Some(author) = &metadata.author {
            let author_size = self.font_size * 1.2;
            pages.gap(author_size * 0.4);
            let author_chars = self.chars_per_line(author_size, HELVETICA_ADVANCE);
            for line in wrap(author, author_chars) {
                pages.line(AUTHOR_FONT, author_size, author_size * 1.25, &line);
            }
        }
        pages.gap(self.leading * 2.0);
    }

    fn assemble(&self, page_ops: Vec<Vec<Operation>>) -> Result<Document> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font = |doc: &mut Document, base: &str| {
            doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => base,
                "Encoding" => "WinAnsiEncoding",
            })
        };
        let body_font = font(&mut doc, "Courier");
        let title_font = font(&mut doc, "Helvetica-Bold");
        let author_font = font(&mut doc, "Helvetica-Oblique");
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                BODY_FONT => body_font,
                TITLE_FONT => title_font,
                AUTHOR_FONT => author_font,
            },
        });

        let mut kids = Vec::with_capacity(page_ops.len());
        for operations in page_ops {
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), self.page_width.into(), self.page_height.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        Ok(doc)
    }
}

/// Tracks the write position and breaks pages when the bottom margin is
/// reached.
struct PageCursor<'a> {
    setter: &'a TextTypesetter,
    done: Vec<Vec<Operation>>,
    current: Vec<Operation>,
    y: f32,
}

impl<'a> PageCursor<'a> {
    fn new(setter: &'a TextTypesetter) -> Self {
        Self {
            setter,
            done: Vec::new(),
            current: Vec::new(),
            y: setter.page_height - setter.margin,
        }
    }

    fn new_page(&mut self) {
        self.done.push(std::mem::take(&mut self.current));
        self.y = self.setter.page_height - self.setter.margin;
    }

    fn line(&mut self, font: &str, size: f32, leading: f32, text: &str) {
        if self.y - leading < self.setter.margin {
            self.new_page();
        }
        self.y -= leading;

        self.current.push(Operation::new("BT", vec![]));
        self.current.push(Operation::new("Tf", vec![font.into(), size.into()]));
        self.current.push(Operation::new("Td", vec![self.setter.margin.into(), self.y.into()]));
        self.current.push(Operation::new(
            "Tj",
            vec![Object::String(encode_win_ansi(text), StringFormat::Literal)],
        ));
        self.current.push(Operation::new("ET", vec![]));
    }

    fn gap(&mut self, amount: f32) {
        // a gap never starts a new page by itself
        self.y = (self.y - amount).max(self.setter.margin);
    }

    fn finish(mut self) -> Vec<Vec<Operation>> {
        self.done.push(self.current);
        self.done
    }
}

/// Greedy word wrap on character count. Runs of spaces inside a line are
/// kept; the run at a wrap point is dropped. Words longer than a line are
/// split.
fn wrap(line: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for (gap, word) in gaps_and_words(line.trim_end()) {
        let mut gap = if current_len == 0 && !lines.is_empty() {
            0
        } else {
            gap.min(max_chars - 1)
        };
        let mut word: Vec<char> = word.chars().collect();

        if current_len + gap + word.len() > max_chars && !current.trim().is_empty() {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
            gap = 0;
        }
        current.extend(std::iter::repeat(' ').take(gap));
        current_len += gap;

        while current_len + word.len() > max_chars {
            // the word alone overflows the line
            let take = max_chars.saturating_sub(current_len).max(1).min(word.len());
            current.extend(word.drain(..take));
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += word.len();
        current.extend(word);
    }

    if !current.trim().is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Splits `line` into (width of the whitespace before, word) pairs.
fn gaps_and_words(line: &str) -> Vec<(usize, &str)> {
    let mut runs = Vec::new();
    let mut rest = line;
    while !rest.is_empty() {
        let word_start = rest.find(|c: char| !c.is_whitespace()).unwrap_or(rest.len());
        let gap = rest[..word_start].chars().count();
        let tail = &rest[word_start..];
        let word_end = tail.find(char::is_whitespace).unwrap_or(tail.len());
        runs.push((gap, &tail[..word_end]));
        rest = &tail[word_end..];
    }
    runs
}

/// Encodes text for the standard fonts' WinAnsiEncoding; unmappable
/// characters become `?`.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{20}'..='\u{7e}' => c as u8,
            '\u{a0}'..='\u{ff}' => c as u32 as u8,
            '€' => 0x80,
            '‚' => 0x82,
            '„' => 0x84,
            '…' => 0x85,
            '•' => 0x95,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '–' => 0x96,
            '—' => 0x97,
            '™' => 0x99,
            '\t' => b' ',
            _ => b'?',
        })
        .collect()
}
