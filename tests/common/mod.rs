//! EPUB fixtures built on the fly.

#![allow(dead_code)]

use image::{ImageFormat, Rgb, RgbImage};
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const FONT_OBFUSCATION_XML: &str = r#"<?xml version="1.0"?>
<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
    <EncryptionMethod Algorithm="http://www.idpf.org/2008/embedding"/>
    <CipherData><CipherReference URI="OEBPS/fonts/serif.otf"/></CipherData>
  </EncryptedData>
</encryption>"#;

pub const AES_ENCRYPTION_XML: &str = r#"<?xml version="1.0"?>
<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <EncryptedData xmlns="http://www.w3.org/2001/04/xmlenc#">
    <EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
    <CipherData><CipherReference URI="OEBPS/ch1.xhtml"/></CipherData>
  </EncryptedData>
</encryption>"#;

enum Chapter {
    Markup(String),
    Raw(Vec<u8>),
    /// Listed in the spine but absent from the archive.
    Missing,
}

/// A minimal EPUB 2 book: one OPF package, an NCX, XHTML chapters and PNG
/// images under `OEBPS/`.
pub struct EpubFixture {
    title: String,
    author: String,
    chapters: Vec<Chapter>,
    images: Vec<(String, u32, u32)>,
    extra: Vec<(String, Vec<u8>)>,
}

impl EpubFixture {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            author: "Test Author".to_string(),
            chapters: Vec::new(),
            images: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Adds a chapter whose `<body>` holds `body`.
    pub fn chapter(mut self, body: &str) -> Self {
        let markup = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>Chapter {}</title></head>
<body>{}</body>
</html>"#,
            self.chapters.len() + 1,
            body
        );
        self.chapters.push(Chapter::Markup(markup));
        self
    }

    /// Adds a chapter with arbitrary bytes as its content.
    pub fn raw_chapter(mut self, data: &[u8]) -> Self {
        self.chapters.push(Chapter::Raw(data.to_vec()));
        self
    }

    /// Adds a spine entry whose file is left out of the archive.
    pub fn missing_chapter(mut self) -> Self {
        self.chapters.push(Chapter::Missing);
        self
    }

    /// Adds `OEBPS/images/<name>`, a PNG of the given size.
    pub fn image(mut self, name: &str, width: u32, height: u32) -> Self {
        self.images.push((name.to_string(), width, height));
        self
    }

    /// Adds an arbitrary archive entry, e.g. `META-INF/encryption.xml`.
    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.extra.push((name.to_string(), data.to_vec()));
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();

        zip.start_file("META-INF/container.xml", deflated).unwrap();
        zip.write_all(CONTAINER_XML.as_bytes()).unwrap();

        zip.start_file("OEBPS/content.opf", deflated).unwrap();
        zip.write_all(self.package().as_bytes()).unwrap();

        zip.start_file("OEBPS/toc.ncx", deflated).unwrap();
        zip.write_all(self.ncx().as_bytes()).unwrap();

        for (i, chapter) in self.chapters.iter().enumerate() {
            let data = match chapter {
                Chapter::Markup(markup) => markup.as_bytes(),
                Chapter::Raw(data) => data.as_slice(),
                Chapter::Missing => continue,
            };
            zip.start_file(format!("OEBPS/ch{}.xhtml", i + 1), deflated).unwrap();
            zip.write_all(data).unwrap();
        }

        for (name, width, height) in &self.images {
            zip.start_file(format!("OEBPS/images/{name}"), stored).unwrap();
            zip.write_all(&png(*width, *height)).unwrap();
        }

        for (name, data) in &self.extra {
            zip.start_file(name.as_str(), deflated).unwrap();
            zip.write_all(data).unwrap();
        }

        zip.finish().unwrap().into_inner()
    }

    pub fn write(&self, path: &Path) {
        let mut file = File::create(path).unwrap();
        file.write_all(&self.to_bytes()).unwrap();
    }

    fn package(&self) -> String {
        let mut manifest = String::from(
            r#"    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
"#,
        );
        let mut spine = String::new();
        for i in 1..=self.chapters.len() {
            manifest.push_str(&format!(
                "    <item id=\"ch{i}\" href=\"ch{i}.xhtml\" media-type=\"application/xhtml+xml\"/>\n"
            ));
            spine.push_str(&format!("    <itemref idref=\"ch{i}\"/>\n"));
        }
        for (i, (name, _, _)) in self.images.iter().enumerate() {
            manifest.push_str(&format!(
                "    <item id=\"img{i}\" href=\"images/{name}\" media-type=\"image/png\"/>\n"
            ));
        }

        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="bookid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:opf="http://www.idpf.org/2007/opf">
    <dc:title>{title}</dc:title>
    <dc:creator opf:role="aut">{author}</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier id="bookid">urn:uuid:00000000-0000-4000-8000-000000000000</dc:identifier>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>"#,
            title = self.title,
            author = self.author,
        )
    }

    fn ncx(&self) -> String {
        let mut points = String::new();
        for i in 1..=self.chapters.len() {
            points.push_str(&format!(
                r#"    <navPoint id="nav{i}" playOrder="{i}">
      <navLabel><text>Chapter {i}</text></navLabel>
      <content src="ch{i}.xhtml"/>
    </navPoint>
"#
            ));
        }
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head><meta name="dtb:uid" content="urn:uuid:00000000-0000-4000-8000-000000000000"/></head>
  <docTitle><text>{}</text></docTitle>
  <navMap>
{}  </navMap>
</ncx>"#,
            self.title, points
        )
    }
}

const CONTAINER_XML: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut data = Cursor::new(Vec::new());
    RgbImage::from_pixel(width, height, Rgb([40, 90, 160]))
        .write_to(&mut data, ImageFormat::Png)
        .unwrap();
    data.into_inner()
}

/// A chapter body with `paragraphs` copies of a long paragraph.
pub fn prose(marker: &str, paragraphs: usize) -> String {
    let sentence = "It was a bright cold day in April, and the clocks were striking thirteen. ";
    let mut body = format!("<h1>{marker}</h1>");
    for _ in 0..paragraphs {
        body.push_str(&format!("<p>{}</p>", sentence.repeat(6)));
    }
    body
}
