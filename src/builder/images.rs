//! Fixed-layout output: every section becomes one page showing its image at
//! the image's pixel size (1 px = 1 pt).

use image::{GenericImageView, ImageFormat};
use std::io::Cursor;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::fs;
use tracing::{debug, warn};

use crate::error::Result;
use crate::extractor::{ExtractedSection, SectionContent, SkippedSection};
use crate::resources::Resource;

pub struct ComposedPages {
    pub pdf: Document,
    pub pages: usize,
    /// Indices of the sections that made it into the document.
    pub rendered: Vec<usize>,
    pub skipped: Vec<SkippedSection>,
}

struct PageImage {
    width: u32,
    height: u32,
    stream: Stream,
}

pub fn compose(sections: &[ExtractedSection]) -> Result<ComposedPages> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    let mut rendered = Vec::new();
    let mut skipped = Vec::new();

    for section in sections {
        let SectionContent::PageImage(resource) = &section.content else {
            continue;
        };

        let image = match load_page_image(resource) {
            Ok(image) => image,
            Err(reason) => {
                warn!("Skipping section {} ({}): {}", section.index + 1, section.href, reason);
                skipped.push(SkippedSection {
                    index: section.index,
                    href: section.href.clone(),
                    reason,
                });
                continue;
            }
        };

        let (width, height) = (i64::from(image.width), i64::from(image.height));
        let image_id = doc.add_object(image.stream);
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![width.into(), 0.into(), 0.into(), height.into(), 0.into(), 0.into()],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
        rendered.push(section.index);

        debug!("Page {} from {} ({}x{})", kids.len(), resource.href, width, height);
    }

    let pages = kids.len();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    Ok(ComposedPages {
        pdf: doc,
        pages,
        rendered,
        skipped,
    })
}

/// Baseline gray and RGB JPEGs are embedded untouched; everything else,
/// including CMYK and YCCK JPEGs, is decoded to RGB.
fn load_page_image(resource: &Resource) -> std::result::Result<PageImage, String> {
    let data = fs::read(&resource.local_path).map_err(|e| format!("cannot read page image: {e}"))?;
    let decoded = image::load_from_memory(&data).map_err(|e| format!("cannot decode page image: {e}"))?;
    let (width, height) = decoded.dimensions();

    let passthrough = match image::guess_format(&data) {
        Ok(ImageFormat::Jpeg) => jpeg_color_space(&data),
        _ => None,
    };
    let stream = match passthrough {
        Some(color_space) => {
            let mut stream = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width as i64,
                    "Height" => height as i64,
                    "ColorSpace" => color_space,
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                data,
            );
            stream.allows_compression = false;
            stream
        }
        None => {
            let rgb = decoded.to_rgb8();
            Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width as i64,
                    "Height" => height as i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                },
                rgb.into_raw(),
            )
        }
    };

    Ok(PageImage { width, height, stream })
}

/// PDF colour space for a JPEG that a reader can show as stored, read from
/// the frame header. `None` for anything but 8-bit samples with one or three
/// components.
fn jpeg_color_space(data: &[u8]) -> Option<&'static str> {
    if !data.starts_with(&[0xff, 0xd8]) {
        return None;
    }
    let body = &data[2..];
    let mut cursor = Cursor::new(body);
    loop {
        let marker = next_marker(&mut cursor)?;
        match marker {
            // standalone markers carry no length
            0x01 | 0xd0..=0xd7 => continue,
            // scan data or end of image before any frame header
            0xd9 | 0xda => return None,
            _ => {}
        }
        let start = cursor.position() as usize;
        let segment = body.get(start..)?;
        let length = usize::from(u16::from_be_bytes([*segment.first()?, *segment.get(1)?]));
        if length < 2 {
            return None;
        }

        let is_frame = matches!(marker, 0xc0..=0xcf) && !matches!(marker, 0xc4 | 0xc8 | 0xcc);
        if is_frame {
            let precision = *segment.get(2)?;
            let components = *segment.get(7)?;
            return match (precision, components) {
                (8, 1) => Some("DeviceGray"),
                (8, 3) => Some("DeviceRGB"),
                _ => None,
            };
        }
        cursor.set_position((start + length) as u64);
    }
}

/// Advances past the next `0xFF xx` marker, skipping fill bytes.
fn next_marker(cursor: &mut Cursor<&[u8]>) -> Option<u8> {
    let data = *cursor.get_ref();
    let mut pos = cursor.position() as usize;
    if *data.get(pos)? != 0xff {
        return None;
    }
    while *data.get(pos)? == 0xff {
        pos += 1;
    }
    let marker = *data.get(pos)?;
    cursor.set_position(pos as u64 + 1);
    Some(marker)
}
