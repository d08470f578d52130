use lopdf::{Document, Object, ObjectId};
use tracing::{debug, info};

use crate::error::{ConvertError, Result};

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Concatenates PDF documents page by page, preserving the order in which
/// they were added.
pub struct PdfMerger {
    documents: Vec<(String, Document)>,
}

impl PdfMerger {
    pub fn new() -> Self {
        Self {
            documents: Vec::new(),
        }
    }

    /// Parses `data` and queues it; returns its page count.
    pub fn add_bytes(&mut self, label: &str, data: &[u8]) -> Result<usize> {
        let document = Document::load_mem(data)
            .map_err(|e| ConvertError::Render(format!("Failed to parse PDF for {label}: {e}")))?;
        let pages = document.get_pages().len();
        debug!("Loaded PDF with {} pages from {}", pages, label);
        self.documents.push((label.to_string(), document));
        Ok(pages)
    }

    pub fn merge(self) -> Result<Document> {
        let total = self.documents.len();
        let mut documents = self.documents.into_iter();
        let Some((_, mut merged)) = documents.next() else {
            return Err(ConvertError::Render("No PDFs added to merge".to_string()));
        };

        info!("Merging {} section PDFs", total);

        let pages_id = root_pages_id(&merged)?;
        let mut all_page_ids = collect_pages(&mut merged);
        let mut max_id = merged.max_id;

        for (i, (label, mut document)) in documents.enumerate() {
            debug!("Processing document {}: {} with {} pages", i + 2, label, document.get_pages().len());

            // Renumber objects to avoid conflicts
            document.renumber_objects_with(max_id + 1);
            max_id = document.max_id;

            all_page_ids.extend(collect_pages(&mut document));
            merged.objects.extend(document.objects);
        }
        merged.max_id = max_id;

        for page_id in &all_page_ids {
            if let Ok(page) = merged.get_object_mut(*page_id).and_then(Object::as_dict_mut) {
                page.set("Parent", Object::Reference(pages_id));
            }
        }

        let count = all_page_ids.len();
        let pages = merged
            .get_object_mut(pages_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| ConvertError::Render(format!("Merged document has no page tree: {e}")))?;
        pages.set(
            "Kids",
            Object::Array(all_page_ids.into_iter().map(Object::Reference).collect()),
        );
        pages.set("Count", Object::Integer(count as i64));

        // catalogs and page trees of the appended documents are now unreferenced
        let pruned = merged.prune_objects();
        debug!("Pruned {} unreferenced objects", pruned.len());

        info!("Total pages collected: {}", count);
        Ok(merged)
    }
}

impl Default for PdfMerger {
    fn default() -> Self {
        Self::new()
    }
}

fn root_pages_id(document: &Document) -> Result<ObjectId> {
    document
        .catalog()
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(Object::as_reference)
        .map_err(|e| ConvertError::Render(format!("PDF has no page tree: {e}")))
}

/// Page ids in order, with inherited attributes copied onto each page so
/// that the pages can be moved under a different parent.
fn collect_pages(document: &mut Document) -> Vec<ObjectId> {
    let page_ids: Vec<ObjectId> = document.get_pages().into_values().collect();
    for page_id in &page_ids {
        inline_inherited(document, *page_id);
    }
    page_ids
}

fn inline_inherited(document: &mut Document, page_id: ObjectId) {
    let Ok(page) = document.get_object(page_id).and_then(Object::as_dict) else {
        return;
    };
    let mut missing: Vec<&[u8]> = INHERITABLE.into_iter().filter(|key| !page.has(key)).collect();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut inherited = Vec::new();

    let mut depth = 0;
    while let Some(node_id) = parent {
        if missing.is_empty() || depth > 32 {
            break;
        }
        let Ok(node) = document.get_object(node_id).and_then(Object::as_dict) else {
            break;
        };
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                inherited.push((key.to_vec(), value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }

    if let Ok(page) = document.get_object_mut(page_id).and_then(Object::as_dict_mut) {
        for (key, value) in inherited {
            page.set(key, value);
        }
    }
}
