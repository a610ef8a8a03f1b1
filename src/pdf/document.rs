use std::path::Path;

use log::debug;
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};

use crate::error::{Result, TocError};

/// Attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// US Letter, used when a page carries no usable MediaBox.
const FALLBACK_PAGE_SIZE: (f32, f32) = (612.0, 792.0);

pub struct PdfDocument {
    pub doc: Document,
}

impl PdfDocument {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes)?;
        Ok(PdfDocument { doc })
    }

    pub fn page_count(&self) -> u32 {
        self.doc.get_pages().len() as u32
    }

    /// Get 1-indexed page object IDs
    pub fn page_ids(&self) -> Vec<(u32, ObjectId)> {
        // BTreeMap iteration is already ordered by page number
        self.doc.get_pages().into_iter().collect()
    }

    /// Width and height of a page's MediaBox, following inheritance.
    pub fn page_size(&self, page_id: ObjectId) -> (f32, f32) {
        page_size(&self.doc, page_id)
    }

    /// Size used for every generated page: the second page when there is one, since
    /// covers are often sized differently from the body.
    pub fn reference_page_size(&self) -> Result<(f32, f32)> {
        let pages = self.page_ids();
        let (_, id) = pages
            .get(1)
            .or_else(|| pages.first())
            .ok_or_else(|| TocError::input("Document has no pages"))?;
        let (width, height) = self.page_size(*id);
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(TocError::input(format!(
                "Reference page has unusable size {}x{}",
                width, height
            )));
        }
        Ok((width, height))
    }

    /// Insert new page dictionaries before the zero-based `at` index.
    ///
    /// The page tree is flattened into the root Pages node first. Inherited attributes
    /// are copied onto each existing page so nothing is lost when intermediate nodes go.
    pub fn insert_pages(&mut self, at: usize, pages: Vec<Dictionary>) -> Result<Vec<ObjectId>> {
        let existing: Vec<ObjectId> = self.page_ids().into_iter().map(|(_, id)| id).collect();
        let root_id = self.doc.trailer.get(b"Root")?.as_reference()?;
        let pages_id = self
            .doc
            .get_object(root_id)?
            .as_dict()?
            .get(b"Pages")?
            .as_reference()?;

        for &page_id in &existing {
            let copied: Vec<(&[u8], Object)> = INHERITABLE
                .iter()
                .filter_map(|key| inherited(&self.doc, page_id, key).map(|value| (*key, value)))
                .collect();
            let page = self.doc.get_object_mut(page_id)?.as_dict_mut()?;
            for (key, value) in copied {
                if !page.has(key) {
                    page.set(key, value);
                }
            }
            page.set("Parent", Object::Reference(pages_id));
        }

        let at = at.min(existing.len());
        let mut new_ids = Vec::with_capacity(pages.len());
        for mut page in pages {
            page.set("Type", "Page");
            page.set("Parent", Object::Reference(pages_id));
            new_ids.push(self.doc.add_object(page));
        }

        let kids: Vec<Object> = existing[..at]
            .iter()
            .chain(new_ids.iter())
            .chain(existing[at..].iter())
            .map(|id| Object::Reference(*id))
            .collect();
        let count = kids.len() as i64;

        let pages_dict = self.doc.get_object_mut(pages_id)?.as_dict_mut()?;
        pages_dict.set("Kids", Object::Array(kids));
        pages_dict.set("Count", count);
        for key in INHERITABLE {
            pages_dict.remove(key);
        }

        debug!("Inserted {} page(s) at index {}", new_ids.len(), at);
        Ok(new_ids)
    }

    /// Serialize, dropping objects no longer reachable from the trailer.
    pub fn save_to_bytes(&mut self) -> Result<Vec<u8>> {
        self.doc.prune_objects();
        let mut bytes = Vec::new();
        self.doc.save_to(&mut bytes)?;
        Ok(bytes)
    }
}

/// Look `key` up on the page, then on each ancestor Pages node.
pub(crate) fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc.get_dictionary(page_id).ok();
    // bounded walk in case of a Parent cycle
    for _ in 0..64 {
        let dict = current?;
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        current = dict
            .get(b"Parent")
            .and_then(Object::as_reference)
            .and_then(|parent| doc.get_dictionary(parent))
            .ok();
    }
    None
}

pub(crate) fn page_size(doc: &Document, page_id: ObjectId) -> (f32, f32) {
    inherited(doc, page_id, b"MediaBox")
        .and_then(|media_box| media_box_size(doc, &media_box))
        .unwrap_or(FALLBACK_PAGE_SIZE)
}

pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn media_box_size(doc: &Document, media_box: &Object) -> Option<(f32, f32)> {
    let values: Vec<f32> = resolve(doc, media_box)?
        .as_array()
        .ok()?
        .iter()
        .filter_map(|v| resolve(doc, v)?.as_float().ok())
        .collect();
    match values.as_slice() {
        [x0, y0, x1, y1] => Some(((x1 - x0).abs(), (y1 - y0).abs())),
        _ => None,
    }
}

/// A text string in UTF-16BE with byte order mark, as used for titles and labels.
pub fn encode_text_string(text: &str) -> Object {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

pub fn decode_pdf_string(bytes: &[u8]) -> String {
    // Check for UTF-16 BOM
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let u16_chars: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect();
        String::from_utf16_lossy(&u16_chars)
    } else {
        // PDFDocEncoding / Latin-1 (simplified)
        bytes.iter().map(|&b| b as char).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{sample_pdf, sample_pdf_bytes};
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn test_from_bytes_and_page_ids() {
        let doc = PdfDocument::from_bytes(&sample_pdf_bytes(3)).unwrap();
        assert_eq!(doc.page_count(), 3);
        let numbers: Vec<u32> = doc.page_ids().iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_inherited_page_size() {
        let doc = PdfDocument { doc: sample_pdf(2) };
        assert_eq!(doc.reference_page_size().unwrap(), (595.0, 842.0));
    }

    #[test]
    fn test_insert_pages_keeps_order_and_inherited_attributes() {
        let mut doc = PdfDocument { doc: sample_pdf(3) };
        let original: Vec<ObjectId> = doc.page_ids().iter().map(|(_, id)| *id).collect();

        let new_ids = doc
            .insert_pages(
                1,
                vec![
                    dictionary! { "MediaBox" => vec![0.into(), 0.into(), 300.into(), 400.into()] },
                    dictionary! { "MediaBox" => vec![0.into(), 0.into(), 300.into(), 400.into()] },
                ],
            )
            .unwrap();

        let ids: Vec<ObjectId> = doc.page_ids().iter().map(|(_, id)| *id).collect();
        assert_eq!(
            ids,
            vec![original[0], new_ids[0], new_ids[1], original[1], original[2]]
        );
        // resources moved from the Pages node onto the original pages
        let first = doc.doc.get_dictionary(original[0]).unwrap();
        assert!(first.has(b"Resources"));
        assert_eq!(doc.page_size(original[2]), (595.0, 842.0));
        assert_eq!(doc.page_size(new_ids[0]), (300.0, 400.0));

        let bytes = doc.save_to_bytes().unwrap();
        let reloaded = PdfDocument::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.page_count(), 5);
    }

    #[test]
    fn test_insert_pages_past_end_appends() {
        let mut doc = PdfDocument { doc: sample_pdf(2) };
        let new_ids = doc.insert_pages(10, vec![Dictionary::new()]).unwrap();
        assert_eq!(doc.page_ids().last().map(|(_, id)| *id), Some(new_ids[0]));
    }

    #[test]
    fn test_text_string_round_trip() {
        let Object::String(bytes, _) = encode_text_string("目录 Intro") else {
            panic!("expected a string");
        };
        assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
        assert_eq!(decode_pdf_string(&bytes), "目录 Intro");
        assert_eq!(decode_pdf_string(b"Plain"), "Plain");
    }
}
