//! Single-page extraction
//!
//! Captures everything the flatten pipeline needs to know about the target
//! page at session start: its index, the document's page count, the page
//! size, a content fingerprint for live-index resolution later, and a
//! self-contained single-page document holding the original content.

use lopdf::{Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use markup_core::Size;

use crate::error::FlattenError;

/// Capture-time record of one page. The size and content are fixed here
/// and never recomputed mid-session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    /// Zero-based index the page had at capture time.
    pub index: usize,
    /// Page count of the source document at capture time.
    pub page_count: usize,
    /// Page size in points, from the (possibly inherited) MediaBox.
    pub size: Size,
    /// SHA-256 of the page's decompressed content stream, used to find the
    /// page again even if it has moved.
    pub fingerprint: [u8; 32],
    /// Self-contained single-page document with the original content.
    pub bytes: Vec<u8>,
}

/// Extract the page at `index` (zero-based) into a [`PageSnapshot`].
pub fn extract_page(document: &[u8], index: usize) -> Result<PageSnapshot, FlattenError> {
    let doc = Document::load_mem(document)
        .map_err(|e| FlattenError::InvalidDocument(format!("failed to parse document: {e}")))?;

    let pages = doc.get_pages();
    let page_count = pages.len();
    if index >= page_count {
        return Err(FlattenError::InvalidDocument(format!(
            "page index {index} out of range (document has {page_count} pages)"
        )));
    }

    let page_num = (index + 1) as u32;
    let page_id = *pages.get(&page_num).ok_or_else(|| {
        FlattenError::InvalidDocument(format!("page {page_num} missing from page tree"))
    })?;

    let size = page_size(&doc, page_id)?;
    let fingerprint = page_fingerprint(&doc, page_id)?;

    // Construction by deletion, same as splitting: clone the document,
    // drop every other page in reverse order, prune what became orphaned.
    let mut single = doc.clone();
    let mut to_delete: Vec<u32> = (1..=page_count as u32).filter(|n| *n != page_num).collect();
    to_delete.reverse();
    for n in to_delete {
        single.delete_pages(&[n]);
    }
    single.prune_objects();

    let mut bytes = Vec::new();
    single
        .save_to(&mut bytes)
        .map_err(|e| FlattenError::InvalidDocument(format!("failed to save page: {e}")))?;

    Ok(PageSnapshot {
        index,
        page_count,
        size,
        fingerprint,
        bytes,
    })
}

/// SHA-256 of the page's decompressed content stream.
pub(crate) fn page_fingerprint(
    doc: &Document,
    page_id: ObjectId,
) -> Result<[u8; 32], FlattenError> {
    let content = doc
        .get_page_content(page_id)
        .map_err(|e| FlattenError::InvalidDocument(format!("unreadable page content: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(hasher.finalize().into())
}

/// Look up a page attribute, following the `Parent` chain for inherited
/// values and resolving one level of indirection.
pub(crate) fn inherited_attr(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = page_id;
    loop {
        let dict = doc.get_object(current).ok()?.as_dict().ok()?;
        if let Ok(value) = dict.get(key) {
            return match value {
                Object::Reference(id) => doc.get_object(*id).ok().cloned(),
                other => Some(other.clone()),
            };
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => current = *parent,
            _ => return None,
        }
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(v) => Some(*v as f64),
        Object::Real(v) => Some(*v as f64),
        _ => None,
    }
}

fn page_size(doc: &Document, page_id: ObjectId) -> Result<Size, FlattenError> {
    let media_box = inherited_attr(doc, page_id, b"MediaBox")
        .ok_or_else(|| FlattenError::InvalidDocument("page has no MediaBox".into()))?;
    let Object::Array(values) = media_box else {
        return Err(FlattenError::InvalidDocument(
            "MediaBox is not an array".into(),
        ));
    };
    if values.len() != 4 {
        return Err(FlattenError::InvalidDocument(
            "MediaBox must have four entries".into(),
        ));
    }
    let coords: Vec<f64> = values.iter().filter_map(number).collect();
    if coords.len() != 4 {
        return Err(FlattenError::InvalidDocument(
            "MediaBox entries must be numbers".into(),
        ));
    }
    let width = coords[2] - coords[0];
    let height = coords[3] - coords[1];
    if width <= 0.0 || height <= 0.0 {
        return Err(FlattenError::InvalidDocument(
            "MediaBox has no area".into(),
        ));
    }
    Ok(Size::new(width, height))
}
