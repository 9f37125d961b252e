//! Document reassembly
//!
//! Rebuilds the full document with the flattened page substituted at
//! exactly one index. The output is a fresh document value: the caller's
//! original bytes are never mutated, and the flattened page's objects are
//! imported under remapped ids so no live object is ever shared between
//! two documents. The target index is re-resolved at call time by content
//! fingerprint, since other parts of an application may have reordered
//! pages since capture.

use lopdf::{Document, Object, ObjectId};
use tracing::{debug, warn};

use crate::error::FlattenError;
use crate::extract::{inherited_attr, page_fingerprint, PageSnapshot};

/// Page attributes that must survive reparenting. If the flattened page
/// inherited any of these from its own page tree, they are stamped onto
/// the page dictionary before the old parent disappears.
const INHERITABLE_KEYS: [&[u8]; 4] = [b"MediaBox", b"Resources", b"Rotate", b"CropBox"];

/// Replace one page of `document` with `flattened` (a single-page
/// document), returning the rebuilt document bytes.
pub fn replace_page(
    document: &[u8],
    snapshot: &PageSnapshot,
    flattened: &[u8],
) -> Result<Vec<u8>, FlattenError> {
    let original = Document::load_mem(document)
        .map_err(|e| FlattenError::InvalidDocument(format!("failed to parse document: {e}")))?;

    let pages = original.get_pages();
    let page_count = pages.len();
    if page_count != snapshot.page_count {
        return Err(FlattenError::InvalidDocument(format!(
            "page count changed since capture: {} then, {} now",
            snapshot.page_count, page_count
        )));
    }
    if snapshot.index >= page_count {
        return Err(FlattenError::InvalidDocument(format!(
            "target index {} out of range ({page_count} pages)",
            snapshot.index
        )));
    }

    let ordered: Vec<ObjectId> = pages.values().copied().collect();
    let target_index = resolve_live_index(&original, &ordered, snapshot);

    let overlay = Document::load_mem(flattened).map_err(|e| {
        FlattenError::InvalidDocument(format!("failed to parse flattened page: {e}"))
    })?;
    let overlay_pages = overlay.get_pages();
    if overlay_pages.len() != 1 {
        return Err(FlattenError::InvalidDocument(format!(
            "flattened page document holds {} pages, expected 1",
            overlay_pages.len()
        )));
    }
    let overlay_page_id = *overlay_pages
        .values()
        .next()
        .ok_or_else(|| FlattenError::InvalidDocument("empty flattened page tree".into()))?;

    // Inherited page attributes, captured before the overlay document is
    // consumed below.
    let inherited: Vec<(&[u8], Object)> = INHERITABLE_KEYS
        .iter()
        .filter_map(|key| inherited_attr(&overlay, overlay_page_id, key).map(|v| (*key, v)))
        .collect();

    // Fresh document value; the caller's bytes stay untouched either way.
    let mut dest = original.clone();
    let id_offset = dest.max_id;
    let overlay_max_id = overlay.max_id;
    for (old_id, object) in overlay.objects.into_iter() {
        let new_id = (old_id.0 + id_offset, old_id.1);
        dest.objects
            .insert(new_id, remap_object_refs(object, id_offset));
    }
    dest.max_id = id_offset + overlay_max_id;

    let new_page_id = (overlay_page_id.0 + id_offset, overlay_page_id.1);
    let mut page_refs = ordered;
    page_refs[target_index] = new_page_id;

    let pages_root = update_page_tree(&mut dest, page_refs)?;
    adopt_page(&mut dest, new_page_id, pages_root, &inherited, id_offset)?;

    dest.prune_objects();

    // No compress() here: recompressing streams would change the bytes of
    // pages this operation promises not to touch.
    let mut bytes = Vec::new();
    dest.save_to(&mut bytes)
        .map_err(|e| FlattenError::ReassemblyInvariant(format!("failed to save: {e}")))?;

    verify_rebuild(document, &bytes, target_index, page_count)?;
    Ok(bytes)
}

/// Find the target page's current position by content fingerprint. Falls
/// back to the captured index when no page matches.
fn resolve_live_index(doc: &Document, ordered: &[ObjectId], snapshot: &PageSnapshot) -> usize {
    let live = ordered.iter().position(|id| {
        page_fingerprint(doc, *id)
            .map(|f| f == snapshot.fingerprint)
            .unwrap_or(false)
    });
    match live {
        Some(index) => {
            if index != snapshot.index {
                debug!(
                    captured = snapshot.index,
                    live = index,
                    "target page moved since capture"
                );
            }
            index
        }
        None => {
            warn!(
                captured = snapshot.index,
                "live page resolution failed, using captured index"
            );
            snapshot.index
        }
    }
}

/// Recursively remap object references by `offset`.
fn remap_object_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference((id.0 + offset, id.1)),
        Object::Array(arr) => Object::Array(
            arr.into_iter()
                .map(|o| remap_object_refs(o, offset))
                .collect(),
        ),
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap_object_refs(value.clone(), offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap_object_refs(value.clone(), offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}

/// Point the catalog's page tree at `page_refs`, returning the Pages node.
fn update_page_tree(
    doc: &mut Document,
    page_refs: Vec<ObjectId>,
) -> Result<ObjectId, FlattenError> {
    let root_obj = doc
        .trailer
        .get(b"Root")
        .map_err(|_| FlattenError::InvalidDocument("no Root in trailer".into()))?;
    let catalog_id = root_obj
        .as_reference()
        .map_err(|_| FlattenError::InvalidDocument("Root is not a reference".into()))?;

    let catalog = doc
        .objects
        .get(&catalog_id)
        .ok_or_else(|| FlattenError::InvalidDocument("catalog not found".into()))?
        .as_dict()
        .map_err(|_| FlattenError::InvalidDocument("invalid catalog".into()))?;

    let pages_id = catalog
        .get(b"Pages")
        .map_err(|_| FlattenError::InvalidDocument("no Pages in catalog".into()))?
        .as_reference()
        .map_err(|_| FlattenError::InvalidDocument("Pages is not a reference".into()))?;

    if let Some(Object::Dictionary(ref mut pages_dict)) = doc.objects.get_mut(&pages_id) {
        let kids = page_refs
            .iter()
            .map(|&id| Object::Reference(id))
            .collect::<Vec<_>>();
        pages_dict.set("Kids", Object::Array(kids));
        pages_dict.set("Count", Object::Integer(page_refs.len() as i64));
        Ok(pages_id)
    } else {
        Err(FlattenError::InvalidDocument(
            "invalid pages dictionary".into(),
        ))
    }
}

/// Reparent the inserted page and stamp attributes it used to inherit.
fn adopt_page(
    doc: &mut Document,
    page_id: ObjectId,
    pages_root: ObjectId,
    inherited: &[(&[u8], Object)],
    id_offset: u32,
) -> Result<(), FlattenError> {
    let page = doc
        .get_object_mut(page_id)
        .map_err(|e| FlattenError::InvalidDocument(e.to_string()))?;
    let Object::Dictionary(ref mut page_dict) = page else {
        return Err(FlattenError::InvalidDocument(
            "flattened page is not a dictionary".into(),
        ));
    };
    page_dict.set("Parent", Object::Reference(pages_root));
    for (key, value) in inherited {
        if page_dict.get(key).is_err() {
            // The value came from the overlay document, so any references
            // inside it need the same remap as its objects.
            page_dict.set(*key, remap_object_refs(value.clone(), id_offset));
        }
    }
    Ok(())
}

/// Postcondition check on the serialized output: page count unchanged and
/// every non-target page's content identical to the input.
fn verify_rebuild(
    original: &[u8],
    rebuilt: &[u8],
    target_index: usize,
    expected_count: usize,
) -> Result<(), FlattenError> {
    let before = Document::load_mem(original)
        .map_err(|e| FlattenError::ReassemblyInvariant(format!("input reload failed: {e}")))?;
    let after = Document::load_mem(rebuilt)
        .map_err(|e| FlattenError::ReassemblyInvariant(format!("output reload failed: {e}")))?;

    let before_pages: Vec<ObjectId> = before.get_pages().values().copied().collect();
    let after_pages: Vec<ObjectId> = after.get_pages().values().copied().collect();

    if after_pages.len() != expected_count {
        return Err(FlattenError::ReassemblyInvariant(format!(
            "page count {} after rebuild, expected {expected_count}",
            after_pages.len()
        )));
    }

    for (index, (b, a)) in before_pages.iter().zip(after_pages.iter()).enumerate() {
        if index == target_index {
            continue;
        }
        let fp_before = page_fingerprint(&before, *b)?;
        let fp_after = page_fingerprint(&after, *a)?;
        if fp_before != fp_after {
            return Err(FlattenError::ReassemblyInvariant(format!(
                "page {index} content changed during rebuild"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_page;
    use crate::flatten::flatten_page;
    use crate::test_fixtures::{create_test_pdf, ink_annotation, reorder_first_pages};
    use markup_core::ToolKind;

    fn page_text(doc: &Document, index: usize) -> String {
        let page_id = *doc.get_pages().values().nth(index).unwrap();
        String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).into_owned()
    }

    /// Whether the page at `index` paints a stroke.
    fn has_stroke(doc: &Document, index: usize) -> bool {
        let page_id = *doc.get_pages().values().nth(index).unwrap();
        let content = doc.get_page_content(page_id).unwrap();
        lopdf::content::Content::decode(&content)
            .unwrap()
            .operations
            .iter()
            .any(|op| op.operator == "S")
    }

    #[test]
    fn test_replace_preserves_count_and_other_pages() {
        let pdf = create_test_pdf(10, "Doc");
        let snapshot = extract_page(&pdf, 4).unwrap();
        let flattened = flatten_page(&snapshot, &[ink_annotation(ToolKind::Pen)]).unwrap();

        let rebuilt = replace_page(&pdf, &snapshot, &flattened).unwrap();

        let before = Document::load_mem(&pdf).unwrap();
        let after = Document::load_mem(&rebuilt).unwrap();
        assert_eq!(after.get_pages().len(), 10);

        for index in 0..10 {
            if index == 4 {
                continue;
            }
            let b = *before.get_pages().values().nth(index).unwrap();
            let a = *after.get_pages().values().nth(index).unwrap();
            assert_eq!(
                page_fingerprint(&before, b).unwrap(),
                page_fingerprint(&after, a).unwrap(),
                "page {index} changed"
            );
        }
    }

    #[test]
    fn test_replaced_page_carries_overlay() {
        let pdf = create_test_pdf(3, "Doc");
        let snapshot = extract_page(&pdf, 1).unwrap();
        let flattened = flatten_page(&snapshot, &[ink_annotation(ToolKind::Pen)]).unwrap();

        let rebuilt = replace_page(&pdf, &snapshot, &flattened).unwrap();
        let after = Document::load_mem(&rebuilt).unwrap();

        let content = page_text(&after, 1);
        assert!(content.contains("Doc-Page-2"), "original content kept");
        assert!(has_stroke(&after, 1), "overlay stroke present");
    }

    #[test]
    fn test_live_index_resolution_follows_moved_page() {
        let pdf = create_test_pdf(4, "Doc");
        let snapshot = extract_page(&pdf, 1).unwrap();
        let flattened = flatten_page(&snapshot, &[ink_annotation(ToolKind::Pen)]).unwrap();

        // Another editor swapped pages 1 and 2 after capture.
        let reordered = reorder_first_pages(&pdf);
        let rebuilt = replace_page(&reordered, &snapshot, &flattened).unwrap();
        let after = Document::load_mem(&rebuilt).unwrap();

        // The captured page (Doc-Page-2) now lives at index 0 and must be
        // the one that got the overlay.
        assert!(page_text(&after, 0).contains("Doc-Page-2"));
        assert!(has_stroke(&after, 0));
        assert!(page_text(&after, 1).contains("Doc-Page-1"));
        assert!(!has_stroke(&after, 1));
    }

    #[test]
    fn test_fallback_to_captured_index_when_unresolvable() {
        let pdf = create_test_pdf(3, "Doc");
        let mut snapshot = extract_page(&pdf, 2).unwrap();
        let flattened = flatten_page(&snapshot, &[ink_annotation(ToolKind::Pen)]).unwrap();

        // Fingerprint that matches nothing.
        snapshot.fingerprint = [0xAB; 32];

        let rebuilt = replace_page(&pdf, &snapshot, &flattened).unwrap();
        let after = Document::load_mem(&rebuilt).unwrap();
        assert_eq!(after.get_pages().len(), 3);
        assert!(has_stroke(&after, 2));
    }

    #[test]
    fn test_page_count_change_is_hard_failure() {
        let pdf = create_test_pdf(5, "Doc");
        let snapshot = extract_page(&pdf, 1).unwrap();
        let flattened = flatten_page(&snapshot, &[ink_annotation(ToolKind::Pen)]).unwrap();

        // A page was deleted elsewhere mid-edit.
        let mut shrunk = Document::load_mem(&pdf).unwrap();
        shrunk.delete_pages(&[5]);
        shrunk.prune_objects();
        let mut shrunk_bytes = Vec::new();
        shrunk.save_to(&mut shrunk_bytes).unwrap();

        let err = replace_page(&shrunk_bytes, &snapshot, &flattened).unwrap_err();
        assert!(matches!(err, FlattenError::InvalidDocument(_)));
    }

    #[test]
    fn test_multi_page_flattened_input_rejected() {
        let pdf = create_test_pdf(3, "Doc");
        let snapshot = extract_page(&pdf, 0).unwrap();
        let two_pages = create_test_pdf(2, "Bad");

        let err = replace_page(&pdf, &snapshot, &two_pages).unwrap_err();
        assert!(matches!(err, FlattenError::InvalidDocument(_)));
    }

    #[test]
    fn test_original_bytes_are_untouched() {
        let pdf = create_test_pdf(3, "Doc");
        let copy = pdf.clone();
        let snapshot = extract_page(&pdf, 0).unwrap();
        let flattened = flatten_page(&snapshot, &[ink_annotation(ToolKind::Pen)]).unwrap();

        let _ = replace_page(&pdf, &snapshot, &flattened).unwrap();
        assert_eq!(pdf, copy);
    }

    #[test]
    fn test_rebuilt_document_loads_cleanly() {
        let pdf = create_test_pdf(2, "Doc");
        let snapshot = extract_page(&pdf, 1).unwrap();
        let flattened = flatten_page(&snapshot, &[ink_annotation(ToolKind::Marker)]).unwrap();

        let rebuilt = replace_page(&pdf, &snapshot, &flattened).unwrap();
        let doc = Document::load_mem(&rebuilt).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }
}
