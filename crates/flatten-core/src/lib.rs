//! Page flattening and document reassembly
//!
//! This crate is the output half of the markup pipeline: it takes the
//! annotations built by `markup-core`, burns them into a copy of the
//! target page, and rebuilds the containing document with that one page
//! substituted. Everything runs on `lopdf` over in-memory bytes.
//!
//! Concurrency contract: at most one [`flatten_and_replace`] per document
//! may be in flight at a time, and the editing session must not accept
//! input while it runs. That exclusion belongs to the caller (it owns the
//! document lifecycle); this crate guarantees only that a failed run
//! produces no output bytes, so the caller's original document is intact
//! either way. There is no cancellation mid-flatten and retrying with the
//! same inputs will fail the same way.

pub mod error;
pub mod extract;
pub mod flatten;
pub mod reassemble;

pub use error::FlattenError;
pub use extract::{extract_page, PageSnapshot};
pub use flatten::{flatten_page, MARKER_ALPHA};
pub use reassemble::replace_page;

use markup_core::Annotation;

/// Parse document bytes and return the page count.
pub fn get_page_count(bytes: &[u8]) -> Result<usize, FlattenError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| FlattenError::InvalidDocument(e.to_string()))?;
    Ok(doc.get_pages().len())
}

/// The commit pipeline: flatten the captured page, then rebuild the
/// document around it. All-or-nothing; on error the caller keeps its
/// original bytes and no partial output exists.
pub fn flatten_and_replace(
    document: &[u8],
    snapshot: &PageSnapshot,
    annotations: &[Annotation],
) -> Result<Vec<u8>, FlattenError> {
    let flattened = flatten_page(snapshot, annotations)?;
    replace_page(document, snapshot, &flattened)
}
