//! Page flattening
//!
//! Burns annotations into the page's static content. The original content
//! is wrapped in `q`/`Q` so whatever graphics state it leaves behind cannot
//! leak into the overlay, then a single overlay stream draws every
//! annotation in creation order. Each annotation translates the coordinate
//! system to its bounds origin before emitting its bounds-relative content,
//! reversing the relative encoding exactly once.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use markup_core::{Annotation, AnnotationKind, Color, PageRect, RelPoint, StrokeStyle, ToolKind};

use crate::error::FlattenError;
use crate::extract::{inherited_attr, PageSnapshot};

/// Effective opacity of marker strokes. Combined with multiply blending it
/// keeps underlying text legible.
pub const MARKER_ALPHA: f32 = 0.3;

/// Baseline sits this fraction of an em above the text box bottom,
/// approximating the Helvetica descent.
const BASELINE_FACTOR: f64 = 0.2;

const GS_MARKER: &[u8] = b"GSmark";
const FONT_MARKUP: &[u8] = b"Fmark";

/// Render annotations on top of the snapshot's original content, producing
/// a new self-contained single-page document. Any failure aborts the whole
/// flatten; a partially drawn page is never emitted.
pub fn flatten_page(
    snapshot: &PageSnapshot,
    annotations: &[Annotation],
) -> Result<Vec<u8>, FlattenError> {
    if annotations.is_empty() {
        // Nothing to burn in; the original page passes through untouched.
        return Ok(snapshot.bytes.clone());
    }

    let mut doc = Document::load_mem(&snapshot.bytes)
        .map_err(|e| FlattenError::FlattenFailure(format!("failed to open page: {e}")))?;

    let pages = doc.get_pages();
    if pages.len() != 1 {
        return Err(FlattenError::FlattenFailure(format!(
            "page snapshot holds {} pages, expected 1",
            pages.len()
        )));
    }
    let page_id = *pages
        .values()
        .next()
        .ok_or_else(|| FlattenError::FlattenFailure("empty page tree".into()))?;

    let needs_marker = annotations.iter().any(|a| {
        matches!(
            &a.kind,
            AnnotationKind::Ink { style, .. } if style.tool == ToolKind::Marker
        )
    });
    let needs_font = annotations
        .iter()
        .any(|a| matches!(&a.kind, AnnotationKind::Text { .. }));

    let overlay = overlay_content(annotations)?;

    let marker_gs = needs_marker.then(|| {
        doc.add_object(dictionary! {
            "Type" => "ExtGState",
            "ca" => MARKER_ALPHA,
            "CA" => MARKER_ALPHA,
            "BM" => "Multiply",
        })
    });
    let font = needs_font.then(|| {
        doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        })
    });

    register_markup_resources(&mut doc, page_id, marker_gs, font)?;
    wrap_page_contents(&mut doc, page_id, overlay)?;

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| FlattenError::FlattenFailure(format!("failed to save page: {e}")))?;
    Ok(bytes)
}

/// Build the overlay content stream. Opens with `Q` to close the save
/// prepended ahead of the original content.
fn overlay_content(annotations: &[Annotation]) -> Result<Vec<u8>, FlattenError> {
    let mut ops = vec![Operation::new("Q", vec![])];
    for annotation in annotations {
        match &annotation.kind {
            AnnotationKind::Ink { points, style } => {
                ink_ops(&mut ops, &annotation.bounds, points, style);
            }
            AnnotationKind::Text {
                text,
                font_size,
                color,
            } => {
                text_ops(&mut ops, &annotation.bounds, text, *font_size, *color);
            }
        }
    }
    Content { operations: ops }
        .encode()
        .map_err(|e| FlattenError::FlattenFailure(format!("failed to encode overlay: {e}")))
}

fn translate_ops(ops: &mut Vec<Operation>, bounds: &PageRect) {
    ops.push(Operation::new(
        "cm",
        vec![
            Object::Real(1.0),
            Object::Real(0.0),
            Object::Real(0.0),
            Object::Real(1.0),
            Object::Real(bounds.x as f32),
            Object::Real(bounds.y as f32),
        ],
    ));
}

fn ink_ops(ops: &mut Vec<Operation>, bounds: &PageRect, points: &[RelPoint], style: &StrokeStyle) {
    ops.push(Operation::new("q", vec![]));
    if style.tool == ToolKind::Marker {
        ops.push(Operation::new(
            "gs",
            vec![Object::Name(GS_MARKER.to_vec())],
        ));
    }
    translate_ops(ops, bounds);

    let (r, g, b, _) = style.color.to_normalized();
    ops.push(Operation::new(
        "RG",
        vec![Object::Real(r), Object::Real(g), Object::Real(b)],
    ));
    ops.push(Operation::new("w", vec![Object::Real(style.width as f32)]));
    // Round caps and joins; freehand ink looks wrong with butt caps.
    ops.push(Operation::new("J", vec![Object::Integer(1)]));
    ops.push(Operation::new("j", vec![Object::Integer(1)]));

    let mut iter = points.iter();
    if let Some(first) = iter.next() {
        ops.push(Operation::new(
            "m",
            vec![Object::Real(first.x as f32), Object::Real(first.y as f32)],
        ));
    }
    for p in iter {
        ops.push(Operation::new(
            "l",
            vec![Object::Real(p.x as f32), Object::Real(p.y as f32)],
        ));
    }
    ops.push(Operation::new("S", vec![]));
    ops.push(Operation::new("Q", vec![]));
}

fn text_ops(ops: &mut Vec<Operation>, bounds: &PageRect, text: &str, font_size: f64, color: Color) {
    ops.push(Operation::new("q", vec![]));
    translate_ops(ops, bounds);

    let (r, g, b, _) = color.to_normalized();
    ops.push(Operation::new(
        "rg",
        vec![Object::Real(r), Object::Real(g), Object::Real(b)],
    ));
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new(
        "Tf",
        vec![
            Object::Name(FONT_MARKUP.to_vec()),
            Object::Real(font_size as f32),
        ],
    ));
    ops.push(Operation::new(
        "Td",
        vec![
            Object::Real(0.0),
            Object::Real((font_size * BASELINE_FACTOR) as f32),
        ],
    ));
    ops.push(Operation::new(
        "Tj",
        vec![Object::String(
            text.as_bytes().to_vec(),
            lopdf::StringFormat::Literal,
        )],
    ));
    ops.push(Operation::new("ET", vec![]));
    ops.push(Operation::new("Q", vec![]));
}

/// Merge the markup resources into the page's resource dictionary. The
/// merged dictionary is written inline on the page, shadowing an inherited
/// one with a copy that includes its entries.
fn register_markup_resources(
    doc: &mut Document,
    page_id: ObjectId,
    marker_gs: Option<ObjectId>,
    font: Option<ObjectId>,
) -> Result<(), FlattenError> {
    if marker_gs.is_none() && font.is_none() {
        return Ok(());
    }

    let mut resources = match inherited_attr(doc, page_id, b"Resources") {
        Some(Object::Dictionary(dict)) => dict,
        Some(_) => {
            return Err(FlattenError::FlattenFailure(
                "page resources are not a dictionary".into(),
            ))
        }
        None => Dictionary::new(),
    };

    if let Some(gs_id) = marker_gs {
        let mut states = resource_subdict(doc, &resources, b"ExtGState")?;
        states.set(GS_MARKER, Object::Reference(gs_id));
        resources.set("ExtGState", Object::Dictionary(states));
    }
    if let Some(font_id) = font {
        let mut fonts = resource_subdict(doc, &resources, b"Font")?;
        fonts.set(FONT_MARKUP, Object::Reference(font_id));
        resources.set("Font", Object::Dictionary(fonts));
    }

    let page = doc
        .get_object_mut(page_id)
        .map_err(|e| FlattenError::FlattenFailure(e.to_string()))?;
    if let Object::Dictionary(ref mut page_dict) = page {
        page_dict.set("Resources", Object::Dictionary(resources));
        Ok(())
    } else {
        Err(FlattenError::FlattenFailure(
            "page object is not a dictionary".into(),
        ))
    }
}

fn resource_subdict(
    doc: &Document,
    resources: &Dictionary,
    key: &[u8],
) -> Result<Dictionary, FlattenError> {
    match resources.get(key) {
        Ok(Object::Dictionary(dict)) => Ok(dict.clone()),
        Ok(Object::Reference(id)) => doc
            .get_object(*id)
            .ok()
            .and_then(|obj| obj.as_dict().ok())
            .cloned()
            .ok_or_else(|| {
                FlattenError::FlattenFailure(format!(
                    "broken resource reference for {}",
                    String::from_utf8_lossy(key)
                ))
            }),
        Ok(_) => Err(FlattenError::FlattenFailure(format!(
            "resource entry {} is not a dictionary",
            String::from_utf8_lossy(key)
        ))),
        Err(_) => Ok(Dictionary::new()),
    }
}

/// Rebuild the page's Contents as `[q, ...original, overlay]` where the
/// overlay stream begins with the matching `Q`.
fn wrap_page_contents(
    doc: &mut Document,
    page_id: ObjectId,
    overlay: Vec<u8>,
) -> Result<(), FlattenError> {
    let existing: Vec<ObjectId> = {
        let page = doc
            .get_object(page_id)
            .map_err(|e| FlattenError::FlattenFailure(e.to_string()))?;
        let dict = page
            .as_dict()
            .map_err(|e| FlattenError::FlattenFailure(e.to_string()))?;
        match dict.get(b"Contents") {
            Ok(Object::Reference(id)) => vec![*id],
            Ok(Object::Array(arr)) => arr
                .iter()
                .filter_map(|obj| obj.as_reference().ok())
                .collect(),
            Ok(_) => {
                return Err(FlattenError::FlattenFailure(
                    "unsupported page contents layout".into(),
                ))
            }
            Err(_) => Vec::new(),
        }
    };

    let save_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let overlay_id = doc.add_object(Stream::new(Dictionary::new(), overlay));

    let mut contents = vec![Object::Reference(save_id)];
    contents.extend(existing.into_iter().map(Object::Reference));
    contents.push(Object::Reference(overlay_id));

    let page = doc
        .get_object_mut(page_id)
        .map_err(|e| FlattenError::FlattenFailure(e.to_string()))?;
    if let Object::Dictionary(ref mut page_dict) = page {
        page_dict.set("Contents", Object::Array(contents));
        Ok(())
    } else {
        Err(FlattenError::FlattenFailure(
            "page object is not a dictionary".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_page;
    use crate::test_fixtures::{create_test_pdf, ink_annotation, text_annotation};
    use markup_core::{build_annotation, MarkupItem, PagePoint, Stroke};
    use pretty_assertions::assert_eq;

    fn snapshot() -> PageSnapshot {
        let pdf = create_test_pdf(1, "Flat");
        extract_page(&pdf, 0).unwrap()
    }

    /// Decode the full page content into a flat operation list.
    fn page_ops(bytes: &[u8]) -> Vec<Operation> {
        let doc = Document::load_mem(bytes).unwrap();
        let page_id = *doc.get_pages().get(&1).unwrap();
        let content = doc.get_page_content(page_id).unwrap();
        Content::decode(&content).unwrap().operations
    }

    fn op_index(ops: &[Operation], operator: &str) -> Option<usize> {
        ops.iter().position(|op| op.operator == operator)
    }

    #[test]
    fn test_no_annotations_returns_original_bytes() {
        let snap = snapshot();
        let out = flatten_page(&snap, &[]).unwrap();
        assert_eq!(out, snap.bytes);
    }

    #[test]
    fn test_pen_stroke_draws_after_original_content() {
        let snap = snapshot();
        let out = flatten_page(&snap, &[ink_annotation(ToolKind::Pen)]).unwrap();

        let ops = page_ops(&out);
        let original = op_index(&ops, "Tj").expect("original content kept");
        let stroke = op_index(&ops, "S").expect("stroke painted");
        assert!(stroke > original, "overlay must draw on top");
        assert!(op_index(&ops, "gs").is_none(), "pen must not use an ExtGState");
    }

    #[test]
    fn test_marker_stroke_uses_multiply_gstate() {
        let snap = snapshot();
        let out = flatten_page(&snap, &[ink_annotation(ToolKind::Marker)]).unwrap();

        let ops = page_ops(&out);
        let gs = op_index(&ops, "gs").expect("marker uses an ExtGState");
        assert_eq!(ops[gs].operands, vec![Object::Name(b"GSmark".to_vec())]);

        // The registered graphics state must carry the reduced alpha and
        // multiply blend mode.
        let doc = Document::load_mem(&out).unwrap();
        let gstate = doc
            .objects
            .values()
            .filter_map(|obj| obj.as_dict().ok())
            .find(|dict| dict.get(b"BM").is_ok())
            .expect("ExtGState registered");
        assert_eq!(gstate.get(b"BM").unwrap(), &Object::Name(b"Multiply".to_vec()));
        match gstate.get(b"ca").unwrap() {
            Object::Real(alpha) => assert!((alpha - MARKER_ALPHA).abs() < 1e-6),
            other => panic!("unexpected ca: {other:?}"),
        }
    }

    #[test]
    fn test_overlay_translates_by_bounds_origin() {
        let snap = snapshot();
        let stroke = Stroke {
            id: 0,
            points: vec![PagePoint::new(100.0, 100.0), PagePoint::new(200.0, 150.0)],
            style: Default::default(),
        };
        let annotation = build_annotation(&MarkupItem::Ink(stroke)).unwrap();
        let out = flatten_page(&snap, &[annotation.clone()]).unwrap();

        let ops = page_ops(&out);
        // cm carries the bounds origin; path points are bounds-relative.
        let cm = op_index(&ops, "cm").expect("translate emitted");
        assert_eq!(
            ops[cm].operands[4],
            Object::Real(annotation.bounds.x as f32)
        );
        assert_eq!(
            ops[cm].operands[5],
            Object::Real(annotation.bounds.y as f32)
        );
        let m = op_index(&ops, "m").expect("path start emitted");
        assert_eq!(ops[m].operands, vec![Object::Real(2.0), Object::Real(2.0)]);
    }

    #[test]
    fn test_text_annotation_registers_font() {
        let snap = snapshot();
        let out = flatten_page(&snap, &[text_annotation("hello note")]).unwrap();

        let ops = page_ops(&out);
        let tf = ops
            .iter()
            .find(|op| {
                op.operator == "Tf" && op.operands[0] == Object::Name(b"Fmark".to_vec())
            })
            .expect("markup font selected");
        assert_eq!(tf.operands[1], Object::Real(14.0));
        assert!(ops.iter().any(|op| {
            op.operator == "Tj"
                && op.operands[0]
                    == Object::String(b"hello note".to_vec(), lopdf::StringFormat::Literal)
        }));

        let doc = Document::load_mem(&out).unwrap();
        let font = doc
            .objects
            .values()
            .filter_map(|obj| obj.as_dict().ok())
            .find(|dict| dict.get(b"BaseFont").is_ok())
            .expect("font registered");
        assert_eq!(
            font.get(b"BaseFont").unwrap(),
            &Object::Name(b"Helvetica".to_vec())
        );
    }

    #[test]
    fn test_annotations_draw_in_creation_order() {
        let snap = snapshot();
        let out = flatten_page(
            &snap,
            &[ink_annotation(ToolKind::Pen), text_annotation("after ink")],
        )
        .unwrap();

        let ops = page_ops(&out);
        let stroke = op_index(&ops, "S").expect("stroke painted");
        let text = ops
            .iter()
            .position(|op| {
                op.operator == "Tj"
                    && op.operands[0]
                        == Object::String(b"after ink".to_vec(), lopdf::StringFormat::Literal)
            })
            .expect("text painted");
        assert!(stroke < text);
    }

    #[test]
    fn test_flattened_page_is_still_single_page() {
        let snap = snapshot();
        let out = flatten_page(&snap, &[ink_annotation(ToolKind::Pen)]).unwrap();
        let doc = Document::load_mem(&out).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn test_unreadable_snapshot_fails_without_output() {
        let snap = PageSnapshot {
            index: 0,
            page_count: 1,
            size: markup_core::Size::letter(),
            fingerprint: [0; 32],
            bytes: b"garbage".to_vec(),
        };
        let err = flatten_page(&snap, &[ink_annotation(ToolKind::Pen)]).unwrap_err();
        assert!(matches!(err, FlattenError::FlattenFailure(_)));
    }
}
