//! Annotation building
//!
//! Converts committed strokes and text entries into annotations whose
//! geometry is stored relative to the bounds origin. Keeping the content
//! bounds-relative means a recomputed or outset bounds rectangle can never
//! shift the ink itself.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::GeometryError;
use crate::geometry::{Color, PageRect, RelPoint};
use crate::stroke::{Stroke, StrokeStyle};
use crate::text::TextEntry;

/// Extra slack added around ink bounds beyond the half stroke width, so
/// round line caps are never clipped.
const BOUNDS_PADDING: f64 = 1.0;

/// A captured item awaiting conversion, in page space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MarkupItem {
    Ink(Stroke),
    Text(TextEntry),
}

impl MarkupItem {
    pub fn id(&self) -> u64 {
        match self {
            MarkupItem::Ink(stroke) => stroke.id,
            MarkupItem::Text(entry) => entry.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnnotationKind {
    Ink {
        /// Offsets from the bounds origin, in capture order.
        points: Vec<RelPoint>,
        style: StrokeStyle,
    },
    Text {
        text: String,
        font_size: f64,
        color: Color,
    },
}

/// A flatten-ready annotation: page-space bounds plus bounds-relative
/// content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub bounds: PageRect,
    pub kind: AnnotationKind,
}

/// Build a single annotation, rejecting degenerate geometry.
pub fn build_annotation(item: &MarkupItem) -> Result<Annotation, GeometryError> {
    match item {
        MarkupItem::Ink(stroke) => build_ink(stroke),
        MarkupItem::Text(entry) => build_text(entry),
    }
}

/// Build annotations in creation order, dropping degenerate items. The
/// drop is logged and absorbed here; geometry errors never reach the
/// flatten pipeline.
pub fn build_annotations(items: &[MarkupItem]) -> Vec<Annotation> {
    items
        .iter()
        .filter_map(|item| match build_annotation(item) {
            Ok(annotation) => Some(annotation),
            Err(err) => {
                warn!(item_id = item.id(), %err, "dropping degenerate markup item");
                None
            }
        })
        .collect()
}

fn build_ink(stroke: &Stroke) -> Result<Annotation, GeometryError> {
    if stroke.points.len() < 2 {
        return Err(GeometryError::TooFewPoints {
            expected: 2,
            actual: stroke.points.len(),
        });
    }
    if stroke.points.iter().any(|p| !p.is_finite()) || !stroke.style.width.is_finite() {
        return Err(GeometryError::NonFinite("stroke"));
    }

    let hull = PageRect::bounding(&stroke.points)
        .ok_or(GeometryError::DegenerateBounds("empty stroke"))?;
    let bounds = hull.outset(stroke.style.width / 2.0 + BOUNDS_PADDING);
    if bounds.width <= 0.0 || bounds.height <= 0.0 {
        return Err(GeometryError::DegenerateBounds("zero-area ink bounds"));
    }

    let points = stroke
        .points
        .iter()
        .map(|p| RelPoint::new(p.x - bounds.x, p.y - bounds.y))
        .collect();

    Ok(Annotation {
        bounds,
        kind: AnnotationKind::Ink {
            points,
            style: stroke.style,
        },
    })
}

fn build_text(entry: &TextEntry) -> Result<Annotation, GeometryError> {
    if !entry.anchor.is_finite() || !entry.font_size.is_finite() {
        return Err(GeometryError::NonFinite("text entry"));
    }
    let size = entry.measured_size();
    let bounds = PageRect::new(entry.anchor.x, entry.anchor.y, size.width, size.height);
    if bounds.width <= 0.0 || bounds.height <= 0.0 || !bounds.is_finite() {
        return Err(GeometryError::DegenerateBounds("zero-area text bounds"));
    }

    Ok(Annotation {
        bounds,
        kind: AnnotationKind::Text {
            text: entry.text.clone(),
            font_size: entry.font_size,
            color: entry.color,
        },
    })
}
