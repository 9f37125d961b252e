//! Editing session
//!
//! One `MarkupSession` per page per edit. The thread delivering input
//! events owns the session exclusively; the session holds every committed
//! stroke and text entry in memory until `finish` converts them into
//! annotations for the flatten pipeline.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::annotation::{build_annotations, Annotation, MarkupItem};
use crate::coords::Viewport;
use crate::geometry::{Color, InputPoint, PagePoint};
use crate::stroke::{Stroke, StrokeCapture, StrokeStyle, ToolKind};
use crate::text::TextBoard;

/// The currently selected tool, threaded through every capture call.
/// Deliberately not a process-wide singleton.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub tool: ToolKind,
    pub width: f64,
    pub color: Color,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            tool: ToolKind::Pen,
            width: 2.0,
            color: Color::BLACK,
        }
    }
}

impl ToolConfig {
    fn stroke_style(&self) -> StrokeStyle {
        StrokeStyle {
            tool: self.tool,
            width: self.width,
            color: self.color,
        }
    }
}

/// The ordered pointer event stream feeding stroke capture. Decouples the
/// engine from any particular gesture or event-loop model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Begin(InputPoint),
    Extend(InputPoint),
    End(InputPoint),
    Cancel,
}

/// In-memory editing state for a single page.
#[derive(Debug, Clone)]
pub struct MarkupSession {
    viewport: Viewport,
    capture: StrokeCapture,
    strokes: Vec<Stroke>,
    texts: TextBoard,
    next_id: u64,
}

impl MarkupSession {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            capture: StrokeCapture::new(),
            strokes: Vec::new(),
            texts: TextBoard::new(),
            next_id: 0,
        }
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn texts(&self) -> &TextBoard {
        &self.texts
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty() && self.texts.is_empty()
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Drive stroke capture from a raw pointer event. Events whose
    /// coordinates fail to transform are dropped; the session keeps going.
    pub fn handle_pointer(&mut self, event: PointerEvent, config: &ToolConfig) {
        match event {
            PointerEvent::Begin(p) => match self.viewport.to_page(p) {
                Ok(page) => self.capture.begin(page),
                Err(err) => warn!(%err, "dropping begin event"),
            },
            PointerEvent::Extend(p) => match self.viewport.to_page(p) {
                Ok(page) => self.capture.extend(page),
                Err(err) => warn!(%err, "dropping extend event"),
            },
            PointerEvent::End(p) => {
                let page = match self.viewport.to_page(p) {
                    Ok(page) => page,
                    Err(err) => {
                        // A lost end point must not leave the capture stuck
                        // mid-stroke.
                        warn!(%err, "dropping end event, cancelling stroke");
                        self.capture.cancel();
                        return;
                    }
                };
                if let Some(points) = self.capture.end(page) {
                    let id = self.alloc_id();
                    debug!(stroke_id = id, points = points.len(), "stroke committed");
                    self.strokes.push(Stroke {
                        id,
                        points,
                        style: config.stroke_style(),
                    });
                }
            }
            PointerEvent::Cancel => self.capture.cancel(),
        }
    }

    /// Remove a committed stroke by identity. Committed strokes are never
    /// edited in place.
    pub fn erase_stroke(&mut self, id: u64) -> bool {
        let before = self.strokes.len();
        self.strokes.retain(|s| s.id != id);
        self.strokes.len() != before
    }

    /// Place a text entry at a tap location, converting to page space
    /// immediately. Returns the entry id, or `None` when the location does
    /// not transform.
    pub fn place_text(
        &mut self,
        at: InputPoint,
        text: String,
        font_size: f64,
        config: &ToolConfig,
    ) -> Option<u64> {
        let anchor = match self.viewport.to_page(at) {
            Ok(anchor) => anchor,
            Err(err) => {
                warn!(%err, "dropping text placement");
                return None;
            }
        };
        let id = self.alloc_id();
        self.texts.place(
            id,
            text,
            anchor,
            config.color,
            font_size,
            self.viewport.page_size(),
        );
        Some(id)
    }

    pub fn select_text(&mut self, id: u64) -> bool {
        self.texts.select(id)
    }

    pub fn drag_text_to(&mut self, at: InputPoint) -> bool {
        match self.viewport.to_page(at) {
            Ok(anchor) => self.texts.drag_to(anchor, self.viewport.page_size()),
            Err(err) => {
                warn!(%err, "dropping text drag");
                false
            }
        }
    }

    pub fn step_text_size(&mut self, steps: i32) -> bool {
        self.texts.step_font_size(steps, self.viewport.page_size())
    }

    pub fn delete_selected_text(&mut self) -> bool {
        self.texts.delete_selected()
    }

    /// Everything captured so far, in creation order.
    pub fn items(&self) -> Vec<MarkupItem> {
        let mut items: Vec<MarkupItem> = self
            .strokes
            .iter()
            .cloned()
            .map(MarkupItem::Ink)
            .chain(self.texts.entries().iter().cloned().map(MarkupItem::Text))
            .collect();
        items.sort_by_key(|item| item.id());
        items
    }

    /// Convert the session into flatten-ready annotations. Degenerate
    /// items are dropped here and never reach the flattener.
    pub fn finish(&self) -> Vec<Annotation> {
        build_annotations(&self.items())
    }
}
