//! Point-anchored text placement
//!
//! Text entries are created at a tap location already converted to page
//! space, then dragged or resized until the session commits. The anchor is
//! the bottom-left corner of the measured text box and is always clamped so
//! the box stays fully inside the page.

use serde::{Deserialize, Serialize};

use crate::geometry::{Color, PagePoint, Size};

pub const FONT_SIZE_MIN: f64 = 8.0;
pub const FONT_SIZE_MAX: f64 = 48.0;
pub const FONT_SIZE_STEP: f64 = 2.0;

/// Average-width Helvetica approximation. Good enough for clamping and
/// bounds; the flattener uses the same metrics so the burned-in text never
/// escapes its annotation bounds.
const GLYPH_WIDTH_FACTOR: f64 = 0.5;
const LINE_HEIGHT_FACTOR: f64 = 1.2;

/// Measured box for a single line of text at the given size, in points.
pub fn measure_text(text: &str, font_size: f64) -> Size {
    let chars = text.chars().count().max(1) as f64;
    Size::new(chars * font_size * GLYPH_WIDTH_FACTOR, font_size * LINE_HEIGHT_FACTOR)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEntry {
    pub id: u64,
    pub text: String,
    /// Bottom-left corner of the text box, page space.
    pub anchor: PagePoint,
    pub color: Color,
    pub font_size: f64,
}

impl TextEntry {
    pub fn measured_size(&self) -> Size {
        measure_text(&self.text, self.font_size)
    }
}

/// The session's text entries plus the exclusive selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextBoard {
    entries: Vec<TextEntry>,
    selected: Option<u64>,
}

impl TextBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TextEntry] {
        &self.entries
    }

    pub fn selected(&self) -> Option<&TextEntry> {
        let id = self.selected?;
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Place a new entry at `anchor` and select it. The id comes from the
    /// session's shared counter so creation order is total across strokes
    /// and text.
    pub fn place(
        &mut self,
        id: u64,
        text: String,
        anchor: PagePoint,
        color: Color,
        font_size: f64,
        page: Size,
    ) -> u64 {
        let font_size = font_size.clamp(FONT_SIZE_MIN, FONT_SIZE_MAX);
        let anchor = clamp_anchor(anchor, measure_text(&text, font_size), page);
        self.entries.push(TextEntry {
            id,
            text,
            anchor,
            color,
            font_size,
        });
        self.selected = Some(id);
        id
    }

    /// Move selection. Selecting one entry deselects the previous one.
    pub fn select(&mut self, id: u64) -> bool {
        if self.entries.iter().any(|e| e.id == id) {
            self.selected = Some(id);
            true
        } else {
            false
        }
    }

    pub fn deselect(&mut self) {
        self.selected = None;
    }

    /// Drag the selected entry, clamped to keep its box on the page.
    pub fn drag_to(&mut self, anchor: PagePoint, page: Size) -> bool {
        let Some(id) = self.selected else {
            return false;
        };
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        entry.anchor = clamp_anchor(anchor, entry.measured_size(), page);
        true
    }

    /// Step the selected entry's font size by `steps` fixed increments,
    /// re-measuring and re-clamping afterwards.
    pub fn step_font_size(&mut self, steps: i32, page: Size) -> bool {
        let Some(id) = self.selected else {
            return false;
        };
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        let next = (entry.font_size + steps as f64 * FONT_SIZE_STEP)
            .clamp(FONT_SIZE_MIN, FONT_SIZE_MAX);
        entry.font_size = next;
        entry.anchor = clamp_anchor(entry.anchor, entry.measured_size(), page);
        true
    }

    /// Remove the selected entry from the session entirely.
    pub fn delete_selected(&mut self) -> bool {
        let Some(id) = self.selected.take() else {
            return false;
        };
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }
}

fn clamp_anchor(anchor: PagePoint, text: Size, page: Size) -> PagePoint {
    let max_x = (page.width - text.width).max(0.0);
    let max_y = (page.height - text.height).max(0.0);
    PagePoint::new(anchor.x.clamp(0.0, max_x), anchor.y.clamp(0.0, max_y))
}
