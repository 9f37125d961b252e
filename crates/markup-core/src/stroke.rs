//! Freehand stroke capture
//!
//! One state machine per session accumulates pointer samples into a stroke:
//! `Idle -> Capturing -> (commit | discard)`. A committed stroke is never
//! mutated afterwards; corrections are new strokes plus removal by id.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geometry::{Color, PagePoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolKind {
    /// Opaque ink, normal blending.
    Pen,
    /// Highlighter: reduced opacity with multiply blending so underlying
    /// text stays legible.
    Marker,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    pub tool: ToolKind,
    pub width: f64,
    pub color: Color,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            tool: ToolKind::Pen,
            width: 2.0,
            color: Color::BLACK,
        }
    }
}

/// A committed stroke in page space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: u64,
    pub points: Vec<PagePoint>,
    pub style: StrokeStyle,
}

#[derive(Debug, Clone, PartialEq)]
enum CaptureState {
    Idle,
    Capturing { points: Vec<PagePoint> },
}

/// Accumulates raw pointer samples into discrete strokes.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeCapture {
    state: CaptureState,
}

impl Default for StrokeCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl StrokeCapture {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
        }
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.state, CaptureState::Capturing { .. })
    }

    /// Start a stroke. A begin while one is already in flight discards the
    /// in-flight points; input streams drop events and a stale half-stroke
    /// must not be silently glued onto the next one.
    pub fn begin(&mut self, point: PagePoint) {
        if let CaptureState::Capturing { points } = &self.state {
            warn!(dropped_points = points.len(), "begin while capturing, discarding in-flight stroke");
        }
        self.state = CaptureState::Capturing {
            points: vec![point],
        };
    }

    /// Append a sample to the in-flight stroke. Ignored when idle.
    pub fn extend(&mut self, point: PagePoint) {
        match &mut self.state {
            CaptureState::Capturing { points } => points.push(point),
            CaptureState::Idle => warn!("extend without begin, ignoring sample"),
        }
    }

    /// Finish the stroke. Returns the point list when the stroke has at
    /// least two distinct points; a tap (down+up in place) yields `None`.
    pub fn end(&mut self, point: PagePoint) -> Option<Vec<PagePoint>> {
        match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Capturing { mut points } => {
                points.push(point);
                let first = points[0];
                if points.iter().any(|p| *p != first) {
                    Some(points)
                } else {
                    None
                }
            }
            CaptureState::Idle => {
                warn!("end without begin, ignoring");
                None
            }
        }
    }

    /// Discard the in-flight stroke, if any.
    pub fn cancel(&mut self) {
        self.state = CaptureState::Idle;
    }
}
