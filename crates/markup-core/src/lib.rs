//! Markup capture engine
//!
//! This crate holds the input side of the page-markup pipeline: coordinate
//! transforms between screen space and page space, the stroke capture state
//! machine, point-anchored text placement, and the conversion of captured
//! items into bounds-relative annotations ready for flattening.
//!
//! Nothing here touches the PDF container; see the `flatten-core` crate for
//! the rendering and reassembly half.

pub mod annotation;
pub mod coords;
pub mod error;
pub mod geometry;
pub mod session;
pub mod stroke;
pub mod text;

pub use annotation::{build_annotation, build_annotations, Annotation, AnnotationKind, MarkupItem};
pub use coords::Viewport;
pub use error::GeometryError;
pub use geometry::{Color, InputPoint, PagePoint, PageRect, RelPoint, Size};
pub use session::{MarkupSession, PointerEvent, ToolConfig};
pub use stroke::{Stroke, StrokeCapture, StrokeStyle, ToolKind};
pub use text::{measure_text, TextBoard, TextEntry, FONT_SIZE_MAX, FONT_SIZE_MIN};
