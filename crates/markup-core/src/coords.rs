//! Input-space to page-space coordinate transform
//!
//! PDF page space has a bottom-left origin with Y increasing upward; screen
//! input arrives with a top-left origin and Y increasing downward. The
//! conversion divides out the zoom factor, rescales each axis from container
//! points to page points, and flips Y:
//!
//! ```text
//! page.x = (input.x / scale) * (page.width  / container.width)
//! page.y = page.height - (input.y / scale) * (page.height / container.height)
//! ```
//!
//! Degenerate view bounds are a real input here (zero-sized containers
//! during layout, NaN from division upstream), so construction and both
//! transforms validate rather than propagate garbage coordinates.

use crate::error::GeometryError;
use crate::geometry::{InputPoint, PagePoint, Size};

/// The fixed geometry relating the on-screen container to one page.
///
/// `scale` is the current zoom factor relating container points to page
/// points. Captured once per editing session; the page size is never
/// recomputed mid-session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    container: Size,
    page: Size,
    scale: f64,
}

impl Viewport {
    pub fn new(container: Size, page: Size, scale: f64) -> Result<Self, GeometryError> {
        if !container.is_finite() || !page.is_finite() || !scale.is_finite() {
            return Err(GeometryError::NonFinite("viewport"));
        }
        if container.width <= 0.0 || container.height <= 0.0 {
            return Err(GeometryError::InvalidViewport("container has no area"));
        }
        if page.width <= 0.0 || page.height <= 0.0 {
            return Err(GeometryError::InvalidViewport("page has no area"));
        }
        if scale <= 0.0 {
            return Err(GeometryError::InvalidViewport("scale must be positive"));
        }
        Ok(Self {
            container,
            page,
            scale,
        })
    }

    pub fn page_size(&self) -> Size {
        self.page
    }

    /// Map an input-space point into page space.
    pub fn to_page(&self, p: InputPoint) -> Result<PagePoint, GeometryError> {
        if !p.is_finite() {
            return Err(GeometryError::NonFinite("input point"));
        }
        let x = (p.x / self.scale) * (self.page.width / self.container.width);
        let y = self.page.height - (p.y / self.scale) * (self.page.height / self.container.height);
        let out = PagePoint::new(x, y);
        if !out.is_finite() {
            return Err(GeometryError::NonFinite("transformed point"));
        }
        Ok(out)
    }

    /// Inverse of [`to_page`](Self::to_page).
    pub fn to_container(&self, p: PagePoint) -> Result<InputPoint, GeometryError> {
        if !p.is_finite() {
            return Err(GeometryError::NonFinite("page point"));
        }
        let x = p.x * (self.container.width / self.page.width) * self.scale;
        let y = (self.page.height - p.y) * (self.container.height / self.page.height) * self.scale;
        let out = InputPoint::new(x, y);
        if !out.is_finite() {
            return Err(GeometryError::NonFinite("transformed point"));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn letter_viewport() -> Viewport {
        Viewport::new(Size::letter(), Size::letter(), 1.0).unwrap()
    }

    #[test]
    fn test_identity_viewport_flips_y_only() {
        let vp = letter_viewport();
        let p = vp.to_page(InputPoint::new(100.0, 100.0)).unwrap();
        assert_eq!(p, PagePoint::new(100.0, 692.0));
    }

    #[test]
    fn test_container_taller_than_page() {
        // Page height 792pt drawn in an 800pt-tall container at zoom 1.0.
        let vp = Viewport::new(
            Size::new(612.0, 800.0),
            Size::new(612.0, 792.0),
            1.0,
        )
        .unwrap();
        let a = vp.to_page(InputPoint::new(100.0, 100.0)).unwrap();
        let b = vp.to_page(InputPoint::new(200.0, 100.0)).unwrap();

        let expected_y = 792.0 - 100.0 * (792.0 / 800.0);
        assert!((a.x - 100.0).abs() < 1e-6);
        assert!((a.y - expected_y).abs() < 1e-6);
        assert!((b.x - 200.0).abs() < 1e-6);
        assert!((b.y - expected_y).abs() < 1e-6);
    }

    #[test]
    fn test_zoom_divides_input() {
        let vp = Viewport::new(Size::letter(), Size::letter(), 2.0).unwrap();
        let p = vp.to_page(InputPoint::new(200.0, 200.0)).unwrap();
        assert_eq!(p, PagePoint::new(100.0, 692.0));
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let vp = letter_viewport();
        assert_eq!(
            vp.to_page(InputPoint::new(f64::NAN, 10.0)),
            Err(GeometryError::NonFinite("input point"))
        );
        assert_eq!(
            vp.to_container(PagePoint::new(10.0, f64::INFINITY)),
            Err(GeometryError::NonFinite("page point"))
        );
    }

    #[test]
    fn test_degenerate_viewport_rejected() {
        assert!(Viewport::new(Size::new(0.0, 800.0), Size::letter(), 1.0).is_err());
        assert!(Viewport::new(Size::letter(), Size::new(612.0, 0.0), 1.0).is_err());
        assert!(Viewport::new(Size::letter(), Size::letter(), 0.0).is_err());
        assert!(Viewport::new(Size::letter(), Size::letter(), f64::NAN).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        /// Round trip within 1e-6 for in-range points at scale 1.0.
        #[test]
        fn roundtrip_identity(x in 0.0f64..612.0, y in 0.0f64..792.0) {
            let vp = letter_viewport();
            let p = InputPoint::new(x, y);
            let back = vp.to_container(vp.to_page(p).unwrap()).unwrap();
            prop_assert!((back.x - p.x).abs() < 1e-6);
            prop_assert!((back.y - p.y).abs() < 1e-6);
        }

        /// Round trip also holds under zoom and mismatched container sizes.
        #[test]
        fn roundtrip_scaled(
            x in 0.0f64..1000.0,
            y in 0.0f64..1000.0,
            scale in 0.25f64..4.0,
        ) {
            let vp = Viewport::new(
                Size::new(834.0, 1080.0),
                Size::letter(),
                scale,
            ).unwrap();
            let p = InputPoint::new(x, y);
            let back = vp.to_container(vp.to_page(p).unwrap()).unwrap();
            prop_assert!((back.x - p.x).abs() < 1e-6);
            prop_assert!((back.y - p.y).abs() < 1e-6);
        }
    }
}
