//! Normalized page geometry

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in normalized page space.
///
/// Both axes run from 0.0 to 1.0 and the origin is the top-left corner of the
/// page, the same convention as a rendered page image. Boxes coming from the
/// PDF itself (origin bottom-left, in points) must go through
/// [`BoundingBox::from_pdf_rect`] first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    /// Create a validated bounding box
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Result<Self> {
        let bbox = Self { x1, y1, x2, y2 };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Check `x1 <= x2`, `y1 <= y2` and that every coordinate is finite
    pub fn validate(&self) -> Result<()> {
        if ![self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(Error::invalid_argument(format!(
                "bounding box has non-finite coordinates: {:?}",
                self
            )));
        }
        if self.x1 > self.x2 || self.y1 > self.y2 {
            return Err(Error::invalid_argument(format!(
                "bounding box corners out of order: ({}, {}, {}, {})",
                self.x1, self.y1, self.x2, self.y2
            )));
        }
        Ok(())
    }

    /// Convert a PDF-native rectangle (points, origin bottom-left) into
    /// normalized top-left space by dividing by the page size and flipping Y.
    ///
    /// PDF rectangles may list their corners in any order, so the edges are
    /// sorted before conversion.
    pub fn from_pdf_rect(
        left: f32,
        bottom: f32,
        right: f32,
        top: f32,
        page_width: f32,
        page_height: f32,
    ) -> Result<Self> {
        if !(page_width > 0.0 && page_height > 0.0) {
            return Err(Error::invalid_argument(format!(
                "page size must be positive, got {}x{}",
                page_width, page_height
            )));
        }

        let (left, right) = (left.min(right) as f64, left.max(right) as f64);
        let (bottom, top) = (bottom.min(top) as f64, bottom.max(top) as f64);
        let (w, h) = (page_width as f64, page_height as f64);

        Self::new(left / w, 1.0 - top / h, right / w, 1.0 - bottom / h)
    }

    /// Center point `(cx, cy)`
    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Euclidean distance between the centers of two boxes
    pub fn center_distance(&self, other: &BoundingBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).hypot(ay - by)
    }

    /// Scale to pixel coordinates of an image, clamped to the image bounds.
    /// Returns `(left, top, right, bottom)` inclusive.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let max_x = width.saturating_sub(1) as f64;
        let max_y = height.saturating_sub(1) as f64;
        let scale = |v: f64, extent: u32, max: f64| (v * extent as f64).round().clamp(0.0, max) as u32;

        (
            scale(self.x1, width, max_x),
            scale(self.y1, height, max_y),
            scale(self.x2, width, max_x),
            scale(self.y2, height, max_y),
        )
    }
}
