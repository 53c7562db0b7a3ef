//! Transform nodes for overlay clips.
//!
//! Coordinates are output-surface pixels: `(0.0, 0.0)` is the top-left of the
//! frame, `x`/`y` locate the top-left of the transform's box before rotation.

use serde::{Deserialize, Serialize};

/// Placement of an overlay clip on the output surface.
///
/// Rotation happens around the box center, clockwise in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformNode {
    /// Left edge of the unrotated box.
    pub x: f64,
    /// Top edge of the unrotated box.
    pub y: f64,
    /// Box width.
    pub w: f64,
    /// Box height.
    pub h: f64,
    /// Clockwise rotation in degrees.
    #[serde(default)]
    pub rotation: f64,
    /// Layer alpha multiplier `[0.0, 1.0]`.
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

fn default_opacity() -> f64 {
    1.0
}

impl TransformNode {
    /// Create a transform, clamping opacity and forcing a non-negative box.
    pub fn new(x: f64, y: f64, w: f64, h: f64, rotation: f64, opacity: f64) -> Self {
        Self {
            x,
            y,
            w: w.max(0.0),
            h: h.max(0.0),
            rotation,
            opacity: opacity.clamp(0.0, 1.0),
        }
    }

    /// Unrotated box covering a `width`×`height` surface at full opacity.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f64, height as f64, 0.0, 1.0)
    }

    /// The rotation pivot: center of the box.
    pub fn center(&self) -> Point2D {
        Point2D::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Scale that maps a source of the given natural size onto the box.
    pub fn scale_for(&self, natural_width: u32, natural_height: u32) -> (f64, f64) {
        (
            self.w / natural_width.max(1) as f64,
            self.h / natural_height.max(1) as f64,
        )
    }

    /// Rotation in radians.
    pub fn rotation_radians(&self) -> f64 {
        self.rotation.to_radians()
    }

    /// Whether drawing this transform can have any visible effect.
    pub fn is_degenerate(&self) -> bool {
        self.w <= 0.0 || self.h <= 0.0 || self.opacity <= 0.0
    }

    /// Corners of the rotated box, clockwise from the unrotated top-left.
    pub fn corners(&self) -> [Point2D; 4] {
        let c = self.center();
        let (sin, cos) = self.rotation_radians().sin_cos();
        let hw = self.w / 2.0;
        let hh = self.h / 2.0;
        [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)].map(|(dx, dy)| {
            Point2D::new(c.x + dx * cos - dy * sin, c.y + dx * sin + dy * cos)
        })
    }

    /// Linearly interpolate between two transforms.
    pub fn lerp(a: &TransformNode, b: &TransformNode, t: f64) -> TransformNode {
        let t = t.clamp(0.0, 1.0);
        TransformNode {
            x: a.x + (b.x - a.x) * t,
            y: a.y + (b.y - a.y) * t,
            w: a.w + (b.w - a.w) * t,
            h: a.h + (b.h - a.h) * t,
            rotation: a.rotation + (b.rotation - a.rotation) * t,
            opacity: a.opacity + (b.opacity - a.opacity) * t,
        }
    }
}

/// A 2D point in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: &Point2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}
