//! Geometry primitives and the region-to-absolute coordinate transform.
//!
//! Table regions and button offsets are stored relative to the shared
//! surface's reference frame; everything that touches the mouse goes through
//! [`to_absolute`] so the calibration offset is applied in exactly one place.

use serde::{Deserialize, Serialize};

/// Horizontal calibration applied to every absolute click coordinate.
///
/// Empirically calibrated against the rendered canvas; there is no vertical
/// counterpart.
pub const CALIBRATION_OFFSET_X: i32 = 17;

/// A 2D point in absolute surface coordinates (or a relative offset)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A rectangular region, stored relative to its parent frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Get the center point of the region
    pub fn center(&self) -> Point {
        Point::new(
            self.x + (self.width as i32 / 2),
            self.y + (self.height as i32 / 2),
        )
    }

    /// Check if a point is inside this region
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x
            && p.x < self.x + self.width as i32
            && p.y >= self.y
            && p.y < self.y + self.height as i32
    }
}

/// Named button offsets, each relative to the owning table region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonLayout {
    pub choose_blue: Point,
    pub choose_red: Point,
    pub confirm: Point,
    pub cancel: Point,
}

impl ButtonLayout {
    /// Offset of the choose button for a side
    pub fn choose(&self, side: crate::types::Side) -> Point {
        match side {
            crate::types::Side::Blue => self.choose_blue,
            crate::types::Side::Red => self.choose_red,
        }
    }
}

/// Convert a region-relative offset into an absolute interaction point.
///
/// `x = frame.x + region.x + offset.x + CALIBRATION_OFFSET_X`
/// `y = frame.y + region.y + offset.y`
///
/// The reference frame itself comes from the surface collaborator; callers
/// must treat a missing frame as retryable since the surface may still be
/// loading at process start.
pub fn to_absolute(frame_origin: Point, region: &Region, offset: Point) -> Point {
    Point::new(
        frame_origin.x + region.x + offset.x + CALIBRATION_OFFSET_X,
        frame_origin.y + region.y + offset.y,
    )
}

/// Absolute position of a table region within the surface (no calibration;
/// used for capture, not clicking)
pub fn capture_bounds(frame_origin: Point, region: &Region) -> Region {
    Region::new(
        frame_origin.x + region.x,
        frame_origin.y + region.y,
        region.width,
        region.height,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_center() {
        let region = Region::new(100, 200, 800, 600);
        assert_eq!(region.center(), Point::new(500, 500));
    }

    #[test]
    fn test_region_contains() {
        let region = Region::new(0, 0, 100, 100);
        assert!(region.contains(Point::new(50, 50)));
        assert!(region.contains(Point::new(0, 0)));
        assert!(!region.contains(Point::new(100, 100)));
        assert!(!region.contains(Point::new(-1, 50)));
    }

    #[test]
    fn test_to_absolute_applies_horizontal_calibration_only() {
        let frame = Point::new(100, 50);
        let region = Region::new(178, 336, 240, 180);
        let p = to_absolute(frame, &region, Point::new(10, 5));
        assert_eq!(p, Point::new(305, 391));
    }

    #[test]
    fn test_capture_bounds_has_no_calibration() {
        let frame = Point::new(10, 20);
        let region = Region::new(30, 40, 50, 60);
        let bounds = capture_bounds(frame, &region);
        assert_eq!(bounds, Region::new(40, 60, 50, 60));
    }

    #[test]
    fn test_button_layout_choose() {
        use crate::types::Side;
        let layout = ButtonLayout {
            choose_blue: Point::new(1, 2),
            choose_red: Point::new(3, 4),
            confirm: Point::new(5, 6),
            cancel: Point::new(7, 8),
        };
        assert_eq!(layout.choose(Side::Blue), Point::new(1, 2));
        assert_eq!(layout.choose(Side::Red), Point::new(3, 4));
    }
}
