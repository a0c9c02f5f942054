//! Integer pixel boxes in parent-image coordinates.

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box with `i32` parent coordinates.
///
/// Uses inclusive bounds: a pixel at (x, y) is inside if
/// `x_min <= x <= x_max` and `y_min <= y <= y_max`. A box with inverted
/// bounds is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoxI {
    pub x_min: i32,
    pub x_max: i32,
    pub y_min: i32,
    pub y_max: i32,
}

impl Default for BoxI {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoxI {
    #[inline]
    pub const fn new(x_min: i32, x_max: i32, y_min: i32, y_max: i32) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    /// Create an empty bounding box (for accumulation).
    ///
    /// The empty box has inverted bounds so that any point
    /// included via `include()` will set the initial bounds.
    #[inline]
    pub const fn empty() -> Self {
        Self {
            x_min: i32::MAX,
            x_max: i32::MIN,
            y_min: i32::MAX,
            y_max: i32::MIN,
        }
    }

    /// Box of the given size with its lower-left corner at (x0, y0).
    #[inline]
    pub const fn from_origin(x0: i32, y0: i32, width: usize, height: usize) -> Self {
        Self {
            x_min: x0,
            x_max: x0 + width as i32 - 1,
            y_min: y0,
            y_max: y0 + height as i32 - 1,
        }
    }

    #[inline]
    pub const fn from_point(x: i32, y: i32) -> Self {
        Self::new(x, x, y, y)
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.x_min > self.x_max || self.y_min > self.y_max
    }

    #[inline]
    pub const fn width(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.x_max - self.x_min + 1) as usize
        }
    }

    #[inline]
    pub const fn height(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.y_max - self.y_min + 1) as usize
        }
    }

    #[inline]
    pub const fn area(&self) -> usize {
        self.width() * self.height()
    }

    /// Expand this bounding box to include the given point.
    #[inline]
    pub fn include(&mut self, x: i32, y: i32) {
        self.x_min = self.x_min.min(x);
        self.x_max = self.x_max.max(x);
        self.y_min = self.y_min.min(y);
        self.y_max = self.y_max.max(y);
    }

    #[inline]
    pub const fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    /// True if `other` lies entirely inside this box. Empty boxes are
    /// contained by everything.
    #[inline]
    pub const fn contains_box(&self, other: &BoxI) -> bool {
        other.is_empty()
            || (other.x_min >= self.x_min
                && other.x_max <= self.x_max
                && other.y_min >= self.y_min
                && other.y_max <= self.y_max)
    }

    #[inline]
    pub fn overlaps(&self, other: &BoxI) -> bool {
        !self.clipped(other).is_empty()
    }

    /// Intersection of two boxes; empty when they are disjoint.
    #[inline]
    pub fn clipped(&self, other: &BoxI) -> BoxI {
        let clipped = BoxI::new(
            self.x_min.max(other.x_min),
            self.x_max.min(other.x_max),
            self.y_min.max(other.y_min),
            self.y_max.min(other.y_max),
        );
        if clipped.is_empty() {
            BoxI::empty()
        } else {
            clipped
        }
    }

    /// Grow by `r` pixels on every side. Empty boxes stay empty.
    #[inline]
    pub fn grown(&self, r: i32) -> BoxI {
        if self.is_empty() {
            return *self;
        }
        BoxI::new(
            self.x_min - r,
            self.x_max + r,
            self.y_min - r,
            self.y_max + r,
        )
    }

    /// Integer centre, rounding towards the lower-left.
    #[inline]
    pub fn center(&self) -> (i32, i32) {
        (
            (self.x_min + self.x_max).div_euclid(2),
            (self.y_min + self.y_max).div_euclid(2),
        )
    }

    /// Iterate all pixels row by row.
    pub fn pixels(&self) -> impl Iterator<Item = (i32, i32)> {
        let b = *self;
        let (y_range, x_range) = if b.is_empty() {
            (1..=0, 1..=0)
        } else {
            (b.y_min..=b.y_max, b.x_min..=b.x_max)
        };
        y_range.flat_map(move |y| x_range.clone().map(move |x| (x, y)))
    }
}
