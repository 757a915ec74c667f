//! Geometry value types shared by the policy, surfaces and screens.
//!
//! Rectangles use inclusive `right()`/`bottom()` edges, so a rectangle at
//! `x = 0` with `width = 100` has `right() == 99`. The confinement code in
//! [`crate::policy`] relies on that convention.

use serde::{Deserialize, Serialize};

/// A point in display (or surface-local) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, d: Displacement) -> Self {
        Self::new(self.x + d.dx, self.y + d.dy)
    }
}

impl std::ops::Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

/// Relative movement applied to a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Displacement {
    pub dx: i32,
    pub dy: i32,
}

impl Displacement {
    pub const fn new(dx: i32, dy: i32) -> Self {
        Self { dx, dy }
    }

    /// Movement that takes `from` to `to`
    pub fn between(from: Point, to: Point) -> Self {
        Self::new(to.x - from.x, to.y - from.y)
    }
}

/// Width and height in pixels. Negative values mark an invalid size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Sentinel used for "no size requested"
    pub const fn invalid() -> Self {
        Self { width: -1, height: -1 }
    }

    pub fn is_valid(&self) -> bool {
        self.width >= 0 && self.height >= 0
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Per-edge margins added around a window's geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Margins {
    #[serde(default)]
    pub left: i32,
    #[serde(default)]
    pub top: i32,
    #[serde(default)]
    pub right: i32,
    #[serde(default)]
    pub bottom: i32,
}

impl Margins {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }
}

/// Axis-aligned rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_loc_and_size(top_left: Point, size: Size) -> Self {
        Self::new(top_left.x, top_left.y, size.width, size.height)
    }

    /// A null rectangle has no extent at all; used as "unset"
    pub fn is_null(&self) -> bool {
        self.width == 0 && self.height == 0
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn left(&self) -> i32 {
        self.x
    }

    pub fn top(&self) -> i32 {
        self.y
    }

    /// Inclusive right edge
    pub fn right(&self) -> i32 {
        self.x + self.width - 1
    }

    /// Inclusive bottom edge
    pub fn bottom(&self) -> i32 {
        self.y + self.height - 1
    }

    pub fn top_left(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn contains(&self, p: Point) -> bool {
        !self.is_empty() && p.x >= self.left() && p.x <= self.right() && p.y >= self.top() && p.y <= self.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.left() <= other.right()
            && other.left() <= self.right()
            && self.top() <= other.bottom()
            && other.top() <= self.bottom()
    }

    pub fn move_to(&mut self, p: Point) {
        self.x = p.x;
        self.y = p.y;
    }

    pub fn translated(&self, d: Displacement) -> Rect {
        Rect::new(self.x + d.dx, self.y + d.dy, self.width, self.height)
    }

    pub fn margins_added(&self, m: Margins) -> Rect {
        Rect::new(
            self.x - m.left,
            self.y - m.top,
            self.width + m.left + m.right,
            self.height + m.top + m.bottom,
        )
    }

    pub fn margins_removed(&self, m: Margins) -> Rect {
        Rect::new(
            self.x + m.left,
            self.y + m.top,
            self.width - m.left - m.right,
            self.height - m.top - m.bottom,
        )
    }
}
