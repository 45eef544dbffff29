//! Screen rectangles and anchor points.

use crate::errors::AutomationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default distance, in pixels, an edge anchor sits inside the rectangle.
pub const DEFAULT_ANCHOR_INSET: i32 = 5;

/// A point in physical screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Screen rectangle; `right` and `bottom` are exclusive like a Win32 `RECT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Negative sizes collapse to zero; edges past `i32::MAX` are clamped.
    pub fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self::new(
            x,
            y,
            x.saturating_add(width.max(0)),
            y.saturating_add(height.max(0)),
        )
    }

    /// Like [`Rect::from_xywh`] but `None` when an edge does not fit in `i32`.
    pub fn checked_from_xywh(x: i32, y: i32, width: i32, height: i32) -> Option<Self> {
        Some(Self::new(
            x,
            y,
            x.checked_add(width.max(0))?,
            y.checked_add(height.max(0))?,
        ))
    }

    /// Zero-sized rectangle at a point, used for coordinate selectors.
    pub fn at_point(point: Point) -> Self {
        Self::new(point.x, point.y, point.x, point.y)
    }

    pub fn width(&self) -> i32 {
        extent(self.left, self.right)
    }

    pub fn height(&self) -> i32 {
        extent(self.top, self.bottom)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn center(&self) -> Point {
        Point::new(midpoint(self.left, self.right), midpoint(self.top, self.bottom))
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left && point.x < self.right && point.y >= self.top && point.y < self.bottom
    }
}

fn extent(start: i32, end: i32) -> i32 {
    (i64::from(end) - i64::from(start)).clamp(0, i64::from(i32::MAX)) as i32
}

// the mean of two i32 values always fits back into i32
fn midpoint(a: i32, b: i32) -> i32 {
    ((i64::from(a) + i64::from(b)) / 2) as i32
}

/// Where on a control's bounding rectangle an interaction lands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    #[default]
    Center,
    Left,
    Right,
    Top,
    Bottom,
}

impl FromStr for Anchor {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "center" | "centre" => Ok(Anchor::Center),
            "left" => Ok(Anchor::Left),
            "right" => Ok(Anchor::Right),
            "top" => Ok(Anchor::Top),
            "bottom" => Ok(Anchor::Bottom),
            other => Err(AutomationError::InvalidArgument(format!(
                "unknown anchor '{other}', expected center, left, right, top or bottom"
            ))),
        }
    }
}

/// Point for `anchor` using [`DEFAULT_ANCHOR_INSET`].
pub fn point_for(rect: &Rect, anchor: Anchor) -> Point {
    point_for_with_inset(rect, anchor, DEFAULT_ANCHOR_INSET)
}

/// Edge anchors sit on the midpoint of the edge, `inset` pixels inward.
/// The inset shrinks for small rectangles so the point never leaves them.
pub fn point_for_with_inset(rect: &Rect, anchor: Anchor, inset: i32) -> Point {
    let center = rect.center();
    match anchor {
        Anchor::Center => center,
        Anchor::Left => Point::new(rect.left.saturating_add(leading_inset(inset, rect.width())), center.y),
        Anchor::Right => Point::new(rect.right.saturating_sub(trailing_inset(inset, rect.width())), center.y),
        Anchor::Top => Point::new(center.x, rect.top.saturating_add(leading_inset(inset, rect.height()))),
        Anchor::Bottom => Point::new(center.x, rect.bottom.saturating_sub(trailing_inset(inset, rect.height()))),
    }
}

fn leading_inset(inset: i32, extent: i32) -> i32 {
    if extent <= 0 {
        return 0;
    }
    inset.clamp(0, (extent - 1) / 2)
}

// right/bottom are exclusive, so the trailing edge needs at least one pixel
fn trailing_inset(inset: i32, extent: i32) -> i32 {
    if extent <= 0 {
        return 0;
    }
    inset.clamp(1, (extent / 2).max(1))
}
