use nalgebra::{Matrix3, Vector3};

use crate::error::{RectifyError, Result};

/// Minimum doubled triangle area for three corners to count as non-collinear.
const COLLINEAR_TOLERANCE: f64 = 1e-6;

const BOUNDS_EPSILON: f64 = 1e-9;

/// A point in image space, sub-pixel precision
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

/// Four corners of a distorted region, in clockwise screen order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadrilateral {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_right: Point,
    pub bottom_left: Point,
}

impl Quadrilateral {
    /// Build a quadrilateral, rejecting non-finite corners and any three collinear corners.
    pub fn new(
        top_left: Point,
        top_right: Point,
        bottom_right: Point,
        bottom_left: Point,
    ) -> Result<Self> {
        let quad = Self {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
        };

        let corners = quad.corners();
        if !corners.iter().all(Point::is_finite) {
            return Err(RectifyError::DegenerateGeometry(
                "quadrilateral corner is not finite".to_string(),
            ));
        }

        for skip in 0..4 {
            let triple: Vec<&Point> = corners
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, p)| p)
                .collect();
            if doubled_triangle_area(triple[0], triple[1], triple[2]) < COLLINEAR_TOLERANCE {
                return Err(RectifyError::DegenerateGeometry(format!(
                    "three corners of {:?} are collinear",
                    corners
                )));
            }
        }

        Ok(quad)
    }

    /// Corners as `[top_left, top_right, bottom_right, bottom_left]`
    pub fn corners(&self) -> [Point; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }

    /// Axis-aligned bounding box as `(min_x, min_y, width, height)`
    pub fn bounding_box(&self) -> (f64, f64, f64, f64) {
        let corners = self.corners();
        let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let max_y = corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
        (min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

fn doubled_triangle_area(a: &Point, b: &Point, c: &Point) -> f64 {
    ((b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)).abs()
}

/// Integer crop rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from inclusive corner coordinates.
    pub fn from_edges(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self::new(left, top, right - left + 1, bottom - top + 1)
    }

    /// Inclusive right column
    pub fn right(&self) -> u32 {
        self.x + self.width - 1
    }

    /// Inclusive bottom row
    pub fn bottom(&self) -> u32 {
        self.y + self.height - 1
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Per-edge adjustment applied after trim detection.
///
/// Positive values move an edge outward, negative values move it inward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelShift {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl PixelShift {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Shift `rect`, keeping it inside a `width` x `height` image with at least one pixel per axis.
    pub fn apply(&self, rect: Rect, width: u32, height: u32) -> Rect {
        let (left, right) = shift_span(
            rect.x as i64 - self.left as i64,
            rect.right() as i64 + self.right as i64,
            width,
        );
        let (top, bottom) = shift_span(
            rect.y as i64 - self.top as i64,
            rect.bottom() as i64 + self.bottom as i64,
            height,
        );
        Rect::from_edges(left, top, right, bottom)
    }
}

fn shift_span(start: i64, end: i64, extent: u32) -> (u32, u32) {
    let max = extent as i64 - 1;
    let start = start.clamp(0, max);
    let end = end.clamp(0, max);
    if start <= end {
        (start as u32, end as u32)
    } else {
        // Edges crossed over; collapse to a single line between them.
        let mid = (start + end) / 2;
        (mid as u32, mid as u32)
    }
}

/// Rotation about `center`; positive degrees turn clockwise on screen (y axis down).
pub fn rotation_matrix(degrees: f64, center: (f64, f64)) -> Matrix3<f64> {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (cx, cy) = center;

    let translate_to_origin = Matrix3::new(
        1.0, 0.0, -cx,
        0.0, 1.0, -cy,
        0.0, 0.0, 1.0,
    );

    let rotate = Matrix3::new(
        cos, -sin, 0.0,
        sin, cos, 0.0,
        0.0, 0.0, 1.0,
    );

    let translate_back = Matrix3::new(
        1.0, 0.0, cx,
        0.0, 1.0, cy,
        0.0, 0.0, 1.0,
    );

    translate_back * rotate * translate_to_origin
}

/// Transform a point using a projective matrix
pub fn transform_point(matrix: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let p = Vector3::new(x, y, 1.0);
    let result = matrix * p;
    (result.x / result.z, result.y / result.z)
}

/// Compute the bounding box of the transformed image
///
/// Returns `(width, height, min_x, min_y)` of the image corners after `matrix`.
pub fn compute_output_bounds(
    matrix: &Matrix3<f64>,
    width: u32,
    height: u32,
) -> (u32, u32, f64, f64) {
    let (w, h) = ((width - 1) as f64, (height - 1) as f64);
    let corners = [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)];

    let transformed: Vec<(f64, f64)> = corners
        .iter()
        .map(|&(x, y)| transform_point(matrix, x, y))
        .collect();

    let min_x = transformed.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_x = transformed.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let min_y = transformed.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let max_y = transformed.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

    // Absorb floating noise so exact quarter turns keep integral sizes
    let new_width = (max_x - min_x - BOUNDS_EPSILON).ceil().max(0.0) as u32 + 1;
    let new_height = (max_y - min_y - BOUNDS_EPSILON).ceil().max(0.0) as u32 + 1;

    (new_width, new_height, min_x, min_y)
}
