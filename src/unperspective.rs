//! Planar perspective correction.
//!
//! A distorted quadrilateral (caller supplied, or detected from the
//! foreground silhouette) is mapped onto an upright rectangle whose size is
//! chosen by a [`DefaultDimension`] policy. The projective coefficients are
//! solved directly from the four corner correspondences.

use image::{Rgba, RgbaImage};
use nalgebra::{Matrix3, SMatrix, SVector};
use tracing::{debug, info, instrument};

use crate::color::Fuzz;
use crate::detection::{detect_corners, DetectionMethod};
use crate::error::{ensure_not_empty, RectifyError, Result};
use crate::geometry::{transform_point, Point, Quadrilateral};
use crate::mask::{resolve_background, BackgroundSource, Mask, MaskOptions};
use crate::transform::{warp, Canvas};

/// Pivots smaller than this fraction of the largest matrix entry count as zero.
const PIVOT_TOLERANCE: f64 = 1e-12;

const DEFAULT_SMOOTHING: usize = 3;

/// Largest output side in pixels.
const MAX_OUTPUT_SIDE: f64 = 65_535.0;

/// Largest output canvas in pixels (1 GiB of RGBA).
const MAX_OUTPUT_PIXELS: f64 = (1u64 << 28) as f64;

/// Which measurement fixes the output size; the other side follows from the
/// aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultDimension {
    /// Height of the trimmed (border-free) image
    BoundingBoxHeight,
    /// Width of the trimmed (border-free) image
    BoundingBoxWidth,
    /// Length of the top edge of the quadrilateral, used as the height
    EdgeLength,
    /// Height of the original image
    #[default]
    Height,
    /// Width of the original image
    Width,
}

/// Options for [`Unperspective`].
#[derive(Debug, Clone, PartialEq)]
pub struct UnperspectiveOptions {
    pub default_dimension: DefaultDimension,
    /// Output width / height; derived from the quadrilateral when unset
    pub aspect_ratio: Option<f64>,
    pub method: DetectionMethod,
    /// Background color; sampled at `coords` when unset
    pub background: Option<Rgba<u8>>,
    pub coords: (u32, u32),
    pub fuzz: Fuzz,
    /// Half-width in bins of the radial profile smoothing used for corner detection
    pub smoothing: usize,
}

impl Default for UnperspectiveOptions {
    fn default() -> Self {
        Self {
            default_dimension: DefaultDimension::default(),
            aspect_ratio: None,
            method: DetectionMethod::default(),
            background: None,
            coords: (0, 0),
            fuzz: Fuzz::EXACT,
            smoothing: DEFAULT_SMOOTHING,
        }
    }
}

impl UnperspectiveOptions {
    #[must_use]
    pub fn default_dimension(mut self, dimension: DefaultDimension) -> Self {
        self.default_dimension = dimension;
        self
    }

    #[must_use]
    pub fn aspect_ratio(mut self, ratio: f64) -> Self {
        self.aspect_ratio = Some(ratio);
        self
    }

    #[must_use]
    pub fn method(mut self, method: DetectionMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn background(mut self, color: Rgba<u8>) -> Self {
        self.background = Some(color);
        self
    }

    #[must_use]
    pub fn coords(mut self, x: u32, y: u32) -> Self {
        self.coords = (x, y);
        self
    }

    #[must_use]
    pub fn fuzz(mut self, fuzz: Fuzz) -> Self {
        self.fuzz = fuzz;
        self
    }

    #[must_use]
    pub fn smoothing(mut self, half_window: usize) -> Self {
        self.smoothing = half_window;
        self
    }

    fn mask_options(&self) -> MaskOptions {
        MaskOptions {
            background: BackgroundSource::from(self.background),
            seed: self.coords,
            fuzz: self.fuzz,
        }
    }
}

/// The eight coefficients `(a, b, c, d, e, f, g, h)` of
/// `x' = (a·x + b·y + c) / (g·x + h·y + 1)`, `y' = (d·x + e·y + f) / (g·x + h·y + 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformCoefficients([f64; 8]);

impl TransformCoefficients {
    pub fn values(&self) -> &[f64; 8] {
        &self.0
    }

    pub fn to_matrix(&self) -> Matrix3<f64> {
        let [a, b, c, d, e, f, g, h] = self.0;
        Matrix3::new(
            a, b, c,
            d, e, f,
            g, h, 1.0,
        )
    }

    pub fn transform(&self, point: Point) -> Point {
        let (x, y) = transform_point(&self.to_matrix(), point.x, point.y);
        Point::new(x, y)
    }
}

/// Solve the projective map taking each `src[i]` onto `dst[i]`.
///
/// Gaussian elimination with partial pivoting on the 8×8 system; fails with
/// [`RectifyError::UnsolvableMatrix`] on a (near) singular system or on any
/// non-finite value.
pub fn get_coefficients(src: &[Point; 4], dst: &[Point; 4]) -> Result<TransformCoefficients> {
    let mut matrix = SMatrix::<f64, 8, 8>::zeros();
    let mut rhs = SVector::<f64, 8>::zeros();

    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);
        let row = 2 * i;
        let coefficients_u = [x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u];
        let coefficients_v = [0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v];
        for col in 0..8 {
            matrix[(row, col)] = coefficients_u[col];
            matrix[(row + 1, col)] = coefficients_v[col];
        }
        rhs[row] = u;
        rhs[row + 1] = v;
    }

    if matrix.iter().chain(rhs.iter()).any(|value| !value.is_finite()) {
        return Err(RectifyError::UnsolvableMatrix);
    }

    let scale = matrix.iter().fold(0.0f64, |acc, value| acc.max(value.abs()));
    if scale == 0.0 {
        return Err(RectifyError::UnsolvableMatrix);
    }
    let tolerance = scale * PIVOT_TOLERANCE;

    for col in 0..8 {
        let pivot_row = (col..8)
            .max_by(|&a, &b| matrix[(a, col)].abs().total_cmp(&matrix[(b, col)].abs()))
            .unwrap_or(col);
        let pivot = matrix[(pivot_row, col)];
        if pivot.is_nan() || pivot.abs() <= tolerance {
            return Err(RectifyError::UnsolvableMatrix);
        }
        matrix.swap_rows(col, pivot_row);
        rhs.swap_rows(col, pivot_row);

        for row in col + 1..8 {
            let factor = matrix[(row, col)] / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in col..8 {
                matrix[(row, k)] -= factor * matrix[(col, k)];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut solution = [0.0; 8];
    for row in (0..8).rev() {
        let tail: f64 = (row + 1..8).map(|k| matrix[(row, k)] * solution[k]).sum();
        solution[row] = (rhs[row] - tail) / matrix[(row, row)];
        if !solution[row].is_finite() {
            return Err(RectifyError::UnsolvableMatrix);
        }
    }

    Ok(TransformCoefficients(solution))
}

/// Output `(width, height)` for `quad` under `dimension`.
///
/// `original` is the full image size and `trimmed` the size of its
/// border-free content. Both results are truncated to whole pixels.
pub fn get_dimensions(
    quad: &Quadrilateral,
    dimension: DefaultDimension,
    aspect_ratio: Option<f64>,
    original: (u32, u32),
    trimmed: (u32, u32),
) -> Result<(u32, u32)> {
    let ratio = match aspect_ratio {
        Some(ratio) => ratio,
        None => {
            let (_, _, width, height) = quad.bounding_box();
            width / height
        }
    };
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(RectifyError::out_of_range(
            "aspect_ratio",
            format!("{} is not a positive finite ratio", ratio),
        ));
    }

    let (width, height) = match dimension {
        DefaultDimension::EdgeLength => {
            let height = quad.top_left.distance(&quad.top_right);
            (height * ratio, height)
        }
        DefaultDimension::BoundingBoxHeight => {
            let height = trimmed.1 as f64;
            (height * ratio, height)
        }
        DefaultDimension::BoundingBoxWidth => {
            let width = trimmed.0 as f64;
            (width, width / ratio)
        }
        DefaultDimension::Height => {
            let height = original.1 as f64;
            (height * ratio, height)
        }
        DefaultDimension::Width => {
            let width = original.0 as f64;
            (width, width / ratio)
        }
    };

    if !width.is_finite()
        || !height.is_finite()
        || width > MAX_OUTPUT_SIDE
        || height > MAX_OUTPUT_SIDE
        || width.trunc() * height.trunc() > MAX_OUTPUT_PIXELS
    {
        return Err(RectifyError::out_of_range(
            "dimensions",
            format!(
                "output size {:.0}x{:.0} exceeds {}x{} or {} pixels",
                width, height, MAX_OUTPUT_SIDE, MAX_OUTPUT_SIDE, MAX_OUTPUT_PIXELS
            ),
        ));
    }

    let (width, height) = (width as u32, height as u32);
    if width == 0 || height == 0 {
        return Err(RectifyError::DegenerateGeometry(format!(
            "output size {}x{} is empty",
            width, height
        )));
    }
    Ok((width, height))
}

/// Corrects the perspective distortion of a quadrilateral region.
#[derive(Debug, Clone, Default)]
pub struct Unperspective {
    options: UnperspectiveOptions,
}

impl Unperspective {
    pub fn new(options: UnperspectiveOptions) -> Result<Self> {
        if let Some(ratio) = options.aspect_ratio {
            if !ratio.is_finite() || ratio <= 0.0 {
                return Err(RectifyError::out_of_range(
                    "aspect_ratio",
                    format!("{} is not a positive finite ratio", ratio),
                ));
            }
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &UnperspectiveOptions {
        &self.options
    }

    /// Map `quad` in `img` onto an upright rectangle.
    #[instrument(skip_all, fields(width = img.width(), height = img.height()))]
    pub fn execute(&self, img: &RgbaImage, quad: &Quadrilateral) -> Result<RgbaImage> {
        ensure_not_empty(img)?;
        validate_corners(quad, img.width(), img.height())?;

        let mask = Mask::build(img, &self.options.mask_options())?;
        self.remap(img, quad, &mask)
    }

    /// Detect the quadrilateral from the foreground silhouette, then correct it.
    #[instrument(skip_all, fields(width = img.width(), height = img.height()))]
    pub fn execute_detected(&self, img: &RgbaImage) -> Result<RgbaImage> {
        ensure_not_empty(img)?;

        let mask = Mask::build(img, &self.options.mask_options())?;
        let quad = detect_corners(&mask, self.options.method, self.options.smoothing)?;
        self.remap(img, &quad, &mask)
    }

    fn remap(&self, img: &RgbaImage, quad: &Quadrilateral, mask: &Mask) -> Result<RgbaImage> {
        let original = img.dimensions();
        let trimmed = mask
            .foreground_bounds()
            .map_or(original, |rect| (rect.width, rect.height));

        let (width, height) = get_dimensions(
            quad,
            self.options.default_dimension,
            self.options.aspect_ratio,
            original,
            trimmed,
        )?;

        // Corner pixels of the quad land on the corner pixels of the output
        let (right, bottom) = ((width - 1) as f64, (height - 1) as f64);
        let destination = [
            Point::new(0.0, 0.0),
            Point::new(right, 0.0),
            Point::new(right, bottom),
            Point::new(0.0, bottom),
        ];
        let coefficients = get_coefficients(&quad.corners(), &destination)?;
        debug!(
            coefficients = ?coefficients.values(),
            width,
            height,
            "Projective coefficients solved"
        );

        let background = resolve_background(img, &self.options.mask_options())?;
        let output = warp(
            img,
            &coefficients.to_matrix(),
            Canvas::new(width, height),
            background,
        )?;

        info!(
            dimension = ?self.options.default_dimension,
            width,
            height,
            "Unperspective complete"
        );
        Ok(output)
    }
}

fn validate_corners(quad: &Quadrilateral, width: u32, height: u32) -> Result<()> {
    let names = ["top_left", "top_right", "bottom_right", "bottom_left"];
    for (&name, corner) in names.iter().zip(quad.corners().iter()) {
        if corner.x < 0.0 || corner.y < 0.0 || corner.x > width as f64 || corner.y > height as f64
        {
            return Err(RectifyError::out_of_range(
                name,
                format!(
                    "({}, {}) is outside the {}x{} image",
                    corner.x, corner.y, width, height
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use imageproc::drawing::draw_polygon_mut;
    use imageproc::point::Point as PolygonPoint;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn golden_quad() -> Quadrilateral {
        Quadrilateral::new(
            Point::new(0.0, 0.0),
            Point::new(300.0, 600.0),
            Point::new(10.0, 10.0),
            Point::new(290.0, 490.0),
        )
        .unwrap()
    }

    fn golden(dimension: DefaultDimension) -> (u32, u32) {
        get_dimensions(&golden_quad(), dimension, Some(1.5), (1000, 1000), (800, 800)).unwrap()
    }

    #[test]
    fn test_dimension_policies() {
        assert_eq!(golden(DefaultDimension::EdgeLength), (1006, 670));
        assert_eq!(golden(DefaultDimension::BoundingBoxHeight), (1200, 800));
        assert_eq!(golden(DefaultDimension::BoundingBoxWidth), (800, 533));
        assert_eq!(golden(DefaultDimension::Height), (1500, 1000));
        assert_eq!(golden(DefaultDimension::Width), (1000, 666));
    }

    #[test]
    fn test_aspect_ratio_from_bounding_box() {
        // Bounding box of the golden quad is 300 x 600
        let dims = get_dimensions(
            &golden_quad(),
            DefaultDimension::Height,
            None,
            (1000, 1000),
            (800, 800),
        )
        .unwrap();
        assert_eq!(dims, (500, 1000));
    }

    #[test]
    fn test_invalid_aspect_ratio() {
        let err = get_dimensions(
            &golden_quad(),
            DefaultDimension::Width,
            Some(-2.0),
            (10, 10),
            (10, 10),
        )
        .unwrap_err();
        assert!(matches!(err, RectifyError::OutOfRange { name: "aspect_ratio", .. }));

        let options = UnperspectiveOptions::default().aspect_ratio(0.0);
        assert!(Unperspective::new(options).is_err());
    }

    #[test]
    fn test_oversized_output_rejected() {
        let square = Quadrilateral::new(
            Point::new(0.0, 0.0),
            Point::new(99.0, 0.0),
            Point::new(99.0, 99.0),
            Point::new(0.0, 99.0),
        )
        .unwrap();

        for (dimension, ratio) in [
            (DefaultDimension::Height, 1e12),
            (DefaultDimension::Width, 1e-12),
            (DefaultDimension::Height, 1e3),
        ] {
            let err = get_dimensions(&square, dimension, Some(ratio), (100, 100), (100, 100))
                .unwrap_err();
            assert!(matches!(err, RectifyError::OutOfRange { name: "dimensions", .. }));
        }

        // Within the side limit but over the pixel budget
        let err = get_dimensions(
            &square,
            DefaultDimension::Height,
            Some(1.0),
            (100, 60_000),
            (100, 100),
        )
        .unwrap_err();
        assert!(matches!(err, RectifyError::OutOfRange { name: "dimensions", .. }));

        let dims = get_dimensions(
            &square,
            DefaultDimension::Height,
            Some(600.0),
            (100, 100),
            (100, 100),
        );
        assert_eq!(dims, Ok((60_000, 100)));
    }

    #[test]
    fn test_coefficients_reproduce_corners() {
        let src = [
            Point::new(12.5, 20.0),
            Point::new(310.0, 42.0),
            Point::new(280.25, 260.0),
            Point::new(30.0, 230.0),
        ];
        let dst = [
            Point::new(0.0, 0.0),
            Point::new(400.0, 0.0),
            Point::new(400.0, 300.0),
            Point::new(0.0, 300.0),
        ];
        let coefficients = get_coefficients(&src, &dst).unwrap();
        assert!(coefficients.values().iter().all(|c| c.is_finite()));

        for (s, d) in src.iter().zip(dst.iter()) {
            let mapped = coefficients.transform(*s);
            assert_abs_diff_eq!(mapped.x, d.x, epsilon = 1e-6);
            assert_abs_diff_eq!(mapped.y, d.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_identity_coefficients() {
        let square = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ];
        let coefficients = get_coefficients(&square, &square).unwrap();
        let expected = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        for (actual, expected) in coefficients.values().iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*actual, *expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rank_deficient_is_unsolvable() {
        let collinear = [
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
            Point::new(3.0, 3.0),
            Point::new(4.0, 4.0),
        ];
        let dst = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        let err = get_coefficients(&collinear, &dst).unwrap_err();
        assert_eq!(err, RectifyError::UnsolvableMatrix);
        assert_eq!(err.to_string(), "Unsolvable matrix detected.");

        let repeated = [Point::new(1.0, 2.0); 4];
        assert_eq!(
            get_coefficients(&repeated, &dst).unwrap_err(),
            RectifyError::UnsolvableMatrix
        );
    }

    #[test]
    fn test_nan_is_unsolvable() {
        let mut src = [
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ];
        let dst = src;
        src[2].x = f64::NAN;
        assert_eq!(
            get_coefficients(&src, &dst).unwrap_err(),
            RectifyError::UnsolvableMatrix
        );
    }

    fn trapezoid_image() -> (RgbaImage, Quadrilateral) {
        let corners = [(30, 20), (170, 35), (160, 120), (40, 130)];
        let mut img = RgbaImage::from_pixel(200, 150, WHITE);
        let polygon: Vec<PolygonPoint<i32>> = corners
            .iter()
            .map(|&(x, y)| PolygonPoint::new(x, y))
            .collect();
        draw_polygon_mut(&mut img, &polygon, BLACK);

        let points: Vec<Point> = corners
            .iter()
            .map(|&(x, y)| Point::new(x as f64, y as f64))
            .collect();
        let quad = Quadrilateral::new(points[0], points[1], points[2], points[3]).unwrap();
        (img, quad)
    }

    fn assert_filled(output: &RgbaImage) {
        let (w, h) = output.dimensions();
        for (x, y) in [(5, 5), (w - 6, 5), (w - 6, h - 6), (5, h - 6), (w / 2, h / 2)] {
            assert!(output.get_pixel(x, y)[0] < 64, "pixel ({}, {}) not filled", x, y);
        }
    }

    #[test]
    fn test_execute_rectifies_quad() {
        let (img, quad) = trapezoid_image();
        let options = UnperspectiveOptions::default()
            .default_dimension(DefaultDimension::Height)
            .aspect_ratio(1.25);
        let output = Unperspective::new(options).unwrap().execute(&img, &quad).unwrap();

        assert_eq!(output.dimensions(), (187, 150));
        assert_filled(&output);
    }

    #[test]
    fn test_execute_detected_rectifies_quad() {
        let (img, _) = trapezoid_image();
        let options = UnperspectiveOptions::default()
            .default_dimension(DefaultDimension::Width)
            .aspect_ratio(1.6)
            .method(DetectionMethod::Derivative);
        let output = Unperspective::new(options)
            .unwrap()
            .execute_detected(&img)
            .unwrap();

        assert_eq!(output.dimensions(), (200, 125));
        assert_filled(&output);
    }

    #[test]
    fn test_corner_outside_image() {
        let (img, _) = trapezoid_image();
        let quad = Quadrilateral::new(
            Point::new(10.0, 10.0),
            Point::new(250.0, 10.0),
            Point::new(150.0, 120.0),
            Point::new(10.0, 120.0),
        )
        .unwrap();
        let err = Unperspective::default().execute(&img, &quad).unwrap_err();
        assert!(matches!(err, RectifyError::OutOfRange { name: "top_right", .. }));
    }

    #[test]
    fn test_empty_image_rejected() {
        let quad = golden_quad();
        let err = Unperspective::default()
            .execute(&RgbaImage::new(0, 0), &quad)
            .unwrap_err();
        assert!(matches!(err, RectifyError::InvalidArgument { .. }));
    }
}
