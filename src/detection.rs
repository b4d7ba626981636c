use std::f64::consts::PI;
use std::str::FromStr;

use tracing::debug;

use crate::error::{RectifyError, Result};
use crate::geometry::{Point, Quadrilateral};
use crate::mask::{Mask, FOREGROUND};

/// Angular resolution of the radial profile (half a degree per bin)
const PROFILE_BINS: usize = 720;

/// Corners closer than this around the centroid are treated as one
const MIN_CORNER_SEPARATION_DEGREES: f64 = 30.0;

/// Half-width, in bins, of the neighbourhood a peak must dominate
const PEAK_HALF_WINDOW: usize = 10;

/// Offset, in bins, at which the slope is compared across a derivative crossing
const SLOPE_SPAN: usize = 6;

/// How corners of the foreground silhouette are located on its radial profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectionMethod {
    /// Local maxima of the centroid distance
    #[default]
    Peak,
    /// Positive-to-negative zero crossings of the profile slope
    Derivative,
}

impl FromStr for DetectionMethod {
    type Err = RectifyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "peak" => Ok(Self::Peak),
            "derivative" => Ok(Self::Derivative),
            other => Err(RectifyError::invalid_argument(
                "method",
                format!("unknown detection method '{}'", other),
            )),
        }
    }
}

impl TryFrom<u8> for DetectionMethod {
    type Error = RectifyError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Peak),
            1 => Ok(Self::Derivative),
            other => Err(RectifyError::invalid_argument(
                "method",
                format!("unknown detection method {}", other),
            )),
        }
    }
}

/// Farthest foreground pixel from the centroid in each angular bin
#[derive(Debug, Clone)]
struct RadialProfile {
    centroid: (f64, f64),
    radius: Vec<f64>,
    farthest: Vec<Option<(u32, u32)>>,
}

impl RadialProfile {
    fn from_mask(mask: &Mask) -> Option<Self> {
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut count = 0usize;
        for (x, y, pixel) in mask.as_gray().enumerate_pixels() {
            if pixel[0] == FOREGROUND {
                sum_x += x as f64;
                sum_y += y as f64;
                count += 1;
            }
        }
        if count == 0 {
            return None;
        }
        let centroid = (sum_x / count as f64, sum_y / count as f64);

        let mut radius = vec![f64::NAN; PROFILE_BINS];
        let mut farthest = vec![None; PROFILE_BINS];
        for (x, y, pixel) in mask.as_gray().enumerate_pixels() {
            if pixel[0] != FOREGROUND {
                continue;
            }
            let dx = x as f64 - centroid.0;
            let dy = y as f64 - centroid.1;
            let r = dx.hypot(dy);
            let bin = angle_to_bin(dy.atan2(dx));
            if radius[bin].is_nan() || r > radius[bin] {
                radius[bin] = r;
                farthest[bin] = Some((x, y));
            }
        }

        Some(Self {
            centroid,
            radius,
            farthest,
        })
    }

    /// Fill empty bins by circular linear interpolation between their neighbours.
    fn filled(&self) -> Option<Vec<f64>> {
        let known: Vec<usize> = (0..PROFILE_BINS)
            .filter(|&i| !self.radius[i].is_nan())
            .collect();
        if known.len() < 4 {
            return None;
        }

        let mut filled = self.radius.clone();
        for (k, &start) in known.iter().enumerate() {
            let end = known[(k + 1) % known.len()];
            let gap = (end + PROFILE_BINS - start) % PROFILE_BINS;
            for step in 1..gap {
                let t = step as f64 / gap as f64;
                filled[(start + step) % PROFILE_BINS] =
                    self.radius[start] * (1.0 - t) + self.radius[end] * t;
            }
        }
        Some(filled)
    }

    /// Farthest recorded pixel within `reach` bins of `bin`
    fn corner_near(&self, bin: usize, reach: usize) -> Option<Point> {
        (0..=2 * reach)
            .map(|offset| (bin + PROFILE_BINS + offset - reach) % PROFILE_BINS)
            .filter_map(|i| self.farthest[i].map(|p| (self.radius[i], p)))
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, (x, y))| Point::new(x as f64, y as f64))
    }
}

fn angle_to_bin(radians: f64) -> usize {
    let normalized = (radians + PI) / (2.0 * PI);
    ((normalized * PROFILE_BINS as f64) as usize) % PROFILE_BINS
}

fn circular(values: &[f64], index: isize) -> f64 {
    let n = values.len() as isize;
    values[index.rem_euclid(n) as usize]
}

fn smooth(values: &[f64], half_window: usize) -> Vec<f64> {
    if half_window == 0 {
        return values.to_vec();
    }
    let span = half_window as isize;
    let width = (2 * half_window + 1) as f64;
    (0..values.len() as isize)
        .map(|i| (-span..=span).map(|j| circular(values, i + j)).sum::<f64>() / width)
        .collect()
}

/// Candidate corner bins with a score, higher is better.
fn peak_candidates(profile: &[f64]) -> Vec<(usize, f64)> {
    let span = PEAK_HALF_WINDOW as isize;
    (0..profile.len() as isize)
        .filter(|&i| {
            let value = profile[i as usize];
            value > circular(profile, i - 1)
                && (-span..=span).all(|j| circular(profile, i + j) <= value)
        })
        .map(|i| (i as usize, profile[i as usize]))
        .collect()
}

fn derivative_candidates(profile: &[f64]) -> Vec<(usize, f64)> {
    let slope: Vec<f64> = (0..profile.len() as isize)
        .map(|i| (circular(profile, i + 1) - circular(profile, i - 1)) / 2.0)
        .collect();

    let span = SLOPE_SPAN as isize;
    (0..slope.len() as isize)
        .filter(|&i| slope[i as usize] > 0.0 && circular(&slope, i + 1) <= 0.0)
        .map(|i| {
            // The crossing lies between i and i + 1; keep the higher bin
            let bin = if circular(profile, i + 1) > profile[i as usize] {
                (i + 1).rem_euclid(profile.len() as isize)
            } else {
                i
            };
            let sharpness = circular(&slope, bin - span) - circular(&slope, bin + span);
            (bin as usize, sharpness)
        })
        .collect()
}

/// Greedily keep the best candidates that are far enough apart.
fn select_corners(mut candidates: Vec<(usize, f64)>) -> Vec<usize> {
    let min_separation =
        (MIN_CORNER_SEPARATION_DEGREES / 360.0 * PROFILE_BINS as f64).round() as usize;
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut chosen: Vec<usize> = Vec::with_capacity(4);
    for (bin, _) in candidates {
        let separated = chosen.iter().all(|&other| {
            let gap = bin.abs_diff(other);
            gap.min(PROFILE_BINS - gap) >= min_separation
        });
        if separated {
            chosen.push(bin);
            if chosen.len() == 4 {
                break;
            }
        }
    }
    chosen
}

/// Locate the four corners of the foreground silhouette from its radial profile.
///
/// Corners are returned clockwise on screen, starting from the corner nearest
/// the image origin.
pub fn detect_corners(
    mask: &Mask,
    method: DetectionMethod,
    smoothing: usize,
) -> Result<Quadrilateral> {
    let profile = RadialProfile::from_mask(mask).ok_or(RectifyError::NoForeground)?;
    let filled = profile.filled().ok_or_else(|| {
        RectifyError::DegenerateGeometry("silhouette too small to locate corners".to_string())
    })?;
    let smoothed = smooth(&filled, smoothing);

    let candidates = match method {
        DetectionMethod::Peak => peak_candidates(&smoothed),
        DetectionMethod::Derivative => derivative_candidates(&smoothed),
    };
    let chosen = select_corners(candidates);
    if chosen.len() < 4 {
        return Err(RectifyError::DegenerateGeometry(format!(
            "found {} of 4 corners",
            chosen.len()
        )));
    }

    let reach = smoothing.max(2);
    let mut corners: Vec<Point> = chosen
        .iter()
        .filter_map(|&bin| profile.corner_near(bin, reach))
        .collect();
    if corners.len() < 4 {
        return Err(RectifyError::DegenerateGeometry(
            "corner bin without foreground".to_string(),
        ));
    }

    // Increasing atan2 is clockwise on screen with y pointing down
    let (cx, cy) = profile.centroid;
    corners.sort_by(|a, b| (a.y - cy).atan2(a.x - cx).total_cmp(&(b.y - cy).atan2(b.x - cx)));
    let first = corners
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1.x + a.1.y).total_cmp(&(b.1.x + b.1.y)))
        .map_or(0, |(i, _)| i);
    corners.rotate_left(first);

    debug!(
        ?method,
        centroid = ?profile.centroid,
        corners = ?corners,
        "Corners detected from radial profile"
    );

    Quadrilateral::new(corners[0], corners[1], corners[2], corners[3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::MaskOptions;
    use image::{Rgba, RgbaImage};
    use imageproc::drawing::draw_polygon_mut;
    use imageproc::point::Point as PolygonPoint;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn quad_mask(corners: &[(i32, i32); 4]) -> Mask {
        let mut img = RgbaImage::from_pixel(200, 160, WHITE);
        let polygon: Vec<PolygonPoint<i32>> = corners
            .iter()
            .map(|&(x, y)| PolygonPoint::new(x, y))
            .collect();
        draw_polygon_mut(&mut img, &polygon, BLACK);
        Mask::build(&img, &MaskOptions::default()).unwrap()
    }

    fn assert_near(actual: Point, expected: (i32, i32)) {
        let distance = actual.distance(&Point::new(expected.0 as f64, expected.1 as f64));
        assert!(
            distance <= 3.0,
            "corner {:?} too far from {:?}",
            actual,
            expected
        );
    }

    const TRAPEZOID: [(i32, i32); 4] = [(40, 30), (165, 20), (150, 130), (30, 140)];

    #[test]
    fn test_peak_finds_trapezoid_corners() {
        let mask = quad_mask(&TRAPEZOID);
        let quad = detect_corners(&mask, DetectionMethod::Peak, 3).unwrap();
        for (corner, expected) in quad.corners().iter().zip(TRAPEZOID.iter()) {
            assert_near(*corner, *expected);
        }
    }

    #[test]
    fn test_derivative_finds_trapezoid_corners() {
        let mask = quad_mask(&TRAPEZOID);
        let quad = detect_corners(&mask, DetectionMethod::Derivative, 3).unwrap();
        for (corner, expected) in quad.corners().iter().zip(TRAPEZOID.iter()) {
            assert_near(*corner, *expected);
        }
    }

    #[test]
    fn test_empty_mask_has_no_corners() {
        let img = RgbaImage::from_pixel(20, 20, WHITE);
        let mask = Mask::build(&img, &MaskOptions::default()).unwrap();
        let err = detect_corners(&mask, DetectionMethod::Peak, 3).unwrap_err();
        assert_eq!(err, RectifyError::NoForeground);
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("Peak".parse::<DetectionMethod>().unwrap(), DetectionMethod::Peak);
        assert_eq!(
            DetectionMethod::try_from(1u8).unwrap(),
            DetectionMethod::Derivative
        );
        let err = "hough".parse::<DetectionMethod>().unwrap_err();
        assert!(matches!(err, RectifyError::InvalidArgument { name: "method", .. }));
        assert!(DetectionMethod::try_from(7u8).is_err());
    }

    #[test]
    fn test_select_corners_enforces_separation() {
        let candidates = vec![(0, 10.0), (5, 9.0), (100, 8.0), (300, 7.0), (500, 6.0), (650, 5.0)];
        let chosen = select_corners(candidates);
        assert_eq!(chosen, vec![0, 100, 300, 500]);
    }
}
