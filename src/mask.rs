//! Background/foreground silhouette shared by every rectification recipe.
//!
//! The mask is built by a fuzzy flood fill seeded at a caller-supplied
//! coordinate. The image is first padded with a one pixel ring of the
//! background color so that background touching any edge is reachable from a
//! seed on the border, even when the background is interrupted by foreground
//! along that edge.

use image::{imageops, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::debug;

use crate::color::{fuzzy_eq, Fuzz};
use crate::error::{ensure_not_empty, RectifyError, Result};
use crate::geometry::Rect;
use crate::transform::{pad, shave};

/// Mask value for foreground pixels
pub const FOREGROUND: u8 = 255;

/// Mask value for background pixels
pub const BACKGROUND: u8 = 0;

/// Where the background color comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundSource {
    /// Use this color.
    Color(Rgba<u8>),
    /// Sample the color at the seed coordinate.
    Sample,
}

impl From<Option<Rgba<u8>>> for BackgroundSource {
    fn from(color: Option<Rgba<u8>>) -> Self {
        color.map_or(BackgroundSource::Sample, BackgroundSource::Color)
    }
}

/// Parameters of a mask build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskOptions {
    pub background: BackgroundSource,
    /// Flood fill seed
    pub seed: (u32, u32),
    pub fuzz: Fuzz,
}

impl Default for MaskOptions {
    fn default() -> Self {
        Self {
            background: BackgroundSource::Sample,
            seed: (0, 0),
            fuzz: Fuzz::EXACT,
        }
    }
}

/// Extent of the foreground on one scanline.
///
/// `index` is the row (for row lines) or column (for column lines); `min` and
/// `max` are the first and last foreground coordinates along it, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeLine {
    pub index: u32,
    pub min: u32,
    pub max: u32,
}

impl EdgeLine {
    pub fn covers(&self, coordinate: u32) -> bool {
        self.min <= coordinate && coordinate <= self.max
    }
}

/// Binary silhouette: [`FOREGROUND`] where the flood fill did not reach.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pixels: GrayImage,
    background: Rgba<u8>,
}

/// Resolve the background color for `options` against `img`.
pub fn resolve_background(img: &RgbaImage, options: &MaskOptions) -> Result<Rgba<u8>> {
    ensure_not_empty(img)?;
    let (width, height) = img.dimensions();
    let (seed_x, seed_y) = options.seed;
    if seed_x >= width || seed_y >= height {
        return Err(RectifyError::out_of_range(
            "seed",
            format!(
                "({}, {}) is outside the {}x{} image",
                seed_x, seed_y, width, height
            ),
        ));
    }

    Ok(match options.background {
        BackgroundSource::Color(color) => color,
        BackgroundSource::Sample => *img.get_pixel(seed_x, seed_y),
    })
}

impl Mask {
    /// Flood fill from the seed and classify every pixel.
    pub fn build(img: &RgbaImage, options: &MaskOptions) -> Result<Self> {
        let background = resolve_background(img, options)?;
        let (seed_x, seed_y) = options.seed;

        let padded = pad(img, 1, background);

        // 255 marks pixels the fill may spread through
        let matches = GrayImage::from_fn(padded.width(), padded.height(), |x, y| {
            if fuzzy_eq(*padded.get_pixel(x, y), background, options.fuzz) {
                Luma([255])
            } else {
                Luma([0])
            }
        });

        let labels = connected_components(&matches, Connectivity::Four, Luma([0u8]));
        let seed_label = labels.get_pixel(seed_x + 1, seed_y + 1)[0];

        let filled = GrayImage::from_fn(padded.width(), padded.height(), |x, y| {
            let label = labels.get_pixel(x, y)[0];
            if seed_label != 0 && label == seed_label {
                Luma([BACKGROUND])
            } else {
                Luma([FOREGROUND])
            }
        });

        let mask = Self {
            pixels: shave(&filled, 1),
            background,
        };

        debug!(
            width = img.width(),
            height = img.height(),
            seed_x,
            seed_y,
            background = ?background,
            fuzz = options.fuzz.percent(),
            foreground = mask.foreground_count(),
            "Background mask built"
        );

        Ok(mask)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Background color the fill was seeded with
    pub fn background(&self) -> Rgba<u8> {
        self.background
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.pixels
    }

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.pixels.get_pixel(x, y)[0] == FOREGROUND
    }

    pub fn foreground_count(&self) -> usize {
        self.pixels.pixels().filter(|p| p[0] == FOREGROUND).count()
    }

    /// Smallest rectangle containing every foreground pixel
    pub fn foreground_bounds(&self) -> Option<Rect> {
        let rows = self.row_lines();
        let top = rows.first()?.index;
        let bottom = rows.last()?.index;
        let left = rows.iter().map(|line| line.min).min()?;
        let right = rows.iter().map(|line| line.max).max()?;
        Some(Rect::from_edges(left, top, right, bottom))
    }

    /// Crop the mask to its foreground bounding box.
    pub fn trimmed(&self) -> Option<Mask> {
        let rect = self.foreground_bounds()?;
        Some(Self {
            pixels: imageops::crop_imm(&self.pixels, rect.x, rect.y, rect.width, rect.height)
                .to_image(),
            background: self.background,
        })
    }

    /// Foreground extent of every row holding foreground, top to bottom.
    pub fn row_lines(&self) -> Vec<EdgeLine> {
        (0..self.height())
            .filter_map(|y| {
                let mut xs = (0..self.width()).filter(|&x| self.is_foreground(x, y));
                let min = xs.next()?;
                let max = xs.last().unwrap_or(min);
                Some(EdgeLine { index: y, min, max })
            })
            .collect()
    }

    /// Foreground extent of every column holding foreground, left to right.
    pub fn column_lines(&self) -> Vec<EdgeLine> {
        (0..self.width())
            .filter_map(|x| {
                let mut ys = (0..self.height()).filter(|&y| self.is_foreground(x, y));
                let min = ys.next()?;
                let max = ys.last().unwrap_or(min);
                Some(EdgeLine { index: x, min, max })
            })
            .collect()
    }
}
