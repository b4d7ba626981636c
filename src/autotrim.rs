use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::definitions::Image;
use imageproc::integral_image::{integral_image, sum_image_pixels};
use tracing::{debug, info, instrument};

use crate::color::Fuzz;
use crate::error::{ensure_not_empty, RectifyError, Result};
use crate::geometry::{PixelShift, Rect};
use crate::mask::{BackgroundSource, EdgeLine, Mask, MaskOptions};
use crate::transform::crop;

/// Options for [`Autotrim`].
#[derive(Debug, Clone, PartialEq)]
pub struct AutotrimOptions {
    /// Where the border color is sampled and the flood fill starts
    pub border_color_location: (u32, u32),
    /// Border color; sampled at `border_color_location` when unset
    pub background: Option<Rgba<u8>>,
    pub fuzz: Fuzz,
    /// Crop to the largest rectangle free of background instead of the
    /// smallest rectangle holding all foreground
    pub inner_trim: bool,
    pub pixel_shift: PixelShift,
}

impl Default for AutotrimOptions {
    fn default() -> Self {
        Self {
            border_color_location: (0, 0),
            background: None,
            fuzz: Fuzz::EXACT,
            inner_trim: false,
            pixel_shift: PixelShift::default(),
        }
    }
}

impl AutotrimOptions {
    #[must_use]
    pub fn border_color_location(mut self, x: u32, y: u32) -> Self {
        self.border_color_location = (x, y);
        self
    }

    #[must_use]
    pub fn background(mut self, color: Rgba<u8>) -> Self {
        self.background = Some(color);
        self
    }

    #[must_use]
    pub fn fuzz(mut self, fuzz: Fuzz) -> Self {
        self.fuzz = fuzz;
        self
    }

    #[must_use]
    pub fn inner_trim(mut self, inner: bool) -> Self {
        self.inner_trim = inner;
        self
    }

    #[must_use]
    pub fn pixel_shift(mut self, shift: PixelShift) -> Self {
        self.pixel_shift = shift;
        self
    }

    fn mask_options(&self) -> MaskOptions {
        MaskOptions {
            background: BackgroundSource::from(self.background),
            seed: self.border_color_location,
            fuzz: self.fuzz,
        }
    }
}

/// Crops the border around an object on a uniform background.
#[derive(Debug, Clone, Default)]
pub struct Autotrim {
    options: AutotrimOptions,
}

impl Autotrim {
    pub fn new(options: AutotrimOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AutotrimOptions {
        &self.options
    }

    #[instrument(skip_all, fields(width = img.width(), height = img.height()))]
    pub fn execute(&self, img: &RgbaImage) -> Result<RgbaImage> {
        let rect = self.trim_rect(img)?;
        let output = crop(img, rect);
        info!(
            x = rect.x,
            y = rect.y,
            width = rect.width,
            height = rect.height,
            inner = self.options.inner_trim,
            "Autotrim complete"
        );
        Ok(output)
    }

    /// Crop rectangle for `img`, pixel shift included.
    pub fn trim_rect(&self, img: &RgbaImage) -> Result<Rect> {
        ensure_not_empty(img)?;

        let mask = Mask::build(img, &self.options.mask_options())?;
        let rows = mask.row_lines();
        let columns = mask.column_lines();

        let outer = mask.foreground_bounds().ok_or(RectifyError::NoForeground)?;
        let detected = if self.options.inner_trim {
            inner_rect(&rows, &columns, outer)
                .and_then(|covered| clear_background(&mask, covered))
                .ok_or_else(|| {
                    RectifyError::DegenerateGeometry(
                        "no background-free rectangle inside the silhouette".to_string(),
                    )
                })?
        } else {
            outer
        };
        debug!(?outer, ?detected, "Trim rectangle detected");

        Ok(self
            .options
            .pixel_shift
            .apply(detected, img.width(), img.height()))
    }
}

/// Index scanlines by position, `None` where a scanline holds no foreground.
fn index_lines(lines: &[EdgeLine], start: u32, end: u32) -> Vec<Option<EdgeLine>> {
    let mut indexed = vec![None; (end - start + 1) as usize];
    for line in lines {
        if (start..=end).contains(&line.index) {
            indexed[(line.index - start) as usize] = Some(*line);
        }
    }
    indexed
}

/// Largest background-free rectangle inside `outer`, found by walking the
/// worst side inward until every scanline crossing each side covers it.
///
/// A side is covered by a perpendicular scanline when the scanline's
/// foreground extent spans the side's coordinate. Ties move the left side
/// first, then top, right and bottom.
pub fn inner_rect(rows: &[EdgeLine], columns: &[EdgeLine], outer: Rect) -> Option<Rect> {
    let row_at = index_lines(rows, outer.y, outer.bottom());
    let column_at = index_lines(columns, outer.x, outer.right());

    let (mut left, mut top) = (outer.x, outer.y);
    let (mut right, mut bottom) = (outer.right(), outer.bottom());

    let row_covers = |y: u32, x: u32| row_at[(y - outer.y) as usize].is_some_and(|l| l.covers(x));
    let column_covers =
        |x: u32, y: u32| column_at[(x - outer.x) as usize].is_some_and(|l| l.covers(y));

    loop {
        if left > right || top > bottom {
            return None;
        }

        let misses = [
            (top..=bottom).filter(|&y| !row_covers(y, left)).count(),
            (left..=right).filter(|&x| !column_covers(x, top)).count(),
            (top..=bottom).filter(|&y| !row_covers(y, right)).count(),
            (left..=right).filter(|&x| !column_covers(x, bottom)).count(),
        ];

        let worst = misses.iter().copied().max().unwrap_or(0);
        if worst == 0 {
            return Some(Rect::from_edges(left, top, right, bottom));
        }

        match misses.iter().position(|&m| m == worst) {
            Some(0) => left += 1,
            Some(1) => top += 1,
            Some(2) => right = right.checked_sub(1)?,
            _ => bottom = bottom.checked_sub(1)?,
        }
    }
}

/// Move the side of `rect` holding the most background pixels inward until
/// `rect` holds none. Ties use the same order as [`inner_rect`].
///
/// Scanline extents miss background channels with foreground on both sides,
/// so the count comes from a summed-area table of the mask.
fn clear_background(mask: &Mask, rect: Rect) -> Option<Rect> {
    let background = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([u8::from(!mask.is_foreground(x, y))])
    });
    let table: Image<Luma<u32>> = integral_image::<_, u32>(&background);
    let count = |left: u32, top: u32, right: u32, bottom: u32| {
        sum_image_pixels(&table, left, top, right, bottom)[0]
    };

    let (mut left, mut top) = (rect.x, rect.y);
    let (mut right, mut bottom) = (rect.right(), rect.bottom());
    let mut moves = 0usize;

    loop {
        if left > right || top > bottom {
            return None;
        }
        if count(left, top, right, bottom) == 0 {
            if moves > 0 {
                debug!(moves, "Background channels cut from inner rectangle");
            }
            return Some(Rect::from_edges(left, top, right, bottom));
        }

        // Background reached from outside always crosses a side; a seed placed
        // in an enclosed pocket can leave all four sides clean, then left moves.
        let sides = [
            count(left, top, left, bottom),
            count(left, top, right, top),
            count(right, top, right, bottom),
            count(left, bottom, right, bottom),
        ];
        let worst = sides.iter().copied().max().unwrap_or(0);
        match sides.iter().position(|&c| c == worst) {
            Some(0) => left += 1,
            Some(1) => top += 1,
            Some(2) => right = right.checked_sub(1)?,
            _ => bottom = bottom.checked_sub(1)?,
        }
        moves += 1;
    }
}
