//! Batch extraction of several objects scanned together on one background.
//!
//! Each separate foreground region is isolated on its own background canvas,
//! straightened with [`Unrotate`] and cropped with [`Autotrim`]. A region
//! whose correction fails is skipped so the rest of the batch still comes out.

use std::collections::BTreeMap;

use image::{ImageBuffer, Luma, Rgba, RgbaImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::{debug, info, instrument, warn};

use crate::autotrim::{Autotrim, AutotrimOptions};
use crate::color::Fuzz;
use crate::error::{ensure_not_empty, RectifyError, Result};
use crate::geometry::{PixelShift, Rect};
use crate::mask::{BackgroundSource, Mask, MaskOptions, BACKGROUND};
use crate::unrotate::{Unrotate, UnrotateOptions};

/// Regions smaller than this many pixels are treated as dust
const DEFAULT_MIN_AREA: usize = 100;

const DEFAULT_PADDING: u32 = 2;

/// Component label per pixel, 0 for background
type Labels = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Options for [`Multicrop`].
#[derive(Debug, Clone, PartialEq)]
pub struct MulticropOptions {
    /// Background color; sampled at `coords` when unset
    pub background: Option<Rgba<u8>>,
    pub coords: (u32, u32),
    pub fuzz: Fuzz,
    /// Minimum foreground pixel count for a region to be extracted
    pub min_area: usize,
    /// Background margin kept around each region before correction
    pub padding: u32,
    /// Straighten each region before trimming
    pub unrotate: bool,
    pub inner_trim: bool,
    pub pixel_shift: PixelShift,
}

impl Default for MulticropOptions {
    fn default() -> Self {
        Self {
            background: None,
            coords: (0, 0),
            fuzz: Fuzz::EXACT,
            min_area: DEFAULT_MIN_AREA,
            padding: DEFAULT_PADDING,
            unrotate: true,
            inner_trim: false,
            pixel_shift: PixelShift::default(),
        }
    }
}

impl MulticropOptions {
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
    pub fn min_area(mut self, pixels: usize) -> Self {
        self.min_area = pixels;
        self
    }

    #[must_use]
    pub fn padding(mut self, pixels: u32) -> Self {
        self.padding = pixels;
        self
    }

    #[must_use]
    pub fn unrotate(mut self, enabled: bool) -> Self {
        self.unrotate = enabled;
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
}

/// One connected foreground region of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub label: u32,
    pub bounds: Rect,
    /// Foreground pixel count
    pub area: usize,
}

fn label_regions(mask: &Mask) -> Labels {
    connected_components(mask.as_gray(), Connectivity::Eight, Luma([BACKGROUND]))
}

#[derive(Debug, Clone, Copy)]
struct RegionAccumulator {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    area: usize,
}

impl RegionAccumulator {
    fn new(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            area: 0,
        }
    }

    fn add(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.area += 1;
    }
}

/// Splits an image holding several objects into one corrected image per object.
#[derive(Debug, Clone, Default)]
pub struct Multicrop {
    options: MulticropOptions,
}

impl Multicrop {
    pub fn new(options: MulticropOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MulticropOptions {
        &self.options
    }

    /// Straighten and trim every region large enough to keep, top to bottom
    /// then left to right.
    #[instrument(skip_all, fields(width = img.width(), height = img.height()))]
    pub fn execute(&self, img: &RgbaImage) -> Result<Vec<RgbaImage>> {
        ensure_not_empty(img)?;

        let mask = Mask::build(img, &self.mask_options())?;
        let background = mask.background();
        let labels = label_regions(&mask);
        let regions = self.collect_regions(&labels)?;

        let unrotate = Unrotate::new(
            UnrotateOptions::default()
                .background(background)
                .fuzz(self.options.fuzz),
        );
        let autotrim = Autotrim::new(
            AutotrimOptions::default()
                .background(background)
                .fuzz(self.options.fuzz)
                .inner_trim(self.options.inner_trim)
                .pixel_shift(self.options.pixel_shift),
        );

        let mut outputs = Vec::with_capacity(regions.len());
        for (index, region) in regions.iter().enumerate() {
            let isolated = self.isolate(img, &labels, region, background);
            let corrected = if self.options.unrotate {
                unrotate
                    .execute(&isolated)
                    .and_then(|straight| autotrim.execute(&straight))
            } else {
                autotrim.execute(&isolated)
            };

            match corrected {
                Ok(output) => {
                    debug!(
                        index,
                        bounds = ?region.bounds,
                        width = output.width(),
                        height = output.height(),
                        "Region extracted"
                    );
                    outputs.push(output);
                }
                Err(err) => {
                    warn!(index, bounds = ?region.bounds, error = %err, "Skipping region");
                }
            }
        }

        info!(
            regions = regions.len(),
            extracted = outputs.len(),
            "Multicrop complete"
        );
        Ok(outputs)
    }

    /// Foreground regions of `img` at least `min_area` pixels large.
    pub fn regions(&self, img: &RgbaImage) -> Result<Vec<Region>> {
        ensure_not_empty(img)?;
        let mask = Mask::build(img, &self.mask_options())?;
        let labels = label_regions(&mask);
        self.collect_regions(&labels)
    }

    fn mask_options(&self) -> MaskOptions {
        MaskOptions {
            background: BackgroundSource::from(self.options.background),
            seed: self.options.coords,
            fuzz: self.options.fuzz,
        }
    }

    fn collect_regions(&self, labels: &Labels) -> Result<Vec<Region>> {
        let mut accumulators: BTreeMap<u32, RegionAccumulator> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0];
            if label == 0 {
                continue;
            }
            accumulators
                .entry(label)
                .or_insert_with(|| RegionAccumulator::new(x, y))
                .add(x, y);
        }
        if accumulators.is_empty() {
            return Err(RectifyError::NoForeground);
        }

        let total = accumulators.len();
        let mut regions: Vec<Region> = accumulators
            .into_iter()
            .filter(|(_, acc)| acc.area >= self.options.min_area)
            .map(|(label, acc)| Region {
                label,
                bounds: Rect::from_edges(acc.min_x, acc.min_y, acc.max_x, acc.max_y),
                area: acc.area,
            })
            .collect();
        regions.sort_by_key(|region| (region.bounds.y, region.bounds.x));

        debug!(
            components = total,
            kept = regions.len(),
            min_area = self.options.min_area,
            "Foreground regions labelled"
        );
        Ok(regions)
    }

    /// Copy `region` onto a padded background canvas, blanking pixels that
    /// belong to other regions.
    fn isolate(
        &self,
        img: &RgbaImage,
        labels: &Labels,
        region: &Region,
        background: Rgba<u8>,
    ) -> RgbaImage {
        let padding = self.options.padding;
        let bounds = region.bounds;
        let mut canvas = RgbaImage::from_pixel(
            bounds.width + 2 * padding,
            bounds.height + 2 * padding,
            background,
        );

        for y in bounds.y..=bounds.bottom() {
            for x in bounds.x..=bounds.right() {
                let label = labels.get_pixel(x, y)[0];
                if label == region.label || label == 0 {
                    canvas.put_pixel(
                        x - bounds.x + padding,
                        y - bounds.y + padding,
                        *img.get_pixel(x, y),
                    );
                }
            }
        }

        canvas
    }
}
