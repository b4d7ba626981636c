use image::{Rgba, RgbaImage};
use tracing::{debug, info, instrument, warn};

use crate::color::Fuzz;
use crate::error::{ensure_not_empty, Result};
use crate::mask::{resolve_background, BackgroundSource, Mask, MaskOptions};
use crate::transform::{rotate, trim_border};

/// The estimator cannot tell +45 from -45, so results fold into this range.
const MAX_AUTO_ANGLE: f64 = 45.0;

/// Added before truncating to hundredths so exact ties do not flap.
const ANGLE_BIAS: f64 = 0.005;

/// Options for [`Unrotate`].
#[derive(Debug, Clone, PartialEq)]
pub struct UnrotateOptions {
    /// Rotation to apply in degrees; 0 estimates it from the silhouette
    pub angle: f64,
    /// Background color; sampled at `coords` when unset
    pub background: Option<Rgba<u8>>,
    pub fuzz: Fuzz,
    /// Seed for the background flood fill
    pub coords: (u32, u32),
}

impl Default for UnrotateOptions {
    fn default() -> Self {
        Self {
            angle: 0.0,
            background: None,
            fuzz: Fuzz::EXACT,
            coords: (0, 0),
        }
    }
}

impl UnrotateOptions {
    #[must_use]
    pub fn angle(mut self, degrees: f64) -> Self {
        self.angle = degrees;
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
    pub fn coords(mut self, x: u32, y: u32) -> Self {
        self.coords = (x, y);
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

/// Removes the residual rotation of an object on a uniform background.
#[derive(Debug, Clone, Default)]
pub struct Unrotate {
    options: UnrotateOptions,
}

impl Unrotate {
    pub fn new(options: UnrotateOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &UnrotateOptions {
        &self.options
    }

    /// Rotate `img` upright and trim the border the rotation leaves behind.
    #[instrument(skip_all, fields(width = img.width(), height = img.height()))]
    pub fn execute(&self, img: &RgbaImage) -> Result<RgbaImage> {
        ensure_not_empty(img)?;

        let angle = if self.options.angle == 0.0 {
            self.estimate_angle(img)?
        } else {
            self.options.angle
        };

        let mask_options = self.options.mask_options();
        let background = resolve_background(img, &mask_options)?;

        let rotated = if angle == 0.0 {
            img.clone()
        } else {
            rotate(img, angle, background)?
        };
        let output = trim_border(&rotated, background, self.options.fuzz);

        info!(
            angle,
            width = output.width(),
            height = output.height(),
            "Unrotate complete"
        );
        Ok(output)
    }

    /// Correction angle in degrees (positive turns clockwise), derived from
    /// where the silhouette touches the top and left edges of its bounding box.
    pub fn estimate_angle(&self, img: &RgbaImage) -> Result<f64> {
        ensure_not_empty(img)?;

        let mask = Mask::build(img, &self.options.mask_options())?;
        let Some(trimmed) = mask.trimmed() else {
            warn!("No foreground found; assuming the image is upright");
            return Ok(0.0);
        };

        // 1-based positions of the first foreground pixel down column 0 and
        // across row 0 of the trimmed silhouette
        let p1y = (0..trimmed.height())
            .find(|&y| trimmed.is_foreground(0, y))
            .map_or(1, |y| y + 1);
        let p2x = (0..trimmed.width())
            .find(|&x| trimmed.is_foreground(x, 0))
            .map_or(1, |x| x + 1);

        let angle = angle_from_edges(p1y, p2x);
        debug!(p1y, p2x, angle, "Skew estimated from silhouette");
        Ok(angle)
    }
}

/// Correction angle from the 1-based row where the silhouette meets the left
/// edge (`p1y`) and the column where it meets the top edge (`p2x`).
pub fn angle_from_edges(p1y: u32, p2x: u32) -> f64 {
    let delta_x = p2x as f64 - 1.0;
    let delta_y = p1y as f64 - 1.0;
    if delta_x == 0.0 {
        return 0.0;
    }

    let mut angle = delta_y.atan2(delta_x).to_degrees();
    if angle > MAX_AUTO_ANGLE {
        angle -= 90.0;
    }
    ((angle + ANGLE_BIAS) * 100.0).trunc() / 100.0
}
