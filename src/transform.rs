use image::{imageops, Rgba, RgbaImage};
use nalgebra::Matrix3;
use tracing::debug;

use crate::color::{fuzzy_eq, Fuzz};
use crate::error::{RectifyError, Result};
use crate::geometry::{compute_output_bounds, rotation_matrix, transform_point, Rect};

/// Output raster of a warp: its size and the position of its origin in
/// transformed coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

/// Premultiply alpha: RGB values are multiplied by alpha
fn premultiply(pixel: &Rgba<u8>) -> [f64; 4] {
    let alpha = pixel[3] as f64 / 255.0;
    [
        pixel[0] as f64 * alpha,
        pixel[1] as f64 * alpha,
        pixel[2] as f64 * alpha,
        pixel[3] as f64,
    ]
}

fn premultiply_alpha(img: &RgbaImage) -> Vec<[f64; 4]> {
    img.pixels().map(premultiply).collect()
}

/// Unpremultiply alpha: divide RGB by alpha
fn unpremultiply_alpha(premultiplied: [f64; 4]) -> Rgba<u8> {
    let alpha = premultiplied[3];
    if alpha < 1.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let alpha_norm = alpha / 255.0;
    let r = (premultiplied[0] / alpha_norm).round().clamp(0.0, 255.0) as u8;
    let g = (premultiplied[1] / alpha_norm).round().clamp(0.0, 255.0) as u8;
    let b = (premultiplied[2] / alpha_norm).round().clamp(0.0, 255.0) as u8;
    let a = alpha.round().clamp(0.0, 255.0) as u8;

    Rgba([r, g, b, a])
}

/// Cubic interpolation kernel (Catmull-Rom)
fn cubic_weight(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;

    [
        -0.5 * t3 + t2 - 0.5 * t,
        1.5 * t3 - 2.5 * t2 + 1.0,
        -1.5 * t3 + 2.0 * t2 + 0.5 * t,
        0.5 * t3 - 0.5 * t2,
    ]
}

/// Bicubic interpolation at a given position.
///
/// Taps outside the source read `fill`, so edges blend into the background
/// instead of smearing the border pixels outward.
fn bicubic_interpolate(
    premultiplied: &[[f64; 4]],
    width: u32,
    height: u32,
    fill: [f64; 4],
    x: f64,
    y: f64,
) -> [f64; 4] {
    let x_floor = x.floor() as i64;
    let y_floor = y.floor() as i64;
    let x_frac = x - x.floor();
    let y_frac = y - y.floor();

    let wx = cubic_weight(x_frac);
    let wy = cubic_weight(y_frac);

    let mut result = [0.0; 4];

    for (j, weight_y) in wy.iter().enumerate() {
        let py = y_floor + j as i64 - 1;
        for (i, weight_x) in wx.iter().enumerate() {
            let px = x_floor + i as i64 - 1;
            let sample = if px >= 0 && py >= 0 && px < width as i64 && py < height as i64 {
                premultiplied[(py as usize) * width as usize + px as usize]
            } else {
                fill
            };

            let weight = weight_x * weight_y;
            for c in 0..4 {
                result[c] += sample[c] * weight;
            }
        }
    }

    result
}

/// Warp `img` through a forward projective `matrix` using inverse mapping.
///
/// Every canvas pixel is mapped back into the source and sampled bicubically;
/// pixels that land outside the source get `fill`.
pub fn warp(
    img: &RgbaImage,
    forward_matrix: &Matrix3<f64>,
    canvas: Canvas,
    fill: Rgba<u8>,
) -> Result<RgbaImage> {
    let (src_width, src_height) = img.dimensions();

    // Compute inverse matrix for backward mapping
    let inverse_matrix = forward_matrix
        .try_inverse()
        .ok_or(RectifyError::UnsolvableMatrix)?;

    let premultiplied = premultiply_alpha(img);
    let fill_premultiplied = premultiply(&fill);

    let mut output = RgbaImage::from_pixel(canvas.width, canvas.height, fill);

    for out_y in 0..canvas.height {
        for out_x in 0..canvas.width {
            let dst_x = out_x as f64 + canvas.offset_x;
            let dst_y = out_y as f64 + canvas.offset_y;
            let (src_x, src_y) = transform_point(&inverse_matrix, dst_x, dst_y);

            // Leave the fill where even the outermost bicubic tap misses the source
            if src_x > -2.0
                && src_x < src_width as f64 + 1.0
                && src_y > -2.0
                && src_y < src_height as f64 + 1.0
            {
                let interpolated = bicubic_interpolate(
                    &premultiplied,
                    src_width,
                    src_height,
                    fill_premultiplied,
                    src_x,
                    src_y,
                );
                output.put_pixel(out_x, out_y, unpremultiply_alpha(interpolated));
            }
        }
    }

    Ok(output)
}

/// Rotate about the image center onto a canvas large enough to hold every
/// source pixel. Positive degrees turn clockwise.
pub fn rotate(img: &RgbaImage, degrees: f64, fill: Rgba<u8>) -> Result<RgbaImage> {
    let (width, height) = img.dimensions();
    let center = ((width as f64 - 1.0) / 2.0, (height as f64 - 1.0) / 2.0);
    let matrix = rotation_matrix(degrees, center);

    let (new_width, new_height, offset_x, offset_y) = compute_output_bounds(&matrix, width, height);

    debug!(
        degrees,
        width, height, new_width, new_height, "Rotating onto enlarged canvas"
    );

    warp(
        img,
        &matrix,
        Canvas {
            width: new_width,
            height: new_height,
            offset_x,
            offset_y,
        },
        fill,
    )
}

/// Add `border` pixels of `color` around every edge.
pub fn pad(img: &RgbaImage, border: u32, color: Rgba<u8>) -> RgbaImage {
    let (width, height) = img.dimensions();
    let mut padded = RgbaImage::from_pixel(width + 2 * border, height + 2 * border, color);
    imageops::replace(&mut padded, img, border as i64, border as i64);
    padded
}

/// Remove `border` pixels from every edge (inverse of [`pad`]).
pub fn shave<P: image::Pixel + 'static>(
    img: &image::ImageBuffer<P, Vec<P::Subpixel>>,
    border: u32,
) -> image::ImageBuffer<P, Vec<P::Subpixel>> {
    let (width, height) = img.dimensions();
    let new_width = width.saturating_sub(2 * border);
    let new_height = height.saturating_sub(2 * border);
    imageops::crop_imm(img, border, border, new_width, new_height).to_image()
}

/// Copy out `rect` without interpolation.
pub fn crop(img: &RgbaImage, rect: Rect) -> RgbaImage {
    imageops::crop_imm(img, rect.x, rect.y, rect.width, rect.height).to_image()
}

/// Bounding box of pixels that differ from `color` under `fuzz`.
pub fn content_bounds(img: &RgbaImage, color: Rgba<u8>, fuzz: Fuzz) -> Option<Rect> {
    let (width, height) = img.dimensions();
    let mut min_x = width;
    let mut max_x = 0;
    let mut min_y = height;
    let mut max_y = 0;

    for (x, y, pixel) in img.enumerate_pixels() {
        if !fuzzy_eq(*pixel, color, fuzz) {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
    }

    if min_x <= max_x && min_y <= max_y {
        Some(Rect::from_edges(min_x, min_y, max_x, max_y))
    } else {
        None
    }
}

/// Trim a uniform border of `color`. An image made only of that color is
/// returned unchanged.
pub fn trim_border(img: &RgbaImage, color: Rgba<u8>, fuzz: Fuzz) -> RgbaImage {
    match content_bounds(img, color, fuzz) {
        Some(rect) => crop(img, rect),
        None => img.clone(),
    }
}
