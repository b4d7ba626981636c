use thiserror::Error;

/// Errors raised by the rectification recipes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RectifyError {
    /// Missing or malformed input, such as an empty image or an unknown enum value.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// A configured value or coordinate lies outside its allowed range.
    #[error("`{name}` is out of range: {reason}")]
    OutOfRange { name: &'static str, reason: String },

    /// The projective coefficient system is singular or produced a non-finite value.
    #[error("Unsolvable matrix detected.")]
    UnsolvableMatrix,

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// The mask contains no foreground pixel.
    #[error("no foreground detected against the background color")]
    NoForeground,
}

pub type Result<T> = std::result::Result<T, RectifyError>;

impl RectifyError {
    pub(crate) fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn out_of_range(name: &'static str, reason: impl Into<String>) -> Self {
        Self::OutOfRange {
            name,
            reason: reason.into(),
        }
    }
}

/// Reject zero-sized buffers before any work is done on them.
pub(crate) fn ensure_not_empty<P, C>(img: &image::ImageBuffer<P, C>) -> Result<()>
where
    P: image::Pixel,
    C: std::ops::Deref<Target = [P::Subpixel]>,
{
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(RectifyError::invalid_argument(
            "image",
            format!("image has no pixels ({}x{})", width, height),
        ));
    }
    Ok(())
}
