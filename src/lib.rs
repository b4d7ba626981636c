pub mod autotrim;
pub mod color;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod mask;
pub mod multicrop;
pub mod transform;
pub mod unperspective;
pub mod unrotate;

pub use autotrim::{Autotrim, AutotrimOptions};
pub use color::{fuzzy_eq, Fuzz};
pub use detection::{detect_corners, DetectionMethod};
pub use error::{RectifyError, Result};
pub use geometry::{PixelShift, Point, Quadrilateral, Rect};
pub use mask::{BackgroundSource, Mask, MaskOptions};
pub use multicrop::{Multicrop, MulticropOptions, Region};
pub use unperspective::{
    get_coefficients, get_dimensions, DefaultDimension, TransformCoefficients, Unperspective,
    UnperspectiveOptions,
};
pub use unrotate::{Unrotate, UnrotateOptions};
