pub mod letterbox;

use ndarray::{Array, IxDyn};

pub use letterbox::{LETTERBOX_FILL, LetterboxPreprocessor};

/// Target inference size: a single int means a square target, otherwise an
/// explicit (height, width) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSize {
    Square(u32),
    Rect { height: u32, width: u32 },
}

impl TargetSize {
    /// Target dimensions as (height, width).
    pub fn dims(&self) -> (u32, u32) {
        match *self {
            TargetSize::Square(n) => (n, n),
            TargetSize::Rect { height, width } => (height, width),
        }
    }
}

/// The scale and padding applied while letterboxing one image.
///
/// Post-processing inverts this exactly to map boxes from padded-image pixel
/// space back onto the original pixel grid.
#[derive(Debug, Clone, Copy)]
pub struct LetterboxTransform {
    /// Resize factor applied to both dimensions.
    pub scale: f32,
    /// Half of the horizontal padding, before rounding to whole-pixel borders.
    pub pad_x: f32,
    /// Half of the vertical padding, before rounding to whole-pixel borders.
    pub pad_y: f32,
    pub padded_width: u32,
    pub padded_height: u32,
    pub orig_width: u32,
    pub orig_height: u32,
}

impl LetterboxTransform {
    /// Map an x coordinate from padded space back to the original image,
    /// clamped to its bounds.
    pub fn invert_x(&self, x: f32) -> f32 {
        ((x - self.pad_x) / self.scale).clamp(0.0, self.orig_width as f32)
    }

    /// Map a y coordinate from padded space back to the original image,
    /// clamped to its bounds.
    pub fn invert_y(&self, y: f32) -> f32 {
        ((y - self.pad_y) / self.scale).clamp(0.0, self.orig_height as f32)
    }
}

/// Letterboxed single-image batch plus the transform that produced it.
#[derive(Debug)]
pub struct LetterboxOutput {
    /// Contiguous `[1, 3, H, W]` array, RGB scaled to [0, 1].
    pub tensor: Array<f32, IxDyn>,
    pub transform: LetterboxTransform,
}
