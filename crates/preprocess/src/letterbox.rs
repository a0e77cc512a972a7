use crate::{LetterboxOutput, LetterboxTransform, TargetSize};
use common::span;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use image::RgbImage;
use ndarray::{Array, IxDyn};

/// Neutral border color used for the padded region.
pub const LETTERBOX_FILL: u8 = 114;

/// Aspect-preserving padded resize.
///
/// Scales the image so its limiting dimension matches the target, then pads
/// the remainder with [`LETTERBOX_FILL`] borders reduced modulo `stride`, so
/// the final dimensions are stride-aligned.
pub struct LetterboxPreprocessor {
    resizer: Resizer,
}

impl LetterboxPreprocessor {
    pub fn new() -> Self {
        Self {
            resizer: Resizer::new(),
        }
    }

    /// Letterbox `image` to `target`, producing a `[1, 3, H, W]` float array
    /// in [0, 1] and the transform needed to invert the mapping.
    pub fn letterbox(
        &mut self,
        image: &RgbImage,
        target: TargetSize,
        stride: u32,
    ) -> anyhow::Result<LetterboxOutput> {
        let _s = span!("letterbox");

        let (orig_width, orig_height) = image.dimensions();
        if orig_width == 0 || orig_height == 0 {
            anyhow::bail!("cannot letterbox an empty image");
        }
        let (target_height, target_width) = target.dims();
        if target_height == 0 || target_width == 0 || stride == 0 {
            anyhow::bail!(
                "invalid letterbox target {}x{} (stride {})",
                target_height,
                target_width,
                stride
            );
        }

        let scale = (target_height as f32 / orig_height as f32)
            .min(target_width as f32 / orig_width as f32);
        let new_width = ((orig_width as f32 * scale).round() as u32).max(1);
        let new_height = ((orig_height as f32 * scale).round() as u32).max(1);

        // Residual padding reduced modulo stride, then split across both
        // sides. The halves keep their fractional part; borders round it away.
        let pad_x = ((target_width - new_width) % stride) as f32 / 2.0;
        let pad_y = ((target_height - new_height) % stride) as f32 / 2.0;
        let left = (pad_x - 0.1).round().max(0.0) as u32;
        let right = (pad_x + 0.1).round() as u32;
        let top = (pad_y - 0.1).round().max(0.0) as u32;
        let bottom = (pad_y + 0.1).round() as u32;

        let padded_width = new_width + left + right;
        let padded_height = new_height + top + bottom;

        tracing::trace!(
            orig_width,
            orig_height,
            scale,
            padded_width,
            padded_height,
            "Letterboxing image"
        );

        let resized;
        let resized_data: &[u8] = if (new_width, new_height) == (orig_width, orig_height) {
            image.as_raw()
        } else {
            let src = ImageRef::new(orig_width, orig_height, image.as_raw(), PixelType::U8x3)?;
            let mut dst = Image::new(new_width, new_height, PixelType::U8x3);
            self.resizer.resize(
                &src,
                &mut dst,
                &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
            )?;
            resized = dst;
            resized.buffer()
        };

        let row_bytes = (new_width * 3) as usize;
        let canvas_stride = (padded_width * 3) as usize;
        let mut canvas =
            vec![LETTERBOX_FILL; (padded_width as usize) * (padded_height as usize) * 3];
        for y in 0..new_height as usize {
            let src_row = y * row_bytes;
            let dst_row = (y + top as usize) * canvas_stride + (left * 3) as usize;
            canvas[dst_row..dst_row + row_bytes]
                .copy_from_slice(&resized_data[src_row..src_row + row_bytes]);
        }

        let tensor = Self::to_unit_chw(&canvas, padded_width, padded_height)?;

        Ok(LetterboxOutput {
            tensor,
            transform: LetterboxTransform {
                scale,
                pad_x,
                pad_y,
                padded_width,
                padded_height,
                orig_width,
                orig_height,
            },
        })
    }

    /// HWC u8 to contiguous CHW f32 in [0, 1], with a leading batch dim of 1.
    fn to_unit_chw(canvas: &[u8], width: u32, height: u32) -> anyhow::Result<Array<f32, IxDyn>> {
        let spatial = (width as usize) * (height as usize);
        let mut output = vec![0.0f32; 3 * spatial];

        for (i, px) in canvas.chunks_exact(3).enumerate() {
            output[i] = px[0] as f32 / 255.0;
            output[i + spatial] = px[1] as f32 / 255.0;
            output[i + 2 * spatial] = px[2] as f32 / 255.0;
        }

        Ok(Array::from_shape_vec(
            IxDyn(&[1, 3, height as usize, width as usize]),
            output,
        )?)
    }
}

impl Default for LetterboxPreprocessor {
    fn default() -> Self {
        Self::new()
    }
}
