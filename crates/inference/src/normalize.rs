//! Converts surviving pixel-space detections into the public record shape:
//! 1-based remapped category, truncated confidence, and a width/height
//! normalized (x_min, y_min, width, height) box.

use crate::config::ModelProfile;
use crate::processing::post::PixelDetection;
use schema::Detection;

/// Truncate to `precision` significant decimal digits.
///
/// Floors at the digit boundary rather than rounding to nearest; downstream
/// consumers depend on the non-rounded convention for reproducibility.
pub fn truncate_float(x: f64, precision: u32) -> f64 {
    if x == 0.0 {
        return 0.0;
    }
    let magnitude = x.abs().log10().floor() as i32;
    let factor = 10f64.powi(precision as i32 - 1 - magnitude);
    (x * factor).floor() / factor
}

pub fn truncate_float_array(values: [f64; 4], precision: u32) -> [f64; 4] {
    values.map(|v| truncate_float(v, precision))
}

/// Normalize one surviving detection into the output record shape.
///
/// The native 0-based class index becomes a 1-based category id unless
/// passthrough was requested; a remapped id outside the profile's recognized
/// set is an error that fails the whole image.
pub fn normalize_detection(
    det: &PixelDetection,
    orig_width: u32,
    orig_height: u32,
    profile: &ModelProfile,
    use_native_classes: bool,
) -> anyhow::Result<Detection> {
    let bbox = to_normalized_xywh(det, orig_width, orig_height);

    let category = if use_native_classes {
        det.class_idx as u32
    } else {
        let id = det.class_idx as u32 + 1;
        if !profile.categories.contains(&id) {
            anyhow::bail!("{} is not a valid class", id);
        }
        id
    };

    Ok(Detection {
        category: category.to_string(),
        conf: truncate_float(det.conf as f64, profile.conf_digits),
        bbox: truncate_float_array(bbox, profile.coord_digits),
    })
}

/// Pixel corners to normalized (x_min, y_min, width, height), going through
/// the center form the model emits.
fn to_normalized_xywh(det: &PixelDetection, orig_width: u32, orig_height: u32) -> [f64; 4] {
    let gw = orig_width as f64;
    let gh = orig_height as f64;

    let cx = (det.x1 + det.x2) as f64 / 2.0 / gw;
    let cy = (det.y1 + det.y2) as f64 / 2.0 / gh;
    let w = (det.x2 - det.x1) as f64 / gw;
    let h = (det.y2 - det.y1) as f64 / gh;

    [cx - w / 2.0, cy - h / 2.0, w, h]
}
