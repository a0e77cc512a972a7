use ndarray::ArrayD;
use preprocess::LetterboxTransform;

/// Detection candidate in padded-image pixel space, before suppression.
#[derive(Debug, Clone, Copy)]
pub struct RawCandidate {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub conf: f32,
    /// Model-native 0-based class index.
    pub class_idx: usize,
}

/// A surviving detection mapped back to original-image pixel space, with
/// coordinates rounded to whole pixels.
#[derive(Debug, Clone, Copy)]
pub struct PixelDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub conf: f32,
    pub class_idx: usize,
}

pub struct PostProcessor {
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl PostProcessor {
    pub fn new(iou_threshold: f32, max_detections: usize) -> Self {
        Self {
            iou_threshold,
            max_detections,
        }
    }

    /// Threshold, suppress, and rescale one image's raw prediction.
    ///
    /// `prediction` is `[1, N, 5 + num_classes]` in padded-image pixels.
    /// Survivors come back in descending confidence order (suppression
    /// order), rescaled onto the original pixel grid.
    pub fn process(
        &self,
        prediction: &ArrayD<f32>,
        confidence_threshold: f32,
        transform: &LetterboxTransform,
    ) -> anyhow::Result<Vec<PixelDetection>> {
        let candidates = decode_candidates(prediction, confidence_threshold)?;
        let kept = self.suppress(candidates);
        Ok(kept.iter().map(|c| rescale(c, transform)).collect())
    }

    /// Class-aware non-max suppression: among boxes of the same class whose
    /// overlap exceeds the cutoff, keep the highest-confidence one. Survivors
    /// are capped at `max_detections`.
    fn suppress(&self, mut candidates: Vec<RawCandidate>) -> Vec<RawCandidate> {
        candidates.sort_by(|a, b| {
            b.conf
                .partial_cmp(&a.conf)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut keep: Vec<RawCandidate> = Vec::new();
        for cand in candidates {
            if keep.len() >= self.max_detections {
                break;
            }
            let suppressed = keep
                .iter()
                .any(|k| k.class_idx == cand.class_idx && iou(k, &cand) > self.iou_threshold);
            if !suppressed {
                keep.push(cand);
            }
        }
        keep
    }
}

/// Gate rows on objectness, fold in the best class score, and convert
/// center-format boxes to corners. Both gates are strict, so a threshold of
/// 1.0 admits nothing.
fn decode_candidates(
    prediction: &ArrayD<f32>,
    confidence_threshold: f32,
) -> anyhow::Result<Vec<RawCandidate>> {
    let shape = prediction.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[2] < 6 {
        anyhow::bail!("unexpected prediction shape {:?}", shape);
    }
    let rows = shape[1];
    let num_classes = shape[2] - 5;

    let mut candidates = Vec::new();
    for i in 0..rows {
        let objectness = prediction[[0, i, 4]];
        if !(objectness > confidence_threshold) {
            continue;
        }

        let mut class_idx = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for c in 0..num_classes {
            let score = prediction[[0, i, 5 + c]];
            if score > best_score {
                best_score = score;
                class_idx = c;
            }
        }

        let conf = objectness * best_score;
        if !(conf > confidence_threshold) {
            continue;
        }

        let cx = prediction[[0, i, 0]];
        let cy = prediction[[0, i, 1]];
        let w = prediction[[0, i, 2]];
        let h = prediction[[0, i, 3]];

        candidates.push(RawCandidate {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
            conf,
            class_idx,
        });
    }

    Ok(candidates)
}

/// Invert the letterbox transform and round to integer pixel boundaries.
fn rescale(c: &RawCandidate, t: &LetterboxTransform) -> PixelDetection {
    PixelDetection {
        x1: t.invert_x(c.x1).round(),
        y1: t.invert_y(c.y1).round(),
        x2: t.invert_x(c.x2).round(),
        y2: t.invert_y(c.y2).round(),
        conf: c.conf,
        class_idx: c.class_idx,
    }
}

fn iou(a: &RawCandidate, b: &RawCandidate) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - intersection;

    if union > 0.0 { intersection / union } else { 0.0 }
}
