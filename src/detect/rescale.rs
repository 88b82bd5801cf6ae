use super::geometry::BoundingBox;
use super::result::{BoxCorners, Detection};

/// Ratio between original and inference image dimensions, per axis.
///
/// Both factors are exactly 1 when no resize happened.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleFactors {
    pub scale_x: f64,
    pub scale_y: f64,
}

impl ScaleFactors {
    pub const IDENTITY: ScaleFactors = ScaleFactors {
        scale_x: 1.0,
        scale_y: 1.0,
    };

    /// `original / resized` for each axis. Dimensions are `(width, height)`
    /// and must be non-zero.
    pub fn between(original: (u32, u32), resized: (u32, u32)) -> Self {
        Self {
            scale_x: original.0 as f64 / resized.0 as f64,
            scale_y: original.1 as f64 / resized.1 as f64,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.scale_x == 1.0 && self.scale_y == 1.0
    }

    pub fn apply_to_box(&self, bbox: BoundingBox) -> BoundingBox {
        BoundingBox::new(
            bbox.xmin * self.scale_x,
            bbox.ymin * self.scale_y,
            bbox.xmax * self.scale_x,
            bbox.ymax * self.scale_y,
        )
    }

    /// Detection with center and size mapped into original image space.
    pub fn apply_to_detection(&self, detection: &Detection) -> Detection {
        Detection {
            x: detection.x * self.scale_x,
            y: detection.y * self.scale_y,
            width: detection.width * self.scale_x,
            height: detection.height * self.scale_y,
            ..detection.clone()
        }
    }
}

/// Map suppressed detections to corner lists in original image coordinates.
///
/// Must run once, after NMS. Class and confidence pass through unchanged.
pub fn rescale(detections: &[Detection], factors: ScaleFactors) -> Vec<BoxCorners> {
    detections
        .iter()
        .map(|d| {
            BoxCorners::from_box(
                factors.apply_to_box(d.bounding_box()),
                d.class.clone(),
                d.confidence,
            )
        })
        .collect()
}
