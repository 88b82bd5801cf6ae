use serde::{Deserialize, Serialize};

use super::geometry::BoundingBox;

/// One predicted object, as returned by the inference service.
///
/// Coordinates are in the pixel space of the image that was submitted for
/// inference; `(x, y)` is the box center.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub class: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        class: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            x,
            y,
            width,
            height,
            class: class.into(),
            confidence,
        }
    }

    /// Axis-aligned box derived from center and size.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_center(self.x, self.y, self.width, self.height)
    }

    /// Label drawn next to the box, e.g. `"car 87%"`.
    pub fn label(&self) -> String {
        format!("{} {}%", self.class, (self.confidence * 100.0) as u32)
    }
}

/// Detections produced by one inference call.
pub type DetectionSet = Vec<Detection>;

/// Box corners in output coordinates, serialized for API clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxCorners {
    pub class: String,
    pub confidence: f32,
    pub top_left: [f64; 2],
    pub top_right: [f64; 2],
    pub bottom_left: [f64; 2],
    pub bottom_right: [f64; 2],
}

impl BoxCorners {
    pub fn from_box(bbox: BoundingBox, class: impl Into<String>, confidence: f32) -> Self {
        Self {
            class: class.into(),
            confidence,
            top_left: [bbox.xmin, bbox.ymin],
            top_right: [bbox.xmax, bbox.ymin],
            bottom_left: [bbox.xmin, bbox.ymax],
            bottom_right: [bbox.xmax, bbox.ymax],
        }
    }
}

impl From<&Detection> for BoxCorners {
    fn from(detection: &Detection) -> Self {
        Self::from_box(
            detection.bounding_box(),
            detection.class.clone(),
            detection.confidence,
        )
    }
}
