//! Detection types and post-processing.
//!
//! Inference clients return raw center/size boxes; everything after that
//! (confidence filtering, NMS, rescaling) is pure and lives here.

mod backend;
pub mod backends;
pub mod geometry;
pub mod nms;
pub mod pipeline;
pub mod rescale;
mod result;

pub use backend::InferenceClient;
pub use backends::{HostedInferenceClient, HostedInferenceConfig, StubInferenceClient};
pub use geometry::{iou, BoundingBox};
pub use nms::{filter_and_suppress, filter_by_confidence, non_max_suppression};
pub use pipeline::{DetectionOutcome, DetectionPipeline, DetectionRequest, PipelineError};
pub use rescale::{rescale, ScaleFactors};
pub use result::{BoxCorners, Detection, DetectionSet};
