use anyhow::anyhow;
use image::DynamicImage;
use std::fmt;
use std::sync::Arc;

use crate::compress::{
    compress_for_inference, CompressError, CompressedPayload, CompressionPolicy,
    JpegPayloadEncoder,
};
use crate::detect::backend::InferenceClient;
use crate::detect::nms::{filter_and_suppress, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD};
use crate::detect::rescale::{rescale, ScaleFactors};
use crate::detect::result::{BoxCorners, Detection};

/// Per-request thresholds. Values are expected in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionRequest {
    pub confidence_threshold: f32,
    pub iou_threshold: f64,
}

impl Default for DetectionRequest {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

#[derive(Debug)]
pub enum PipelineError {
    /// Upload could not be decoded as an image.
    Decode(anyhow::Error),
    Compress(CompressError),
    /// The inference collaborator failed.
    Inference(anyhow::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Decode(err) => write!(f, "image decode failed: {}", err),
            PipelineError::Compress(err) => write!(f, "{}", err),
            PipelineError::Inference(err) => write!(f, "inference failed: {}", err),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<CompressError> for PipelineError {
    fn from(err: CompressError) -> Self {
        PipelineError::Compress(err)
    }
}

/// Outcome of one detection run.
#[derive(Clone, Debug)]
pub struct DetectionOutcome {
    pub payload: CompressedPayload,
    /// Suppressed detections in inference-image coordinates.
    pub detections: Vec<Detection>,
    pub scale: ScaleFactors,
}

impl DetectionOutcome {
    /// Corners in original image coordinates.
    pub fn corners(&self) -> Vec<BoxCorners> {
        rescale(&self.detections, self.scale)
    }

    /// Corners in the coordinates of the image sent to inference.
    pub fn inference_corners(&self) -> Vec<BoxCorners> {
        self.detections.iter().map(BoxCorners::from).collect()
    }

    /// Detections mapped onto the original image, for drawing.
    pub fn detections_in_original(&self) -> Vec<Detection> {
        self.detections
            .iter()
            .map(|d| self.scale.apply_to_detection(d))
            .collect()
    }
}

/// Compress, infer, filter, suppress.
///
/// Rescaling is left to the caller through [`DetectionOutcome`] so that it
/// runs once, on the suppressed set.
#[derive(Clone)]
pub struct DetectionPipeline {
    client: Arc<dyn InferenceClient>,
    model_id: String,
    policy: CompressionPolicy,
}

impl DetectionPipeline {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        model_id: impl Into<String>,
        policy: CompressionPolicy,
    ) -> Self {
        Self {
            client,
            model_id: model_id.into(),
            policy,
        }
    }

    /// Decode an uploaded file and run detection on it.
    pub fn run_bytes(
        &self,
        upload: &[u8],
        request: DetectionRequest,
    ) -> Result<(DynamicImage, DetectionOutcome), PipelineError> {
        let image = decode_upload(upload)?;
        let outcome = self.run(&image, request)?;
        Ok((image, outcome))
    }

    pub fn run(
        &self,
        image: &DynamicImage,
        request: DetectionRequest,
    ) -> Result<DetectionOutcome, PipelineError> {
        let payload = compress_for_inference(&JpegPayloadEncoder::new(image), &self.policy)?;
        log::info!(
            "inference payload {}x{} -> {}x{}, {} bytes after {} attempt(s)",
            payload.original_width,
            payload.original_height,
            payload.width,
            payload.height,
            payload.bytes.len(),
            payload.attempts
        );

        let raw = self
            .client
            .infer(&payload.bytes, &self.model_id)
            .map_err(PipelineError::Inference)?;
        let raw_count = raw.len();
        let detections =
            filter_and_suppress(raw, request.confidence_threshold, request.iou_threshold);
        log::info!(
            "{} returned {} detection(s), {} kept (confidence >= {}, iou < {})",
            self.client.name(),
            raw_count,
            detections.len(),
            request.confidence_threshold,
            request.iou_threshold
        );

        let scale = payload.scale_factors();
        Ok(DetectionOutcome {
            payload,
            detections,
            scale,
        })
    }
}

pub fn decode_upload(upload: &[u8]) -> Result<DynamicImage, PipelineError> {
    if upload.is_empty() {
        return Err(PipelineError::Decode(anyhow!("empty upload")));
    }
    image::load_from_memory(upload).map_err(|e| PipelineError::Decode(anyhow!(e)))
}
