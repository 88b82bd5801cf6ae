use anyhow::Result;

use crate::detect::result::Detection;

/// Remote object-detection service.
///
/// # Contract
///
/// Implementations receive an already-encoded image that fits the service's
/// payload limit and return the raw predictions, in the pixel space of that
/// image. They do not filter, deduplicate or rescale; the pipeline owns
/// those steps.
pub trait InferenceClient: Send + Sync {
    /// Client identifier, used in logs.
    fn name(&self) -> &'static str;

    /// Run inference on an encoded image with the given model.
    fn infer(&self, image: &[u8], model_id: &str) -> Result<Vec<Detection>>;
}
