use anyhow::Result;
use std::sync::Mutex;

use crate::detect::backend::InferenceClient;
use crate::detect::result::Detection;

/// Stub client for tests and offline runs. Returns a fixed detection set.
#[derive(Default)]
pub struct StubInferenceClient {
    detections: Vec<Detection>,
    calls: Mutex<Vec<StubCall>>,
}

/// What the stub was asked to run on.
#[derive(Clone, Debug)]
pub struct StubCall {
    pub model_id: String,
    pub payload_len: usize,
}

impl StubInferenceClient {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls received so far.
    pub fn calls(&self) -> Vec<StubCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl InferenceClient for StubInferenceClient {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&self, image: &[u8], model_id: &str) -> Result<Vec<Detection>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(StubCall {
                model_id: model_id.to_string(),
                payload_len: image.len(),
            });
        }
        Ok(self.detections.clone())
    }
}
