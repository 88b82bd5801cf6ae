//! Hosted inference client.
//!
//! Speaks the hosted detection API used by the app: the encoded image is
//! posted base64-encoded as a form body to `{api_url}/{model_id}?api_key=...`
//! and the response carries a `predictions` array of center/size boxes.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;
use url::Url;

use crate::detect::backend::InferenceClient;
use crate::detect::result::Detection;

pub const DEFAULT_API_URL: &str = "https://detect.roboflow.com";
const MAX_RESPONSE_BYTES: u64 = 10 * 1024 * 1024;

/// Endpoint and credentials for the hosted detector.
#[derive(Clone, Debug)]
pub struct HostedInferenceConfig {
    pub api_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl Default for HostedInferenceConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    predictions: Vec<Detection>,
}

pub struct HostedInferenceClient {
    config: HostedInferenceConfig,
    agent: ureq::Agent,
}

impl HostedInferenceClient {
    pub fn new(config: HostedInferenceConfig) -> Result<Self> {
        Url::parse(&config.api_url)
            .with_context(|| format!("parse inference api url {}", config.api_url))?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { config, agent })
    }

    fn endpoint(&self, model_id: &str) -> Result<Url> {
        let base = self.config.api_url.trim_end_matches('/');
        let model_id = model_id.trim_matches('/');
        if model_id.is_empty() {
            return Err(anyhow!("model id must not be empty"));
        }
        let mut url = Url::parse(&format!("{base}/{model_id}"))
            .with_context(|| format!("build inference url for model {}", model_id))?;
        if !self.config.api_key.is_empty() {
            url.query_pairs_mut()
                .append_pair("api_key", &self.config.api_key);
        }
        Ok(url)
    }
}

impl InferenceClient for HostedInferenceClient {
    fn name(&self) -> &'static str {
        "hosted"
    }

    fn infer(&self, image: &[u8], model_id: &str) -> Result<Vec<Detection>> {
        let url = self.endpoint(model_id)?;
        let body = STANDARD.encode(image);
        let response = match self
            .agent
            .post(url.as_str())
            .set("Content-Type", "application/x-www-form-urlencoded")
            .send_string(&body)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                return Err(anyhow!(
                    "inference service returned status {}: {}",
                    code,
                    detail.trim()
                ));
            }
            Err(err) => return Err(anyhow!("inference request failed: {}", err)),
        };

        let mut raw = String::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_string(&mut raw)
            .context("read inference response")?;
        parse_predictions(&raw)
    }
}

pub(crate) fn parse_predictions(raw: &str) -> Result<Vec<Detection>> {
    let parsed: InferenceResponse =
        serde_json::from_str(raw).context("decode inference response")?;
    Ok(parsed.predictions)
}
