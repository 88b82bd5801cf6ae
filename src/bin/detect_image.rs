//! detect_image - run the detection pipeline on a local image file
//!
//! Prints bounding-box corners as JSON, or writes an annotated JPEG with
//! `--output`.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use lookup_api::annotate::Annotator;
use lookup_api::config::LookupConfig;
use lookup_api::detect::{
    DetectionPipeline, DetectionRequest, HostedInferenceClient, InferenceClient,
    StubInferenceClient,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to run detection on.
    input: PathBuf,
    /// Minimum confidence to keep a detection.
    #[arg(long, default_value_t = 0.5)]
    confidence: f32,
    /// IoU at or above which a lower-confidence box is suppressed.
    #[arg(long, default_value_t = 0.3)]
    iou: f64,
    /// Write an annotated JPEG here instead of printing corners.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Report corners in inference-image coordinates.
    #[arg(long)]
    inference_coords: bool,
    /// Skip the hosted service; use a stub that returns no detections.
    #[arg(long)]
    offline: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    for (name, value) in [("confidence", args.confidence as f64), ("iou", args.iou)] {
        if !(0.0..=1.0).contains(&value) {
            return Err(anyhow!("--{} must be between 0 and 1", name));
        }
    }

    let config = LookupConfig::load()?;
    let client: Arc<dyn InferenceClient> = if args.offline {
        Arc::new(StubInferenceClient::default())
    } else {
        Arc::new(HostedInferenceClient::new(config.inference.hosted_config())?)
    };
    let pipeline = DetectionPipeline::new(
        client,
        config.inference.model_id.clone(),
        config.compression.clone(),
    );

    let upload = std::fs::read(&args.input)
        .with_context(|| format!("read {}", args.input.display()))?;
    let request = DetectionRequest {
        confidence_threshold: args.confidence,
        iou_threshold: args.iou,
    };
    let (original, outcome) = pipeline.run_bytes(&upload, request)?;

    match &args.output {
        Some(path) => {
            let annotator = match &config.api.font_path {
                Some(font) => Annotator::new().with_font_file(font)?,
                None => Annotator::new(),
            };
            let jpeg = annotator.annotate_jpeg(&original, &outcome.detections_in_original())?;
            std::fs::write(path, jpeg).with_context(|| format!("write {}", path.display()))?;
            eprintln!(
                "{} detection(s) drawn to {}",
                outcome.detections.len(),
                path.display()
            );
        }
        None => {
            let corners = if args.inference_coords {
                outcome.inference_corners()
            } else {
                outcome.corners()
            };
            println!("{}", serde_json::to_string_pretty(&corners)?);
        }
    }
    Ok(())
}
