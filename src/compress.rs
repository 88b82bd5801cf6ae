//! Adaptive payload compressor.
//!
//! The inference service rejects payloads above a byte budget. The
//! compressor repeatedly downsizes and re-encodes the upload until it fits:
//!
//! ```text
//! Sizing -> Encoding -> Accepted
//!                    -> Shrinking -> Sizing
//!                    -> Failed (max dimension fell below the floor)
//! ```
//!
//! Every pass resizes the *original* image, never the previous pass's
//! output, and the resulting dimensions are kept so boxes can be mapped
//! back with [`ScaleFactors`].

use anyhow::anyhow;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use std::fmt;

use crate::detect::ScaleFactors;

pub const DEFAULT_MAX_DIMENSION: u32 = 1024;
pub const DEFAULT_QUALITY: u8 = 85;
pub const DEFAULT_MIN_QUALITY: u8 = 50;
pub const DEFAULT_QUALITY_STEP: u8 = 5;
pub const DEFAULT_SHRINK_FACTOR: f64 = 0.9;
pub const DEFAULT_MIN_DIMENSION: u32 = 200;
pub const DEFAULT_BUDGET_BYTES: usize = 4 * 1024 * 1024;

/// Starting values and limits for the compression loop.
#[derive(Clone, Debug, PartialEq)]
pub struct CompressionPolicy {
    pub initial_max_dimension: u32,
    pub initial_quality: u8,
    pub min_quality: u8,
    pub quality_step: u8,
    pub shrink_factor: f64,
    pub min_dimension: u32,
    pub budget_bytes: usize,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            initial_max_dimension: DEFAULT_MAX_DIMENSION,
            initial_quality: DEFAULT_QUALITY,
            min_quality: DEFAULT_MIN_QUALITY,
            quality_step: DEFAULT_QUALITY_STEP,
            shrink_factor: DEFAULT_SHRINK_FACTOR,
            min_dimension: DEFAULT_MIN_DIMENSION,
            budget_bytes: DEFAULT_BUDGET_BYTES,
        }
    }
}

impl CompressionPolicy {
    pub fn validate(&self) -> Result<(), CompressError> {
        let invalid = |msg: &str| Err(CompressError::InvalidPolicy(msg.to_string()));
        if self.min_dimension == 0 {
            return invalid("min_dimension must be at least 1");
        }
        if self.initial_max_dimension < self.min_dimension {
            return invalid("initial_max_dimension must be >= min_dimension");
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor < 1.0) {
            return invalid("shrink_factor must be in (0, 1)");
        }
        if self.min_quality == 0 || self.initial_quality > 100 {
            return invalid("quality must be within 1..=100");
        }
        if self.min_quality > self.initial_quality {
            return invalid("min_quality must be <= initial_quality");
        }
        if self.budget_bytes == 0 {
            return invalid("budget_bytes must be greater than zero");
        }
        Ok(())
    }
}

/// Loop state, one instance per compression run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressionState {
    pub max_dimension: u32,
    pub quality: u8,
    pub budget_bytes: usize,
    pub attempts: u32,
}

impl CompressionState {
    pub fn new(policy: &CompressionPolicy) -> Self {
        Self {
            max_dimension: policy.initial_max_dimension,
            quality: policy.initial_quality,
            budget_bytes: policy.budget_bytes,
            attempts: 0,
        }
    }

    /// Shrinking transition. Returns false when the next dimension would
    /// fall below the floor, in which case the state is left untouched.
    ///
    /// The dimension strictly decreases on every successful call.
    pub fn shrink(&mut self, policy: &CompressionPolicy) -> bool {
        let scaled = (self.max_dimension as f64 * policy.shrink_factor).floor() as u32;
        let next = scaled.min(self.max_dimension.saturating_sub(1));
        if next < policy.min_dimension {
            return false;
        }
        self.max_dimension = next;
        self.quality = self
            .quality
            .saturating_sub(policy.quality_step)
            .max(policy.min_quality);
        true
    }
}

#[derive(Debug)]
pub enum CompressError {
    /// The budget could not be met before hitting the dimension floor.
    LimitExceeded {
        attempts: u32,
        last_size: usize,
        budget_bytes: usize,
        last_max_dimension: u32,
    },
    InvalidPolicy(String),
    Encode(anyhow::Error),
}

impl fmt::Display for CompressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressError::LimitExceeded {
                attempts,
                last_size,
                budget_bytes,
                last_max_dimension,
            } => write!(
                f,
                "cannot compress image below size limit: {} bytes > {} after {} attempts (last max dimension {})",
                last_size, budget_bytes, attempts, last_max_dimension
            ),
            CompressError::InvalidPolicy(msg) => write!(f, "invalid compression policy: {}", msg),
            CompressError::Encode(err) => write!(f, "image encoding failed: {}", err),
        }
    }
}

impl std::error::Error for CompressError {}

/// Result of one encode pass.
#[derive(Clone, Debug)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Codec seam for the compression loop.
pub trait PayloadEncoder {
    /// Dimensions of the original image, `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    /// Resize the original to fit within `max_dimension` and encode it.
    fn encode(&self, max_dimension: u32, quality: u8) -> anyhow::Result<EncodedImage>;
}

/// An accepted inference payload.
#[derive(Clone, Debug)]
pub struct CompressedPayload {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
    pub max_dimension: u32,
    pub quality: u8,
    pub attempts: u32,
}

impl CompressedPayload {
    pub fn scale_factors(&self) -> ScaleFactors {
        ScaleFactors::between(
            (self.original_width, self.original_height),
            (self.width, self.height),
        )
    }
}

/// Run the compression loop until the payload fits `policy.budget_bytes`.
pub fn compress_for_inference<E: PayloadEncoder + ?Sized>(
    encoder: &E,
    policy: &CompressionPolicy,
) -> Result<CompressedPayload, CompressError> {
    policy.validate()?;
    let (original_width, original_height) = encoder.dimensions();
    if original_width == 0 || original_height == 0 {
        return Err(CompressError::Encode(anyhow!("image has zero dimension")));
    }

    let mut state = CompressionState::new(policy);
    loop {
        state.attempts += 1;
        let encoded = encoder
            .encode(state.max_dimension, state.quality)
            .map_err(CompressError::Encode)?;
        log::debug!(
            "compress attempt {}: {}x{} (max {}) q={} -> {} bytes",
            state.attempts,
            encoded.width,
            encoded.height,
            state.max_dimension,
            state.quality,
            encoded.bytes.len()
        );

        if encoded.bytes.len() <= state.budget_bytes {
            return Ok(CompressedPayload {
                width: encoded.width,
                height: encoded.height,
                bytes: encoded.bytes,
                original_width,
                original_height,
                max_dimension: state.max_dimension,
                quality: state.quality,
                attempts: state.attempts,
            });
        }

        if !state.shrink(policy) {
            log::warn!(
                "payload still {} bytes at max dimension {}; giving up",
                encoded.bytes.len(),
                state.max_dimension
            );
            return Err(CompressError::LimitExceeded {
                attempts: state.attempts,
                last_size: encoded.bytes.len(),
                budget_bytes: state.budget_bytes,
                last_max_dimension: state.max_dimension,
            });
        }
    }
}

/// Dimensions after fitting `(width, height)` inside a
/// `max_dimension` square, preserving aspect ratio. Never upscales.
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }
    let scale_side = |side: u32, long: u32| -> u32 {
        let scaled = (side as f64 * max_dimension as f64 / long as f64).round() as u32;
        scaled.clamp(1, max_dimension)
    };
    if width >= height {
        (max_dimension, scale_side(height, width))
    } else {
        (scale_side(width, height), max_dimension)
    }
}

/// New image fitted inside a `max_dimension` square. The input is untouched.
pub fn resize_within(image: &DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (target_w, target_h) = fit_within(width, height, max_dimension);
    if (target_w, target_h) == (width, height) {
        return image.clone();
    }
    image.resize_exact(target_w, target_h, FilterType::Lanczos3)
}

/// Encode an image as baseline JPEG at `quality`.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> anyhow::Result<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| anyhow!("jpeg encode failed: {}", e))?;
    Ok(bytes)
}

/// JPEG encoder over a decoded image.
pub struct JpegPayloadEncoder<'a> {
    image: &'a DynamicImage,
}

impl<'a> JpegPayloadEncoder<'a> {
    pub fn new(image: &'a DynamicImage) -> Self {
        Self { image }
    }
}

impl PayloadEncoder for JpegPayloadEncoder<'_> {
    fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn encode(&self, max_dimension: u32, quality: u8) -> anyhow::Result<EncodedImage> {
        let resized = resize_within(self.image, max_dimension);
        let (width, height) = resized.dimensions();
        let bytes = encode_jpeg(&resized, quality)?;
        Ok(EncodedImage {
            bytes,
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::cell::RefCell;

    /// Byte size proportional to pixel count and quality.
    struct ModelEncoder {
        width: u32,
        height: u32,
        bytes_per_pixel: f64,
        trace: RefCell<Vec<(u32, u8)>>,
    }

    impl ModelEncoder {
        fn new(width: u32, height: u32, bytes_per_pixel: f64) -> Self {
            Self {
                width,
                height,
                bytes_per_pixel,
                trace: RefCell::new(Vec::new()),
            }
        }
    }

    impl PayloadEncoder for ModelEncoder {
        fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn encode(&self, max_dimension: u32, quality: u8) -> anyhow::Result<EncodedImage> {
            self.trace.borrow_mut().push((max_dimension, quality));
            let (width, height) = fit_within(self.width, self.height, max_dimension);
            let size = (width as f64 * height as f64 * self.bytes_per_pixel * quality as f64
                / 100.0) as usize;
            Ok(EncodedImage {
                bytes: vec![0u8; size],
                width,
                height,
            })
        }
    }

    struct FailingEncoder;

    impl PayloadEncoder for FailingEncoder {
        fn dimensions(&self) -> (u32, u32) {
            (100, 100)
        }

        fn encode(&self, _max_dimension: u32, _quality: u8) -> anyhow::Result<EncodedImage> {
            Err(anyhow!("codec exploded"))
        }
    }

    #[test]
    fn fit_within_preserves_aspect_and_never_upscales() {
        assert_eq!(fit_within(4000, 3000, 1024), (1024, 768));
        assert_eq!(fit_within(3000, 4000, 1024), (768, 1024));
        assert_eq!(fit_within(800, 600, 1024), (800, 600));
        assert_eq!(fit_within(5000, 10, 1000), (1000, 2));
        assert_eq!(fit_within(10_000, 1, 100), (100, 1));
    }

    #[test]
    fn small_payload_is_accepted_first_try() {
        let encoder = ModelEncoder::new(4000, 3000, 3.0);
        let payload = compress_for_inference(&encoder, &CompressionPolicy::default()).unwrap();
        assert_eq!(payload.attempts, 1);
        assert_eq!((payload.width, payload.height), (1024, 768));
        assert_eq!(payload.quality, DEFAULT_QUALITY);
        assert!(payload.bytes.len() <= DEFAULT_BUDGET_BYTES);

        let factors = payload.scale_factors();
        assert_eq!(factors.scale_x, 4000.0 / 1024.0);
        assert_eq!(factors.scale_y, 3000.0 / 768.0);
    }

    #[test]
    fn oversized_payload_shrinks_until_it_fits() {
        // ~12 bytes/px at q=100 forces several shrink passes.
        let encoder = ModelEncoder::new(4000, 3000, 12.0);
        let policy = CompressionPolicy::default();
        let payload = compress_for_inference(&encoder, &policy).unwrap();
        assert!(payload.attempts > 1);
        assert!(payload.bytes.len() <= policy.budget_bytes);

        let trace = encoder.trace.borrow();
        assert_eq!(trace.len() as u32, payload.attempts);
        assert_eq!(trace[0], (1024, 85));
        assert_eq!(trace[1], (921, 80));
        for pair in trace.windows(2) {
            assert!(pair[1].0 < pair[0].0);
            assert!(pair[1].1 <= pair[0].1);
            assert!(pair[1].1 >= policy.min_quality);
        }
    }

    #[test]
    fn impossible_budget_fails_at_dimension_floor() {
        let encoder = ModelEncoder::new(4000, 3000, 1000.0);
        let err = compress_for_inference(&encoder, &CompressionPolicy::default()).unwrap_err();
        match err {
            CompressError::LimitExceeded {
                attempts,
                last_max_dimension,
                ..
            } => {
                // 1024, 921, ..., 231, 207; the next step (186) is below 200.
                assert_eq!(attempts, 16);
                assert_eq!(last_max_dimension, 207);
            }
            other => panic!("unexpected error: {other}"),
        }

        let trace = encoder.trace.borrow();
        assert!(trace.iter().all(|(dim, _)| *dim >= DEFAULT_MIN_DIMENSION));
        assert_eq!(trace.last().map(|t| t.1), Some(DEFAULT_MIN_QUALITY));
    }

    #[test]
    fn state_shrink_reaches_quality_floor() {
        let policy = CompressionPolicy::default();
        let mut state = CompressionState::new(&policy);
        let mut qualities = vec![state.quality];
        while state.shrink(&policy) {
            qualities.push(state.quality);
        }
        assert_eq!(&qualities[..8], &[85, 80, 75, 70, 65, 60, 55, 50]);
        assert!(qualities[8..].iter().all(|q| *q == 50));
    }

    #[test]
    fn invalid_policies_are_rejected() {
        let encoder = ModelEncoder::new(10, 10, 1.0);
        for policy in [
            CompressionPolicy {
                shrink_factor: 1.0,
                ..CompressionPolicy::default()
            },
            CompressionPolicy {
                min_dimension: 0,
                ..CompressionPolicy::default()
            },
            CompressionPolicy {
                initial_max_dimension: 100,
                ..CompressionPolicy::default()
            },
            CompressionPolicy {
                initial_quality: 120,
                ..CompressionPolicy::default()
            },
        ] {
            assert!(matches!(
                compress_for_inference(&encoder, &policy),
                Err(CompressError::InvalidPolicy(_))
            ));
        }
    }

    #[test]
    fn encoder_errors_propagate() {
        let err = compress_for_inference(&FailingEncoder, &CompressionPolicy::default())
            .unwrap_err();
        assert!(matches!(err, CompressError::Encode(_)));
    }

    #[test]
    fn jpeg_encoder_produces_decodable_resized_payload() {
        let img = ImageBuffer::from_fn(300, 200, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let image = DynamicImage::ImageRgb8(img);
        let policy = CompressionPolicy {
            initial_max_dimension: 128,
            min_dimension: 16,
            ..CompressionPolicy::default()
        };
        let payload = compress_for_inference(&JpegPayloadEncoder::new(&image), &policy).unwrap();
        assert_eq!((payload.width, payload.height), (128, 85));
        assert_eq!((payload.original_width, payload.original_height), (300, 200));

        let decoded = image::load_from_memory(&payload.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (128, 85));
        // Original is left untouched.
        assert_eq!(image.dimensions(), (300, 200));
    }

    #[test]
    fn jpeg_encoder_keeps_small_images_at_native_size() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(64, 48, Rgb([10, 20, 30])));
        let payload =
            compress_for_inference(&JpegPayloadEncoder::new(&image), &CompressionPolicy::default())
                .unwrap();
        assert_eq!((payload.width, payload.height), (64, 48));
        assert!(payload.scale_factors().is_identity());
    }
}
