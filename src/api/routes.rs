use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use super::multipart::{self, Part};
use super::{ApiError, ApiState, HttpRequest, HttpResponse};
use crate::detect::nms::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD};
use crate::detect::DetectionRequest;
use crate::satellite::{nearby_satellites, GeoPoint};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Health,
    DetectAndAnnotate,
    DetectAndAnnotateResized,
    BoundingBoxCorners,
    BoundingBoxCornersOld,
    UpdateUserSatellites,
}

impl Route {
    fn from_path(path: &str) -> Option<Self> {
        match path {
            "/health" => Some(Route::Health),
            "/detect-and-annotate" => Some(Route::DetectAndAnnotate),
            "/detect-and-annotate-resized" => Some(Route::DetectAndAnnotateResized),
            "/bounding-box-corners" => Some(Route::BoundingBoxCorners),
            "/bounding-box-corners-old" => Some(Route::BoundingBoxCornersOld),
            "/update-user-satellites" => Some(Route::UpdateUserSatellites),
            _ => None,
        }
    }

    fn method(self) -> &'static str {
        match self {
            Route::Health => "GET",
            _ => "POST",
        }
    }
}

pub(crate) fn dispatch(state: &ApiState, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
    let route = Route::from_path(&request.path).ok_or(ApiError::NotFound)?;
    if request.method != route.method() {
        return Err(ApiError::MethodNotAllowed);
    }
    match route {
        Route::Health => json_response(&serde_json::json!({ "status": "ok" })),
        Route::DetectAndAnnotate => {
            let form = DetectionForm::from_request(request)?;
            let (original, outcome) = state.pipeline.run_bytes(&form.image, form.thresholds)?;
            let body = state
                .annotator
                .annotate_jpeg(&original, &outcome.detections_in_original())
                .map_err(ApiError::Internal)?;
            Ok(jpeg_response(body))
        }
        Route::DetectAndAnnotateResized => {
            let form = DetectionForm::from_request(request)?;
            let (_, outcome) = state.pipeline.run_bytes(&form.image, form.thresholds)?;
            let resized = image::load_from_memory(&outcome.payload.bytes)
                .map_err(|e| ApiError::Internal(anyhow!("decode compressed payload: {}", e)))?;
            let body = state
                .annotator
                .annotate_jpeg(&resized, &outcome.detections)
                .map_err(ApiError::Internal)?;
            Ok(jpeg_response(body))
        }
        Route::BoundingBoxCorners => {
            let form = DetectionForm::from_request(request)?;
            let (_, outcome) = state.pipeline.run_bytes(&form.image, form.thresholds)?;
            json_response(&outcome.corners())
        }
        Route::BoundingBoxCornersOld => {
            let form = DetectionForm::from_request(request)?;
            let (_, outcome) = state.pipeline.run_bytes(&form.image, form.thresholds)?;
            json_response(&outcome.inference_corners())
        }
        Route::UpdateUserSatellites => update_user_satellites(state, request),
    }
}

/// Parsed upload form for the detection endpoints.
struct DetectionForm {
    image: Vec<u8>,
    thresholds: DetectionRequest,
}

impl DetectionForm {
    fn from_request(request: &HttpRequest) -> Result<Self, ApiError> {
        let boundary = request
            .header("content-type")
            .and_then(multipart::boundary_from_content_type)
            .ok_or_else(|| bad_request("expected multipart/form-data upload"))?;
        let parts = multipart::parse(&request.body, &boundary)
            .map_err(|e| bad_request(&format!("invalid multipart body: {}", e)))?;

        let image = parts
            .iter()
            .find(|part| part.name == "image" && !part.data.is_empty())
            .map(|part| part.data.clone())
            .ok_or_else(|| bad_request("No image uploaded"))?;
        let confidence = threshold(&parts, "confidence", DEFAULT_CONFIDENCE_THRESHOLD as f64)?;
        let iou = threshold(&parts, "iou", DEFAULT_IOU_THRESHOLD)?;

        Ok(Self {
            image,
            thresholds: DetectionRequest {
                confidence_threshold: confidence as f32,
                iou_threshold: iou,
            },
        })
    }
}

fn threshold(parts: &[Part], name: &str, default: f64) -> Result<f64, ApiError> {
    let Some(part) = parts.iter().find(|part| part.name == name) else {
        return Ok(default);
    };
    let text = part
        .text()
        .ok_or_else(|| bad_request(&format!("{} must be a number", name)))?;
    if text.is_empty() {
        return Ok(default);
    }
    let value: f64 = text
        .parse()
        .map_err(|_| bad_request(&format!("{} must be a number", name)))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(bad_request(&format!("{} must be between 0 and 1", name)));
    }
    Ok(value)
}

#[derive(Debug, Deserialize)]
struct SatelliteQuery {
    user_location: GeoPoint,
    max_distance_km: f64,
}

fn update_user_satellites(state: &ApiState, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
    let query: SatelliteQuery = serde_json::from_slice(&request.body)
        .map_err(|e| bad_request(&format!("invalid JSON body: {}", e)))?;
    query
        .user_location
        .validate()
        .map_err(|e| bad_request(&e.to_string()))?;
    if !query.max_distance_km.is_finite() || query.max_distance_km < 0.0 {
        return Err(bad_request("max_distance_km must be a non-negative number"));
    }

    let catalog = state.catalog.current();
    let mut store = state
        .satellites
        .lock()
        .map_err(|_| ApiError::Internal(anyhow!("satellite store lock poisoned")))?;
    let positions = nearby_satellites(
        &mut **store,
        &catalog,
        query.user_location,
        query.max_distance_km,
        state.now(),
    )
    .map_err(ApiError::Internal)?;
    json_response(&positions)
}

fn bad_request(msg: &str) -> ApiError {
    ApiError::BadRequest(msg.to_string())
}

fn json_response<T: Serialize + ?Sized>(value: &T) -> Result<HttpResponse, ApiError> {
    let body = serde_json::to_vec(value).map_err(|e| ApiError::Internal(e.into()))?;
    Ok(HttpResponse {
        status: 200,
        content_type: "application/json",
        body,
    })
}

fn jpeg_response(body: Vec<u8>) -> HttpResponse {
    HttpResponse {
        status: 200,
        content_type: "image/jpeg",
        body,
    }
}
