//! Confidence filtering and greedy non-maximum suppression.
//!
//! Filtering always runs first; [`non_max_suppression`] never applies a
//! confidence cut of its own.

use std::collections::VecDeque;

use super::result::Detection;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f64 = 0.3;

/// Keep detections with `confidence >= threshold`, preserving order.
pub fn filter_by_confidence(detections: &mut Vec<Detection>, threshold: f32) {
    detections.retain(|d| d.confidence >= threshold);
}

/// Greedy NMS.
///
/// Detections are stable-sorted by confidence, highest first, so equal
/// scores keep their input order. The best remaining detection is accepted
/// and every remaining detection with IoU `>= iou_threshold` against it is
/// dropped, until nothing remains. The result is confidence-descending.
///
/// Suppression is class-agnostic.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f64) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut remaining: VecDeque<Detection> = detections.into();
    let mut accepted = Vec::with_capacity(remaining.len());
    while let Some(current) = remaining.pop_front() {
        let current_box = current.bounding_box();
        remaining.retain(|candidate| current_box.iou(&candidate.bounding_box()) < iou_threshold);
        accepted.push(current);
    }
    accepted
}

/// Filter by confidence, then suppress overlaps.
pub fn filter_and_suppress(
    mut detections: Vec<Detection>,
    confidence_threshold: f32,
    iou_threshold: f64,
) -> Vec<Detection> {
    filter_by_confidence(&mut detections, confidence_threshold);
    non_max_suppression(detections, iou_threshold)
}
