//! Per-frame outputs and diagnostics.

use planar_track_core::Quad;
use serde::{Deserialize, Serialize};

/// Which pipeline branch produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    Detection,
    OpticalFlow,
}

/// One recognized target in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingResult {
    pub id: String,
    /// Set only by the detection stage, and only when the inlier count
    /// reaches the fixed acceptance floor.
    pub detected: bool,
    /// Corner quad in current-frame pixels, ingestion winding preserved.
    /// Tracking-stage results carry the Kalman-smoothed quad.
    pub corners: Quad,
    /// Nominally in [0, 1].
    pub confidence: f32,
    pub source: TrackSource,
}

/// Diagnostics snapshot for the most recently processed frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    /// Counter value of the frame this snapshot describes (first frame
    /// after `start` is 0).
    pub frame_number: u64,
    pub detection_ms: f64,
    pub tracking_ms: f64,
    pub total_ms: f64,
    /// Results with `detected == true`.
    pub detected_count: usize,
    /// Results produced by the tracking branch.
    pub tracked_count: usize,
}
