//! Pipeline configuration.
//!
//! [`EngineConfig`] carries the per-frame toggles a host flips at runtime;
//! the remaining params structs tune individual components and are usually
//! fixed at construction. Everything (de)serializes, so a whole engine setup
//! can live in one JSON document.

use planar_track_core::DEFAULT_SEED;
use serde::{Deserialize, Serialize};

/// Frame-level toggles and thresholds, replaced atomically via
/// [`Engine::configure`](crate::Engine::configure).
///
/// Values are taken as given; out-of-range settings are the caller's
/// responsibility.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Advance targets with optical flow between detection frames.
    pub use_optical_flow: bool,
    /// Run detection on every N-th frame, counted from frame 0.
    /// Values below 1 behave as 1.
    pub detection_interval: u32,
    /// Keep at most this many extracted features per frame, strongest
    /// response first.
    pub max_features: usize,
    /// Optical-flow point cap per tracked target.
    pub max_tracking_points: usize,
    /// Ratio-test cutoff: keep a match only when the best distance is below
    /// this fraction of the second best.
    pub match_ratio_threshold: f32,
    /// RANSAC iterations for detection-stage homographies.
    pub ransac_iterations: usize,
    /// RANSAC reprojection tolerance in pixels.
    pub ransac_threshold: f32,
    /// Emit per-branch timing logs. Diagnostics only; never affects results.
    pub enable_profiling: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_optical_flow: true,
            detection_interval: 15,
            max_features: 800,
            max_tracking_points: 100,
            match_ratio_threshold: 0.7,
            ransac_iterations: 2000,
            ransac_threshold: 3.0,
            enable_profiling: false,
        }
    }
}

/// Detection-stage settings beyond what [`EngineConfig`] carries.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherParams {
    /// Floor on both ratio-test correspondences and RANSAC inliers.
    pub min_inliers: usize,
    /// Seed for RANSAC hypothesis sampling; fixed so repeated frames fit
    /// identical models.
    pub ransac_seed: u64,
}

impl Default for MatcherParams {
    fn default() -> Self {
        Self {
            min_inliers: 10,
            ransac_seed: DEFAULT_SEED,
        }
    }
}

/// Tracking-stage settings.
///
/// The tracker owns its own RANSAC settings rather than inheriting the
/// detection values: it fits tens of flow points, not hundreds of
/// descriptor matches.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// Tracking-point cap per target; adopted from
    /// [`EngineConfig::max_tracking_points`] on `configure`.
    pub max_points: usize,
    /// Deactivate a target when fewer flow points than this survive, or the
    /// homography keeps fewer inliers.
    pub min_inliers: usize,
    /// Forward-backward round-trip tolerance in pixels.
    pub fb_threshold: f32,
    /// Staleness bound: tracking points are re-seeded once this many frames
    /// pass without a detection refresh, and confidence decays toward it.
    pub max_frames_without_detection: u32,
    /// Corners may drift this far outside the frame before deactivation.
    pub bounds_margin: f32,
    /// Minimum transformed quad side length in pixels.
    pub min_quad_side: f32,
    pub ransac_iterations: usize,
    pub ransac_threshold: f32,
    pub ransac_seed: u64,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            max_points: 100,
            min_inliers: 8,
            fb_threshold: 1.0,
            max_frames_without_detection: 30,
            bounds_margin: 50.0,
            min_quad_side: 20.0,
            ransac_iterations: 500,
            ransac_threshold: 3.0,
            ransac_seed: DEFAULT_SEED,
        }
    }
}

/// Target-database settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreParams {
    /// Candidate ids returned per query when filtering engages; also the
    /// result-count cap of a detection frame.
    pub max_candidates: usize,
    /// Databases at or below this size bypass the candidate filter.
    pub filter_min_targets: usize,
    /// Disable to always match every stored target.
    pub enable_filter: bool,
}

impl Default for StoreParams {
    fn default() -> Self {
        Self {
            max_candidates: 3,
            filter_min_targets: 3,
            enable_filter: true,
        }
    }
}

/// Buffer-pool capacities, slots per kind.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolParams {
    pub frame_slots: usize,
    pub descriptor_slots: usize,
    pub point_slots: usize,
}

impl Default for PoolParams {
    fn default() -> Self {
        Self {
            frame_slots: 4,
            descriptor_slots: 4,
            point_slots: 8,
        }
    }
}

/// Everything an [`Engine`](crate::Engine) is built from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    pub config: EngineConfig,
    pub matcher: MatcherParams,
    pub tracker: TrackerParams,
    pub store: StoreParams,
    pub pool: PoolParams,
}
