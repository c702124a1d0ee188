//! Tracking stage: advances detected targets between detection frames with
//! forward-backward validated optical flow and per-corner smoothing.
//!
//! Each target runs a small state machine. An entry becomes Active through
//! [`FlowTracker::initialize_target`] or [`FlowTracker::update_target`],
//! goes Inactive on any per-frame validation failure, and returns to Active
//! only through another explicit update carrying fresh corners. Inactive
//! entries are skipped, not deleted.

use std::collections::BTreeMap;

use log::debug;
use nalgebra::Point2;
use planar_track_core::{
    ransac_homography, FlowEstimator, GrayImageView, PointKalman, PointSeeder, Quad, RansacParams,
};

use crate::config::TrackerParams;
use crate::result::{TrackSource, TrackingResult};

/// Per-target tracking state.
///
/// `corners` holds the raw homography-advanced quad; the smoothed quad
/// reported to callers is derived from the corner filters each frame and
/// never fed back into tracking.
#[derive(Clone, Debug)]
pub struct TrackState {
    corners: Quad,
    points: Vec<Point2<f32>>,
    filters: [PointKalman; 4],
    confidence: f32,
    frames_tracked: u64,
    frames_since_detection: u32,
    active: bool,
}

impl TrackState {
    fn new(corners: Quad) -> Self {
        Self {
            corners,
            points: Vec::new(),
            filters: corners.corners.map(PointKalman::new),
            confidence: 1.0,
            frames_tracked: 0,
            frames_since_detection: 0,
            active: true,
        }
    }

    #[inline]
    pub fn corners(&self) -> &Quad {
        &self.corners
    }

    #[inline]
    pub fn points(&self) -> &[Point2<f32>] {
        &self.points
    }

    #[inline]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    #[inline]
    pub fn frames_tracked(&self) -> u64 {
        self.frames_tracked
    }

    #[inline]
    pub fn frames_since_detection(&self) -> u32 {
        self.frames_since_detection
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Reused flow buffers, one set for the whole tracker.
#[derive(Default)]
struct FlowScratch {
    flowed: Vec<Point2<f32>>,
    forward_ok: Vec<bool>,
    forward_err: Vec<f32>,
    back: Vec<Point2<f32>>,
    back_ok: Vec<bool>,
    back_err: Vec<f32>,
    good_prev: Vec<Point2<f32>>,
    good_curr: Vec<Point2<f32>>,
}

pub struct FlowTracker {
    params: TrackerParams,
    flow: Box<dyn FlowEstimator>,
    seeder: Box<dyn PointSeeder>,
    states: BTreeMap<String, TrackState>,
    scratch: FlowScratch,
}

impl FlowTracker {
    pub fn new(
        params: TrackerParams,
        flow: Box<dyn FlowEstimator>,
        seeder: Box<dyn PointSeeder>,
    ) -> Self {
        Self {
            params,
            flow,
            seeder,
            states: BTreeMap::new(),
            scratch: FlowScratch::default(),
        }
    }

    #[inline]
    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    pub fn set_params(&mut self, params: TrackerParams) {
        self.params = params;
    }

    /// Creates (or recreates) the state for `id`: corners adopted as-is,
    /// corner filters started at the corners with zero velocity, tracking
    /// points seeded from `frame` inside the quad.
    pub fn initialize_target(&mut self, id: &str, corners: &Quad, frame: &GrayImageView<'_>) {
        let mut state = TrackState::new(*corners);
        self.seeder
            .seed_in_quad(frame, corners, self.params.max_points, &mut state.points);
        self.states.insert(id.to_owned(), state);
    }

    /// Refreshes `id` after a detection: new corners, filters reset, point
    /// set reseeded from `frame`, staleness cleared, state marked Active.
    /// Unknown ids are initialized instead.
    pub fn update_target(&mut self, id: &str, corners: &Quad, frame: &GrayImageView<'_>) {
        let Some(state) = self.states.get_mut(id) else {
            self.initialize_target(id, corners, frame);
            return;
        };
        state.corners = *corners;
        state.filters = corners.corners.map(PointKalman::new);
        state.confidence = 1.0;
        state.frames_since_detection = 0;
        state.active = true;
        self.seeder
            .seed_in_quad(frame, corners, self.params.max_points, &mut state.points);
    }

    pub fn remove_target(&mut self, id: &str) -> bool {
        self.states.remove(id).is_some()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn state(&self, id: &str) -> Option<&TrackState> {
        self.states.get(id)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.states.get(id).is_some_and(TrackState::is_active)
    }

    pub fn active_count(&self) -> usize {
        self.states.values().filter(|s| s.active).count()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|(_, s)| s.active)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Advances every Active target from `prev` to `curr`. Targets that fail
    /// any validation step this frame go Inactive and produce no result.
    pub fn track_frame(
        &mut self,
        prev: &GrayImageView<'_>,
        curr: &GrayImageView<'_>,
    ) -> Vec<TrackingResult> {
        let mut results = Vec::new();
        let mut attempted = 0usize;
        for (id, state) in self.states.iter_mut() {
            if !state.active {
                continue;
            }
            attempted += 1;
            match step_target(
                &self.params,
                self.flow.as_ref(),
                self.seeder.as_ref(),
                id,
                state,
                prev,
                curr,
                &mut self.scratch,
            ) {
                Some(result) => results.push(result),
                None => {
                    state.active = false;
                    debug!("tracking: target `{id}` lost");
                }
            }
        }
        debug!(
            "tracking: {} of {attempted} active targets advanced",
            results.len()
        );
        results
    }
}

/// One target, one frame. `None` deactivates the target.
#[allow(clippy::too_many_arguments)]
fn step_target(
    params: &TrackerParams,
    flow: &dyn FlowEstimator,
    seeder: &dyn PointSeeder,
    id: &str,
    state: &mut TrackState,
    prev: &GrayImageView<'_>,
    curr: &GrayImageView<'_>,
    scratch: &mut FlowScratch,
) -> Option<TrackingResult> {
    if state.points.is_empty()
        || state.frames_since_detection > params.max_frames_without_detection
    {
        seeder.seed_in_quad(prev, &state.corners, params.max_points, &mut state.points);
        state.frames_since_detection = 0;
    }
    if state.points.is_empty() {
        return None;
    }

    flow.track(
        prev,
        curr,
        &state.points,
        &mut scratch.flowed,
        &mut scratch.forward_ok,
        &mut scratch.forward_err,
    );
    flow.track(
        curr,
        prev,
        &scratch.flowed,
        &mut scratch.back,
        &mut scratch.back_ok,
        &mut scratch.back_err,
    );

    // forward-backward consistency: a point survives only when both
    // directions tracked and the round trip lands within fb_threshold
    scratch.good_prev.clear();
    scratch.good_curr.clear();
    let limit = params.fb_threshold * params.fb_threshold;
    for i in 0..state.points.len() {
        if !scratch.forward_ok[i] || !scratch.back_ok[i] {
            continue;
        }
        if (state.points[i] - scratch.back[i]).norm_squared() > limit {
            continue;
        }
        scratch.good_prev.push(state.points[i]);
        scratch.good_curr.push(scratch.flowed[i]);
    }
    if scratch.good_curr.len() < params.min_inliers {
        return None;
    }

    let ransac = RansacParams {
        iterations: params.ransac_iterations,
        threshold: params.ransac_threshold,
        seed: params.ransac_seed,
    };
    let fit = ransac_homography(&scratch.good_prev, &scratch.good_curr, &ransac)?;
    if fit.inlier_count < params.min_inliers {
        return None;
    }

    let moved = state.corners.transform(&fit.homography);
    if !valid_quad(&moved, params, (curr.width, curr.height)) {
        return None;
    }
    state.corners = moved;

    // correct each corner filter with the measurement, report the prediction
    let mut smoothed = moved;
    for (filter, corner) in state.filters.iter_mut().zip(smoothed.corners.iter_mut()) {
        filter.correct(*corner);
        *corner = filter.predict();
    }

    state.points.clear();
    state.points.extend_from_slice(&scratch.good_curr);
    state.frames_tracked += 1;
    state.frames_since_detection += 1;

    let inlier_ratio = fit.inlier_count as f32 / scratch.good_curr.len() as f32;
    let decay = 1.0
        - state.frames_since_detection as f32 / params.max_frames_without_detection as f32;
    state.confidence = (inlier_ratio * decay).max(0.0);

    Some(TrackingResult {
        id: id.to_owned(),
        detected: true,
        corners: smoothed,
        confidence: state.confidence,
        source: TrackSource::OpticalFlow,
    })
}

fn valid_quad(quad: &Quad, params: &TrackerParams, (width, height): (usize, usize)) -> bool {
    if !quad.is_finite() {
        return false;
    }
    if !quad.within_bounds(width as f32, height as f32, params.bounds_margin) {
        return false;
    }
    let w = quad.width();
    let h = quad.height();
    w >= params.min_quad_side
        && h >= params.min_quad_side
        && w <= width as f32 * 2.0
        && h <= height as f32 * 2.0
}
