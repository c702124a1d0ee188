//! The per-frame pipeline: grayscale conversion, the detect-vs-track
//! branch, tracker refresh, result caching, and diagnostics.
//!
//! One [`Engine`] owns every component. Calls are synchronous and run to
//! completion on the calling thread; the engine is not safe for concurrent
//! `process_frame` calls, so callers must finish one frame before starting
//! the next.

use std::collections::BTreeMap;
use std::time::Instant;

use log::debug;
use nalgebra::Point2;
use planar_track_core::{
    check_frame, rgb_to_gray_into, ConvertError, DescriptorSet, FeatureExtractor, FlowEstimator,
    GrayImage, Keypoint, KnnMatcher, PointSeeder,
};
use thiserror::Error;

#[cfg(feature = "vision")]
use planar_track_vision::{
    BriefExtractor, HammingMatcher, LkParams, PyrLkFlow, SeedParams, ShiTomasiSeeder,
};

use crate::config::{EngineConfig, EngineParams};
use crate::detect::FeatureMatcher;
use crate::flow::FlowTracker;
use crate::pool::{BufferPool, PoolStats, PooledBuffer};
use crate::result::{FrameStats, TrackingResult};
use crate::store::{AddTargetError, CandidateFilter, TargetStore};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessFrameError {
    #[error("engine is not running; call start() first")]
    NotRunning,
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

pub struct Engine {
    params: EngineParams,
    store: TargetStore,
    matcher: FeatureMatcher,
    tracker: FlowTracker,
    pool: BufferPool,
    running: bool,
    frame_counter: u64,
    previous: Option<PooledBuffer<GrayImage>>,
    last_results: BTreeMap<String, TrackingResult>,
    last_stats: FrameStats,
}

impl Engine {
    /// Builds an engine around caller-supplied vision backends.
    pub fn with_backends(
        params: EngineParams,
        extractor: Box<dyn FeatureExtractor>,
        matcher: Box<dyn KnnMatcher>,
        flow: Box<dyn FlowEstimator>,
        seeder: Box<dyn PointSeeder>,
    ) -> Self {
        let mut engine = Self {
            params,
            store: TargetStore::new(params.store),
            matcher: FeatureMatcher::new(params.matcher, extractor, matcher),
            tracker: FlowTracker::new(params.tracker, flow, seeder),
            pool: BufferPool::new(params.pool),
            running: false,
            frame_counter: 0,
            previous: None,
            last_results: BTreeMap::new(),
            last_stats: FrameStats::default(),
        };
        engine.configure(params.config);
        engine
    }

    /// Builds an engine with the bundled reference backends.
    #[cfg(feature = "vision")]
    pub fn new(params: EngineParams) -> Self {
        Self::with_backends(
            params,
            Box::new(BriefExtractor::default()),
            Box::new(HammingMatcher),
            Box::new(PyrLkFlow::new(LkParams::default())),
            Box::new(ShiTomasiSeeder::new(SeedParams::default())),
        )
    }

    /// Replaces the configuration snapshot. Components adopt the fields
    /// that concern them; no range validation is performed.
    pub fn configure(&mut self, config: EngineConfig) {
        self.params.config = config;
        let mut tracker_params = *self.tracker.params();
        tracker_params.max_points = config.max_tracking_points;
        self.tracker.set_params(tracker_params);
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.params.config
    }

    #[inline]
    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    /// Registers a target for detection. Tracking state is created lazily,
    /// the first time the target is detected.
    pub fn add_target(
        &mut self,
        id: impl Into<String>,
        descriptors: DescriptorSet,
        keypoints: Option<Vec<Keypoint>>,
        corners: &[Point2<f32>],
        signature: Option<Vec<u8>>,
    ) -> Result<(), AddTargetError> {
        self.store
            .add_target(id, descriptors, keypoints, corners, signature)
    }

    /// Removes the target, its tracking state, and its cached result.
    /// Returns whether the store held it.
    pub fn remove_target(&mut self, id: &str) -> bool {
        let removed = self.store.remove(id);
        self.tracker.remove_target(id);
        self.last_results.remove(id);
        removed
    }

    pub fn clear_targets(&mut self) {
        self.store.clear();
        self.tracker.clear();
        self.last_results.clear();
    }

    pub fn set_candidate_filter(&mut self, filter: Box<dyn CandidateFilter>) {
        self.store.set_filter(filter);
    }

    /// Begins accepting frames. Resets the frame counter and diagnostics;
    /// targets and tracking state are kept.
    pub fn start(&mut self) {
        self.running = true;
        self.frame_counter = 0;
        self.reset_stats();
    }

    /// Stops accepting frames and releases the retained previous frame.
    pub fn stop(&mut self) {
        self.running = false;
        self.previous = None;
    }

    /// Back to a just-constructed state, except registered targets stay.
    pub fn reset(&mut self) {
        self.running = false;
        self.frame_counter = 0;
        self.previous = None;
        self.last_results.clear();
        self.tracker.clear();
        self.reset_stats();
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[inline]
    pub fn target_count(&self) -> usize {
        self.store.len()
    }

    #[inline]
    pub fn store(&self) -> &TargetStore {
        &self.store
    }

    #[inline]
    pub fn tracker(&self) -> &FlowTracker {
        &self.tracker
    }

    /// Most recent result for `id`, from whichever frame last produced one.
    pub fn last_result(&self, id: &str) -> Option<&TrackingResult> {
        self.last_results.get(id)
    }

    pub fn last_results(&self) -> impl Iterator<Item = &TrackingResult> {
        self.last_results.values()
    }

    #[inline]
    pub fn last_frame_stats(&self) -> &FrameStats {
        &self.last_stats
    }

    pub fn reset_stats(&mut self) {
        self.last_stats = FrameStats::default();
    }

    #[inline]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Processes one RGB or RGBA frame and returns the per-target results
    /// of whichever branch ran.
    ///
    /// Every `detection_interval`-th frame (counted from frame 0) runs the
    /// detection batch; other frames advance previously detected targets
    /// with optical flow, provided that is enabled and a previous frame
    /// exists. An empty result list means nothing was found, never that the
    /// call failed.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(frame = self.frame_counter))
    )]
    pub fn process_frame(
        &mut self,
        pixels: &[u8],
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Vec<TrackingResult>, ProcessFrameError> {
        if !self.running {
            return Err(ProcessFrameError::NotRunning);
        }
        let frame_start = Instant::now();

        // input checks run before any buffer is acquired
        check_frame(pixels, width, height, channels)?;
        let mut gray = self.pool.acquire_frame(width, height);
        rgb_to_gray_into(pixels, width, height, channels, &mut gray)?;

        let frame_number = self.frame_counter;
        self.frame_counter += 1;

        let mut stats = FrameStats {
            frame_number,
            ..FrameStats::default()
        };
        let mut results = Vec::new();

        let interval = u64::from(self.params.config.detection_interval.max(1));
        if frame_number % interval == 0 {
            let detect_start = Instant::now();
            results = self
                .matcher
                .detect(&gray.view(), &self.store, &self.params.config, &self.pool);
            stats.detection_ms = detect_start.elapsed().as_secs_f64() * 1e3;
            stats.detected_count = results.len();

            if self.params.config.use_optical_flow {
                for result in &results {
                    if result.detected {
                        self.tracker
                            .update_target(&result.id, &result.corners, &gray.view());
                    }
                }
            }
        } else if self.params.config.use_optical_flow {
            if let Some(prev) = &self.previous {
                let track_start = Instant::now();
                results = self.tracker.track_frame(&prev.view(), &gray.view());
                stats.tracking_ms = track_start.elapsed().as_secs_f64() * 1e3;
                stats.tracked_count = results.len();
            }
        }

        // current frame becomes the flow reference for the next call
        self.previous = Some(gray);

        for result in &results {
            self.last_results
                .insert(result.id.clone(), result.clone());
        }

        stats.total_ms = frame_start.elapsed().as_secs_f64() * 1e3;
        if self.params.config.enable_profiling {
            debug!(
                "frame {frame_number}: {} result(s), detect {:.2} ms, track {:.2} ms, total {:.2} ms",
                results.len(),
                stats.detection_ms,
                stats.tracking_ms,
                stats.total_ms
            );
        }
        self.last_stats = stats;

        Ok(results)
    }
}

#[cfg(feature = "vision")]
impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planar_track_core::{DescriptorMatch, GrayImageView, Quad};

    struct NullExtractor;

    impl FeatureExtractor for NullExtractor {
        fn descriptor_width(&self) -> usize {
            8
        }

        fn extract(
            &self,
            _frame: &GrayImageView<'_>,
            _max_features: usize,
            descriptors: &mut DescriptorSet,
        ) -> Vec<Keypoint> {
            descriptors.reset(8);
            Vec::new()
        }
    }

    struct NullMatcher;

    impl KnnMatcher for NullMatcher {
        fn knn(
            &self,
            _query: &DescriptorSet,
            _train: &DescriptorSet,
            _k: usize,
        ) -> Vec<Vec<DescriptorMatch>> {
            Vec::new()
        }
    }

    struct NullFlow;

    impl FlowEstimator for NullFlow {
        fn track(
            &self,
            _prev: &GrayImageView<'_>,
            _curr: &GrayImageView<'_>,
            points: &[Point2<f32>],
            tracked: &mut Vec<Point2<f32>>,
            status: &mut Vec<bool>,
            errors: &mut Vec<f32>,
        ) {
            tracked.clear();
            status.clear();
            errors.clear();
            tracked.extend_from_slice(points);
            status.resize(points.len(), false);
            errors.resize(points.len(), 0.0);
        }
    }

    struct NullSeeder;

    impl PointSeeder for NullSeeder {
        fn seed_in_quad(
            &self,
            _frame: &GrayImageView<'_>,
            _region: &Quad,
            _max_points: usize,
            out: &mut Vec<Point2<f32>>,
        ) {
            out.clear();
        }
    }

    fn null_engine(params: EngineParams) -> Engine {
        Engine::with_backends(
            params,
            Box::new(NullExtractor),
            Box::new(NullMatcher),
            Box::new(NullFlow),
            Box::new(NullSeeder),
        )
    }

    #[test]
    fn frames_are_rejected_until_started() {
        let mut engine = null_engine(EngineParams::default());
        let pixels = vec![0u8; 4 * 4 * 3];

        let err = engine.process_frame(&pixels, 4, 4, 3).unwrap_err();
        assert_eq!(err, ProcessFrameError::NotRunning);

        engine.start();
        assert!(engine.is_running());
        let results = engine.process_frame(&pixels, 4, 4, 3).unwrap();
        assert!(results.is_empty());

        engine.stop();
        assert!(!engine.is_running());
        assert!(engine.process_frame(&pixels, 4, 4, 3).is_err());
    }

    #[test]
    fn conversion_failures_surface_as_errors() {
        let mut engine = null_engine(EngineParams::default());
        engine.start();

        let err = engine.process_frame(&[0u8; 8], 2, 2, 2).unwrap_err();
        assert_eq!(
            err,
            ProcessFrameError::Convert(ConvertError::UnsupportedChannels(2))
        );

        let err = engine.process_frame(&[0u8; 3], 2, 2, 3).unwrap_err();
        assert_eq!(
            err,
            ProcessFrameError::Convert(ConvertError::BufferTooShort {
                expected: 12,
                got: 3
            })
        );
    }

    #[test]
    fn oversized_frames_are_rejected_before_allocation() {
        let mut engine = null_engine(EngineParams::default());
        engine.start();

        let huge = usize::MAX / 2;
        let err = engine.process_frame(&[0u8; 3], huge, huge, 3).unwrap_err();
        assert_eq!(
            err,
            ProcessFrameError::Convert(ConvertError::FrameTooLarge {
                width: huge,
                height: huge
            })
        );

        // a representable product with a short buffer also fails up front
        let err = engine.process_frame(&[0u8; 3], 4096, 4096, 3).unwrap_err();
        assert_eq!(
            err,
            ProcessFrameError::Convert(ConvertError::BufferTooShort {
                expected: 4096 * 4096 * 3,
                got: 3
            })
        );
        assert_eq!(engine.pool_stats().frames_allocated, 0);
    }

    #[test]
    fn configure_adopts_the_tracking_point_cap() {
        let mut engine = null_engine(EngineParams::default());
        assert_eq!(engine.tracker().params().max_points, 100);

        let config = EngineConfig {
            max_tracking_points: 42,
            ..EngineConfig::default()
        };
        engine.configure(config);
        assert_eq!(engine.tracker().params().max_points, 42);
        assert_eq!(engine.config().max_tracking_points, 42);
    }

    #[test]
    fn frame_counter_and_stats_track_each_call() {
        let mut engine = null_engine(EngineParams::default());
        engine.start();
        let pixels = vec![128u8; 8 * 8 * 3];

        engine.process_frame(&pixels, 8, 8, 3).unwrap();
        assert_eq!(engine.last_frame_stats().frame_number, 0);
        engine.process_frame(&pixels, 8, 8, 3).unwrap();
        assert_eq!(engine.last_frame_stats().frame_number, 1);

        engine.reset_stats();
        assert_eq!(*engine.last_frame_stats(), FrameStats::default());

        // start() rewinds the counter
        engine.start();
        engine.process_frame(&pixels, 8, 8, 3).unwrap();
        assert_eq!(engine.last_frame_stats().frame_number, 0);
    }
}
