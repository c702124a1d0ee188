//! Real-time planar target tracking over raw camera frames.
//!
//! This crate wires the `planar-track-*` workspace into one pipeline: an
//! [`Engine`] that converts each RGB/RGBA frame to grayscale, periodically
//! re-detects registered planar targets by descriptor matching + robust
//! homography fitting, and advances them on the frames in between with
//! forward-backward validated optical flow and per-corner smoothing.
//!
//! ## Quickstart
//!
//! ```no_run
//! use planar_track::{DescriptorSet, Engine};
//! use nalgebra::Point2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = Engine::default();
//!
//! // descriptors/keypoints usually come from an offline target build
//! let (descriptors, keypoints) = load_poster_features();
//! let corners = [
//!     Point2::new(0.0, 0.0),
//!     Point2::new(512.0, 0.0),
//!     Point2::new(512.0, 384.0),
//!     Point2::new(0.0, 384.0),
//! ];
//! engine.add_target("poster", descriptors, Some(keypoints), &corners, None)?;
//!
//! engine.start();
//! let frame: Vec<u8> = vec![0; 640 * 480 * 4];
//! for result in engine.process_frame(&frame, 640, 480, 4)? {
//!     println!(
//!         "{}: detected={} confidence={:.2} via {:?}",
//!         result.id, result.detected, result.confidence, result.source
//!     );
//! }
//! # Ok(())
//! # }
//! # fn load_poster_features() -> (DescriptorSet, Vec<planar_track::Keypoint>) {
//! #     (DescriptorSet::new(32), Vec::new())
//! # }
//! ```
//!
//! ## API map
//! - [`Engine`]: lifecycle, configuration, `process_frame`.
//! - [`TargetStore`] / [`CandidateFilter`]: the target database and its
//!   pluggable candidate pre-filter.
//! - [`FeatureMatcher`] / [`FlowTracker`]: the two pipeline stages, usable
//!   standalone.
//! - [`BufferPool`]: shape-matched reuse of frame, descriptor, and point
//!   buffers.
//! - `planar_track::core`: geometric vocabulary (quads, homographies,
//!   descriptor sets) and the backend traits custom integrations implement.
//!
//! The default backends (BRIEF-style descriptors, Hamming k-NN, pyramidal
//! Lucas-Kanade flow, Shi-Tomasi seeding) live in `planar-track-vision`
//! behind the on-by-default `vision` feature; disable it when supplying
//! your own backends through [`Engine::with_backends`].

pub use planar_track_core as core;

mod config;
mod detect;
mod engine;
mod flow;
mod pool;
mod result;
mod store;

pub use config::{
    EngineConfig, EngineParams, MatcherParams, PoolParams, StoreParams, TrackerParams,
};
pub use detect::FeatureMatcher;
pub use engine::{Engine, ProcessFrameError};
pub use flow::{FlowTracker, TrackState};
pub use pool::{BufferPool, PoolStats, PooledBuffer};
pub use result::{FrameStats, TrackSource, TrackingResult};
pub use store::{
    AddTargetError, AllCandidates, CandidateFilter, DescriptorCountFilter, Target, TargetStore,
};

pub use planar_track_core::{
    DescriptorMatch, DescriptorSet, FeatureExtractor, FlowEstimator, GrayImage, GrayImageView,
    Keypoint, KnnMatcher, PointSeeder, Quad,
};

#[cfg(feature = "vision")]
pub use planar_track_vision as vision;
