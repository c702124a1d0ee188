//! Contracts for the vision primitives the pipeline consumes.
//!
//! The pipeline never names a concrete extractor, matcher, flow estimator,
//! or corner seeder; it holds boxed implementations of these traits. The
//! `planar-track-vision` crate provides reference implementations, and test
//! code substitutes deterministic stubs.

use nalgebra::Point2;

use crate::{DescriptorMatch, DescriptorSet, GrayImageView, Keypoint, Quad};

/// Keypoint + descriptor extraction over a full grayscale frame.
pub trait FeatureExtractor: Send {
    /// Byte width of the descriptor rows this extractor produces. Known up
    /// front so callers can size reusable buffers before extraction.
    fn descriptor_width(&self) -> usize;

    /// Detects up to `max_features` keypoints and writes one descriptor row
    /// per returned keypoint into `descriptors` (which is reset first).
    /// An empty return means the frame had no usable structure.
    fn extract(
        &self,
        frame: &GrayImageView<'_>,
        max_features: usize,
        descriptors: &mut DescriptorSet,
    ) -> Vec<Keypoint>;
}

/// k-nearest-neighbour descriptor matching.
pub trait KnnMatcher: Send {
    /// For each query row, the up-to-`k` nearest train rows ordered by
    /// ascending distance. Incompatible sets (width mismatch, either side
    /// empty) yield an empty outer vector.
    fn knn(&self, query: &DescriptorSet, train: &DescriptorSet, k: usize)
        -> Vec<Vec<DescriptorMatch>>;
}

/// Sparse optical flow between two frames.
pub trait FlowEstimator: Send {
    /// Tracks `points` from `prev` into `curr`. All three output vectors are
    /// cleared and refilled to `points.len()`: flowed position, validity,
    /// and a residual error (implementation-defined scale, informational).
    fn track(
        &self,
        prev: &GrayImageView<'_>,
        curr: &GrayImageView<'_>,
        points: &[Point2<f32>],
        tracked: &mut Vec<Point2<f32>>,
        status: &mut Vec<bool>,
        errors: &mut Vec<f32>,
    );
}

/// Region-constrained corner seeding for flow tracking.
pub trait PointSeeder: Send {
    /// Fills `out` (cleared first) with up to `max_points` trackable points
    /// strictly inside `region`.
    fn seed_in_quad(
        &self,
        frame: &GrayImageView<'_>,
        region: &Quad,
        max_points: usize,
        out: &mut Vec<Point2<f32>>,
    );
}
