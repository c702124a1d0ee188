//! Core types and utilities for planar target tracking.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete feature extractor, matcher, or optical-flow
//! implementation; those are consumed through the traits in [`backend`].

pub mod backend;
mod feature;
mod homography;
mod image;
mod kalman;
mod logger;
mod quad;
mod ransac;

pub use feature::{DescriptorMatch, DescriptorSet, Keypoint};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{
    check_frame, rgb_to_gray_into, sample_bilinear, sample_bilinear_u8, ConvertError, GrayImage,
    GrayImageView,
};
pub use kalman::PointKalman;
pub use quad::Quad;
pub use ransac::{ransac_homography, RansacParams, RansacResult, DEFAULT_SEED};

pub use backend::{FeatureExtractor, FlowEstimator, KnnMatcher, PointSeeder};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init, init_from_env, init_with_level};
