//! BRIEF-style binary description over Shi-Tomasi keypoints.
//!
//! Upright descriptors: 256 smoothed intensity comparisons on a fixed
//! pseudo-random offset pattern, packed into 32 bytes. The pattern is
//! generated once from a seed, so descriptors are reproducible across runs
//! and translation-stable for matching in Hamming space.

use nalgebra::Point2;
use planar_track_core::{DescriptorSet, FeatureExtractor, GrayImageView, Keypoint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::seed::{select_spread, shi_tomasi_candidates};

/// Bytes per descriptor (256 comparison bits).
pub const DESCRIPTOR_WIDTH: usize = 32;

/// Largest comparison offset from the keypoint centre.
const PATTERN_RADIUS: i32 = 13;

/// Keypoints closer than this to a border cannot be described.
const PATCH_MARGIN: usize = 16;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BriefParams {
    /// Seed for the fixed comparison pattern.
    pub pattern_seed: u64,
    /// Corner quality floor, fraction of the strongest response.
    pub quality_level: f32,
    /// Minimum keypoint spacing, in pixels.
    pub min_distance: f32,
    /// Structure-tensor window radius for the corner score.
    pub block_radius: i32,
}

impl Default for BriefParams {
    fn default() -> Self {
        Self {
            pattern_seed: 0x6272_6965_66,
            quality_level: 0.01,
            min_distance: 8.0,
            block_radius: 1,
        }
    }
}

pub struct BriefExtractor {
    params: BriefParams,
    pattern: Vec<(i32, i32, i32, i32)>,
}

impl BriefExtractor {
    pub fn new(params: BriefParams) -> Self {
        let mut rng = StdRng::seed_from_u64(params.pattern_seed);
        let mut pattern = Vec::with_capacity(DESCRIPTOR_WIDTH * 8);
        for _ in 0..DESCRIPTOR_WIDTH * 8 {
            let a = (
                rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
            );
            let mut b = a;
            while b == a {
                b = (
                    rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                    rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                );
            }
            pattern.push((a.0, a.1, b.0, b.1));
        }
        Self { params, pattern }
    }

    #[inline]
    pub fn params(&self) -> &BriefParams {
        &self.params
    }

    /// 3x3 box mean around an integer position; the caller keeps the block
    /// inside the frame.
    #[inline]
    fn smoothed(frame: &GrayImageView<'_>, x: i32, y: i32) -> f32 {
        let mut sum = 0u32;
        for dy in -1..=1 {
            let row = (y + dy) as usize * frame.width;
            for dx in -1..=1 {
                sum += frame.data[row + (x + dx) as usize] as u32;
            }
        }
        sum as f32 / 9.0
    }

    fn describe(&self, frame: &GrayImageView<'_>, x: i32, y: i32, row: &mut [u8; DESCRIPTOR_WIDTH]) {
        row.fill(0);
        for (bit, &(ax, ay, bx, by)) in self.pattern.iter().enumerate() {
            let a = Self::smoothed(frame, x + ax, y + ay);
            let b = Self::smoothed(frame, x + bx, y + by);
            if a < b {
                row[bit / 8] |= 1 << (bit % 8);
            }
        }
    }
}

impl Default for BriefExtractor {
    fn default() -> Self {
        Self::new(BriefParams::default())
    }
}

impl FeatureExtractor for BriefExtractor {
    fn descriptor_width(&self) -> usize {
        DESCRIPTOR_WIDTH
    }

    fn extract(
        &self,
        frame: &GrayImageView<'_>,
        max_features: usize,
        descriptors: &mut DescriptorSet,
    ) -> Vec<Keypoint> {
        descriptors.reset(DESCRIPTOR_WIDTH);
        if max_features == 0
            || frame.width <= 2 * PATCH_MARGIN
            || frame.height <= 2 * PATCH_MARGIN
        {
            return Vec::new();
        }

        let candidates = shi_tomasi_candidates(
            frame,
            (
                PATCH_MARGIN,
                PATCH_MARGIN,
                frame.width - PATCH_MARGIN,
                frame.height - PATCH_MARGIN,
            ),
            self.params.block_radius,
            |_, _| true,
        );
        let picked = select_spread(
            candidates,
            self.params.quality_level,
            self.params.min_distance,
            max_features,
        );

        let mut row = [0u8; DESCRIPTOR_WIDTH];
        let mut keypoints = Vec::with_capacity(picked.len());
        for c in picked {
            self.describe(frame, c.x as i32, c.y as i32, &mut row);
            descriptors.push_row(&row);
            keypoints.push(Keypoint {
                position: Point2::new(c.x, c.y),
                size: (2 * PATTERN_RADIUS + 1) as f32,
                angle: 0.0,
                response: c.score,
                octave: 0,
            });
        }
        keypoints
    }
}
