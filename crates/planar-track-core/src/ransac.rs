//! Robust homography fitting over noisy point correspondences.
//!
//! Minimal 4-point hypotheses are sampled with a seeded RNG so that the
//! same correspondence set always yields the same model, then the best
//! hypothesis is refined by a DLT fit over its consensus set.

use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{estimate_homography, homography_from_4pt, Homography};

/// Default sampling seed; any fixed value keeps results reproducible.
pub const DEFAULT_SEED: u64 = 0x7261_6e73_6163;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RansacParams {
    /// Number of minimal-sample hypotheses to evaluate.
    pub iterations: usize,
    /// Forward reprojection tolerance in pixels.
    pub threshold: f32,
    /// RNG seed for hypothesis sampling.
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            iterations: 2000,
            threshold: 3.0,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RansacResult {
    pub homography: Homography,
    /// One flag per input correspondence.
    pub inliers: Vec<bool>,
    pub inlier_count: usize,
}

#[inline]
fn reprojection_sq(h: &Homography, s: Point2<f32>, d: Point2<f32>) -> f32 {
    let p = h.apply(s);
    if !p.x.is_finite() || !p.y.is_finite() {
        return f32::INFINITY;
    }
    let dx = p.x - d.x;
    let dy = p.y - d.y;
    dx * dx + dy * dy
}

fn consensus(
    h: &Homography,
    src: &[Point2<f32>],
    dst: &[Point2<f32>],
    thresh_sq: f32,
    mask: &mut [bool],
) -> usize {
    let mut count = 0;
    for i in 0..src.len() {
        let inlier = reprojection_sq(h, src[i], dst[i]) <= thresh_sq;
        mask[i] = inlier;
        if inlier {
            count += 1;
        }
    }
    count
}

/// Fit dst ~ H * src robustly. `None` when no hypothesis reaches 4 inliers
/// or the inputs are unusable (mismatched lengths, fewer than 4 pairs).
pub fn ransac_homography(
    src: &[Point2<f32>],
    dst: &[Point2<f32>],
    params: &RansacParams,
) -> Option<RansacResult> {
    let n = src.len();
    if n != dst.len() || n < 4 {
        return None;
    }
    let thresh_sq = params.threshold * params.threshold;

    if n == 4 {
        let h = estimate_homography(src, dst)?;
        let mut mask = vec![false; 4];
        let count = consensus(&h, src, dst, thresh_sq, &mut mask);
        return Some(RansacResult {
            homography: h,
            inliers: mask,
            inlier_count: count,
        });
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Homography, usize)> = None;
    let mut mask = vec![false; n];

    let mut sample = [0usize; 4];
    let mut s_pts = [Point2::new(0.0_f32, 0.0); 4];
    let mut d_pts = [Point2::new(0.0_f32, 0.0); 4];

    for _ in 0..params.iterations.max(1) {
        // four distinct indices
        for k in 0..4 {
            loop {
                let idx = rng.gen_range(0..n);
                if !sample[..k].contains(&idx) {
                    sample[k] = idx;
                    break;
                }
            }
        }
        for k in 0..4 {
            s_pts[k] = src[sample[k]];
            d_pts[k] = dst[sample[k]];
        }

        let Some(h) = homography_from_4pt(&s_pts, &d_pts) else {
            continue;
        };

        let count = consensus(&h, src, dst, thresh_sq, &mut mask);
        if count > best.as_ref().map_or(0, |(_, c)| *c) {
            best = Some((h, count));
            if count == n {
                break;
            }
        }
    }

    let (best_h, best_count) = best?;
    if best_count < 4 {
        return None;
    }

    // recompute the winning consensus, then refine over it
    let mut count = consensus(&best_h, src, dst, thresh_sq, &mut mask);
    let mut homography = best_h;

    if count > 4 {
        let in_src: Vec<Point2<f32>> = (0..n).filter(|&i| mask[i]).map(|i| src[i]).collect();
        let in_dst: Vec<Point2<f32>> = (0..n).filter(|&i| mask[i]).map(|i| dst[i]).collect();
        if let Some(refined) = estimate_homography(&in_src, &in_dst) {
            let mut refined_mask = vec![false; n];
            let refined_count = consensus(&refined, src, dst, thresh_sq, &mut refined_mask);
            // keep the refinement only when it does not lose consensus
            if refined_count >= count {
                homography = refined;
                mask = refined_mask;
                count = refined_count;
            }
        }
    }

    Some(RansacResult {
        homography,
        inliers: mask,
        inlier_count: count,
    })
}
