//! Iterative pyramidal Lucas-Kanade sparse optical flow.
//!
//! Coarse-to-fine per-point tracking in the Bouguet formulation: the
//! displacement found at each pyramid level seeds the next finer one. A
//! point fails when its window has no trackable structure at full
//! resolution or its final position leaves the frame.

use nalgebra::{Point2, Vector2};
use planar_track_core::{sample_bilinear, FlowEstimator, GrayImageView};
use serde::{Deserialize, Serialize};

use crate::{build_pyramid, Pyramid};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LkParams {
    /// Side of the square correlation window, in pixels (odd).
    pub window: usize,
    /// Pyramid images used, including full resolution.
    pub levels: usize,
    /// Refinement iterations per level.
    pub max_iterations: usize,
    /// Convergence threshold on the per-iteration update, in pixels.
    pub epsilon: f32,
    /// Minimum normalized eigenvalue of the window's structure tensor;
    /// below it the window is considered untrackable.
    pub min_eigenvalue: f32,
}

impl Default for LkParams {
    fn default() -> Self {
        Self {
            window: 21,
            levels: 4,
            max_iterations: 30,
            epsilon: 0.01,
            min_eigenvalue: 1e-4,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PyrLkFlow {
    params: LkParams,
}

struct WindowScratch {
    grad_x: Vec<f32>,
    grad_y: Vec<f32>,
    template: Vec<f32>,
}

impl PyrLkFlow {
    pub fn new(params: LkParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &LkParams {
        &self.params
    }

    fn track_point(
        &self,
        prev: &Pyramid,
        curr: &Pyramid,
        depth: usize,
        p: Point2<f32>,
        scratch: &mut WindowScratch,
    ) -> (Point2<f32>, bool, f32) {
        let half = (self.params.window / 2) as i32;
        let area = (self.params.window * self.params.window) as f32;

        let mut guess = Vector2::new(0.0_f32, 0.0);
        let mut valid = true;
        let mut residual = f32::INFINITY;

        for level in (0..depth).rev() {
            let pv = prev.level(level);
            let cv = curr.level(level);
            let scale = 1.0 / (1u32 << level) as f32;
            let px = p.x * scale;
            let py = p.y * scale;

            // template intensities and gradients are fixed per level
            let mut gxx = 0.0_f32;
            let mut gxy = 0.0_f32;
            let mut gyy = 0.0_f32;
            let mut idx = 0;
            for wy in -half..=half {
                for wx in -half..=half {
                    let x = px + wx as f32;
                    let y = py + wy as f32;
                    let gx = (sample_bilinear(&pv, x + 1.0, y) - sample_bilinear(&pv, x - 1.0, y))
                        * 0.5;
                    let gy = (sample_bilinear(&pv, x, y + 1.0) - sample_bilinear(&pv, x, y - 1.0))
                        * 0.5;
                    scratch.grad_x[idx] = gx;
                    scratch.grad_y[idx] = gy;
                    scratch.template[idx] = sample_bilinear(&pv, x, y);
                    gxx += gx * gx;
                    gxy += gx * gy;
                    gyy += gy * gy;
                    idx += 1;
                }
            }

            let det = gxx * gyy - gxy * gxy;
            let min_eig =
                0.5 * ((gxx + gyy) - ((gxx - gyy).powi(2) + 4.0 * gxy * gxy).sqrt()) / area;

            let mut delta = Vector2::new(0.0_f32, 0.0);
            if min_eig >= self.params.min_eigenvalue && det.abs() > f32::EPSILON {
                for _ in 0..self.params.max_iterations {
                    let mut bx = 0.0_f32;
                    let mut by = 0.0_f32;
                    let mut abs_diff = 0.0_f32;
                    let mut idx = 0;
                    for wy in -half..=half {
                        for wx in -half..=half {
                            let x = px + wx as f32 + guess.x + delta.x;
                            let y = py + wy as f32 + guess.y + delta.y;
                            let d = scratch.template[idx] - sample_bilinear(&cv, x, y);
                            bx += d * scratch.grad_x[idx];
                            by += d * scratch.grad_y[idx];
                            abs_diff += d.abs();
                            idx += 1;
                        }
                    }
                    residual = abs_diff / area;

                    let dx = (gyy * bx - gxy * by) / det;
                    let dy = (gxx * by - gxy * bx) / det;
                    delta.x += dx;
                    delta.y += dy;
                    if dx * dx + dy * dy < self.params.epsilon * self.params.epsilon {
                        break;
                    }
                }
            } else if level == 0 {
                valid = false;
            }

            guess += delta;
            if level > 0 {
                guess *= 2.0;
            }
        }

        let target = Point2::new(p.x + guess.x, p.y + guess.y);
        let base = curr.level(0);
        if !target.x.is_finite()
            || !target.y.is_finite()
            || target.x < 0.0
            || target.y < 0.0
            || target.x >= base.width as f32
            || target.y >= base.height as f32
        {
            valid = false;
        }
        (target, valid, residual)
    }
}

impl FlowEstimator for PyrLkFlow {
    fn track(
        &self,
        prev: &GrayImageView<'_>,
        curr: &GrayImageView<'_>,
        points: &[Point2<f32>],
        tracked: &mut Vec<Point2<f32>>,
        status: &mut Vec<bool>,
        errors: &mut Vec<f32>,
    ) {
        tracked.clear();
        status.clear();
        errors.clear();
        if points.is_empty() {
            return;
        }

        let prev_pyr = build_pyramid(prev, self.params.levels);
        let curr_pyr = build_pyramid(curr, self.params.levels);
        let depth = prev_pyr.depth().min(curr_pyr.depth());

        let n = self.params.window * self.params.window;
        let mut scratch = WindowScratch {
            grad_x: vec![0.0; n],
            grad_y: vec![0.0; n],
            template: vec![0.0; n],
        };

        tracked.reserve(points.len());
        status.reserve(points.len());
        errors.reserve(points.len());
        for &p in points {
            let (q, ok, err) = self.track_point(&prev_pyr, &curr_pyr, depth, p, &mut scratch);
            tracked.push(q);
            status.push(ok);
            errors.push(err);
        }
    }
}
