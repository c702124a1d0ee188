//! Shi-Tomasi corner selection.
//!
//! Scores pixels by the minimum eigenvalue of the local structure tensor,
//! then picks strong, well-spread points. Used both for seeding flow points
//! inside a target quad and for full-frame keypoint detection.

use log::debug;
use nalgebra::Point2;
use planar_track_core::{GrayImageView, PointSeeder, Quad};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SeedParams {
    /// Fraction of the strongest score a candidate must reach.
    pub quality_level: f32,
    /// Minimum spacing between accepted points, in pixels.
    pub min_distance: f32,
    /// Structure-tensor window radius; the window side is `2r + 1`.
    pub block_radius: i32,
}

impl Default for SeedParams {
    fn default() -> Self {
        Self {
            quality_level: 0.01,
            min_distance: 10.0,
            block_radius: 1,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ShiTomasiSeeder {
    params: SeedParams,
}

impl ShiTomasiSeeder {
    pub fn new(params: SeedParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &SeedParams {
        &self.params
    }
}

impl PointSeeder for ShiTomasiSeeder {
    fn seed_in_quad(
        &self,
        frame: &GrayImageView<'_>,
        region: &Quad,
        max_points: usize,
        out: &mut Vec<Point2<f32>>,
    ) {
        out.clear();
        if max_points == 0 {
            return;
        }

        let margin = (self.params.block_radius + 1) as f32;
        let (min, max) = region.bounding_box();
        let x0 = min.x.floor().max(margin) as usize;
        let y0 = min.y.floor().max(margin) as usize;
        let x1 = (max.x.ceil() as usize + 1).min(frame.width.saturating_sub(margin as usize));
        let y1 = (max.y.ceil() as usize + 1).min(frame.height.saturating_sub(margin as usize));
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let candidates = shi_tomasi_candidates(
            frame,
            (x0, y0, x1, y1),
            self.params.block_radius,
            |x, y| region.contains(Point2::new(x, y)),
        );
        let picked = select_spread(
            candidates,
            self.params.quality_level,
            self.params.min_distance,
            max_points,
        );
        if picked.is_empty() {
            debug!("seeding: no corners above the quality floor in region");
        }

        out.extend(picked.into_iter().map(|c| Point2::new(c.x, c.y)));
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CornerCandidate {
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

#[inline]
fn px(frame: &GrayImageView<'_>, x: i32, y: i32) -> f32 {
    frame.data[y as usize * frame.width + x as usize] as f32
}

/// Minimum-eigenvalue score for every pixel of a half-open rect, filtered
/// by `keep`. The caller must leave a `block_radius + 1` border so that the
/// central-difference gradients stay in bounds.
pub(crate) fn shi_tomasi_candidates(
    frame: &GrayImageView<'_>,
    rect: (usize, usize, usize, usize),
    block_radius: i32,
    mut keep: impl FnMut(f32, f32) -> bool,
) -> Vec<CornerCandidate> {
    let (x0, y0, x1, y1) = rect;
    let r = block_radius;
    let mut out = Vec::new();

    for y in y0..y1 {
        for x in x0..x1 {
            if !keep(x as f32, y as f32) {
                continue;
            }
            let mut sxx = 0.0_f32;
            let mut sxy = 0.0_f32;
            let mut syy = 0.0_f32;
            for dy in -r..=r {
                for dx in -r..=r {
                    let cx = x as i32 + dx;
                    let cy = y as i32 + dy;
                    let gx = (px(frame, cx + 1, cy) - px(frame, cx - 1, cy)) * 0.5;
                    let gy = (px(frame, cx, cy + 1) - px(frame, cx, cy - 1)) * 0.5;
                    sxx += gx * gx;
                    sxy += gx * gy;
                    syy += gy * gy;
                }
            }
            let score = 0.5 * ((sxx + syy) - ((sxx - syy).powi(2) + 4.0 * sxy * sxy).sqrt());
            if score > 0.0 {
                out.push(CornerCandidate {
                    x: x as f32,
                    y: y as f32,
                    score,
                });
            }
        }
    }
    out
}

/// Keeps candidates above `quality x strongest`, strongest first, enforcing
/// `min_distance` spacing, up to `max_points`.
pub(crate) fn select_spread(
    mut candidates: Vec<CornerCandidate>,
    quality: f32,
    min_distance: f32,
    max_points: usize,
) -> Vec<CornerCandidate> {
    let best = candidates
        .iter()
        .map(|c| c.score)
        .fold(0.0_f32, f32::max);
    if best <= 0.0 {
        return Vec::new();
    }
    let floor = best * quality.max(0.0);
    candidates.retain(|c| c.score >= floor);
    candidates.sort_unstable_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (a.y, a.x).partial_cmp(&(b.y, b.x)).unwrap_or(std::cmp::Ordering::Equal))
    });

    let min_dist_sq = min_distance * min_distance;
    let mut picked: Vec<CornerCandidate> = Vec::new();
    for c in candidates {
        if picked.len() >= max_points {
            break;
        }
        let clear = picked.iter().all(|p| {
            let dx = p.x - c.x;
            let dy = p.y - c.y;
            dx * dx + dy * dy >= min_dist_sq
        });
        if clear {
            picked.push(c);
        }
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use planar_track_core::GrayImage;

    /// Black frame with bright 2x2 blocks on a grid; block corners score high.
    fn dotted(width: usize, height: usize, spacing: usize) -> GrayImage {
        let mut img = GrayImage::new(width, height);
        for y in (spacing..height - spacing).step_by(spacing) {
            for x in (spacing..width - spacing).step_by(spacing) {
                for dy in 0..2 {
                    for dx in 0..2 {
                        img.data[(y + dy) * width + x + dx] = 230;
                    }
                }
            }
        }
        img
    }

    #[test]
    fn seeds_only_inside_region() {
        let img = dotted(160, 160, 16);
        let region = Quad::from_xy([[40.0, 40.0], [120.0, 40.0], [120.0, 120.0], [40.0, 120.0]]);
        let seeder = ShiTomasiSeeder::default();

        let mut pts = Vec::new();
        seeder.seed_in_quad(&img.view(), &region, 100, &mut pts);

        assert!(!pts.is_empty(), "expected seeds on textured region");
        for p in &pts {
            assert!(region.contains(*p), "{p:?} escaped the region");
        }
    }

    #[test]
    fn respects_cap_and_spacing() {
        let img = dotted(200, 200, 12);
        let region = Quad::from_xy([[10.0, 10.0], [190.0, 10.0], [190.0, 190.0], [10.0, 190.0]]);
        let seeder = ShiTomasiSeeder::new(SeedParams {
            min_distance: 9.0,
            ..SeedParams::default()
        });

        let mut pts = Vec::new();
        seeder.seed_in_quad(&img.view(), &region, 20, &mut pts);

        assert!(pts.len() <= 20);
        assert!(pts.len() >= 10, "got only {} seeds", pts.len());
        for (i, a) in pts.iter().enumerate() {
            for b in pts.iter().skip(i + 1) {
                let d = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
                assert!(d >= 9.0, "seeds {a:?} and {b:?} too close");
            }
        }
    }

    #[test]
    fn flat_region_yields_nothing() {
        let img = GrayImage::new(100, 100);
        let region = Quad::from_xy([[10.0, 10.0], [90.0, 10.0], [90.0, 90.0], [10.0, 90.0]]);
        let seeder = ShiTomasiSeeder::default();

        let mut pts = vec![Point2::new(1.0, 1.0)];
        seeder.seed_in_quad(&img.view(), &region, 50, &mut pts);
        assert!(pts.is_empty());
    }
}
