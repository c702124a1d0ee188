//! Four-corner quadrilaterals in pixel space.
//!
//! Corner order is preserved from ingestion (consistent winding, e.g.
//! clockwise starting top-left); all geometric predicates the pipeline
//! validates transformed quads with live here.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::Homography;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub corners: [Point2<f32>; 4],
}

impl Quad {
    pub fn new(corners: [Point2<f32>; 4]) -> Self {
        Self { corners }
    }

    /// Builds a quad from a corner slice; `None` unless exactly 4 points.
    pub fn from_slice(corners: &[Point2<f32>]) -> Option<Self> {
        let corners: [Point2<f32>; 4] = corners.try_into().ok()?;
        Some(Self { corners })
    }

    pub fn from_xy(xy: [[f32; 2]; 4]) -> Self {
        Self {
            corners: xy.map(|[x, y]| Point2::new(x, y)),
        }
    }

    #[inline]
    pub fn center(&self) -> Point2<f32> {
        let mut cx = 0.0;
        let mut cy = 0.0;
        for c in &self.corners {
            cx += c.x;
            cy += c.y;
        }
        Point2::new(cx / 4.0, cy / 4.0)
    }

    /// Edge vectors cycle c0→c1→c2→c3→c0.
    fn edges(&self) -> [(f32, f32); 4] {
        let c = &self.corners;
        [
            (c[1].x - c[0].x, c[1].y - c[0].y),
            (c[2].x - c[1].x, c[2].y - c[1].y),
            (c[3].x - c[2].x, c[3].y - c[2].y),
            (c[0].x - c[3].x, c[0].y - c[3].y),
        ]
    }

    /// Consistent winding: the cross products of all four consecutive edge
    /// pairs share a strict sign. Degenerate (zero-cross) quads fail.
    pub fn is_convex(&self) -> bool {
        let e = self.edges();
        let mut sign = 0.0_f32;
        for i in 0..4 {
            let (ax, ay) = e[i];
            let (bx, by) = e[(i + 1) % 4];
            let cross = ax * by - ay * bx;
            if cross == 0.0 {
                return false;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    pub fn edge_lengths(&self) -> [f32; 4] {
        self.edges().map(|(dx, dy)| (dx * dx + dy * dy).sqrt())
    }

    pub fn min_edge(&self) -> f32 {
        self.edge_lengths().into_iter().fold(f32::INFINITY, f32::min)
    }

    /// Width along the c0→c1 edge, matching the ingestion winding.
    #[inline]
    pub fn width(&self) -> f32 {
        let c = &self.corners;
        ((c[1].x - c[0].x).powi(2) + (c[1].y - c[0].y).powi(2)).sqrt()
    }

    /// Height along the c0→c3 edge.
    #[inline]
    pub fn height(&self) -> f32 {
        let c = &self.corners;
        ((c[3].x - c[0].x).powi(2) + (c[3].y - c[0].y).powi(2)).sqrt()
    }

    /// Shoelace area; winding-independent.
    pub fn area(&self) -> f32 {
        let c = &self.corners;
        let mut twice = 0.0;
        for i in 0..4 {
            let j = (i + 1) % 4;
            twice += c[i].x * c[j].y - c[j].x * c[i].y;
        }
        (twice * 0.5).abs()
    }

    /// Longer side over shorter side; infinite for a collapsed quad.
    pub fn aspect_ratio(&self) -> f32 {
        let w = self.width();
        let h = self.height();
        let (long, short) = if w > h { (w, h) } else { (h, w) };
        if short <= f32::EPSILON {
            f32::INFINITY
        } else {
            long / short
        }
    }

    pub fn bounding_box(&self) -> (Point2<f32>, Point2<f32>) {
        let mut min = Point2::new(f32::INFINITY, f32::INFINITY);
        let mut max = Point2::new(f32::NEG_INFINITY, f32::NEG_INFINITY);
        for c in &self.corners {
            min.x = min.x.min(c.x);
            min.y = min.y.min(c.y);
            max.x = max.x.max(c.x);
            max.y = max.y.max(c.y);
        }
        (min, max)
    }

    /// Ray-cast point-in-polygon test; winding-independent.
    pub fn contains(&self, p: Point2<f32>) -> bool {
        let c = &self.corners;
        let mut inside = false;
        let mut j = 3;
        for i in 0..4 {
            let (pi, pj) = (c[i], c[j]);
            if (pi.y > p.y) != (pj.y > p.y)
                && p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// True when every corner lies within the frame extended by `margin`.
    pub fn within_bounds(&self, width: f32, height: f32, margin: f32) -> bool {
        self.corners.iter().all(|c| {
            c.x >= -margin && c.x <= width + margin && c.y >= -margin && c.y <= height + margin
        })
    }

    pub fn is_finite(&self) -> bool {
        self.corners
            .iter()
            .all(|c| c.x.is_finite() && c.y.is_finite())
    }

    /// Maps every corner through `h`.
    pub fn transform(&self, h: &Homography) -> Quad {
        Quad {
            corners: self.corners.map(|c| h.apply(c)),
        }
    }
}
