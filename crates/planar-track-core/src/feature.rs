//! Keypoints and binary descriptor storage shared by the detection stage
//! and the backends.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// A detected image feature. `response` orders keypoints by strength when a
/// frame yields more than the configured cap.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub position: Point2<f32>,
    pub size: f32,
    pub angle: f32,
    pub response: f32,
    pub octave: i32,
}

impl Keypoint {
    pub fn at(x: f32, y: f32, response: f32) -> Self {
        Self {
            position: Point2::new(x, y),
            size: 7.0,
            angle: 0.0,
            response,
            octave: 0,
        }
    }
}

/// Row-major matrix of fixed-width binary descriptors, one row per feature.
///
/// `width` is the byte width of a single descriptor; `data.len()` is always
/// `len * width`. An empty set has whatever width it was created with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorSet {
    width: usize,
    data: Vec<u8>,
}

impl DescriptorSet {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            data: Vec::new(),
        }
    }

    pub fn with_capacity(width: usize, rows: usize) -> Self {
        Self {
            width,
            data: Vec::with_capacity(width * rows),
        }
    }

    /// Builds from a flat row-major buffer; `None` if the buffer length is
    /// not a multiple of `width`.
    pub fn from_raw(width: usize, data: Vec<u8>) -> Option<Self> {
        if width == 0 || !data.len().is_multiple_of(width) {
            return None;
        }
        Some(Self { width, data })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn len(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.data.len() / self.width
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[u8] {
        &self.data[i * self.width..(i + 1) * self.width]
    }

    pub fn push_row(&mut self, row: &[u8]) {
        debug_assert_eq!(row.len(), self.width);
        self.data.extend_from_slice(row);
    }

    /// Drops all rows, optionally switching the descriptor width, without
    /// releasing the backing allocation.
    pub fn reset(&mut self, width: usize) {
        self.width = width;
        self.data.clear();
    }

    #[inline]
    pub fn capacity_bytes(&self) -> usize {
        self.data.capacity()
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.width.max(1))
    }

    /// Copies the selected rows into a new set, preserving order.
    pub fn select(&self, indices: &[usize]) -> DescriptorSet {
        let mut out = DescriptorSet::with_capacity(self.width, indices.len());
        for &i in indices {
            out.push_row(self.row(i));
        }
        out
    }
}

/// One k-NN hit: `train_idx` is the matched row in the train set.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DescriptorMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}
