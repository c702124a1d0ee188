//! Half-resolution image pyramids for coarse-to-fine flow.

use log::debug;
use planar_track_core::{GrayImage, GrayImageView};

/// Level 0 is full resolution; each level halves both dimensions.
#[derive(Clone, Debug)]
pub struct Pyramid {
    pub levels: Vec<GrayImage>,
}

impl Pyramid {
    #[inline]
    pub fn level(&self, i: usize) -> GrayImageView<'_> {
        self.levels[i].view()
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// Smallest dimension a pyramid level may have; coarser levels are dropped.
const MIN_LEVEL_DIM: usize = 32;

/// Builds up to `max_levels` levels by 2x2 box downsampling.
pub fn build_pyramid(base: &GrayImageView<'_>, max_levels: usize) -> Pyramid {
    let mut levels = Vec::with_capacity(max_levels.max(1));
    levels.push(GrayImage {
        width: base.width,
        height: base.height,
        data: base.data.to_vec(),
    });

    while levels.len() < max_levels.max(1) {
        let prev = levels.last().map(|l| l.view());
        let Some(prev) = prev else { break };
        let w = prev.width / 2;
        let h = prev.height / 2;
        if w < MIN_LEVEL_DIM || h < MIN_LEVEL_DIM {
            break;
        }
        levels.push(downsample(&prev, w, h));
    }
    if levels.len() < max_levels.max(1) {
        debug!(
            "pyramid: stopped at {} of {} levels for {}x{} frame",
            levels.len(),
            max_levels,
            base.width,
            base.height
        );
    }

    Pyramid { levels }
}

fn downsample(src: &GrayImageView<'_>, w: usize, h: usize) -> GrayImage {
    let mut data = vec![0u8; w * h];
    for y in 0..h {
        let r0 = 2 * y * src.width;
        let r1 = r0 + src.width;
        for x in 0..w {
            let c = 2 * x;
            let sum = src.data[r0 + c] as u16
                + src.data[r0 + c + 1] as u16
                + src.data[r1 + c] as u16
                + src.data[r1 + c + 1] as u16;
            data[y * w + x] = (sum / 4) as u8;
        }
    }
    GrayImage {
        width: w,
        height: h,
        data,
    }
}
