//! Brute-force Hamming k-NN over binary descriptor sets.

use planar_track_core::{DescriptorMatch, DescriptorSet, KnnMatcher};

/// Exhaustive matcher for binary descriptors; distance is the popcount of
/// the byte-wise XOR. Exact, and fast enough for the few hundred features a
/// frame produces.
#[derive(Clone, Copy, Debug, Default)]
pub struct HammingMatcher;

#[inline]
fn hamming(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

impl KnnMatcher for HammingMatcher {
    fn knn(
        &self,
        query: &DescriptorSet,
        train: &DescriptorSet,
        k: usize,
    ) -> Vec<Vec<DescriptorMatch>> {
        if k == 0
            || query.is_empty()
            || train.is_empty()
            || query.width() != train.width()
        {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(query.len());
        let mut best: Vec<DescriptorMatch> = Vec::with_capacity(k + 1);
        for (qi, q) in query.iter_rows().enumerate() {
            best.clear();
            for (ti, t) in train.iter_rows().enumerate() {
                let d = hamming(q, t) as f32;
                if best.len() == k && d >= best[k - 1].distance {
                    continue;
                }
                let at = best.partition_point(|m| m.distance <= d);
                best.insert(
                    at,
                    DescriptorMatch {
                        query_idx: qi,
                        train_idx: ti,
                        distance: d,
                    },
                );
                best.truncate(k);
            }
            out.push(best.clone());
        }
        out
    }
}
