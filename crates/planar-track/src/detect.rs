//! Detection stage: extract frame features, match each candidate target,
//! fit and validate a homography, score the result.
//!
//! Every candidate is processed independently; one failing candidate never
//! affects the rest of the batch. All rejection paths abandon the candidate
//! for this frame only.

use log::debug;
use nalgebra::Point2;
use planar_track_core::{
    ransac_homography, DescriptorSet, FeatureExtractor, GrayImageView, Keypoint, KnnMatcher, Quad,
    RansacParams,
};

use crate::config::{EngineConfig, MatcherParams};
use crate::pool::BufferPool;
use crate::result::{TrackSource, TrackingResult};
use crate::store::{Target, TargetStore};

/// Inlier floor for `detected = true`, independent of the configured
/// per-candidate minimum.
const DETECTION_FLOOR: usize = 10;

/// Transformed quads with any edge shorter than this are degenerate.
const MIN_EDGE_PX: f32 = 5.0;

/// Corners may sit this far outside the frame before the out-of-bounds
/// confidence penalty applies.
const FRAME_EDGE_MARGIN: f32 = 10.0;

/// Aspect ratios beyond this are penalized.
const MAX_ASPECT: f32 = 5.0;

/// Quad-area fraction of the frame considered plausible.
const AREA_FRACTION: std::ops::RangeInclusive<f32> = 0.001..=0.9;

pub struct FeatureMatcher {
    params: MatcherParams,
    extractor: Box<dyn FeatureExtractor>,
    matcher: Box<dyn KnnMatcher>,
}

impl FeatureMatcher {
    pub fn new(
        params: MatcherParams,
        extractor: Box<dyn FeatureExtractor>,
        matcher: Box<dyn KnnMatcher>,
    ) -> Self {
        Self {
            params,
            extractor,
            matcher,
        }
    }

    #[inline]
    pub fn params(&self) -> &MatcherParams {
        &self.params
    }

    /// Runs the full detection batch for one frame. Results are sorted by
    /// descending confidence (id as tiebreak) and truncated to the store's
    /// candidate cap.
    pub fn detect(
        &self,
        frame: &GrayImageView<'_>,
        store: &TargetStore,
        config: &EngineConfig,
        pool: &BufferPool,
    ) -> Vec<TrackingResult> {
        let mut descriptors =
            pool.acquire_descriptors(self.extractor.descriptor_width(), config.max_features);
        let mut keypoints = self
            .extractor
            .extract(frame, config.max_features, &mut descriptors);
        cap_by_response(&mut keypoints, &mut descriptors, config.max_features);
        if keypoints.is_empty() {
            debug!("detection: frame yielded no features");
            return Vec::new();
        }

        let candidate_ids = store.candidates(&descriptors);
        if candidate_ids.is_empty() {
            return Vec::new();
        }

        let mut src = pool.acquire_points();
        let mut dst = pool.acquire_points();
        let mut results = Vec::new();
        for target in store.batch(&candidate_ids) {
            if let Some(result) = self.match_candidate(
                target,
                &keypoints,
                &descriptors,
                (frame.width, frame.height),
                config,
                &mut src,
                &mut dst,
            ) {
                results.push(result);
            }
        }
        debug!(
            "detection: {} of {} candidates accepted",
            results.len(),
            candidate_ids.len()
        );

        results.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(store.params().max_candidates);
        results
    }

    #[allow(clippy::too_many_arguments)]
    fn match_candidate(
        &self,
        target: &Target,
        frame_keypoints: &[Keypoint],
        frame_descriptors: &DescriptorSet,
        frame_size: (usize, usize),
        config: &EngineConfig,
        src: &mut Vec<Point2<f32>>,
        dst: &mut Vec<Point2<f32>>,
    ) -> Option<TrackingResult> {
        let matches = self
            .matcher
            .knn(&target.descriptors, frame_descriptors, 2);
        if matches.is_empty() {
            return None;
        }
        let reference = target.keypoints.as_deref().unwrap_or(&[]);

        src.clear();
        dst.clear();
        for pair in &matches {
            let [best, second] = pair.as_slice() else {
                continue; // ambiguity is undecidable without a runner-up
            };
            if best.distance >= config.match_ratio_threshold * second.distance {
                continue;
            }
            // discard rather than fabricate when an index is out of range
            let Some(kp) = reference.get(best.query_idx) else {
                continue;
            };
            let Some(fp) = frame_keypoints.get(best.train_idx) else {
                continue;
            };
            src.push(kp.position);
            dst.push(fp.position);
        }

        let total = src.len();
        if total < self.params.min_inliers {
            return None;
        }

        let ransac = RansacParams {
            iterations: config.ransac_iterations,
            threshold: config.ransac_threshold,
            seed: self.params.ransac_seed,
        };
        let fit = ransac_homography(src, dst, &ransac)?;
        if fit.homography.is_degenerate() {
            return None;
        }

        let quad = target.corners.transform(&fit.homography);
        if !quad.is_finite() || !quad.is_convex() || quad.min_edge() < MIN_EDGE_PX {
            return None;
        }
        if fit.inlier_count < self.params.min_inliers {
            return None;
        }

        Some(TrackingResult {
            id: target.id.clone(),
            detected: fit.inlier_count >= DETECTION_FLOOR,
            corners: quad,
            confidence: detection_confidence(fit.inlier_count, total, &quad, frame_size),
            source: TrackSource::Detection,
        })
    }
}

/// Retains the `cap` strongest keypoints, moving the matching descriptor
/// rows with them so pairing survives truncation.
fn cap_by_response(keypoints: &mut Vec<Keypoint>, descriptors: &mut DescriptorSet, cap: usize) {
    if keypoints.len() <= cap {
        return;
    }
    let mut order: Vec<usize> = (0..keypoints.len()).collect();
    order.sort_by(|&a, &b| keypoints[b].response.total_cmp(&keypoints[a].response));
    order.truncate(cap);
    *descriptors = descriptors.select(&order);
    *keypoints = order.iter().map(|&i| keypoints[i]).collect();
}

/// Fused confidence: a match score from inlier counts, damped by geometry
/// penalties for implausible quads. Stays in [0, 1] by construction.
fn detection_confidence(
    inliers: usize,
    total: usize,
    quad: &Quad,
    (width, height): (usize, usize),
) -> f32 {
    let inlier_score = (inliers as f32 / 50.0).min(1.0);
    let ratio_score = if total == 0 {
        0.0
    } else {
        inliers as f32 / total as f32
    };
    let match_score = 0.7 * inlier_score + 0.3 * ratio_score;

    let mut penalty = 1.0;
    if !quad.within_bounds(width as f32, height as f32, FRAME_EDGE_MARGIN) {
        penalty *= 0.7;
    }
    if quad.aspect_ratio() > MAX_ASPECT {
        penalty *= 0.6;
    }
    let area_fraction = quad.area() / (width as f32 * height as f32);
    if !AREA_FRACTION.contains(&area_fraction) {
        penalty *= 0.7;
    }
    match_score * penalty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolParams, StoreParams};
    use approx::assert_relative_eq;
    use planar_track_core::DescriptorMatch;

    struct StubExtractor {
        keypoints: Vec<Keypoint>,
        descriptors: DescriptorSet,
    }

    impl FeatureExtractor for StubExtractor {
        fn descriptor_width(&self) -> usize {
            self.descriptors.width()
        }

        fn extract(
            &self,
            _frame: &GrayImageView<'_>,
            max_features: usize,
            descriptors: &mut DescriptorSet,
        ) -> Vec<Keypoint> {
            descriptors.reset(self.descriptors.width());
            let n = self.keypoints.len().min(max_features);
            for i in 0..n {
                descriptors.push_row(self.descriptors.row(i));
            }
            self.keypoints[..n].to_vec()
        }
    }

    struct TestMatcher;

    impl KnnMatcher for TestMatcher {
        fn knn(
            &self,
            query: &DescriptorSet,
            train: &DescriptorSet,
            k: usize,
        ) -> Vec<Vec<DescriptorMatch>> {
            if query.is_empty() || train.is_empty() || query.width() != train.width() {
                return Vec::new();
            }
            query
                .iter_rows()
                .enumerate()
                .map(|(qi, q)| {
                    let mut hits: Vec<DescriptorMatch> = train
                        .iter_rows()
                        .enumerate()
                        .map(|(ti, t)| DescriptorMatch {
                            query_idx: qi,
                            train_idx: ti,
                            distance: q
                                .iter()
                                .zip(t)
                                .map(|(a, b)| (a ^ b).count_ones())
                                .sum::<u32>() as f32,
                        })
                        .collect();
                    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
                    hits.truncate(k);
                    hits
                })
                .collect()
        }
    }

    fn indexed_descriptors(rows: usize) -> DescriptorSet {
        let mut set = DescriptorSet::new(8);
        for i in 0..rows {
            set.push_row(&[i as u8; 8]);
        }
        set
    }

    fn grid_keypoints(n: usize, shift: (f32, f32)) -> Vec<Keypoint> {
        (0..n)
            .map(|i| {
                let x = (i % 6) as f32 * 36.0 + shift.0;
                let y = (i / 6) as f32 * 30.0 + shift.1;
                Keypoint::at(x, y, 1.0)
            })
            .collect()
    }

    fn frame() -> GrayImageView<'static> {
        GrayImageView {
            width: 640,
            height: 480,
            data: &[],
        }
    }

    fn matcher_with(
        params: MatcherParams,
        keypoints: Vec<Keypoint>,
        descriptors: DescriptorSet,
    ) -> FeatureMatcher {
        FeatureMatcher::new(
            params,
            Box::new(StubExtractor {
                keypoints,
                descriptors,
            }),
            Box::new(TestMatcher),
        )
    }

    fn target_store(counts: &[(&str, usize)]) -> TargetStore {
        target_store_with(StoreParams::default(), counts)
    }

    fn target_store_with(params: StoreParams, counts: &[(&str, usize)]) -> TargetStore {
        let mut store = TargetStore::new(params);
        for &(id, n) in counts {
            let corners = [
                Point2::new(0.0, 0.0),
                Point2::new(200.0, 0.0),
                Point2::new(200.0, 160.0),
                Point2::new(0.0, 160.0),
            ];
            store
                .add_target(
                    id,
                    indexed_descriptors(n),
                    Some(grid_keypoints(n, (0.0, 0.0))),
                    &corners,
                    None,
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        let quads = [
            Quad::from_xy([[100.0, 100.0], [300.0, 100.0], [300.0, 300.0], [100.0, 300.0]]),
            Quad::from_xy([[-80.0, 0.0], [120.0, 0.0], [120.0, 200.0], [-80.0, 200.0]]),
            Quad::from_xy([[0.0, 0.0], [300.0, 0.0], [300.0, 30.0], [0.0, 30.0]]),
            Quad::from_xy([[0.0, 0.0], [8.0, 0.0], [8.0, 8.0], [0.0, 8.0]]),
        ];
        for &inliers in &[0usize, 10, 50, 200] {
            for &total in &[1usize, 10, 50, 200, 400] {
                if inliers > total {
                    continue;
                }
                for quad in &quads {
                    let c = detection_confidence(inliers, total, quad, (640, 480));
                    assert!((0.0..=1.0).contains(&c), "confidence {c} out of range");
                }
            }
        }
    }

    #[test]
    fn geometry_penalties_compound() {
        let size = (640, 480);
        // 50 inliers of 50 pairs: match score is exactly 1
        let good = Quad::from_xy([[100.0, 100.0], [300.0, 100.0], [300.0, 300.0], [100.0, 300.0]]);
        assert_relative_eq!(detection_confidence(50, 50, &good, size), 1.0);

        let outside =
            Quad::from_xy([[-50.0, 100.0], [150.0, 100.0], [150.0, 300.0], [-50.0, 300.0]]);
        assert_relative_eq!(detection_confidence(50, 50, &outside, size), 0.7);

        let thin = Quad::from_xy([[100.0, 100.0], [400.0, 100.0], [400.0, 130.0], [100.0, 130.0]]);
        assert_relative_eq!(detection_confidence(50, 50, &thin, size), 0.6);

        let tiny = Quad::from_xy([[100.0, 100.0], [110.0, 100.0], [110.0, 110.0], [100.0, 110.0]]);
        assert_relative_eq!(detection_confidence(50, 50, &tiny, size), 0.7);

        let thin_outside =
            Quad::from_xy([[-50.0, 100.0], [250.0, 100.0], [250.0, 130.0], [-50.0, 130.0]]);
        assert_relative_eq!(
            detection_confidence(50, 50, &thin_outside, size),
            0.7 * 0.6
        );
    }

    #[test]
    fn response_cap_keeps_keypoint_descriptor_pairing() {
        let mut keypoints: Vec<Keypoint> = [5.0f32, 1.0, 4.0, 2.0, 3.0]
            .iter()
            .enumerate()
            .map(|(i, &r)| Keypoint::at(i as f32, 0.0, r))
            .collect();
        let mut descriptors = indexed_descriptors(5);

        cap_by_response(&mut keypoints, &mut descriptors, 3);

        assert_eq!(keypoints.len(), 3);
        assert_eq!(descriptors.len(), 3);
        // strongest first: original indices 0, 2, 4
        assert_eq!(keypoints[0].position.x, 0.0);
        assert_eq!(keypoints[1].position.x, 2.0);
        assert_eq!(keypoints[2].position.x, 4.0);
        assert_eq!(descriptors.row(0), &[0u8; 8]);
        assert_eq!(descriptors.row(1), &[2u8; 8]);
        assert_eq!(descriptors.row(2), &[4u8; 8]);
    }

    #[test]
    fn clean_translation_is_detected() {
        let store = target_store(&[("poster", 30)]);
        let matcher = matcher_with(
            MatcherParams::default(),
            grid_keypoints(30, (10.0, 5.0)),
            indexed_descriptors(30),
        );
        let pool = BufferPool::new(PoolParams::default());

        let results = matcher.detect(&frame(), &store, &EngineConfig::default(), &pool);

        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.id, "poster");
        assert!(r.detected);
        assert_eq!(r.source, TrackSource::Detection);
        // 30 inliers of 30: 0.7 * 30/50 + 0.3, no geometry penalty
        assert_relative_eq!(r.confidence, 0.72, epsilon = 1e-4);
        assert_relative_eq!(r.corners.corners[0].x, 10.0, epsilon = 0.1);
        assert_relative_eq!(r.corners.corners[0].y, 5.0, epsilon = 0.1);
        assert_relative_eq!(r.corners.corners[2].x, 210.0, epsilon = 0.1);
        assert_relative_eq!(r.corners.corners[2].y, 165.0, epsilon = 0.1);
    }

    /// Seven points in general position (no three collinear).
    fn sparse_points(shift: (f32, f32)) -> Vec<Keypoint> {
        [
            (0.0, 0.0),
            (60.0, 0.0),
            (0.0, 60.0),
            (60.0, 60.0),
            (120.0, 30.0),
            (30.0, 120.0),
            (90.0, 75.0),
        ]
        .iter()
        .map(|&(x, y)| Keypoint::at(x + shift.0, y + shift.1, 1.0))
        .collect()
    }

    #[test]
    fn inliers_below_floor_report_undetected() {
        let mut store = TargetStore::new(StoreParams::default());
        let corners = [
            Point2::new(0.0, 0.0),
            Point2::new(200.0, 0.0),
            Point2::new(200.0, 160.0),
            Point2::new(0.0, 160.0),
        ];
        store
            .add_target(
                "poster",
                indexed_descriptors(7),
                Some(sparse_points((0.0, 0.0))),
                &corners,
                None,
            )
            .unwrap();
        let matcher = matcher_with(
            MatcherParams {
                min_inliers: 5,
                ..MatcherParams::default()
            },
            sparse_points((3.0, 4.0)),
            indexed_descriptors(7),
        );
        let pool = BufferPool::new(PoolParams::default());

        let results = matcher.detect(&frame(), &store, &EngineConfig::default(), &pool);

        assert_eq!(results.len(), 1);
        assert!(!results[0].detected, "7 inliers is below the fixed floor");
        assert!(results[0].confidence > 0.0);
    }

    #[test]
    fn ambiguous_matches_fail_the_ratio_test() {
        let store = target_store(&[("poster", 20)]);
        // every target row appears twice in the frame, so best == second
        let mut doubled = DescriptorSet::new(8);
        let mut positions = Vec::new();
        for i in 0..20u8 {
            doubled.push_row(&[i; 8]);
            doubled.push_row(&[i; 8]);
            positions.push(Keypoint::at(i as f32 * 10.0, 0.0, 1.0));
            positions.push(Keypoint::at(i as f32 * 10.0, 50.0, 1.0));
        }
        let matcher = matcher_with(MatcherParams::default(), positions, doubled);
        let pool = BufferPool::new(PoolParams::default());

        let results = matcher.detect(&frame(), &store, &EngineConfig::default(), &pool);
        assert!(results.is_empty());
    }

    #[test]
    fn results_sort_by_confidence_and_truncate() {
        let config = EngineConfig::default();
        let matcher = matcher_with(
            MatcherParams::default(),
            grid_keypoints(30, (10.0, 5.0)),
            indexed_descriptors(30),
        );
        let pool = BufferPool::new(PoolParams::default());

        let store = target_store(&[("a", 30), ("b", 30), ("c", 30)]);
        let results = matcher.detect(&frame(), &store, &config, &pool);
        assert_eq!(results.len(), 3, "small database matches every target");
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"], "equal confidence breaks by id");

        let capped = target_store_with(
            StoreParams {
                max_candidates: 2,
                ..StoreParams::default()
            },
            &[("a", 30), ("b", 30), ("c", 30)],
        );
        let results = matcher.detect(&frame(), &capped, &config, &pool);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "b");
    }
}
