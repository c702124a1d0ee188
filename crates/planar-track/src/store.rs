//! Target database and candidate selection.

use std::collections::BTreeMap;

use log::debug;
use nalgebra::Point2;
use planar_track_core::{DescriptorSet, Keypoint, Quad};
use thiserror::Error;

use crate::config::StoreParams;

/// One registered planar target. Owned exclusively by [`TargetStore`];
/// re-ingesting an id replaces the whole value.
#[derive(Clone, Debug)]
pub struct Target {
    pub id: String,
    pub descriptors: DescriptorSet,
    /// Reference positions, one per descriptor row. Targets without
    /// keypoints cannot be matched by the detection stage; they can still
    /// be tracked once their corners are seeded externally.
    pub keypoints: Option<Vec<Keypoint>>,
    /// Reference corners in a consistent winding.
    pub corners: Quad,
    /// Opaque bytes a [`CandidateFilter`] may interpret; never touched by
    /// the pipeline itself.
    pub signature: Option<Vec<u8>>,
}

/// Why target ingestion was refused. Nothing is written on failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddTargetError {
    #[error("target `{0}` has an empty descriptor set")]
    EmptyDescriptors(String),
    #[error("target `{id}` supplies {keypoints} keypoints for {descriptors} descriptors")]
    KeypointCountMismatch {
        id: String,
        keypoints: usize,
        descriptors: usize,
    },
    #[error("target `{id}` supplies {got} corners, expected exactly 4")]
    BadCornerCount { id: String, got: usize },
}

/// Ranks stored targets by plausibility for the current frame before the
/// expensive per-target matching runs.
///
/// Implementations see the frame's descriptor set and the whole database
/// and return at most `limit` ids, most plausible first. Returning every id
/// is a valid trivial implementation.
pub trait CandidateFilter: Send {
    fn rank(
        &self,
        frame_descriptors: &DescriptorSet,
        targets: &BTreeMap<String, Target>,
        limit: usize,
    ) -> Vec<String>;
}

/// Placeholder similarity: targets whose descriptor count is close to the
/// frame's rank higher. Stands in for a real vocabulary index; the
/// signature bytes on [`Target`] are where such an index would live.
#[derive(Clone, Copy, Debug, Default)]
pub struct DescriptorCountFilter;

impl CandidateFilter for DescriptorCountFilter {
    fn rank(
        &self,
        frame_descriptors: &DescriptorSet,
        targets: &BTreeMap<String, Target>,
        limit: usize,
    ) -> Vec<String> {
        let n = frame_descriptors.len() as f32;
        let mut scored: Vec<(f32, &String)> = targets
            .iter()
            .map(|(id, target)| {
                let gap = (n - target.descriptors.len() as f32).abs();
                (1.0 / (1.0 + gap / 100.0), id)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.truncate(limit);
        scored.into_iter().map(|(_, id)| id.clone()).collect()
    }
}

/// Trivial filter: every stored id in database order, capped at `limit`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllCandidates;

impl CandidateFilter for AllCandidates {
    fn rank(
        &self,
        _frame_descriptors: &DescriptorSet,
        targets: &BTreeMap<String, Target>,
        limit: usize,
    ) -> Vec<String> {
        targets.keys().take(limit).cloned().collect()
    }
}

/// Owns the target database. Iteration order is the id order, so candidate
/// lists and batch retrieval are reproducible.
pub struct TargetStore {
    params: StoreParams,
    targets: BTreeMap<String, Target>,
    filter: Box<dyn CandidateFilter>,
}

impl TargetStore {
    pub fn new(params: StoreParams) -> Self {
        Self {
            params,
            targets: BTreeMap::new(),
            filter: Box::new(DescriptorCountFilter),
        }
    }

    /// Swaps the candidate filter; takes effect on the next query.
    pub fn set_filter(&mut self, filter: Box<dyn CandidateFilter>) {
        self.filter = filter;
    }

    #[inline]
    pub fn params(&self) -> &StoreParams {
        &self.params
    }

    /// Registers or wholesale-replaces a target.
    pub fn add_target(
        &mut self,
        id: impl Into<String>,
        descriptors: DescriptorSet,
        keypoints: Option<Vec<Keypoint>>,
        corners: &[Point2<f32>],
        signature: Option<Vec<u8>>,
    ) -> Result<(), AddTargetError> {
        let id = id.into();
        if descriptors.is_empty() {
            return Err(AddTargetError::EmptyDescriptors(id));
        }
        if let Some(kps) = &keypoints {
            if kps.len() != descriptors.len() {
                return Err(AddTargetError::KeypointCountMismatch {
                    keypoints: kps.len(),
                    descriptors: descriptors.len(),
                    id,
                });
            }
        }
        let Some(corners) = Quad::from_slice(corners) else {
            return Err(AddTargetError::BadCornerCount {
                got: corners.len(),
                id,
            });
        };

        debug!(
            "target `{id}` registered: {} descriptors x {} bytes",
            descriptors.len(),
            descriptors.width()
        );
        self.targets.insert(
            id.clone(),
            Target {
                id,
                descriptors,
                keypoints,
                corners,
                signature,
            },
        );
        Ok(())
    }

    /// True when a target with this id was present.
    pub fn remove(&mut self, id: &str) -> bool {
        self.targets.remove(id).is_some()
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[inline]
    pub fn has_target(&self, id: &str) -> bool {
        self.targets.contains_key(id)
    }

    #[inline]
    pub fn target(&self, id: &str) -> Option<&Target> {
        self.targets.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// Candidate ids for this frame, most plausible first. Small databases
    /// and disabled filtering return everything.
    pub fn candidates(&self, frame_descriptors: &DescriptorSet) -> Vec<String> {
        if !self.params.enable_filter || self.targets.len() <= self.params.filter_min_targets {
            return self.targets.keys().cloned().collect();
        }
        let ranked = self
            .filter
            .rank(frame_descriptors, &self.targets, self.params.max_candidates);
        debug!(
            "candidate filter kept {} of {} targets",
            ranked.len(),
            self.targets.len()
        );
        ranked
    }

    /// Resolves ids to targets, silently skipping unknown ids.
    pub fn batch(&self, ids: &[String]) -> Vec<&Target> {
        ids.iter().filter_map(|id| self.targets.get(id)).collect()
    }
}
