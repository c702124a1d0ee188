//! Reference backends for the `planar-track` pipeline.
//!
//! Everything here implements the contracts in `planar_track_core::backend`
//! with plain CPU code: a box-filter image pyramid, iterative pyramidal
//! Lucas-Kanade flow, Shi-Tomasi corner seeding, BRIEF-style binary
//! descriptors, and brute-force Hamming k-NN matching. The implementations
//! favour predictability over speed; a host with tuned kernels can swap any
//! of them out via the traits.

mod brief;
mod flow;
mod matcher;
mod pyramid;
mod seed;

pub use brief::{BriefExtractor, BriefParams};
pub use flow::{LkParams, PyrLkFlow};
pub use matcher::HammingMatcher;
pub use pyramid::{build_pyramid, Pyramid};
pub use seed::{SeedParams, ShiTomasiSeeder};
