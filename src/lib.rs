//! A disk-resident spatial index over multi-dimensional point data that
//! answers range-restricted uniform random sampling queries in work
//! proportional to `k + log N` rather than to `|Q ∩ data|` (spec §1). It
//! also answers ordinary range reports, size estimation, insertion, and
//! deletion.
//!
//! [`tree::SamplingRTree`] is the top-level handle. The Hilbert-curve
//! linearization and the bulk-build sort are treated as external
//! collaborators ([`hilbert::HilbertComputer`], [`build::ExternalSort`]);
//! callers embedding this index in a larger system are expected to supply
//! real implementations of both.

pub mod block;
pub mod build;
pub mod config;
pub mod cursor;
pub mod error;
pub mod geometry;
pub mod hilbert;
pub mod node;
pub mod ops;
pub mod residency;
pub mod sample;
pub mod serialization;
pub mod stats;
pub mod tree;

pub use config::Config;
pub use error::{Error, Result};
pub use geometry::{BBox, Point, PointId};
pub use hilbert::{DefaultHilbertComputer, HilbertComputer, Key};
pub use stats::Stats;
pub use tree::SamplingRTree;
