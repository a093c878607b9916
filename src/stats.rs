//! Aggregate statistics surfaced by a tree instance: block-manager I/O
//! counters (spec §4.1) and the bulk-build timings recorded by the
//! IO-layer builder (spec §4.4).

use crate::block::BlockManagerStats;
use crate::build::BuildStats;

#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub blocks: BlockManagerStats,
    pub build: BuildStats,
}
