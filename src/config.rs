//! Tunable parameters for a sampling R-tree instance.
//!
//! These are recorded once at build/open time; most are persisted into the
//! `.iolayers` sidecar (see [crate::build::io_layer::IoLayersParameters]) so
//! that reopening an index uses the values it was built with rather than
//! whatever the caller happens to pass.

/// Number of spatial dimensions and Hilbert-key word count are carried as
/// plain runtime fields rather than const generics: a single build of this
/// crate then serves indexes over points of any dimensionality, at the cost
/// of storing the dimension once per index rather than encoding it in the
/// type. Fixed-width serialization (spec C2) is still fixed *per index*,
/// which is all the on-disk format requires.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// Number of coordinates per point.
    pub dim: usize,
    /// Number of `u32` words in a Hilbert key.
    pub hilbert_words: usize,
    /// Size in bytes of a block managed by the block manager.
    pub block_size: usize,
    /// Fraction of a block's capacity leaves are packed to at build time.
    pub fill_ratio: f64,
    /// Maximum in-memory internal/leaf fan-out. Minimum is a quarter of this.
    pub f_mem_max: usize,
    /// Minimum IO-node fan-out.
    pub f_io_min: usize,
    /// Maximum IO-node fan-out (also the per-block children cap).
    pub f_io_max: usize,
    /// Target sample-buffer size for in-memory nodes.
    pub mem_sample_size: usize,
    /// Build stops packing higher IO layers once the top layer is at most
    /// this many entries; the remainder becomes in-memory layers.
    pub max_top_layer_io_node_count: usize,
    /// Capacity of a mem-leaf's insertion buffer before it must flush.
    pub insertion_buffer_capacity: usize,
}

impl Config {
    /// Minimum in-memory fan-out, derived from [`Config::f_mem_max`].
    pub fn f_mem_min(&self) -> usize {
        (self.f_mem_max / 4).max(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dim: 3,
            hilbert_words: 2,
            block_size: 8192,
            fill_ratio: 0.7,
            f_mem_max: 16,
            f_io_min: 4,
            f_io_max: 16,
            mem_sample_size: 64,
            max_top_layer_io_node_count: 64,
            insertion_buffer_capacity: 64,
        }
    }
}
