//! Sample-buffer construction (spec C6) and the binomial primitives it is
//! built from (spec §9 "Binomial splitting").

pub mod binomial;
pub mod builder;

pub use binomial::{sample_binomial, split_proportionally};
pub use builder::{build_node_samples, draw_with_replacement};
