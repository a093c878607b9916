//! Index construction: the fan-out packing rule (spec §4.4 "Algorithm"
//! step 2/3), the IO-layer builder (C4), and the in-memory layer builder
//! (C5).

pub mod fanout;
pub mod io_layer;
pub mod mem_layers;

pub use fanout::{next_fanout, pack_sizes};
pub use io_layer::{build_io_layers, load_io_layers, save_io_layers, BuildStats, ExternalSort, InMemorySort};
pub use mem_layers::{build_mem_layers, load_mem_nodes, save_mem_nodes};
