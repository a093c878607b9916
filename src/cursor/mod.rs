//! Query cursors (spec C7-C9): a pruned range report, a baseline sampling
//! cursor that decomposes once and resamples from that decomposition, and
//! the accelerated cursor that exploits per-node sample buffers.

pub mod accelerated_sample;
pub mod naive_sample;
pub mod range_report;

pub use accelerated_sample::AcceleratedSampleCursor;
pub use naive_sample::NaiveSampleCursor;
pub use range_report::range_report;
