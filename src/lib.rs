pub mod bits;
pub mod error;
pub mod ogg;
pub mod ranges;
pub mod rewrite;
pub mod rice;
pub mod scan;
pub mod skeleton;
pub mod validate;

pub use error::{Error, Result};
pub use ranges::{OffsetRange, RangeMap};
pub use rewrite::{IndexStats, Rewriter};
pub use validate::{validate, TrackReport, ValidationReport};

/// Configuration for indexing
#[derive(Clone, Debug)]
pub struct IndexConfig {
    /// Minimum interval between caption seek points, in milliseconds
    pub keypoint_interval_ms: i64,
    /// Dump per-packet info to stdout while scanning
    pub dump_packets: bool,
    /// Dump only key packet info to stdout while scanning
    pub dump_key_packets: bool,
    /// Dump per-page info to stdout while scanning
    pub dump_pages: bool,
    /// Report extra statistics
    pub verbose: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            keypoint_interval_ms: 2000,
            dump_packets: false,
            dump_key_packets: false,
            dump_pages: false,
            verbose: false,
        }
    }
}
