//! Incremental stained-glass mosaic partition engine.
//!
//! A small set of movable sites (at most [`MAX_SITES`]) each claims a
//! connected region of a pixel grid through flood-fill competition, and
//! every region is rendered as a single representative color chosen to
//! minimize its color error. The engine keeps the partition, the per-region
//! color statistics, and an error-biased sampling structure consistent as
//! sites are added, removed, or relocated, recomputing only the regions an
//! operation actually disturbs. [`Optimizer`] drives a greedy accept/reject
//! search over candidate relocations on top of it.

mod anneal;
mod engine;
mod grid;
mod optimizer;
mod region;
mod sampler;
mod table;

pub use anneal::Annealer;
pub use engine::{PartitionEngine, SCORE_UNSET};
pub use grid::{pack_rgb, unpack_rgb, PixelGrid, UNASSIGNED};
pub use optimizer::{Optimizer, PassStats, PASS_ITERATIONS};
pub use region::Region;
pub use sampler::WeightedSampler;

/// RGB color tuple
pub type Rgb = [u8; 3];

/// Maximum number of simultaneously active sites.
pub const MAX_SITES: usize = 1000;

/// Error type for mosaic operations
#[derive(Debug, thiserror::Error)]
pub enum MosaicError {
    #[error("image has zero area")]
    EmptyImage,

    #[error("image too large: {0}x{1} exceeds the addressable pixel range")]
    ImageTooLarge(u32, u32),

    #[error("pixel buffer length {got} does not match {width}x{height}")]
    BufferMismatch { width: u32, height: u32, got: usize },
}

pub type Result<T> = std::result::Result<T, MosaicError>;
