//! Dataset handling
//!
//! - Chronological train/validation/test splitting without look-ahead
//! - Deterministic synthetic match data for tests and demos

pub mod split;
pub mod synthetic;

pub use split::{DatasetSplitter, Split};
pub use synthetic::{SyntheticConfig, SyntheticGenerator};
