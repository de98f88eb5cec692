// Fusion Engine — canonical timeline synthesis from CBS/EMR streams.

pub mod fusion;
pub mod idsr;
pub mod store;

pub use fusion::{FusionEngine, StreamMatch};
pub use store::{RecordStore, StoreStats};
