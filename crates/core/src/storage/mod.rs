pub mod cache;

pub use cache::{SnapshotCache, WriteOutcome};
