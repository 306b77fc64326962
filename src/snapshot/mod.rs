pub mod gate;
pub mod manager;

pub use gate::{evaluate, GateRejection};
pub use manager::{SnapshotCleanupService, SnapshotKind, SnapshotManager};
