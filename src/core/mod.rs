pub mod checkpoint;
pub mod engine;
pub mod enumerator;
pub mod executor;
pub mod planner;
pub mod session;

pub use checkpoint::CheckpointStore;
pub use engine::SyncEngine;
pub use enumerator::{enumerate_local, IgnoreRules, LocalFile};
pub use executor::{TaskFailure, TransferExecutor};
pub use planner::{DeleteTask, DiffPlanner, DownloadPlan, DownloadTask, TransferPlan, UploadTask};
pub use session::{ResultSet, SyncDownOutcome, SyncSession, SyncState, SyncUpOutcome};
