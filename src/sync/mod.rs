//! Sync engine core.
//!
//! - [`queue`]: the single rate-limited path every remote call takes
//! - [`intents`] / [`dispatcher`]: event → existence-guarded sync tasks
//! - [`scheduler`]: per-category timer loops gated by [`state`]
//! - [`orchestrator`]: sequential full sync of every category
//! - [`engine`]: the facade that owns all of the above

pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod intents;
pub mod operations;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod supervisor;

#[allow(unused_imports)]
pub use dispatcher::CoalescenceDispatcher;
#[allow(unused_imports)]
pub use engine::{CategoryStatus, EngineStatus, SyncEngine};
#[allow(unused_imports)]
pub use events::DirectoryEvent;
#[allow(unused_imports)]
pub use intents::{fan_out, IntentKind, SyncIntent};
#[allow(unused_imports)]
pub use operations::SyncOperations;
#[allow(unused_imports)]
pub use orchestrator::{FullSyncOrchestrator, FullSyncPhase, FullSyncProgress, FULL_SYNC_STEPS};
#[allow(unused_imports)]
pub use queue::{FetchQueue, QueueStats};
#[allow(unused_imports)]
pub use scheduler::{JobOperation, PeriodicScheduler, SchedulerJob};
#[allow(unused_imports)]
pub use state::{is_due, SyncStateRegistry};
#[allow(unused_imports)]
pub use supervisor::{SupervisorStats, TaskSupervisor};
