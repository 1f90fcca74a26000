pub mod client_pool;
pub mod connections;
pub mod orchestrator;
pub mod scheduler;
pub mod status;
pub mod sync_actor;
pub mod token_manager;

pub use client_pool::ClientPool;
pub use connections::ConnectionService;
pub use orchestrator::SyncOrchestrator;
pub use scheduler::{BackgroundSyncScheduler, SchedulerHandle};
pub use status::SyncStatusTracker;
pub use sync_actor::SyncHandle;
pub use token_manager::TokenLifecycleManager;
