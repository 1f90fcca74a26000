pub mod inventory;
pub mod status;

pub use inventory::{ProviderDevice, ProviderNetwork, ProviderOrganization};
pub use status::{SyncState, SyncStatus, SyncStep};
