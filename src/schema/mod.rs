mod catalog;
mod sync;

pub use catalog::{SchemaCatalog, SchemaDescriptor};
pub use sync::{AfterSyncHook, BeforeSyncHook, SchemaSynchronizer, SyncOutcome};
