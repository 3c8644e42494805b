//! Database engine seam
//!
//! The registry and the synchronizer only see these traits. The PostgreSQL
//! implementation lives in [`super::postgres`]; tests use an in-memory engine.

use crate::error::Result;
use crate::schema::SchemaDescriptor;
use crate::tenant::TenantCredentials;
use async_trait::async_trait;

/// Opens live handles to tenant databases.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: TenantDatabase;

    /// Open and verify a handle. Returns `ConnectionFailed` when the database
    /// cannot be reached.
    async fn connect(&self, credentials: &TenantCredentials) -> Result<Self::Connection>;
}

/// A live handle owned by one registry entry. Cloning shares the handle.
#[async_trait]
pub trait TenantDatabase: Clone + Send + Sync + 'static {
    type Transaction: SchemaTransaction;

    async fn begin(&self) -> Result<Self::Transaction>;

    /// Release the handle. Clones held elsewhere stop working.
    async fn close(&self);
}

/// A transaction scoped to one tenant connection.
///
/// Dropping a transaction without calling `commit` must leave no changes behind.
#[async_trait]
pub trait SchemaTransaction: Send + 'static {
    /// Ensure one descriptor is present. Returns false when it was already
    /// applied by an earlier pass.
    async fn apply(&mut self, descriptor: &SchemaDescriptor) -> Result<bool>;

    async fn execute(&mut self, sql: &str) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
