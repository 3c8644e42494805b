//! TenantDB Pool Library
//!
//! Keeps one live database connection per tenant, reconciled against an
//! external tenant provider, with every connection's schema brought up to a
//! shared, append-only descriptor catalog inside a single transaction.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod pool;
pub mod reconcile;
pub mod schema;
pub mod tenant;

#[cfg(test)]
mod testing;

pub use bootstrap::{TenantPool, TenantPoolBuilder};
pub use error::{Result, TenantError};
