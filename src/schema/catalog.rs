//! Schema descriptor catalog
//!
//! Descriptors are registered once, in order, and never removed. Every tenant
//! connection is brought up to the full list.

use crate::error::{Result, TenantError};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// One unit of schema, applied at most once per tenant database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    pub name: String,
    pub sql: String,
    pub checksum: String,
}

impl SchemaDescriptor {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let checksum = compute_checksum(&sql);
        Self {
            name: name.into(),
            sql,
            checksum,
        }
    }
}

/// Append-only, order-preserving descriptor list shared by all tenants.
///
/// Guarded by its own lock so registrations never wait on the tenant map.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    descriptors: RwLock<Vec<Arc<SchemaDescriptor>>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, descriptor: SchemaDescriptor) -> Result<()> {
        let mut descriptors = self
            .descriptors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if descriptors.iter().any(|d| d.name == descriptor.name) {
            return Err(TenantError::Configuration {
                message: format!("Schema descriptor '{}' is already registered", descriptor.name),
            });
        }

        debug!("Registered schema descriptor {}", descriptor.name);
        descriptors.push(Arc::new(descriptor));
        Ok(())
    }

    /// Register several descriptors under one lock acquisition. Either all of
    /// them are appended or none are.
    pub fn register_all(&self, batch: impl IntoIterator<Item = SchemaDescriptor>) -> Result<()> {
        let batch: Vec<SchemaDescriptor> = batch.into_iter().collect();
        if batch.is_empty() {
            return Ok(());
        }

        let mut descriptors = self
            .descriptors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for (i, descriptor) in batch.iter().enumerate() {
            let clashes = descriptors.iter().any(|d| d.name == descriptor.name)
                || batch[..i].iter().any(|d| d.name == descriptor.name);
            if clashes {
                return Err(TenantError::Configuration {
                    message: format!("Schema descriptor '{}' is already registered", descriptor.name),
                });
            }
        }

        descriptors.extend(batch.into_iter().map(Arc::new));
        Ok(())
    }

    /// Consistent view of the list as of now. Later registrations do not show up
    /// in a snapshot already taken.
    pub fn snapshot(&self) -> Vec<Arc<SchemaDescriptor>> {
        self.descriptors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.descriptors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register every `*.sql` file in `dir`, ordered by file name
    /// (`001_users.sql`, `002_orders.sql`, ...). Returns how many were added.
    pub fn load_dir(&self, dir: &Path) -> Result<usize> {
        if !dir.exists() {
            debug!("Schema directory {:?} does not exist, nothing to load", dir);
            return Ok(0);
        }

        let mut files = Vec::new();

        for entry in fs::read_dir(dir).map_err(|e| TenantError::Configuration {
            message: format!("Failed to read schema directory {:?}: {}", dir, e),
        })? {
            let path = entry
                .map_err(|e| TenantError::Configuration {
                    message: format!("Failed to read directory entry: {}", e),
                })?
                .path();

            if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
                let name = path
                    .file_stem()
                    .and_then(|n| n.to_str())
                    .unwrap_or("")
                    .to_string();

                let sql = fs::read_to_string(&path).map_err(|e| TenantError::Configuration {
                    message: format!("Failed to read schema file {:?}: {}", path, e),
                })?;

                files.push(SchemaDescriptor::new(name, sql));
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));

        let count = files.len();
        self.register_all(files)?;
        Ok(count)
    }
}

fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_compute_checksum() {
        let checksum = compute_checksum("CREATE TABLE test (id INT);");
        assert_eq!(checksum.len(), 64);
        assert_eq!(checksum, compute_checksum("CREATE TABLE test (id INT);"));
        assert_ne!(checksum, compute_checksum("CREATE TABLE other (id INT);"));
    }

    #[test]
    fn test_register_keeps_order_and_rejects_duplicates() {
        let catalog = SchemaCatalog::new();
        catalog
            .register(SchemaDescriptor::new("users", "CREATE TABLE users (id INT)"))
            .unwrap();
        catalog
            .register(SchemaDescriptor::new("orders", "CREATE TABLE orders (id INT)"))
            .unwrap();

        let err = catalog
            .register(SchemaDescriptor::new("users", "CREATE TABLE users2 (id INT)"))
            .unwrap_err();
        assert!(matches!(err, TenantError::Configuration { .. }));

        let names: Vec<_> = catalog.snapshot().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["users", "orders"]);
    }

    #[test]
    fn test_register_all_is_all_or_nothing() {
        let catalog = SchemaCatalog::new();
        let result = catalog.register_all(vec![
            SchemaDescriptor::new("a", "SELECT 1"),
            SchemaDescriptor::new("a", "SELECT 2"),
        ]);
        assert!(result.is_err());
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_snapshot_is_stable() {
        let catalog = SchemaCatalog::new();
        catalog.register(SchemaDescriptor::new("a", "SELECT 1")).unwrap();
        let snapshot = catalog.snapshot();
        catalog.register(SchemaDescriptor::new("b", "SELECT 2")).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_load_dir_sorts_by_file_name() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("002_orders.sql"), "CREATE TABLE orders (id INT);").unwrap();
        fs::write(temp_dir.path().join("001_users.sql"), "CREATE TABLE users (id INT);").unwrap();
        fs::write(temp_dir.path().join("README.md"), "not a descriptor").unwrap();

        let catalog = SchemaCatalog::new();
        assert_eq!(catalog.load_dir(temp_dir.path()).unwrap(), 2);

        let names: Vec<_> = catalog.snapshot().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["001_users", "002_orders"]);
    }

    #[test]
    fn test_load_missing_dir() {
        let catalog = SchemaCatalog::new();
        assert_eq!(catalog.load_dir(Path::new("/nonexistent/schema")).unwrap(), 0);
    }
}
