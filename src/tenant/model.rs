//! Tenant directory types
//!
//! Plain data describing where a tenant's database lives and how the tenant
//! presents itself. Providers hand these out, the registry caches them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque tenant key. Numeric ids from upstream catalogs are accepted and kept
/// in their decimal form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for TenantId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => TenantId(s),
            RawId::Number(n) => TenantId(n.to_string()),
        })
    }
}

/// Connection settings for one tenant database.
///
/// Two credential sets compare equal only when every field matches; any
/// difference means the tenant's connection must be rebuilt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCredentials {
    pub tenant_id: TenantId,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

fn default_port() -> u16 {
    5432
}

impl TenantCredentials {
    /// PostgreSQL connection URL with fixed encoding and timezone options
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?application_name=tenantdb-pool&options={}",
            urlencoding::encode(&self.user),
            urlencoding::encode(&self.password),
            self.host,
            self.port,
            urlencoding::encode(&self.database),
            urlencoding::encode("-c client_encoding=UTF8 -c TimeZone=UTC"),
        )
    }
}

impl fmt::Debug for TenantCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Display metadata for a tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantInfo {
    pub tenant_id: TenantId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub logo: String,
    #[serde(default)]
    pub type_code: String,
    #[serde(default)]
    pub extra: Value,
}

impl TenantInfo {
    /// True when any of the observable fields (name, short name, logo, type
    /// code) differ. `extra` is opaque and does not participate.
    pub fn differs_from(&self, other: &TenantInfo) -> bool {
        self.name != other.name
            || self.short_name != other.short_name
            || self.logo != other.logo
            || self.type_code != other.type_code
    }
}

/// One entry of a provider snapshot.
///
/// On the wire a record is flat: credential fields and metadata fields side by
/// side, with the tenant id given once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RecordWire", into = "RecordWire")]
pub struct TenantRecord {
    pub credentials: TenantCredentials,
    pub info: TenantInfo,
}

impl TenantRecord {
    pub fn new(credentials: TenantCredentials, mut info: TenantInfo) -> Self {
        info.tenant_id = credentials.tenant_id.clone();
        Self { credentials, info }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.credentials.tenant_id
    }
}

#[derive(Serialize, Deserialize)]
struct RecordWire {
    #[serde(flatten)]
    credentials: TenantCredentials,
    #[serde(default)]
    name: String,
    #[serde(default)]
    short_name: String,
    #[serde(default)]
    logo: String,
    #[serde(default)]
    type_code: String,
    #[serde(default)]
    extra: Value,
}

impl From<RecordWire> for TenantRecord {
    fn from(wire: RecordWire) -> Self {
        let info = TenantInfo {
            tenant_id: wire.credentials.tenant_id.clone(),
            name: wire.name,
            short_name: wire.short_name,
            logo: wire.logo,
            type_code: wire.type_code,
            extra: wire.extra,
        };
        Self {
            credentials: wire.credentials,
            info,
        }
    }
}

impl From<TenantRecord> for RecordWire {
    fn from(record: TenantRecord) -> Self {
        Self {
            credentials: record.credentials,
            name: record.info.name,
            short_name: record.info.short_name,
            logo: record.info.logo,
            type_code: record.info.type_code,
            extra: record.info.extra,
        }
    }
}
