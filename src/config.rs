use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Where the desired tenant set comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantSource {
    /// JSON array of tenant records, re-read every cycle
    File(PathBuf),
    /// Tenant catalog table in a control database
    Postgres { database_url: String, table: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub schema_sync_enabled: bool,
    pub reconcile_enabled: bool,
    pub reconcile_interval: Duration,
    pub reconcile_concurrency: usize,
    pub provision_timeout: Duration,
    pub max_connections_per_tenant: u32,
    pub pool_timeout: Duration,
    pub schema_dir: Option<PathBuf>,
    pub tenant_source: Option<TenantSource>,
    pub tenant_header: String,
    pub gateway_host: String,
    pub gateway_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_sync_enabled: true,
            reconcile_enabled: true,
            reconcile_interval: Duration::from_secs(5 * 60),
            reconcile_concurrency: 4,
            provision_timeout: Duration::from_secs(30),
            max_connections_per_tenant: 10,
            pool_timeout: Duration::from_secs(5),
            schema_dir: None,
            tenant_source: None,
            tenant_header: "x-tenant-id".to_string(),
            gateway_host: "127.0.0.1".to_string(),
            gateway_port: 9000,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Config::default();

        let schema_sync_enabled = env_flag("SCHEMA_SYNC_ENABLED", defaults.schema_sync_enabled);
        let reconcile_enabled = env_flag("RECONCILE_ENABLED", defaults.reconcile_enabled);

        let reconcile_minutes: u64 = env::var("RECONCILE_INTERVAL_MINUTES")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        let reconcile_concurrency: usize = env::var("RECONCILE_CONCURRENCY")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .unwrap_or(4);

        let provision_timeout_secs: u64 = env::var("PROVISION_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let max_connections_per_tenant = env::var("MAX_CONNECTIONS_PER_TENANT")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let pool_timeout_secs: u64 = env::var("POOL_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        let schema_dir = env::var("SCHEMA_DIR").ok().map(PathBuf::from);

        let tenant_source = match env::var("TENANT_SOURCE").ok().as_deref() {
            Some("file") => {
                let path = env::var("TENANTS_FILE").unwrap_or_else(|_| "./tenants.json".to_string());
                Some(TenantSource::File(PathBuf::from(path)))
            }
            Some("postgres") => {
                let database_url = env::var("CONTROL_DATABASE_URL")
                    .map_err(|_| anyhow::anyhow!("TENANT_SOURCE=postgres requires CONTROL_DATABASE_URL"))?;
                let table = env::var("TENANT_TABLE").unwrap_or_else(|_| "tenants".to_string());
                Some(TenantSource::Postgres { database_url, table })
            }
            Some(other) => anyhow::bail!("Unknown TENANT_SOURCE: {}", other),
            None => None,
        };

        let tenant_header = env::var("TENANT_HEADER").unwrap_or(defaults.tenant_header);
        let gateway_host = env::var("GATEWAY_HOST").unwrap_or(defaults.gateway_host);

        let gateway_port = env::var("GATEWAY_PORT")
            .unwrap_or_else(|_| "9000".to_string())
            .parse()
            .unwrap_or(9000);

        Ok(Config {
            schema_sync_enabled,
            reconcile_enabled,
            reconcile_interval: reconcile_interval(reconcile_minutes),
            reconcile_concurrency: reconcile_concurrency.max(1),
            provision_timeout: provision_timeout(provision_timeout_secs),
            max_connections_per_tenant,
            pool_timeout: Duration::from_secs(pool_timeout_secs),
            schema_dir,
            tenant_source,
            tenant_header,
            gateway_host,
            gateway_port,
        })
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.gateway_host, self.gateway_port);
        addr.parse().map_err(|e| anyhow::anyhow!("Invalid socket address: {}", e))
    }
}

fn reconcile_interval(minutes: u64) -> Duration {
    Duration::from_secs(minutes.max(1).saturating_mul(60))
}

// Zero would time out every add
fn provision_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => parse_flag(&value).unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
