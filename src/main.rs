use tenantdb_pool::api::{router, ApiState, HeaderTenantResolver};
use tenantdb_pool::config::{Config, TenantSource};
use tenantdb_pool::pool::PgConnector;
use tenantdb_pool::reconcile::{JsonFileTenantProvider, PostgresTenantProvider, TenantProvider};
use tenantdb_pool::schema::SchemaCatalog;
use tenantdb_pool::TenantPoolBuilder;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup log directory
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "/var/log/tenantdb-pool".to_string());

    std::fs::create_dir_all(&log_dir).unwrap_or_else(|e| {
        eprintln!("Warning: Could not create log directory {}: {}", log_dir, e);
    });

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "tenantdb-pool.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Console plus JSON file output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tenantdb_pool=debug")),
        )
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_writer(non_blocking),
        )
        .init();

    debug!("Logging initialized - log directory: {}", log_dir);

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file found or error loading it: {}", e);
    }

    let config = Config::from_env()?;
    let socket_addr = config.socket_addr()?;

    info!("Schema sync enabled: {}", config.schema_sync_enabled);
    info!(
        "Reconciliation enabled: {} (every {:?}, concurrency {})",
        config.reconcile_enabled, config.reconcile_interval, config.reconcile_concurrency
    );
    info!("Max connections per tenant: {}", config.max_connections_per_tenant);

    let catalog = Arc::new(SchemaCatalog::new());
    if let Some(dir) = &config.schema_dir {
        let loaded = catalog.load_dir(dir)?;
        info!("Loaded {} schema descriptors from {:?}", loaded, dir);
    }

    let provider: Option<Arc<dyn TenantProvider>> = match &config.tenant_source {
        Some(TenantSource::File(path)) => {
            info!("Reading tenants from {:?}", path);
            Some(Arc::new(JsonFileTenantProvider::new(path)))
        }
        Some(TenantSource::Postgres { database_url, table }) => {
            info!("Reading tenants from control database table {}", table);
            Some(Arc::new(PostgresTenantProvider::connect(
                database_url,
                table,
                config.pool_timeout,
            )?))
        }
        None => None,
    };

    let connector = PgConnector::new(config.max_connections_per_tenant, config.pool_timeout);

    let mut builder = TenantPoolBuilder::new(config.clone(), connector).catalog(catalog);
    if let Some(provider) = provider {
        builder = builder.provider(provider);
    }
    // A missing provider is the one startup error that aborts the process
    let pool = Arc::new(builder.build()?);

    match pool.init().await {
        Ok(report) => info!(
            "Startup provisioned {} tenants ({} failed)",
            report.provisioned.len(),
            report.failed.len()
        ),
        Err(e) => warn!("Initial tenant fetch failed, waiting for the next cycle: {}", e),
    }

    let state = ApiState::new(
        pool.clone(),
        Arc::new(HeaderTenantResolver::new(config.tenant_header.clone())),
    );

    let app = router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&socket_addr).await?;
    info!("Server listening on {}", socket_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    pool.shutdown().await;
    info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
