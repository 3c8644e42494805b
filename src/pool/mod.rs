mod engine;
mod postgres;
mod registry;

pub use engine::{Connector, SchemaTransaction, TenantDatabase};
pub use postgres::{PgConnector, PgSchemaTransaction, PgTenantDatabase};
pub use registry::{AddOutcome, TenantRegistry};

pub(crate) use postgres::create_pool;
