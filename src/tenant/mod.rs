mod model;

pub use model::{TenantCredentials, TenantId, TenantInfo, TenantRecord};
