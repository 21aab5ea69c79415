mod auth_service;
mod rbac_query;
mod rbac_service;
mod status;

pub use auth_service::*;
pub use rbac_query::*;
pub use rbac_service::*;
pub use status::*;
