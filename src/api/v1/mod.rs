mod error;
mod handler;
mod router;

pub use error::{ApiError, StatusRejection, recover_error};
pub use handler::ApiResponse;
pub use router::{rbac_routes, routes, user_routes};
