mod auth_service_impl;
mod authorization_gate;
mod credential_hasher_argon2;
mod rbac_query_impl;
mod rbac_service_impl;
mod token_codec_jwt;

pub use auth_service_impl::*;
pub use authorization_gate::*;
pub use credential_hasher_argon2::*;
pub use rbac_query_impl::*;
pub use rbac_service_impl::*;
pub use token_codec_jwt::*;
