mod id;
mod identity;
mod rbac;
mod token;
mod user;

pub use id::*;
pub use identity::*;
pub use rbac::*;
pub use token::*;
pub use user::*;
