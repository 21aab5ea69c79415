mod outbox_repo;
mod rbac_repo;
mod refresh_token_repo;
mod user_repo;

mod repo_tx;

pub use outbox_repo::*;
pub use rbac_repo::*;
pub use refresh_token_repo::*;
pub use user_repo::*;

pub use repo_tx::*;
