mod outbox_repo_mysql;
mod pool;
mod rbac_repo_mysql;
mod refresh_token_repo_mysql;
mod user_repo_mysql;

pub use outbox_repo_mysql::*;
pub use pool::*;
pub use rbac_repo_mysql::*;
pub use refresh_token_repo_mysql::*;
pub use user_repo_mysql::*;

mod repo_tx_mysql;

pub use repo_tx_mysql::*;

mod util;
