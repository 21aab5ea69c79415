mod db;
mod outbox_repo_memory;
mod rbac_repo_memory;
mod refresh_token_repo_memory;
mod user_repo_memory;

pub use db::{MemoryDb, MemoryTables, MemoryTx, MemoryTxManager};
pub use outbox_repo_memory::*;
pub use rbac_repo_memory::*;
pub use refresh_token_repo_memory::*;
pub use user_repo_memory::*;
