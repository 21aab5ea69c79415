use crate::domain_model::*;
use crate::domain_port::*;
use anyhow::anyhow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    pub users: BTreeMap<UserId, User>,
    pub credentials: Vec<Credential>,
    pub refresh_tokens: HashMap<RefreshTokenId, RefreshTokenRecord>,
    pub outbox: BTreeMap<i64, OutboxEvent>,
    pub next_outbox_id: i64,
    pub roles: BTreeMap<RoleId, Role>,
    pub permissions: BTreeMap<PermissionId, Permission>,
    pub role_permissions: BTreeMap<(RoleId, PermissionId), RolePermission>,
    pub user_roles: BTreeMap<(UserId, RoleId), UserRole>,
    pub user_permissions: BTreeMap<(UserId, PermissionId), UserPermission>,
}

/// Process-local database shared by every in-memory repo.
#[derive(Debug, Clone, Default)]
pub struct MemoryDb {
    state: Arc<Mutex<MemoryTables>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read<R>(&self, f: impl FnOnce(&MemoryTables) -> R) -> R {
        let guard = self.state.lock().await;
        f(&guard)
    }

    pub async fn write<R>(&self, f: impl FnOnce(&mut MemoryTables) -> R) -> R {
        let mut guard = self.state.lock().await;
        f(&mut guard)
    }
}

pub struct MemoryTxManager {
    db: MemoryDb,
}

impl MemoryTxManager {
    pub fn new(db: MemoryDb) -> Self {
        MemoryTxManager { db }
    }
}

#[async_trait::async_trait]
impl TxManager for MemoryTxManager {
    async fn begin(&self) -> anyhow::Result<Box<dyn StorageTx>> {
        let guard = self.db.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }
}

/// Holds the database lock for its whole life, so transactions are serialized.
/// Writes go to `work` and replace the shared tables only on commit.
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryTables>,
    work: MemoryTables,
}

impl MemoryTx {
    pub fn tables(&mut self) -> &mut MemoryTables {
        &mut self.work
    }
}

#[async_trait::async_trait]
impl StorageTx for MemoryTx {
    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

pub fn downcast(tx: &mut dyn StorageTx) -> anyhow::Result<&mut MemoryTables> {
    tx.as_any_mut()
        .downcast_mut::<MemoryTx>()
        .map(MemoryTx::tables)
        .ok_or_else(|| anyhow!("transaction does not belong to the in-memory backend"))
}
