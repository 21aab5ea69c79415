use std::any::Any;

#[async_trait::async_trait]
pub trait TxManager: Send + Sync {
    async fn begin(&self) -> anyhow::Result<Box<dyn StorageTx>>;
}

/// A unit of work spanning several repo calls. Dropping it without commit rolls back.
#[async_trait::async_trait]
pub trait StorageTx: Send + Any {
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;

    /// Lets a backend recover its concrete transaction type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
