//! Per-request transaction scope: `NONE -> STARTED -> COMMITTED | ROLLED_BACK`.

use crate::error::AppError;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    None,
    Started,
    Committed,
    RolledBack,
}

/// Opens transactions for transacted routes.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn TxHandle>, AppError>;
}

/// One open database transaction, owned by exactly one request.
#[async_trait]
pub trait TxHandle: Send {
    async fn commit(self: Box<Self>) -> Result<(), AppError>;
    async fn rollback(self: Box<Self>) -> Result<(), AppError>;

    /// Connection queries run on while the transaction is open.
    fn connection(&mut self) -> Option<&mut PgConnection> {
        None
    }
}

/// Side effects coupled to persistence, notified strictly after the physical commit or rollback.
#[async_trait]
pub trait TransactionListener: Send + Sync {
    async fn committed(&self, _tx: Uuid) {}
    async fn rolled_back(&self, _tx: Uuid, _error: &AppError) {}
}

pub struct PgTransactionSource {
    pool: PgPool,
}

impl PgTransactionSource {
    pub fn new(pool: PgPool) -> Self {
        PgTransactionSource { pool }
    }
}

struct PgTx(sqlx::Transaction<'static, Postgres>);

#[async_trait]
impl TransactionSource for PgTransactionSource {
    async fn begin(&self) -> Result<Box<dyn TxHandle>, AppError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx(tx)))
    }
}

#[async_trait]
impl TxHandle for PgTx {
    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.0.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        self.0.rollback().await?;
        Ok(())
    }

    fn connection(&mut self) -> Option<&mut PgConnection> {
        Some(&mut *self.0)
    }
}

pub struct ActiveTransaction {
    pub id: Uuid,
    handle: Box<dyn TxHandle>,
    listeners: Vec<Arc<dyn TransactionListener>>,
}

impl ActiveTransaction {
    pub fn new(handle: Box<dyn TxHandle>) -> Self {
        ActiveTransaction {
            id: Uuid::new_v4(),
            handle,
            listeners: Vec::new(),
        }
    }

    pub fn on_finish(&mut self, listener: Arc<dyn TransactionListener>) {
        self.listeners.push(listener);
    }

    pub fn connection(&mut self) -> Option<&mut PgConnection> {
        self.handle.connection()
    }

    /// Commit, then notify listeners. A failed commit notifies rollback listeners instead.
    pub async fn commit(self) -> Result<(), AppError> {
        let ActiveTransaction { id, handle, listeners } = self;
        match handle.commit().await {
            Ok(()) => {
                tracing::debug!(tx = %id, "transaction committed");
                for listener in &listeners {
                    listener.committed(id).await;
                }
                Ok(())
            }
            Err(err) => {
                tracing::warn!(tx = %id, error = %err, "commit failed");
                for listener in &listeners {
                    listener.rolled_back(id, &err).await;
                }
                Err(err)
            }
        }
    }

    /// Roll back, then notify listeners with the error that caused it.
    pub async fn rollback(self, error: &AppError) {
        let ActiveTransaction { id, handle, listeners } = self;
        if let Err(e) = handle.rollback().await {
            tracing::warn!(tx = %id, error = %e, "rollback failed");
        } else {
            tracing::debug!(tx = %id, "transaction rolled back");
        }
        for listener in &listeners {
            listener.rolled_back(id, error).await;
        }
    }
}

struct SlotInner {
    active: Option<ActiveTransaction>,
    state: TxState,
}

/// Request-owned holder of the current transaction. Cloning shares the same slot;
/// a fresh slot is created per request and never cached.
#[derive(Clone)]
pub struct TransactionSlot {
    inner: Arc<Mutex<SlotInner>>,
}

impl Default for TransactionSlot {
    fn default() -> Self {
        TransactionSlot {
            inner: Arc::new(Mutex::new(SlotInner {
                active: None,
                state: TxState::None,
            })),
        }
    }
}

pub struct SlotGuard<'a>(MutexGuard<'a, SlotInner>);

impl SlotGuard<'_> {
    pub fn transaction(&mut self) -> Option<&mut ActiveTransaction> {
        self.0.active.as_mut()
    }

    pub fn connection(&mut self) -> Option<&mut PgConnection> {
        self.0.active.as_mut().and_then(ActiveTransaction::connection)
    }
}

impl TransactionSlot {
    pub async fn state(&self) -> TxState {
        self.inner.lock().await.state
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.active.is_some()
    }

    pub async fn id(&self) -> Option<Uuid> {
        self.inner.lock().await.active.as_ref().map(|t| t.id)
    }

    pub async fn lock(&self) -> SlotGuard<'_> {
        SlotGuard(self.inner.lock().await)
    }

    /// Enter `STARTED`. Only allowed once per request.
    pub async fn start(&self, tx: ActiveTransaction) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        if inner.state != TxState::None {
            return Err(AppError::Internal(format!(
                "transaction cannot start from state {:?}",
                inner.state
            )));
        }
        tracing::debug!(tx = %tx.id, "transaction started");
        inner.active = Some(tx);
        inner.state = TxState::Started;
        Ok(())
    }

    /// Register a listener on the active transaction. Returns false when none is active.
    pub async fn on_finish(&self, listener: Arc<dyn TransactionListener>) -> bool {
        match self.inner.lock().await.active.as_mut() {
            Some(tx) => {
                tx.on_finish(listener);
                true
            }
            None => false,
        }
    }

    /// Clear the slot and finish the taken transaction: commit on `Ok`, roll back on `Err`.
    /// The original error is returned unchanged.
    pub async fn finish<T>(&self, result: Result<T, AppError>) -> Result<T, AppError> {
        let taken = self.inner.lock().await.active.take();
        let Some(tx) = taken else {
            return result;
        };
        match result {
            Ok(value) => {
                let committed = tx.commit().await;
                self.inner.lock().await.state = if committed.is_ok() {
                    TxState::Committed
                } else {
                    TxState::RolledBack
                };
                committed.map(|()| value)
            }
            Err(err) => {
                tx.rollback(&err).await;
                self.inner.lock().await.state = TxState::RolledBack;
                Err(err)
            }
        }
    }
}
