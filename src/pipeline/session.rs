//! Session stores whose operations run on the request's transaction.

use crate::error::AppError;
use crate::pipeline::{Next, RequestContext, Stage, TransactionListener, TransactionSlot};
use crate::response::Reply;
use crate::service::CrudService;
use crate::sql::QueryBuf;
use async_trait::async_trait;
use axum::http::{header, HeaderValue};
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde_json::{Map, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "sid";
pub const SESSION_TABLE: &str = "sessions";

#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    data: Map<String, Value>,
    is_new: bool,
    dirty: bool,
    destroyed: bool,
}

impl Session {
    fn fresh() -> Self {
        Session {
            id: Uuid::new_v4().to_string(),
            data: Map::new(),
            is_new: true,
            dirty: false,
            destroyed: false,
        }
    }

    fn loaded(id: String, data: Map<String, Value>) -> Self {
        Session {
            id,
            data,
            is_new: false,
            dirty: false,
            destroyed: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
        self.dirty = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let out = self.data.remove(key);
        self.dirty |= out.is_some();
        out
    }

    pub fn destroy(&mut self) {
        self.data.clear();
        self.destroyed = true;
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, sid: &str, tx: &TransactionSlot) -> Result<Option<Map<String, Value>>, AppError>;
    async fn set(&self, sid: &str, data: &Map<String, Value>, tx: &TransactionSlot) -> Result<(), AppError>;
    async fn destroy(&self, sid: &str, tx: &TransactionSlot) -> Result<(), AppError>;
}

/// Process-local store; ignores the transaction.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Map<String, Value>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> AppError {
    AppError::Internal("session store lock poisoned".into())
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, sid: &str, _tx: &TransactionSlot) -> Result<Option<Map<String, Value>>, AppError> {
        Ok(self.sessions.read().map_err(|_| poisoned())?.get(sid).cloned())
    }

    async fn set(&self, sid: &str, data: &Map<String, Value>, _tx: &TransactionSlot) -> Result<(), AppError> {
        self.sessions
            .write()
            .map_err(|_| poisoned())?
            .insert(sid.to_string(), data.clone());
        Ok(())
    }

    async fn destroy(&self, sid: &str, _tx: &TransactionSlot) -> Result<(), AppError> {
        self.sessions.write().map_err(|_| poisoned())?.remove(sid);
        Ok(())
    }
}

/// Sessions in the `sessions` table, written on the request's transaction when one is open.
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        PgSessionStore { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn get(&self, sid: &str, tx: &TransactionSlot) -> Result<Option<Map<String, Value>>, AppError> {
        let q = QueryBuf::with_sql(
            format!("SELECT data FROM {} WHERE sid = $1::text", SESSION_TABLE),
            vec![Value::String(sid.to_string())],
        );
        let row = CrudService::fetch_optional(tx, Some(&self.pool), &q).await?;
        Ok(row.and_then(|mut r| match r.get_mut("data").map(Value::take) {
            Some(Value::Object(data)) => Some(data),
            _ => None,
        }))
    }

    async fn set(&self, sid: &str, data: &Map<String, Value>, tx: &TransactionSlot) -> Result<(), AppError> {
        let q = QueryBuf::with_sql(
            format!(
                "INSERT INTO {} (sid, data) VALUES ($1::text, $2::jsonb) \
                 ON CONFLICT (sid) DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()",
                SESSION_TABLE
            ),
            vec![Value::String(sid.to_string()), Value::Object(data.clone())],
        );
        CrudService::execute(tx, Some(&self.pool), &q).await?;
        Ok(())
    }

    async fn destroy(&self, sid: &str, tx: &TransactionSlot) -> Result<(), AppError> {
        let q = QueryBuf::with_sql(
            format!("DELETE FROM {} WHERE sid = $1::text", SESSION_TABLE),
            vec![Value::String(sid.to_string())],
        );
        CrudService::execute(tx, Some(&self.pool), &q).await?;
        Ok(())
    }
}

async fn persist(store: &dyn SessionStore, session: &Session, tx: &TransactionSlot) -> Result<(), AppError> {
    if session.destroyed {
        store.destroy(&session.id, tx).await
    } else if session.dirty {
        store.set(&session.id, &session.data, tx).await
    } else {
        Ok(())
    }
}

/// Writes the session on the pool once the request's transaction has rolled back.
struct PersistAfterRollback {
    store: Arc<dyn SessionStore>,
    session: Session,
}

#[async_trait]
impl TransactionListener for PersistAfterRollback {
    async fn rolled_back(&self, tx: Uuid, _error: &AppError) {
        if let Err(e) = persist(self.store.as_ref(), &self.session, &TransactionSlot::default()).await {
            tracing::warn!(tx = %tx, error = %e, "session write after rollback failed");
        }
    }
}

/// Loads the session before the action and writes it after. Runs inside the transaction
/// scope so store operations share the request's transaction.
///
/// With `auto_commit` an existing session is written whatever the outcome: on the
/// transaction when it commits, on the pool after a rollback. A session created by a
/// failed request is dropped, since the client never receives its cookie. Without
/// `auto_commit`, only successful requests write their session.
pub struct SessionStage {
    store: Arc<dyn SessionStore>,
    auto_commit: bool,
}

impl SessionStage {
    pub fn new(store: Arc<dyn SessionStore>, auto_commit: bool) -> Self {
        SessionStage { store, auto_commit }
    }

    fn cookie(session: &Session) -> Option<HeaderValue> {
        let mut cookie = Cookie::build((SESSION_COOKIE, session.id.clone()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build();
        if session.destroyed {
            cookie.make_removal();
        } else if !(session.is_new && session.dirty) {
            return None;
        }
        HeaderValue::from_str(&cookie.to_string()).ok()
    }
}

#[async_trait]
impl Stage for SessionStage {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<Reply, AppError> {
        let session = match ctx.cookie(SESSION_COOKIE) {
            Some(sid) => match self.store.get(&sid, &ctx.transaction).await? {
                Some(data) => Session::loaded(sid, data),
                None => Session::fresh(),
            },
            None => Session::fresh(),
        };
        ctx.session = Some(session);

        let result = next.run(ctx).await;
        let Some(session) = ctx.session.take() else {
            return result;
        };

        if self.auto_commit && !session.is_new {
            let listener = Arc::new(PersistAfterRollback {
                store: self.store.clone(),
                session: session.clone(),
            });
            let in_transaction = ctx.transaction.on_finish(listener).await;
            if result.is_err() && !in_transaction {
                persist(self.store.as_ref(), &session, &ctx.transaction).await?;
            }
        }

        let reply = result?;
        persist(self.store.as_ref(), &session, &ctx.transaction).await?;
        Ok(match Self::cookie(&session) {
            Some(cookie) => reply.header(header::SET_COOKIE, cookie),
            None => reply,
        })
    }
}
