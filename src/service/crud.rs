//! Query execution against PostgreSQL: on the request's transaction when one is open, else on the pool.

use crate::error::AppError;
use crate::pipeline::TransactionSlot;
use crate::sql::{PgBindValue, QueryBuf};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};

pub struct CrudService;

impl CrudService {
    pub async fn fetch_all(tx: &TransactionSlot, pool: Option<&PgPool>, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut slot = tx.lock().await;
        let rows = match slot.connection() {
            Some(conn) => Self::bind(&q.sql, &q.params).fetch_all(&mut *conn).await?,
            None => Self::bind(&q.sql, &q.params).fetch_all(Self::pool(pool)?).await?,
        };
        Ok(rows.iter().map(row_to_json).collect())
    }

    pub async fn fetch_optional(
        tx: &TransactionSlot,
        pool: Option<&PgPool>,
        q: &QueryBuf,
    ) -> Result<Option<Value>, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut slot = tx.lock().await;
        let row = match slot.connection() {
            Some(conn) => Self::bind(&q.sql, &q.params).fetch_optional(&mut *conn).await?,
            None => Self::bind(&q.sql, &q.params).fetch_optional(Self::pool(pool)?).await?,
        };
        Ok(row.map(|r| row_to_json(&r)))
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn execute(tx: &TransactionSlot, pool: Option<&PgPool>, q: &QueryBuf) -> Result<u64, AppError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let mut slot = tx.lock().await;
        let done = match slot.connection() {
            Some(conn) => Self::bind(&q.sql, &q.params).execute(&mut *conn).await?,
            None => Self::bind(&q.sql, &q.params).execute(Self::pool(pool)?).await?,
        };
        Ok(done.rows_affected())
    }

    fn bind<'q>(sql: &'q str, params: &[Value]) -> Query<'q, Postgres, PgArguments> {
        let mut query = sqlx::query(sql);
        for p in params {
            query = query.bind(PgBindValue::from_json(p));
        }
        query
    }

    fn pool(pool: Option<&PgPool>) -> Result<&PgPool, AppError> {
        pool.ok_or_else(|| AppError::Internal("no database configured".into()))
    }
}

pub(crate) fn row_to_json(row: &PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
