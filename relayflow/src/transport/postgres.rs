//! PostgreSQL implementation of the SQL seam, backed by `sqlx`.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Transaction};

use super::sql::{SqlConnection, SqlTransaction};
use crate::errors::SqlError;

fn map_sqlx_error(operation: &str, err: &sqlx::Error) -> SqlError {
    SqlError::new(format!("{operation}: {err}"))
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => query.bind(s.as_str()),
            other @ (Value::Array(_) | Value::Object(_)) => query.bind(sqlx::types::Json(other)),
        };
    }
    query
}

/// A connection pool to a PostgreSQL database.
#[derive(Debug, Clone)]
pub struct PgConnection {
    pool: PgPool,
}

impl PgConnection {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at the given URL.
    pub async fn connect(url: &str) -> Result<Self, SqlError> {
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", &e))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SqlConnection for PgConnection {
    async fn begin(&self) -> Result<Box<dyn SqlTransaction>, SqlError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", &e))?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn execute(&self, query: &str, args: &[Value]) -> Result<u64, SqlError> {
        let result = bind_all(sqlx::query(query), args)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("execute", &e).with_query(query))?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SqlTransaction for PgTransaction {
    async fn execute(&mut self, query: &str, args: &[Value]) -> Result<u64, SqlError> {
        let result = bind_all(sqlx::query(query), args)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("execute", &e).with_query(query))?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), SqlError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", &e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), SqlError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", &e))
    }
}
