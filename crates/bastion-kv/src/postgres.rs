//! PostgreSQL backend.
//!
//! All tables share one physical relation keyed by `(tbl, key)`. Conditional
//! creates use `ON CONFLICT DO NOTHING`, which makes `put_if_absent` a
//! native compare-and-set usable across processes.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::backend::{BackendType, KvBackend};
use crate::error::{KvError, KvResult};

#[derive(Clone)]
pub struct PostgresKv {
    pool: PgPool,
}

impl PostgresKv {
    pub async fn connect(database_url: &str) -> KvResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> KvResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| KvError::Unavailable(format!("failed to connect postgres: {}", sanitize(&e))))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn from_pool(pool: PgPool) -> KvResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> KvResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bastion_kv (
                tbl TEXT NOT NULL,
                key TEXT NOT NULL,
                value JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (tbl, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }
}

/// Strip connection details from driver errors.
fn sanitize(err: &sqlx::Error) -> &'static str {
    match err {
        sqlx::Error::PoolTimedOut => "pool timed out",
        sqlx::Error::PoolClosed => "pool closed",
        sqlx::Error::Io(_) => "i/o error",
        sqlx::Error::Tls(_) => "tls error",
        sqlx::Error::Database(_) => "database error",
        _ => "driver error",
    }
}

fn backend_error(err: sqlx::Error) -> KvError {
    KvError::Unavailable(format!("postgres: {}", sanitize(&err)))
}

fn like_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl KvBackend for PostgresKv {
    fn backend_type(&self) -> BackendType {
        BackendType::Postgres
    }

    async fn get(&self, table: &str, key: &str) -> KvResult<Option<Value>> {
        let row = sqlx::query("SELECT value FROM bastion_kv WHERE tbl = $1 AND key = $2")
            .bind(table)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)?;
        row.map(|r| r.try_get::<Value, _>("value").map_err(backend_error))
            .transpose()
    }

    async fn put(&self, table: &str, key: &str, value: Value) -> KvResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bastion_kv (tbl, key, value, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tbl, key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(table)
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }

    async fn put_if_absent(&self, table: &str, key: &str, value: Value) -> KvResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO bastion_kv (tbl, key, value, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tbl, key) DO NOTHING
            "#,
        )
        .bind(table)
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn scan_prefix(&self, table: &str, prefix: &str) -> KvResult<Vec<(String, Value)>> {
        let rows = sqlx::query(
            r#"
            SELECT key, value FROM bastion_kv
            WHERE tbl = $1 AND key LIKE $2 ESCAPE '\'
            ORDER BY key COLLATE "C" ASC
            "#,
        )
        .bind(table)
        .bind(like_pattern(prefix))
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;

        rows.into_iter()
            .map(|row| {
                let key: String = row.try_get("key").map_err(backend_error)?;
                let value: Value = row.try_get("value").map_err(backend_error)?;
                Ok((key, value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("t_demo#saas#"), "t\\_demo#saas#%");
        assert_eq!(like_pattern("50%"), "50\\%%");
    }
}
