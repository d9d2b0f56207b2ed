// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend for the L3 store of record.
//!
//! Schema (table name configurable, default `token`):
//! ```sql
//! CREATE TABLE token (
//!   token     VARCHAR(32) PRIMARY KEY,  -- canonical lowercase hex
//!   userid    BIGINT NOT NULL,
//!   metadata  TEXT,                     -- JSON object as text
//!   create_at BIGINT NOT NULL,          -- epoch seconds
//!   last_use  BIGINT NOT NULL           -- epoch seconds
//! );
//! CREATE INDEX token_userid_idx   ON token (userid);
//! CREATE INDEX token_last_use_idx ON token (last_use);
//! ```
//!
//! ## sqlx Any Driver Quirks
//!
//! We use TEXT instead of a native JSON type because sqlx's `Any` driver
//! doesn't map MySQL JSON or Postgres JSONB, and MySQL TEXT can come back as
//! bytes. Text columns are read as `String` first, then as UTF-8 bytes.
//!
//! Statements are written with `?` placeholders and rewritten to `$n` for
//! Postgres once, at construction.

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use crate::record::{TokenRecord, UserId, NO_USER};
use crate::token;
use super::traits::{ArchiveStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};
use std::sync::Once;
use std::time::Duration;

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub const DEFAULT_TABLE: &str = "token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    MySql,
    Postgres,
}

impl Dialect {
    /// Infer the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Result<Self, StorageError> {
        let scheme = url.split(':').next().unwrap_or("");
        match scheme {
            "sqlite" => Ok(Self::Sqlite),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(StorageError::Backend(format!("Unsupported SQL scheme '{}'", other))),
        }
    }

    /// Rewrite `?` placeholders for this dialect.
    fn placeholders(self, sql: &str) -> String {
        if self != Self::Postgres {
            return sql.to_string();
        }
        let mut out = String::with_capacity(sql.len() + 8);
        let mut n = 0;
        for c in sql.chars() {
            if c == '?' {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            } else {
                out.push(c);
            }
        }
        out
    }
}

/// Whether `name` is safe to splice into SQL as a table name.
fn valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63
}

/// Statements prepared once per table.
#[derive(Debug, Clone)]
struct Statements {
    insert: String,
    update_last_use: String,
    delete: String,
    lookup: String,
    lookup_not_before: String,
    list_by_user: String,
    delete_expired: String,
}

impl Statements {
    fn new(table: &str, dialect: Dialect) -> Self {
        let p = |sql: String| dialect.placeholders(&sql);
        Self {
            insert: p(format!(
                "INSERT INTO {table} (token, userid, metadata, create_at, last_use) VALUES (?, ?, ?, ?, ?)"
            )),
            update_last_use: p(format!(
                "UPDATE {table} SET last_use = ? WHERE token = ? AND last_use < ?"
            )),
            delete: p(format!("DELETE FROM {table} WHERE token = ?")),
            lookup: p(format!("SELECT userid FROM {table} WHERE token = ?")),
            lookup_not_before: p(format!(
                "SELECT userid FROM {table} WHERE token = ? AND last_use > ?"
            )),
            list_by_user: p(format!(
                "SELECT token, metadata, create_at, last_use FROM {table} WHERE userid = ? ORDER BY create_at, token"
            )),
            delete_expired: p(format!("DELETE FROM {table} WHERE last_use < ?")),
        }
    }
}

pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
    table: String,
    stmts: Statements,
    retry: RetryConfig,
}

impl SqlStore {
    /// Connect with startup-mode retry (fails fast if config is wrong) and
    /// create the table and indexes if they are missing.
    pub async fn connect(connection_string: &str, table: Option<&str>) -> Result<Self, StorageError> {
        install_drivers();

        let dialect = Dialect::from_url(connection_string)?;

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(20)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self::from_pool(pool, dialect, table)?;

        // WAL mode lets readers proceed while the sweep writes
        if dialect == Dialect::Sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    /// Wrap a pool the host already owns. Does not touch the schema.
    pub fn from_pool(pool: AnyPool, dialect: Dialect, table: Option<&str>) -> Result<Self, StorageError> {
        install_drivers();
        let table = table.unwrap_or(DEFAULT_TABLE);
        if !valid_table_name(table) {
            return Err(StorageError::Backend(format!("Invalid table name '{}'", table)));
        }
        Ok(Self {
            pool,
            dialect,
            table: table.to_string(),
            stmts: Statements::new(table, dialect),
            retry: RetryConfig::query(),
        })
    }

    /// Replace the per-query retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    /// Create the table and both indexes if absent. Idempotent.
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        let t = &self.table;
        let statements: Vec<String> = match self.dialect {
            Dialect::Sqlite => vec![
                format!(
                    "CREATE TABLE IF NOT EXISTS {t} (
                        token TEXT PRIMARY KEY,
                        userid INTEGER NOT NULL,
                        metadata TEXT,
                        create_at INTEGER NOT NULL,
                        last_use INTEGER NOT NULL
                    )"
                ),
                format!("CREATE INDEX IF NOT EXISTS {t}_userid_idx ON {t} (userid)"),
                format!("CREATE INDEX IF NOT EXISTS {t}_last_use_idx ON {t} (last_use)"),
            ],
            // MySQL has no CREATE INDEX IF NOT EXISTS; declare them inline
            Dialect::MySql => vec![format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    token VARCHAR(32) PRIMARY KEY,
                    userid BIGINT NOT NULL,
                    metadata TEXT,
                    create_at BIGINT NOT NULL,
                    last_use BIGINT NOT NULL,
                    INDEX {t}_userid_idx (userid),
                    INDEX {t}_last_use_idx (last_use)
                )"
            )],
            Dialect::Postgres => vec![
                format!(
                    "CREATE TABLE IF NOT EXISTS {t} (
                        token VARCHAR(32) PRIMARY KEY,
                        userid BIGINT NOT NULL,
                        metadata TEXT,
                        create_at BIGINT NOT NULL,
                        last_use BIGINT NOT NULL
                    )"
                ),
                format!("CREATE INDEX IF NOT EXISTS {t}_userid_idx ON {t} (userid)"),
                format!("CREATE INDEX IF NOT EXISTS {t}_last_use_idx ON {t} (last_use)"),
            ],
        };

        for sql in &statements {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))
            })
            .await?;
        }

        Ok(())
    }

    /// Drop the table. Meant for test teardown.
    pub async fn drop_table(&self) -> Result<(), StorageError> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.table))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Read a text column, tolerating drivers that hand TEXT back as bytes.
    fn text_column(row: &AnyRow, name: &str) -> Option<String> {
        row.try_get::<Option<String>, _>(name).ok().flatten().or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(name)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
    }

    fn record_from_row(row: &AnyRow, userid: UserId) -> Result<TokenRecord, StorageError> {
        let raw = Self::text_column(row, "token")
            .ok_or_else(|| StorageError::Backend("Row without token".to_string()))?;
        let token = token::canonicalize(&raw).unwrap_or_else(|| raw.to_lowercase().replace('-', ""));
        let metadata = TokenRecord::parse_metadata(Self::text_column(row, "metadata").as_deref());
        let created_at: i64 = row
            .try_get("create_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let last_use: i64 = row
            .try_get("last_use")
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(TokenRecord {
            token,
            userid,
            metadata,
            created_at,
            last_use,
        })
    }
}

fn map_insert_error(token: &str, e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            StorageError::Duplicate(token.to_string())
        }
        other => StorageError::Backend(other.to_string()),
    }
}

#[async_trait]
impl ArchiveStore for SqlStore {
    async fn insert(&self, record: &TokenRecord) -> Result<(), StorageError> {
        let token = token::canonicalize(&record.token)
            .ok_or_else(|| StorageError::MalformedToken(record.token.clone()))?;
        let metadata = record.metadata_json();

        retry("sql_insert", &self.retry, || async {
            sqlx::query(&self.stmts.insert)
                .bind(&token)
                .bind(record.userid)
                .bind(&metadata)
                .bind(record.created_at)
                .bind(record.last_use)
                .execute(&self.pool)
                .await
                .map_err(|e| map_insert_error(&token, e))?;
            Ok(())
        })
        .await
    }

    async fn update_last_use(&self, token: &str, last_use: i64) -> Result<(), StorageError> {
        // Nothing can match a malformed token; same as a missing row
        let Some(token) = token::canonicalize(token) else {
            return Ok(());
        };

        retry("sql_update_last_use", &self.retry, || async {
            sqlx::query(&self.stmts.update_last_use)
                .bind(last_use)
                .bind(&token)
                .bind(last_use)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn lookup(&self, token: &str, not_before: Option<i64>) -> Result<UserId, StorageError> {
        let Some(token) = token::canonicalize(token) else {
            return Ok(NO_USER);
        };

        let row = retry("sql_lookup", &self.retry, || async {
            let query = match not_before {
                Some(nb) => sqlx::query(&self.stmts.lookup_not_before).bind(&token).bind(nb),
                None => sqlx::query(&self.stmts.lookup).bind(&token),
            };
            query
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        match row {
            Some(row) => row
                .try_get::<i64, _>("userid")
                .map_err(|e| StorageError::Backend(e.to_string())),
            None => Ok(NO_USER),
        }
    }

    async fn delete(&self, token: &str) -> Result<(), StorageError> {
        let Some(token) = token::canonicalize(token) else {
            return Ok(());
        };

        retry("sql_delete", &self.retry, || async {
            sqlx::query(&self.stmts.delete)
                .bind(&token)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn list_by_user(&self, userid: UserId) -> Result<Vec<TokenRecord>, StorageError> {
        let rows = retry("sql_list_by_user", &self.retry, || async {
            sqlx::query(&self.stmts.list_by_user)
                .bind(userid)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        rows.iter()
            .map(|row| Self::record_from_row(row, userid))
            .collect()
    }

    async fn delete_expired(&self, cutoff: i64) -> Result<u64, StorageError> {
        let result = retry("sql_delete_expired", &self.retry, || async {
            sqlx::query(&self.stmts.delete_expired)
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        Ok(result.rows_affected())
    }
}
