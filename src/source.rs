//! # Connected database
//!
//! The relational database the user is asking questions about. Two dialects
//! are supported, PostgreSQL and MySQL, each behind its own bounded sqlx pool.
//!
//! Everything above this module talks to the database through the
//! [`SourceDatabase`] trait:
//!
//! - [`SourceDatabase::fetch_table_rows`] reads column metadata from
//!   `information_schema` (base tables of the active schema only).
//! - [`SourceDatabase::execute_unchecked`] runs SQL produced by the model,
//!   verbatim. Nothing is parsed, rewritten or restricted here; point the
//!   configured credentials at a read-only role if that matters.
//!
//! Result rows are fetched over the text protocol and turned into JSON objects
//! keyed by column name. Integer, floating point, boolean and JSON columns become
//! the matching JSON types; everything else (including `NUMERIC`, dates and
//! times) stays a string, and SQL `NULL` becomes `null`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use sqlx::{
    Column, Database, Decode, Row, TypeInfo,
    mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions},
    postgres::{PgConnectOptions, PgPool, PgPoolOptions},
};
use tracing::{debug, info};

use crate::{
    config::SourceConfig,
    error::{DbaiError, Result},
    snapshot::TableRow,
};

const POSTGRES_STRUCTURE_SQL: &str = "
    SELECT
        t.table_name::text AS table_name,
        c.column_name::text AS column_name,
        c.data_type::text AS data_type
    FROM information_schema.tables t
    JOIN information_schema.columns c
        ON t.table_name = c.table_name AND t.table_schema = c.table_schema
    WHERE t.table_schema = current_schema()
        AND t.table_type = 'BASE TABLE'
    ORDER BY t.table_name, c.ordinal_position
";

const MYSQL_STRUCTURE_SQL: &str = "
    SELECT
        CAST(t.table_name AS CHAR) AS table_name,
        CAST(c.column_name AS CHAR) AS column_name,
        CAST(c.data_type AS CHAR) AS data_type
    FROM information_schema.tables t
    JOIN information_schema.columns c
        ON t.table_name = c.table_name AND t.table_schema = c.table_schema
    WHERE t.table_schema = ?
        AND t.table_type = 'BASE TABLE'
    ORDER BY t.table_name, c.ordinal_position
";

/// SQL dialect of the connected database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Mysql,
}

impl Dialect {
    /// `postgres` selects PostgreSQL; any other value is treated as MySQL.
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("postgres") {
            Dialect::Postgres
        } else {
            Dialect::Mysql
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
        }
    }
}

/// Access to the connected database.
#[async_trait]
pub trait SourceDatabase: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Configured database name, `None` when unset.
    fn database_name(&self) -> Option<&str>;

    /// One row per column of every base table, ordered by table name then
    /// column position. Descriptions are always `None`.
    async fn fetch_table_rows(&self) -> Result<Vec<TableRow>>;

    /// Execute arbitrary SQL exactly as given and return its rows as JSON objects.
    async fn execute_unchecked(&self, sql: &str) -> Result<Vec<Map<String, Value>>>;
}

#[derive(Clone)]
enum SourcePool {
    Postgres(PgPool),
    Mysql(MySqlPool),
}

/// [`SourceDatabase`] backed by a lazily connecting sqlx pool.
#[derive(Clone)]
pub struct SqlxSource {
    pool: SourcePool,
    database: String,
}

impl SqlxSource {
    /// Build the pool described by `config`. No connection is opened until the
    /// first statement runs.
    ///
    /// # Errors
    /// [`DbaiError::Configuration`] when no database name is configured.
    pub fn connect_lazy(config: &SourceConfig) -> Result<Self> {
        let database = config
            .database
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| DbaiError::Configuration("DB_NAME is not set".to_string()))?;

        let dialect = Dialect::from_name(&config.dialect);
        let idle_timeout = Duration::from_secs(config.idle_timeout_secs);
        let acquire_timeout = Duration::from_secs(config.acquire_timeout_secs);

        let pool = match dialect {
            Dialect::Postgres => {
                let mut options = PgConnectOptions::new()
                    .host(&config.host)
                    .port(config.port)
                    .database(&database);
                if let Some(username) = &config.username {
                    options = options.username(username);
                }
                if let Some(password) = &config.password {
                    options = options.password(password);
                }

                SourcePool::Postgres(
                    PgPoolOptions::new()
                        .max_connections(config.max_connections)
                        .idle_timeout(idle_timeout)
                        .acquire_timeout(acquire_timeout)
                        .connect_lazy_with(options),
                )
            }
            Dialect::Mysql => {
                let mut options = MySqlConnectOptions::new()
                    .host(&config.host)
                    .port(config.port)
                    .database(&database);
                if let Some(username) = &config.username {
                    options = options.username(username);
                }
                if let Some(password) = &config.password {
                    options = options.password(password);
                }

                SourcePool::Mysql(
                    MySqlPoolOptions::new()
                        .max_connections(config.max_connections)
                        .idle_timeout(idle_timeout)
                        .acquire_timeout(acquire_timeout)
                        .connect_lazy_with(options),
                )
            }
        };

        info!(
            "Source database configured: {} {}:{}/{} (max {} connections)",
            dialect.as_str(),
            config.host,
            config.port,
            database,
            config.max_connections
        );

        Ok(Self { pool, database })
    }
}

#[async_trait]
impl SourceDatabase for SqlxSource {
    fn dialect(&self) -> Dialect {
        match self.pool {
            SourcePool::Postgres(_) => Dialect::Postgres,
            SourcePool::Mysql(_) => Dialect::Mysql,
        }
    }

    fn database_name(&self) -> Option<&str> {
        Some(&self.database)
    }

    async fn fetch_table_rows(&self) -> Result<Vec<TableRow>> {
        let rows: Vec<(String, String, String)> = match &self.pool {
            SourcePool::Postgres(pool) => {
                sqlx::query_as(POSTGRES_STRUCTURE_SQL).fetch_all(pool).await?
            }
            SourcePool::Mysql(pool) => {
                sqlx::query_as(MYSQL_STRUCTURE_SQL)
                    .bind(&self.database)
                    .fetch_all(pool)
                    .await?
            }
        };

        debug!("Fetched {} columns from information_schema", rows.len());

        Ok(rows
            .into_iter()
            .map(|(table_name, column_name, data_type)| TableRow {
                table_name,
                column_name,
                data_type,
                description: None,
            })
            .collect())
    }

    async fn execute_unchecked(&self, sql: &str) -> Result<Vec<Map<String, Value>>> {
        debug!("Executing model generated SQL ({} chars)", sql.len());

        match &self.pool {
            SourcePool::Postgres(pool) => {
                let rows = sqlx::raw_sql(sql).fetch_all(pool).await?;
                rows.iter().map(row_to_json).collect()
            }
            SourcePool::Mysql(pool) => {
                let rows = sqlx::raw_sql(sql).fetch_all(pool).await?;
                rows.iter().map(row_to_json).collect()
            }
        }
    }
}

/// Convert one text-protocol row into a JSON object keyed by column name.
fn row_to_json<R>(row: &R) -> Result<Map<String, Value>>
where
    R: Row,
    usize: sqlx::ColumnIndex<R>,
    for<'r> Option<String>: Decode<'r, R::Database>,
    <R::Database as Database>::Column: Column,
{
    let mut object = Map::with_capacity(row.columns().len());

    for (index, column) in row.columns().iter().enumerate() {
        let raw: Option<String> = row.try_get_unchecked(index)?;
        object.insert(
            column.name().to_string(),
            coerce_text(column.type_info().name(), raw),
        );
    }

    Ok(object)
}

/// Turn a column value received as text into the closest JSON value.
fn coerce_text(type_name: &str, raw: Option<String>) -> Value {
    let Some(text) = raw else {
        return Value::Null;
    };

    match type_name.trim_end_matches(" UNSIGNED") {
        "INT2" | "INT4" | "INT8" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            if let Ok(n) = text.parse::<i64>() {
                Value::from(n)
            } else if let Ok(n) = text.parse::<u64>() {
                Value::from(n)
            } else {
                Value::String(text)
            }
        }
        "FLOAT4" | "FLOAT8" | "FLOAT" | "DOUBLE" => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(text)),
        "BOOL" | "BOOLEAN" => match text.as_str() {
            "t" | "true" | "1" => Value::Bool(true),
            "f" | "false" | "0" => Value::Bool(false),
            _ => Value::String(text),
        },
        "JSON" | "JSONB" => match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => Value::String(text),
        },
        _ => Value::String(text),
    }
}
