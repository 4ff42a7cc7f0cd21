//! MySQL row source.

use std::fmt::Display;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::types::JsonValue;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use thiserror::Error;
use transfer::{
    FieldValue, Row, RowDefect, RowSource, SkippedRow, SourceBatch, SourceError, Timestamp,
};

use crate::tunnel::{SshTunnel, TunnelConfig, TunnelError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the MySQL source.
#[derive(Debug, Error)]
pub enum RelationalError {
    /// The tunnel could not be established.
    #[error("ssh tunnel failed: {0}")]
    Tunnel(#[from] TunnelError),

    /// The database refused the connection or the credentials.
    #[error("cannot connect to mysql database '{database}': {source}")]
    Connect {
        /// Database name.
        database: String,
        /// Underlying error.
        #[source]
        source: sqlx::Error,
    },

    /// A query failed.
    #[error("query `{statement}` failed: {source}")]
    Query {
        /// The statement that failed.
        statement: String,
        /// Underlying error.
        #[source]
        source: sqlx::Error,
    },

    /// The source was used after [`RowSource::close`].
    #[error("connection already closed")]
    Closed,
}

impl From<RelationalError> for SourceError {
    fn from(e: RelationalError) -> Self {
        match e {
            RelationalError::Tunnel(_) | RelationalError::Connect { .. } => {
                SourceError::Unavailable {
                    message: e.to_string(),
                }
            }
            RelationalError::Query { .. } | RelationalError::Closed => SourceError::ReadFailed {
                message: e.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// A table name safe to interpolate into SQL.
///
/// Letters, digits, `_` and `$` only; quoted with backticks when rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    /// Returns `None` if `name` is empty or contains other characters.
    pub fn new(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 64
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
        valid.then_some(Self(name))
    }

    /// Returns the bare name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the backtick-quoted identifier.
    pub fn quoted(&self) -> String {
        format!("`{}`", self.0)
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection settings of a [`MySqlSource`].
///
/// When a tunnel is used, `host` and `port` are ignored in favour of the
/// tunnel's local end.
#[derive(Clone, PartialEq, Eq)]
pub struct MySqlConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database (schema) name.
    pub database: String,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: Option<String>,
    /// Table to read.
    pub table: TableName,
}

impl std::fmt::Debug for MySqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("table", &self.table)
            .finish()
    }
}

/// One row of `SHOW COLUMNS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared SQL type, e.g. `varchar(255)`.
    pub sql_type: String,
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Reads every row of one MySQL table, optionally through an SSH tunnel.
///
/// Holds a single pooled connection and the tunnel for the lifetime of the
/// run; [`RowSource::close`] releases both.
#[derive(Debug)]
pub struct MySqlSource {
    pool: Option<MySqlPool>,
    tunnel: Option<SshTunnel>,
    database: String,
    table: TableName,
}

impl MySqlSource {
    /// Opens the tunnel (if configured) and connects.
    ///
    /// Fails before any data is read if the tunnel or the database is
    /// unreachable; a tunnel opened here is closed again on failure.
    #[tracing::instrument(level = "info", skip_all, fields(database = %config.database, table = %config.table))]
    pub async fn connect(
        config: MySqlConfig,
        tunnel: Option<TunnelConfig>,
    ) -> Result<Self, RelationalError> {
        let mut tunnel = match tunnel {
            Some(t) => Some(SshTunnel::open(&t).await?),
            None => None,
        };

        let (host, port) = match &tunnel {
            Some(t) => ("127.0.0.1".to_string(), t.local_port()),
            None => (config.host.clone(), config.port),
        };

        let mut options = MySqlConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&config.user)
            .database(&config.database)
            .charset("utf8mb4");
        if let Some(password) = &config.password {
            options = options.password(password);
        }

        let pool = match MySqlPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
        {
            Ok(pool) => pool,
            Err(source) => {
                if let Some(t) = tunnel.as_mut() {
                    t.close().await;
                }
                return Err(RelationalError::Connect {
                    database: config.database,
                    source,
                });
            }
        };

        tracing::info!(%host, port, "mysql connection established");
        Ok(Self {
            pool: Some(pool),
            tunnel,
            database: config.database,
            table: config.table,
        })
    }

    /// Lists the table's columns in declaration order.
    pub async fn describe(&self) -> Result<Vec<ColumnInfo>, RelationalError> {
        let pool = self.pool.as_ref().ok_or(RelationalError::Closed)?;
        let statement = format!("SHOW COLUMNS FROM {}", self.table.quoted());
        let rows = sqlx::query(&statement)
            .fetch_all(pool)
            .await
            .map_err(|source| RelationalError::Query {
                statement: statement.clone(),
                source,
            })?;

        Ok(rows
            .iter()
            .map(|r| ColumnInfo {
                name: text_cell(r, "Field"),
                sql_type: text_cell(r, "Type"),
            })
            .collect())
    }

    async fn read_all(&self) -> Result<SourceBatch, RelationalError> {
        let columns = self.describe().await?;
        for c in &columns {
            tracing::debug!(column = %c.name, sql_type = %c.sql_type, "table column");
        }

        let pool = self.pool.as_ref().ok_or(RelationalError::Closed)?;
        let statement = format!("SELECT * FROM {}", self.table.quoted());
        let rows = sqlx::query(&statement)
            .fetch_all(pool)
            .await
            .map_err(|source| RelationalError::Query {
                statement: statement.clone(),
                source,
            })?;

        let mut batch = SourceBatch {
            columns: columns.into_iter().map(|c| c.name).collect(),
            ..SourceBatch::default()
        };
        for (i, r) in rows.iter().enumerate() {
            let position = i + 1;
            match decode_row(r, position) {
                Ok(row) => batch.rows.push(row),
                Err(reason) => {
                    tracing::warn!(position, %reason, "row not decodable");
                    batch.rejected.push(SkippedRow { position, reason });
                }
            }
        }
        Ok(batch)
    }
}

#[async_trait]
impl RowSource for MySqlSource {
    fn label(&self) -> String {
        format!("mysql:{}.{}", self.database, self.table)
    }

    #[tracing::instrument(level = "info", skip(self), fields(table = %self.table))]
    async fn fetch(&mut self) -> Result<SourceBatch, SourceError> {
        let batch = self.read_all().await?;
        tracing::info!(rows = batch.rows.len(), columns = batch.columns.len(), "table read");
        Ok(batch)
    }

    async fn close(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            tracing::info!("mysql connection closed");
        }
        if let Some(mut tunnel) = self.tunnel.take() {
            tunnel.close().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn text_cell(row: &MySqlRow, column: &str) -> String {
    row.try_get_unchecked::<String, _>(column)
        .or_else(|_| {
            row.try_get_unchecked::<Vec<u8>, _>(column)
                .map(|b| String::from_utf8_lossy(&b).into_owned())
        })
        .unwrap_or_default()
}

/// Why a single cell could not be decoded.
#[derive(Debug, Error)]
enum CellError {
    #[error(transparent)]
    Decode(#[from] sqlx::Error),

    #[error("{len} bytes of binary data are not valid UTF-8")]
    NotUtf8 { len: usize },
}

/// A decoded value, plus the server's text for it when the value is a
/// conversion of that text.
type Cell = (FieldValue, Option<String>);

fn decode_row(row: &MySqlRow, position: usize) -> Result<Row, RowDefect> {
    let cells = row.columns().iter().map(|col| {
        let idx = col.ordinal();
        let is_null = row.try_get_raw(idx).map(|raw| raw.is_null()).unwrap_or(true);
        let cell = if is_null {
            Ok((FieldValue::Null, None))
        } else {
            let sql_type = col.type_info().name().to_ascii_uppercase();
            decode_cell(row, idx, &sql_type)
        };
        (col.name().to_string(), cell)
    });
    assemble_row(position, cells)
}

/// Builds a row from decoded cells; the first undecodable cell rejects it.
fn assemble_row<E: Display>(
    position: usize,
    cells: impl IntoIterator<Item = (String, Result<Cell, E>)>,
) -> Result<Row, RowDefect> {
    let mut row = Row::new(position, std::iter::empty::<(String, FieldValue)>());
    for (column, cell) in cells {
        match cell {
            Ok((value, text)) => {
                if let Some(text) = text {
                    row.source_text.insert(column.clone(), text);
                }
                row.fields.insert(column, value);
            }
            Err(e) => {
                return Err(RowDefect::MalformedValue {
                    column,
                    message: e.to_string(),
                })
            }
        }
    }
    Ok(row)
}

fn decode_cell(row: &MySqlRow, idx: usize, sql_type: &str) -> Result<Cell, CellError> {
    let value = match sql_type {
        "BOOLEAN" => FieldValue::Bool(row.try_get_unchecked::<bool, _>(idx)?),
        t if t.ends_with(" UNSIGNED") => {
            let u = row.try_get_unchecked::<u64, _>(idx)?;
            i64::try_from(u)
                .map(FieldValue::Integer)
                .unwrap_or_else(|_| FieldValue::Text(u.to_string()))
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            FieldValue::Integer(row.try_get_unchecked::<i64, _>(idx)?)
        }
        "FLOAT" => {
            let f = row.try_get_unchecked::<f32, _>(idx)?;
            // Round-trip through the shortest f32 rendering to avoid 0.1 → 0.10000000149.
            FieldValue::Float(f.to_string().parse::<f64>().unwrap_or(f64::from(f)))
        }
        "DOUBLE" => FieldValue::Float(row.try_get_unchecked::<f64, _>(idx)?),
        "DECIMAL" => return Ok(decimal_cell(row.try_get_unchecked::<String, _>(idx)?)),
        "DATETIME" => {
            let dt = row.try_get_unchecked::<NaiveDateTime, _>(idx)?;
            FieldValue::Timestamp(Timestamp::from_utc(dt.and_utc()))
        }
        "TIMESTAMP" => {
            FieldValue::Timestamp(Timestamp::from_utc(row.try_get_unchecked::<DateTime<Utc>, _>(idx)?))
        }
        "DATE" => FieldValue::Text(row.try_get_unchecked::<NaiveDate, _>(idx)?.to_string()),
        "TIME" => FieldValue::Text(row.try_get_unchecked::<NaiveTime, _>(idx)?.to_string()),
        "JSON" => FieldValue::Json(row.try_get_unchecked::<JsonValue, _>(idx)?),
        "BIT" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx)?;
            FieldValue::Integer(bits_to_i64(&bytes))
        }
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "GEOMETRY" => {
            blob_text(row.try_get_unchecked::<Vec<u8>, _>(idx)?)?
        }
        _ => FieldValue::Text(row.try_get_unchecked::<String, _>(idx)?),
    };
    Ok((value, None))
}

/// `DECIMAL` arrives as text. Numbers keep that text for key resolution.
fn decimal_cell(text: String) -> Cell {
    match text.parse::<f64>() {
        Ok(f) => (FieldValue::Float(f), Some(text)),
        Err(_) => (FieldValue::Text(text), None),
    }
}

fn blob_text(bytes: Vec<u8>) -> Result<FieldValue, CellError> {
    let len = bytes.len();
    String::from_utf8(bytes)
        .map(FieldValue::Text)
        .map_err(|_| CellError::NotUtf8 { len })
}

/// Big-endian `BIT(n)` payload as an integer; widths above 63 bits saturate.
fn bits_to_i64(bytes: &[u8]) -> i64 {
    let v = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    i64::try_from(v).unwrap_or(i64::MAX)
}
