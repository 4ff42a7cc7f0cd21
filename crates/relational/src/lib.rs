//! firesync MySQL row source.
//!
//! [`MySqlSource`] reads every row of one table and implements
//! [`transfer::RowSource`]. When the database is only reachable from a
//! bastion host, an [`SshTunnel`] forwards a local port to it for the
//! lifetime of the run.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** sqlx and process management stay inside this crate.
//!
//! ## Value decoding
//!
//! Cells are decoded by their MySQL column type:
//!
//! | Column type                         | Field value          |
//! |-------------------------------------|----------------------|
//! | `BOOLEAN`, `TINYINT(1)`             | `Bool`               |
//! | integer types, `YEAR`, `BIT`        | `Integer`            |
//! | `FLOAT`, `DOUBLE`, `DECIMAL`        | `Float`              |
//! | `DATETIME`, `TIMESTAMP`             | `Timestamp` (UTC)    |
//! | `DATE`, `TIME`, character types     | `Text`               |
//! | `JSON`                              | `Json`               |
//! | binary types                        | `Text` (must be UTF-8) |
//!
//! Unsigned values above `i64::MAX` become text. `DECIMAL` cells keep the
//! server's text for key resolution. A row with a cell that fails to decode
//! is rejected as `RowDefect::MalformedValue` and counted as skipped.

mod mysql;
mod tunnel;

pub use mysql::{ColumnInfo, MySqlConfig, MySqlSource, RelationalError, TableName};
pub use tunnel::{SshTunnel, TunnelAuth, TunnelConfig, TunnelError};
