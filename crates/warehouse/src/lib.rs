//! firesync Snowflake row source.
//!
//! [`SnowflakeSource`] runs a single query through the Snowflake SQL API v2
//! and implements [`transfer::RowSource`] over its result set.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, statement polling, partition paging,
//! and cell conversion live here. The [`transfer`] crate sees only
//! [`transfer::RowSource`].
//!
//! ## Protocol
//!
//! 1. `POST /api/v2/statements` with the query and session context.
//! 2. While the API answers `202 Accepted`, poll
//!    `GET /api/v2/statements/{handle}`.
//! 3. The `200` body holds the first partition; further partitions are read
//!    with `?partition=N`.
//!
//! Authentication is a bearer token whose kind is named by the
//! `X-Snowflake-Authorization-Token-Type` header (programmatic access token,
//! OAuth, or key-pair JWT).

mod api;
mod cells;
mod error;
mod source;

pub use api::{account_base_url, ColumnType};
pub use cells::convert_cell;
pub use error::WarehouseError;
pub use source::{SnowflakeConfig, SnowflakeSource};
