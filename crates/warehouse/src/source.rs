//! [`SnowflakeSource`]: runs one query through the SQL API and reads every
//! result partition.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use transfer::{FieldValue, Row, RowSource, SourceBatch, SourceError};

use crate::api::{self, StatementOutcome, StatementRequest, StatementResponse};
use crate::{convert_cell, ColumnType, WarehouseError};

const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Settings of a [`SnowflakeSource`].
#[derive(Clone, PartialEq, Eq)]
pub struct SnowflakeConfig {
    /// Account identifier (`xy12345.us-east-1`) or full account URL.
    pub account: String,
    /// Bearer token.
    pub token: String,
    /// Value of the token-type header, e.g. `PROGRAMMATIC_ACCESS_TOKEN`.
    pub token_type: String,
    /// Virtual warehouse to run on.
    pub warehouse: Option<String>,
    /// Default database.
    pub database: Option<String>,
    /// Default schema.
    pub schema: Option<String>,
    /// Role to assume.
    pub role: Option<String>,
    /// The query whose result set is transferred.
    pub query: String,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// How long to wait for the statement, including polling.
    pub statement_timeout: Duration,
}

impl SnowflakeConfig {
    /// Programmatic-access-token auth, 60 s HTTP timeout, 10 min statement budget.
    pub fn new(account: impl Into<String>, token: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            token: token.into(),
            token_type: "PROGRAMMATIC_ACCESS_TOKEN".to_string(),
            warehouse: None,
            database: None,
            schema: None,
            role: None,
            query: query.into(),
            http_timeout: Duration::from_secs(60),
            statement_timeout: Duration::from_secs(600),
        }
    }
}

impl std::fmt::Debug for SnowflakeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeConfig")
            .field("account", &self.account)
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("role", &self.role)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

/// Runs one query through the Snowflake SQL API and yields its result set.
#[derive(Debug, Clone)]
pub struct SnowflakeSource {
    client: Client,
    base_url: String,
    config: SnowflakeConfig,
}

impl SnowflakeSource {
    /// Builds the HTTP client. No request is made until [`RowSource::fetch`].
    pub fn new(config: SnowflakeConfig) -> Result<Self, WarehouseError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(WarehouseError::Client)?;
        Ok(Self {
            client,
            base_url: api::account_base_url(&config.account),
            config,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.config.token)
            .header(TOKEN_TYPE_HEADER, &self.config.token_type)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("firesync/", env!("CARGO_PKG_VERSION")))
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<StatementOutcome, WarehouseError> {
        let transport = |source| WarehouseError::Transport {
            url: url.to_string(),
            source,
        };
        let response = self.authorized(request).send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport)?;
        api::classify(status, &body)
    }

    async fn submit(&self) -> Result<StatementOutcome, WarehouseError> {
        let url = format!("{}/api/v2/statements", self.base_url);
        let body = StatementRequest {
            statement: &self.config.query,
            timeout: self.config.statement_timeout.as_secs(),
            warehouse: self.config.warehouse.as_deref(),
            database: self.config.database.as_deref(),
            schema: self.config.schema.as_deref(),
            role: self.config.role.as_deref(),
        };
        self.send(&url, self.client.post(&url).json(&body)).await
    }

    async fn poll(&self, handle: &str, partition: Option<usize>) -> Result<StatementOutcome, WarehouseError> {
        let url = format!("{}/api/v2/statements/{handle}", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(p) = partition {
            request = request.query(&[("partition", p)]);
        }
        self.send(&url, request).await
    }

    /// Submits the statement and waits for its first partition.
    async fn execute(&self) -> Result<StatementResponse, WarehouseError> {
        let deadline = tokio::time::Instant::now() + self.config.statement_timeout;
        let mut outcome = self.submit().await?;
        loop {
            match outcome {
                StatementOutcome::Complete(response) => return Ok(response),
                StatementOutcome::Running { handle } => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(WarehouseError::Timeout {
                            handle,
                            after: self.config.statement_timeout,
                        });
                    }
                    tracing::debug!(%handle, "statement still running");
                    tokio::time::sleep(POLL_INTERVAL).await;
                    outcome = self.poll(&handle, None).await?;
                }
            }
        }
    }

    async fn read_all(&self) -> Result<SourceBatch, WarehouseError> {
        let first = self.execute().await?;
        let meta = first
            .result_set_meta_data
            .clone()
            .ok_or_else(|| WarehouseError::Decode {
                message: "result without resultSetMetaData".to_string(),
            })?;
        let handle = first.statement_handle.clone().unwrap_or_default();

        let mut data = first.data;
        for partition in 1..meta.partition_info.len() {
            match self.poll(&handle, Some(partition)).await? {
                StatementOutcome::Complete(page) => data.extend(page.data),
                StatementOutcome::Running { handle } => {
                    return Err(WarehouseError::Decode {
                        message: format!("partition {partition} of {handle} not ready"),
                    })
                }
            }
        }

        tracing::info!(
            %handle,
            rows = data.len(),
            expected = meta.num_rows,
            partitions = meta.partition_info.len().max(1),
            "query result received"
        );
        Ok(to_batch(&meta.row_type, data))
    }
}

/// Builds a batch from the column types and raw cell strings.
fn to_batch(columns: &[ColumnType], data: Vec<Vec<Option<String>>>) -> SourceBatch {
    let rows = data
        .into_iter()
        .enumerate()
        .map(|(i, cells)| {
            let mut row = Row::new(i + 1, std::iter::empty::<(String, FieldValue)>());
            for (column, raw) in columns.iter().zip(cells) {
                let value = convert_cell(column, raw.as_deref());
                let converted = !matches!(value, FieldValue::Null | FieldValue::Text(_));
                if let Some(raw) = raw.filter(|_| converted) {
                    row.source_text.insert(column.name.clone(), raw);
                }
                row.fields.insert(column.name.clone(), value);
            }
            row
        })
        .collect();
    SourceBatch {
        columns: columns.iter().map(|c| c.name.clone()).collect(),
        rows,
        rejected: Vec::new(),
    }
}

#[async_trait]
impl RowSource for SnowflakeSource {
    fn label(&self) -> String {
        format!("snowflake:{}", self.config.account)
    }

    #[tracing::instrument(level = "info", skip(self), fields(account = %self.config.account))]
    async fn fetch(&mut self) -> Result<SourceBatch, SourceError> {
        Ok(self.read_all().await?)
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_keeps_column_order_and_positions() {
        let columns = vec![
            ColumnType::new("ID", "fixed", Some(0)),
            ColumnType::new("TICKER", "text", None),
        ];
        let data = vec![
            vec![Some("1".to_string()), Some("MSFT".to_string())],
            vec![None, Some("NVDA".to_string())],
        ];

        let batch = to_batch(&columns, data);

        assert_eq!(batch.columns, ["ID", "TICKER"]);
        assert_eq!(batch.rows[0].fields["ID"], FieldValue::Integer(1));
        assert_eq!(batch.rows[1].fields["ID"], FieldValue::Null);
        assert_eq!(batch.rows[1].position, 2);
    }

    #[test]
    fn wide_number_ids_keep_their_digits() {
        let columns = vec![ColumnType::new("ID", "fixed", Some(0))];
        let data = vec![
            vec![Some("12345678901234567890".to_string())],
            vec![Some("12345678901234567891".to_string())],
        ];

        let batch = to_batch(&columns, data);
        let mapped = transfer::RecordMapper::default().map_batch(batch);

        let keys: Vec<&str> = mapped.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["12345678901234567890", "12345678901234567891"]);
    }

    #[test]
    fn token_is_redacted_in_debug_output() {
        let config = SnowflakeConfig::new("acme", "pat-secret", "SELECT 1");
        assert!(!format!("{config:?}").contains("pat-secret"));
    }

    #[test]
    fn label_names_the_account() {
        let source = SnowflakeSource::new(SnowflakeConfig::new("acme", "t", "SELECT 1")).unwrap();
        assert_eq!(source.label(), "snowflake:acme");
        assert_eq!(source.base_url, "https://acme.snowflakecomputing.com");
    }

    #[tokio::test]
    async fn unreachable_account_is_unavailable() {
        let mut config = SnowflakeConfig::new("http://127.0.0.1:9", "t", "SELECT 1");
        config.http_timeout = Duration::from_secs(2);
        let mut source = SnowflakeSource::new(config).unwrap();

        let err = source.fetch().await.unwrap_err();

        assert!(matches!(err, SourceError::Unavailable { .. }));
    }
}
