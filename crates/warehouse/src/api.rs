//! SQL API v2 wire types and response classification.

use serde::{Deserialize, Serialize};

use crate::WarehouseError;

/// Body of `POST /api/v2/statements`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct StatementRequest<'a> {
    pub statement: &'a str,
    /// Server-side timeout in seconds.
    pub timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'a str>,
}

/// One entry of `resultSetMetaData.rowType`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnType {
    /// Column name as returned by the query.
    pub name: String,
    /// Snowflake type, e.g. `fixed`, `text`, `timestamp_ntz`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Digits after the decimal point for `fixed` columns.
    #[serde(default)]
    pub scale: Option<i64>,
}

impl ColumnType {
    /// Convenience constructor, mostly for tests.
    pub fn new(name: impl Into<String>, kind: impl Into<String>, scale: Option<i64>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            scale,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResultSetMetaData {
    #[serde(default)]
    pub num_rows: u64,
    #[serde(default)]
    pub row_type: Vec<ColumnType>,
    #[serde(default)]
    pub partition_info: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatementResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub statement_handle: Option<String>,
    #[serde(default)]
    pub result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    pub data: Vec<Vec<Option<String>>>,
}

/// What a statement endpoint answered.
#[derive(Debug)]
pub(crate) enum StatementOutcome {
    /// `200`: results (or one partition of them) are in the body.
    Complete(StatementResponse),
    /// `202`: still executing; poll the handle.
    Running { handle: String },
}

/// Interprets a status code and body from any statement endpoint.
pub(crate) fn classify(status: u16, body: &str) -> Result<StatementOutcome, WarehouseError> {
    match status {
        200 => parse(body).map(StatementOutcome::Complete),
        202 => {
            let response = parse(body)?;
            let handle = response
                .statement_handle
                .ok_or_else(|| WarehouseError::Decode {
                    message: "202 response without statementHandle".to_string(),
                })?;
            Ok(StatementOutcome::Running { handle })
        }
        _ => {
            let parsed = serde_json::from_str::<StatementResponse>(body).ok();
            let code = parsed.as_ref().and_then(|r| r.code.clone());
            let message = parsed
                .and_then(|r| r.message)
                .unwrap_or_else(|| body.trim().chars().take(200).collect());
            Err(WarehouseError::Rejected {
                status,
                code,
                message,
            })
        }
    }
}

fn parse(body: &str) -> Result<StatementResponse, WarehouseError> {
    serde_json::from_str(body).map_err(|e| WarehouseError::Decode {
        message: e.to_string(),
    })
}

/// Builds `https://<account>.snowflakecomputing.com` unless `account` is
/// already a URL.
pub fn account_base_url(account: &str) -> String {
    let account = account.trim().trim_end_matches('/');
    if account.starts_with("http://") || account.starts_with("https://") {
        account.to_string()
    } else {
        format!("https://{account}.snowflakecomputing.com")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_response_carries_row_type_and_partitions() {
        let body = r#"{
            "code": "090001",
            "statementHandle": "01b2-0000",
            "resultSetMetaData": {
                "numRows": 3,
                "format": "jsonv2",
                "rowType": [
                    {"name": "ID", "type": "fixed", "scale": 0, "nullable": false},
                    {"name": "TICKER", "type": "text", "nullable": true}
                ],
                "partitionInfo": [{"rowCount": 2}, {"rowCount": 1}]
            },
            "data": [["1", "MSFT"], ["2", null]]
        }"#;

        let StatementOutcome::Complete(r) = classify(200, body).unwrap() else {
            panic!("expected complete");
        };
        let meta = r.result_set_meta_data.unwrap();
        assert_eq!(meta.num_rows, 3);
        assert_eq!(meta.row_type[0], ColumnType::new("ID", "fixed", Some(0)));
        assert_eq!(meta.partition_info.len(), 2);
        assert_eq!(r.data[1], vec![Some("2".to_string()), None]);
    }

    #[test]
    fn accepted_response_yields_handle() {
        let body = r#"{"code":"333334","message":"Asynchronous execution in progress.","statementHandle":"01b2-0001","statementStatusUrl":"/api/v2/statements/01b2-0001"}"#;
        assert!(matches!(
            classify(202, body).unwrap(),
            StatementOutcome::Running { handle } if handle == "01b2-0001"
        ));
    }

    #[test]
    fn error_body_message_is_surfaced() {
        let body = r#"{"code":"002003","message":"Object 'PAC' does not exist.","sqlState":"02000"}"#;
        match classify(422, body) {
            Err(WarehouseError::Rejected {
                status,
                code,
                message,
            }) => {
                assert_eq!(status, 422);
                assert_eq!(code.as_deref(), Some("002003"));
                assert_eq!(message, "Object 'PAC' does not exist.");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_json_error_body_is_kept_verbatim() {
        assert!(matches!(
            classify(503, "Service Unavailable"),
            Err(WarehouseError::Rejected { message, .. }) if message == "Service Unavailable"
        ));
    }

    #[test]
    fn request_omits_unset_context() {
        let request = StatementRequest {
            statement: "SELECT 1",
            timeout: 60,
            warehouse: Some("COMPUTE_WH"),
            database: None,
            schema: None,
            role: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"statement": "SELECT 1", "timeout": 60, "warehouse": "COMPUTE_WH"})
        );
    }

    #[test]
    fn account_identifier_becomes_host() {
        assert_eq!(
            account_base_url("xy12345.us-east-1"),
            "https://xy12345.us-east-1.snowflakecomputing.com"
        );
        assert_eq!(
            account_base_url("https://acme.snowflakecomputing.com/"),
            "https://acme.snowflakecomputing.com"
        );
    }
}
