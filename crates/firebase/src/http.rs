//! Response handling shared by both sinks.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, Response};

use crate::FirebaseError;

/// Sends `request` and returns the body of a 2xx response.
///
/// `url` is only used in error messages and must not carry credentials.
pub(crate) async fn send(url: &str, request: RequestBuilder) -> Result<String, FirebaseError> {
    let transport = |source| FirebaseError::Transport {
        url: url.to_string(),
        source,
    };
    let response = request.send().await.map_err(transport)?;
    let status = response.status().as_u16();
    let retry_after = retry_after(&response);
    let body = response.text().await.map_err(transport)?;
    if (200..300).contains(&status) {
        Ok(body)
    } else {
        Err(FirebaseError::Status {
            status,
            message: error_message(&body),
            retry_after,
        })
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

/// Delay-seconds form only; HTTP dates fall back to the caller's back-off.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Extracts the error text from a Realtime Database (`{"error": "..."}`) or
/// Google API (`{"error": {"message": "..."}}`) body.
pub(crate) fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let from_json = parsed.as_ref().and_then(|v| match &v["error"] {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(o) => o
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string),
        _ => None,
    });
    from_json.unwrap_or_else(|| body.trim().chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn error_text_from_either_body_shape() {
        assert_eq!(error_message(r#"{"error":"Permission denied"}"#), "Permission denied");
        assert_eq!(
            error_message(r#"{"error":{"code":400,"message":"Invalid document","status":"INVALID_ARGUMENT"}}"#),
            "Invalid document"
        );
        assert_eq!(error_message("Bad Gateway\n"), "Bad Gateway");
    }
}
