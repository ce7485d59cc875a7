use serde_json::Value;

use crate::error::{AppError, Result};

use super::transport::HttpResponse;

const PROVIDER_ERROR_KEY: &str = "Error Message";

/// Turn a raw reply into JSON, rejecting non-2xx statuses and embedded provider errors.
pub fn decode_payload(response: &HttpResponse) -> Result<Value> {
    if !response.is_success() {
        return Err(AppError::HttpStatus {
            status: response.status,
        });
    }

    let value: Value = serde_json::from_str(&response.body)
        .map_err(|err| AppError::payload(format!("malformed provider response: {err}")))?;

    if let Some(message) = value.get(PROVIDER_ERROR_KEY) {
        return Err(AppError::payload(value_to_string(message)));
    }

    Ok(value)
}

pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// First element of an array payload, if any.
pub fn first_record(value: &Value) -> Option<&Value> {
    value.as_array().and_then(|records| records.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn non_success_status_maps_to_http_error() {
        let err = decode_payload(&HttpResponse {
            status: 429,
            body: "[]".into(),
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HttpStatus(429));
        assert_eq!(err.to_string(), "API error: 429");
    }

    #[test]
    fn embedded_error_message_is_rejected() {
        let body = r#"{"Error Message":"Invalid API KEY. Please retry."}"#;
        let err = decode_payload(&HttpResponse::ok_json(body)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderPayload);
        assert_eq!(err.to_string(), "Invalid API KEY. Please retry.");
    }

    #[test]
    fn malformed_body_is_a_payload_error() {
        let err = decode_payload(&HttpResponse::ok_json("<html>")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderPayload);
    }

    #[test]
    fn arrays_pass_through() {
        let value = decode_payload(&HttpResponse::ok_json(r#"[{"symbol":"AAPL"}]"#)).unwrap();
        assert_eq!(first_record(&value).and_then(|r| r.get("symbol")), Some(&Value::from("AAPL")));
        assert!(first_record(&Value::Array(vec![])).is_none());
    }
}
