use serde_json::{Map, Value};

use crate::{
    response::{ApiResponse, ResponseData, NO_RESPONSE_STATUS},
    transport::{RawResponse, TransportError},
    Expect,
};

const RAW_PREVIEW_CHARS: usize = 1024;

const BINARY_CONTENT_TYPES: [&str; 4] = [
    "application/octet-stream",
    "application/pdf",
    "application/zip",
    "application/gzip",
];
const BINARY_CONTENT_PREFIXES: [&str; 4] = ["image/", "audio/", "video/", "font/"];

/// Outcome of a best-effort JSON parse.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ParseOutcome {
    Parsed(Value),
    /// A leading JSON object or array followed by trailing garbage.
    Recovered(Value),
    Unparsable(String),
}

pub(crate) fn parse_body(body: &[u8]) -> ParseOutcome {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    if body.iter().all(u8::is_ascii_whitespace) {
        return ParseOutcome::Parsed(Value::Object(Map::new()));
    }

    let err = match serde_json::from_slice::<Value>(body) {
        Ok(value) => return ParseOutcome::Parsed(value),
        Err(err) => err,
    };

    let mut stream = serde_json::Deserializer::from_slice(body).into_iter::<Value>();
    // A bare scalar ahead of trailing text is plain text, not JSON.
    match stream.next() {
        Some(Ok(value)) if value.is_object() || value.is_array() => {
            ParseOutcome::Recovered(value)
        }
        _ => ParseOutcome::Unparsable(err.to_string()),
    }
}

pub(crate) fn is_binary_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    BINARY_CONTENT_TYPES.contains(&mime.as_str())
        || BINARY_CONTENT_PREFIXES
            .iter()
            .any(|prefix| mime.starts_with(prefix))
}

/// Converts a raw response into an [`ApiResponse`]. Never fails.
pub(crate) fn normalize_response(raw: RawResponse, expect: Expect) -> ApiResponse {
    let status = raw.status;
    let success = (200..300).contains(&status);
    let binary = expect == Expect::Binary
        || raw.content_type().is_some_and(is_binary_content_type);

    if success && binary {
        return ApiResponse::new(status, ResponseData::Binary(raw.body.clone()), raw.body);
    }

    let (data, parse_error, recovered) = match parse_body(&raw.body) {
        ParseOutcome::Parsed(Value::Null) => (Value::Object(Map::new()), None, false),
        ParseOutcome::Parsed(value) => (value, None, false),
        ParseOutcome::Recovered(value) => (value, None, true),
        ParseOutcome::Unparsable(reason) => {
            let mut map = Map::new();
            map.insert("raw".to_owned(), Value::String(raw_preview(&raw.body)));
            let message = format!("malformed JSON response: {reason}");
            (Value::Object(map), Some(message), false)
        }
    };

    // A failed status explains itself better than the parse error of its body.
    let response = if success {
        match parse_error {
            Some(message) => {
                let data = with_error_field(data, &message);
                ApiResponse::new(status, ResponseData::Json(data), raw.body).with_error(message)
            }
            None => ApiResponse::new(status, ResponseData::Json(data), raw.body),
        }
    } else {
        let message = failure_message(&data, status);
        let data = with_error_field(data, &message);
        ApiResponse::new(status, ResponseData::Json(data), raw.body).with_error(message)
    };

    if recovered {
        response.mark_recovered()
    } else {
        response
    }
}

/// Builds the response for an attempt that never received a reply.
pub(crate) fn normalize_failure(err: &TransportError) -> ApiResponse {
    let message = err.to_string();
    let mut map = Map::new();
    map.insert("error".to_owned(), Value::String(message.clone()));
    ApiResponse::new(
        NO_RESPONSE_STATUS,
        ResponseData::Json(Value::Object(map)),
        Vec::new(),
    )
    .with_error(message)
}

fn failure_message(data: &Value, status: u16) -> String {
    ["error", "message"]
        .iter()
        .find_map(|key| match data.get(*key) {
            Some(Value::String(text)) if !text.trim().is_empty() => Some(text.clone()),
            Some(Value::Object(inner)) => inner
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned),
            _ => None,
        })
        .or_else(|| {
            reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|code| code.canonical_reason())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| "Unknown error".to_owned())
}

fn with_error_field(data: Value, message: &str) -> Value {
    match data {
        Value::Object(mut map) => {
            map.insert("error".to_owned(), Value::String(message.to_owned()));
            Value::Object(map)
        }
        other => {
            let mut map = Map::new();
            map.insert("error".to_owned(), Value::String(message.to_owned()));
            map.insert("body".to_owned(), other);
            Value::Object(map)
        }
    }
}

fn raw_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(RAW_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderValue, CONTENT_TYPE};
    use serde_json::json;

    use super::{
        is_binary_content_type, normalize_failure, normalize_response, parse_body, ParseOutcome,
    };
    use crate::{
        transport::{RawResponse, TransportError, TransportErrorKind},
        Expect, ResponseData,
    };

    #[test]
    fn empty_body_is_empty_object() {
        assert_eq!(parse_body(b""), ParseOutcome::Parsed(json!({})));
        assert_eq!(parse_body(b"  \n"), ParseOutcome::Parsed(json!({})));
    }

    #[test]
    fn valid_json_is_parsed() {
        assert_eq!(parse_body(br#"[1, 2]"#), ParseOutcome::Parsed(json!([1, 2])));
        assert_eq!(
            parse_body(b"\xEF\xBB\xBF{\"a\":1}"),
            ParseOutcome::Parsed(json!({"a": 1}))
        );
    }

    #[test]
    fn trailing_garbage_is_recovered() {
        assert_eq!(
            parse_body(br#"{"ok":true}<html>oops"#),
            ParseOutcome::Recovered(json!({"ok": true}))
        );
    }

    #[test]
    fn broken_json_is_unparsable() {
        assert!(matches!(parse_body(b"{not json"), ParseOutcome::Unparsable(_)));
        assert!(matches!(
            parse_body(b"<html>Bad Gateway</html>"),
            ParseOutcome::Unparsable(_)
        ));
    }

    #[test]
    fn malformed_success_body_keeps_status_and_reports_error() {
        let response = normalize_response(RawResponse::new(200, "{not json"), Expect::Json);
        assert_eq!(response.status_code(), 200);
        let error = response
            .get("error")
            .and_then(|value| value.as_str())
            .expect("error message in data");
        assert!(error.starts_with("malformed JSON response"));
        assert_eq!(response.get("raw"), Some(&json!("{not json")));
        assert!(response.error().is_some());
    }

    #[test]
    fn null_body_becomes_empty_object() {
        let response = normalize_response(RawResponse::new(200, "null"), Expect::Json);
        assert_eq!(response.data(), &ResponseData::Json(json!({})));
        assert_eq!(response.error(), None);
    }

    #[test]
    fn recovered_body_is_flagged() {
        let response = normalize_response(RawResponse::new(200, r#"{"id":7} trailing"#), Expect::Json);
        assert!(response.recovered());
        assert_eq!(response.get("id"), Some(&json!(7)));
        assert_eq!(response.error(), None);
    }

    #[test]
    fn plain_text_starting_with_scalar_is_unparsable() {
        assert!(matches!(parse_body(b"1 row updated"), ParseOutcome::Unparsable(_)));
        assert!(matches!(parse_body(b"true story"), ParseOutcome::Unparsable(_)));

        let response = normalize_response(RawResponse::new(200, "1 row updated"), Expect::Json);
        assert!(!response.recovered());
        assert_eq!(response.get("raw"), Some(&json!("1 row updated")));
        assert!(response
            .error()
            .is_some_and(|message| message.starts_with("malformed JSON response")));

        let response = normalize_response(RawResponse::new(404, "404 page not found"), Expect::Json);
        assert_eq!(response.error(), Some("Not Found"));
        assert_eq!(
            response.data(),
            &ResponseData::Json(json!({"raw": "404 page not found", "error": "Not Found"}))
        );
    }

    #[test]
    fn failure_prefers_error_then_message_then_reason() {
        let response = normalize_response(
            RawResponse::new(400, r#"{"error":"bad input"}"#),
            Expect::Json,
        );
        assert_eq!(response.error(), Some("bad input"));

        let response = normalize_response(
            RawResponse::new(403, r#"{"message":"nope"}"#),
            Expect::Json,
        );
        assert_eq!(response.get("error"), Some(&json!("nope")));
        assert_eq!(response.get("message"), Some(&json!("nope")));

        let response = normalize_response(RawResponse::new(404, ""), Expect::Json);
        assert_eq!(response.data(), &ResponseData::Json(json!({"error": "Not Found"})));

        let response = normalize_response(RawResponse::new(599, ""), Expect::Json);
        assert_eq!(response.error(), Some("Unknown error"));
    }

    #[test]
    fn failure_with_non_object_payload_is_wrapped() {
        let response = normalize_response(RawResponse::new(500, "[1,2]"), Expect::Json);
        assert_eq!(
            response.data(),
            &ResponseData::Json(json!({"error": "Internal Server Error", "body": [1, 2]}))
        );
    }

    #[test]
    fn binary_passthrough_for_requested_binary() {
        let response = normalize_response(RawResponse::new(200, vec![0xff, 0x00]), Expect::Binary);
        assert_eq!(response.data(), &ResponseData::Binary(vec![0xff, 0x00]));
        assert_eq!(response.error(), None);
    }

    #[test]
    fn binary_passthrough_for_binary_content_type() {
        let mut raw = RawResponse::new(200, vec![0x89, b'P', b'N', b'G']);
        raw.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        let response = normalize_response(raw, Expect::Json);
        assert!(response.data().as_bytes().is_some());
    }

    #[test]
    fn binary_failure_is_reported_as_json_error() {
        let response = normalize_response(RawResponse::new(404, vec![0xff]), Expect::Binary);
        assert_eq!(response.status_code(), 404);
        assert_eq!(response.error(), Some("Not Found"));
        assert!(response.get("raw").is_some());
    }

    #[test]
    fn content_type_detection() {
        assert!(is_binary_content_type("application/octet-stream"));
        assert!(is_binary_content_type("Image/PNG; charset=binary"));
        assert!(!is_binary_content_type("application/json; charset=utf-8"));
        assert!(!is_binary_content_type("text/html"));
    }

    #[test]
    fn transport_failure_uses_sentinel_status() {
        let err = TransportError::new(TransportErrorKind::Timeout, "deadline elapsed");
        let response = normalize_failure(&err);
        assert_eq!(response.status_code(), 0);
        assert_eq!(
            response.get("error"),
            Some(&json!("request timed out: deadline elapsed"))
        );
    }

    #[test]
    fn long_raw_bodies_are_truncated() {
        let body = "x".repeat(5_000);
        let response = normalize_response(RawResponse::new(200, body), Expect::Json);
        let raw = response.get("raw").and_then(|v| v.as_str()).unwrap();
        assert_eq!(raw.len(), 1024 + 3);
    }
}
