use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Status reported when no HTTP response was received at all.
pub const NO_RESPONSE_STATUS: u16 = 0;

/// Normalized response payload.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseData {
    /// Parsed (or recovered) JSON. Never `null`.
    Json(Value),
    /// Binary passthrough.
    Binary(Vec<u8>),
}

impl ResponseData {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Json(_) => None,
            Self::Binary(bytes) => Some(bytes),
        }
    }

    /// Looks up a key when the payload is a JSON object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_json().and_then(|value| value.get(key))
    }
}

/// Response returned by every request method, whatever happened on the wire.
///
/// Callers tell failures apart by [`ApiResponse::status_code`] and
/// [`ApiResponse::error`]; a transport failure reports
/// [`NO_RESPONSE_STATUS`].
#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    status_code: u16,
    data: ResponseData,
    error: Option<String>,
    bytes: Vec<u8>,
    recovered: bool,
}

impl ApiResponse {
    pub(crate) fn new(status_code: u16, data: ResponseData, bytes: Vec<u8>) -> Self {
        Self {
            status_code,
            data,
            error: None,
            bytes,
            recovered: false,
        }
    }

    pub(crate) fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub(crate) fn mark_recovered(mut self) -> Self {
        self.recovered = true;
        self
    }

    /// Prefixes the error with `prefix` and mirrors it into `data["error"]`.
    pub(crate) fn annotate_failure(mut self, prefix: &str) -> Self {
        let message = match self.error.take() {
            Some(existing) => format!("{prefix}: {existing}"),
            None => prefix.to_owned(),
        };
        match &mut self.data {
            ResponseData::Json(Value::Object(map)) => {
                map.insert("error".to_owned(), Value::String(message.clone()));
            }
            data => {
                let previous = std::mem::replace(data, ResponseData::Json(Value::Null));
                let mut map = serde_json::Map::new();
                map.insert("error".to_owned(), Value::String(message.clone()));
                if let ResponseData::Json(body) = previous {
                    map.insert("body".to_owned(), body);
                }
                *data = ResponseData::Json(Value::Object(map));
            }
        }
        self.error = Some(message);
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn data(&self) -> &ResponseData {
        &self.data
    }

    pub fn into_data(self) -> ResponseData {
        self.data
    }

    /// Failure description, present for non-success statuses, transport
    /// failures and unparsable bodies.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Raw response body as received.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// True when the body was malformed but a leading JSON value was salvaged.
    pub fn recovered(&self) -> bool {
        self.recovered
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Shortcut for `data().get(key)`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Deserializes the JSON payload into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.data {
            ResponseData::Json(value) => T::deserialize(value),
            ResponseData::Binary(bytes) => serde_json::from_slice(bytes),
        }
    }
}

impl fmt::Display for ApiResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            ResponseData::Json(value) => write!(f, "Response: {}, {}", self.status_code, value),
            ResponseData::Binary(bytes) => {
                write!(f, "Response: {}, <{} bytes>", self.status_code, bytes.len())
            }
        }
    }
}
