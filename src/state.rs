use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::{ApiClientError, Result};

/// Headers and cookies attached to every request of one client.
///
/// Nothing here is reset between requests. Long-lived clients serving
/// several callers should clear (or clone from a clean client) at the start
/// of each request scope.
#[derive(Clone, Default)]
pub struct PersistentState {
    headers: HeaderMap,
    cookies: BTreeMap<String, String>,
}

impl PersistentState {
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// Sets a header, replacing any previous value for the same name.
    pub fn insert_header(&mut self, name: &str, value: &str) -> Result<()> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(name);
    }

    pub fn clear_headers(&mut self) {
        self.headers.clear();
    }

    pub fn insert_cookie(&mut self, name: &str, value: &str) -> Result<()> {
        validate_cookie(name, value)?;
        self.cookies.insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    pub fn remove_cookie(&mut self, name: &str) {
        self.cookies.remove(name);
    }

    pub fn clear_cookies(&mut self) {
        self.cookies.clear();
    }

    /// `Cookie` header value for the stored cookies, if any.
    pub fn cookie_header(&self) -> Option<HeaderValue> {
        if self.cookies.is_empty() {
            return None;
        }
        let joined = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_bytes(joined.as_bytes()).ok()
    }
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let invalid = |reason: String| ApiClientError::InvalidHeader {
        name: name.to_owned(),
        reason,
    };
    let header_name =
        HeaderName::from_bytes(name.trim().as_bytes()).map_err(|err| invalid(err.to_string()))?;
    // from_bytes also admits non-ASCII (obs-text) values such as tokens with '£'.
    let header_value =
        HeaderValue::from_bytes(value.as_bytes()).map_err(|err| invalid(err.to_string()))?;
    Ok((header_name, header_value))
}

fn validate_cookie(name: &str, value: &str) -> Result<()> {
    let invalid = |reason: &str| ApiClientError::InvalidCookie {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };
    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name
        .bytes()
        .any(|byte| byte.is_ascii_whitespace() || byte.is_ascii_control() || b"=;,".contains(&byte))
    {
        return Err(invalid("name contains a separator or whitespace"));
    }
    if value.bytes().any(|byte| byte == b';' || byte.is_ascii_control()) {
        return Err(invalid("value contains ';' or a control character"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::PersistentState;
    use crate::ApiClientError;

    #[test]
    fn header_names_are_case_insensitive() {
        let mut state = PersistentState::default();
        state.insert_header("X-Api-Key", "one").unwrap();
        state.insert_header("x-api-key", "two").unwrap();
        assert_eq!(state.headers().len(), 1);
        assert_eq!(state.headers().get("X-API-KEY").unwrap(), "two");

        state.remove_header("X-API-key");
        assert!(state.headers().is_empty());
    }

    #[test]
    fn adding_same_header_twice_is_idempotent() {
        let mut state = PersistentState::default();
        state.insert_header("X", "1").unwrap();
        let before = state.headers().clone();
        state.insert_header("X", "1").unwrap();
        assert_eq!(state.headers(), &before);
    }

    #[test]
    fn removing_missing_entries_is_harmless() {
        let mut state = PersistentState::default();
        state.remove_header("Authorization");
        state.remove_header("not a header");
        state.remove_cookie("missing_cookie_name");
        assert!(state.headers().is_empty());
        assert!(state.cookies().is_empty());
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let mut state = PersistentState::default();
        let err = state.insert_header("bad header", "x").unwrap_err();
        assert!(matches!(err, ApiClientError::InvalidHeader { .. }));
        let err = state.insert_header("X", "line\nbreak").unwrap_err();
        assert!(matches!(err, ApiClientError::InvalidHeader { .. }));
    }

    #[test]
    fn cookies_join_into_one_header() {
        let mut state = PersistentState::default();
        assert!(state.cookie_header().is_none());
        state.insert_cookie("b", "2").unwrap();
        state.insert_cookie("a", "1").unwrap();
        assert_eq!(state.cookie_header().unwrap(), "a=1; b=2");

        state.clear_cookies();
        assert!(state.cookie_header().is_none());
    }

    #[test]
    fn cookie_with_separator_is_rejected() {
        let mut state = PersistentState::default();
        assert!(state.insert_cookie("a=b", "1").is_err());
        assert!(state.insert_cookie("session", "x; admin=1").is_err());
        assert!(state.insert_cookie("", "1").is_err());
    }
}
