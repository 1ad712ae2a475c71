use std::fmt;
use std::io::Cursor;
use std::sync::OnceLock;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::ReqResult;
use crate::collection::Collection;
use crate::error::{Error, ImmutableAccessError, RequestError, TransportError};
use crate::transport::RawResponse;
use crate::util::truncate_body;

/// Keyed, read-only access to a decoded document.
///
/// Writes are part of the surface only so they can be refused with a typed
/// error.
pub trait ReadOnlyDocument {
    fn get(&self, key: &str) -> Option<&Value>;

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn set(&self, key: &str, _value: Value) -> Result<(), ImmutableAccessError> {
        Err(ImmutableAccessError {
            operation: "set",
            key: key.to_owned(),
        })
    }

    fn remove(&self, key: &str) -> Result<(), ImmutableAccessError> {
        Err(ImmutableAccessError {
            operation: "remove",
            key: key.to_owned(),
        })
    }
}

/// Condition for [`Response::throw_if`] and [`Response::throw_unless`].
pub enum Condition {
    Literal(bool),
    Predicate(Box<dyn Fn(&Response) -> bool>),
}

impl Condition {
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&Response) -> bool + 'static,
    {
        Self::Predicate(Box::new(predicate))
    }

    pub fn evaluate(&self, response: &Response) -> bool {
        match self {
            Self::Literal(value) => *value,
            Self::Predicate(predicate) => predicate(response),
        }
    }
}

impl From<bool> for Condition {
    fn from(value: bool) -> Self {
        Self::Literal(value)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => formatter.debug_tuple("Literal").field(value).finish(),
            Self::Predicate(_) => formatter.write_str("Predicate(..)"),
        }
    }
}

/// Result of a verb call.
///
/// Status `0` is reserved for "no response obtained": the exchange failed at
/// the transport level and this value stands in for it, with empty headers and
/// body. A live exchange never produces it.
#[derive(Clone, Debug)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
    decoded: OnceLock<Value>,
    transport_failure: Option<String>,
}

impl Response {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            decoded: OnceLock::new(),
            transport_failure: None,
        }
    }

    pub(crate) fn empty() -> Self {
        Self::new(0, HeaderMap::new(), Bytes::new())
    }

    pub(crate) fn transport_failure(error: &TransportError) -> Self {
        Self {
            transport_failure: Some(error.to_string()),
            ..Self::empty()
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// `None` for the zero-status stand-in.
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status).ok()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header value by case-insensitive name; repeated values are joined with
    /// `", "`. Empty when absent.
    pub fn header(&self, name: &str) -> String {
        self.headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The body as a reader positioned at its start.
    pub fn resource(&self) -> Cursor<Bytes> {
        Cursor::new(self.body.clone())
    }

    /// Diagnostic message of the transport error a zero-status response
    /// stands in for.
    pub fn transport_failure_message(&self) -> Option<&str> {
        self.transport_failure.as_deref()
    }

    /// Decoded body, computed on first use. A body that is not valid JSON
    /// decodes to an empty object, and that result is kept.
    pub fn json(&self) -> &Value {
        self.decoded.get_or_init(|| {
            serde_json::from_slice(&self.body).unwrap_or_else(|_| Value::Object(Map::new()))
        })
    }

    /// Value at `key`, where `key` is either a literal top-level key or a
    /// dot-separated path such as `data.0.id`.
    pub fn json_path(&self, key: &str) -> Option<&Value> {
        let document = self.json();
        if let Some(value) = document.as_object().and_then(|map| map.get(key)) {
            return Some(value);
        }
        key.split('.')
            .try_fold(document, |current, segment| match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index)),
                _ => None,
            })
    }

    pub fn json_or(&self, key: &str, default: Value) -> Value {
        self.json_path(key).cloned().unwrap_or(default)
    }

    /// Typed decode of the body. Unlike [`Response::json`] this reports
    /// malformed bodies.
    pub fn json_as<T>(&self) -> ReqResult<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&self.body),
        })
    }

    /// Decodes the body into `T` without touching the cached document;
    /// any decode failure yields `T::default()`.
    pub fn object<T>(&self) -> T
    where
        T: DeserializeOwned + Default,
    {
        serde_json::from_slice(&self.body).unwrap_or_default()
    }

    pub fn collect(&self) -> Collection {
        Collection::from_value(self.json().clone())
    }

    /// Collects the value at `key`; a value that is not an array is wrapped
    /// in a single-element one.
    pub fn collect_key(&self, key: &str) -> Collection {
        match self.json_path(key) {
            Some(Value::Array(items)) => Collection::from_value(Value::Array(items.clone())),
            Some(value) => Collection::from_value(Value::Array(vec![value.clone()])),
            None => Collection::default(),
        }
    }

    pub fn is_successful(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_failed(&self) -> bool {
        self.status >= 400
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn is_created(&self) -> bool {
        self.status == 201
    }

    pub fn is_accepted(&self) -> bool {
        self.status == 202
    }

    pub fn is_no_content(&self) -> bool {
        self.status == 204
    }

    pub fn is_moved_permanently(&self) -> bool {
        self.status == 301
    }

    pub fn is_found(&self) -> bool {
        self.status == 302
    }

    pub fn is_bad_request(&self) -> bool {
        self.status == 400
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn is_payment_required(&self) -> bool {
        self.status == 402
    }

    pub fn is_forbidden(&self) -> bool {
        self.status == 403
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn is_request_timeout(&self) -> bool {
        self.status == 408
    }

    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }

    pub fn is_unprocessable_entity(&self) -> bool {
        self.status == 422
    }

    pub fn is_too_many_requests(&self) -> bool {
        self.status == 429
    }

    pub fn is_internal_server_error(&self) -> bool {
        self.status == 500
    }

    /// Runs `callback` when the response failed.
    pub fn on_error<F>(self, callback: F) -> Self
    where
        F: FnOnce(&Response),
    {
        if self.is_failed() {
            callback(&self);
        }
        self
    }

    pub fn throw(self) -> Result<Self, RequestError> {
        self.throw_with(|_| {})
    }

    /// Like [`Response::throw`], running `callback` before the error is built.
    pub fn throw_with<F>(self, callback: F) -> Result<Self, RequestError>
    where
        F: FnOnce(&Response),
    {
        if self.is_failed() {
            callback(&self);
            return Err(RequestError::new(self));
        }
        Ok(self)
    }

    pub fn throw_if(self, condition: impl Into<Condition>) -> Result<Self, RequestError> {
        let condition = condition.into();
        if self.is_failed() && condition.evaluate(&self) {
            return Err(RequestError::new(self));
        }
        Ok(self)
    }

    pub fn throw_unless(self, condition: impl Into<Condition>) -> Result<Self, RequestError> {
        let condition = condition.into();
        if self.is_failed() && !condition.evaluate(&self) {
            return Err(RequestError::new(self));
        }
        Ok(self)
    }

    /// Raises when the status equals `code`, failed or not.
    pub fn throw_if_status(self, code: u16) -> Result<Self, RequestError> {
        if self.status == code {
            return Err(RequestError::new(self));
        }
        Ok(self)
    }

    /// Raises when the status differs from `code`, failed or not.
    pub fn throw_unless_status(self, code: u16) -> Result<Self, RequestError> {
        if self.status != code {
            return Err(RequestError::new(self));
        }
        Ok(self)
    }

    /// `true` once the JSON document has been decoded and cached.
    pub fn is_decoded(&self) -> bool {
        self.decoded.get().is_some()
    }
}

impl From<RawResponse> for Response {
    fn from(raw: RawResponse) -> Self {
        Self::new(raw.status, raw.headers, raw.body)
    }
}

impl ReadOnlyDocument for Response {
    fn get(&self, key: &str) -> Option<&Value> {
        match self.json() {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|index| items.get(index)),
            _ => None,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&String::from_utf8_lossy(&self.body))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use http::HeaderMap;
    use http::header::{HeaderValue, SET_COOKIE};
    use serde::Deserialize;
    use serde_json::{Map, Value, json};

    use super::{Condition, ReadOnlyDocument, Response};
    use crate::error::ImmutableAccessError;

    fn json_response(status: u16, body: &str) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        Response::new(status, headers, body.to_owned())
    }

    #[test]
    fn json_is_decoded_once_and_memoized() {
        let response = json_response(200, r#"{"a":{"b":[1,2]}}"#);
        assert!(!response.is_decoded());
        let first = response.json();
        assert!(response.is_decoded());
        let second = response.json();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first, &json!({"a": {"b": [1, 2]}}));
    }

    #[test]
    fn malformed_json_decodes_to_a_stable_empty_document() {
        let response = json_response(200, "<html>oops</html>");
        let first = response.json();
        assert_eq!(first, &Value::Object(Map::new()));
        assert!(std::ptr::eq(first, response.json()));
        assert!(response.json_as::<Value>().is_err());
    }

    #[test]
    fn json_path_supports_literal_keys_and_dot_paths() {
        let response = json_response(200, r#"{"a.b":1,"data":[{"id":"x"}]}"#);
        assert_eq!(response.json_path("a.b"), Some(&json!(1)));
        assert_eq!(response.json_path("data.0.id"), Some(&json!("x")));
        assert_eq!(response.json_path("data.1.id"), None);
        assert_eq!(response.json_or("missing", json!("fallback")), json!("fallback"));
    }

    #[test]
    fn object_decodes_independently_of_the_cache() {
        #[derive(Debug, Default, Deserialize, PartialEq)]
        struct User {
            name: String,
        }

        let response = json_response(200, r#"{"name":"ada"}"#);
        let user: User = response.object();
        assert_eq!(user.name, "ada");
        assert!(!response.is_decoded());

        let broken = json_response(200, "not json");
        let fallback: Map<String, Value> = broken.object();
        assert!(fallback.is_empty());
    }

    #[test]
    fn collect_key_wraps_scalars_into_a_sequence() {
        let response = json_response(200, r#"{"items":[1,2,3],"single":{"id":1}}"#);
        assert_eq!(response.collect_key("items").len(), 3);
        let single = response.collect_key("single");
        assert_eq!(single.len(), 1);
        assert_eq!(single.first(), Some(&json!({"id": 1})));
        assert!(response.collect_key("absent").is_empty());
        assert_eq!(response.collect().len(), 2);
    }

    #[test]
    fn classification_is_total_over_status_range() {
        for status in 0..600_u16 {
            let response = Response::new(status, HeaderMap::new(), "");
            let states = [
                response.is_successful(),
                response.is_redirect(),
                response.is_failed() && response.is_client_error(),
                response.is_failed() && response.is_server_error(),
                !response.is_successful()
                    && !response.is_redirect()
                    && !response.is_failed(),
            ];
            assert_eq!(
                states.iter().filter(|state| **state).count(),
                1,
                "status {status}"
            );
            assert_eq!(response.is_failed(), status >= 400);
        }

        let at = |status| Response::new(status, HeaderMap::new(), "");
        assert!(at(399).is_redirect());
        assert!(at(400).is_failed() && at(400).is_client_error());
        assert!(at(499).is_client_error());
        assert!(at(500).is_failed() && at(500).is_server_error());
    }

    #[test]
    fn exact_status_predicates() {
        let at = |status| Response::new(status, HeaderMap::new(), "");
        assert!(at(200).is_ok());
        assert!(at(201).is_created());
        assert!(at(202).is_accepted());
        assert!(at(204).is_no_content());
        assert!(at(301).is_moved_permanently());
        assert!(at(302).is_found());
        assert!(at(400).is_bad_request());
        assert!(at(401).is_unauthorized());
        assert!(at(402).is_payment_required());
        assert!(at(403).is_forbidden());
        assert!(at(404).is_not_found());
        assert!(at(408).is_request_timeout());
        assert!(at(409).is_conflict());
        assert!(at(422).is_unprocessable_entity());
        assert!(at(429).is_too_many_requests());
        assert!(at(500).is_internal_server_error());
        assert!(!at(200).is_not_found());
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_joins_repeats() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        let response = Response::new(200, headers, "");
        assert_eq!(response.header("Set-Cookie"), "a=1, b=2");
        assert_eq!(response.header("x-missing"), "");
    }

    #[test]
    fn resource_reads_from_the_start() {
        let response = json_response(200, "payload");
        let mut text = String::new();
        response
            .resource()
            .read_to_string(&mut text)
            .expect("read body");
        assert_eq!(text, "payload");
        assert_eq!(response.to_string(), "payload");
    }

    #[test]
    fn on_error_runs_only_for_failed_responses() {
        let mut seen = Vec::new();
        let _ = json_response(200, "{}").on_error(|response| seen.push(response.status()));
        let _ = json_response(502, "{}").on_error(|response| seen.push(response.status()));
        assert_eq!(seen, vec![502]);
    }

    #[test]
    fn throw_raises_only_for_failed_responses() {
        assert!(json_response(302, "{}").throw().is_ok());

        let mut called = false;
        let error = json_response(422, r#"{"error":"bad"}"#)
            .throw_with(|_| called = true)
            .expect_err("422 should raise");
        assert!(called);
        assert_eq!(error.status(), 422);
        assert_eq!(error.response().json_path("error"), Some(&json!("bad")));
        assert!(error.to_string().contains("422"));
    }

    #[test]
    fn throw_if_and_unless_combine_failure_with_condition() {
        assert!(json_response(500, "{}").throw_if(false).is_ok());
        assert!(json_response(500, "{}").throw_if(true).is_err());
        assert!(json_response(200, "{}").throw_if(true).is_ok());
        assert!(
            json_response(404, "{}")
                .throw_if(Condition::when(|response| response.is_not_found()))
                .is_err()
        );
        assert!(json_response(500, "{}").throw_unless(true).is_ok());
        assert!(json_response(500, "{}").throw_unless(false).is_err());
        assert!(
            json_response(503, "{}")
                .throw_unless(Condition::when(|response| response.status() == 503))
                .is_ok()
        );
    }

    #[test]
    fn status_throwers_ignore_failure_classification() {
        let error = json_response(404, "{}")
            .throw_if_status(404)
            .expect_err("404 matches");
        assert_eq!(error.status(), 404);
        assert!(json_response(404, "{}").throw_unless_status(200).is_err());
        assert!(json_response(200, "{}").throw_if_status(404).is_ok());
        assert!(json_response(200, "{}").throw_unless_status(200).is_ok());
        assert!(json_response(204, "").throw_if_status(204).is_err());
    }

    #[test]
    fn keyed_access_is_read_only() {
        let response = json_response(200, r#"{"name":"ada","list":[1]}"#);
        assert!(response.has("name"));
        assert!(!response.has("age"));
        assert_eq!(ReadOnlyDocument::get(&response, "name"), Some(&json!("ada")));

        let error = response
            .set("name", json!("grace"))
            .expect_err("writes are refused");
        assert_eq!(
            error,
            ImmutableAccessError {
                operation: "set",
                key: "name".to_owned()
            }
        );
        assert!(response.remove("list").is_err());
        assert_eq!(response.json(), &json!({"name": "ada", "list": [1]}));
    }

    #[test]
    fn zero_status_marks_missing_response() {
        let response = Response::empty();
        assert_eq!(response.status(), 0);
        assert!(response.status_code().is_none());
        assert!(!response.is_failed());
        assert_eq!(response.json(), &json!({}));
    }
}
