use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use tracing::debug;

use crate::ReqResult;
use crate::auth::{AuthScheme, Credentials, auth_directive, token_header_value};
use crate::body::{Attachment, BodyFormat, Payload, encode_body};
use crate::resolve::{Query, resolve_url};
use crate::response::Response;
use crate::retry::{RetryPolicy, run_with_retry};
use crate::transport::{RequestDescriptor, RequestExecutor, UreqExecutor};
use crate::util::{parse_header_name, parse_header_value, redact_uri_for_logs};

const JSON_CONTENT_TYPE: &str = "application/json";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Per-call inputs to [`PendingRequest::send`].
///
/// `query: None` leaves the stored query parameters as they are; an empty
/// query still takes part in merging. `payload: None` sends no body at all.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RequestOptions {
    pub query: Option<Query>,
    pub payload: Option<Payload>,
}

impl RequestOptions {
    pub fn query(query: impl Into<Query>) -> Self {
        Self {
            query: Some(query.into()),
            payload: None,
        }
    }

    pub fn payload(payload: impl Into<Payload>) -> Self {
        Self {
            query: None,
            payload: Some(payload.into()),
        }
    }
}

/// Mutable request configuration that dispatches on a verb call.
///
/// Setters mutate this instance in place and return it for chaining.
/// Reusing one instance for several calls carries every earlier setting
/// forward, except fields a later setter replaces. A verb call never resets
/// configuration.
pub struct PendingRequest {
    base_url: String,
    url_parameters: BTreeMap<String, String>,
    query_parameters: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body_format: BodyFormat,
    raw_body: Option<String>,
    files: Vec<Attachment>,
    credentials: Option<Credentials>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    retry_policy: RetryPolicy,
    executor: Arc<dyn RequestExecutor>,
}

impl PendingRequest {
    /// Builder backed by a default [`UreqExecutor`]. Starts in JSON mode with
    /// `Content-Type: application/json`.
    pub fn new() -> Self {
        Self::using(UreqExecutor::new())
    }

    pub fn using<E>(executor: E) -> Self
    where
        E: RequestExecutor + 'static,
    {
        let mut request = Self {
            base_url: String::new(),
            url_parameters: BTreeMap::new(),
            query_parameters: Vec::new(),
            headers: Vec::new(),
            body_format: BodyFormat::Json,
            raw_body: None,
            files: Vec::new(),
            credentials: None,
            timeout: None,
            connect_timeout: None,
            retry_policy: RetryPolicy::disabled(),
            executor: Arc::new(executor),
        };
        request.as_json();
        request
    }

    pub fn with_executor(&mut self, executor: Arc<dyn RequestExecutor>) -> &mut Self {
        self.executor = executor;
        self
    }

    pub fn base_url(&mut self, base_url: impl Into<String>) -> &mut Self {
        self.base_url = base_url.into();
        self
    }

    /// Merges into the stored placeholder values; existing names are
    /// overwritten.
    pub fn with_url_parameters<K, V, I>(&mut self, parameters: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.url_parameters.extend(
            parameters
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    pub fn with_url_parameter(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        let parameter: (String, String) = (name.into(), value.into());
        self.with_url_parameters([parameter])
    }

    /// Replaces the stored query with `parameters`; a repeated name keeps its
    /// last value. These values have the lowest precedence: a query embedded
    /// in the request URL or passed to the verb overrides them.
    pub fn with_query_parameters<K, V, I>(&mut self, parameters: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.query_parameters.clear();
        for (name, value) in parameters {
            let (name, value): (String, String) = (name.into(), value.into());
            match self
                .query_parameters
                .iter_mut()
                .find(|(existing, _)| *existing == name)
            {
                Some(slot) => slot.1 = value,
                None => self.query_parameters.push((name, value)),
            }
        }
        self
    }

    /// Merges into the stored headers. Names compare case-insensitively; a
    /// collision overwrites the value in place.
    pub fn with_headers<K, V, I>(&mut self, headers: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (name, value) in headers {
            let (name, value): (String, String) = (name.into(), value.into());
            match self
                .headers
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
            {
                Some(slot) => *slot = (name, value),
                None => self.headers.push((name, value)),
            }
        }
        self
    }

    pub fn with_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let header: (String, String) = (name.into(), value.into());
        self.with_headers([header])
    }

    /// Drops every stored header, then applies `headers`.
    pub fn replace_headers<K, V, I>(&mut self, headers: I) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.headers.clear();
        self.with_headers(headers)
    }

    pub fn body_format(&mut self, format: BodyFormat) -> &mut Self {
        self.body_format = format;
        self
    }

    pub fn as_json(&mut self) -> &mut Self {
        self.body_format(BodyFormat::Json)
            .content_type(JSON_CONTENT_TYPE)
    }

    pub fn as_form(&mut self) -> &mut Self {
        self.body_format(BodyFormat::Form)
            .content_type(FORM_CONTENT_TYPE)
    }

    /// The `Content-Type` header, boundary included, is written per call.
    pub fn as_multipart(&mut self) -> &mut Self {
        self.body_format(BodyFormat::Multipart)
    }

    /// Sends `content` verbatim on every later body-carrying verb,
    /// whatever payload the verb is given.
    pub fn with_body(&mut self, content: impl Into<String>, content_type: &str) -> &mut Self {
        self.raw_body = Some(content.into());
        self.body_format(BodyFormat::Raw).content_type(content_type)
    }

    pub fn content_type(&mut self, content_type: &str) -> &mut Self {
        self.with_header("Content-Type", content_type)
    }

    pub fn accept(&mut self, content_type: &str) -> &mut Self {
        self.with_header("Accept", content_type)
    }

    pub fn accept_json(&mut self) -> &mut Self {
        self.accept(JSON_CONTENT_TYPE)
    }

    pub fn with_basic_auth(
        &mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> &mut Self {
        self.credentials = Some(Credentials::new(username, password, AuthScheme::Basic));
        self
    }

    pub fn with_digest_auth(
        &mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> &mut Self {
        self.credentials = Some(Credentials::new(username, password, AuthScheme::Digest));
        self
    }

    pub fn with_ntlm_auth(
        &mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> &mut Self {
        self.credentials = Some(Credentials::new(username, password, AuthScheme::Ntlm));
        self
    }

    /// `Authorization: Bearer <token>`.
    pub fn with_token(&mut self, token: &str) -> &mut Self {
        self.with_token_type(token, "Bearer")
    }

    pub fn with_token_type(&mut self, token: &str, token_type: &str) -> &mut Self {
        self.with_header("Authorization", token_header_value(token, token_type))
    }

    /// Per-attempt bound on the whole exchange.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn connect_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connect_timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    /// Accepts an attempt count, an `(attempts, delay_ms)` pair or a full
    /// [`RetryPolicy`].
    pub fn retry(&mut self, policy: impl Into<RetryPolicy>) -> &mut Self {
        self.retry_policy = policy.into();
        self
    }

    /// Adds a file part and switches to multipart mode.
    pub fn attach(&mut self, attachment: impl Into<Attachment>) -> &mut Self {
        self.files.push(attachment.into());
        self.as_multipart()
    }

    pub fn attach_multiple<A, I>(&mut self, attachments: I) -> &mut Self
    where
        A: Into<Attachment>,
        I: IntoIterator<Item = A>,
    {
        for attachment in attachments {
            self.attach(attachment);
        }
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn current_body_format(&self) -> BodyFormat {
        self.body_format
    }

    pub fn get(&mut self, url: &str) -> ReqResult<Response> {
        self.send(Method::GET, url, RequestOptions::default())
    }

    pub fn get_with_query(&mut self, url: &str, query: impl Into<Query>) -> ReqResult<Response> {
        self.send(Method::GET, url, RequestOptions::query(query))
    }

    pub fn head(&mut self, url: &str) -> ReqResult<Response> {
        self.send(Method::HEAD, url, RequestOptions::default())
    }

    pub fn head_with_query(&mut self, url: &str, query: impl Into<Query>) -> ReqResult<Response> {
        self.send(Method::HEAD, url, RequestOptions::query(query))
    }

    /// Sends an empty payload under the current body format.
    pub fn post(&mut self, url: &str) -> ReqResult<Response> {
        self.post_with(url, Payload::empty())
    }

    pub fn post_with(&mut self, url: &str, payload: impl Into<Payload>) -> ReqResult<Response> {
        self.send(Method::POST, url, RequestOptions::payload(payload))
    }

    pub fn put(&mut self, url: &str) -> ReqResult<Response> {
        self.put_with(url, Payload::empty())
    }

    pub fn put_with(&mut self, url: &str, payload: impl Into<Payload>) -> ReqResult<Response> {
        self.send(Method::PUT, url, RequestOptions::payload(payload))
    }

    pub fn patch(&mut self, url: &str) -> ReqResult<Response> {
        self.patch_with(url, Payload::empty())
    }

    pub fn patch_with(&mut self, url: &str, payload: impl Into<Payload>) -> ReqResult<Response> {
        self.send(Method::PATCH, url, RequestOptions::payload(payload))
    }

    pub fn delete(&mut self, url: &str) -> ReqResult<Response> {
        self.send(Method::DELETE, url, RequestOptions::default())
    }

    /// An empty `payload` sends no body.
    pub fn delete_with(&mut self, url: &str, payload: impl Into<Payload>) -> ReqResult<Response> {
        let payload = payload.into();
        let options = if payload.is_empty() {
            RequestOptions::default()
        } else {
            RequestOptions {
                query: None,
                payload: Some(payload),
            }
        };
        self.send(Method::DELETE, url, options)
    }

    /// Resolves the configuration into one request and runs it through the
    /// retry loop.
    ///
    /// Only header validation and attachment reads fail here, and both
    /// happen before any network activity. Transport failures come back as
    /// a zero-status [`Response`].
    pub fn send(
        &mut self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> ReqResult<Response> {
        let descriptor = self.describe(method, url, options)?;
        let executor = Arc::clone(&self.executor);
        let redacted = redact_uri_for_logs(&descriptor.url);
        Ok(run_with_retry(
            &self.retry_policy,
            descriptor.method.as_str(),
            &redacted,
            || executor.execute(&descriptor),
        ))
    }

    fn describe(
        &mut self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> ReqResult<RequestDescriptor> {
        let resolved = resolve_url(
            &self.base_url,
            url,
            &self.url_parameters,
            &self.query_parameters,
            options.query,
        );

        let mut headers = self.headers.clone();
        for (name, value) in &headers {
            let name = parse_header_name(name)?;
            parse_header_value(name.as_str(), value)?;
        }

        let body = match options.payload {
            Some(_) if method == Method::GET || method == Method::HEAD => None,
            Some(payload) => {
                let payload = match (self.body_format, &self.raw_body) {
                    (BodyFormat::Raw, Some(raw_body)) => Payload::Text(raw_body.clone()),
                    _ => payload,
                };
                let encoded = encode_body(self.body_format, payload, &mut self.files)?;
                if let Some(content_type) = encoded.content_type {
                    apply_content_type(
                        &mut headers,
                        content_type,
                        self.body_format == BodyFormat::Multipart,
                    );
                }
                debug!(
                    body_format = %self.body_format,
                    body_bytes = encoded.bytes.len(),
                    "encoded request body"
                );
                Some(encoded.bytes)
            }
            None => None,
        };

        Ok(RequestDescriptor {
            method,
            url: resolved,
            headers,
            body,
            auth: auth_directive(self.credentials.as_ref()),
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
        })
    }
}

impl Default for PendingRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PendingRequest")
            .field("base_url", &self.base_url)
            .field("url_parameters", &self.url_parameters)
            .field("query_parameters", &self.query_parameters)
            .field("headers", &self.headers)
            .field("body_format", &self.body_format)
            .field("files", &self.files.len())
            .field("credentials", &self.credentials)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

/// Multipart always carries its own boundary, so it replaces whatever was
/// configured; other formats only fill in a missing header.
fn apply_content_type(headers: &mut Vec<(String, String)>, content_type: String, replace: bool) {
    let existing = headers
        .iter_mut()
        .find(|(name, _)| name.eq_ignore_ascii_case("Content-Type"));
    match existing {
        Some(slot) if replace => slot.1 = content_type,
        Some(_) => {}
        None => headers.push(("Content-Type".to_owned(), content_type)),
    }
}
