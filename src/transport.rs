use std::io::Read;
use std::time::Duration;

use bytes::Bytes;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderMap, Method, StatusCode};
use tracing::debug;

use crate::auth::{AuthDirective, AuthScheme, digest_authorization, parse_digest_challenge};
use crate::error::{TransportError, TransportErrorKind};
use crate::util::redact_uri_for_logs;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;
const DEFAULT_POOL_MAX_IDLE_CONNECTIONS: usize = 16;
const DEFAULT_CLIENT_NAME: &str = concat!("reqfluent/", env!("CARGO_PKG_VERSION"));
const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;

/// A fully resolved request, built once per verb call and shared by every
/// retry attempt.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub auth: Option<AuthDirective>,
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl RequestDescriptor {
    /// Headers in wire form, `Name: value`.
    pub fn header_lines(&self) -> Vec<String> {
        self.headers
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Outcome of a completed exchange, whatever its status.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }
}

/// Performs exactly one network exchange per call. Implementations must not
/// retry or follow redirects on their own.
pub trait RequestExecutor: Send + Sync {
    fn execute(&self, descriptor: &RequestDescriptor) -> Result<RawResponse, TransportError>;
}

impl<F> RequestExecutor for F
where
    F: Fn(&RequestDescriptor) -> Result<RawResponse, TransportError> + Send + Sync,
{
    fn execute(&self, descriptor: &RequestDescriptor) -> Result<RawResponse, TransportError> {
        self(descriptor)
    }
}

pub struct UreqExecutorBuilder {
    client_name: String,
    default_timeout: Duration,
    default_connect_timeout: Duration,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    pool_max_idle_connections: usize,
    max_response_body_bytes: usize,
}

impl UreqExecutorBuilder {
    fn new() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            pool_max_idle_connections: DEFAULT_POOL_MAX_IDLE_CONNECTIONS,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
        }
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    /// Used when a request sets no timeout of its own.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn default_connect_timeout(mut self, timeout: Duration) -> Self {
        self.default_connect_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, max_idle: usize) -> Self {
        self.pool_max_idle_per_host = max_idle;
        self
    }

    pub fn pool_max_idle_connections(mut self, max_idle: usize) -> Self {
        self.pool_max_idle_connections = max_idle;
        self
    }

    pub fn max_response_body_bytes(mut self, max_bytes: usize) -> Self {
        self.max_response_body_bytes = max_bytes.max(1);
        self
    }

    pub fn build(self) -> UreqExecutor {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .max_redirects_will_error(false)
            .user_agent(self.client_name.as_str())
            .max_idle_age(self.pool_idle_timeout)
            .max_idle_connections_per_host(self.pool_max_idle_per_host)
            .max_idle_connections(self.pool_max_idle_connections)
            .build();
        UreqExecutor {
            agent: config.new_agent(),
            default_timeout: self.default_timeout,
            default_connect_timeout: self.default_connect_timeout,
            max_response_body_bytes: self.max_response_body_bytes,
        }
    }
}

/// Blocking executor backed by a pooled `ureq` agent.
///
/// Basic credentials are sent pre-emptively. Digest credentials are answered
/// after the server's `401` challenge, which costs a second round trip.
pub struct UreqExecutor {
    agent: ureq::Agent,
    default_timeout: Duration,
    default_connect_timeout: Duration,
    max_response_body_bytes: usize,
}

impl UreqExecutor {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> UreqExecutorBuilder {
        UreqExecutorBuilder::new()
    }

    fn exchange(
        &self,
        descriptor: &RequestDescriptor,
        authorization: Option<&str>,
    ) -> Result<RawResponse, TransportError> {
        let mut builder = ureq::http::Request::builder()
            .method(descriptor.method.clone())
            .uri(descriptor.url.as_str());
        for (name, value) in &descriptor.headers {
            if authorization.is_some() && name.eq_ignore_ascii_case(AUTHORIZATION.as_str()) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(authorization) = authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }

        let mut response = match &descriptor.body {
            Some(body) => {
                let request = builder.body(body.to_vec()).map_err(request_build_error)?;
                self.run_configured_request(request, descriptor)?
            }
            None => {
                let request = builder.body(()).map_err(request_build_error)?;
                self.run_configured_request(request, descriptor)?
            }
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = read_all_body_limited(&mut response, self.max_response_body_bytes)?;
        Ok(RawResponse::new(status, headers, body))
    }

    fn run_configured_request<S: ureq::AsSendBody>(
        &self,
        request: ureq::http::Request<S>,
        descriptor: &RequestDescriptor,
    ) -> Result<ureq::http::Response<ureq::Body>, TransportError> {
        let timeout = descriptor.timeout.unwrap_or(self.default_timeout);
        let connect_timeout = descriptor
            .connect_timeout
            .unwrap_or(self.default_connect_timeout);
        let configured_request = self
            .agent
            .configure_request(request)
            .timeout_global(Some(timeout))
            .timeout_connect(Some(connect_timeout))
            .build();

        self.agent
            .run(configured_request)
            .map_err(|source| match source {
                ureq::Error::Timeout(_) => TransportError::with_source(
                    TransportErrorKind::Timeout,
                    format!(
                        "timed out after {}ms for {} {}",
                        timeout.as_millis(),
                        descriptor.method,
                        redact_uri_for_logs(&descriptor.url)
                    ),
                    source,
                ),
                other => TransportError::with_source(
                    classify_ureq_transport_error(&other),
                    format!(
                        "{} {} failed: {other}",
                        descriptor.method,
                        redact_uri_for_logs(&descriptor.url)
                    ),
                    other,
                ),
            })
    }
}

impl Default for UreqExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestExecutor for UreqExecutor {
    fn execute(&self, descriptor: &RequestDescriptor) -> Result<RawResponse, TransportError> {
        let Some(directive) = &descriptor.auth else {
            return self.exchange(descriptor, None);
        };

        match directive.scheme {
            AuthScheme::Basic => self.exchange(descriptor, Some(&directive.basic_header_value())),
            AuthScheme::Digest => {
                let challenged = self.exchange(descriptor, None)?;
                if challenged.status != StatusCode::UNAUTHORIZED.as_u16() {
                    return Ok(challenged);
                }
                let Some(challenge) = challenged
                    .headers
                    .get_all(WWW_AUTHENTICATE)
                    .iter()
                    .filter_map(|value| value.to_str().ok())
                    .find_map(parse_digest_challenge)
                else {
                    return Ok(challenged);
                };
                debug!(realm = %challenge.realm, "answering digest challenge");
                let authorization = digest_authorization(
                    directive,
                    &challenge,
                    descriptor.method.as_str(),
                    &request_target(&descriptor.url),
                );
                self.exchange(descriptor, Some(&authorization))
            }
            AuthScheme::Ntlm => Err(TransportError::new(
                TransportErrorKind::Other,
                format!(
                    "ntlm authentication is not supported by the ureq transport for {} {}",
                    descriptor.method,
                    redact_uri_for_logs(&descriptor.url)
                ),
            )),
        }
    }
}

fn request_build_error(source: ureq::http::Error) -> TransportError {
    TransportError::with_source(
        TransportErrorKind::Other,
        format!("failed to build http request: {source}"),
        source,
    )
}

/// Path and query of `url`, as sent on the request line.
fn request_target(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{}?{query}", parsed.path()),
            None => parsed.path().to_owned(),
        },
        Err(_) => url.to_owned(),
    }
}

fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
        ureq::Error::Tls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "rustls")]
        ureq::Error::Rustls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "native-tls")]
        ureq::Error::NativeTls(_) => TransportErrorKind::Tls,
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        ureq::Error::Io(source) => match source.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportErrorKind::Timeout
            }
            std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
            _ => TransportErrorKind::Other,
        },
        _ => TransportErrorKind::Other,
    }
}

fn read_all_body_limited(
    response: &mut ureq::http::Response<ureq::Body>,
    max_bytes: usize,
) -> Result<Bytes, TransportError> {
    let mut reader = response.body_mut().as_reader();
    let mut collected = Vec::new();
    let mut chunk = [0_u8; 8192];

    loop {
        let read = reader.read(&mut chunk).map_err(|source| {
            TransportError::with_source(
                TransportErrorKind::Read,
                format!("failed to read response body: {source}"),
                source,
            )
        })?;
        if read == 0 {
            break;
        }
        if collected.len().saturating_add(read) > max_bytes {
            return Err(TransportError::new(
                TransportErrorKind::Read,
                format!("response body exceeds {max_bytes} bytes"),
            ));
        }
        collected.extend_from_slice(&chunk[..read]);
    }

    Ok(Bytes::from(collected))
}
