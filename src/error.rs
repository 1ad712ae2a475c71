use std::path::PathBuf;

use thiserror::Error;

use crate::response::Response;
use crate::util::truncate_body;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Timeout,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Timeout => "timeout",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Failure to complete a network exchange at all.
///
/// Produced by a [`RequestExecutor`](crate::RequestExecutor) and absorbed by the
/// retry loop into a zero-status [`Response`]; it never escapes a verb call.
#[derive(Debug, Error)]
#[error("http transport error ({kind}): {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: TransportErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("failed to read attachment {field} from {}: {source}", .path.display())]
    ReadFile {
        field: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to drain attachment stream {field}: {source}")]
    ReadStream {
        field: String,
        #[source]
        source: std::io::Error,
    },
}

impl AttachmentError {
    pub fn field(&self) -> &str {
        match self {
            Self::ReadFile { field, .. } | Self::ReadStream { field, .. } => field,
        }
    }
}

/// Raised by the opt-in throwing helpers on [`Response`].
#[derive(Debug, Error)]
#[error("http request returned status code {status}: {summary}")]
pub struct RequestError {
    status: u16,
    summary: String,
    response: Box<Response>,
}

impl RequestError {
    pub(crate) fn new(response: Response) -> Self {
        Self {
            status: response.status(),
            summary: truncate_body(response.body()),
            response: Box::new(response),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn into_response(self) -> Response {
        *self.response
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("response data is read-only; cannot {operation} key {key:?}")]
pub struct ImmutableAccessError {
    pub operation: &'static str,
    pub key: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    Attachment,
    Request,
    ImmutableAccess,
    SerializeJson,
    SerializeQuery,
    InvalidHeaderName,
    InvalidHeaderValue,
    Deserialize,
}

impl ErrorCode {
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::Attachment,
            Self::Request,
            Self::ImmutableAccess,
            Self::SerializeJson,
            Self::SerializeQuery,
            Self::InvalidHeaderName,
            Self::InvalidHeaderValue,
            Self::Deserialize,
        ]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attachment => "attachment",
            Self::Request => "request",
            Self::ImmutableAccess => "immutable_access",
            Self::SerializeJson => "serialize_json",
            Self::SerializeQuery => "serialize_query",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::Deserialize => "deserialize",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    ImmutableAccess(#[from] ImmutableAccessError),
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize request query: {source}")]
    SerializeQuery {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Attachment(_) => ErrorCode::Attachment,
            Self::Request(_) => ErrorCode::Request,
            Self::ImmutableAccess(_) => ErrorCode::ImmutableAccess,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::SerializeQuery { .. } => ErrorCode::SerializeQuery,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
        }
    }
}
