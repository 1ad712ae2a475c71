//! `reqfluent` is a blocking, fluent HTTP request builder with predicate-driven
//! retries and lazily decoded responses.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use reqfluent::prelude::{PendingRequest, RetryPolicy};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut request = PendingRequest::new();
//!     request
//!         .base_url("https://api.example.com/v1")
//!         .with_token("secret")
//!         .timeout(Duration::from_secs(5))
//!         .retry(RetryPolicy::new(3).delay_ms(200).when(|response, error| {
//!             error.is_some() || response.is_server_error()
//!         }));
//!
//!     let user = request
//!         .with_url_parameter("id", "42")
//!         .get("/users/{id}")?
//!         .throw()?;
//!
//!     println!("name={}", user.json_or("name", serde_json::Value::Null));
//!     Ok(())
//! }
//! ```
//!
//! # Behavior Notes
//!
//! - Verb calls never fail on status. Inspect the returned [`Response`] or
//!   opt in with `throw*` helpers.
//! - A transport failure yields a [`Response`] with status `0`.
//! - Query precedence, lowest first: stored parameters, the query embedded in
//!   the URL, the query passed to `get`/`head`.

mod auth;
mod body;
mod collection;
mod error;
mod request;
mod resolve;
mod response;
mod retry;
mod transport;
mod util;

pub use crate::auth::{AuthDirective, AuthScheme, Credentials, auth_directive, token_header_value};
pub use crate::body::{
    Attachment, AttachmentSource, BodyFormat, EncodedBody, Payload, encode_body,
};
pub use crate::collection::Collection;
pub use crate::error::{
    AttachmentError, Error, ErrorCode, ImmutableAccessError, RequestError, TransportError,
    TransportErrorKind,
};
pub use crate::request::{PendingRequest, RequestOptions};
pub use crate::resolve::{Query, resolve_url};
pub use crate::response::{Condition, ReadOnlyDocument, Response};
pub use crate::retry::{RetryPolicy, RetryPredicate, run_with_retry};
pub use crate::transport::{
    RawResponse, RequestDescriptor, RequestExecutor, UreqExecutor, UreqExecutorBuilder,
};

pub type ReqResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Attachment, AttachmentSource, BodyFormat, Collection, Condition, Error, ErrorCode, Payload,
        PendingRequest, Query, ReadOnlyDocument, ReqResult, RequestError, RequestExecutor,
        Response, RetryPolicy, TransportError, TransportErrorKind, UreqExecutor,
    };
}
