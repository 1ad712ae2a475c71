use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use tracing::{debug, info_span, warn};

use crate::error::TransportError;
use crate::response::Response;
use crate::transport::RawResponse;

/// Decides whether another attempt should follow.
///
/// Called with the transport error when the exchange failed outright (the
/// response is then the zero-status stand-in), and with `None` for completed
/// exchanges that returned status 400 or above.
pub trait RetryPredicate: Send + Sync {
    fn should_retry(&self, response: &Response, error: Option<&TransportError>) -> bool;
}

impl<F> RetryPredicate for F
where
    F: Fn(&Response, Option<&TransportError>) -> bool + Send + Sync,
{
    fn should_retry(&self, response: &Response, error: Option<&TransportError>) -> bool {
        self(response, error)
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    attempts: usize,
    delay: Duration,
    predicate: Option<Arc<dyn RetryPredicate>>,
    throw_on_exhaustion: bool,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryPolicy")
            .field("attempts", &self.attempts)
            .field("delay", &self.delay)
            .field("predicate", &self.predicate.is_some())
            .field("throw_on_exhaustion", &self.throw_on_exhaustion)
            .finish()
    }
}

impl RetryPolicy {
    /// One attempt, accept whatever comes back.
    pub fn disabled() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
            predicate: None,
            throw_on_exhaustion: true,
        }
    }

    pub fn new(attempts: usize) -> Self {
        Self::disabled().attempts(attempts)
    }

    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn delay_ms(self, delay_ms: u64) -> Self {
        self.delay(Duration::from_millis(delay_ms))
    }

    pub fn when<F>(self, predicate: F) -> Self
    where
        F: Fn(&Response, Option<&TransportError>) -> bool + Send + Sync + 'static,
    {
        self.predicate(predicate)
    }

    pub fn predicate<P>(mut self, predicate: P) -> Self
    where
        P: RetryPredicate + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Stored for callers that want to raise once attempts run out; the
    /// retry loop itself never raises.
    pub fn throw_on_exhaustion(mut self, throw: bool) -> Self {
        self.throw_on_exhaustion = throw;
        self
    }

    pub fn configured_attempts(&self) -> usize {
        self.attempts
    }

    pub fn configured_delay(&self) -> Duration {
        self.delay
    }

    pub fn throws_on_exhaustion(&self) -> bool {
        self.throw_on_exhaustion
    }

    fn predicate_requests_retry(
        &self,
        response: &Response,
        error: Option<&TransportError>,
    ) -> bool {
        self.predicate
            .as_ref()
            .is_some_and(|predicate| predicate.should_retry(response, error))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl From<usize> for RetryPolicy {
    fn from(attempts: usize) -> Self {
        Self::new(attempts)
    }
}

impl From<(usize, u64)> for RetryPolicy {
    fn from((attempts, delay_ms): (usize, u64)) -> Self {
        Self::new(attempts).delay_ms(delay_ms)
    }
}

/// Runs `call` until the policy accepts an outcome or attempts run out.
///
/// Transport failures become zero-status responses; nothing is raised here.
/// A panic inside the predicate unwinds to the caller.
pub fn run_with_retry<F>(policy: &RetryPolicy, method: &str, uri: &str, mut call: F) -> Response
where
    F: FnMut() -> Result<RawResponse, TransportError>,
{
    let max_attempts = policy.attempts.max(1);
    let mut last_seen: Option<Response> = None;

    for attempt in 1..=max_attempts {
        let span = info_span!(
            "reqfluent.request",
            method = %method,
            uri = %uri,
            attempt = attempt,
            max_attempts = max_attempts
        );
        let _enter = span.enter();
        debug!("sending request");

        match call() {
            Err(error) => {
                let response = Response::transport_failure(&error);
                if !policy.predicate_requests_retry(&response, Some(&error)) {
                    debug!(error = %error, "transport failure returned as zero-status response");
                    return response;
                }
                if attempt < max_attempts {
                    warn!(
                        delay = ?policy.delay,
                        error = %error,
                        "retrying request after transport error"
                    );
                }
                last_seen = Some(response);
            }
            Ok(raw) => {
                let response = Response::from(raw);
                if !response.is_failed() || !policy.predicate_requests_retry(&response, None) {
                    return response;
                }
                if attempt < max_attempts {
                    warn!(
                        delay = ?policy.delay,
                        status = response.status(),
                        "retrying request after failed status"
                    );
                }
                last_seen = Some(response);
            }
        }

        if attempt < max_attempts && !policy.delay.is_zero() {
            sleep(policy.delay);
        }
    }

    last_seen.unwrap_or_else(Response::empty)
}
