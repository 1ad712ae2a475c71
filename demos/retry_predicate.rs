use std::time::Duration;

use reqfluent::prelude::{PendingRequest, Response, RetryPolicy, TransportError};
use reqfluent::{RetryPredicate, TransportErrorKind};

struct RetryOn429OrConnect;

impl RetryPredicate for RetryOn429OrConnect {
    fn should_retry(&self, response: &Response, error: Option<&TransportError>) -> bool {
        match error {
            Some(error) => error.kind() == TransportErrorKind::Connect,
            None => response.is_too_many_requests(),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("reqfluent=debug"))
        .init();

    let mut request = PendingRequest::new();
    request
        .base_url("https://postman-echo.com")
        .timeout(Duration::from_secs(3))
        .retry(
            RetryPolicy::new(3)
                .delay_ms(200)
                .predicate(RetryOn429OrConnect),
        );

    let response = request.get("/status/429")?;
    match response.throw_unless_status(200) {
        Ok(response) => println!("unexpected success: status={}", response.status()),
        Err(error) => println!("request failed after predicate-based retries: {error}"),
    }

    Ok(())
}
