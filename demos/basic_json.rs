use std::time::Duration;

use reqfluent::prelude::{PendingRequest, ReadOnlyDocument};
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Deserialize)]
struct EchoBody {
    #[serde(default)]
    url: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("reqfluent=debug,info"))
        .with_target(false)
        .init();

    let mut request = PendingRequest::new();
    request
        .base_url("https://postman-echo.com")
        .accept_json()
        .timeout(Duration::from_secs(5))
        .with_query_parameters([("source", "reqfluent")]);

    let response = request
        .get_with_query("/get?lang=en", [("q", "fluent")])?
        .on_error(|response| eprintln!("request failed: status={}", response.status()));
    println!("status={} args={}", response.status(), response.json_or("args", json!({})));

    let echoed: EchoBody = response.object();
    println!("echoed url={}", echoed.url);

    let created = request
        .post_with("/post", json!({"name": "demo", "tags": ["a", "b"]}))?
        .throw()?;
    println!("has json field: {}", created.has("json"));
    Ok(())
}
