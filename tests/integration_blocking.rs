use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use reqfluent::prelude::{
    Attachment, PendingRequest, ReadOnlyDocument, RetryPolicy, TransportError, UreqExecutor,
};
use reqfluent::{Response, TransportErrorKind};
use serde_json::json;

#[derive(Clone)]
struct Scripted {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    delay: Duration,
}

impl Scripted {
    fn json(status: u16, body: &str) -> Self {
        Self::new(status, body).header("Content-Type", "application/json")
    }

    fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct Captured {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Captured {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Serves the scripted responses in order, one connection each, then stops.
struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<Captured>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(script: Vec<Scripted>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let served_by_thread = Arc::clone(&served);
        let captured_by_thread = Arc::clone(&captured);

        let join = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(3);
            let mut next = 0;
            while next < script.len() && Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        if let Ok(request) = read_request(&mut stream) {
                            captured_by_thread
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }
                        let reply = &script[next];
                        next += 1;
                        served_by_thread.fetch_add(1, Ordering::SeqCst);
                        if !reply.delay.is_zero() {
                            thread::sleep(reply.delay);
                        }
                        let _ = write_response(&mut stream, reply);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            served,
            captured,
            join: Some(join),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<Captured> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<Captured> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    let header_end = loop {
        if let Some(end) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
            break end;
        }
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before end of headers",
            ));
        }
        raw.extend_from_slice(&chunk[..read]);
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_owned();
    let target = request_line.next().unwrap_or_default().to_owned();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_owned()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 4096];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(Captured {
        method,
        target,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, reply: &Scripted) -> std::io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reason_phrase(reply.status),
        reply.body.len()
    );
    for (name, value) in &reply.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    stream.write_all(head.as_bytes())?;
    stream.write_all(&reply.body)?;
    stream.flush()
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        401 => "Unauthorized",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn client() -> PendingRequest {
    let mut request = PendingRequest::using(
        UreqExecutor::builder()
            .default_timeout(Duration::from_secs(2))
            .build(),
    );
    request.timeout(Duration::from_secs(2));
    request
}

#[test]
fn get_decodes_json_and_sends_no_body() {
    let server = MockServer::start(vec![Scripted::json(200, r#"{"ok":true,"items":[1,2]}"#)]);

    let response = client()
        .base_url(server.base_url.clone())
        .accept_json()
        .get("/v1/ping")
        .expect("get should not raise");

    assert!(response.is_ok());
    assert_eq!(response.json_path("ok"), Some(&json!(true)));
    assert_eq!(response.collect_key("items").len(), 2);
    assert_eq!(response.header("content-type"), "application/json");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].target, "/v1/ping");
    assert_eq!(requests[0].header("accept"), Some("application/json"));
    assert!(requests[0].body.is_empty());
}

#[test]
fn query_precedence_reaches_the_wire() {
    let server = MockServer::start(vec![Scripted::json(200, "{}")]);

    client()
        .with_query_parameters([("page", "1"), ("lang", "en")])
        .get_with_query(&server.url("/search?page=2"), [("q", "rust lang")])
        .expect("get");

    assert_eq!(
        server.requests()[0].target,
        "/search?page=2&lang=en&q=rust+lang"
    );
}

#[test]
fn post_json_body_round_trips_structure() {
    let server = MockServer::start(vec![Scripted::json(201, r#"{"id":"item-1"}"#)]);

    let response = client()
        .post_with(
            &server.url("/v1/items"),
            json!({"name": "demo", "tags": ["a", "b"], "meta": {"n": 1}}),
        )
        .expect("post");

    assert!(response.is_created());
    assert_eq!(response.get("id"), Some(&json!("item-1")));

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(
        request.body_text(),
        r#"{"name":"demo","tags":["a","b"],"meta":{"n":1}}"#
    );
}

#[test]
fn form_put_is_url_encoded() {
    let server = MockServer::start(vec![Scripted::json(200, "{}")]);

    client()
        .as_form()
        .put_with(&server.url("/profile"), json!({"name": "Ada Lovelace", "age": 36}))
        .expect("put");

    let request = &server.requests()[0];
    assert_eq!(request.method, "PUT");
    assert_eq!(
        request.header("content-type"),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(request.body_text(), "name=Ada+Lovelace&age=36");
}

#[test]
fn multipart_parts_are_fields_then_files() {
    let server = MockServer::start(vec![Scripted::json(200, "{}")]);
    let directory = tempfile::tempdir().expect("temp dir");
    let path = directory.path().join("second.txt");
    std::fs::write(&path, b"from disk").expect("write attachment");

    client()
        .attach(("file1", "first contents", "first.txt"))
        .attach(Attachment::new("file2", path.as_path()))
        .post_with(&server.url("/upload"), json!({"a": 1, "b": "two"}))
        .expect("post multipart");

    let request = &server.requests()[0];
    let content_type = request.header("content-type").expect("content type");
    let boundary = content_type
        .strip_prefix("multipart/form-data; boundary=")
        .expect("multipart boundary");
    let body = request.body_text();
    assert!(body.ends_with(&format!("--{boundary}--\r\n")));

    let positions: Vec<usize> = [
        "name=\"a\"",
        "name=\"b\"",
        "name=\"file1\"; filename=\"first.txt\"",
        "name=\"file2\"; filename=\"second.txt\"",
    ]
    .iter()
    .map(|needle| body.find(needle).expect("part present"))
    .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(body.contains("from disk"));
    assert!(body.contains("\r\n\r\ntwo\r\n"));
}

#[test]
fn delete_with_empty_payload_sends_no_body() {
    let server = MockServer::start(vec![Scripted::new(204, "")]);

    let response = client()
        .delete_with(&server.url("/items/7"), json!({}))
        .expect("delete");

    assert!(response.is_no_content());
    let request = &server.requests()[0];
    assert_eq!(request.method, "DELETE");
    assert!(request.body.is_empty());
}

#[test]
fn retry_predicate_replays_until_success() {
    let server = MockServer::start(vec![
        Scripted::json(500, r#"{"error":"boom"}"#),
        Scripted::json(200, r#"{"ok":true}"#),
    ]);

    let response = client()
        .retry(
            RetryPolicy::new(3)
                .delay_ms(10)
                .when(|response: &Response, _: Option<&TransportError>| response.status() == 500),
        )
        .get(&server.url("/flaky"))
        .expect("get");

    assert!(response.is_ok());
    assert_eq!(server.served(), 2);
}

#[test]
fn exhausted_retries_return_last_failure_without_raising() {
    let server = MockServer::start(vec![
        Scripted::json(503, "{}"),
        Scripted::json(503, r#"{"attempt":2}"#),
    ]);

    let response = client()
        .retry(RetryPolicy::new(2).when(|_: &Response, _: Option<&TransportError>| true))
        .get(&server.url("/down"))
        .expect("verb calls never raise on status");

    assert_eq!(response.status(), 503);
    assert_eq!(response.json_path("attempt"), Some(&json!(2)));
    let error = response.throw().expect_err("explicit throw raises");
    assert_eq!(error.status(), 503);
}

#[test]
fn basic_auth_is_sent_preemptively() {
    let server = MockServer::start(vec![Scripted::json(200, "{}")]);

    client()
        .with_basic_auth("Aladdin", "open sesame")
        .get(&server.url("/private"))
        .expect("get");

    assert_eq!(server.served(), 1);
    assert_eq!(
        server.requests()[0].header("authorization"),
        Some("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==")
    );
}

#[test]
fn digest_auth_answers_the_challenge() {
    let server = MockServer::start(vec![
        Scripted::new(401, "").header(
            "WWW-Authenticate",
            r#"Digest realm="api", qop="auth", nonce="abc123", opaque="xyz""#,
        ),
        Scripted::json(200, r#"{"ok":true}"#),
    ]);

    let response = client()
        .with_digest_auth("user", "secret")
        .get(&server.url("/private?x=1"))
        .expect("get");

    assert!(response.is_ok());
    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].header("authorization").is_none());
    let authorization = requests[1].header("authorization").expect("digest header");
    assert!(authorization.starts_with("Digest username=\"user\""));
    assert!(authorization.contains("realm=\"api\""));
    assert!(authorization.contains("uri=\"/private?x=1\""));
    assert!(authorization.contains("qop=auth"));
    assert!(authorization.contains("opaque=\"xyz\""));
}

#[test]
fn bearer_token_and_repeated_response_headers() {
    let server = MockServer::start(vec![
        Scripted::json(200, "{}")
            .header("Set-Cookie", "a=1")
            .header("Set-Cookie", "b=2"),
    ]);

    let response = client()
        .with_token("t0ken")
        .get(&server.url("/me"))
        .expect("get");

    assert_eq!(
        server.requests()[0].header("authorization"),
        Some("Bearer t0ken")
    );
    assert_eq!(response.header("set-cookie"), "a=1, b=2");
}

#[test]
fn refused_connection_becomes_zero_status_response() {
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("address")
    };

    let response = client()
        .get(&format!("http://{address}/unreachable"))
        .expect("transport failures are not raised");

    assert_eq!(response.status(), 0);
    assert!(response.headers().is_empty());
    assert!(response.body().is_empty());
    assert!(response.transport_failure_message().is_some());
    assert!(!response.is_failed());
}

#[test]
fn predicate_sees_transport_errors() {
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("address")
    };
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);

    let response = client()
        .retry(RetryPolicy::new(3).when(
            move |_: &Response, error: Option<&TransportError>| {
                seen.fetch_add(1, Ordering::SeqCst);
                error.is_some_and(|error| error.kind() != TransportErrorKind::Tls)
            },
        ))
        .get(&format!("http://{address}/unreachable"))
        .expect("get");

    assert_eq!(response.status(), 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn slow_server_times_out_into_zero_status() {
    let server = MockServer::start(vec![
        Scripted::json(200, "{}").delayed(Duration::from_millis(600)),
    ]);

    let response = client()
        .timeout(Duration::from_millis(150))
        .get(&server.url("/slow"))
        .expect("get");

    assert_eq!(response.status(), 0);
    assert!(
        response
            .transport_failure_message()
            .is_some_and(|message| message.contains("timeout") || message.contains("timed out"))
    );
}

#[test]
fn oversized_body_is_reported_as_transport_failure() {
    let server = MockServer::start(vec![Scripted::new(200, "0123456789")]);
    let mut request = PendingRequest::using(
        UreqExecutor::builder()
            .max_response_body_bytes(4)
            .default_timeout(Duration::from_secs(2))
            .build(),
    );

    let response = request.get(&server.url("/large")).expect("get");

    assert_eq!(response.status(), 0);
    assert!(
        response
            .transport_failure_message()
            .is_some_and(|message| message.contains("exceeds 4 bytes"))
    );
}
