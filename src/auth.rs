use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthScheme {
    Basic,
    Digest,
    Ntlm,
}

impl AuthScheme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Digest => "digest",
            Self::Ntlm => "ntlm",
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub scheme: AuthScheme,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        scheme: AuthScheme,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            scheme,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("scheme", &self.scheme)
            .finish()
    }
}

/// Tells the executor which credential negotiation to perform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthDirective {
    pub scheme: AuthScheme,
    pub credentials: Credentials,
}

impl AuthDirective {
    /// `user:password` as transports expect it.
    pub fn user_password(&self) -> String {
        format!(
            "{}:{}",
            self.credentials.username, self.credentials.password
        )
    }

    pub fn basic_header_value(&self) -> String {
        format!("Basic {}", STANDARD.encode(self.user_password()))
    }
}

/// Bearer and custom tokens never reach this point; they are written to the
/// `Authorization` header when configured.
pub fn auth_directive(credentials: Option<&Credentials>) -> Option<AuthDirective> {
    credentials.map(|credentials| AuthDirective {
        scheme: credentials.scheme,
        credentials: credentials.clone(),
    })
}

pub fn token_header_value(token: &str, token_type: &str) -> String {
    format!("{} {}", token_type.trim(), token.trim())
        .trim()
        .to_owned()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct DigestChallenge {
    pub(crate) realm: String,
    pub(crate) nonce: String,
    pub(crate) opaque: Option<String>,
    pub(crate) algorithm: Option<String>,
    pub(crate) qop_auth: bool,
}

/// Parses a `WWW-Authenticate: Digest ...` challenge. Only MD5 is accepted.
pub(crate) fn parse_digest_challenge(header: &str) -> Option<DigestChallenge> {
    let (scheme, params) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("digest") {
        return None;
    }

    let mut challenge = DigestChallenge::default();
    let mut nonce_seen = false;
    for (name, value) in split_auth_params(params) {
        match name.to_ascii_lowercase().as_str() {
            "realm" => challenge.realm = value,
            "nonce" => {
                challenge.nonce = value;
                nonce_seen = true;
            }
            "opaque" => challenge.opaque = Some(value),
            "algorithm" => challenge.algorithm = Some(value),
            "qop" => {
                challenge.qop_auth = value
                    .split(',')
                    .any(|option| option.trim().eq_ignore_ascii_case("auth"));
            }
            _ => {}
        }
    }

    if !nonce_seen {
        return None;
    }
    if let Some(algorithm) = &challenge.algorithm
        && !algorithm.eq_ignore_ascii_case("md5")
    {
        return None;
    }
    Some(challenge)
}

fn split_auth_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = params.trim();
    while !rest.is_empty() {
        let Some((name, after_name)) = rest.split_once('=') else {
            break;
        };
        let name = name.trim().trim_start_matches(',').trim().to_owned();
        let after_name = after_name.trim_start();
        let (value, remainder) = if let Some(quoted) = after_name.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (quoted[..end].to_owned(), &quoted[end + 1..]),
                None => (quoted.to_owned(), ""),
            }
        } else {
            match after_name.find(',') {
                Some(end) => (after_name[..end].trim().to_owned(), &after_name[end..]),
                None => (after_name.trim().to_owned(), ""),
            }
        };
        pairs.push((name, value));
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }
    pairs
}

/// RFC 2617 `Authorization: Digest` value for one request.
pub(crate) fn digest_authorization(
    directive: &AuthDirective,
    challenge: &DigestChallenge,
    method: &str,
    uri_path: &str,
) -> String {
    let credentials = &directive.credentials;
    let ha1 = md5_hex(&format!(
        "{}:{}:{}",
        credentials.username, challenge.realm, credentials.password
    ));
    let ha2 = md5_hex(&format!("{method}:{uri_path}"));

    let mut header = format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
        credentials.username, challenge.realm, challenge.nonce, uri_path
    );
    if challenge.qop_auth {
        let cnonce = format!("{:016x}", rand::rng().random::<u64>());
        let nonce_count = "00000001";
        let response = md5_hex(&format!(
            "{ha1}:{}:{nonce_count}:{cnonce}:auth:{ha2}",
            challenge.nonce
        ));
        header.push_str(&format!(
            ", qop=auth, nc={nonce_count}, cnonce=\"{cnonce}\", response=\"{response}\""
        ));
    } else {
        let response = md5_hex(&format!("{ha1}:{}:{ha2}", challenge.nonce));
        header.push_str(&format!(", response=\"{response}\""));
    }
    if let Some(opaque) = &challenge.opaque {
        header.push_str(&format!(", opaque=\"{opaque}\""));
    }
    if challenge.algorithm.is_some() {
        header.push_str(", algorithm=MD5");
    }
    header
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}
