//! Final URL assembly: base URL joining, `{name}` placeholder substitution
//! and query merging.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ReqResult;
use crate::error::Error;
use crate::util::join_base_path;

/// Query data passed to a single `get`/`head` call.
///
/// Either ordered key/value pairs or a pre-encoded query string; the string
/// form is parsed with the same rules as a query embedded in the URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Query {
    Pairs(Vec<(String, String)>),
    Encoded(String),
}

impl Query {
    pub fn empty() -> Self {
        Self::Pairs(Vec::new())
    }

    pub fn from_serialize<T>(params: &T) -> ReqResult<Self>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_urlencoded::to_string(params)
            .map_err(|source| Error::SerializeQuery { source })?;
        Ok(Self::Encoded(encoded))
    }

    fn into_pairs(self) -> Vec<(String, String)> {
        match self {
            Self::Pairs(pairs) => pairs,
            Self::Encoded(encoded) => parse_query(encoded.trim_start_matches('?')),
        }
    }
}

impl From<&str> for Query {
    fn from(value: &str) -> Self {
        Self::Encoded(value.to_owned())
    }
}

impl From<String> for Query {
    fn from(value: String) -> Self {
        Self::Encoded(value)
    }
}

impl<K, V> From<Vec<(K, V)>> for Query
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: Vec<(K, V)>) -> Self {
        Self::Pairs(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Query
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        Self::from(Vec::from(pairs))
    }
}

/// Builds the final request URL.
///
/// Precedence of query values, lowest first: `stored_query`, then the query
/// embedded in `request_url`, then `inline_query`. A later key overwrites an
/// earlier one in place; new keys are appended.
pub fn resolve_url(
    base_url: &str,
    request_url: &str,
    url_parameters: &BTreeMap<String, String>,
    stored_query: &[(String, String)],
    inline_query: Option<Query>,
) -> String {
    let joined = if is_absolute_url(request_url) {
        request_url.to_owned()
    } else {
        join_base_path(base_url, request_url)
    };
    let expanded = expand_placeholders(&joined, url_parameters);

    let (without_fragment, fragment) = match expanded.split_once('#') {
        Some((left, right)) => (left, Some(right)),
        None => (expanded.as_str(), None),
    };
    let (path, embedded) = match without_fragment.split_once('?') {
        Some((left, right)) => (left, parse_query(right)),
        None => (without_fragment, Vec::new()),
    };

    let mut url_query = embedded;
    if let Some(inline_query) = inline_query {
        merge_pairs(&mut url_query, inline_query.into_pairs());
    }

    let mut final_query = stored_query.to_vec();
    merge_pairs(&mut final_query, url_query);

    let mut resolved = path.to_owned();
    if !final_query.is_empty() {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in &final_query {
            serializer.append_pair(name, value);
        }
        resolved.push('?');
        resolved.push_str(&serializer.finish());
    }
    if let Some(fragment) = fragment {
        resolved.push('#');
        resolved.push_str(fragment);
    }
    resolved
}

pub(crate) fn is_absolute_url(candidate: &str) -> bool {
    let Some((scheme, _)) = candidate.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|first| first.is_ascii_alphabetic())
        && chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'))
}

/// Replaces `{name}` and `{+name}` with the matching parameter value.
/// Unknown placeholders are left as written.
pub(crate) fn expand_placeholders(template: &str, parameters: &BTreeMap<String, String>) -> String {
    if parameters.is_empty() || !template.contains('{') {
        return template.to_owned();
    }

    let mut expanded = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        expanded.push_str(&rest[..open]);
        let candidate = &rest[open..];
        let Some(close) = candidate.find('}') else {
            expanded.push_str(candidate);
            return expanded;
        };
        let inner = &candidate[1..close];
        let name = inner.strip_prefix('+').unwrap_or(inner);
        match parameters.get(name) {
            Some(value) => expanded.push_str(value),
            None => expanded.push_str(&candidate[..=close]),
        }
        rest = &candidate[close + 1..];
    }
    expanded.push_str(rest);
    expanded
}

pub(crate) fn parse_query(query: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    merge_pairs(
        &mut pairs,
        url::form_urlencoded::parse(query.as_bytes())
            .map(|(name, value)| (name.into_owned(), value.into_owned())),
    );
    pairs
}

fn merge_pairs(
    target: &mut Vec<(String, String)>,
    overlay: impl IntoIterator<Item = (String, String)>,
) {
    for (name, value) in overlay {
        match target.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => target.push((name, value)),
        }
    }
}
