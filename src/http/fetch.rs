//! Fetch specifications and per-item results.
//!
//! A fetch is a GET against an upstream API. Failures are data: every spec
//! produces exactly one [`FetchResult`], so a batch always answers with one
//! item per request in submission order.

use crate::base::neterror::NetError;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use url::Url;

/// Message returned for a spec with a missing or empty `url`.
pub const NO_URL_PROVIDED: &str = "No URL provided";

/// One upstream GET request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchSpec {
    pub url: Option<String>,
    pub params: Map<String, Value>,
    /// Header pairs in the order they were supplied.
    pub headers: Vec<(String, String)>,
}

impl FetchSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Reads a spec out of a JSON object.
    ///
    /// Unknown keys are ignored. A `params` or `headers` member that is not an
    /// object is treated as absent; non-string header values are rendered as
    /// JSON text and `null` header values are dropped.
    pub fn from_value(value: &Value) -> Self {
        let url = value
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string);

        let params = value
            .get("params")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let headers = value
            .get("headers")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| scalar_text(v).map(|text| (k.clone(), text)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            url,
            params,
            headers,
        }
    }

    /// JSON form, as sent to the daemon.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(url) = &self.url {
            map.insert("url".into(), Value::String(url.clone()));
        }
        if !self.params.is_empty() {
            map.insert("params".into(), Value::Object(self.params.clone()));
        }
        if !self.headers.is_empty() {
            let headers = self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            map.insert("headers".into(), Value::Object(headers));
        }
        Value::Object(map)
    }

    /// The URL when present and non-blank.
    pub fn target(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Parses the URL and appends the query parameters.
    pub fn build_url(&self) -> Result<Url, NetError> {
        let raw = self.target().ok_or(NetError::InvalidUrl)?;
        let mut url = Url::parse(raw).map_err(|_| NetError::InvalidUrl)?;

        let pairs = query_pairs(&self.params);
        if !pairs.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }

    /// Header map from the supplied pairs; invalid names or values are skipped.
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.append(name, value);
                }
                _ => tracing::debug!(header = %name, "skipping invalid request header"),
            }
        }
        map
    }
}

/// Renders query parameters: strings verbatim, numbers and booleans as JSON
/// text, one pair per array element, `null` dropped.
pub fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len());
    for (key, value) in params {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = scalar_text(item) {
                        pairs.push((key.clone(), text));
                    }
                }
            }
            other => {
                if let Some(text) = scalar_text(other) {
                    pairs.push((key.clone(), text));
                }
            }
        }
    }
    pairs
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Outcome of one fetch, serialized as the per-item response object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FetchResult {
    Success {
        status: u16,
        text: String,
        json: Value,
    },
    Error {
        error: String,
    },
}

impl FetchResult {
    pub fn error(message: impl Into<String>) -> Self {
        FetchResult::Error {
            error: message.into(),
        }
    }

    pub fn no_url() -> Self {
        Self::error(NO_URL_PROVIDED)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }

    /// Status code of a successful fetch.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchResult::Success { status, .. } => Some(*status),
            FetchResult::Error { .. } => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            FetchResult::Success { status, text, json } => serde_json::json!({
                "status": status,
                "text": text,
                "json": json,
            }),
            FetchResult::Error { error } => serde_json::json!({ "error": error }),
        }
    }
}

impl From<NetError> for FetchResult {
    fn from(err: NetError) -> Self {
        FetchResult::error(err.to_string())
    }
}

/// Alias for the `Future` type returned by a fetcher.
pub type Fetching<'a> = Pin<Box<dyn Future<Output = FetchResult> + Send + 'a>>;

/// Capability to execute fetch specs. Implementations never fail; errors
/// come back as [`FetchResult::Error`].
pub trait Fetch: Send + Sync {
    fn fetch(&self, spec: FetchSpec) -> Fetching<'_>;
}

impl<F: Fetch + ?Sized> Fetch for std::sync::Arc<F> {
    fn fetch(&self, spec: FetchSpec) -> Fetching<'_> {
        (**self).fetch(spec)
    }
}
