use crate::{common::data::Error::JsonConversionError, server::RequestMetadata};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    time::Duration,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot convert request body from JSON: {0}")]
    JsonConversionError(#[from] serde_json::Error),
}

/// An immutable capture of one HTTP request received by the recorder.
///
/// Header names are stored the way the HTTP layer reports them (lowercase for HTTP/1.1
/// under `hyper`), but every lookup through [`RequestRecord::header`] ignores case.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct RequestRecord {
    method: String,
    path: String,
    query: String,
    headers: Vec<(String, String)>,
    body: Bytes,
    remote_address: Option<String>,
}

impl RequestRecord {
    pub(crate) fn new(
        method: String,
        path: String,
        query: String,
        headers: Vec<(String, String)>,
        body: Bytes,
        remote_address: Option<String>,
    ) -> Self {
        Self {
            method,
            path,
            query,
            headers,
            body,
            remote_address,
        }
    }

    /// The HTTP method, e.g. `"POST"`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The route component of the request URI, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string (without the leading `?`). Empty if the request had none.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Decodes the query string into key/value pairs, keeping their original order.
    pub fn query_params(&self) -> Vec<(String, String)> {
        form_urlencoded::parse(self.query.as_bytes())
            .into_owned()
            .collect()
    }

    /// All request headers in arrival order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Returns the first value of the header with the given name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header(http::header::USER_AGENT.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(http::header::CONTENT_TYPE.as_str())
    }

    /// The request body exactly as it was received.
    pub fn body(&self) -> &[u8] {
        self.body.as_ref()
    }

    /// Cheaply clones the body (`Bytes` shares the underlying buffer).
    pub fn body_bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// The body as text. Invalid UTF-8 sequences are replaced.
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Deserializes the body from JSON.
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(JsonConversionError)
    }

    /// The address of the peer that sent the request, if known.
    pub fn remote_address(&self) -> Option<&str> {
        self.remote_address.as_deref()
    }
}

impl From<&http::Request<Bytes>> for RequestRecord {
    fn from(value: &http::Request<Bytes>) -> Self {
        // Header values that are not valid UTF-8 are kept in lossy form rather than rejected,
        // so that the request is still recorded.
        let headers = value
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();

        let remote_address = value
            .extensions()
            .get::<RequestMetadata>()
            .map(|m| m.remote_address.to_string());

        RequestRecord::new(
            value.method().to_string(),
            value.uri().path().to_string(),
            value.uri().query().unwrap_or("").to_string(),
            headers,
            // Since Bytes shares data, clone does not copy the body.
            value.body().clone(),
            remote_address,
        )
    }
}

impl fmt::Debug for RequestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRecord")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("body", &String::from_utf8_lossy(&self.body))
            .field("remote_address", &self.remote_address)
            .finish()
    }
}

/// A canned HTTP reply bound to one request path.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct ResponseSpec {
    pub status: u16,
    #[serde(default)]
    pub headers: Option<Vec<(String, String)>>,
    #[serde(default)]
    pub body: Option<Bytes>,
    #[serde(default)]
    pub delay: Option<Duration>,
}

impl ResponseSpec {
    /// Creates a reply with the given status code, no headers and no body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: None,
            body: None,
            delay: None,
        }
    }

    /// Adds a response header. Can be called multiple times.
    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));
        self
    }

    /// Sets the response body.
    pub fn body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a JSON response body and the matching `content-type` header.
    pub fn json_body(self, body: serde_json::Value) -> Self {
        self.header(http::header::CONTENT_TYPE.as_str(), "application/json")
            .body(body.to_string())
    }

    /// Delays the reply by the given duration. The request is recorded before the delay.
    pub fn delay(mut self, duration: Duration) -> Self {
        self.delay = Some(duration);
        self
    }
}

/// The full set of path to [`ResponseSpec`] bindings that a server serves at one moment.
///
/// Paths are matched exactly, without the query string. There is no prefix or pattern
/// matching.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
#[serde(transparent)]
pub struct ResponseTable {
    routes: BTreeMap<String, ResponseSpec>,
}

impl ResponseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding and returns the table, for chaining.
    pub fn with<P: Into<String>>(mut self, path: P, response: ResponseSpec) -> Self {
        self.insert(path, response);
        self
    }

    /// Adds a binding, replacing any previous one for the same path.
    pub fn insert<P: Into<String>>(&mut self, path: P, response: ResponseSpec) {
        self.routes.insert(path.into(), response);
    }

    pub fn get(&self, path: &str) -> Option<&ResponseSpec> {
        self.routes.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<P: Into<String>> FromIterator<(P, ResponseSpec)> for ResponseTable {
    fn from_iter<I: IntoIterator<Item = (P, ResponseSpec)>>(iter: I) -> Self {
        Self {
            routes: iter.into_iter().map(|(p, r)| (p.into(), r)).collect(),
        }
    }
}

impl From<HashMap<String, ResponseSpec>> for ResponseTable {
    fn from(value: HashMap<String, ResponseSpec>) -> Self {
        value.into_iter().collect()
    }
}

impl From<BTreeMap<String, ResponseSpec>> for ResponseTable {
    fn from(routes: BTreeMap<String, ResponseSpec>) -> Self {
        Self { routes }
    }
}

pub(crate) fn missing_body_message(path: &str) -> String {
    format!(
        "webhook_recorder: missing body in response config for path {}",
        path
    )
}

pub(crate) fn unconfigured_path_message(path: &str) -> String {
    format!("webhook_recorder: missing response config for path {}", path)
}
