//! Request and response metadata exchanged with the [`Transport`](crate::loader::Transport).

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::{self, HeaderMap, HeaderValue, IntoHeaderName};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::freshness::{CacheControl, parse_http_date};

/// Whether credentials are attached to an outbound request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CredentialsPolicy {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// The outbound request a [`LoadSession`](crate::loader::LoadSession) hands to the transport.
#[derive(Clone, Debug)]
pub struct ResourceRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub credentials: CredentialsPolicy,
}

impl ResourceRequest {
    /// Creates a plain `GET` request.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            credentials: CredentialsPolicy::default(),
        }
    }

    /// Whether this request asks the origin to validate a cached copy.
    pub fn is_conditional(&self) -> bool {
        self.headers.contains_key(header::IF_NONE_MATCH)
            || self.headers.contains_key(header::IF_MODIFIED_SINCE)
    }
}

/// Response metadata as received from the origin.
#[derive(Clone, Debug)]
pub struct ResourceResponse {
    url: Url,
    status: StatusCode,
    headers: HeaderMap,
}

impl ResourceResponse {
    pub fn new(url: Url, status: StatusCode) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns the first value of `name` if it is valid visible ASCII.
    pub fn header_str(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Parsed `Cache-Control` directives, with `Pragma: no-cache` folded in.
    pub fn cache_control(&self) -> CacheControl {
        let values = self
            .headers
            .get_all(header::CACHE_CONTROL)
            .iter()
            .filter_map(|value| value.to_str().ok());
        let mut cache_control = CacheControl::parse(values);

        if !cache_control.no_cache {
            cache_control.no_cache = self
                .header_str(header::PRAGMA)
                .is_some_and(|pragma| pragma.to_ascii_lowercase().contains("no-cache"));
        }
        cache_control
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.header_str(header::DATE).and_then(parse_http_date)
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.header_str(header::EXPIRES).and_then(parse_http_date)
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.header_str(header::LAST_MODIFIED)
            .and_then(parse_http_date)
    }

    /// The `Age` header in seconds.
    pub fn age(&self) -> Option<TimeDelta> {
        let age: i64 = self.header_str(header::AGE)?.trim().parse().ok()?;
        TimeDelta::try_seconds(age)
    }

    pub fn etag(&self) -> Option<&str> {
        self.header_str(header::ETAG)
    }

    /// Whether the response carries an `ETag` or `Last-Modified` usable for revalidation.
    pub fn has_cache_validator_fields(&self) -> bool {
        self.headers.contains_key(header::ETAG) || self.headers.contains_key(header::LAST_MODIFIED)
    }

    /// Whether this is a `multipart/x-mixed-replace` stream, which may interleave several
    /// responses with their data.
    pub fn is_multipart(&self) -> bool {
        self.header_str(header::CONTENT_TYPE).is_some_and(|content_type| {
            content_type
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("multipart/x-mixed-replace")
        })
    }
}
