//! HTTP freshness rules, RFC 2616 section 13.
//!
//! All functions in here are pure: the time the response was received and the current time are
//! passed in explicitly. Ages and lifetimes are signed, a lifetime computed from an `Expires`
//! header in the past is negative and therefore always stale. Non-HTTP resources get a lifetime
//! of [`TimeDelta::MAX`].

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

use crate::response::ResourceResponse;

/// The `Cache-Control` directives relevant for reuse decisions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_store: bool,
    pub must_revalidate: bool,
    pub max_age: Option<TimeDelta>,
}

impl CacheControl {
    /// Parses the directives out of all `Cache-Control` header values.
    ///
    /// Unknown directives are ignored. If `max-age` appears more than once, the first valid
    /// value wins.
    pub fn parse<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut cache_control = Self::default();

        let directives = values.into_iter().flat_map(|value| split_directives(value));

        for directive in directives {
            let (name, value) = match directive.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (directive.trim(), None),
            };

            if name.eq_ignore_ascii_case("no-cache") {
                cache_control.no_cache = true;
            } else if name.eq_ignore_ascii_case("no-store") {
                cache_control.no_store = true;
            } else if name.eq_ignore_ascii_case("must-revalidate") {
                cache_control.must_revalidate = true;
            } else if name.eq_ignore_ascii_case("max-age") && cache_control.max_age.is_none() {
                cache_control.max_age = value.and_then(parse_delta_seconds);
            }
        }

        cache_control
    }
}

/// Splits a header value at commas that are not inside a quoted string.
fn split_directives(value: &str) -> impl Iterator<Item = &str> {
    let mut in_quotes = false;
    value
        .split(move |c| {
            if c == '"' {
                in_quotes = !in_quotes;
            }
            c == ',' && !in_quotes
        })
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
}

fn parse_delta_seconds(value: &str) -> Option<TimeDelta> {
    let seconds: i64 = value.parse().ok()?;
    Some(TimeDelta::try_seconds(seconds).unwrap_or(TimeDelta::MAX))
}

/// Parses an HTTP date in any of the three formats RFC 2616 section 3.3.1 requires.
///
/// ```
/// # use subresource::freshness::parse_http_date;
/// let imf = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT");
/// let rfc850 = parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT");
/// let asctime = parse_http_date("Sun Nov  6 08:49:37 1994");
/// assert!(imf.is_some());
/// assert_eq!(imf, rfc850);
/// assert_eq!(imf, asctime);
/// ```
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    const FALLBACK_FORMATS: &[&str] = &["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"];

    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    FALLBACK_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// The current age of a response, RFC 2616 section 13.2.3.
///
/// There is no compensation for request latency.
pub fn current_age(
    response: &ResourceResponse,
    received_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> TimeDelta {
    let apparent_age = response
        .date()
        .map(|date| (received_at - date).max(TimeDelta::zero()))
        .unwrap_or_else(TimeDelta::zero);
    let corrected_received_age = match response.age() {
        Some(age) => apparent_age.max(age),
        None => apparent_age,
    };
    let resident_time = now - received_at;

    corrected_received_age
        .checked_add(&resident_time)
        .unwrap_or(TimeDelta::MAX)
}

/// How long a response stays fresh after its creation, RFC 2616 section 13.2.4.
pub fn freshness_lifetime(response: &ResourceResponse, received_at: DateTime<Utc>) -> TimeDelta {
    let url = response.url();
    // Local files should be reloaded in case they change.
    if url.scheme() == "file" {
        return TimeDelta::zero();
    }
    // Cache other non-http / non-filesystem resources liberally.
    if !matches!(url.scheme(), "http" | "https" | "filesystem") {
        return TimeDelta::MAX;
    }

    if let Some(max_age) = response.cache_control().max_age {
        return max_age;
    }

    let creation_time = response.date().unwrap_or(received_at);
    if let Some(expires) = response.expires() {
        return expires - creation_time;
    }
    if let Some(last_modified) = response.last_modified() {
        return (creation_time - last_modified) / 10;
    }

    // Without any cache headers the decision is left to us, other user agents opt for 0.
    TimeDelta::zero()
}

/// Whether a cached response may be served without contacting the origin.
///
/// A missing response is never usable. Otherwise the response must not forbid reuse and must be
/// fresh; an age equal to the lifetime still counts as fresh.
pub fn can_use_response(
    response: Option<&ResourceResponse>,
    received_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    let Some(response) = response else {
        return false;
    };

    let cache_control = response.cache_control();
    if cache_control.no_cache || cache_control.no_store {
        return false;
    }

    match response.status().as_u16() {
        // Must not be cached.
        303 => return false,
        // Default to not cacheable unless explicitly allowed.
        302 | 307 => {
            if cache_control.max_age.is_none() && response.expires().is_none() {
                return false;
            }
        }
        _ => {}
    }

    current_age(response, received_at, now) <= freshness_lifetime(response, received_at)
}

/// Whether the response has outlived its freshness lifetime.
pub fn is_expired(
    response: &ResourceResponse,
    received_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    current_age(response, received_at, now) > freshness_lifetime(response, received_at)
}

/// Whether the response forbids reuse without asking the origin first.
pub fn must_revalidate_due_to_cache_headers(response: &ResourceResponse) -> bool {
    let cache_control = response.cache_control();
    cache_control.no_cache || cache_control.no_store
}

/// Whether a conditional request can be used to revalidate this response.
pub fn can_use_cache_validator(response: &ResourceResponse) -> bool {
    !response.cache_control().no_store && response.has_cache_validator_fields()
}
