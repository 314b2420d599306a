//! Turns a `Call` plus the client defaults into the `HttpRequest` handed to
//! the transport.
//!
//! Precedence, lowest first:
//! - headers: client headers, then call headers (literal keys); `None` and
//!   empty values are dropped after merging;
//! - query: client params, call params, the query already on the path, then
//!   a structured body moved off a body-prevented method.

use serde_json::{Map, Value};
use tracing::trace;

use crate::abort::AbortSignal;
use crate::config::{parse_opt, Defaults};
use crate::error::ClientError;
use crate::http::{header_value, is_json_media_type, HttpMethod, HttpRequest, RequestBody};
use crate::qs;
use crate::types::Call;

pub(crate) fn normalize(
    method: HttpMethod,
    call: Call,
    signal: AbortSignal,
    defaults: &Defaults,
    default_headers: &[(String, String)],
) -> Result<HttpRequest, ClientError> {
    let Call { path, mut options } = call;
    if let Some(err) = options.take_body_error() {
        return Err(ClientError::Json(err));
    }

    let transport = &defaults.transport;
    let mode = parse_opt(options.mode.as_deref())?.or(transport.mode);
    let cache = parse_opt(options.cache.as_deref())?.or(transport.cache);
    let credentials = parse_opt(options.credentials.as_deref())?.or(transport.credentials);
    let redirect = parse_opt(options.redirect.as_deref())?.or(transport.redirect);
    let referrer_policy = parse_opt(options.referrer.as_deref())?.or(transport.referrer_policy);

    let headers = merge_headers(default_headers, &options.headers);

    let prevented = options
        .prevent_body_on_methods
        .as_deref()
        .unwrap_or(&defaults.prevent_body_on_methods);
    let mut moved_to_query = Map::new();
    let body = match options.body.take() {
        None if method == HttpMethod::Post => Some(RequestBody::Text(String::new())),
        None => None,
        Some(RequestBody::Value(value)) if is_structured(&value) && prevented.contains(&method) => {
            moved_to_query = query_fields(value);
            None
        }
        Some(RequestBody::Value(value))
            if is_structured(&value)
                && header_value(&headers, "Content-Type").is_some_and(is_json_media_type) =>
        {
            Some(RequestBody::Text(serde_json::to_string(&value)?))
        }
        other => other,
    };

    let (path, fragment) = match path.split_once('#') {
        Some((path, fragment)) => (path.to_string(), Some(fragment.to_string())),
        None => (path, None),
    };
    let (segment, existing_query) = match path.split_once('?') {
        Some((segment, query)) => (segment, Some(query)),
        None => (path.as_str(), None),
    };

    let mut query = defaults.params.clone();
    query.extend(options.params);
    if let Some(existing) = existing_query {
        query.extend(qs::parse(existing));
    }
    query.extend(moved_to_query);

    let array_format = options.array_format.unwrap_or(defaults.array_format);
    let encoded = qs::stringify(&query, array_format);

    let mut target = segment.to_string();
    if !encoded.is_empty() {
        target.push('?');
        target.push_str(&encoded);
    }
    if let Some(fragment) = fragment {
        target.push('#');
        target.push_str(&fragment);
    }
    let url = join_uri(defaults.base_uri.as_deref(), &target);

    trace!(%method, %url, headers = headers.len(), "request normalized");

    Ok(HttpRequest {
        method,
        url,
        headers,
        body,
        signal,
        raw: options.raw.unwrap_or(defaults.raw),
        mode,
        cache,
        credentials,
        redirect,
        referrer_policy,
    })
}

fn is_structured(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

/// Top-level arrays are keyed by index, as `qs` does.
fn query_fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| (index.to_string(), item))
            .collect(),
        _ => Map::new(),
    }
}

pub(crate) fn merge_headers(
    defaults: &[(String, String)],
    overrides: &[(String, Option<String>)],
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, Option<String>)> = defaults
        .iter()
        .map(|(key, value)| (key.clone(), Some(value.clone())))
        .collect();
    for (key, value) in overrides {
        match merged.iter_mut().find(|(existing, _)| existing == key) {
            Some(entry) => entry.1 = value.clone(),
            None => merged.push((key.clone(), value.clone())),
        }
    }
    merged
        .into_iter()
        .filter_map(|(key, value)| value.filter(|value| !value.is_empty()).map(|value| (key, value)))
        .collect()
}

/// Joins with exactly one slash between base and path.
fn join_uri(base: Option<&str>, path: &str) -> String {
    match base {
        None => path.to_string(),
        Some(base) if path.is_empty() => base.to_string(),
        Some(base) if path.starts_with('?') || path.starts_with('#') => format!("{base}{path}"),
        Some(base) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        ),
    }
}
