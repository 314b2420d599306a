//! Transport responses and the shaper that turns them into `Response`s.
//!
//! # Design
//! A `RawResponse` is what a `Transport` produces: metadata plus an unread
//! body stream. Callers only ever see one when they asked for raw mode and
//! the status was ok; everything else goes through `shape`, which reads the
//! body once and attaches a `ResponseError` for failed statuses. A failed
//! status resolves the call. Only transport failures reject it.

use std::collections::BTreeMap;
use std::fmt;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};
use url::form_urlencoded;

use crate::error::ClientError;
use crate::http::header_value;

/// A response body as a stream of chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// Response type, as in `Response.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Basic,
    Cors,
    Default,
    Error,
    Opaque,
    OpaqueRedirect,
}

/// Read-only response metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMeta {
    pub status: u16,
    pub status_text: String,
    /// Header pairs in arrival order, names as received.
    pub headers: Vec<(String, String)>,
    pub url: String,
    pub redirected: bool,
    pub response_type: ResponseType,
}

impl ResponseMeta {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An unshaped transport response with an unread body.
pub struct RawResponse {
    meta: ResponseMeta,
    use_final_url: bool,
    body_used: bool,
    body: Option<BodyStream>,
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("meta", &self.meta)
            .field("use_final_url", &self.use_final_url)
            .field("body_used", &self.body_used)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl RawResponse {
    /// A response with the canonical reason phrase for `status` and no body.
    pub fn new(status: u16) -> Self {
        let status_text = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self {
            meta: ResponseMeta {
                status,
                status_text,
                headers: Vec::new(),
                url: String::new(),
                redirected: false,
                response_type: ResponseType::Basic,
            },
            use_final_url: false,
            body_used: false,
            body: None,
        }
    }

    /// A network error response: status 0, type `error`.
    pub fn error() -> Self {
        let mut response = Self::new(0);
        response.meta.response_type = ResponseType::Error;
        response
    }

    /// A redirect to `url`. `status` must be a redirect status.
    pub fn redirect(url: impl Into<String>, status: u16) -> Result<Self, ClientError> {
        if !matches!(status, 301 | 302 | 303 | 307 | 308) {
            return Err(ClientError::invalid(format!("Invalid status code {status}")));
        }
        Ok(Self::new(status).with_header("Location", url))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_status_text(mut self, status_text: impl Into<String>) -> Self {
        self.meta.status_text = status_text.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.meta.url = url.into();
        self
    }

    pub fn with_redirected(mut self, redirected: bool) -> Self {
        self.meta.redirected = redirected;
        self
    }

    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.meta.response_type = response_type;
        self
    }

    pub fn with_body(self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.with_stream(stream::once(async move { Ok(body) }).boxed())
    }

    pub fn with_stream(mut self, body: BodyStream) -> Self {
        self.body = Some(body);
        self
    }

    pub fn meta(&self) -> &ResponseMeta {
        &self.meta
    }

    pub fn status(&self) -> u16 {
        self.meta.status
    }

    pub fn ok(&self) -> bool {
        self.meta.ok()
    }

    pub fn status_text(&self) -> &str {
        &self.meta.status_text
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.meta.headers
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.meta.headers, name)
    }

    pub fn url(&self) -> &str {
        &self.meta.url
    }

    pub fn redirected(&self) -> bool {
        self.meta.redirected
    }

    pub fn response_type(&self) -> ResponseType {
        self.meta.response_type
    }

    pub fn body_used(&self) -> bool {
        self.body_used
    }

    /// False for responses that never carried a body, such as `HEAD`
    /// replies.
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn use_final_url(&self) -> bool {
        self.use_final_url
    }

    pub fn set_use_final_url(&mut self, value: bool) {
        self.use_final_url = value;
    }

    /// Reads the whole body. A second read fails with `BodyUsed`.
    pub async fn bytes(&mut self) -> Result<Bytes, ClientError> {
        if self.body_used {
            return Err(ClientError::BodyUsed);
        }
        let Some(body) = self.body.take() else {
            return Ok(Bytes::new());
        };
        self.body_used = true;
        let buffer = body
            .try_fold(BytesMut::new(), |mut buffer, chunk| async move {
                buffer.extend_from_slice(&chunk);
                Ok(buffer)
            })
            .await?;
        Ok(buffer.freeze())
    }

    /// Reads the body as UTF-8, replacing invalid sequences.
    pub async fn text(&mut self) -> Result<String, ClientError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T, ClientError> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Reads an `application/x-www-form-urlencoded` body into pairs.
    pub async fn form_data(&mut self) -> Result<Vec<(String, String)>, ClientError> {
        let bytes = self.bytes().await?;
        Ok(form_urlencoded::parse(&bytes).into_owned().collect())
    }

    /// The unread body stream; empty when there is no body.
    pub fn into_stream(self) -> Result<BodyStream, ClientError> {
        if self.body_used {
            return Err(ClientError::BodyUsed);
        }
        Ok(self.body.unwrap_or_else(|| stream::empty().boxed()))
    }

    /// Buffers the body so both this response and the returned copy can be
    /// read independently.
    pub async fn try_clone(&mut self) -> Result<RawResponse, ClientError> {
        if self.body_used {
            return Err(ClientError::BodyUsed);
        }
        let had_body = self.body.is_some();
        let bytes = self.bytes().await?;
        self.body_used = false;

        let mut copy = RawResponse {
            meta: self.meta.clone(),
            use_final_url: self.use_final_url,
            body_used: false,
            body: None,
        };
        if had_body {
            self.body = Some(stream::once(futures::future::ready(Ok(bytes.clone()))).boxed());
            copy = copy.with_body(bytes);
        }
        Ok(copy)
    }
}

/// A parsed response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            ResponseBody::Json(_) => None,
        }
    }
}

/// Failure attached to a resolved response: a non-2xx status, or a JSON
/// body that did not parse.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ResponseError {
    pub message: String,
    /// Set for status failures.
    pub status: Option<u16>,
    pub code: Option<Value>,
    pub param: Option<Value>,
    pub stack: Option<Value>,
}

impl ResponseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: None,
            param: None,
            stack: None,
        }
    }

    fn http(status: u16, status_text: &str) -> Self {
        Self {
            status: Some(status),
            ..Self::new(status_text)
        }
    }

    /// Picks up a `message` string, or the fields of a Stripe-style
    /// `error` object.
    fn adopt(&mut self, body: &Value) {
        let Value::Object(fields) = body else {
            return;
        };
        if let Some(Value::String(message)) = fields.get("message") {
            self.message = message.clone();
            return;
        }
        let Some(Value::Object(error)) = fields.get("error") else {
            return;
        };
        let present = |key: &str| error.get(key).filter(|value| truthy(value)).cloned();
        if let Some(message) = present("message") {
            self.message = match message {
                Value::String(text) => text,
                other => other.to_string(),
            };
        }
        if let Some(stack) = present("stack") {
            self.stack = Some(stack);
        }
        if let Some(code) = present("code") {
            self.code = Some(code);
        }
        if let Some(param) = present("param") {
            self.param = Some(param);
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// A shaped response.
#[derive(Debug, Clone)]
pub struct Response {
    meta: ResponseMeta,
    use_final_url: bool,
    body_used: bool,
    pub body: Option<ResponseBody>,
    pub err: Option<ResponseError>,
}

impl Response {
    fn shaped(raw: &RawResponse, body: Option<ResponseBody>, err: Option<ResponseError>) -> Self {
        Self {
            meta: raw.meta.clone(),
            use_final_url: raw.use_final_url,
            body_used: raw.body_used,
            body,
            err,
        }
    }

    pub fn meta(&self) -> &ResponseMeta {
        &self.meta
    }

    pub fn status(&self) -> u16 {
        self.meta.status
    }

    pub fn ok(&self) -> bool {
        self.meta.ok()
    }

    pub fn status_text(&self) -> &str {
        &self.meta.status_text
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.meta.headers
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.meta.headers, name)
    }

    /// Headers flattened into a map keyed by the names as received; a
    /// repeated name keeps its last value.
    pub fn header_map(&self) -> BTreeMap<String, String> {
        self.meta.headers.iter().cloned().collect()
    }

    pub fn url(&self) -> &str {
        &self.meta.url
    }

    pub fn redirected(&self) -> bool {
        self.meta.redirected
    }

    pub fn response_type(&self) -> ResponseType {
        self.meta.response_type
    }

    pub fn body_used(&self) -> bool {
        self.body_used
    }

    pub fn use_final_url(&self) -> bool {
        self.use_final_url
    }

    pub fn set_use_final_url(&mut self, value: bool) {
        self.use_final_url = value;
    }

    /// The parsed JSON body, if any.
    pub fn json(&self) -> Option<&Value> {
        self.body.as_ref().and_then(ResponseBody::as_json)
    }

    /// The text body, if any.
    pub fn text(&self) -> Option<&str> {
        self.body.as_ref().and_then(ResponseBody::as_text)
    }
}

/// What a dispatch resolves with.
#[derive(Debug)]
pub enum Reply {
    Response(Response),
    /// Only for ok statuses in raw mode.
    Raw(RawResponse),
}

impl Reply {
    pub fn status(&self) -> u16 {
        match self {
            Reply::Response(response) => response.status(),
            Reply::Raw(raw) => raw.status(),
        }
    }

    pub fn ok(&self) -> bool {
        match self {
            Reply::Response(response) => response.ok(),
            Reply::Raw(raw) => raw.ok(),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Reply::Raw(_))
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Reply::Response(response) => Some(response),
            Reply::Raw(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Reply::Response(response) => Some(response),
            Reply::Raw(_) => None,
        }
    }

    pub fn into_raw(self) -> Option<RawResponse> {
        match self {
            Reply::Raw(raw) => Some(raw),
            Reply::Response(_) => None,
        }
    }
}

/// Shapes a transport response. Body read failures reject; everything else
/// resolves.
pub(crate) async fn shape(
    mut raw: RawResponse,
    raw_mode: bool,
    parse_err: &ResponseError,
) -> Result<Reply, ClientError> {
    // Compared as received, without case folding.
    let content_type = raw.header("content-type").map(str::to_string);
    let is_json = content_type
        .as_deref()
        .is_some_and(|content_type| content_type.contains("application/json"));

    if !raw.ok() {
        let mut err = ResponseError::http(raw.status(), raw.status_text());
        let mut body = None;
        if is_json {
            let bytes = raw.bytes().await?;
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => {
                    err.adopt(&value);
                    body = Some(ResponseBody::Json(value));
                }
                Err(parse) => {
                    trace!(error = %parse, "error body is not valid JSON");
                    err = parse_err.clone();
                }
            }
        }
        debug!(status = raw.status(), message = %err.message, "request failed");
        return Ok(Reply::Response(Response::shaped(&raw, body, Some(err))));
    }

    if raw_mode {
        trace!(status = raw.status(), "returning raw response");
        return Ok(Reply::Raw(raw));
    }

    if !raw.has_body() {
        return Ok(Reply::Response(Response::shaped(&raw, None, None)));
    }

    let mut err = None;
    let body = if is_json {
        let bytes = raw.bytes().await?;
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Some(ResponseBody::Json(value)),
            Err(parse) => {
                if content_type.as_deref() == Some("application/json") {
                    debug!(error = %parse, "invalid JSON body");
                    err = Some(parse_err.clone());
                }
                None
            }
        }
    } else {
        Some(ResponseBody::Text(raw.text().await?))
    };
    Ok(Reply::Response(Response::shaped(&raw, body, err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_err() -> ResponseError {
        ResponseError::new("Invalid JSON received from http://localhost:3000")
    }

    async fn shaped(raw: RawResponse, raw_mode: bool) -> Response {
        shape(raw, raw_mode, &parse_err()).await.unwrap().into_response().unwrap()
    }

    fn json_response(status: u16, body: &str) -> RawResponse {
        RawResponse::new(status)
            .with_header("Content-Type", "application/json; charset=utf-8")
            .with_body(body.to_string())
    }

    #[tokio::test]
    async fn ok_json_body_is_parsed() {
        let response = shaped(json_response(200, r#"{"message":"OK"}"#), false).await;
        assert!(response.ok());
        assert_eq!(response.json(), Some(&json!({"message": "OK"})));
        assert!(response.err.is_none());
        assert!(response.body_used());
    }

    #[tokio::test]
    async fn content_type_is_matched_as_received() {
        let raw = RawResponse::new(200)
            .with_header("Content-Type", "Application/JSON")
            .with_body("not json");
        let response = shaped(raw, false).await;
        assert_eq!(response.text(), Some("not json"));
        assert!(response.err.is_none());

        let raw = RawResponse::new(200)
            .with_header("Content-Type", "application/json; charset=utf-8")
            .with_body("not json");
        let response = shaped(raw, false).await;
        assert!(response.body.is_none());
        assert!(response.err.is_none());
    }

    #[tokio::test]
    async fn bodyless_success_is_not_parsed() {
        let raw = RawResponse::new(200).with_header("Content-Type", "application/json");
        let response = shaped(raw, false).await;
        assert!(response.body.is_none());
        assert!(response.err.is_none());
    }

    #[tokio::test]
    async fn ok_text_body_is_read_as_text() {
        let raw = RawResponse::new(200).with_header("content-type", "text/html").with_body("<p>");
        let response = shaped(raw, false).await;
        assert_eq!(response.text(), Some("<p>"));
    }

    #[tokio::test]
    async fn status_text_becomes_error_message() {
        let response = shaped(RawResponse::new(404), false).await;
        let err = response.err.as_ref().unwrap();
        assert_eq!(err.message, "Not Found");
        assert_eq!(err.status, Some(404));
        assert!(response.body.is_none());
    }

    #[tokio::test]
    async fn failed_json_message_field_wins() {
        let response = shaped(json_response(400, r#"{"message":"Oops!"}"#), false).await;
        assert_eq!(response.err.as_ref().unwrap().message, "Oops!");
        assert_eq!(response.json(), Some(&json!({"message": "Oops!"})));
    }

    #[tokio::test]
    async fn failed_json_without_message_keeps_status_text() {
        let response = shaped(json_response(400, r#"{"foo":"baz"}"#), false).await;
        assert_eq!(response.err.as_ref().unwrap().message, "Bad Request");
    }

    #[tokio::test]
    async fn stripe_style_error_is_adopted() {
        let body = r#"{"error":{"message":"Some error happened","stack":{},"code":23,"param":"hello_world"}}"#;
        let response = shaped(json_response(404, body), false).await;
        let err = response.err.as_ref().unwrap();
        assert_eq!(err.message, "Some error happened");
        assert_eq!(err.code, Some(json!(23)));
        assert_eq!(err.param, Some(json!("hello_world")));
        assert_eq!(err.stack, Some(json!({})));
    }

    #[tokio::test]
    async fn stripe_fields_are_independently_optional() {
        let response = shaped(json_response(500, r#"{"error":{"code":"",  "param":"p"}}"#), false).await;
        let err = response.err.as_ref().unwrap();
        assert_eq!(err.message, "Internal Server Error");
        assert_eq!(err.code, None);
        assert_eq!(err.param, Some(json!("p")));
    }

    #[tokio::test]
    async fn array_error_body_is_not_inspected() {
        let response = shaped(json_response(400, r#"[{"error":{"message":"x"}}]"#), false).await;
        assert_eq!(response.err.as_ref().unwrap().message, "Bad Request");
    }

    #[tokio::test]
    async fn failed_invalid_json_uses_parse_error() {
        let raw = RawResponse::new(404)
            .with_header("Content-Type", "application/json")
            .with_body("foobaz");
        let response = shaped(raw, false).await;
        assert_eq!(response.err, Some(parse_err()));
    }

    #[tokio::test]
    async fn ok_invalid_json_with_exact_type_sets_parse_error() {
        let raw = RawResponse::new(200)
            .with_header("Content-Type", "application/json")
            .with_body("nope");
        let response = shaped(raw, false).await;
        assert_eq!(response.err, Some(parse_err()));
        assert!(response.body.is_none());
    }

    #[tokio::test]
    async fn ok_invalid_json_with_parameters_is_silent() {
        let response = shaped(json_response(200, "nope"), false).await;
        assert!(response.err.is_none());
        assert!(response.body.is_none());
    }

    #[tokio::test]
    async fn raw_mode_returns_unread_response_on_success_only() {
        let reply = shape(json_response(200, "{}"), true, &parse_err()).await.unwrap();
        let mut raw = reply.into_raw().unwrap();
        assert!(!raw.body_used());
        assert_eq!(raw.json::<Value>().await.unwrap(), json!({}));

        let reply = shape(json_response(400, "{}"), true, &parse_err()).await.unwrap();
        assert!(!reply.is_raw());
        assert!(reply.as_response().unwrap().err.is_some());
    }

    #[tokio::test]
    async fn body_read_failure_rejects() {
        let raw = RawResponse::new(200)
            .with_header("Content-Type", "text/plain")
            .with_stream(stream::iter(vec![Ok(Bytes::from("a")), Err(ClientError::Aborted)]).boxed());
        let err = shape(raw, false, &parse_err()).await.unwrap_err();
        assert!(err.is_abort());
    }

    #[tokio::test]
    async fn raw_body_reads_once() {
        let mut raw = RawResponse::new(200).with_body("a=1&b=two+words");
        assert_eq!(
            raw.form_data().await.unwrap(),
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "two words".to_string())]
        );
        assert!(raw.body_used());
        assert!(matches!(raw.text().await, Err(ClientError::BodyUsed)));
    }

    #[tokio::test]
    async fn chunked_body_is_concatenated() {
        let chunks = vec![Ok(Bytes::from("hel")), Ok(Bytes::from("lo"))];
        let mut raw = RawResponse::new(200).with_stream(stream::iter(chunks).boxed());
        assert_eq!(raw.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn try_clone_reads_independently() {
        let mut raw = RawResponse::new(200).with_body("twice");
        let mut copy = raw.try_clone().await.unwrap();
        assert_eq!(raw.text().await.unwrap(), "twice");
        assert_eq!(copy.text().await.unwrap(), "twice");
    }

    #[test]
    fn error_and_redirect_constructors() {
        let error = RawResponse::error();
        assert_eq!(error.status(), 0);
        assert_eq!(error.response_type(), ResponseType::Error);
        assert!(!error.ok());

        let redirect = RawResponse::redirect("http://x.test/", 302).unwrap();
        assert_eq!(redirect.header("location"), Some("http://x.test/"));
        assert_eq!(redirect.status_text(), "Found");
        assert!(matches!(RawResponse::redirect("/", 200), Err(ClientError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn header_map_and_final_url_flag() {
        let raw = RawResponse::new(200)
            .with_header("X-Trace", "1")
            .with_header("Content-Type", "text/plain")
            .with_url("http://x.test/final")
            .with_body("");
        let mut response = shaped(raw, false).await;
        let map = response.header_map();
        assert_eq!(map.get("X-Trace").map(String::as_str), Some("1"));
        assert!(map.get("x-trace").is_none());
        assert_eq!(response.url(), "http://x.test/final");

        assert!(!response.use_final_url());
        response.set_use_final_url(true);
        assert!(response.use_final_url());
    }
}
