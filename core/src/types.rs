//! Caller-facing request types: per-call options, the interceptable call
//! arguments and auth credentials.
//!
//! # Design
//! `RequestOptions` fields are public so interceptors can rewrite any of
//! them. `abort_token` and `signal` are public too, but changing them after
//! the call is bound is rejected at dispatch time.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::abort::AbortSignal;
use crate::error::ClientError;
use crate::http::{HttpMethod, RequestBody};
use crate::qs::ArrayFormat;

/// Per-call options. Every field is optional and falls back to the client
/// defaults.
#[derive(Debug, Default)]
pub struct RequestOptions {
    /// Merged over the client headers; `None` removes a header.
    pub headers: Vec<(String, Option<String>)>,
    pub body: Option<RequestBody>,
    pub params: Map<String, Value>,
    pub abort_token: Option<String>,
    pub signal: Option<AbortSignal>,
    /// Overrides the client `raw` default when set.
    pub raw: Option<bool>,
    pub mode: Option<String>,
    pub cache: Option<String>,
    pub credentials: Option<String>,
    pub redirect: Option<String>,
    pub referrer: Option<String>,
    pub prevent_body_on_methods: Option<Vec<HttpMethod>>,
    pub array_format: Option<ArrayFormat>,
    body_error: Option<serde_json::Error>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing an earlier value for the same key.
    pub fn header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name.into(), Some(value.into()))
    }

    /// Suppresses a header set by the client defaults.
    pub fn without_header(self, name: impl Into<String>) -> Self {
        self.set_header(name.into(), None)
    }

    fn set_header(mut self, name: String, value: Option<String>) -> Self {
        match self.headers.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    pub fn bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(RequestBody::Bytes(body.into()));
        self
    }

    pub fn body_value(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Value(body));
        self
    }

    /// Sets a structured body from any serializable value. A serialization
    /// failure is reported when the call is dispatched.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => {
                self.body = Some(RequestBody::Value(value));
                self.body_error = None;
            }
            Err(err) => self.body_error = Some(err),
        }
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn abort_token(mut self, token: impl Into<String>) -> Self {
        self.abort_token = Some(token.into());
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn cache(mut self, cache: impl Into<String>) -> Self {
        self.cache = Some(cache.into());
        self
    }

    pub fn credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    pub fn redirect(mut self, redirect: impl Into<String>) -> Self {
        self.redirect = Some(redirect.into());
        self
    }

    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn prevent_body_on_methods(mut self, methods: impl IntoIterator<Item = HttpMethod>) -> Self {
        self.prevent_body_on_methods = Some(methods.into_iter().collect());
        self
    }

    pub fn array_format(mut self, format: ArrayFormat) -> Self {
        self.array_format = Some(format);
        self
    }

    pub(crate) fn take_body_error(&mut self) -> Option<serde_json::Error> {
        self.body_error.take()
    }
}

/// The arguments of one dispatch, as seen and rewritten by interceptors.
#[derive(Debug, Default)]
pub struct Call {
    pub path: String,
    pub options: RequestOptions,
}

impl Call {
    pub fn new(path: impl Into<String>, options: RequestOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }
}

/// Shapes accepted by `Client::auth`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Removes the `Authorization` header.
    Clear,
    /// `"user:pass"`, or a bare `"user"` with an empty password.
    Combined(String),
    Pair(String, String),
    /// Zero, one or two parts; more is an error.
    Parts(Vec<String>),
}

impl Credentials {
    /// Splits into `(user, pass)`, validating the number of parts.
    pub(crate) fn into_pair(self) -> Result<(String, String), ClientError> {
        let parts = match self {
            Credentials::Clear => Vec::new(),
            Credentials::Pair(user, pass) => vec![user, pass],
            Credentials::Combined(combined) => match combined.split_once(':') {
                Some((user, pass)) => vec![user.to_string(), pass.to_string()],
                None => vec![combined],
            },
            Credentials::Parts(parts) => parts,
        };

        let mut parts = parts.into_iter();
        match (parts.next(), parts.next(), parts.next()) {
            (_, _, Some(_)) => Err(ClientError::invalid(
                "auth option can only have two keys `[user, pass]`",
            )),
            (user, pass, None) => Ok((user.unwrap_or_default(), pass.unwrap_or_default())),
        }
    }
}

impl From<()> for Credentials {
    fn from(_: ()) -> Self {
        Credentials::Clear
    }
}

impl From<&str> for Credentials {
    fn from(combined: &str) -> Self {
        Credentials::Combined(combined.to_string())
    }
}

impl From<String> for Credentials {
    fn from(combined: String) -> Self {
        Credentials::Combined(combined)
    }
}

impl<U: Into<String>, P: Into<String>> From<(U, P)> for Credentials {
    fn from((user, pass): (U, P)) -> Self {
        Credentials::Pair(user.into(), pass.into())
    }
}

impl From<Vec<String>> for Credentials {
    fn from(parts: Vec<String>) -> Self {
        Credentials::Parts(parts)
    }
}
