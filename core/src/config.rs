//! Per-client configuration.
//!
//! # Design
//! `ClientOptions` is both a fluent builder and a serde-deserializable
//! config record, so a client can be set up in code or from a JSON file.
//! Fetch enums stay as strings here and are validated once, when the client
//! is built, so a bad config fails before any request is issued.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::http::{
    CredentialsMode, HttpMethod, RedirectPolicy, ReferrerPolicy, RequestCache, RequestMode,
};
use crate::qs::ArrayFormat;
use crate::error::ClientError;

/// Options recognized by `Client::new`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
    /// Prefix joined to every request path.
    #[serde(rename = "baseURI", alias = "baseUri")]
    pub base_uri: Option<String>,
    /// Default headers, merged under per-call headers.
    pub headers: Vec<(String, String)>,
    /// Initial basic-auth credentials, as `"user:pass"` or `"user"`.
    pub auth: Option<String>,
    /// Query parameters added to every request.
    pub params: Map<String, Value>,
    pub array_format: ArrayFormat,
    /// Return the unparsed transport response on success.
    pub raw: bool,
    /// Message of the error attached when a JSON body fails to parse.
    pub parse_err: Option<String>,
    /// Methods whose structured body goes into the query.
    pub prevent_body_on_methods: Option<Vec<String>>,
    /// Methods routed through interceptors; all seven when unset.
    pub interceptable_methods: Option<Vec<String>>,
    pub mode: Option<String>,
    pub cache: Option<String>,
    pub credentials: Option<String>,
    pub redirect: Option<String>,
    pub referrer: Option<String>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    /// Adds or replaces a default header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn auth(mut self, credentials: impl Into<String>) -> Self {
        self.auth = Some(credentials.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn array_format(mut self, format: ArrayFormat) -> Self {
        self.array_format = format;
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn parse_err(mut self, message: impl Into<String>) -> Self {
        self.parse_err = Some(message.into());
        self
    }

    pub fn prevent_body_on_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prevent_body_on_methods = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    pub fn interceptable_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interceptable_methods = Some(methods.into_iter().map(Into::into).collect());
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

    /// Validates the options into the form the dispatch path reads.
    pub(crate) fn resolve(&self) -> Result<Defaults, ClientError> {
        let prevent_body_on_methods = match &self.prevent_body_on_methods {
            Some(methods) => parse_methods(methods)?,
            None => HttpMethod::BODY_PREVENTED.to_vec(),
        };
        let interceptable_methods = match &self.interceptable_methods {
            Some(methods) => parse_methods(methods)?,
            None => HttpMethod::DISPATCH.to_vec(),
        };

        Ok(Defaults {
            base_uri: self.base_uri.clone(),
            params: self.params.clone(),
            array_format: self.array_format,
            raw: self.raw,
            prevent_body_on_methods,
            interceptable_methods,
            transport: TransportDefaults {
                mode: parse_opt(self.mode.as_deref())?,
                cache: parse_opt(self.cache.as_deref())?,
                credentials: parse_opt(self.credentials.as_deref())?,
                redirect: parse_opt(self.redirect.as_deref())?,
                referrer_policy: parse_opt(self.referrer.as_deref())?,
            },
        })
    }

    /// The message of the parse error attached to undecodable JSON bodies.
    pub(crate) fn parse_err_message(&self) -> String {
        match (&self.parse_err, &self.base_uri) {
            (Some(message), _) => message.clone(),
            (None, Some(base_uri)) => format!("Invalid JSON received from {base_uri}"),
            (None, None) => "Invalid JSON received".to_string(),
        }
    }
}

/// Validated instance defaults.
#[derive(Debug, Clone)]
pub(crate) struct Defaults {
    pub base_uri: Option<String>,
    pub params: Map<String, Value>,
    pub array_format: ArrayFormat,
    pub raw: bool,
    pub prevent_body_on_methods: Vec<HttpMethod>,
    pub interceptable_methods: Vec<HttpMethod>,
    pub transport: TransportDefaults,
}

/// Validated fetch enums.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct TransportDefaults {
    pub mode: Option<RequestMode>,
    pub cache: Option<RequestCache>,
    pub credentials: Option<CredentialsMode>,
    pub redirect: Option<RedirectPolicy>,
    pub referrer_policy: Option<ReferrerPolicy>,
}

fn parse_methods(methods: &[String]) -> Result<Vec<HttpMethod>, ClientError> {
    methods.iter().map(|method| method.parse()).collect()
}

pub(crate) fn parse_opt<T>(value: Option<&str>) -> Result<Option<T>, ClientError>
where
    T: std::str::FromStr<Err = ClientError>,
{
    value.map(str::parse).transpose()
}
