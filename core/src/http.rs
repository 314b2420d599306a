//! HTTP vocabulary shared by the normalizer, the transport and the shaper.
//!
//! # Design
//! `HttpRequest` is the wire-level description handed to a `Transport`: a
//! plain value with owned fields, built fresh for every call. The enumerated
//! fetch options (mode, cache, credentials, redirect, referrer policy) are
//! parsed from their fetch spelling so that callers and config files can use
//! the familiar strings while the transport only ever sees valid variants.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde_json::Value;

use crate::abort::AbortSignal;
use crate::error::ClientError;

/// Generates a fieldless enum with its fetch spelling, `FromStr` and
/// `Display`. Unknown spellings fail with an argument error naming the
/// allowed values.
macro_rules! fetch_enum {
    ($(#[$meta:meta])* $name:ident, $option:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every accepted spelling, in declaration order.
            pub const ALLOWED: &'static [&'static str] = &[$($text),+];

            /// The fetch spelling of this value.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ClientError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ClientError::invalid(format!(
                        "`{}` must be one of: {} (got {:?})",
                        $option,
                        Self::ALLOWED.join(", "),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

fetch_enum!(
    /// Request mode, as in `RequestInit.mode`.
    RequestMode, "mode", {
        Cors => "cors",
        NoCors => "no-cors",
        SameOrigin => "same-origin",
        Navigate => "navigate",
    }
);

fetch_enum!(
    /// Cache mode, as in `RequestInit.cache`.
    RequestCache, "cache", {
        Default => "default",
        NoStore => "no-store",
        Reload => "reload",
        NoCache => "no-cache",
        ForceCache => "force-cache",
        OnlyIfCached => "only-if-cached",
    }
);

fetch_enum!(
    /// Credentials mode, as in `RequestInit.credentials`.
    CredentialsMode, "credentials", {
        Omit => "omit",
        SameOrigin => "same-origin",
        Include => "include",
    }
);

fetch_enum!(
    /// Redirect handling, as in `RequestInit.redirect`.
    RedirectPolicy, "redirect", {
        Follow => "follow",
        Error => "error",
        Manual => "manual",
    }
);

fetch_enum!(
    /// Referrer policy, as in `RequestInit.referrerPolicy`.
    ReferrerPolicy, "referrer", {
        NoReferrer => "no-referrer",
        NoReferrerWhenDowngrade => "no-referrer-when-downgrade",
        SameOrigin => "same-origin",
        Origin => "origin",
        StrictOrigin => "strict-origin",
        OriginWhenCrossOrigin => "origin-when-cross-origin",
        StrictOriginWhenCrossOrigin => "strict-origin-when-cross-origin",
        UnsafeUrl => "unsafe-url",
    }
);

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Connect,
    Trace,
}

impl HttpMethod {
    /// The seven methods the client exposes as dedicated functions.
    pub const DISPATCH: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Head,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Options,
        HttpMethod::Patch,
    ];

    /// Methods whose structured body is moved into the query by default.
    pub const BODY_PREVENTED: [HttpMethod; 4] = [
        HttpMethod::Get,
        HttpMethod::Head,
        HttpMethod::Delete,
        HttpMethod::Connect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Trace => "TRACE",
        }
    }
}

/// Accepts any casing, plus the `del` alias for `DELETE`.
impl FromStr for HttpMethod {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        let method = match upper.as_str() {
            "GET" => HttpMethod::Get,
            "HEAD" => HttpMethod::Head,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "DEL" | "DELETE" => HttpMethod::Delete,
            "OPTIONS" => HttpMethod::Options,
            "PATCH" => HttpMethod::Patch,
            "CONNECT" => HttpMethod::Connect,
            "TRACE" => HttpMethod::Trace,
            _ => {
                return Err(ClientError::invalid(format!(
                    "`method` must be one of: GET, HEAD, POST, PUT, DELETE, OPTIONS, PATCH, CONNECT, TRACE (got {s:?})"
                )))
            }
        };
        Ok(method)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request body as supplied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Sent as-is.
    Text(String),
    /// Sent as-is.
    Bytes(Bytes),
    /// Objects and arrays are moved into the query for body-prevented
    /// methods, or serialized when the content type is JSON.
    Value(Value),
}

impl RequestBody {
    /// True for object and array values, the only bodies the normalizer
    /// reshapes.
    pub fn is_structured(&self) -> bool {
        matches!(self, RequestBody::Value(Value::Object(_) | Value::Array(_)))
    }

    /// The body as bytes, serializing values to JSON text.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            RequestBody::Text(text) => Bytes::from(text.clone()),
            RequestBody::Bytes(bytes) => bytes.clone(),
            RequestBody::Value(Value::String(text)) => Bytes::from(text.clone()),
            RequestBody::Value(value) => Bytes::from(value.to_string()),
        }
    }
}

/// A request described as plain data, ready for a `Transport`.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub signal: AbortSignal,
    pub raw: bool,
    pub mode: Option<RequestMode>,
    pub cache: Option<RequestCache>,
    pub credentials: Option<CredentialsMode>,
    pub redirect: Option<RedirectPolicy>,
    pub referrer_policy: Option<ReferrerPolicy>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// Case-insensitive lookup over header pairs; the first match wins.
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// True when a content type names JSON, ignoring parameters and case.
pub(crate) fn is_json_media_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}
