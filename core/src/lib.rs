//! Convenience layer over a fetch-style HTTP transport.
//!
//! # Overview
//! A `Client` carries per-instance defaults (base URI, headers, auth, query
//! params) and turns each `get`/`post`/... call into a normalized
//! `HttpRequest`, dispatches it through a `Transport`, and shapes the result
//! into a `Response` with a parsed body and, for failed statuses, a
//! structured `ResponseError`.
//!
//! # Design
//! - Calls can be cancelled by abort token (fan-out to every call sharing
//!   it), by an external `AbortSignal`, or all at once with `abort_all`.
//! - Registered `Interceptor`s rewrite calls and replies around dispatch.
//! - The network is behind the `Transport` trait; `ReqwestTransport` is the
//!   default and tests plug in their own.

pub mod abort;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod interceptor;
mod normalize;
pub mod qs;
pub mod response;
pub mod transport;
pub mod types;

pub use abort::{AbortController, AbortRegistry, AbortSignal, Binding};
pub use client::Client;
pub use config::ClientOptions;
pub use error::ClientError;
pub use http::{
    CredentialsMode, HttpMethod, HttpRequest, RedirectPolicy, ReferrerPolicy, RequestBody,
    RequestCache, RequestMode,
};
pub use interceptor::{Interceptor, InterceptorChain, Registration};
pub use qs::ArrayFormat;
pub use response::{
    BodyStream, RawResponse, Reply, Response, ResponseBody, ResponseError, ResponseMeta,
    ResponseType,
};
pub use transport::{ReqwestTransport, Transport};
pub use types::{Call, Credentials, RequestOptions};
