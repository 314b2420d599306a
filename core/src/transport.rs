//! The network primitive the client dispatches through.
//!
//! `ReqwestTransport` is the default. Tests and embedders can provide their
//! own `Transport`; it receives the fully normalized `HttpRequest` and must
//! honor `request.signal` by failing with `ClientError::Aborted`.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use tracing::{debug, trace};

use crate::abort::AbortSignal;
use crate::error::ClientError;
use crate::http::{HttpMethod, HttpRequest, RedirectPolicy, RequestCache};
use crate::response::{BodyStream, RawResponse, ResponseType};

#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn fetch(&self, request: HttpRequest) -> Result<RawResponse, ClientError>;
}

/// `reqwest`-backed transport. Holds one client that follows redirects and
/// one that does not, picked per request from its redirect policy.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    follow: reqwest::Client,
    manual: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ClientError> {
        Ok(Self {
            follow: reqwest::Client::builder().build()?,
            manual: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()?,
        })
    }

    /// Uses preconfigured clients. `manual` should not follow redirects.
    pub fn from_clients(follow: reqwest::Client, manual: reqwest::Client) -> Self {
        Self { follow, manual }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(&self, request: HttpRequest) -> Result<RawResponse, ClientError> {
        if request.signal.is_aborted() {
            return Err(ClientError::Aborted);
        }

        let policy = request.redirect.unwrap_or(RedirectPolicy::Follow);
        let client = match policy {
            RedirectPolicy::Follow => &self.follow,
            RedirectPolicy::Error | RedirectPolicy::Manual => &self.manual,
        };
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|err| ClientError::invalid(err.to_string()))?;

        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if request.header(CACHE_CONTROL.as_str()).is_none() {
            match request.cache {
                Some(RequestCache::NoStore) => builder = builder.header(CACHE_CONTROL, "no-store"),
                Some(RequestCache::NoCache | RequestCache::Reload) => {
                    builder = builder
                        .header(CACHE_CONTROL, "no-cache")
                        .header(PRAGMA, "no-cache");
                }
                _ => {}
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.to_bytes());
        }
        trace!(
            mode = ?request.mode,
            credentials = ?request.credentials,
            referrer_policy = ?request.referrer_policy,
            "browser-only options are not applied"
        );

        debug!(method = %request.method, url = %request.url, "sending request");
        let sent = tokio::select! {
            biased;
            _ = request.signal.aborted() => None,
            result = builder.send() => Some(result),
        };
        let Some(result) = sent else {
            debug!(url = %request.url, "request aborted before response");
            return Err(ClientError::Aborted);
        };
        let response = result?;

        let status = response.status();
        if policy == RedirectPolicy::Error && status.is_redirection() {
            return Err(ClientError::Transport(format!(
                "redirect mode is set to error: {}",
                request.url
            )));
        }
        let redirected = was_redirected(&request.url, response.url());
        debug!(status = status.as_u16(), redirected, "response received");

        let mut raw = RawResponse::new(status.as_u16())
            .with_url(response.url().as_str())
            .with_redirected(redirected);
        if let Some(reason) = status.canonical_reason() {
            raw = raw.with_status_text(reason);
        }
        if policy == RedirectPolicy::Manual && status.is_redirection() {
            raw = raw.with_type(ResponseType::OpaqueRedirect);
        }
        for (name, value) in response.headers() {
            raw = raw.with_header(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }

        if request.method == HttpMethod::Head || matches!(status.as_u16(), 204 | 304) {
            return Ok(raw);
        }
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from));
        Ok(raw.with_stream(guarded(body, request.signal)))
    }
}

/// Fragments never reach the server, so they are ignored.
fn was_redirected(requested: &str, landed: &reqwest::Url) -> bool {
    let Ok(mut requested) = reqwest::Url::parse(requested) else {
        return false;
    };
    let mut landed = landed.clone();
    requested.set_fragment(None);
    landed.set_fragment(None);
    requested != landed
}

/// Ends the stream with `Aborted` once `signal` fires.
fn guarded<S>(body: S, signal: AbortSignal) -> BodyStream
where
    S: Stream<Item = Result<Bytes, ClientError>> + Send + 'static,
{
    stream::unfold(
        (body.boxed(), signal, false),
        |(mut body, signal, done)| async move {
            if done {
                return None;
            }
            let next = tokio::select! {
                biased;
                _ = signal.aborted() => None,
                next = body.next() => Some(next),
            };
            match next {
                None => Some((Err(ClientError::Aborted), (body, signal, true))),
                Some(Some(chunk)) => Some((chunk, (body, signal, false))),
                Some(None) => None,
            }
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::AbortController;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn guarded_stream_passes_chunks_through() {
        let controller = AbortController::new();
        let body = stream::iter(vec![Ok(Bytes::from("a")), Ok(Bytes::from("b"))]);
        let chunks: Vec<Bytes> = guarded(body, controller.signal()).try_collect().await.unwrap();
        assert_eq!(chunks, vec![Bytes::from("a"), Bytes::from("b")]);
    }

    #[tokio::test]
    async fn guarded_stream_fails_once_aborted() {
        let controller = AbortController::new();
        let body = stream::iter(vec![Ok(Bytes::from("a"))]).chain(stream::pending());
        let mut guarded = guarded(body, controller.signal());

        assert_eq!(guarded.next().await.unwrap().unwrap(), Bytes::from("a"));
        controller.abort();
        assert!(guarded.next().await.unwrap().unwrap_err().is_abort());
        assert!(guarded.next().await.is_none());
    }

    #[test]
    fn fragment_alone_is_not_a_redirect() {
        let landed = reqwest::Url::parse("http://api.test/a?b=1").unwrap();
        assert!(!was_redirected("http://api.test/a?b=1#top", &landed));
        assert!(!was_redirected("http://api.test/a?b=1", &landed));
        assert!(was_redirected("http://api.test/elsewhere#top", &landed));
    }

    #[tokio::test]
    async fn pre_aborted_request_never_hits_the_network() {
        let controller = AbortController::new();
        controller.abort();
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: "http://127.0.0.1:9/unreachable".to_string(),
            headers: Vec::new(),
            body: None,
            signal: controller.signal(),
            raw: false,
            mode: None,
            cache: None,
            credentials: None,
            redirect: None,
            referrer_policy: None,
        };
        let err = ReqwestTransport::new().unwrap().fetch(request).await.unwrap_err();
        assert!(err.is_abort());
    }
}
