//! The per-instance client: default headers, cancellation registry,
//! interceptor chain and the dispatch pipeline that ties them together.
//!
//! # Design
//! `Client` is a cheap handle over shared state; clones dispatch through the
//! same headers, registry and interceptors. A dispatch binds the call to the
//! registry, runs the interceptor chain when the method is intercepted, then
//! normalizes, fetches and shapes. The registry binding lives in the
//! dispatch future, so it is released exactly once whether the call
//! resolves, fails, or is dropped by the caller.

use std::sync::{Arc, PoisonError, RwLock};

use base64::prelude::{Engine, BASE64_STANDARD};
use tracing::{debug, debug_span, Instrument};
use uuid::Uuid;

use crate::abort::{AbortRegistry, AbortSignal};
use crate::config::{ClientOptions, Defaults};
use crate::error::ClientError;
use crate::http::HttpMethod;
use crate::interceptor::InterceptorChain;
use crate::normalize::normalize;
use crate::response::{shape, Reply, ResponseError};
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{Call, Credentials, RequestOptions};

const AUTHORIZATION: &str = "Authorization";

/// HTTP client with per-instance defaults.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    defaults: Defaults,
    headers: RwLock<Vec<(String, String)>>,
    registry: Arc<AbortRegistry>,
    interceptors: InterceptorChain,
    transport: Arc<dyn Transport>,
    parse_err: ResponseError,
}

impl Client {
    /// Builds a client on the default `reqwest` transport.
    pub fn new(options: ClientOptions) -> Result<Self, ClientError> {
        Self::with_transport(options, Arc::new(ReqwestTransport::new()?))
    }

    pub fn with_transport(
        options: ClientOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        let defaults = options.resolve()?;
        let client = Self {
            inner: Arc::new(ClientInner {
                interceptors: InterceptorChain::new(defaults.interceptable_methods.clone()),
                headers: RwLock::new(options.headers.clone()),
                registry: Arc::new(AbortRegistry::new()),
                parse_err: ResponseError::new(options.parse_err_message()),
                transport,
                defaults,
            }),
        };
        if let Some(credentials) = options.auth.as_deref() {
            client.auth(credentials)?;
        }
        debug!(base_uri = ?client.inner.defaults.base_uri, "client created");
        Ok(client)
    }

    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<Reply, ClientError> {
        self.request(HttpMethod::Get, path, options).await
    }

    pub async fn head(&self, path: &str, options: RequestOptions) -> Result<Reply, ClientError> {
        self.request(HttpMethod::Head, path, options).await
    }

    pub async fn post(&self, path: &str, options: RequestOptions) -> Result<Reply, ClientError> {
        self.request(HttpMethod::Post, path, options).await
    }

    pub async fn put(&self, path: &str, options: RequestOptions) -> Result<Reply, ClientError> {
        self.request(HttpMethod::Put, path, options).await
    }

    pub async fn del(&self, path: &str, options: RequestOptions) -> Result<Reply, ClientError> {
        self.request(HttpMethod::Delete, path, options).await
    }

    pub async fn options(&self, path: &str, options: RequestOptions) -> Result<Reply, ClientError> {
        self.request(HttpMethod::Options, path, options).await
    }

    pub async fn patch(&self, path: &str, options: RequestOptions) -> Result<Reply, ClientError> {
        self.request(HttpMethod::Patch, path, options).await
    }

    /// Dispatches `method` on `path`. HTTP failures resolve with
    /// `Response::err` set; only argument, interceptor, cancellation and
    /// transport failures reject.
    pub async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        mut options: RequestOptions,
    ) -> Result<Reply, ClientError> {
        let request_id = Uuid::new_v4();
        let span = debug_span!("request", %request_id, %method, path);

        async move {
            let binding = self
                .inner
                .registry
                .bind(options.abort_token.as_deref(), options.signal.as_ref());
            let token = binding.token().map(str::to_string);
            let signal = binding.signal().clone();
            options.signal = Some(signal.clone());

            let call = Call::new(path, options);
            let dispatch = |call| self.dispatch(method, call, token.as_deref(), &signal);
            let result = if self.inner.interceptors.intercepts(method) {
                self.inner.interceptors.run(call, dispatch).await
            } else {
                dispatch(call).await
            };

            match &result {
                Ok(reply) => debug!(status = reply.status(), raw = reply.is_raw(), "request settled"),
                Err(err) => debug!(error = %err, "request rejected"),
            }
            drop(binding);
            result
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        method: HttpMethod,
        call: Call,
        token: Option<&str>,
        signal: &AbortSignal,
    ) -> Result<Reply, ClientError> {
        if call.options.abort_token.as_deref() != token {
            return Err(ClientError::InterceptorContract(
                "abortToken cannot be modified via an interceptor",
            ));
        }
        if !call
            .options
            .signal
            .as_ref()
            .is_some_and(|bound| bound.same_as(signal))
        {
            return Err(ClientError::InterceptorContract(
                "signal cannot be modified via an interceptor",
            ));
        }

        let headers = self.headers();
        let request = normalize(method, call, signal.clone(), &self.inner.defaults, &headers)?;
        let raw_mode = request.raw;
        let response = self.inner.transport.fetch(request).await?;
        shape(response, raw_mode, &self.inner.parse_err).await
    }

    /// Sets or clears basic auth on the default headers. Empty user and
    /// password remove the `Authorization` header.
    pub fn auth(&self, credentials: impl Into<Credentials>) -> Result<&Self, ClientError> {
        let (user, pass) = credentials.into().into_pair()?;
        if user.is_empty() && pass.is_empty() {
            self.remove_header(AUTHORIZATION);
        } else {
            let encoded = BASE64_STANDARD.encode(format!("{user}:{pass}"));
            self.set_header(AUTHORIZATION, format!("Basic {encoded}"));
        }
        Ok(self)
    }

    /// Sets a bearer token, or removes the `Authorization` header on `None`.
    pub fn jwt(&self, token: Option<&str>) -> &Self {
        match token {
            Some(token) => self.set_header(AUTHORIZATION, format!("Bearer {token}")),
            None => self.remove_header(AUTHORIZATION),
        };
        self
    }

    /// Aborts every in-flight call bound to `token`.
    pub fn abort(&self, token: &str) -> &Self {
        self.inner.registry.abort(token);
        self
    }

    /// Aborts every in-flight call of this client.
    pub fn abort_all(&self) -> &Self {
        self.inner.registry.abort_all();
        self
    }

    /// Number of unsettled calls bound to `token`.
    pub fn in_flight(&self, token: &str) -> usize {
        self.inner.registry.in_flight(token)
    }

    pub fn interceptors(&self) -> &InterceptorChain {
        &self.inner.interceptors
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.inner.defaults.base_uri.as_deref()
    }

    /// Snapshot of the default headers.
    pub fn headers(&self) -> Vec<(String, String)> {
        self.inner
            .headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sets a default header; the key is matched literally.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) -> &Self {
        let name = name.into();
        let value = value.into();
        let mut headers = self.inner.headers.write().unwrap_or_else(PoisonError::into_inner);
        match headers.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => headers.push((name, value)),
        }
        self
    }

    pub fn remove_header(&self, name: &str) -> &Self {
        self.inner
            .headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(key, _)| key != name);
        self
    }
}
