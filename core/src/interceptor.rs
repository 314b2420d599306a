//! Ordered request/response hooks wrapped around dispatch.
//!
//! # Design
//! A call moves through the chain as an explicit `Result`: request
//! transforms run while it is `Ok`, request-error handlers only while it is
//! `Err`, then dispatch, then the response stages in reverse registration
//! order with the same rule. An error handler that returns `Ok` recovers the
//! call; stages before it are not re-run.
//!
//! The list is copied when a call starts, so registering or removing an
//! interceptor only affects later calls.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt};
use tracing::trace;

use crate::error::ClientError;
use crate::http::HttpMethod;
use crate::response::Reply;
use crate::types::Call;

type RequestStage = Box<dyn Fn(Call) -> BoxFuture<'static, Result<Call, ClientError>> + Send + Sync>;
type RequestErrorStage =
    Box<dyn Fn(ClientError) -> BoxFuture<'static, Result<Call, ClientError>> + Send + Sync>;
type ResponseStage = Box<dyn Fn(Reply) -> BoxFuture<'static, Result<Reply, ClientError>> + Send + Sync>;
type ResponseErrorStage =
    Box<dyn Fn(ClientError) -> BoxFuture<'static, Result<Reply, ClientError>> + Send + Sync>;

/// Up to four optional stages. Identity is the `Arc` it is registered as.
#[derive(Default)]
pub struct Interceptor {
    request: Option<RequestStage>,
    request_error: Option<RequestErrorStage>,
    response: Option<ResponseStage>,
    response_error: Option<ResponseErrorStage>,
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("request", &self.request.is_some())
            .field("request_error", &self.request_error.is_some())
            .field("response", &self.response.is_some())
            .field("response_error", &self.response_error.is_some())
            .finish()
    }
}

impl Interceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrites the call before dispatch.
    pub fn on_request<F, Fut>(mut self, stage: F) -> Self
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Call, ClientError>> + Send + 'static,
    {
        self.request = Some(Box::new(move |call| stage(call).boxed()));
        self
    }

    /// Sees a failed request stage; returning `Ok` recovers with that call.
    /// The recovered call keeps the abort token and signal of the original.
    pub fn on_request_error<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ClientError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Call, ClientError>> + Send + 'static,
    {
        self.request_error = Some(Box::new(move |err| handler(err).boxed()));
        self
    }

    /// Rewrites the reply after dispatch.
    pub fn on_response<F, Fut>(mut self, stage: F) -> Self
    where
        F: Fn(Reply) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, ClientError>> + Send + 'static,
    {
        self.response = Some(Box::new(move |reply| stage(reply).boxed()));
        self
    }

    /// Sees a failed dispatch or response stage; returning `Ok` recovers.
    pub fn on_response_error<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ClientError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, ClientError>> + Send + 'static,
    {
        self.response_error = Some(Box::new(move |err| handler(err).boxed()));
        self
    }
}

type Registry = Arc<Mutex<Vec<Arc<Interceptor>>>>;

/// The interceptors of one client, and the methods they apply to.
#[derive(Debug, Clone)]
pub struct InterceptorChain {
    interceptors: Registry,
    methods: Arc<[HttpMethod]>,
}

impl InterceptorChain {
    pub(crate) fn new(methods: Vec<HttpMethod>) -> Self {
        Self {
            interceptors: Arc::default(),
            methods: Arc::from(methods),
        }
    }

    /// Appends an interceptor.
    pub fn register(&self, interceptor: impl Into<Arc<Interceptor>>) -> Registration {
        let interceptor = interceptor.into();
        let mut list = lock(&self.interceptors);
        list.push(Arc::clone(&interceptor));
        trace!(registered = list.len(), "interceptor registered");
        Registration {
            interceptors: Arc::clone(&self.interceptors),
            interceptor,
        }
    }

    /// Removes the first registration of `interceptor`, if any.
    pub fn unregister(&self, interceptor: &Arc<Interceptor>) {
        remove_first(&self.interceptors, interceptor);
    }

    pub fn clear(&self) {
        lock(&self.interceptors).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.interceptors).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.interceptors).is_empty()
    }

    /// True when calls with `method` go through the chain.
    pub fn intercepts(&self, method: HttpMethod) -> bool {
        self.methods.contains(&method)
    }

    pub(crate) async fn run<F, Fut>(&self, call: Call, dispatch: F) -> Result<Reply, ClientError>
    where
        F: FnOnce(Call) -> Fut,
        Fut: Future<Output = Result<Reply, ClientError>>,
    {
        let snapshot: Vec<Arc<Interceptor>> = lock(&self.interceptors).clone();
        trace!(interceptors = snapshot.len(), "running interceptor chain");

        let bound_signal = call.options.signal.clone();
        let bound_token = call.options.abort_token.clone();

        let mut request: Result<Call, ClientError> = Ok(call);
        for interceptor in &snapshot {
            request = match (request, &interceptor.request) {
                (Ok(call), Some(stage)) => stage(call).await,
                (request, _) => request,
            };
        }
        for interceptor in &snapshot {
            request = match (request, &interceptor.request_error) {
                (Err(err), Some(handler)) => handler(err).await.map(|mut call| {
                    // A recovered call keeps the cancellation it was bound to.
                    call.options.signal = bound_signal.clone();
                    call.options.abort_token = bound_token.clone();
                    call
                }),
                (request, _) => request,
            };
        }

        let mut reply = match request {
            Ok(call) => dispatch(call).await,
            Err(err) => Err(err),
        };

        for interceptor in snapshot.iter().rev() {
            reply = match (reply, &interceptor.response) {
                (Ok(reply), Some(stage)) => stage(reply).await,
                (reply, _) => reply,
            };
        }
        for interceptor in snapshot.iter().rev() {
            reply = match (reply, &interceptor.response_error) {
                (Err(err), Some(handler)) => handler(err).await,
                (reply, _) => reply,
            };
        }
        reply
    }
}

/// Handle returned by `InterceptorChain::register`.
#[derive(Debug)]
pub struct Registration {
    interceptors: Registry,
    interceptor: Arc<Interceptor>,
}

impl Registration {
    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    /// Removes the interceptor this handle was returned for.
    pub fn unregister(self) {
        remove_first(&self.interceptors, &self.interceptor);
    }
}

fn remove_first(interceptors: &Mutex<Vec<Arc<Interceptor>>>, interceptor: &Arc<Interceptor>) {
    let mut list = lock(interceptors);
    if let Some(index) = list.iter().position(|entry| Arc::ptr_eq(entry, interceptor)) {
        list.remove(index);
        trace!(registered = list.len(), "interceptor removed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
