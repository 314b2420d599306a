//! Cooperative cancellation: controllers, signals and the per-client
//! registry that groups in-flight calls by abort token.
//!
//! # Design
//! Every bound call gets an `AbortSignal` that observes a set of
//! `CancellationToken`s: its own per-call token (a child of the abort-token
//! controller when one is used), the client-wide "abort all" controller, and
//! whatever external signal the caller passed in. Observation is
//! one-directional: a signal has no way to cancel its sources, so aborting a
//! call never reaches back into the caller's controller.
//!
//! The registry's locks guard plain counters and are never held across an
//! `.await`, so count updates are atomic with respect to other calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::select_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Owner side of a cancellation pair: can abort, and hands out signals.
#[derive(Debug, Clone)]
pub struct AbortController {
    token: CancellationToken,
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        let token = CancellationToken::new();
        Self {
            signal: AbortSignal::observing(vec![token.clone()]),
            token,
        }
    }

    /// The signal observing this controller.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of one or more cancellation sources. Aborted as soon as
/// any source is.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    sources: Arc<[CancellationToken]>,
}

impl AbortSignal {
    /// `sources` must not be empty.
    fn observing(sources: Vec<CancellationToken>) -> Self {
        Self {
            sources: Arc::from(sources),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.sources.iter().any(CancellationToken::is_cancelled)
    }

    /// Completes once any source is aborted.
    pub async fn aborted(&self) {
        let waits = self.sources.iter().map(|token| Box::pin(token.cancelled()));
        select_all(waits).await;
    }

    /// Identity comparison: true only for clones of the same signal.
    pub fn same_as(&self, other: &AbortSignal) -> bool {
        Arc::ptr_eq(&self.sources, &other.sources)
    }
}

#[derive(Debug)]
struct TokenEntry {
    controller: CancellationToken,
    count: usize,
}

/// State of the client-wide "abort all" controller.
#[derive(Debug)]
enum GlobalController {
    Active(CancellationToken),
    Retired,
}

/// Per-client bookkeeping of abort tokens and the "abort all" controller.
#[derive(Debug)]
pub struct AbortRegistry {
    tokens: Mutex<HashMap<String, TokenEntry>>,
    global: Mutex<GlobalController>,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            global: Mutex::new(GlobalController::Retired),
        }
    }

    /// Binds a new call. The returned `Binding` releases the token reference
    /// when dropped.
    pub fn bind(self: &Arc<Self>, token: Option<&str>, external: Option<&AbortSignal>) -> Binding {
        let call = match token {
            Some(key) => {
                let mut tokens = lock(&self.tokens);
                let entry = tokens.entry(key.to_string()).or_insert_with(|| TokenEntry {
                    controller: CancellationToken::new(),
                    count: 0,
                });
                entry.count += 1;
                trace!(token = key, count = entry.count, "abort token bound");
                entry.controller.child_token()
            }
            None => CancellationToken::new(),
        };

        let mut sources = vec![call, self.global_controller()];
        if let Some(external) = external {
            sources.extend(external.sources.iter().cloned());
        }

        Binding {
            registry: Arc::clone(self),
            token: token.map(str::to_string),
            signal: AbortSignal::observing(sources),
        }
    }

    /// Aborts every call currently bound to `token`. Unknown tokens are
    /// ignored.
    pub fn abort(&self, token: &str) {
        let mut tokens = lock(&self.tokens);
        match tokens.get_mut(token) {
            Some(entry) => {
                debug!(token, in_flight = entry.count, "aborting token");
                entry.controller.cancel();
                entry.controller = CancellationToken::new();
            }
            None => trace!(token, "abort for unknown token ignored"),
        }
    }

    /// Aborts every bound call and retires the controller.
    pub fn abort_all(&self) {
        let mut global = lock(&self.global);
        if let GlobalController::Active(controller) =
            std::mem::replace(&mut *global, GlobalController::Retired)
        {
            debug!("aborting all in-flight requests");
            controller.cancel();
        }
    }

    /// Number of unsettled calls bound to `token`.
    pub fn in_flight(&self, token: &str) -> usize {
        lock(&self.tokens).get(token).map_or(0, |entry| entry.count)
    }

    /// True while at least one call bound to `token` is unsettled.
    pub fn contains(&self, token: &str) -> bool {
        lock(&self.tokens).contains_key(token)
    }

    fn release(&self, token: Option<&str>) {
        let Some(key) = token else {
            return;
        };
        let mut tokens = lock(&self.tokens);
        if let Some(entry) = tokens.get_mut(key) {
            entry.count = entry.count.saturating_sub(1);
            trace!(token = key, count = entry.count, "abort token released");
            if entry.count == 0 {
                tokens.remove(key);
            }
        }
    }

    fn global_controller(&self) -> CancellationToken {
        let mut global = lock(&self.global);
        match &*global {
            GlobalController::Active(controller) => controller.clone(),
            GlobalController::Retired => {
                let controller = CancellationToken::new();
                *global = GlobalController::Active(controller.clone());
                controller
            }
        }
    }
}

impl Default for AbortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One call's hold on the registry.
#[derive(Debug)]
pub struct Binding {
    registry: Arc<AbortRegistry>,
    token: Option<String>,
    signal: AbortSignal,
}

impl Binding {
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.registry.release(self.token.as_deref());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<AbortRegistry> {
        Arc::new(AbortRegistry::new())
    }

    #[test]
    fn token_count_follows_bindings() {
        let registry = registry();
        let first = registry.bind(Some("x"), None);
        let second = registry.bind(Some("x"), None);
        assert_eq!(registry.in_flight("x"), 2);

        drop(first);
        assert_eq!(registry.in_flight("x"), 1);
        assert!(registry.contains("x"));

        drop(second);
        assert!(!registry.contains("x"));
    }

    #[test]
    fn untokened_binding_leaves_map_untouched() {
        let registry = registry();
        let binding = registry.bind(None, None);
        assert!(binding.token().is_none());
        assert!(lock(&registry.tokens).is_empty());
    }

    #[test]
    fn abort_fans_out_to_one_token_only() {
        let registry = registry();
        let x1 = registry.bind(Some("x"), None);
        let x2 = registry.bind(Some("x"), None);
        let y = registry.bind(Some("y"), None);
        let free = registry.bind(None, None);

        registry.abort("x");

        assert!(x1.signal().is_aborted());
        assert!(x2.signal().is_aborted());
        assert!(!y.signal().is_aborted());
        assert!(!free.signal().is_aborted());
        assert_eq!(registry.in_flight("x"), 2);
    }

    #[test]
    fn abort_unknown_token_is_noop() {
        let registry = registry();
        registry.abort("missing");
        assert!(!registry.contains("missing"));
    }

    #[test]
    fn token_reused_after_abort_starts_clean() {
        let registry = registry();
        let old = registry.bind(Some("x"), None);
        registry.abort("x");
        let fresh = registry.bind(Some("x"), None);

        assert!(old.signal().is_aborted());
        assert!(!fresh.signal().is_aborted());
        assert_eq!(registry.in_flight("x"), 2);
    }

    #[test]
    fn abort_all_cancels_everything_then_retires() {
        let registry = registry();
        let tokened = registry.bind(Some("x"), None);
        let free = registry.bind(None, None);

        registry.abort_all();
        assert!(tokened.signal().is_aborted());
        assert!(free.signal().is_aborted());

        let later = registry.bind(None, None);
        assert!(!later.signal().is_aborted());
        assert!(tokened.signal().is_aborted(), "old calls stay aborted");

        registry.abort_all();
        assert!(later.signal().is_aborted());
    }

    #[test]
    fn abort_all_without_bindings_is_harmless() {
        let registry = registry();
        registry.abort_all();
        registry.abort_all();
        let binding = registry.bind(None, None);
        assert!(!binding.signal().is_aborted());
    }

    #[test]
    fn external_signal_is_observed_not_controlled() {
        let registry = registry();
        let external = AbortController::new();

        let binding = registry.bind(Some("x"), Some(&external.signal()));
        registry.abort("x");
        assert!(binding.signal().is_aborted());
        assert!(!external.is_aborted());

        let other = registry.bind(None, Some(&external.signal()));
        assert!(!other.signal().is_aborted());
        external.abort();
        assert!(other.signal().is_aborted());
    }

    #[test]
    fn signal_identity() {
        let registry = registry();
        let a = registry.bind(None, None);
        let b = registry.bind(None, None);
        assert!(a.signal().same_as(&a.signal().clone()));
        assert!(!a.signal().same_as(b.signal()));
    }

    #[tokio::test]
    async fn aborted_future_resolves_on_abort() {
        let registry = registry();
        let binding = registry.bind(Some("x"), None);
        let signal = binding.signal().clone();

        let waiter = tokio::spawn(async move { signal.aborted().await });
        registry.abort("x");
        waiter.await.unwrap();
    }
}
