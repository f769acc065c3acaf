//! # Auth Manager
//!
//! Owns the credential state for one client instance.
//!
//! ## Overview
//!
//! The manager:
//! - Derives the `Authorization` header from the current token
//! - Persists tokens through [`TokenStore`] on every set and removes them on every clear
//! - Coalesces concurrent refresh attempts into a single underlying call
//! - Emits [`AuthEvent`]s on the shared [`EventBus`]
//! - Signals the host through [`EnvironmentChannel`] on forced logout
//!
//! ## Usage
//!
//! ```ignore
//! use core_auth::{AuthManager, AuthToken};
//!
//! let auth = AuthManager::from_config(&config, events.clone());
//! auth.set_token(AuthToken::new("access").with_refresh_token("refresh"));
//!
//! let token = auth
//!     .refresh_token(|| async { backend.refresh().await })
//!     .await?;
//! ```

use crate::error::{AuthError, Result};
use crate::token_store::TokenStore;
use crate::types::{AuthState, AuthToken};
use bridge_traits::signal::{EnvironmentChannel, HostSignal};
use bridge_traits::time::Clock;
use core_runtime::config::ClientConfig;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, Listener, ListenerId};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, instrument, warn};

/// Header name carrying credentials.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

type RefreshFuture = Shared<BoxFuture<'static, Result<AuthToken>>>;

/// Credential state manager.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AuthManager {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<AuthState>,
    store: TokenStore,
    events: EventBus,
    channel: Arc<dyn EnvironmentChannel>,
    clock: Arc<dyn Clock>,
    refresh: Mutex<Option<RefreshFuture>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AuthManager {
    /// Creates a manager and restores any persisted token.
    ///
    /// A storage failure while loading is logged and the manager starts
    /// unauthenticated.
    pub fn new(
        store: TokenStore,
        events: EventBus,
        channel: Arc<dyn EnvironmentChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = match store.load() {
            Ok(Some(token)) => {
                info!("Starting authenticated from persisted token");
                AuthState::Authenticated(token)
            }
            Ok(None) => AuthState::Unauthenticated,
            Err(e) => {
                warn!(error = %e, "Failed to load persisted token, starting unauthenticated");
                AuthState::Unauthenticated
            }
        };

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                store,
                events,
                channel,
                clock,
                refresh: Mutex::new(None),
            }),
        }
    }

    /// Creates a manager from the capabilities carried by `config`.
    pub fn from_config(config: &ClientConfig, events: EventBus) -> Self {
        let store = TokenStore::new(
            Arc::clone(&config.key_value_store),
            config.storage_prefix.clone(),
        );
        Self::new(
            store,
            events,
            Arc::clone(&config.environment_channel),
            Arc::clone(&config.clock),
        )
    }

    /// Stores `token`, persists it and emits `token-updated`.
    #[instrument(skip(self, token))]
    pub fn set_token(&self, token: AuthToken) {
        self.inner.apply(token);
        self.inner.emit(AuthEvent::TokenUpdated);
    }

    /// Drops credentials, removes them from storage and emits `logout`.
    #[instrument(skip(self))]
    pub fn clear_token(&self) {
        self.inner.clear();
    }

    /// Whether a non-expired token is held.
    ///
    /// An expired token is cleared before returning `false`.
    pub fn is_authenticated(&self) -> bool {
        self.inner.active_token().is_some()
    }

    /// The current non-expired token.
    pub fn current_token(&self) -> Option<AuthToken> {
        self.inner.active_token()
    }

    /// Snapshot of the state without the expiry check.
    pub fn state(&self) -> AuthState {
        lock(&self.inner.state).clone()
    }

    /// Headers to attach to an outgoing request.
    ///
    /// Empty when unauthenticated, otherwise a single `Authorization` entry.
    pub fn auth_header(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(token) = self.inner.active_token() {
            headers.insert(
                AUTHORIZATION_HEADER.to_string(),
                token.authorization_value(),
            );
        }
        headers
    }

    /// Refreshes credentials through `refresh_fn`.
    ///
    /// At most one refresh runs at a time. Callers arriving while one is in
    /// flight await it and observe the same outcome; `refresh_fn` is not
    /// invoked for them. A caller that loses the race to start the refresh
    /// drops its own future unpolled. On success the new token is stored and
    /// `token-refreshed` is emitted. On failure credentials are cleared,
    /// `refresh-failed` is emitted and [`AuthError::RefreshFailed`] is returned.
    #[instrument(skip(self, refresh_fn))]
    pub async fn refresh_token<F, Fut, E>(&self, refresh_fn: F) -> Result<AuthToken>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<AuthToken, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let joined = lock(&self.inner.refresh).clone();
        if let Some(existing) = joined {
            debug!("Joining in-flight token refresh");
            return existing.await;
        }

        // `refresh_fn` runs unlocked so it may call back into the manager.
        let call = refresh_fn();
        let flight = {
            let mut slot = lock(&self.inner.refresh);
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining token refresh started concurrently");
                    existing.clone()
                }
                None => {
                    debug!("Starting token refresh");
                    let flight = Self::start_refresh(Arc::downgrade(&self.inner), call);
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    fn start_refresh<Fut, E>(inner: Weak<Inner>, call: Fut) -> RefreshFuture
    where
        Fut: Future<Output = std::result::Result<AuthToken, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        async move {
            let outcome = call.await.map_err(|e| e.to_string());

            let Some(inner) = inner.upgrade() else {
                return outcome.map_err(AuthError::RefreshFailed);
            };

            let result = match outcome {
                Ok(token) => {
                    inner.apply(token.clone());
                    info!("Token refreshed");
                    inner.emit(AuthEvent::TokenRefreshed);
                    Ok(token)
                }
                Err(message) => {
                    warn!(error = %message, "Token refresh failed");
                    inner.clear();
                    inner.emit(AuthEvent::RefreshFailed {
                        message: message.clone(),
                    });
                    Err(AuthError::RefreshFailed(message))
                }
            };

            lock(&inner.refresh).take();
            result
        }
        .boxed()
        .shared()
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        lock(&self.inner.refresh).is_some()
    }

    /// Forced logout after the backend rejected the credentials.
    ///
    /// Clears the token, emits `unauthorized` and dispatches
    /// [`HostSignal::Unauthorized`] to the host.
    #[instrument(skip(self))]
    pub fn handle_unauthorized(&self) {
        warn!("Credentials rejected, forcing logout");
        self.inner.clear();
        self.inner.emit(AuthEvent::Unauthorized);
        self.inner.channel.dispatch(HostSignal::Unauthorized);
    }

    pub fn on_unauthorized<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(AuthEvent::UNAUTHORIZED, callback)
    }

    pub fn on_token_updated<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(AuthEvent::TOKEN_UPDATED, callback)
    }

    pub fn on_logout<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(AuthEvent::LOGOUT, callback)
    }

    fn subscribe<F>(&self, event: &'static str, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(move |_event: &CoreEvent| callback());
        let id = self.inner.events.on(event, listener);
        Subscription {
            events: self.inner.events.clone(),
            event,
            id,
        }
    }

    /// The bus this manager emits on.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }
}

impl Inner {
    fn apply(&self, token: AuthToken) {
        let mut state = lock(&self.state);
        if let Err(e) = self.store.save(&token) {
            warn!(error = %e, "Token kept in memory only");
        }
        *state = AuthState::Authenticated(token);
        drop(state);
        debug!("Credentials updated");
    }

    fn clear(&self) {
        self.reset(&mut lock(&self.state));
        info!("Credentials cleared");
        self.emit(AuthEvent::Logout);
    }

    /// Drops the in-memory and persisted token. The caller holds the state lock.
    fn reset(&self, state: &mut AuthState) {
        *state = AuthState::Unauthenticated;
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to remove persisted token");
        }
    }

    /// The current token, clearing it first if it has expired.
    ///
    /// The expiry check and the clear happen under one lock, so a token set
    /// concurrently is never wiped because an older one had expired.
    fn active_token(&self) -> Option<AuthToken> {
        let now = self.clock.now();
        {
            let mut state = lock(&self.state);
            let token = state.token()?;
            if !token.is_expired_at(now) {
                return Some(token.clone());
            }
            self.reset(&mut state);
        }

        info!("Access token expired");
        self.emit(AuthEvent::Logout);
        None
    }

    fn emit(&self, event: AuthEvent) {
        self.events.emit(CoreEvent::Auth(event));
    }
}

impl fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthManager")
            .field("state", &*lock(&self.inner.state))
            .field("store", &self.inner.store)
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

/// Handle returned by the `on_*` registration methods.
#[derive(Debug)]
pub struct Subscription {
    events: EventBus,
    event: &'static str,
    id: ListenerId,
}

impl Subscription {
    /// Removes the callback. Returns `false` if it was already removed.
    pub fn unsubscribe(self) -> bool {
        self.events.off(self.event, self.id)
    }

    pub fn event(&self) -> &'static str {
        self.event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::storage::KeyValueStore;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct MapStore {
        values: Mutex<HashMap<String, String>>,
    }

    impl KeyValueStore for MapStore {
        fn get(&self, key: &str) -> bridge_traits::error::Result<Option<String>> {
            Ok(self.values.lock().unwrap().get(key).cloned())
        }

        fn set(&self, key: &str, value: &str) -> bridge_traits::error::Result<()> {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn remove(&self, key: &str) -> bridge_traits::error::Result<()> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }
    }

    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Utc::now()),
            }
        }

        fn advance(&self, by: ChronoDuration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        signals: Mutex<Vec<HostSignal>>,
    }

    impl EnvironmentChannel for RecordingChannel {
        fn dispatch(&self, signal: HostSignal) {
            self.signals.lock().unwrap().push(signal);
        }
    }

    struct Fixture {
        auth: AuthManager,
        store: Arc<MapStore>,
        clock: Arc<ManualClock>,
        channel: Arc<RecordingChannel>,
    }

    fn fixture() -> Fixture {
        fixture_with_store(Arc::new(MapStore::default()))
    }

    fn fixture_with_store(store: Arc<MapStore>) -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let channel = Arc::new(RecordingChannel::default());
        let auth = AuthManager::new(
            TokenStore::new(store.clone(), "test_"),
            EventBus::default(),
            channel.clone(),
            clock.clone(),
        );
        Fixture {
            auth,
            store,
            clock,
            channel,
        }
    }

    fn count(auth: &AuthManager, event: &'static str) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let listener: Listener = Arc::new(move |_event: &CoreEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        auth.events().on(event, listener);
        counter
    }

    #[test]
    fn test_set_then_clear() {
        let f = fixture();
        let updated = count(&f.auth, AuthEvent::TOKEN_UPDATED);
        let logouts = count(&f.auth, AuthEvent::LOGOUT);

        f.auth
            .set_token(AuthToken::new("access").with_refresh_token("refresh"));
        assert!(f.auth.is_authenticated());
        assert_eq!(
            f.auth.auth_header().get(AUTHORIZATION_HEADER),
            Some(&"Bearer access".to_string())
        );
        assert_eq!(f.store.values.lock().unwrap().len(), 2);

        f.auth.clear_token();
        assert!(!f.auth.is_authenticated());
        assert!(f.auth.auth_header().is_empty());
        assert!(f.store.values.lock().unwrap().is_empty());

        assert_eq!(updated.load(Ordering::SeqCst), 1);
        assert_eq!(logouts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restores_persisted_token() {
        let store = Arc::new(MapStore::default());
        store.set("test_access_token", "persisted").unwrap();

        let f = fixture_with_store(store);
        assert!(f.auth.is_authenticated());
        assert_eq!(
            f.auth.current_token().map(|t| t.access_token),
            Some("persisted".to_string())
        );
    }

    #[test]
    fn test_expired_token_self_clears() {
        let f = fixture();
        let now = f.clock.now();
        f.auth.set_token(AuthToken::new("short").expires_in(now, 30));
        assert!(f.auth.is_authenticated());

        f.clock.advance(ChronoDuration::seconds(31));

        assert!(!f.auth.is_authenticated());
        assert_eq!(f.auth.state(), AuthState::Unauthenticated);
        assert!(f.store.values.lock().unwrap().is_empty());
    }

    /// Clock that runs a hook the first time it is read.
    struct HookClock {
        now: DateTime<Utc>,
        hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl Clock for HookClock {
        fn now(&self) -> DateTime<Utc> {
            let hook = self.hook.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
            self.now
        }
    }

    #[test]
    fn test_token_set_during_expiry_check_survives() {
        let store = Arc::new(MapStore::default());
        let now = Utc::now();
        let clock = Arc::new(HookClock {
            now,
            hook: Mutex::new(None),
        });
        let auth = AuthManager::new(
            TokenStore::new(store.clone(), "test_"),
            EventBus::default(),
            Arc::new(RecordingChannel::default()),
            clock.clone(),
        );
        let logouts = count(&auth, AuthEvent::LOGOUT);

        auth.set_token(AuthToken::new("old").expires_in(now, -5));
        let writer = auth.clone();
        *clock.hook.lock().unwrap() = Some(Box::new(move || {
            writer.set_token(AuthToken::new("new").expires_in(now, 3600));
        }));

        assert_eq!(
            auth.current_token().map(|t| t.access_token),
            Some("new".to_string())
        );
        assert!(auth.is_authenticated());
        assert_eq!(
            store.values.lock().unwrap().get("test_access_token"),
            Some(&"new".to_string())
        );
        assert_eq!(logouts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_expiry_checks_keep_newer_token() {
        let f = fixture();
        let now = f.clock.now();

        for round in 0..50 {
            f.auth.set_token(AuthToken::new("old").expires_in(now, -1));
            let reader = f.auth.clone();
            let checker = std::thread::spawn(move || {
                for _ in 0..20 {
                    reader.auth_header();
                }
            });
            let fresh = format!("fresh-{round}");
            f.auth
                .set_token(AuthToken::new(fresh.clone()).expires_in(now, 3600));
            checker.join().unwrap();

            assert_eq!(
                f.auth.current_token().map(|t| t.access_token),
                Some(fresh)
            );
        }
    }

    #[test]
    fn test_handle_unauthorized_signals_host() {
        let f = fixture();
        let unauthorized = count(&f.auth, AuthEvent::UNAUTHORIZED);
        f.auth.set_token(AuthToken::new("access"));

        f.auth.handle_unauthorized();

        assert!(!f.auth.is_authenticated());
        assert_eq!(unauthorized.load(Ordering::SeqCst), 1);
        assert_eq!(
            *f.channel.signals.lock().unwrap(),
            vec![HostSignal::Unauthorized]
        );
    }

    #[test]
    fn test_subscription_unsubscribe() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let subscription = f.auth.on_logout(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        f.auth.clear_token();
        assert!(subscription.unsubscribe());
        f.auth.clear_token();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_runs_once() {
        let f = fixture();
        let refreshed = count(&f.auth, AuthEvent::TOKEN_REFRESHED);
        let invocations = Arc::new(AtomicUsize::new(0));

        let slow_refresh = |invocations: Arc<AtomicUsize>| {
            move || {
                invocations.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, String>(AuthToken::new("fresh"))
                }
            }
        };

        let (first, second) = tokio::join!(
            f.auth.refresh_token(slow_refresh(Arc::clone(&invocations))),
            f.auth.refresh_token(slow_refresh(Arc::clone(&invocations))),
        );

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(first.unwrap().access_token, "fresh");
        assert_eq!(second.unwrap().access_token, "fresh");
        assert_eq!(refreshed.load(Ordering::SeqCst), 1);
        assert!(!f.auth.is_refreshing());
        assert!(f.auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_refresh_fn_may_inspect_manager() {
        let f = fixture();
        let manager = f.auth.clone();

        let token = f
            .auth
            .refresh_token(move || {
                let already_refreshing = manager.is_refreshing();
                let authenticated = manager.is_authenticated();
                async move {
                    assert!(!already_refreshing);
                    assert!(!authenticated);
                    Ok::<_, String>(AuthToken::new("fresh"))
                }
            })
            .await
            .unwrap();

        assert_eq!(token.access_token, "fresh");
        assert!(!f.auth.is_refreshing());
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_credentials() {
        let f = fixture();
        let failed = count(&f.auth, AuthEvent::REFRESH_FAILED);
        f.auth.set_token(AuthToken::new("stale"));

        let result = f
            .auth
            .refresh_token(|| async { Err::<AuthToken, _>("invalid_grant") })
            .await;

        assert_eq!(
            result.unwrap_err(),
            AuthError::RefreshFailed("invalid_grant".to_string())
        );
        assert!(!f.auth.is_authenticated());
        assert!(!f.auth.is_refreshing());
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_can_run_again_after_completion() {
        let f = fixture();

        let first = f
            .auth
            .refresh_token(|| async { Ok::<_, String>(AuthToken::new("one")) })
            .await
            .unwrap();
        let second = f
            .auth
            .refresh_token(|| async { Ok::<_, String>(AuthToken::new("two")) })
            .await
            .unwrap();

        assert_eq!(first.access_token, "one");
        assert_eq!(second.access_token, "two");
        assert_eq!(
            f.store.values.lock().unwrap().get("test_access_token"),
            Some(&"two".to_string())
        );
    }
}
