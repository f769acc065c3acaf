//! Core service façade and bootstrap helpers.
//!
//! [`CoreService`] is the context object hosts hold on to. It owns one
//! [`ApiClient`] (and through it the auth manager, the event bus, the
//! response cache and the in-flight registry) and hands out the typed
//! per-resource services built on top of it.
//!
//! Capabilities (HTTP transport, token storage, host signal channel, clock)
//! are injected through [`ClientConfig`]. Desktop apps typically enable the
//! `desktop-shims` feature, which fills missing capabilities with the
//! `bridge-desktop` implementations.
//!
//! ```ignore
//! use core_service::{ClientConfig, CoreService, PollOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! let core = CoreService::new(ClientConfig::builder().base_url("https://api.example.com").build()?)?;
//! let task = core.tasks().submit(&submission).await?;
//! let done = core
//!     .tasks()
//!     .poll_until_complete(&task.id, PollOptions::default(), |t| println!("{:?}", t.progress), &CancellationToken::new())
//!     .await?;
//! ```

pub mod error;
pub mod evaluation;
pub mod health;
pub mod rooms;
pub mod tasks;

pub use error::{CoreError, Result};
pub use evaluation::{EvaluationRequest, EvaluationResult, EvaluationService, EVALUATION_TIMEOUT};
pub use health::{HealthService, HealthStatus, HEALTH_CACHE_TTL};
pub use rooms::{CreateRoom, Room, RoomsService};
pub use tasks::{PollOptions, TaskInfo, TaskPage, TaskQuery, TaskStatus, TaskSubmission, TasksService};

pub use core_auth::{AuthManager, AuthState, AuthToken};
pub use core_client::{ApiClient, ApiError, Envelope, ErrorKind, Method, RequestOptions};
pub use core_runtime::config::{CachePolicy, ClientConfig, ClientConfigBuilder, RetryPolicy};
pub use core_runtime::events::{AuthEvent, CoreEvent, EventBus, RequestEvent};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::{BroadcastEnvironmentChannel, MemoryKeyValueStore, ReqwestHttpClient};

use bridge_traits::signal::{EnvironmentChannel, HostSignal};
use core_auth::Subscription;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Primary façade exposed to host applications.
///
/// Cheap to clone; clones share one client.
#[derive(Clone)]
pub struct CoreService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    client: ApiClient,
    channel: Arc<dyn EnvironmentChannel>,
    health: HealthService,
    tasks: TasksService,
    rooms: RoomsService,
    evaluation: EvaluationService,
    forced_logout: Mutex<Option<Subscription>>,
}

impl CoreService {
    /// Builds the client and every service from `config`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or a capability is missing.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let channel = Arc::clone(&config.environment_channel);
        let client = ApiClient::new(config)?;
        Ok(Self::from_client(client, channel))
    }

    /// Wraps an existing client.
    ///
    /// A forced logout (a `401` from any request) cancels the remaining
    /// in-flight requests and empties the cache.
    pub fn from_client(client: ApiClient, channel: Arc<dyn EnvironmentChannel>) -> Self {
        let weak = client.downgrade();
        let forced_logout = client.auth().on_unauthorized(move || {
            if let Some(client) = weak.upgrade() {
                let cancelled = client.cancel_all();
                client.clear_cache();
                info!(cancelled, "Session torn down after forced logout");
            }
        });

        Self {
            inner: Arc::new(ServiceInner {
                health: HealthService::new(client.clone()),
                tasks: TasksService::new(client.clone()),
                rooms: RoomsService::new(client.clone()),
                evaluation: EvaluationService::new(client.clone()),
                client,
                channel,
                forced_logout: Mutex::new(Some(forced_logout)),
            }),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    pub fn auth(&self) -> &AuthManager {
        self.inner.client.auth()
    }

    pub fn events(&self) -> &EventBus {
        self.inner.client.events()
    }

    pub fn health(&self) -> &HealthService {
        &self.inner.health
    }

    pub fn tasks(&self) -> &TasksService {
        &self.inner.tasks
    }

    pub fn rooms(&self) -> &RoomsService {
        &self.inner.rooms
    }

    pub fn evaluation(&self) -> &EvaluationService {
        &self.inner.evaluation
    }

    /// Ends the session.
    ///
    /// Cancels every in-flight request, empties the cache, clears the
    /// credentials and notifies the host.
    pub fn logout(&self) {
        let client = &self.inner.client;
        let cancelled = client.cancel_all();
        client.clear_cache();
        client.auth().clear_token();
        self.inner.channel.dispatch(HostSignal::LoggedOut);
        info!(cancelled, "Logged out");
    }

    /// Tears the client down. Credentials are kept.
    pub fn shutdown(&self) {
        let subscription = self
            .inner
            .forced_logout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        self.inner.client.destroy();
    }
}

impl fmt::Debug for CoreService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreService")
            .field("client", &self.inner.client)
            .finish_non_exhaustive()
    }
}

/// Builds a service from `API_BASE_URL` / `API_TIMEOUT_MS` with the desktop
/// capability defaults.
#[cfg(feature = "desktop-shims")]
pub fn bootstrap_from_env() -> Result<CoreService> {
    let config = ClientConfigBuilder::from_env()?.build()?;
    CoreService::new(config)
}
