//! Interceptor chains
//!
//! An [`InterceptorChain`] threads a value through an ordered list of async
//! stages. Each stage has an optional fulfilled handler, which transforms a
//! value, and an optional rejected handler, which may recover from a failure
//! raised by an earlier stage.
//!
//! ```ignore
//! let id = client.interceptors().request.on_fulfilled(|mut request: RequestDescriptor| async move {
//!     request.headers.insert("X-Tenant".into(), "lab".into());
//!     Ok(request)
//! });
//!
//! client.interceptors().request.eject(id);
//! ```

use crate::error::{ApiError, Failure};
use crate::request::RequestDescriptor;
use crate::response::{Envelope, ResponseBody};
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

type StageResult<T> = Result<T, Failure>;
type FulfilledFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, StageResult<T>> + Send + Sync>;
type RejectedFn<T> = Arc<dyn Fn(Failure) -> BoxFuture<'static, StageResult<T>> + Send + Sync>;

/// Handle used to eject a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

struct Stage<T> {
    id: InterceptorId,
    fulfilled: Option<FulfilledFn<T>>,
    rejected: Option<RejectedFn<T>>,
}

impl<T> Clone for Stage<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            fulfilled: self.fulfilled.clone(),
            rejected: self.rejected.clone(),
        }
    }
}

/// Ordered list of transform/recover stages.
pub struct InterceptorChain<T> {
    stages: Mutex<Vec<Stage<T>>>,
    next_id: AtomicU64,
}

impl<T: Send + 'static> InterceptorChain<T> {
    pub fn new() -> Self {
        Self {
            stages: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Stage<T>>> {
        self.stages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a stage and returns its id.
    pub fn add<F, FFut, R, RFut>(&self, fulfilled: Option<F>, rejected: Option<R>) -> InterceptorId
    where
        F: Fn(T) -> FFut + Send + Sync + 'static,
        FFut: Future<Output = StageResult<T>> + Send + 'static,
        R: Fn(Failure) -> RFut + Send + Sync + 'static,
        RFut: Future<Output = StageResult<T>> + Send + 'static,
    {
        let fulfilled = fulfilled.map(|f| {
            Arc::new(move |value: T| f(value).boxed()) as FulfilledFn<T>
        });
        let rejected = rejected.map(|r| {
            Arc::new(move |failure: Failure| r(failure).boxed()) as RejectedFn<T>
        });

        let id = InterceptorId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Stage {
            id,
            fulfilled,
            rejected,
        });
        debug!(interceptor = id.0, "Interceptor added");
        id
    }

    /// Appends a stage with only a fulfilled handler.
    pub fn on_fulfilled<F, Fut>(&self, fulfilled: F) -> InterceptorId
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StageResult<T>> + Send + 'static,
    {
        self.add(Some(fulfilled), None::<fn(Failure) -> BoxFuture<'static, StageResult<T>>>)
    }

    /// Appends a stage with only a rejected handler.
    pub fn on_rejected<R, Fut>(&self, rejected: R) -> InterceptorId
    where
        R: Fn(Failure) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StageResult<T>> + Send + 'static,
    {
        self.add(None::<fn(T) -> BoxFuture<'static, StageResult<T>>>, Some(rejected))
    }

    /// Removes a stage. Returns `false` if the id is unknown.
    pub fn eject(&self, id: InterceptorId) -> bool {
        let mut stages = self.lock();
        let before = stages.len();
        stages.retain(|stage| stage.id != id);
        let removed = stages.len() != before;
        if removed {
            debug!(interceptor = id.0, "Interceptor ejected");
        }
        removed
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `input` through every stage in registration order.
    ///
    /// While the value is `Ok`, fulfilled handlers transform it. Once a
    /// stage fails, later rejected handlers may recover. A failure left after
    /// the last stage is classified into an [`ApiError`].
    pub async fn execute(&self, input: StageResult<T>) -> Result<T, ApiError> {
        let stages = self.lock().clone();
        let mut current = input;

        for stage in stages {
            current = match current {
                Ok(value) => match &stage.fulfilled {
                    Some(fulfilled) => fulfilled(value).await,
                    None => Ok(value),
                },
                Err(failure) => match &stage.rejected {
                    Some(rejected) => {
                        trace!(interceptor = stage.id.0, "Offering failure to rejected handler");
                        rejected(failure).await
                    }
                    None => Err(failure),
                },
            };
        }

        current.map_err(ApiError::classify)
    }
}

impl<T: Send + 'static> Default for InterceptorChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for InterceptorChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages = self.stages.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InterceptorChain")
            .field("stages", &stages.len())
            .finish()
    }
}

/// The two chains owned by a client.
#[derive(Debug, Default)]
pub struct Interceptors {
    /// Applied to every outgoing request.
    pub request: InterceptorChain<RequestDescriptor>,
    /// Applied to every successful response.
    pub response: InterceptorChain<Envelope<ResponseBody>>,
}
