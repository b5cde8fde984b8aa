//! Invocation runtime
//!
//! Carries the collaborators an invocation needs (generation backend, resource resolver,
//! optional observer) plus its cancellation flag and generation deadline. A `Runtime` is
//! passed explicitly through every `execute`/`resume` call; definitions never hold one,
//! so the same definition can run under many runtimes at once.

pub mod events;

pub use events::{ExecutionEvent, ExecutionObserver, RecordingObserver};

use crate::config::RuntimeConfig;
use crate::error::GenerationError;
use crate::provider::{GenerationBackend, GenerationOutput, GenerationRequest};
use crate::resource::{LocalResolver, ResourceResolver};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Cooperative cancellation flag, checked at step, unit, iteration and node boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct Runtime {
    backend: Arc<dyn GenerationBackend>,
    resources: Arc<dyn ResourceResolver>,
    observer: Option<Arc<dyn ExecutionObserver>>,
    cancel: CancelHandle,
    generation_timeout: Option<Duration>,
}

impl Runtime {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            resources: Arc::new(LocalResolver::new()),
            observer: None,
            cancel: CancelHandle::new(),
            generation_timeout: None,
        }
    }

    pub fn from_config(config: &RuntimeConfig, backend: Arc<dyn GenerationBackend>) -> Self {
        let mut runtime = Self::new(backend);
        runtime.generation_timeout = config.generation_timeout();
        runtime
    }

    pub fn with_resources(mut self, resources: Arc<dyn ResourceResolver>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn resources(&self) -> &dyn ResourceResolver {
        self.resources.as_ref()
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn generation_timeout(&self) -> Option<Duration> {
        self.generation_timeout
    }

    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    /// Call the backend, bounded by the generation deadline when one is set.
    pub async fn invoke(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        match self.generation_timeout {
            Some(limit) => tokio::time::timeout(limit, self.backend.invoke(request))
                .await
                .unwrap_or(Err(GenerationError::Timeout(limit))),
            None => self.backend.invoke(request).await,
        }
    }

    /// Deliver an event to the observer, if any. Never fails the invocation.
    pub fn emit(&self, scope: &str, event_type: &str, data: Value) {
        if let Some(observer) = &self.observer {
            let event = ExecutionEvent::with_now(scope, event_type, data);
            if let Err(err) = observer.on_event(&event) {
                warn!(
                    scope = %scope,
                    event_type = %event_type,
                    error = %err,
                    "failed to deliver execution event"
                );
            }
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("backend", &self.backend.backend_name())
            .field("observer", &self.observer.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("generation_timeout", &self.generation_timeout)
            .finish()
    }
}
