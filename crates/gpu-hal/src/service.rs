//! Owner of the single process-wide compute context.
//!
//! The composition root creates one `ComputeService` and hands it (or the
//! context it yields) to whoever needs compute access.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use ts_common::{ClDriver, ComputeConfig};

use crate::context::{ComputeContext, ProgramSource};

enum State {
    Uninitialized,
    Ready(Arc<ComputeContext>),
    ShutDown,
}

/// Lazily initialized, idempotent holder of the compute context.
pub struct ComputeService {
    driver: Arc<dyn ClDriver>,
    config: ComputeConfig,
    source: ProgramSource,
    state: Mutex<State>,
}

impl ComputeService {
    pub fn new(driver: Arc<dyn ClDriver>, config: ComputeConfig) -> Self {
        Self {
            driver,
            config,
            source: ProgramSource::Resource,
            state: Mutex::new(State::Uninitialized),
        }
    }

    /// A service configured from the process environment.
    pub fn from_env(driver: Arc<dyn ClDriver>) -> Self {
        Self::new(driver, ComputeConfig::from_env())
    }

    pub fn with_source(mut self, source: ProgramSource) -> Self {
        self.source = source;
        self
    }

    pub fn config(&self) -> &ComputeConfig {
        &self.config
    }

    /// Return the context, creating it on the first call.
    ///
    /// Later calls return the same context without repeating selection, even
    /// when the first attempt left it unavailable. After
    /// [`shutdown`](Self::shutdown) an unavailable, resource-free context is
    /// returned.
    pub fn initialize(&self) -> Arc<ComputeContext> {
        let mut state = self.state.lock();
        match &*state {
            State::Ready(ctx) => return Arc::clone(ctx),
            State::ShutDown => {
                warn!("Compute service used after shutdown");
                return Arc::new(ComputeContext::unavailable(Arc::clone(&self.driver)));
            }
            State::Uninitialized => {}
        }

        debug!(enabled = self.config.enabled, "Initializing compute service");
        let ctx = Arc::new(ComputeContext::with_source(
            Arc::clone(&self.driver),
            &self.config,
            self.source.clone(),
        ));
        *state = State::Ready(Arc::clone(&ctx));
        ctx
    }

    /// The context, if [`initialize`](Self::initialize) ran and the service
    /// is not shut down.
    pub fn get(&self) -> Option<Arc<ComputeContext>> {
        match &*self.state.lock() {
            State::Ready(ctx) => Some(Arc::clone(ctx)),
            _ => None,
        }
    }

    /// True when initialized and the context is available.
    pub fn is_available(&self) -> bool {
        self.get().is_some_and(|ctx| ctx.available())
    }

    /// Drop the service's reference to the context.
    ///
    /// Device resources are released once the last outstanding `Arc` goes
    /// away. The service cannot be initialized again.
    pub fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), State::ShutDown);
        if let State::Ready(ctx) = previous {
            debug!(
                outstanding = Arc::strong_count(&ctx) - 1,
                "Compute service shut down"
            );
        }
    }
}

impl std::fmt::Debug for ComputeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.lock() {
            State::Uninitialized => "uninitialized",
            State::Ready(_) => "ready",
            State::ShutDown => "shut down",
        };
        f.debug_struct("ComputeService")
            .field("config", &self.config)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Call, FakeDriver};

    fn service(fake: &Arc<FakeDriver>, config: ComputeConfig) -> ComputeService {
        ComputeService::new(fake.clone(), config)
            .with_source(ProgramSource::Text("kernel void k() {}".into()))
    }

    #[test]
    fn initialize_is_idempotent() {
        let fake = Arc::new(FakeDriver::with_gpu(&["k"]));
        let svc = service(&fake, ComputeConfig::enabled());
        assert!(svc.get().is_none());
        let first = svc.initialize();
        let second = svc.initialize();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.available(), second.available());
        assert_eq!(fake.count(|c| *c == Call::Platforms), 1);
        assert!(svc.is_available());
    }

    #[test]
    fn failed_attempt_is_not_retried() {
        let fake = Arc::new(FakeDriver::new());
        let svc = service(&fake, ComputeConfig::enabled());
        assert!(!svc.initialize().available());
        assert!(!svc.initialize().available());
        assert_eq!(fake.count(|c| *c == Call::Platforms), 1);
    }

    #[test]
    fn shutdown_releases_and_is_terminal() {
        let fake = Arc::new(FakeDriver::with_gpu(&["k"]));
        let svc = service(&fake, ComputeConfig::enabled());
        svc.initialize();
        svc.shutdown();
        assert!(svc.get().is_none());
        assert_eq!(fake.count(|c| matches!(c, Call::ReleaseContext(_))), 1);

        let after = svc.initialize();
        assert!(!after.available());
        assert_eq!(fake.count(|c| *c == Call::Platforms), 1);
    }

    #[test]
    fn outstanding_reference_delays_release() {
        let fake = Arc::new(FakeDriver::with_gpu(&["k"]));
        let svc = service(&fake, ComputeConfig::enabled());
        let ctx = svc.initialize();
        svc.shutdown();
        assert_eq!(fake.count(|c| matches!(c, Call::ReleaseContext(_))), 0);
        drop(ctx);
        assert_eq!(fake.count(|c| matches!(c, Call::ReleaseContext(_))), 1);
    }
}
