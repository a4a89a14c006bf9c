use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    core::error::RuntimeError,
    integration::runtime::{Runtime, TickReport},
};

pub type ErrorHook = Box<dyn FnMut(&RuntimeError) + Send>;

/// Requests the end of a running [`AppRunner`] from anywhere
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the runner to call `done` and return
    pub fn done(&self) {
        self.token.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Drives a started [`Runtime`] on the tokio scheduler: one flush per scheduler tick
pub struct AppRunner<S> {
    runtime: Runtime<S>,
    shutdown: ShutdownHandle,
    on_error: ErrorHook,
}

impl<S> AppRunner<S> {
    pub fn new(runtime: Runtime<S>) -> Self {
        Self::with_shutdown(runtime, ShutdownHandle::new())
    }

    pub fn with_shutdown(runtime: Runtime<S>, shutdown: ShutdownHandle) -> Self {
        Self {
            runtime,
            shutdown,
            on_error: Box::new(|e: &RuntimeError| error!("runtime error: {e}")),
        }
    }

    /// Called for every aborted batch. The runner keeps going with the last good state.
    pub fn on_error(mut self, hook: impl FnMut(&RuntimeError) + Send + 'static) -> Self {
        self.on_error = Box::new(hook);
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn runtime(&self) -> &Runtime<S> {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime<S> {
        &mut self.runtime
    }

    /// Flush one tick, reporting update failures to the error hook
    pub fn run_one_cycle(&mut self) -> Result<Option<TickReport>, RuntimeError> {
        match self.runtime.flush() {
            Ok(report) => Ok(Some(report)),
            Err(err @ RuntimeError::Update { .. }) => {
                (self.on_error)(&err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Run until shutdown is requested, then call `done` and hand the runtime back.
    pub async fn run(mut self) -> Result<Runtime<S>, RuntimeError> {
        info!("runtime loop started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.token.cancelled() => break,
                open = self.runtime.wait() => {
                    if !open {
                        break;
                    }
                }
            }

            // let dispatches issued in the same scheduler turn join this tick
            tokio::task::yield_now().await;
            self.run_one_cycle()?;
        }

        self.runtime.done()?;
        info!(stats = ?self.runtime.stats(), "runtime loop finished");
        Ok(self.runtime)
    }
}
