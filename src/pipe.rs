//! Host-facing lifecycle surface.
//!
//! The host pipeline builds an [`MBeanPipe`] from a validated configuration
//! and a registry-client adapter, starts it with its output sink, and later
//! drives shutdown through the returned [`PipeHandle`]:
//!
//! - `request_stop` flags the stop signal (idempotent, safe from anywhere);
//! - `await_termination` joins the scheduler task after the signal.
//!
//! Stopping is cooperative: the signal is observed at the top of every tick
//! and interrupts any in-progress idle wait, so shutdown latency is bounded
//! by the remaining wait, never by the full interval. A tick whose blocking
//! client calls are already in flight runs to completion first.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::RegistryClient;
use crate::config::PipeConfig;
use crate::event::EventSink;
use crate::scheduler::Engine;

/// A configured, not-yet-started pipe instance.
pub struct MBeanPipe {
    config: PipeConfig,
    client: Box<dyn RegistryClient>,
}

impl MBeanPipe {
    /// Creates a pipe from a validated configuration and a client adapter.
    #[must_use]
    pub fn new(config: PipeConfig, client: Box<dyn RegistryClient>) -> Self {
        Self { config, client }
    }

    /// Spawns the scheduler task and begins polling.
    ///
    /// Records flow into `sink` from the scheduler task and, for
    /// notifications, from the client library's dispatch context.
    #[must_use]
    pub fn start(self, sink: Arc<dyn EventSink>) -> PipeHandle {
        let cancel = CancellationToken::new();
        let engine = Engine::new(self.config, self.client, sink, cancel.clone());
        let task = tokio::spawn(engine.run());
        PipeHandle { cancel, task }
    }
}

/// Handle to a running pipe.
pub struct PipeHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PipeHandle {
    /// Requests a clean stop. Idempotent; safe from any task or thread.
    pub fn request_stop(&self) {
        info!("stop requested");
        self.cancel.cancel();
    }

    /// Returns true once a stop has been requested.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the scheduler task to finish.
    ///
    /// Call after [`request_stop`](Self::request_stop); without a prior stop
    /// request this waits indefinitely.
    pub async fn await_termination(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "scheduler task did not shut down cleanly");
        }
    }
}
