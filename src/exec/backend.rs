// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime hands ready instances to an `ExecutorBackend` and waits for
//! `InstanceCompleted` events on its channel. Production code uses
//! [`LocalBackend`](crate::exec::LocalBackend) or
//! [`ClusterBackend`](crate::exec::ClusterBackend); tests can provide their
//! own implementation that doesn't spawn real processes.

use std::future::Future;
use std::pin::Pin;

use crate::dag::ScheduledInstance;
use crate::errors::Result;

/// Trait abstracting how scheduled instances are executed.
pub trait ExecutorBackend: Send {
    /// Dispatch the given instances for execution.
    ///
    /// Implementations must not wait for the work units to finish; every
    /// dispatched instance eventually produces exactly one
    /// `RuntimeEvent::InstanceCompleted`.
    fn spawn_ready_instances(
        &mut self,
        instances: Vec<ScheduledInstance>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
