// src/exec/mod.rs

//! Execution layer.
//!
//! - [`backend`] provides the `ExecutorBackend` trait the runtime talks to.
//! - [`task_runner`] runs one instance (directories, staging, work unit)
//!   and owns the semaphore-bounded dispatcher shared by the backends.
//! - [`local`] runs commands with `sh -c` on this machine.
//! - [`cluster`] submits commands to a batch queue and polls for exit.
//! - [`staging`] handles temporary output paths.
//! - [`work_unit`] is the context handed to in-process functions.

pub mod backend;
pub mod cluster;
pub mod local;
pub mod staging;
pub mod task_runner;
pub mod work_unit;

pub use backend::ExecutorBackend;
pub use cluster::{ClusterBackend, CommandJobQueue, JobQueue};
pub use local::LocalBackend;
pub use task_runner::run_instance;
pub use work_unit::WorkContext;
