// src/dag/mod.rs

//! Task graph, plan resolution and scheduling.
//!
//! - [`registry`] collects [`Task`](crate::task::Task) definitions and
//!   derives task-level dependencies.
//! - [`resolver`] expands the tasks required by the targets into concrete
//!   [`instance`]s and orders them into a [`plan`].
//! - [`graph`] holds the instance DAG plus cycle reporting.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   instances are ready to run, and blocks dependents of failures.
//! - [`task_info`] provides instance states and scheduled instance types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod instance;
pub mod plan;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task_info;

pub use graph::DagGraph;
pub use instance::{InstanceId, TaskInstance};
pub use plan::Plan;
pub use registry::{EdgeKind, TaskRegistry};
pub use resolver::GraphResolver;
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use task_info::{InstanceState, ScheduledInstance};
