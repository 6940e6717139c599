#[cfg(not(feature = "loom"))]
mod pool;
mod ready_queue;

#[cfg(not(feature = "loom"))]
pub use crate::scheduler::pool::{PoolError, WorkerPool};
pub use crate::scheduler::ready_queue::ReadyQueueScheduler;
use crate::{graph::JobBatch, types::TaskId};
use thiserror::Error;

/// Ready-queue work scheduler consumed by [`TaskGraph`](crate::graph::TaskGraph).
///
/// Implementations track dependency edges between registered jobs and hand
/// eligible jobs to whichever thread asks for work. They must guarantee that:
/// - a job becomes eligible only once every declared dependency completed,
///   with the dependency's effects visible to the thread running the job;
/// - eligible jobs may run on any thread;
/// - each job runs exactly once.
///
/// The task graph checks the last two at runtime and panics on violation.
pub trait WorkScheduler: Send + Sync {
    /// Register `jobs` and write one ID per job into `ids`, in order.
    /// `ids.len()` equals `jobs.len()`.
    ///
    /// # Errors
    /// If the jobs do not fit; nothing is registered in that case.
    fn add_tasks(&self, jobs: JobBatch, ids: &mut [TaskId]) -> Result<(), SchedulerError>;

    /// Declare that `task` may not become eligible before all `dependencies`
    /// completed.
    ///
    /// # Errors
    /// If `task` is unknown or already released, or the edges do not fit.
    fn add_dependencies(&self, task: TaskId, dependencies: &[TaskId]) -> Result<(), SchedulerError>;

    /// Mark dependency-free `tasks` eligible to run now.
    ///
    /// # Errors
    /// If a task is unknown or still has unfinished dependencies; nothing is
    /// released in that case.
    fn ready_tasks(&self, tasks: &[TaskId]) -> Result<(), SchedulerError>;

    /// Drop registered `tasks` that were never released, together with their
    /// dependency edges, returning their capacity. Unknown and already
    /// released IDs are skipped.
    ///
    /// Used to roll back a submission that failed part-way. Dependents of a
    /// cancelled task that are not cancelled themselves lose that edge but
    /// are not released.
    fn cancel_tasks(&self, tasks: &[TaskId]);

    /// Run one eligible job on the calling thread. Returns `false` if none was
    /// available.
    fn do_work(&self) -> bool;

    /// Give up the calling thread's timeslice.
    fn yield_now(&self);
}

/// Errors reported by a [`WorkScheduler`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchedulerError {
    /// Registering the batch would exceed the live task limit.
    #[error("task capacity exceeded: {requested} requested, {available} available")]
    TaskCapacity {
        /// Slots the call needed.
        requested: usize,
        /// Slots left under the limit.
        available: usize,
    },
    /// Wiring the edges would exceed the live dependency edge limit.
    #[error("dependency capacity exceeded: {requested} requested, {available} available")]
    DependencyCapacity {
        /// Slots the call needed.
        requested: usize,
        /// Slots left under the limit.
        available: usize,
    },
    /// The ID was never issued, or its task completed or was cancelled.
    #[error("{0} is unknown or already completed")]
    UnknownTask(TaskId),
    /// Released while some of its dependencies are still outstanding.
    #[error("{0} still has unfinished dependencies")]
    NotReady(TaskId),
    /// The task is already queued or running.
    #[error("{0} was already released")]
    AlreadyReleased(TaskId),
}
