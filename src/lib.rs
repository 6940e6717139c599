//! Dependency-ordered task graphs on top of a pluggable work scheduler.
//!
//! A [`TaskGraph`] is built once from task nodes, each of which may depend on
//! nodes added before it, so every graph is acyclic by construction. Submitting
//! the graph translates it into a ready-queue scheduler's vocabulary:
//! - every node and a completion fence are registered as jobs in one batch;
//! - every node with dependencies gets exactly one dependency set;
//! - the fence depends only on the leaves (nodes nothing depends on);
//! - the roots are released last.
//!
//! The submitting thread then [`wait`](TaskGraph::wait)s on the fence while
//! helping to drain the scheduler. Submission bookkeeping lives in a stack
//! arena ([`arena::StackArena`]), so moderate graphs are wired without heap
//! allocation.
//!
//! Key modules:
//! - `graph`: graph construction, submission and completion waiting.
//! - `task`: the `Task` trait, the dependency APIs exposed to tasks, and the
//!   function and slice node variants.
//! - `scheduler`: the `WorkScheduler` contract, a reference ready-queue
//!   implementation and a worker thread pool.
//! - `slicer`: chunking of bulk workloads into data-parallel slice nodes.
//! - `arena`: bump allocation from an inline buffer with heap fallback.
//!
//! Quick start:
//! 1. Create a [`ReadyQueueScheduler`] and optionally a [`WorkerPool`] on it.
//! 2. Add nodes with [`TaskGraph::add_fn`] (or implement [`Task`] and use
//!    [`TaskGraph::add_with`]).
//! 3. [`submit`](TaskGraph::submit), [`wait`](TaskGraph::wait), then read the
//!    results with [`TaskGraph::get`].
//!
//! Every node runs exactly once, after all of its dependencies, and observes
//! their final state. Scheduler violations of that contract panic instead of
//! causing data races.

/// Scratch memory for short-lived bookkeeping.
///
/// Provides the `ScratchAlloc` strategy trait, a `Heap` passthrough, the
/// fixed-capacity bump allocator `StackArena` with heap spill, and the
/// arena-backed growable buffer `ScratchVec`.
pub mod arena;
/// Tunables: scheduler capacity limits, worker pool settings and the size of
/// the submission arena.
pub mod config;
/// One-shot completion signal run as the last job of every graph.
pub mod fence;
/// Task graph construction, submission and waiting.
///
/// Contains the node store shared with scheduled jobs, the submission
/// algorithm that wires the graph into a scheduler, and the per-node state
/// machine that guarantees exactly-once execution.
pub mod graph;
/// The work scheduler contract and the implementations shipped with the
/// crate.
pub mod scheduler;
/// Partitioning of `0..count` into aligned, bounded chunks.
pub mod slicer;
mod sync;
/// Task definitions and the APIs exposed to tasks.
///
/// Defines the `Task` trait, the `Setup` API used while adding a node to
/// declare dependencies, `Deps` used at runtime to read completed
/// dependencies, and the `FnTask` and `SliceTask` node variants.
pub mod task;
/// Identifiers, typed node handles and the `SyncUnsafeCell` wrapper used by
/// the node store.
pub mod types;
mod utils;

#[cfg(not(feature = "loom"))]
pub use crate::scheduler::WorkerPool;
pub use crate::{
    graph::{SubmitError, TaskGraph},
    scheduler::{ReadyQueueScheduler, SchedulerError, WorkScheduler},
    slicer::SlicePolicy,
    task::{Deps, FnTask, Setup, SliceTask, Task},
    types::{Handle, NodeId, NodeKind, TaskId},
};
