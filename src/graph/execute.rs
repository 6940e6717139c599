use crate::{
    graph::GraphStore,
    sync::{AtomicU8, Ordering},
    task::{Deps, ErasedTask, Task},
    types::{NodeKind, SyncUnsafeCell},
};
use derive_more::Debug;
use std::sync::Arc;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;

#[must_use]
#[derive(Debug)]
pub(crate) struct NodeSlot {
    pub(super) kind: NodeKind,
    /// Indexes of the dependencies in the node sequence, in declaration order.
    /// Every index is smaller than the slot's own index.
    pub(super) dependencies: Box<[u32]>,
    /// `PENDING -> RUNNING -> DONE`. `RUNNING` grants exclusive access to
    /// `task`; `DONE` (acquired) publishes its final state to readers.
    state: AtomicU8,
    #[debug(skip)]
    task: SyncUnsafeCell<Box<dyn ErasedTask>>,
}

impl NodeSlot {
    pub(super) fn new(kind: NodeKind, dependencies: Box<[u32]>, task: Box<dyn ErasedTask>) -> Self {
        Self {
            kind,
            dependencies,
            state: AtomicU8::new(PENDING),
            task: SyncUnsafeCell::new(task),
        }
    }

    pub(super) fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    /// # Safety
    ///
    /// The task must not be running and must not start running while the
    /// returned reference is alive: either the slot is `DONE`, or no job for
    /// the graph exists yet.
    pub(super) unsafe fn downcast<T: Task>(&self) -> &T {
        // SAFETY: Upheld by the caller; no `&mut` to the task can coexist.
        let task: &dyn ErasedTask = unsafe { self.task.with(|ptr| &**ptr) };
        task.as_any()
            .downcast_ref()
            .expect("NodeSlot::downcast: handle type does not match the stored task")
    }
}

impl GraphStore {
    /// Shared reference to a node that finished executing.
    ///
    /// # Panics
    /// If the node has not completed, which means the scheduler broke its
    /// ordering guarantee, or the node is not a `T`.
    pub(crate) fn completed<T: Task>(&self, index: u32) -> &T {
        let slot = &self.nodes[index as usize];
        assert!(
            slot.is_done(),
            "Node {} was read before it completed",
            self.node_id(index)
        );
        // SAFETY: `DONE` is terminal; the task is never mutated again.
        unsafe { slot.downcast() }
    }

    fn execute(&self, index: u32) {
        let slot = &self.nodes[index as usize];
        let claimed = slot
            .state
            .compare_exchange(PENDING, RUNNING, Ordering::Acquire, Ordering::Relaxed);
        assert!(
            claimed.is_ok(),
            "Node {} was scheduled more than once",
            self.node_id(index)
        );
        tracing::trace!(node = %self.node_id(index), kind = %slot.kind, "executing task node");

        let deps = Deps::new(self, index, &slot.dependencies);
        // SAFETY:
        // - The successful `PENDING -> RUNNING` transition above happens once per slot,
        //   so this is the only mutable access to the task.
        // - Readers only touch tasks in the `DONE` state, and `deps` can only reach
        //   dependencies, all of which precede this node in the sequence.
        slot.task.with_mut(|ptr| unsafe { (*ptr).execute(&deps) });

        slot.state.store(DONE, Ordering::Release);
    }
}

/// One executable unit handed to a [`WorkScheduler`](crate::scheduler::WorkScheduler):
/// either a task node or the graph's fence.
///
/// Keeps the graph's node store alive until it has run.
#[must_use]
#[derive(Debug)]
#[debug("Job({}, target: {})", graph.id, target)]
pub struct Job {
    graph: Arc<GraphStore>,
    target: u32,
}

impl Job {
    /// Whether this job is the completion fence of its graph.
    #[must_use]
    pub fn is_fence(&self) -> bool {
        self.target as usize == self.graph.nodes.len()
    }

    /// Execute the node (or signal the fence).
    ///
    /// # Panics
    /// If the job's node was already executed, or if it reads a dependency
    /// that has not completed. Both indicate a scheduler that violates the
    /// [`WorkScheduler`](crate::scheduler::WorkScheduler) contract.
    pub fn run(self) {
        if self.is_fence() {
            tracing::trace!(graph = %self.graph.id, "task graph complete");
            self.graph.fence.signal();
        } else {
            self.graph.execute(self.target);
        }
    }
}

/// The jobs of one submission: every node in sequence order, then the fence.
#[must_use]
#[derive(Debug)]
#[debug("JobBatch({}, {}..{})", graph.id, next, end)]
pub struct JobBatch {
    graph: Arc<GraphStore>,
    next: u32,
    end: u32,
}

impl JobBatch {
    pub(crate) fn new(graph: Arc<GraphStore>) -> Self {
        let end = u32::try_from(graph.nodes.len() + 1).expect("JobBatch::new: [1]");
        Self {
            graph,
            next: 0,
            end,
        }
    }
}

impl Iterator for JobBatch {
    type Item = Job;

    fn next(&mut self) -> Option<Job> {
        if self.next == self.end {
            return None;
        }
        let target = self.next;
        self.next += 1;
        Some(Job {
            graph: Arc::clone(&self.graph),
            target,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = (self.end - self.next) as usize;
        (len, Some(len))
    }
}

impl ExactSizeIterator for JobBatch {}
