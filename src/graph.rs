mod execute;
mod submit;

pub use crate::graph::{
    execute::{Job, JobBatch},
    submit::SubmitError,
};
use crate::{
    fence::Fence,
    graph::execute::NodeSlot,
    scheduler::WorkScheduler,
    slicer::{ChunkPlan, SlicePolicy},
    task::{Deps, FnTask, Setup, SliceBody, SliceTask, Task},
    types::{GraphId, Handle, NodeId, NodeKind},
};
use core::ops::Range;
use derive_more::Debug;
use std::sync::Arc;

/// Node store shared between a [`TaskGraph`] and the jobs it hands to a
/// scheduler.
#[derive(Debug)]
pub(crate) struct GraphStore {
    pub(crate) id: GraphId,
    nodes: Vec<NodeSlot>,
    fence: Fence,
}

impl GraphStore {
    pub(crate) fn node_id(&self, index: u32) -> NodeId {
        NodeId {
            graph: self.id,
            index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Nodes may be added; nothing is registered with a scheduler.
    Building,
    /// Jobs are registered and roots released.
    Submitted,
    /// A scheduler call failed part-way; the graph can never complete.
    Poisoned,
}

/// One-shot dependency graph of task nodes plus its completion fence.
///
/// Usage:
/// 1. Add nodes with [`add`](Self::add), [`add_with`](Self::add_with),
///    [`add_fn`](Self::add_fn) or [`add_slices`](Self::add_slices). A node can
///    only depend on nodes added before it, so the graph is acyclic by
///    construction.
/// 2. [`submit`](Self::submit) it to a [`WorkScheduler`].
/// 3. [`wait`](Self::wait) on the same scheduler; the calling thread executes
///    work while waiting.
/// 4. Read each node's own fields with [`get`](Self::get).
///
/// A graph runs once. Submitting it again is an error.
#[must_use]
#[derive(Debug)]
pub struct TaskGraph {
    store: Arc<GraphStore>,
    phase: Phase,
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGraph {
    /// Empty graph with a fresh process-unique ID.
    pub fn new() -> Self {
        Self {
            store: Arc::new(GraphStore {
                id: GraphId::next(),
                nodes: vec![],
                fence: Fence::new(),
            }),
            phase: Phase::Building,
        }
    }

    /// ID carried by every [`NodeId`] of this graph.
    #[must_use]
    pub fn id(&self) -> GraphId {
        self.store.id
    }

    /// Number of task nodes, the fence excluded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.nodes.len()
    }

    /// Whether no task node was added yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.nodes.is_empty()
    }

    /// Add a task without dependencies (a root).
    pub fn add<T: Task>(&mut self, task: T) -> Handle<T> {
        self.insert(NodeKind::Plain, Box::default(), task)
    }

    /// Add a task whose dependencies are declared by `setup` through
    /// [`Setup::depend`].
    ///
    /// # Panics
    /// If `setup` declares a node of another graph.
    pub fn add_with<T: Task>(&mut self, setup: impl FnOnce(&mut Setup) -> T) -> Handle<T> {
        let mut api = Setup::new(self.id());
        let task = setup(&mut api);
        self.insert(NodeKind::Plain, api.into_dependencies(), task)
    }

    /// Add a function-wrapping node running `body` after `dependencies`.
    ///
    /// # Panics
    /// If a dependency belongs to another graph.
    pub fn add_fn<R, F>(&mut self, dependencies: &[NodeId], body: F) -> Handle<FnTask<R>>
    where
        R: Send + Sync + 'static,
        F: FnOnce(&Deps<'_>) -> R + Send + Sync + 'static,
    {
        let dependencies = self.declare(dependencies);
        self.insert(NodeKind::Function, dependencies, FnTask::new(body))
    }

    /// Split `0..count` according to `policy` and add one slice node per
    /// chunk, each running `body` on its own range after `dependencies`.
    ///
    /// Handles are returned in range order. No reduction is performed.
    ///
    /// # Panics
    /// If a dependency belongs to another graph, or the policy's alignment is
    /// not a power of two.
    pub fn add_slices<R, F>(
        &mut self,
        count: usize,
        policy: SlicePolicy,
        dependencies: &[NodeId],
        body: F,
    ) -> Vec<Handle<SliceTask<R>>>
    where
        R: Send + Sync + 'static,
        F: Fn(&Deps<'_>, Range<usize>) -> R + Send + Sync + 'static,
    {
        let plan = ChunkPlan::new(count, policy);
        let dependencies = self.declare(dependencies);
        let body: SliceBody<R> = Arc::new(body);
        tracing::trace!(
            graph = %self.id(),
            count,
            chunk_size = plan.chunk_size(),
            num_chunks = plan.num_chunks(),
            "adding slice nodes"
        );
        plan.iter()
            .map(|range| {
                let task = SliceTask::new(range, Arc::clone(&body));
                self.insert(NodeKind::Slice, dependencies.clone(), task)
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn store_for_tests(&self) -> Arc<GraphStore> {
        Arc::clone(&self.store)
    }

    fn declare(&self, dependencies: &[NodeId]) -> Box<[u32]> {
        let mut api = Setup::new(self.id());
        for &id in dependencies {
            api.depend_on(id);
        }
        api.into_dependencies()
    }

    fn insert<T: Task>(&mut self, kind: NodeKind, dependencies: Box<[u32]>, task: T) -> Handle<T> {
        let id = self.id();
        assert_eq!(
            self.phase,
            Phase::Building,
            "Cannot add task nodes to {id} after it was submitted"
        );
        let store = Arc::get_mut(&mut self.store).expect("TaskGraph::insert: [1]");
        // The fence takes the index right after the last node.
        let index = u32::try_from(store.nodes.len())
            .ok()
            .filter(|&index| index < u32::MAX - 1)
            .expect("TaskGraph::insert: too many task nodes");
        store
            .nodes
            .push(NodeSlot::new(kind, dependencies, Box::new(task)));
        Handle::new(store.node_id(index))
    }

    /// Variant of the node behind `id`.
    #[must_use]
    pub fn kind(&self, id: impl Into<NodeId>) -> NodeKind {
        self.slot(id.into()).kind
    }

    /// Declared dependencies of the node behind `id`, in declaration order.
    pub fn dependencies(&self, id: impl Into<NodeId>) -> impl ExactSizeIterator<Item = NodeId> + '_ {
        let store = &self.store;
        self.slot(id.into())
            .dependencies
            .iter()
            .map(move |&index| store.node_id(index))
    }

    fn slot(&self, id: NodeId) -> &NodeSlot {
        assert_eq!(
            id.graph, self.store.id,
            "Node {id} does not belong to {}",
            self.store.id
        );
        &self.store.nodes[id.index()]
    }

    /// Read a node.
    ///
    /// # Panics
    /// If the graph was submitted and the node has not executed yet, or the
    /// handle belongs to another graph.
    #[must_use]
    pub fn get<T: Task>(&self, handle: Handle<T>) -> &T {
        self.try_get(handle)
            .unwrap_or_else(|| panic!("Node {} has not executed yet", handle.id()))
    }

    /// Read a node, or `None` if the graph was submitted and the node has not
    /// executed yet.
    ///
    /// # Panics
    /// If the handle belongs to another graph.
    #[must_use]
    pub fn try_get<T: Task>(&self, handle: Handle<T>) -> Option<&T> {
        let slot = self.slot(handle.id());
        match self.phase {
            // SAFETY: No job of this graph exists before submission.
            Phase::Building => Some(unsafe { slot.downcast() }),
            _ if slot.is_done() => Some(self.store.completed(handle.id().index)),
            _ => None,
        }
    }

    /// Whether the fence signaled, i.e. every node executed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.store.fence.is_signaled()
    }

    /// Number of times the fence executed; 1 once the graph completed.
    #[must_use]
    pub fn fence_count(&self) -> u32 {
        self.store.fence.count()
    }

    /// Block until every node executed, running scheduler work on the calling
    /// thread meanwhile and yielding when none is ready.
    ///
    /// # Panics
    /// If the graph was never submitted or its submission failed.
    pub fn wait<S: WorkScheduler + ?Sized>(&self, scheduler: &S) {
        match self.phase {
            Phase::Submitted => {}
            Phase::Building => panic!("{} was never submitted", self.id()),
            Phase::Poisoned => panic!("{} failed to submit and cannot complete", self.id()),
        }
        while !self.store.fence.is_signaled() {
            if !scheduler.do_work() {
                scheduler.yield_now();
            }
        }
    }
}
