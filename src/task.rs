use crate::{
    graph::GraphStore,
    types::{GraphId, Handle, NodeId},
};
use core::{any::Any, ops::Range};
use derive_more::Debug;
use std::sync::Arc;

/// A single unit of computation in a task graph.
///
/// A task is added to a [`TaskGraph`](crate::graph::TaskGraph) once, declaring
/// its dependencies through [`Setup`]. `execute` is invoked exactly once per
/// submission, after every dependency executed, on whichever thread claimed
/// it. The task's own fields are its output: dependents read them through
/// [`Deps::get`], the caller through
/// [`TaskGraph::get`](crate::graph::TaskGraph::get) once the graph completed.
pub trait Task: Send + Sync + 'static {
    /// Run the task. Must not block; a panic is not caught by the graph.
    fn execute(&mut self, deps: &Deps<'_>);
}

pub(crate) trait ErasedTask: Send + Sync {
    fn execute(&mut self, deps: &Deps<'_>);
    fn as_any(&self) -> &dyn Any;
}

impl<T: Task> ErasedTask for T {
    fn execute(&mut self, deps: &Deps<'_>) {
        Task::execute(self, deps);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Dependency declaration API available while a node is being added.
#[derive(Debug)]
pub struct Setup {
    graph: GraphId,
    dependencies: Vec<u32>,
}

impl Setup {
    pub(crate) fn new(graph: GraphId) -> Self {
        Self {
            graph,
            dependencies: vec![],
        }
    }

    /// Declare a dependency on `handle` and hand it back for the task to keep.
    /// Declaring the same node twice is allowed.
    ///
    /// # Panics
    /// If `handle` belongs to another task graph.
    pub fn depend<T>(&mut self, handle: Handle<T>) -> Handle<T> {
        self.depend_on(handle.id());
        handle
    }

    pub(crate) fn depend_on(&mut self, id: NodeId) {
        assert_eq!(
            id.graph, self.graph,
            "Node {id} is declared as a dependency of a node in {}",
            self.graph
        );
        self.dependencies.push(id.index);
    }

    pub(crate) fn into_dependencies(self) -> Box<[u32]> {
        self.dependencies.into_boxed_slice()
    }
}

/// Read access to the completed dependencies of the executing node.
#[derive(Debug)]
#[debug("Deps {{ node: {}, dependencies: {:?} }}", graph.node_id(*node), dependencies)]
pub struct Deps<'a> {
    graph: &'a GraphStore,
    node: u32,
    dependencies: &'a [u32],
}

impl<'a> Deps<'a> {
    pub(crate) fn new(graph: &'a GraphStore, node: u32, dependencies: &'a [u32]) -> Self {
        Self {
            graph,
            node,
            dependencies,
        }
    }

    /// The node being executed.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.graph.node_id(self.node)
    }

    /// Number of declared dependencies, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Whether the node declared no dependencies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Declared dependencies in declaration order.
    pub fn ids(&self) -> impl ExactSizeIterator<Item = NodeId> + 'a {
        let graph = self.graph;
        self.dependencies.iter().map(move |&index| graph.node_id(index))
    }

    /// Read a dependency by handle.
    ///
    /// # Panics
    /// If `handle` is not among the declared dependencies of this node.
    #[must_use]
    pub fn get<T: Task>(&self, handle: Handle<T>) -> &'a T {
        let id = handle.id();
        assert!(
            id.graph == self.graph.id && self.dependencies.contains(&id.index),
            "Node {} reads {id}, which is not one of its dependencies",
            self.node()
        );
        self.graph.completed(id.index)
    }

    /// Read the dependency declared at `position`.
    ///
    /// # Panics
    /// If `position` is out of range or the dependency is not a `T`.
    #[must_use]
    pub fn at<T: Task>(&self, position: usize) -> &'a T {
        let Some(&index) = self.dependencies.get(position) else {
            panic!(
                "Node {} has {} dependencies, position {position} is out of range",
                self.node(),
                self.dependencies.len()
            );
        };
        self.graph.completed(index)
    }
}

type FnBody<R> = Box<dyn FnOnce(&Deps<'_>) -> R + Send + Sync>;

/// Function-wrapping node: a captured closure plus an explicit dependency
/// list, added with [`TaskGraph::add_fn`](crate::graph::TaskGraph::add_fn).
/// The closure's return value becomes the node's output.
#[derive(Debug)]
pub struct FnTask<R> {
    #[debug(skip)]
    body: Option<FnBody<R>>,
    output: Option<R>,
}

impl<R> FnTask<R> {
    pub(crate) fn new(body: impl FnOnce(&Deps<'_>) -> R + Send + Sync + 'static) -> Self {
        Self {
            body: Some(Box::new(body)),
            output: None,
        }
    }

    /// The closure's result, once the node executed.
    #[must_use]
    pub fn output(&self) -> Option<&R> {
        self.output.as_ref()
    }
}

impl<R: Send + Sync + 'static> Task for FnTask<R> {
    fn execute(&mut self, deps: &Deps<'_>) {
        let body = self.body.take().expect("FnTask::execute: body already consumed");
        self.output = Some(body(deps));
    }
}

pub(crate) type SliceBody<R> = Arc<dyn Fn(&Deps<'_>, Range<usize>) -> R + Send + Sync>;

/// Data-parallel chunk node created by
/// [`TaskGraph::add_slices`](crate::graph::TaskGraph::add_slices).
///
/// Owns one contiguous `offset..offset + len` range of the bulk input and a
/// private result slot; combining the results of all chunks is up to the
/// caller.
#[derive(Debug)]
pub struct SliceTask<R> {
    range: Range<usize>,
    #[debug(skip)]
    body: SliceBody<R>,
    result: Option<R>,
}

impl<R> SliceTask<R> {
    pub(crate) fn new(range: Range<usize>, body: SliceBody<R>) -> Self {
        Self {
            range,
            body,
            result: None,
        }
    }

    /// Index of the first element of this chunk in the bulk input.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.range.start
    }

    /// Number of elements in this chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.range.len()
    }

    /// Whether the chunk covers no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// `offset()..offset() + len()`.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Result of this chunk, once the node executed.
    #[must_use]
    pub fn result(&self) -> Option<&R> {
        self.result.as_ref()
    }
}

impl<R: Send + Sync + 'static> Task for SliceTask<R> {
    fn execute(&mut self, deps: &Deps<'_>) {
        self.result = Some((self.body)(deps, self.range.clone()));
    }
}
