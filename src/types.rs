use crate::sync::UnsafeCell;
use core::{
    marker::PhantomData,
    sync::atomic::{AtomicU32, Ordering},
};
use derive_more::{Debug, Display};

/// A minimal `UnsafeCell` wrapper that is `Sync` when `T: Send + Sync`.
///
/// Used internally by the task graph to let worker threads run a node's
/// `execute` through a shared reference to the graph store. Exclusive access
/// is enforced by the node slot's lifecycle state, not by the cell.
#[derive(Debug)]
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T>(#[debug(skip)] UnsafeCell<T>);

unsafe impl<T: Send + Sync> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }

    #[cfg(not(feature = "loom"))]
    pub(crate) fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
        f(self.0.get())
    }

    #[cfg(not(feature = "loom"))]
    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
        f(self.0.get())
    }

    #[cfg(feature = "loom")]
    pub(crate) fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
        self.0.with(f)
    }

    #[cfg(feature = "loom")]
    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
        self.0.with_mut(f)
    }
}

/// Opaque scheduler-side identifier of one registered job.
///
/// Created by the [`WorkScheduler`](crate::scheduler::WorkScheduler)
/// implementation; the task graph only stores and passes them back. Valid for
/// the lifetime of one submission.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("task#{_0:#x}")]
#[repr(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Wrap a raw scheduler identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw scheduler identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Process-unique identity of a [`TaskGraph`](crate::graph::TaskGraph).
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("graph#{_0}")]
pub struct GraphId(u32);

impl GraphId {
    pub(crate) fn next() -> Self {
        // Plain atomic on purpose: loom does not support statics.
        static NEXT: AtomicU32 = AtomicU32::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Untyped reference to a node of one task graph.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("{graph}/node#{index}")]
pub struct NodeId {
    pub(crate) graph: GraphId,
    pub(crate) index: u32,
}

impl NodeId {
    /// The graph this node belongs to.
    #[must_use]
    pub fn graph(self) -> GraphId {
        self.graph
    }

    /// Position of the node in its graph's node sequence.
    #[must_use]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// Typed reference to a node of type `T` stored in a task graph.
///
/// Handles are the only way to declare a dependency, so a node can only depend
/// on nodes that already exist; that keeps every graph acyclic.
#[derive(Debug)]
#[debug("{id}")]
pub struct Handle<T> {
    id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(id: NodeId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Erase the node type.
    #[must_use]
    pub fn id(self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> From<Handle<T>> for NodeId {
    fn from(handle: Handle<T>) -> Self {
        handle.id
    }
}

/// The closed set of node shapes a graph can hold.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Caller-defined [`Task`](crate::task::Task) type.
    #[display("plain")]
    Plain,
    /// [`FnTask`](crate::task::FnTask): captured closure plus explicit
    /// dependency list.
    #[display("function")]
    Function,
    /// [`SliceTask`](crate::task::SliceTask): one chunk of a bulk range.
    #[display("slice")]
    Slice,
}
