use crate::{
    arena::{ScratchVec, StackArena},
    config::SUBMIT_ARENA_BYTES,
    graph::{JobBatch, Phase, TaskGraph},
    scheduler::{SchedulerError, WorkScheduler},
    types::TaskId,
};
use std::sync::Arc;
use thiserror::Error;

/// Error returned by [`TaskGraph::submit`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubmitError {
    /// The graph was submitted before. Its fence already fired (or will), so
    /// it cannot signal a second run.
    #[error("task graph was already submitted")]
    AlreadySubmitted,
    /// The scheduler refused part of the graph, typically because its
    /// capacity would be exceeded. The graph is unusable afterwards.
    #[error("scheduler rejected the task graph: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl TaskGraph {
    /// Register every node and the fence with `scheduler`, wire the dependency
    /// edges and release the roots.
    ///
    /// Nodes may start running on other threads before this returns. All
    /// bookkeeping lives in a stack arena, so graphs of moderate size are
    /// wired without heap allocation.
    ///
    /// # Errors
    /// [`SubmitError::AlreadySubmitted`] on a second call;
    /// [`SubmitError::Scheduler`] if the scheduler refuses a registration. The
    /// tasks registered so far are cancelled through
    /// [`WorkScheduler::cancel_tasks`]; the graph can neither complete nor be
    /// resubmitted.
    ///
    /// # Panics
    /// If a node refers to a dependency that does not precede it in this
    /// graph. Impossible unless there are bugs in the code.
    pub fn submit<S: WorkScheduler + ?Sized>(&mut self, scheduler: &S) -> Result<(), SubmitError> {
        if self.phase != Phase::Building {
            return Err(SubmitError::AlreadySubmitted);
        }
        // A failed submission is final.
        self.phase = Phase::Poisoned;
        if let Err(err) = self.wire(scheduler) {
            tracing::debug!(graph = %self.id(), %err, "task graph submission failed");
            return Err(err.into());
        }
        self.phase = Phase::Submitted;
        Ok(())
    }

    fn wire<S: WorkScheduler + ?Sized>(&self, scheduler: &S) -> Result<(), SchedulerError> {
        // Example:
        //
        //   A     B
        //    \   / \
        //      C    D
        //       \  /
        //        E      F
        //
        // - Roots: A, B, F (no dependencies) => released at the end.
        // - C, D, E get one `add_dependencies` call each.
        // - has_dependents = {A, B, C, D}; leaves = {E, F}.
        // - The fence depends on E and F only, which transitively covers everything.
        let store = &self.store;
        let nodes = &store.nodes;
        let arena = StackArena::<SUBMIT_ARENA_BYTES>::new();

        // Phase 1: Batch-register all nodes and then the fence. IDs come back in
        // the same order.
        let mut ids = ScratchVec::with_capacity_in(nodes.len() + 1, &arena);
        ids.resize(nodes.len() + 1, TaskId::default());
        scheduler.add_tasks(JobBatch::new(Arc::clone(store)), &mut ids)?;

        // Nothing is released before the last phase, so a failure can hand every
        // registration back.
        self.connect(scheduler, &ids, &arena).inspect_err(|_| {
            scheduler.cancel_tasks(&ids);
        })
    }

    fn connect<S: WorkScheduler + ?Sized>(
        &self,
        scheduler: &S,
        ids: &[TaskId],
        arena: &StackArena<SUBMIT_ARENA_BYTES>,
    ) -> Result<(), SchedulerError> {
        let store = &self.store;
        let nodes = &store.nodes;
        let (node_ids, fence_id) = ids.split_at(nodes.len());
        let fence_id = fence_id[0];

        // Phase 2: Classify roots and register one dependency set per dependent
        // node, remembering which nodes something depends on.
        let mut roots = ScratchVec::with_capacity_in(nodes.len() + 1, arena);
        let mut has_dependents = ScratchVec::with_capacity_in(nodes.len(), arena);
        has_dependents.resize(nodes.len(), false);
        let max_dependencies = nodes
            .iter()
            .map(|node| node.dependencies.len())
            .max()
            .unwrap_or(0);
        let mut dependency_ids = ScratchVec::with_capacity_in(max_dependencies, arena);

        for (index, node) in nodes.iter().enumerate() {
            if node.dependencies.is_empty() {
                roots.push(node_ids[index]);
                continue;
            }
            dependency_ids.clear();
            for &dependency in node.dependencies.iter() {
                let dependency = dependency as usize;
                assert!(
                    dependency < index,
                    "TaskGraph::submit: node#{index} of {} depends on node#{dependency}, which does not precede it",
                    store.id
                );
                dependency_ids.push(node_ids[dependency]);
                has_dependents[dependency] = true;
            }
            scheduler.add_dependencies(node_ids[index], &dependency_ids)?;
        }

        // Phase 3: Leaves are the nodes nothing depends on. The fence waits for
        // exactly those. An empty graph has no leaves, so its fence is a root.
        let mut leaves = ScratchVec::with_capacity_in(nodes.len(), arena);
        for (index, &has) in has_dependents.iter().enumerate() {
            if !has {
                leaves.push(node_ids[index]);
            }
        }
        if leaves.is_empty() {
            roots.push(fence_id);
        } else {
            scheduler.add_dependencies(fence_id, &leaves)?;
        }

        tracing::debug!(
            graph = %store.id,
            nodes = nodes.len(),
            roots = roots.len(),
            leaves = leaves.len(),
            arena_used = arena.used(),
            arena_spilled = arena.spilled(),
            "task graph wired"
        );

        // Phase 4: Release the roots. From here on nodes may run anywhere.
        scheduler.ready_tasks(&roots)?;
        Ok(())
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::{graph::Job, types::NodeId};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Hands out IDs equal to the job's position in the batch and records
    /// every call. Jobs run only when a test asks for them.
    #[derive(Default)]
    struct Recording {
        jobs: Mutex<Vec<Option<Job>>>,
        edges: Mutex<Vec<(u64, Vec<u64>)>>,
        released: Mutex<Vec<u64>>,
        cancelled: Mutex<Vec<u64>>,
        reject_dependencies: bool,
    }

    impl Recording {
        fn rejecting() -> Self {
            Self {
                reject_dependencies: true,
                ..Self::default()
            }
        }

        fn run(&self, raw: u64) {
            let job = self.jobs.lock().unwrap()[raw as usize].take().unwrap();
            job.run();
        }

        fn edges(&self) -> Vec<(u64, Vec<u64>)> {
            self.edges.lock().unwrap().clone()
        }

        fn released(&self) -> Vec<u64> {
            self.released.lock().unwrap().clone()
        }

        fn cancelled(&self) -> Vec<u64> {
            self.cancelled.lock().unwrap().clone()
        }
    }

    impl WorkScheduler for Recording {
        fn add_tasks(&self, jobs: JobBatch, ids: &mut [TaskId]) -> Result<(), SchedulerError> {
            let mut stored = self.jobs.lock().unwrap();
            for (job, id) in jobs.zip(ids.iter_mut()) {
                *id = TaskId::new(stored.len() as u64);
                stored.push(Some(job));
            }
            Ok(())
        }

        fn add_dependencies(&self, task: TaskId, dependencies: &[TaskId]) -> Result<(), SchedulerError> {
            if self.reject_dependencies {
                return Err(SchedulerError::DependencyCapacity {
                    requested: dependencies.len(),
                    available: 0,
                });
            }
            let dependencies = dependencies.iter().map(|id| id.get()).collect();
            self.edges.lock().unwrap().push((task.get(), dependencies));
            Ok(())
        }

        fn ready_tasks(&self, tasks: &[TaskId]) -> Result<(), SchedulerError> {
            self.released
                .lock()
                .unwrap()
                .extend(tasks.iter().map(|id| id.get()));
            Ok(())
        }

        fn cancel_tasks(&self, tasks: &[TaskId]) {
            let mut jobs = self.jobs.lock().unwrap();
            for task in tasks {
                jobs[task.get() as usize] = None;
            }
            self.cancelled
                .lock()
                .unwrap()
                .extend(tasks.iter().map(|id| id.get()));
        }

        fn do_work(&self) -> bool {
            false
        }

        fn yield_now(&self) {}
    }

    fn unit(graph: &mut TaskGraph, dependencies: &[NodeId]) -> NodeId {
        graph.add_fn(dependencies, |_| ()).id()
    }

    #[test]
    fn wires_dependencies_leaves_and_roots() {
        let mut graph = TaskGraph::new();
        let a = unit(&mut graph, &[]);
        let b = unit(&mut graph, &[]);
        let c = unit(&mut graph, &[a, b]);
        let d = unit(&mut graph, &[b]);
        let _e = unit(&mut graph, &[c, d]);
        let _f = unit(&mut graph, &[]);

        let scheduler = Recording::default();
        graph.submit(&scheduler).unwrap();

        assert_eq!(scheduler.jobs.lock().unwrap().len(), 7);
        assert_eq!(
            scheduler.edges(),
            vec![
                (2, vec![0, 1]),
                (3, vec![1]),
                (4, vec![2, 3]),
                // The fence waits for the leaves E and F only.
                (6, vec![4, 5]),
            ]
        );
        assert_eq!(scheduler.released(), vec![0, 1, 5]);
        assert!(scheduler.cancelled().is_empty());
    }

    #[test]
    fn empty_graph_releases_its_fence() {
        let mut graph = TaskGraph::new();
        let scheduler = Recording::default();
        graph.submit(&scheduler).unwrap();

        assert!(scheduler.edges().is_empty());
        assert_eq!(scheduler.released(), vec![0]);
        assert!(!graph.is_complete());
        scheduler.run(0);
        assert!(graph.is_complete());
        assert_eq!(graph.fence_count(), 1);
    }

    #[test]
    fn duplicate_dependencies_are_passed_through() {
        let mut graph = TaskGraph::new();
        let a = unit(&mut graph, &[]);
        unit(&mut graph, &[a, a]);

        let scheduler = Recording::default();
        graph.submit(&scheduler).unwrap();
        assert_eq!(scheduler.edges(), vec![(1, vec![0, 0]), (2, vec![1])]);
    }

    #[test]
    fn second_submission_is_rejected() {
        let mut graph = TaskGraph::new();
        unit(&mut graph, &[]);
        let scheduler = Recording::default();
        graph.submit(&scheduler).unwrap();

        assert_eq!(graph.submit(&scheduler), Err(SubmitError::AlreadySubmitted));
        assert_eq!(scheduler.jobs.lock().unwrap().len(), 2);
    }

    #[test]
    fn scheduler_errors_poison_the_graph() {
        let mut graph = TaskGraph::new();
        let a = unit(&mut graph, &[]);
        unit(&mut graph, &[a]);
        let scheduler = Recording::rejecting();

        assert_eq!(
            graph.submit(&scheduler),
            Err(SubmitError::Scheduler(SchedulerError::DependencyCapacity {
                requested: 1,
                available: 0
            }))
        );
        assert!(scheduler.released().is_empty());
        // Every registration, the fence included, is handed back.
        assert_eq!(scheduler.cancelled(), vec![0, 1, 2]);
        assert_eq!(graph.submit(&scheduler), Err(SubmitError::AlreadySubmitted));
    }

    #[test]
    #[should_panic(expected = "failed to submit")]
    fn waiting_on_a_poisoned_graph_panics() {
        let mut graph = TaskGraph::new();
        let a = unit(&mut graph, &[]);
        unit(&mut graph, &[a]);
        let scheduler = Recording::rejecting();
        let _ = graph.submit(&scheduler);
        graph.wait(&scheduler);
    }

    #[test]
    #[should_panic(expected = "was never submitted")]
    fn waiting_on_an_unsubmitted_graph_panics() {
        TaskGraph::new().wait(&Recording::default());
    }

    #[test]
    fn results_become_readable_as_nodes_complete() {
        let mut graph = TaskGraph::new();
        let a = graph.add_fn(&[], |_| 2_i64);
        let b = graph.add_fn(&[], |_| 3_i64);
        let c = graph.add_fn(&[a.id(), b.id()], move |deps| {
            deps.get(a).output().unwrap() * deps.get(b).output().unwrap()
        });
        let scheduler = Recording::default();
        graph.submit(&scheduler).unwrap();

        assert!(graph.try_get(a).is_none());
        scheduler.run(1);
        scheduler.run(0);
        assert_eq!(graph.get(a).output(), Some(&2));
        assert!(graph.try_get(c).is_none());
        scheduler.run(2);
        assert!(!graph.is_complete());
        scheduler.run(3);
        assert!(graph.is_complete());
        assert_eq!(graph.get(c).output(), Some(&6));
    }

    #[test]
    #[should_panic(expected = "was read before it completed")]
    fn out_of_order_execution_is_detected() {
        let mut graph = TaskGraph::new();
        let a = graph.add_fn(&[], |_| 1_u8);
        graph.add_fn(&[a.id()], move |deps| *deps.get(a).output().unwrap());
        let scheduler = Recording::default();
        graph.submit(&scheduler).unwrap();
        scheduler.run(1);
    }

    #[test]
    #[should_panic(expected = "has not executed yet")]
    fn get_before_execution_panics() {
        let mut graph = TaskGraph::new();
        let a = graph.add_fn(&[], |_| 1_u8);
        graph.submit(&Recording::default()).unwrap();
        let _ = graph.get(a);
    }
}
