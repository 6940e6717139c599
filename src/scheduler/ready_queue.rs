use crate::{
    config::SchedulerConfig,
    graph::{Job, JobBatch},
    scheduler::{SchedulerError, WorkScheduler},
    sync::{Mutex, MutexGuard, yield_now},
    types::TaskId,
};
use derive_more::Debug;

/// Capacity-bounded [`WorkScheduler`] with a single FIFO ready queue.
///
/// Bookkeeping (slots, pending counts, dependents) lives behind one mutex.
/// Released jobs move into a separate ready queue that `do_work` pops without
/// taking that mutex, and jobs run outside of it. Task IDs pack a slot index
/// with the slot's generation, so IDs of completed tasks never alias newer
/// ones. A dependency on an ID that is no longer live counts as already
/// satisfied.
#[derive(Debug)]
pub struct ReadyQueueScheduler {
    config: SchedulerConfig,
    #[debug(skip)]
    state: Mutex<State>,
    #[debug(skip)]
    ready: ReadyQueue,
}

#[derive(Default)]
struct State {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live_tasks: usize,
    live_edges: usize,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

struct Entry {
    /// `None` once released: the job sits in the ready queue or is running.
    job: Option<Job>,
    /// Dependencies that have not completed yet.
    pending: u32,
    /// Slot indexes to notify on completion, one per edge.
    dependents: Vec<u32>,
    /// Dependencies that were live when wired, one per edge.
    dependencies: Vec<TaskId>,
}

fn encode(index: u32, generation: u32) -> TaskId {
    TaskId::new((u64::from(generation) << 32) | u64::from(index))
}

fn decode(id: TaskId) -> (u32, u32) {
    let raw = id.get();
    ((raw & u64::from(u32::MAX)) as u32, (raw >> 32) as u32)
}

impl State {
    fn entry_mut(&mut self, id: TaskId) -> Result<&mut Entry, SchedulerError> {
        let (index, generation) = decode(id);
        self.slots
            .get_mut(index as usize)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(SchedulerError::UnknownTask(id))
    }

    /// Empty the slot of a completed or cancelled task.
    fn retire(&mut self, index: u32) -> Entry {
        let slot = &mut self.slots[index as usize];
        let entry = slot.entry.take().expect("State::retire: [1]");
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.live_tasks -= 1;
        entry
    }
}

/// Released jobs tagged with their slot index.
#[cfg(not(feature = "loom"))]
struct ReadyQueue(crossbeam_deque::Injector<(u32, Job)>);

#[cfg(not(feature = "loom"))]
impl ReadyQueue {
    fn new() -> Self {
        Self(crossbeam_deque::Injector::new())
    }

    fn push(&self, index: u32, job: Job) {
        self.0.push((index, job));
    }

    fn pop(&self) -> Option<(u32, Job)> {
        use crossbeam_deque::Steal;
        loop {
            match self.0.steal() {
                Steal::Success(ready) => return Some(ready),
                Steal::Empty => return None,
                Steal::Retry => {}
            }
        }
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

#[cfg(feature = "loom")]
struct ReadyQueue(Mutex<std::collections::VecDeque<(u32, Job)>>);

#[cfg(feature = "loom")]
impl ReadyQueue {
    fn new() -> Self {
        Self(Mutex::new(std::collections::VecDeque::new()))
    }

    fn push(&self, index: u32, job: Job) {
        self.0
            .lock()
            .expect("ReadyQueue::push: [1]")
            .push_back((index, job));
    }

    fn pop(&self) -> Option<(u32, Job)> {
        self.0.lock().expect("ReadyQueue::pop: [1]").pop_front()
    }

    fn len(&self) -> usize {
        self.0.lock().expect("ReadyQueue::len: [1]").len()
    }
}

impl ReadyQueueScheduler {
    /// Empty scheduler enforcing the limits of `config`.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        let state = State {
            slots: Vec::with_capacity(config.max_tasks),
            ..State::default()
        };
        Self {
            config,
            state: Mutex::new(state),
            ready: ReadyQueue::new(),
        }
    }

    /// The limits this scheduler was created with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Registered tasks that have not completed.
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.lock().live_tasks
    }

    /// Dependency edges whose dependency has not completed.
    #[must_use]
    pub fn live_dependencies(&self) -> usize {
        self.lock().live_edges
    }

    /// Tasks waiting in the ready queue.
    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    #[cfg(not(feature = "loom"))]
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    #[cfg(feature = "loom")]
    fn lock(&self) -> MutexGuard<'_, State> {
        // Jobs never run under the lock, so only a bug in this file can poison it.
        self.state.lock().expect("ReadyQueueScheduler::lock: [1]")
    }

    fn complete(&self, index: u32) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let entry = state.retire(index);

        for dependent in entry.dependents {
            state.live_edges -= 1;
            let dependent_entry = state.slots[dependent as usize]
                .entry
                .as_mut()
                .expect("ReadyQueueScheduler::complete: [1]");
            dependent_entry.pending -= 1;
            if dependent_entry.pending == 0 {
                if let Some(job) = dependent_entry.job.take() {
                    self.ready.push(dependent, job);
                }
            }
        }
    }
}

impl WorkScheduler for ReadyQueueScheduler {
    fn add_tasks(&self, jobs: JobBatch, ids: &mut [TaskId]) -> Result<(), SchedulerError> {
        let requested = jobs.len();
        assert_eq!(
            requested,
            ids.len(),
            "ReadyQueueScheduler::add_tasks: one ID slot per job"
        );
        let mut guard = self.lock();
        let state = &mut *guard;
        let available = self.config.max_tasks.saturating_sub(state.live_tasks);
        if requested > available {
            return Err(SchedulerError::TaskCapacity {
                requested,
                available,
            });
        }

        for (job, id) in jobs.zip(ids.iter_mut()) {
            let index = match state.free.pop() {
                Some(index) => index,
                None => {
                    let index = u32::try_from(state.slots.len())
                        .expect("ReadyQueueScheduler::add_tasks: [1]");
                    state.slots.push(Slot {
                        generation: 0,
                        entry: None,
                    });
                    index
                }
            };
            let slot = &mut state.slots[index as usize];
            slot.entry = Some(Entry {
                job: Some(job),
                pending: 0,
                dependents: vec![],
                dependencies: vec![],
            });
            *id = encode(index, slot.generation);
        }
        state.live_tasks += requested;
        Ok(())
    }

    fn add_dependencies(&self, task: TaskId, dependencies: &[TaskId]) -> Result<(), SchedulerError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let available = self
            .config
            .max_dependencies
            .saturating_sub(state.live_edges);
        if dependencies.len() > available {
            return Err(SchedulerError::DependencyCapacity {
                requested: dependencies.len(),
                available,
            });
        }
        if state.entry_mut(task)?.job.is_none() {
            return Err(SchedulerError::AlreadyReleased(task));
        }

        let (task_index, _) = decode(task);
        let mut live = Vec::with_capacity(dependencies.len());
        for &dependency in dependencies {
            let Ok(dependency_entry) = state.entry_mut(dependency) else {
                // Completed already.
                continue;
            };
            dependency_entry.dependents.push(task_index);
            live.push(dependency);
        }
        state.live_edges += live.len();
        let entry = state.entry_mut(task)?;
        entry.pending += live.len() as u32;
        entry.dependencies.extend(live);
        Ok(())
    }

    fn ready_tasks(&self, tasks: &[TaskId]) -> Result<(), SchedulerError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        for &task in tasks {
            let entry = state.entry_mut(task)?;
            if entry.pending != 0 {
                return Err(SchedulerError::NotReady(task));
            }
            if entry.job.is_none() {
                return Err(SchedulerError::AlreadyReleased(task));
            }
        }
        for &task in tasks {
            // The same ID listed twice is released once.
            if let Some(job) = state.entry_mut(task)?.job.take() {
                let (index, _) = decode(task);
                self.ready.push(index, job);
            }
        }
        Ok(())
    }

    fn cancel_tasks(&self, tasks: &[TaskId]) {
        let mut dropped = Vec::with_capacity(tasks.len());
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            for &task in tasks {
                let Ok(entry) = state.entry_mut(task) else {
                    continue;
                };
                if entry.job.is_none() {
                    continue;
                }
                let (index, _) = decode(task);
                let entry = state.retire(index);

                // Edges towards dependencies that are still live.
                for &dependency in &entry.dependencies {
                    let Ok(dependency_entry) = state.entry_mut(dependency) else {
                        continue;
                    };
                    let position = dependency_entry
                        .dependents
                        .iter()
                        .position(|&dependent| dependent == index)
                        .expect("ReadyQueueScheduler::cancel_tasks: [1]");
                    dependency_entry.dependents.swap_remove(position);
                    state.live_edges -= 1;
                }
                // Edges from dependents that are not cancelled (yet).
                for &dependent in &entry.dependents {
                    let dependent_entry = state.slots[dependent as usize]
                        .entry
                        .as_mut()
                        .expect("ReadyQueueScheduler::cancel_tasks: [2]");
                    dependent_entry.pending -= 1;
                    let position = dependent_entry
                        .dependencies
                        .iter()
                        .position(|&dependency| dependency == task)
                        .expect("ReadyQueueScheduler::cancel_tasks: [3]");
                    dependent_entry.dependencies.swap_remove(position);
                    state.live_edges -= 1;
                }
                dropped.extend(entry.job);
            }
        }
        tracing::debug!(cancelled = dropped.len(), "scheduler tasks cancelled");
        // Outside the lock: dropping a job may drop caller tasks.
        drop(dropped);
    }

    fn do_work(&self) -> bool {
        let Some((index, job)) = self.ready.pop() else {
            return false;
        };
        job.run();
        self.complete(index);
        true
    }

    fn yield_now(&self) {
        yield_now();
    }
}
