use core::time::Duration;

/// Size in bytes of the inline scratch arena used by one
/// [`TaskGraph::submit`](crate::graph::TaskGraph::submit) call.
///
/// Graphs of up to roughly a hundred and fifty nodes are wired without touching
/// the heap; larger graphs spill transparently.
pub const SUBMIT_ARENA_BYTES: usize = 4096;

/// Capacity limits of a [`ReadyQueueScheduler`](crate::scheduler::ReadyQueueScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of registered tasks that have not completed yet.
    pub max_tasks: usize,
    /// Maximum number of unresolved dependency edges.
    pub max_dependencies: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_tasks: 1024,
            max_dependencies: 1024,
        }
    }
}

impl SchedulerConfig {
    /// Set [`max_tasks`](Self::max_tasks).
    #[must_use]
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    /// Set [`max_dependencies`](Self::max_dependencies).
    #[must_use]
    pub fn with_max_dependencies(mut self, max_dependencies: usize) -> Self {
        self.max_dependencies = max_dependencies;
        self
    }
}

/// Settings of a [`WorkerPool`](crate::scheduler::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads. The thread calling `wait` works too, so the
    /// default leaves one core for it.
    pub threads: usize,
    /// How long an idle worker sleeps before polling the scheduler again.
    pub idle_backoff: Duration,
    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, usize::from);
        Self {
            threads: cores.saturating_sub(1).max(1),
            idle_backoff: Duration::from_micros(100),
            thread_name: "task-graph-worker".to_owned(),
        }
    }
}

impl PoolConfig {
    /// Set [`threads`](Self::threads).
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set [`idle_backoff`](Self::idle_backoff).
    #[must_use]
    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    /// Set [`thread_name`](Self::thread_name).
    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}
