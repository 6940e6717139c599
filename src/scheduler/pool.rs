use crate::{config::PoolConfig, scheduler::WorkScheduler};
use derive_more::Debug;
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};
use thiserror::Error;

/// Error returned by [`WorkerPool::start`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The OS refused to start a worker; the ones already running were shut
    /// down.
    #[error("failed to spawn worker thread #{index}")]
    Spawn {
        /// Position of the worker that failed to start.
        index: usize,
        /// Error reported by [`std::thread::Builder::spawn`].
        #[source]
        source: io::Error,
    },
}

/// Fixed set of threads calling [`WorkScheduler::do_work`] until shut down.
///
/// A worker sleeps for [`PoolConfig::idle_backoff`] whenever the scheduler
/// has nothing ready. A task panicking on a worker aborts the process: the
/// panicking node never reaches its completed state, so every graph waiting
/// on it would spin forever otherwise.
#[must_use]
#[derive(Debug)]
pub struct WorkerPool {
    config: PoolConfig,
    #[debug(skip)]
    quit: Arc<AtomicBool>,
    #[debug(skip)]
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.threads` workers draining `scheduler`.
    ///
    /// # Errors
    /// If a thread cannot be spawned. Workers started before the failure are
    /// stopped and joined.
    pub fn start<S: WorkScheduler + 'static>(
        scheduler: Arc<S>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        let mut pool = Self {
            quit: Arc::new(AtomicBool::new(false)),
            threads: Vec::with_capacity(config.threads),
            config,
        };
        for index in 0..pool.config.threads {
            let scheduler = Arc::clone(&scheduler);
            let quit = Arc::clone(&pool.quit);
            let backoff = pool.config.idle_backoff;
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", pool.config.thread_name))
                .spawn(move || {
                    let _guard = AbortOnPanic;
                    tracing::trace!(index, "worker started");
                    while !quit.load(Ordering::Acquire) {
                        if !scheduler.do_work() {
                            thread::sleep(backoff);
                        }
                    }
                    tracing::trace!(index, "worker stopped");
                })
                .map_err(|source| PoolError::Spawn { index, source })?;
            pool.threads.push(handle);
        }
        tracing::debug!(
            threads = pool.threads.len(),
            name = %pool.config.thread_name,
            "worker pool started"
        );
        Ok(pool)
    }

    /// The configuration the pool was started with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of running workers.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads.len()
    }

    /// Ask every worker to stop after its current job and join them all.
    /// Jobs still queued in the scheduler stay there.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.quit.store(true, Ordering::Release);
        for handle in self.threads.drain(..) {
            // Workers abort on panic, so a join error cannot carry one.
            let _ = handle.join();
        }
        tracing::debug!(name = %self.config.thread_name, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct AbortOnPanic;

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!(
                thread = thread::current().name().unwrap_or("<unnamed>"),
                "task panicked on a worker thread; aborting"
            );
            std::process::abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SchedulerConfig,
        graph::TaskGraph,
        scheduler::ReadyQueueScheduler,
    };
    use core::time::Duration;
    use pretty_assertions::assert_eq;

    #[test]
    fn workers_finish_a_graph_without_help() {
        let scheduler = Arc::new(ReadyQueueScheduler::new(SchedulerConfig::default()));
        let mut pool = WorkerPool::start(
            Arc::clone(&scheduler),
            PoolConfig::default().with_threads(3),
        )
        .unwrap();
        assert_eq!(pool.threads(), 3);

        let mut graph = TaskGraph::new();
        let a = graph.add_fn(&[], |_| 20_u64);
        let b = graph.add_fn(&[a.id()], move |deps| deps.get(a).output().unwrap() + 1);
        graph.submit(&*scheduler).unwrap();

        while !graph.is_complete() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(graph.get(b).output(), Some(&21));
        pool.shutdown();
        assert_eq!(pool.threads(), 0);
    }

    #[test]
    fn thread_names_carry_the_configured_prefix() {
        let scheduler = Arc::new(ReadyQueueScheduler::new(SchedulerConfig::default()));
        let _pool = WorkerPool::start(
            Arc::clone(&scheduler),
            PoolConfig::default()
                .with_threads(1)
                .with_thread_name("graph-test"),
        )
        .unwrap();

        let mut graph = TaskGraph::new();
        let name = graph.add_fn(&[], |_| thread::current().name().map(str::to_owned));
        graph.submit(&*scheduler).unwrap();
        while !graph.is_complete() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(
            graph.get(name).output(),
            Some(&Some("graph-test-0".to_owned()))
        );
    }

    #[test]
    fn shutdown_is_idempotent() {
        let scheduler = Arc::new(ReadyQueueScheduler::new(SchedulerConfig::default()));
        let mut pool = WorkerPool::start(scheduler, PoolConfig::default().with_threads(2)).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert_eq!(pool.threads(), 0);
    }
}
