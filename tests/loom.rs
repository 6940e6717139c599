#![allow(missing_docs)]
#![cfg(feature = "loom")]

use loom::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};
use task_graph::{ReadyQueueScheduler, TaskGraph, WorkScheduler, config::SchedulerConfig};

#[derive(Clone)]
struct Counts(Arc<Vec<AtomicUsize>>);

impl Counts {
    fn new(len: usize) -> Self {
        Self(Arc::new((0..len).map(|_| AtomicUsize::new(0)).collect()))
    }

    fn hit(&self, index: usize) {
        self.0[index].fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self, index: usize) -> usize {
        self.0[index].load(Ordering::Relaxed)
    }
}

fn scheduler() -> Arc<ReadyQueueScheduler> {
    Arc::new(ReadyQueueScheduler::new(SchedulerConfig::default()))
}

#[test]
fn loom_two_parents_one_child() {
    loom::model(|| {
        // Graph:
        //   A(1)   B(10)
        //     \    /
        //      C(+100)
        // Expectation: C = 1 + 10 + 100 = 111.
        let counts = Counts::new(3);
        let scheduler = scheduler();
        let mut graph = TaskGraph::new();
        let a = {
            let counts = counts.clone();
            graph.add_fn(&[], move |_| {
                counts.hit(0);
                1_u32
            })
        };
        let b = {
            let counts = counts.clone();
            graph.add_fn(&[], move |_| {
                counts.hit(1);
                10_u32
            })
        };
        let c = {
            let counts = counts.clone();
            graph.add_fn(&[a.id(), b.id()], move |deps| {
                counts.hit(2);
                deps.get(a).output().unwrap() + deps.get(b).output().unwrap() + 100
            })
        };
        graph.submit(&*scheduler).unwrap();

        let worker = {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                for _ in 0..2 {
                    scheduler.do_work();
                }
            })
        };
        graph.wait(&*scheduler);
        worker.join().unwrap();

        assert_eq!(graph.get(c).output(), Some(&111));
        assert_eq!(graph.fence_count(), 1);
        for index in 0..3 {
            assert_eq!(counts.get(index), 1);
        }
    });
}

#[test]
fn loom_chain_publishes_writes_across_threads() {
    loom::model(|| {
        // Graph: A -> B, with A and B free to run on different threads.
        // B must observe A's output.
        let scheduler = scheduler();
        let mut graph = TaskGraph::new();
        let a = graph.add_fn(&[], |_| vec![1_u8, 2, 3]);
        let b = graph.add_fn(&[a.id()], move |deps| deps.get(a).output().map_or(0, Vec::len));
        graph.submit(&*scheduler).unwrap();

        let worker = {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                scheduler.do_work();
            })
        };
        graph.wait(&*scheduler);
        worker.join().unwrap();

        assert_eq!(graph.get(b).output(), Some(&3));
        assert!(graph.is_complete());
    });
}
