// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use anyhow::Context;
use log::{debug, error, info};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::job_engine::blocking_queue::BlockingQueue;
use crate::job_engine::panic_message;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// What a worker pops from the shared command queue.
pub enum Command {
    Run(Task),
    Terminate,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Run(_) => f.write_str("Run(..)"),
            Command::Terminate => f.write_str("Terminate"),
        }
    }
}

/// Growable set of worker threads fed from one FIFO command queue.
///
/// Workers are joinable: `shutdown` (and `Drop`) enqueue one `Terminate`
/// per logical worker and join every thread, so after it returns no
/// command is running anymore.
#[derive(Debug)]
pub struct ThreadPool {
    commands: Arc<BlockingQueue<Command>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    // logical size: decremented as soon as a Terminate is enqueued
    size: AtomicUsize,
    // threads that have not yet returned from their loop
    live: Arc<AtomicUsize>,
    spawned: AtomicUsize,
}

impl ThreadPool {
    pub fn new(workers: usize) -> anyhow::Result<Self> {
        let pool = Self {
            commands: Arc::new(BlockingQueue::new()),
            handles: Mutex::new(Vec::with_capacity(workers)),
            size: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            spawned: AtomicUsize::new(0),
        };
        pool.add(workers)?;
        Ok(pool)
    }

    /// Spawns `n` additional workers.
    ///
    /// Fails if the OS refuses to create a thread. Workers started before the
    /// failure stay in the pool and are counted by `size`.
    pub fn add(&self, n: usize) -> anyhow::Result<()> {
        info!("ThreadPool adding {n} workers");
        let mut handles = self.handles.lock().expect("thread pool poisoned");
        for started in 0..n {
            let index = self.spawned.fetch_add(1, Ordering::Relaxed);
            let commands = self.commands.clone();
            let live = self.live.clone();
            live.fetch_add(1, Ordering::SeqCst);
            let spawn_result = thread::Builder::new()
                .name(format!("jobgraph-worker-{index}"))
                .spawn(move || {
                    worker_loop(&commands);
                    live.fetch_sub(1, Ordering::SeqCst);
                });
            let handle = match spawn_result {
                Ok(handle) => handle,
                Err(e) => {
                    self.live.fetch_sub(1, Ordering::SeqCst);
                    return Err(e).with_context(|| {
                        format!("failed to spawn worker thread ({started} of {n} started)")
                    });
                }
            };
            handles.push(handle);
            self.size.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Queues `task` for the next free worker.
    pub fn run<F>(&self, task: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.commands.push(Command::Run(Box::new(task)));
        self
    }

    /// Queues `n` terminate commands. Workers busy with earlier commands
    /// finish those first.
    pub fn kill(&self, n: usize) -> &Self {
        let previous = self
            .size
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |size| size.checked_sub(n))
            .unwrap_or_else(|size| {
                panic!("cannot kill {n} workers, the pool only has {size}")
            });
        info!("ThreadPool killing {n} of {previous} workers");
        for _ in 0..n {
            self.commands.push(Command::Terminate);
        }
        self
    }

    pub fn kill_all(&self) -> &Self {
        self.kill(self.size())
    }

    /// Logical number of workers. Threads that have not yet consumed their
    /// terminate command are not included.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Number of worker threads that are still inside their loop.
    pub fn live_threads(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    /// Joins every worker thread. All workers must have been killed first,
    /// otherwise this would wait forever. Commands still queued afterwards
    /// are dropped without running.
    pub fn join(&self) {
        assert_eq!(
            self.size(),
            0,
            "join() requires every worker to have been killed"
        );
        let handles: Vec<JoinHandle<()>> = self
            .handles
            .lock()
            .expect("thread pool poisoned")
            .drain(..)
            .collect();
        let current = thread::current().id();
        let mut joined_all = true;
        for handle in handles {
            if handle.thread().id() == current {
                // dropped from inside one of our own jobs; this thread exits
                // on its own once the job returns
                joined_all = false;
                continue;
            }
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!("{name} terminated abnormally");
            }
        }
        debug!("ThreadPool joined all workers");

        // commands queued behind the last terminate are never run; dropping
        // them releases whatever their closures captured
        if joined_all {
            let mut discarded = 0;
            while self.commands.try_pop().is_some() {
                discarded += 1;
            }
            if discarded > 0 {
                debug!("ThreadPool discarded {discarded} commands nobody will run");
            }
        }
    }

    /// Kills every remaining worker and waits for all threads to exit.
    pub fn shutdown(&self) {
        if self.size() > 0 {
            self.kill_all();
        }
        self.join();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(commands: &BlockingQueue<Command>) {
    loop {
        match commands.pop() {
            Command::Terminate => break,
            Command::Run(task) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                    error!(
                        "task panicked on {}: {}",
                        thread::current().name().unwrap_or("worker"),
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
    }
    debug!(
        "{} terminated",
        thread::current().name().unwrap_or("worker")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_all_submitted_tasks() {
        let pool = ThreadPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..200 {
            let c = counter.clone();
            pool.run(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 200);
        assert_eq!(pool.live_threads(), 0);
    }

    #[test]
    fn single_worker_runs_fifo() {
        let pool = ThreadPool::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let o = order.clone();
            pool.run(move || o.lock().unwrap().push(i));
        }
        pool.shutdown();
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn add_and_kill_adjust_size() {
        let pool = ThreadPool::new(2).unwrap();
        assert_eq!(pool.size(), 2);
        pool.add(3).unwrap();
        assert_eq!(pool.size(), 5);
        pool.kill(4);
        assert_eq!(pool.size(), 1);
        pool.kill_all();
        assert_eq!(pool.size(), 0);
        pool.join();
        assert_eq!(pool.live_threads(), 0);
    }

    #[test]
    #[should_panic(expected = "cannot kill 3 workers")]
    fn killing_more_than_size_panics() {
        let pool = ThreadPool::new(2).unwrap();
        pool.kill(3);
    }

    #[test]
    fn no_run_after_own_terminate() {
        let pool = ThreadPool::new(3).unwrap();
        // per worker: the id of the command and whether it came after terminate
        let seen: Arc<Mutex<HashMap<String, Vec<usize>>>> = Arc::new(Mutex::new(HashMap::new()));
        for i in 0..30 {
            let s = seen.clone();
            pool.run(move || {
                let name = thread::current().name().unwrap().to_string();
                s.lock().unwrap().entry(name).or_default().push(i);
            });
        }
        pool.kill_all();
        for i in 30..40 {
            let s = seen.clone();
            pool.run(move || {
                let name = thread::current().name().unwrap().to_string();
                s.lock().unwrap().entry(name).or_default().push(i);
            });
        }
        pool.join();
        assert_eq!(pool.live_threads(), 0);
        let seen = seen.lock().unwrap();
        let ran: usize = seen.values().map(|v| v.len()).sum();
        assert_eq!(ran, 30);
        assert!(seen.values().flatten().all(|&i| i < 30));
        // the commands left behind were discarded, not run
        assert_eq!(pool.pending_commands(), 0);
    }

    #[test]
    fn join_releases_commands_queued_after_terminate() {
        let pool = ThreadPool::new(1).unwrap();
        let (release, gate) = mpsc::channel::<()>();
        pool.run(move || {
            let _ = gate.recv();
        });
        pool.kill_all();

        let captured = Arc::new(());
        let weak = Arc::downgrade(&captured);
        pool.run(move || drop(captured));
        assert!(weak.upgrade().is_some());

        release.send(()).unwrap();
        pool.join();
        assert!(weak.upgrade().is_none());
        assert_eq!(pool.pending_commands(), 0);
    }

    #[test]
    fn worker_survives_panicking_task() {
        let pool = ThreadPool::new(1).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.run(|| panic!("intentional test panic"));
        pool.run(move || tx.send(42).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(42));
        assert_eq!(pool.live_threads(), 1);
    }

    #[test]
    fn drop_joins_workers() {
        let live;
        {
            let pool = ThreadPool::new(3).unwrap();
            live = pool.live.clone();
            pool.run(|| thread::sleep(Duration::from_millis(20)));
        }
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
