// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>
//! # Design: Dependency-Ordered Frame Jobs on a Worker Pool
//!
//! ## Overview
//! A fixed set of named jobs runs once per frame, each job only after all of
//! its dependencies finished in the same frame.
//!
//! - Jobs and dependency edges are registered up front, then the graph is
//!   compiled into dense ids and a table of remaining-dependency counters.
//! - `run_iteration` hands the root job to the pool and returns.
//! - When a job finishes, its worker decrements the counter of every
//!   dependent under one lock; a counter that reaches zero is re-armed to the
//!   job's in-degree and the job is queued.
//! - A failing job holds back only its own dependents. Once no job of the
//!   iteration is in flight, the iteration signal the driver waits on is
//!   resolved with `Completed` or the first failure.
//!
//! ## Worker Pool
//! - Workers pop `Run`/`Terminate` commands from one blocking FIFO.
//! - Worker handles are kept, so shutting the pool down joins every thread.
//!
//! ```text
//!         +--------------------------------------+
//!         |   driver: run_iteration() per frame  |
//!         +------------------+-------------------+
//!                            | root
//!                            v
//!         +------------------+-------------------+
//!         |      command queue (BlockingQueue)   |<----+
//!         +----+-------------+-------------+-----+     |
//!              |             |             |           | ready
//!         +----v----+   +----v----+   +----v----+      | dependents
//!         | worker  |   | worker  |   | worker  |------+
//!         +---------+   +---------+   +---------+
//!                            |
//!                            v  last job of the iteration
//!                    IterationSignal::wait()
//! ```

use std::any::Any;

pub mod blocking_queue;
pub mod closure_job;
pub mod iteration;
pub mod job;
pub mod job_graph;
pub mod thread_pool;

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
