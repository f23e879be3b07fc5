// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use jobgraph::job_engine::job::JobHandle;
use jobgraph::job_engine::job_graph::JobGraph;

/// One run of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub frame: u64,
    pub job: String,
    pub thread: String,
    /// position in the recorder's global sequence when the job started
    pub start_seq: u64,
    pub end_seq: u64,
}

/// Collects job executions from all workers.
///
/// Start and end are stamped from one shared sequence, so
/// `a.end_seq < b.start_seq` means `b` started after `a` returned.
#[derive(Debug, Default)]
pub struct ExecutionRecorder {
    sequence: AtomicU64,
    frame: AtomicU64,
    executions: Mutex<Vec<Execution>>,
}

impl ExecutionRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Frame number attached to executions recorded from now on.
    pub fn begin_frame(&self, frame: u64) {
        self.frame.store(frame, Ordering::SeqCst);
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::SeqCst)
    }

    pub fn record<R>(&self, job: &str, body: impl FnOnce() -> R) -> R {
        let frame = self.frame.load(Ordering::SeqCst);
        let start_seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let result = body();
        let end_seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let thread = thread::current().name().unwrap_or("unnamed").to_string();
        self.executions.lock().unwrap().push(Execution {
            frame,
            job: job.to_string(),
            thread,
            start_seq,
            end_seq,
        });
        result
    }

    pub fn executions(&self) -> Vec<Execution> {
        let mut executions = self.executions.lock().unwrap().clone();
        executions.sort_by_key(|e| e.start_seq);
        executions
    }

    pub fn for_frame(&self, frame: u64) -> Vec<Execution> {
        self.executions()
            .into_iter()
            .filter(|e| e.frame == frame)
            .collect()
    }

    pub fn count(&self, job: &str) -> usize {
        self.executions
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.job == job)
            .count()
    }

    pub fn clear(&self) {
        self.executions.lock().unwrap().clear();
    }

    /// Asserts that in `frame`, `dependency` returned before `dependent`
    /// started. Both must have run exactly once in that frame.
    pub fn assert_ordered(&self, frame: u64, dependency: &str, dependent: &str) {
        let executions = self.for_frame(frame);
        let find = |job: &str| {
            let mut runs = executions.iter().filter(|e| e.job == job);
            let run = runs
                .next()
                .unwrap_or_else(|| panic!("'{job}' did not run in frame {frame}"));
            assert!(
                runs.next().is_none(),
                "'{job}' ran more than once in frame {frame}"
            );
            run
        };
        let before = find(dependency);
        let after = find(dependent);
        assert!(
            before.end_seq < after.start_seq,
            "frame {frame}: '{dependent}' started before '{dependency}' finished ({before:?} / {after:?})"
        );
    }
}

/// Registers a job that only records its own execution.
pub fn register_recorded(
    graph: &mut JobGraph,
    recorder: &Arc<ExecutionRecorder>,
    name: &str,
) -> JobHandle {
    graph.register_job(
        name,
        |(recorder, name): &(Arc<ExecutionRecorder>, String)| recorder.record(name, || ()),
        (recorder.clone(), name.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_orders_nested_records() {
        let recorder = ExecutionRecorder::new();
        recorder.begin_frame(7);
        recorder.record("outer", || recorder.record("inner", || ()));
        let executions = recorder.executions();
        assert_eq!(executions[0].job, "outer");
        assert_eq!(executions[1].job, "inner");
        assert!(executions[1].end_seq < executions[0].end_seq);
        assert!(executions.iter().all(|e| e.frame == 7));
    }

    #[test]
    #[should_panic(expected = "started before")]
    fn overlapping_runs_are_not_ordered() {
        let recorder = ExecutionRecorder::new();
        recorder.record("a", || recorder.record("b", || ()));
        recorder.assert_ordered(0, "a", "b");
    }
}
