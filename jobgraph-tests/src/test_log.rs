// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use serde::{Deserialize, Serialize};

use crate::recorder::{Execution, ExecutionRecorder};

/// Routes `log` output of the library through the test harness.
pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoggedJob {
    pub job: String,

    pub thread: String,

    pub start_seq: u64,

    pub end_seq: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoggedFrame {
    pub frame: u64,

    pub completed: bool,

    pub failed_job: Option<String>,

    pub jobs: Vec<LoggedJob>,
}

/// What the `frame-trace` binary prints on stdout.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct TestLog {
    pub workers: usize,
    pub frames: Vec<LoggedFrame>,
}

impl From<Execution> for LoggedJob {
    fn from(e: Execution) -> Self {
        Self {
            job: e.job,
            thread: e.thread,
            start_seq: e.start_seq,
            end_seq: e.end_seq,
        }
    }
}

impl LoggedFrame {
    pub fn from_recorder(
        recorder: &ExecutionRecorder,
        frame: u64,
        failed_job: Option<String>,
    ) -> Self {
        Self {
            frame,
            completed: failed_job.is_none(),
            failed_job,
            jobs: recorder
                .for_frame(frame)
                .into_iter()
                .map(LoggedJob::from)
                .collect(),
        }
    }

    pub fn job(&self, name: &str) -> Option<&LoggedJob> {
        self.jobs.iter().find(|j| j.job == name)
    }

    /// True if `dependency` returned before `dependent` started.
    pub fn ordered(&self, dependency: &str, dependent: &str) -> bool {
        match (self.job(dependency), self.job(dependent)) {
            (Some(before), Some(after)) => before.end_seq < after.start_seq,
            _ => false,
        }
    }
}
