// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A job body panicked. Its dependents were not released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub job: String,
    pub message: String,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job '{}' failed: {}", self.job, self.message)
    }
}

impl std::error::Error for JobFailure {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed,
    Failed(JobFailure),
}

impl IterationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, IterationOutcome::Completed)
    }

    /// Converts into a `Result`, for drivers that bubble failures up with `?`.
    pub fn into_result(self) -> Result<(), JobFailure> {
        match self {
            IterationOutcome::Completed => Ok(()),
            IterationOutcome::Failed(failure) => Err(failure),
        }
    }
}

#[derive(Debug)]
struct SignalState {
    epoch: u64,
    outcome: Option<IterationOutcome>,
}

/// The channel through which a driver learns that an iteration is over.
///
/// Every `run_iteration` opens a new epoch. The scheduler resolves it once
/// none of the iteration's jobs is in flight, with the first job failure if
/// there was one, so a failure anywhere in the iteration reaches the driver.
///
/// The first resolution of an epoch wins. A job body that calls
/// [`complete`](Self::complete) resolves the epoch early; failures of that
/// iteration after that point are only logged, and jobs of it may still be
/// running when the driver wakes up. Resolutions aimed at an older epoch are
/// ignored.
#[derive(Debug)]
pub struct IterationSignal {
    state: Mutex<SignalState>,
    resolved: Condvar,
}

impl IterationSignal {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SignalState {
                epoch: 0,
                outcome: None,
            }),
            resolved: Condvar::new(),
        }
    }

    pub(crate) fn begin(&self, epoch: u64) {
        let mut state = self.state.lock().expect("iteration signal poisoned");
        state.epoch = epoch;
        state.outcome = None;
    }

    /// Returns false if `epoch` is stale or already resolved.
    pub(crate) fn resolve(&self, epoch: u64, outcome: IterationOutcome) -> bool {
        let mut state = self.state.lock().expect("iteration signal poisoned");
        if state.epoch != epoch || state.outcome.is_some() {
            return false;
        }
        state.outcome = Some(outcome);
        drop(state);
        self.resolved.notify_all();
        true
    }

    /// Marks the current iteration as completed.
    ///
    /// Meant for job bodies that end the frame themselves instead of waiting
    /// for the rest of the iteration to drain.
    pub fn complete(&self) -> bool {
        let epoch = self.epoch();
        self.resolve(epoch, IterationOutcome::Completed)
    }

    /// Epoch of the most recently started iteration; 0 before the first.
    pub fn epoch(&self) -> u64 {
        self.state.lock().expect("iteration signal poisoned").epoch
    }

    pub fn outcome(&self) -> Option<IterationOutcome> {
        self.state
            .lock()
            .expect("iteration signal poisoned")
            .outcome
            .clone()
    }

    /// Blocks until the current iteration is resolved.
    pub fn wait(&self) -> IterationOutcome {
        let mut state = self.state.lock().expect("iteration signal poisoned");
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            state = self
                .resolved
                .wait(state)
                .expect("iteration signal poisoned");
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<IterationOutcome> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("iteration signal poisoned");
        loop {
            if let Some(outcome) = &state.outcome {
                return Some(outcome.clone());
            }
            let left = deadline.checked_duration_since(Instant::now())?;
            state = self
                .resolved
                .wait_timeout(state, left)
                .expect("iteration signal poisoned")
                .0;
        }
    }
}
