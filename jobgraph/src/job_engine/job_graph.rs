// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use anyhow::Context;
use log::{debug, error, trace, warn};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::job_engine::closure_job::ClosureJob;
use crate::job_engine::iteration::{IterationOutcome, IterationSignal, JobFailure};
use crate::job_engine::job::{Job, JobEntry, JobHandle, JobId, Topology};
use crate::job_engine::panic_message;
use crate::job_engine::thread_pool::ThreadPool;

pub const ROOT_JOB_NAME: &str = "__root";

const ROOT: usize = 0;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Remaining-dependency counters, indexed by job id, plus the state of the
/// current iteration.
#[derive(Debug)]
struct CounterTable {
    epoch: u64,
    /// first job failure of this iteration
    failure: Option<JobFailure>,
    /// jobs of this iteration that were submitted and have not finished
    /// their bookkeeping yet
    in_flight: usize,
    remaining: Vec<usize>,
    terminals_left: usize,
}

/// Everything a worker needs once the graph is compiled. Topology is
/// read-only from here on; only the counter table changes.
#[derive(Debug)]
struct Schedule {
    topology: Topology,
    /// job index -> job id
    ids: Vec<JobId>,
    /// job id -> in-degree
    in_degree: Vec<usize>,
    /// job index -> terminal?
    terminal: Vec<bool>,
    terminal_count: usize,
    counters: Mutex<CounterTable>,
    pool: Arc<ThreadPool>,
    signal: Arc<IterationSignal>,
}

#[derive(Debug)]
enum GraphState {
    Building(Topology),
    Compiled(Arc<Schedule>),
}

/// A fixed set of named jobs executed in dependency order, once per
/// `run_iteration`, on a shared [`ThreadPool`].
///
/// Jobs and dependencies are registered first, then `compile` freezes the
/// topology. Registration after `compile` is a programming error and
/// panics.
#[derive(Debug)]
pub struct JobGraph {
    id: u64,
    names: HashMap<String, usize>,
    terminals: Vec<usize>,
    state: GraphState,
    pool: Arc<ThreadPool>,
    signal: Arc<IterationSignal>,
}

impl JobGraph {
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        let mut topology = Topology::new();
        topology.jobs.push(Job::new(
            ROOT_JOB_NAME.to_string(),
            Box::new(ClosureJob::from_fn(ROOT_JOB_NAME, || {})),
        ));
        let mut names = HashMap::new();
        names.insert(ROOT_JOB_NAME.to_string(), ROOT);

        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            names,
            terminals: Vec::new(),
            state: GraphState::Building(topology),
            pool,
            signal: Arc::new(IterationSignal::new()),
        }
    }

    /// Creates a graph with its own pool of `workers` threads.
    pub fn with_workers(workers: usize) -> anyhow::Result<Self> {
        let pool = ThreadPool::new(workers).context("failed to create the job graph's pool")?;
        Ok(Self::new(Arc::new(pool)))
    }

    pub fn root(&self) -> JobHandle {
        self.handle(ROOT)
    }

    /// Registers a job whose body is `entry(&arg)`.
    pub fn register_job<A, F>(&mut self, name: impl Into<String>, entry: F, arg: A) -> JobHandle
    where
        A: Send + Sync + 'static,
        F: Fn(&A) + Send + Sync + 'static,
    {
        let name = name.into();
        let job = ClosureJob::new(name.clone(), entry, arg);
        self.register_entry(name, Box::new(job))
    }

    /// Registers a job whose body needs no bound argument.
    pub fn register_closure_job<F>(&mut self, name: impl Into<String>, entry: F) -> JobHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let name = name.into();
        let job = ClosureJob::from_fn(name.clone(), entry);
        self.register_entry(name, Box::new(job))
    }

    pub fn register_entry(&mut self, name: impl Into<String>, entry: Box<dyn JobEntry>) -> JobHandle {
        let name = name.into();
        assert!(
            !self.names.contains_key(&name),
            "a job named '{name}' is already registered"
        );
        let topology = self.building_mut("register a job");
        let index = topology.jobs.len();
        topology.jobs.push(Job::new(name.clone(), entry));
        debug!("registered job '{name}'");
        self.names.insert(name, index);
        self.handle(index)
    }

    /// `dependent` will only run after `dependency` finished in the same
    /// iteration.
    pub fn register_dependency(&mut self, dependent: JobHandle, dependency: JobHandle) {
        let dependent = self.index(dependent);
        let dependency = self.index(dependency);
        assert_ne!(dependent, ROOT, "the root job cannot depend on other jobs");
        assert_ne!(dependent, dependency, "a job cannot depend on itself");
        self.building_mut("register a dependency")
            .add_edge(dependent, dependency, false);
    }

    /// Convenience for registering several dependencies of one job.
    pub fn register_dependencies(&mut self, dependent: JobHandle, dependencies: &[JobHandle]) {
        for &dependency in dependencies {
            self.register_dependency(dependent, dependency);
        }
    }

    /// Marks a job that has to finish for the iteration to complete.
    ///
    /// The iteration is resolved once no job of it is in flight any more:
    /// `Completed` when every terminal job finished, `Failed` with the first
    /// failure otherwise.
    pub fn mark_terminal(&mut self, job: JobHandle) {
        let index = self.index(job);
        self.building_mut("mark a terminal job");
        if !self.terminals.contains(&index) {
            self.terminals.push(index);
        }
    }

    /// Freezes the topology and builds the counter table.
    ///
    /// Jobs without any registered dependency are hung off the root job so
    /// every job is reached from the single start point.
    pub fn compile(&mut self) {
        let mut topology = match std::mem::replace(&mut self.state, GraphState::Building(Topology::new())) {
            GraphState::Building(topology) => topology,
            GraphState::Compiled(schedule) => {
                self.state = GraphState::Compiled(schedule);
                panic!("compile() may only be called once");
            }
        };

        for index in 0..topology.jobs.len() {
            if index != ROOT && topology.jobs[index].dependencies.is_empty() {
                topology.add_edge(index, ROOT, true);
            }
        }

        // ids follow name order
        let mut by_name: Vec<usize> = (0..topology.jobs.len()).collect();
        by_name.sort_by(|&a, &b| topology.jobs[a].name.cmp(&topology.jobs[b].name));
        let mut ids = vec![0; by_name.len()];
        let mut in_degree = vec![0; by_name.len()];
        for (id, &index) in by_name.iter().enumerate() {
            ids[index] = id;
            in_degree[id] = topology.jobs[index].in_degree();
        }
        assert_eq!(in_degree[ids[ROOT]], 0, "the root job must not have dependencies");

        let mut terminal = vec![false; topology.jobs.len()];
        for &index in &self.terminals {
            terminal[index] = true;
        }

        debug!(
            "compiled job graph with {} jobs and {} edges",
            topology.jobs.len(),
            topology.edges.len()
        );

        let counters = CounterTable {
            epoch: 0,
            failure: None,
            in_flight: 0,
            remaining: in_degree.clone(),
            terminals_left: self.terminals.len(),
        };
        self.state = GraphState::Compiled(Arc::new(Schedule {
            topology,
            ids,
            in_degree,
            terminal,
            terminal_count: self.terminals.len(),
            counters: Mutex::new(counters),
            pool: self.pool.clone(),
            signal: self.signal.clone(),
        }));
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.state, GraphState::Compiled(_))
    }

    /// Starts one iteration by handing the root job to the pool. Returns
    /// immediately; completion is reported through [`completion`](Self::completion).
    pub fn run_iteration(&self) {
        let schedule = match &self.state {
            GraphState::Compiled(schedule) => schedule.clone(),
            GraphState::Building(_) => panic!("run_iteration() requires a compiled graph"),
        };

        let mut table = schedule.counters.lock().expect("counter table poisoned");
        if table.in_flight > 0 {
            warn!(
                "iteration {} still has {} jobs in flight, superseding it",
                table.epoch, table.in_flight
            );
        }
        if table.remaining != schedule.in_degree {
            // left behind by a failed or superseded iteration
            table.remaining.copy_from_slice(&schedule.in_degree);
        }
        table.epoch += 1;
        table.failure = None;
        table.in_flight = 0;
        table.terminals_left = schedule.terminal_count;
        let epoch = table.epoch;
        schedule.signal.begin(epoch);
        debug!("starting iteration {epoch}");
        submit(&schedule, &mut table, ROOT, epoch);
    }

    /// The signal resolved when an iteration completes or fails.
    pub fn completion(&self) -> Arc<IterationSignal> {
        self.signal.clone()
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    pub fn find_job(&self, name: &str) -> Option<JobHandle> {
        self.names.get(name).map(|&index| self.handle(index))
    }

    pub fn name(&self, job: JobHandle) -> &str {
        let index = self.index(job);
        &self.topology().jobs[index].name
    }

    /// Number of jobs, root included.
    pub fn len(&self) -> usize {
        self.topology().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        // the root job is always there
        false
    }

    /// Id assigned by `compile`.
    pub fn job_id(&self, job: JobHandle) -> Option<JobId> {
        let index = self.index(job);
        match &self.state {
            GraphState::Compiled(schedule) => Some(schedule.ids[index]),
            GraphState::Building(_) => None,
        }
    }

    /// Number of dependencies, including the implicit root edge once compiled.
    pub fn in_degree(&self, job: JobHandle) -> usize {
        let index = self.index(job);
        self.topology().jobs[index].in_degree()
    }

    /// Current value of the job's counter.
    pub fn remaining_dependencies(&self, job: JobHandle) -> Option<usize> {
        let index = self.index(job);
        match &self.state {
            GraphState::Compiled(schedule) => {
                let table = schedule.counters.lock().expect("counter table poisoned");
                Some(table.remaining[schedule.ids[index]])
            }
            GraphState::Building(_) => None,
        }
    }

    /// Graphviz rendering of every edge, dependent -> dependency.
    pub fn dump_graph(&self) -> String {
        self.to_string()
    }

    pub fn write_graph(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.dump_graph())
            .with_context(|| format!("failed to write job graph to {}", path.display()))
    }

    fn topology(&self) -> &Topology {
        match &self.state {
            GraphState::Building(topology) => topology,
            GraphState::Compiled(schedule) => &schedule.topology,
        }
    }

    fn building_mut(&mut self, what: &str) -> &mut Topology {
        match &mut self.state {
            GraphState::Building(topology) => topology,
            GraphState::Compiled(_) => panic!("cannot {what} after compile()"),
        }
    }

    fn handle(&self, index: usize) -> JobHandle {
        JobHandle {
            graph: self.id,
            index,
        }
    }

    fn index(&self, job: JobHandle) -> usize {
        assert_eq!(job.graph, self.id, "job handle belongs to a different graph");
        job.index
    }
}

impl fmt::Display for JobGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.topology().write_dot(f)
    }
}

fn submit(schedule: &Arc<Schedule>, table: &mut CounterTable, index: usize, epoch: u64) {
    table.in_flight += 1;
    let schedule_for_job = schedule.clone();
    schedule
        .pool
        .run(move || run_job(&schedule_for_job, index, epoch));
}

/// Runs one job on the current worker, then releases its dependents.
///
/// A failed job holds back only its own dependents; the rest of the
/// iteration keeps going. The iteration is resolved once none of its jobs
/// is in flight any more, so the driver never sees an outcome while jobs of
/// that iteration are still running.
fn run_job(schedule: &Arc<Schedule>, index: usize, epoch: u64) {
    let job = &schedule.topology.jobs[index];
    trace!("starting job '{}' (iteration {epoch})", job.name);
    let result = panic::catch_unwind(AssertUnwindSafe(|| job.entry.run()));

    let mut table = schedule.counters.lock().expect("counter table poisoned");
    if table.epoch != epoch {
        trace!("job '{}' belongs to a superseded iteration", job.name);
        return;
    }

    match result {
        Err(payload) => {
            let failure = JobFailure {
                job: job.name.clone(),
                message: panic_message(payload.as_ref()),
            };
            error!("iteration {epoch}: {failure}");
            table.failure.get_or_insert(failure);
        }
        Ok(()) => {
            trace!("finished job '{}'", job.name);
            for &edge in &job.dependents {
                let dependent = schedule.topology.edges[edge].dependent;
                let id = schedule.ids[dependent];
                assert!(
                    table.remaining[id] > 0,
                    "counter of job '{}' underflowed",
                    schedule.topology.jobs[dependent].name
                );
                table.remaining[id] -= 1;
                if table.remaining[id] == 0 {
                    // re-arm for the next iteration before handing it out
                    table.remaining[id] = schedule.in_degree[id];
                    submit(schedule, &mut table, dependent, epoch);
                }
            }
            if schedule.terminal[index] {
                table.terminals_left -= 1;
            }
        }
    }

    table.in_flight -= 1;
    if table.in_flight > 0 {
        return;
    }
    let outcome = match table.failure.clone() {
        Some(failure) => IterationOutcome::Failed(failure),
        None => {
            if table.terminals_left > 0 {
                warn!(
                    "iteration {epoch} ran out of jobs with {} terminal jobs left",
                    table.terminals_left
                );
            }
            IterationOutcome::Completed
        }
    };
    drop(table);
    debug!("iteration {epoch} resolved: {outcome:?}");
    schedule.signal.resolve(epoch, outcome);
}
