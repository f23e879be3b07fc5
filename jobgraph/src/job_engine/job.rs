// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use smallvec::SmallVec;
use std::fmt;

/// Dense id of a job inside a compiled graph, in `[0, len)`.
pub type JobId = usize;

/// The body of a job. Runs once per iteration on a pool worker.
pub trait JobEntry: Send + Sync + 'static {
    /// Free-form description, used for logging or debugging
    fn desc(&self) -> &str {
        "job"
    }

    fn run(&self);
}

impl fmt::Debug for dyn JobEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobEntry")
            .field("desc", &self.desc())
            .finish()
    }
}

/// Refers to a job registered in a particular [`JobGraph`](super::job_graph::JobGraph).
///
/// Handles are only meaningful for the graph that issued them; passing one
/// to another graph panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub(crate) graph: u64,
    pub(crate) index: usize,
}

pub(crate) type EdgeList = SmallVec<[usize; 4]>;

#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) name: String,
    pub(crate) entry: Box<dyn JobEntry>,
    /// edges on which this job is the dependent
    pub(crate) dependencies: EdgeList,
    /// edges on which this job is the dependency
    pub(crate) dependents: EdgeList,
}

impl Job {
    pub(crate) fn new(name: String, entry: Box<dyn JobEntry>) -> Self {
        Self {
            name,
            entry,
            dependencies: SmallVec::new(),
            dependents: SmallVec::new(),
        }
    }

    pub(crate) fn in_degree(&self) -> usize {
        self.dependencies.len()
    }
}

/// `dependent` may only start once `dependency` has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Edge {
    pub(crate) dependent: usize,
    pub(crate) dependency: usize,
    /// added by `compile()` to hang an otherwise unconnected job off root
    pub(crate) implicit: bool,
}

/// Jobs and edges, indexed by registration order.
#[derive(Debug)]
pub(crate) struct Topology {
    pub(crate) jobs: Vec<Job>,
    pub(crate) edges: Vec<Edge>,
}

impl Topology {
    pub(crate) fn new() -> Self {
        Self {
            jobs: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub(crate) fn add_edge(&mut self, dependent: usize, dependency: usize, implicit: bool) {
        let index = self.edges.len();
        self.edges.push(Edge {
            dependent,
            dependency,
            implicit,
        });
        self.jobs[dependent].dependencies.push(index);
        self.jobs[dependency].dependents.push(index);
    }

    /// Graphviz rendering, dependent -> dependency.
    pub(crate) fn write_dot(&self, f: &mut impl fmt::Write) -> fmt::Result {
        writeln!(f, "digraph {{")?;
        for edge in &self.edges {
            write!(
                f,
                "    \"{}\" -> \"{}\"",
                escape(&self.jobs[edge.dependent].name),
                escape(&self.jobs[edge.dependency].name)
            )?;
            if edge.implicit {
                write!(f, " [style=\"dashed\"]")?;
            }
            writeln!(f, ";")?;
        }
        writeln!(f, "}}")
    }
}

fn escape(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}
