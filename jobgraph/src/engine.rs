// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use anyhow::{bail, Context};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::event_bus::events::{
    EngineTick, FrameFinished, RenderEnd, RenderStart, SimulationEnd, SimulationStart,
    WindowCloseRequested, WindowDestroyEnd, WindowDestroyStart,
};
use crate::event_bus::EventBus;
use crate::job_engine::iteration::{IterationOutcome, JobFailure};
use crate::job_engine::job_graph::JobGraph;
use crate::job_engine::thread_pool::ThreadPool;
use crate::tick::TickSource;

pub const SIMULATION: &str = "Simulation";
pub const PHYSICS: &str = "Physics";
pub const OCCLUSION: &str = "Occlusion";
pub const RENDERING: &str = "Rendering";
pub const WINDOW_PAINTING: &str = "WindowPainting";

/// Longest a frame may wait for its tick before the driver gives up.
const TICK_GRACE: Duration = Duration::from_secs(5);

/// Registers the per-frame jobs:
///
/// ```text
/// Simulation ──┬──────────────> Rendering ──> WindowPainting
/// Physics ─────┴─> Occlusion ──┘
/// ```
///
/// `WindowPainting` is the terminal job and bumps `painted`.
pub fn register_frame_jobs(graph: &mut JobGraph, bus: &Arc<EventBus>, painted: &Arc<AtomicU64>) {
    let simulation = graph.register_job(
        SIMULATION,
        |bus: &Arc<EventBus>| {
            bus.trigger(SimulationStart);
            debug!("completing simulation job");
            bus.trigger(SimulationEnd);
        },
        bus.clone(),
    );
    let physics = graph.register_closure_job(PHYSICS, || debug!("completing physics job"));
    let occlusion = graph.register_closure_job(OCCLUSION, || debug!("completing occlusion job"));
    let rendering = graph.register_job(
        RENDERING,
        |bus: &Arc<EventBus>| {
            bus.trigger(RenderStart);
            debug!("completing rendering job");
            bus.trigger(RenderEnd);
        },
        bus.clone(),
    );
    let window_painting = graph.register_job(
        WINDOW_PAINTING,
        |painted: &Arc<AtomicU64>| {
            debug!("completing window painting job");
            painted.fetch_add(1, Ordering::SeqCst);
        },
        painted.clone(),
    );

    graph.register_dependencies(occlusion, &[simulation, physics]);
    graph.register_dependencies(rendering, &[simulation, occlusion]);
    graph.register_dependency(window_painting, rendering);
    graph.mark_terminal(window_painting);
}

/// Result of [`Engine::run`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub failures: Vec<(u64, JobFailure)>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Frame graph, event bus and pool wired together for the frame driver.
#[derive(Debug)]
pub struct Engine {
    bus: Arc<EventBus>,
    graph: JobGraph,
    painted: Arc<AtomicU64>,
    frame_interval: Duration,
    iterations: u64,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let pool = Arc::new(ThreadPool::new(config.workers).context("failed to start the job pool")?);
        let bus = Arc::new(EventBus::with_delivery(config.delivery));
        register_lifecycle_logging(&bus);

        let painted = Arc::new(AtomicU64::new(0));
        let mut graph = JobGraph::new(pool);
        register_frame_jobs(&mut graph, &bus, &painted);
        graph.compile();

        if let Some(path) = &config.dump_graph {
            graph.write_graph(path)?;
            info!("wrote frame graph to {}", path.display());
        }

        Ok(Self {
            bus,
            graph,
            painted,
            frame_interval: Duration::from_millis(config.frame_interval_ms),
            iterations: config.iterations,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    /// How many times `WindowPainting` has run.
    pub fn frames_painted(&self) -> u64 {
        self.painted.load(Ordering::SeqCst)
    }

    /// Runs one iteration of the frame graph, waits for it to resolve and
    /// triggers [`FrameFinished`].
    pub fn run_frame(&self, frame: u64) -> IterationOutcome {
        let signal = self.graph.completion();
        self.graph.run_iteration();
        let outcome = signal.wait();
        self.bus.trigger(FrameFinished {
            frame,
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Runs the configured number of frames, one per tick. A failed frame is
    /// recorded and the next frame starts from reset counters.
    pub fn run(&self) -> anyhow::Result<RunSummary> {
        let mut ticks = if self.frame_interval.is_zero() {
            None
        } else {
            Some(TickSource::start(self.bus.clone(), self.frame_interval)?)
        };

        let mut summary = RunSummary::default();
        for frame in 1..=self.iterations {
            if ticks.is_some()
                && !self
                    .bus
                    .wait_for_timeout::<EngineTick>(self.frame_interval + TICK_GRACE)
            {
                bail!("no tick arrived for frame {frame}");
            }
            match self.run_frame(frame) {
                IterationOutcome::Completed => debug!("frame {frame} done"),
                IterationOutcome::Failed(failure) => {
                    warn!("frame {frame} failed: {failure}");
                    summary.failures.push((frame, failure));
                }
            }
            summary.frames = frame;
        }

        if let Some(ticks) = ticks.as_mut() {
            ticks.stop();
        }
        Ok(summary)
    }

    /// Window teardown sequence, run once after the last frame.
    pub fn close(&self) {
        self.bus.trigger(WindowCloseRequested);
        self.bus.trigger(WindowDestroyStart);
        self.graph.pool().shutdown();
        self.bus.trigger(WindowDestroyEnd);
    }
}

fn register_lifecycle_logging(bus: &EventBus) {
    bus.register_listener(|_: SimulationEnd| debug!("simulation ended"));
    bus.register_listener(|_: WindowCloseRequested| info!("window close requested"));
    bus.register_listener(|_: WindowDestroyStart| info!("window destroy start"));
    bus.register_listener(|_: WindowDestroyEnd| info!("window destroy end"));
}
