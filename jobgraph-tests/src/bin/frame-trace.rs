// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Runs the engine's frame graph with recording jobs and prints a
//! [`TestLog`] as JSON on stdout.

use clap::Parser;
use jobgraph::engine::{OCCLUSION, PHYSICS, RENDERING, SIMULATION, WINDOW_PAINTING};
use jobgraph::job_engine::iteration::IterationOutcome;
use jobgraph::job_engine::job_graph::JobGraph;
use jobgraph::job_engine::job::JobHandle;
use jobgraph_tests::recorder::ExecutionRecorder;
use jobgraph_tests::test_log::{LoggedFrame, TestLog};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
struct Args {
    #[arg(long, default_value_t = 4)]
    workers: usize,

    #[arg(long, default_value_t = 10)]
    frames: u64,

    /// Job that panics in `--fail-frame`
    #[arg(long = "fail-job", requires = "fail_frame")]
    fail_job: Option<String>,

    #[arg(long = "fail-frame", requires = "fail_job")]
    fail_frame: Option<u64>,
}

struct TracedJob {
    recorder: Arc<ExecutionRecorder>,
    name: String,
    fail_in: Option<u64>,
}

fn register(graph: &mut JobGraph, recorder: &Arc<ExecutionRecorder>, name: &str, args: &Args) -> JobHandle {
    let fail_in = match &args.fail_job {
        Some(job) if job == name => args.fail_frame,
        _ => None,
    };
    graph.register_job(
        name,
        |job: &TracedJob| {
            job.recorder.record(&job.name, || {
                if job.fail_in == Some(job.recorder.frame()) {
                    panic!("{} failed on purpose", job.name);
                }
            })
        },
        TracedJob {
            recorder: recorder.clone(),
            name: name.to_string(),
            fail_in,
        },
    )
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let recorder = ExecutionRecorder::new();

    let mut graph = JobGraph::with_workers(args.workers)?;
    let simulation = register(&mut graph, &recorder, SIMULATION, &args);
    let physics = register(&mut graph, &recorder, PHYSICS, &args);
    let occlusion = register(&mut graph, &recorder, OCCLUSION, &args);
    let rendering = register(&mut graph, &recorder, RENDERING, &args);
    let window_painting = register(&mut graph, &recorder, WINDOW_PAINTING, &args);
    graph.register_dependencies(occlusion, &[simulation, physics]);
    graph.register_dependencies(rendering, &[simulation, occlusion]);
    graph.register_dependency(window_painting, rendering);
    graph.mark_terminal(window_painting);
    graph.compile();

    let signal = graph.completion();
    let mut log = TestLog {
        workers: args.workers,
        frames: Vec::new(),
    };
    for frame in 1..=args.frames {
        recorder.begin_frame(frame);
        graph.run_iteration();
        let outcome = signal
            .wait_timeout(Duration::from_secs(10))
            .ok_or_else(|| anyhow::anyhow!("frame {frame} did not resolve"))?;
        let failed_job = match outcome {
            IterationOutcome::Completed => None,
            IterationOutcome::Failed(failure) => Some(failure.job),
        };
        log.frames.push(LoggedFrame::from_recorder(&recorder, frame, failed_job));
    }

    println!("{}", serde_json::to_string(&log)?);
    Ok(())
}
