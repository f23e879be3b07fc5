// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::process::Command;

use jobgraph::engine::{OCCLUSION, PHYSICS, RENDERING, SIMULATION, WINDOW_PAINTING};
use jobgraph_tests::test_log::TestLog;

fn frame_trace(args: &[&str]) -> TestLog {
    let out = Command::new(env!("CARGO_BIN_EXE_frame-trace"))
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run frame-trace: {e}"));
    assert!(
        out.status.success(),
        "frame-trace failed\nstderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).unwrap_or_else(|e| {
        panic!(
            "frame-trace printed no valid log: {e}\nstdout: {}",
            String::from_utf8_lossy(&out.stdout)
        )
    })
}

#[test]
fn test_frame_graph_order_in_separate_process() {
    let log = frame_trace(&["--workers", "4", "--frames", "25"]);
    assert_eq!(log.workers, 4);
    assert_eq!(log.frames.len(), 25);

    for frame in &log.frames {
        assert!(frame.completed, "frame {}", frame.frame);
        assert_eq!(frame.jobs.len(), 5, "frame {}", frame.frame);
        for (dependency, dependent) in [
            (SIMULATION, OCCLUSION),
            (PHYSICS, OCCLUSION),
            (SIMULATION, RENDERING),
            (OCCLUSION, RENDERING),
            (RENDERING, WINDOW_PAINTING),
        ] {
            assert!(
                frame.ordered(dependency, dependent),
                "frame {}: {dependency} -> {dependent}",
                frame.frame
            );
        }
    }
}

#[test]
fn test_failed_frame_stops_its_branch_and_recovers() {
    let log = frame_trace(&[
        "--workers", "2", "--frames", "4", "--fail-job", OCCLUSION, "--fail-frame", "2",
    ]);

    let failed = &log.frames[1];
    assert!(!failed.completed);
    assert_eq!(failed.failed_job.as_deref(), Some(OCCLUSION));
    assert!(failed.job(RENDERING).is_none());
    assert!(failed.job(WINDOW_PAINTING).is_none());

    for frame in [&log.frames[0], &log.frames[2], &log.frames[3]] {
        assert!(frame.completed, "frame {}", frame.frame);
        assert!(frame.ordered(RENDERING, WINDOW_PAINTING));
    }
}
