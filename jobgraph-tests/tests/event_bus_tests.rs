// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use jobgraph::event_bus::events::{RenderEnd, RenderStart, SimulationEnd, SimulationStart};
use jobgraph::event_bus::{Delivery, EventBus};
use jobgraph::job_engine::iteration::IterationOutcome;
use jobgraph::job_engine::job_graph::JobGraph;
use jobgraph_tests::test_log;

#[derive(Debug, Clone, PartialEq)]
struct Score(u32);

#[test]
fn test_concurrent_triggers_reach_every_listener() {
    test_log::init();
    for delivery in [Delivery::Inline, Delivery::HelperThread] {
        let bus = Arc::new(EventBus::with_delivery(delivery));
        let total = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let t = total.clone();
            bus.register_listener(move |s: Score| {
                t.fetch_add(s.0 as usize, Ordering::SeqCst);
            });
        }

        let start = Arc::new(Barrier::new(4));
        let producers: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    for _ in 0..50 {
                        bus.trigger(Score(1));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        // 4 producers * 50 events * 3 listeners
        assert_eq!(total.load(Ordering::SeqCst), 600, "{delivery:?}");
    }
}

#[test]
fn test_listener_added_during_delivery_sees_only_later_events() {
    let bus = Arc::new(EventBus::new());
    let late_calls = Arc::new(AtomicUsize::new(0));

    let bus_in_listener = bus.clone();
    let late = late_calls.clone();
    let mut first = bus.register_listener(move |s: Score| {
        if s.0 == 1 {
            let late = late.clone();
            bus_in_listener.register_listener(move |_: Score| {
                late.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    bus.trigger(Score(1));
    assert_eq!(late_calls.load(Ordering::SeqCst), 0);
    assert_eq!(bus.listener_count::<Score>(), 2);

    bus.deregister_listener(&mut first);
    bus.trigger(Score(2));
    assert_eq!(late_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_waiter_on_another_thread_wakes_on_trigger() {
    let bus = Arc::new(EventBus::new());
    let ready = Arc::new(Barrier::new(2));

    let waiter = {
        let bus = bus.clone();
        let ready = ready.clone();
        thread::spawn(move || {
            ready.wait();
            bus.wait_for_timeout::<Score>(Duration::from_secs(10))
        })
    };
    ready.wait();
    // keep triggering until the waiter has registered its wait
    while !waiter.is_finished() {
        bus.trigger(Score(0));
        thread::sleep(Duration::from_millis(1));
    }
    assert!(waiter.join().unwrap());
}

#[test]
fn test_jobs_announce_phases_on_the_bus() {
    let bus = Arc::new(EventBus::new());
    let phases = Arc::new(Mutex::new(Vec::new()));
    macro_rules! record {
        ($event:ty, $label:expr) => {{
            let p = phases.clone();
            bus.register_listener(move |_: $event| p.lock().unwrap().push($label));
        }};
    }
    record!(SimulationStart, "sim-start");
    record!(SimulationEnd, "sim-end");
    record!(RenderStart, "render-start");
    record!(RenderEnd, "render-end");

    let mut graph = JobGraph::with_workers(2).unwrap();
    let simulation = graph.register_job(
        "Simulation",
        |bus: &Arc<EventBus>| {
            bus.trigger(SimulationStart);
            bus.trigger(SimulationEnd);
        },
        bus.clone(),
    );
    let rendering = graph.register_job(
        "Rendering",
        |bus: &Arc<EventBus>| {
            bus.trigger(RenderStart);
            bus.trigger(RenderEnd);
        },
        bus.clone(),
    );
    graph.register_dependency(rendering, simulation);
    graph.mark_terminal(rendering);
    graph.compile();

    let signal = graph.completion();
    for _ in 0..3 {
        graph.run_iteration();
        assert_eq!(
            signal.wait_timeout(Duration::from_secs(10)),
            Some(IterationOutcome::Completed)
        );
    }

    let expected: Vec<&str> = ["sim-start", "sim-end", "render-start", "render-end"]
        .iter()
        .copied()
        .cycle()
        .take(12)
        .collect();
    assert_eq!(*phases.lock().unwrap(), expected);
}
