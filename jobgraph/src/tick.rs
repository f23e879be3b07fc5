// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use anyhow::Context;
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::event_bus::events::EngineTick;
use crate::event_bus::EventBus;

/// Background thread that triggers [`EngineTick`] on a bus at a fixed rate.
///
/// Ticks are scheduled against the start time, so a slow listener delays
/// a tick but does not shift the ones after it.
#[derive(Debug)]
pub struct TickSource {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl TickSource {
    pub fn start(bus: Arc<EventBus>, interval: Duration) -> anyhow::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_in_thread = stop.clone();
        let handle = thread::Builder::new()
            .name("jobgraph-tick".to_string())
            .spawn(move || tick_loop(&bus, interval, &stop_in_thread))
            .context("failed to spawn the tick thread")?;
        info!("tick source started, interval {interval:?}");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stops ticking and joins the thread. Returns how many ticks were sent.
    pub fn stop(&mut self) -> u64 {
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        self.stop.store(true, Ordering::SeqCst);
        handle.thread().unpark();
        match handle.join() {
            Ok(ticks) => {
                info!("tick source stopped after {ticks} ticks");
                ticks
            }
            Err(_) => {
                error!("tick thread panicked");
                0
            }
        }
    }
}

impl Drop for TickSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick_loop(bus: &EventBus, interval: Duration, stop: &AtomicBool) -> u64 {
    let started = Instant::now();
    let mut frame = 0u64;
    loop {
        let step = u32::try_from(frame + 1).unwrap_or(u32::MAX);
        let deadline = started + interval.saturating_mul(step);
        // park may wake early, so re-check the deadline
        loop {
            if stop.load(Ordering::SeqCst) {
                return frame;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
        frame += 1;
        debug!("tick {frame}");
        bus.trigger(EngineTick {
            frame,
            elapsed: started.elapsed(),
        });
    }
}
