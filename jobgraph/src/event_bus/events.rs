// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Duration;

use crate::job_engine::iteration::IterationOutcome;

/// Emitted by the [`TickSource`](crate::tick::TickSource) once per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTick {
    pub frame: u64,
    /// time since the tick source started
    pub elapsed: Duration,
}

/// Emitted by the driver once a frame's iteration is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFinished {
    pub frame: u64,
    pub outcome: IterationOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationStart;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationEnd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStart;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderEnd;

// window lifecycle, produced by the windowing layer

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCloseRequested;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDestroyStart;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDestroyEnd;
