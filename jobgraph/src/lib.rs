// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod config;
pub mod engine;
pub mod event_bus;
pub mod job_engine;
pub mod log_sink;
pub mod tick;
