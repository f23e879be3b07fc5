// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Typed publish/subscribe between producers (window messages, the tick
//! source) and engine subsystems.
//!
//! An [`EventBus`] owns one listener list per event type, keyed by
//! `TypeId`. `trigger` is synchronous from the caller's point of view and
//! `wait_for` parks a thread until the next occurrence of an event type.
//! Independent buses never share listeners.

mod bus;
pub mod events;

pub use self::bus::{Delivery, EventBus, Listener, ListenerHandle};
