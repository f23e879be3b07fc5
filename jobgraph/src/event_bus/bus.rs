// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use clap::ValueEnum;
use log::trace;
use serde::Deserialize;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

static NEXT_BUS_ID: AtomicU64 = AtomicU64::new(1);

/// Callback invoked with a copy of every triggered event.
pub type Listener<E> = Arc<dyn Fn(E) + Send + Sync + 'static>;

/// Where `trigger` runs the listeners. The caller waits in both cases.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
#[clap(rename_all = "kebab-case")]
pub enum Delivery {
    #[default]
    /// Spawn a helper thread per trigger and join it
    HelperThread,
    /// Run the listeners on the triggering thread
    Inline,
}

/// Returned by `register_listener`; needed to deregister.
#[derive(Debug)]
pub struct ListenerHandle<E> {
    bus: u64,
    id: u64,
    valid: bool,
    _event: PhantomData<fn(E)>,
}

impl<E> ListenerHandle<E> {
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

struct ChannelState<E> {
    listeners: Vec<(u64, Listener<E>)>,
    next_id: u64,
    /// bumped on every trigger; `wait_for` waits for it to move
    generation: u64,
}

/// Per-event-type listener list and wake-up primitive.
struct Channel<E> {
    state: Mutex<ChannelState<E>>,
    triggered: Condvar,
}

impl<E> Channel<E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                listeners: Vec::new(),
                next_id: 0,
                generation: 0,
            }),
            triggered: Condvar::new(),
        }
    }
}

/// Typed publish/subscribe hub.
///
/// Each event type gets its own listener list, created on first use and
/// kept for the lifetime of the bus. Any `Clone + Send + 'static` type can
/// be an event.
pub struct EventBus {
    id: u64,
    delivery: Delivery,
    channels: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.channels.lock().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("EventBus")
            .field("id", &self.id)
            .field("delivery", &self.delivery)
            .field("channels", &channels)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_delivery(Delivery::default())
    }

    pub fn with_delivery(delivery: Delivery) -> Self {
        Self {
            id: NEXT_BUS_ID.fetch_add(1, Ordering::Relaxed),
            delivery,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    fn channel<E>(&self) -> Arc<Channel<E>>
    where
        E: Clone + Send + 'static,
    {
        let entry = self
            .channels
            .lock()
            .expect("event bus poisoned")
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Arc::new(Channel::<E>::new()) as Arc<dyn Any + Send + Sync>)
            .clone();
        match entry.downcast::<Channel<E>>() {
            Ok(channel) => channel,
            Err(_) => unreachable!("channel registered under the TypeId of another type"),
        }
    }

    /// Appends `listener` to the listeners of `E`. Listeners of one type run
    /// in registration order.
    pub fn register_listener<E, F>(&self, listener: F) -> ListenerHandle<E>
    where
        E: Clone + Send + 'static,
        F: Fn(E) + Send + Sync + 'static,
    {
        let channel = self.channel::<E>();
        let mut state = channel.state.lock().expect("event channel poisoned");
        let id = state.next_id;
        state.next_id += 1;
        state.listeners.push((id, Arc::new(listener)));
        trace!("registered listener {id} for {}", type_name::<E>());
        ListenerHandle {
            bus: self.id,
            id,
            valid: true,
            _event: PhantomData,
        }
    }

    /// Removes the listener behind `handle`.
    ///
    /// Panics if the handle was already deregistered or comes from another
    /// bus.
    pub fn deregister_listener<E>(&self, handle: &mut ListenerHandle<E>)
    where
        E: Clone + Send + 'static,
    {
        assert!(handle.valid, "listener handle was already deregistered");
        assert_eq!(
            handle.bus, self.id,
            "listener handle belongs to a different event bus"
        );
        let channel = self.channel::<E>();
        let mut state = channel.state.lock().expect("event channel poisoned");
        let position = state
            .listeners
            .iter()
            .position(|(id, _)| *id == handle.id)
            .unwrap_or_else(|| panic!("listener {} is not registered", handle.id));
        state.listeners.remove(position);
        handle.valid = false;
        trace!("deregistered listener {} for {}", handle.id, type_name::<E>());
    }

    pub fn listener_count<E>(&self) -> usize
    where
        E: Clone + Send + 'static,
    {
        self.channel::<E>()
            .state
            .lock()
            .expect("event channel poisoned")
            .listeners
            .len()
    }

    /// Hands a copy of `event` to every listener registered for `E` at the
    /// time of the call, then wakes all `wait_for::<E>` callers.
    ///
    /// Returns once every listener has returned. A panicking listener aborts
    /// the remaining deliveries and the panic resumes on the caller.
    pub fn trigger<E>(&self, event: E)
    where
        E: Clone + Send + 'static,
    {
        let channel = self.channel::<E>();
        let listeners: Vec<Listener<E>> = {
            let mut state = channel.state.lock().expect("event channel poisoned");
            state.generation += 1;
            state.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        channel.triggered.notify_all();
        trace!(
            "triggering {} for {} listeners",
            type_name::<E>(),
            listeners.len()
        );

        match self.delivery {
            Delivery::Inline => deliver(&listeners, event),
            Delivery::HelperThread => thread::scope(|scope| {
                let helper = scope.spawn(|| deliver(&listeners, event));
                if let Err(payload) = helper.join() {
                    panic::resume_unwind(payload);
                }
            }),
        }
    }

    /// Blocks until the next `trigger::<E>`. Earlier triggers are not
    /// replayed.
    pub fn wait_for<E>(&self)
    where
        E: Clone + Send + 'static,
    {
        let channel = self.channel::<E>();
        let state = channel.state.lock().expect("event channel poisoned");
        let seen = state.generation;
        let _state = channel
            .triggered
            .wait_while(state, |s| s.generation == seen)
            .expect("event channel poisoned");
    }

    /// Like `wait_for`, but gives up after `timeout`. Returns whether the
    /// event was triggered.
    pub fn wait_for_timeout<E>(&self, timeout: Duration) -> bool
    where
        E: Clone + Send + 'static,
    {
        let channel = self.channel::<E>();
        let state = channel.state.lock().expect("event channel poisoned");
        let seen = state.generation;
        let (state, _) = channel
            .triggered
            .wait_timeout_while(state, timeout, |s| s.generation == seen)
            .expect("event channel poisoned");
        state.generation != seen
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver<E: Clone>(listeners: &[Listener<E>], event: E) {
    for listener in listeners {
        listener(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    /// A local event type for testing purposes.
    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        WindowResized { width: u32, height: u32 },
        KeyPressed { key_code: String },
    }

    #[derive(Debug, Clone, PartialEq)]
    struct OtherEvent(u32);

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn both_modes() -> [EventBus; 2] {
        [
            EventBus::with_delivery(Delivery::HelperThread),
            EventBus::with_delivery(Delivery::Inline),
        ]
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        for bus in both_modes() {
            let seen = recorder();
            for name in ["first", "second", "third"] {
                let s = seen.clone();
                bus.register_listener(move |e: TestEvent| {
                    s.lock().unwrap().push(format!("{name}:{e:?}"));
                });
            }
            bus.trigger(TestEvent::WindowResized {
                width: 1,
                height: 2,
            });
            assert_eq!(
                *seen.lock().unwrap(),
                vec![
                    "first:WindowResized { width: 1, height: 2 }",
                    "second:WindowResized { width: 1, height: 2 }",
                    "third:WindowResized { width: 1, height: 2 }",
                ]
            );
        }
    }

    #[test]
    fn trigger_only_reaches_its_own_type() {
        let bus = EventBus::new();
        let seen = recorder();
        let s = seen.clone();
        bus.register_listener(move |e: OtherEvent| s.lock().unwrap().push(format!("{}", e.0)));
        bus.trigger(TestEvent::KeyPressed {
            key_code: "W".into(),
        });
        assert!(seen.lock().unwrap().is_empty());
        bus.trigger(OtherEvent(9));
        assert_eq!(*seen.lock().unwrap(), vec!["9"]);
    }

    #[test]
    fn deregistered_listener_is_not_called() {
        for bus in both_modes() {
            let seen = recorder();
            let s1 = seen.clone();
            let mut first = bus.register_listener(move |_: OtherEvent| {
                s1.lock().unwrap().push("first".into())
            });
            let s2 = seen.clone();
            let _second = bus.register_listener(move |_: OtherEvent| {
                s2.lock().unwrap().push("second".into())
            });
            assert_eq!(bus.listener_count::<OtherEvent>(), 2);

            bus.trigger(OtherEvent(1));
            bus.deregister_listener(&mut first);
            assert!(!first.is_valid());
            assert_eq!(bus.listener_count::<OtherEvent>(), 1);
            bus.trigger(OtherEvent(2));

            assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "second"]);
        }
    }

    #[test]
    #[should_panic(expected = "already deregistered")]
    fn double_deregistration_panics() {
        let bus = EventBus::new();
        let mut handle = bus.register_listener(|_: OtherEvent| {});
        bus.deregister_listener(&mut handle);
        bus.deregister_listener(&mut handle);
    }

    #[test]
    #[should_panic(expected = "different event bus")]
    fn foreign_handle_panics() {
        let first = EventBus::new();
        let second = EventBus::new();
        let mut handle = first.register_listener(|_: OtherEvent| {});
        second.deregister_listener(&mut handle);
    }

    #[test]
    fn trigger_returns_after_all_listeners_ran() {
        let bus = EventBus::with_delivery(Delivery::HelperThread);
        let seen = recorder();
        let s = seen.clone();
        bus.register_listener(move |_: OtherEvent| {
            thread::sleep(Duration::from_millis(30));
            s.lock().unwrap().push("slow".into());
        });
        bus.trigger(OtherEvent(0));
        assert_eq!(*seen.lock().unwrap(), vec!["slow"]);
    }

    #[test]
    fn listener_may_reenter_the_bus() {
        let bus = Arc::new(EventBus::new());
        let seen = recorder();
        let inner_bus = bus.clone();
        bus.register_listener(move |e: OtherEvent| {
            if e.0 < 3 {
                inner_bus.trigger(OtherEvent(e.0 + 1));
            }
        });
        let s = seen.clone();
        bus.register_listener(move |e: OtherEvent| s.lock().unwrap().push(e.0.to_string()));
        bus.trigger(OtherEvent(0));
        assert_eq!(*seen.lock().unwrap(), vec!["3", "2", "1", "0"]);
    }

    #[test]
    #[should_panic(expected = "listener exploded")]
    fn listener_panic_reaches_caller() {
        let bus = EventBus::with_delivery(Delivery::HelperThread);
        bus.register_listener(|_: OtherEvent| panic!("listener exploded"));
        bus.trigger(OtherEvent(0));
    }

    #[test]
    fn wait_for_ignores_past_triggers() {
        let bus = EventBus::new();
        bus.trigger(OtherEvent(0));
        assert!(!bus.wait_for_timeout::<OtherEvent>(Duration::from_millis(30)));
    }

    #[test]
    fn wait_for_wakes_on_later_trigger() {
        let bus = Arc::new(EventBus::new());
        let (tx, rx) = mpsc::channel();
        let waiter_bus = bus.clone();
        let waiter = thread::spawn(move || {
            waiter_bus.wait_for::<OtherEvent>();
            tx.send(()).unwrap();
        });

        // keep triggering until the waiter has actually started waiting
        let mut woke = false;
        for _ in 0..500 {
            bus.trigger(OtherEvent(1));
            if rx.recv_timeout(Duration::from_millis(10)).is_ok() {
                woke = true;
                break;
            }
        }
        assert!(woke, "waiter never woke up");
        waiter.join().unwrap();
    }

    #[test]
    fn independent_buses_do_not_share_listeners() {
        let first = EventBus::new();
        let second = EventBus::new();
        first.register_listener(|_: OtherEvent| {});
        assert_eq!(first.listener_count::<OtherEvent>(), 1);
        assert_eq!(second.listener_count::<OtherEvent>(), 0);
    }
}
