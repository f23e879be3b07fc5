// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, TryLockError};

/// Unbounded FIFO shared between any number of producers and consumers.
///
/// `pop` parks the calling thread on a condition variable until an item is
/// available. This queue carries the worker pool's commands and the entries
/// of the queued log sink.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Appends `item` and wakes one blocked consumer.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock().expect("blocking queue poisoned");
        items.push_back(item);
        drop(items);
        self.available.notify_one();
    }

    /// Best-effort push that never waits for the lock.
    ///
    /// Hands the item back if another thread currently holds the queue.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        match self.items.try_lock() {
            Ok(mut items) => {
                items.push_back(item);
                drop(items);
                self.available.notify_one();
                Ok(())
            }
            Err(TryLockError::WouldBlock) => Err(item),
            Err(TryLockError::Poisoned(_)) => panic!("blocking queue poisoned"),
        }
    }

    /// Removes the oldest item, blocking until one exists.
    pub fn pop(&self) -> T {
        let mut items = self.items.lock().expect("blocking queue poisoned");
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = self
                .available
                .wait(items)
                .expect("blocking queue poisoned");
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.items
            .lock()
            .expect("blocking queue poisoned")
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("blocking queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
