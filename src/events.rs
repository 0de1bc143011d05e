// Copyright (c) 2016 The fixturehall developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A generic observable event (§4.7): a registry of closures behind a mutex, invoked in the
//! producer's context with a per-entry "run detached" flag, following design note (b) in
//! SPEC_FULL.md §9 ("Event hub").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::ServerError;

/// Opaque token returned by [`ObservableEvent::add_observer`], needed to unregister later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

/// Whether a handler is awaited by `notify` or dispatched fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// `notify` blocks until this handler returns.
    Synchronous,
    /// `notify` starts this handler on its own thread and does not wait for it; any panic
    /// inside it is swallowed rather than propagated.
    RunHandlerAsynchronously,
}

struct Observer<T> {
    token: ObserverToken,
    handler: Arc<dyn Fn(T) + Send + Sync>,
    mode: DispatchMode,
    #[allow(dead_code)]
    description: Option<String>,
}

/// A named notification channel with dynamic observer registration, optionally capped at
/// `max_observer_count` simultaneous observers (0 = unlimited).
pub struct ObservableEvent<T> {
    observers: Mutex<Vec<Observer<T>>>,
    max_observer_count: usize,
    next_token: AtomicU64,
}

impl<T: Clone + Send + 'static> ObservableEvent<T> {
    pub fn new(max_observer_count: usize) -> ObservableEvent<T> {
        ObservableEvent {
            observers: Mutex::new(Vec::new()),
            max_observer_count,
            next_token: AtomicU64::new(1),
        }
    }

    pub fn unbounded() -> ObservableEvent<T> {
        ObservableEvent::new(0)
    }

    /// Registers `handler`. Fails with [`ServerError::CapacityExceeded`] if this would exceed
    /// `max_observer_count`.
    pub fn add_observer<F>(&self, handler: F, mode: DispatchMode, description: Option<String>) -> Result<ObserverToken, ServerError>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let mut observers = self.observers.lock().unwrap();
        if self.max_observer_count != 0 && observers.len() >= self.max_observer_count {
            return Err(ServerError::CapacityExceeded(self.max_observer_count));
        }

        let token = ObserverToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        observers.push(Observer {
            token,
            handler: Arc::new(handler),
            mode,
            description,
        });
        Ok(token)
    }

    /// Idempotent: removing an already-removed (or never-registered) token is not an error.
    pub fn remove_observer(&self, token: ObserverToken) {
        let mut observers = self.observers.lock().unwrap();
        observers.retain(|o| o.token != token);
    }

    /// Invokes every registered observer, in insertion order, with a clone of `arg`.
    /// Synchronous observers run (and must complete) before this call returns; asynchronous
    /// ones are started in insertion order but may finish in any order.
    pub fn notify(&self, arg: T) {
        // Snapshot the handler Arcs under the lock, then release it before running anything: a
        // synchronous handler that tries to register/unregister on this same event would
        // otherwise deadlock, and a slow handler would otherwise hold up registration.
        let snapshot: Vec<(Arc<dyn Fn(T) + Send + Sync>, DispatchMode)> = {
            let observers = self.observers.lock().unwrap();
            observers.iter().map(|o| (o.handler.clone(), o.mode)).collect()
        };

        for (handler, mode) in snapshot {
            match mode {
                DispatchMode::Synchronous => handler(arg.clone()),
                DispatchMode::RunHandlerAsynchronously => {
                    let arg = arg.clone();
                    thread::spawn(move || {
                        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(arg)));
                    });
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.observers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn synchronous_observers_fire_in_order() {
        let event: ObservableEvent<i32> = ObservableEvent::unbounded();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        event.add_observer(move |v| o1.lock().unwrap().push(("a", v)), DispatchMode::Synchronous, None).unwrap();
        let o2 = order.clone();
        event.add_observer(move |v| o2.lock().unwrap().push(("b", v)), DispatchMode::Synchronous, None).unwrap();

        event.notify(42);
        assert_eq!(*order.lock().unwrap(), vec![("a", 42), ("b", 42)]);
    }

    #[test]
    fn capacity_exceeded_when_over_max() {
        let event: ObservableEvent<i32> = ObservableEvent::new(1);
        event.add_observer(|_| {}, DispatchMode::Synchronous, None).unwrap();
        let err = event.add_observer(|_| {}, DispatchMode::Synchronous, None).unwrap_err();
        match err {
            ServerError::CapacityExceeded(1) => {}
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn remove_observer_is_idempotent() {
        let event: ObservableEvent<i32> = ObservableEvent::unbounded();
        let token = event.add_observer(|_| {}, DispatchMode::Synchronous, None).unwrap();
        event.remove_observer(token);
        event.remove_observer(token);
        assert_eq!(event.len(), 0);
    }

    #[test]
    fn fire_and_forget_does_not_block_notify() {
        let event: ObservableEvent<i32> = ObservableEvent::unbounded();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        event
            .add_observer(
                move |v| {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    seen2.fetch_add(v as usize, Ordering::SeqCst);
                },
                DispatchMode::RunHandlerAsynchronously,
                None,
            )
            .unwrap();

        event.notify(5);
        // notify() must not have waited for the 20ms sleep.
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }
}
