use std::collections::HashSet;
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex};

use super::{DebugEvent, EventCatalog};
use crate::runtime::DebugHook;

#[derive(Default)]
struct Slot {
    pending: Option<DebugEvent>,
    /// An event has been taken by the consumer and is being processed.
    in_flight: bool,
    produced: u64,
    consumed: u64,
    done: bool,
    /// Threads currently inside event delivery, producer or consumer side.
    delivering: HashSet<ThreadId>,
}

/// Hands runtime events one at a time from application threads to the
/// dispatch loop.
///
/// A producing thread blocks until its event has been fully processed, so a
/// suspension decided by the dispatch loop is in place before the thread
/// returns to the runtime. Events raised by a thread that is already inside
/// delivery are dropped.
pub struct EventDispatcher {
    catalog: Arc<EventCatalog>,
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl EventDispatcher {
    pub fn new(catalog: Arc<EventCatalog>) -> Self {
        Self {
            catalog,
            slot: Mutex::new(Slot::default()),
            cond: Condvar::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<EventCatalog> {
        &self.catalog
    }

    /// Publishes an event and waits until it has been processed.
    ///
    /// Returns `false` if the event was not processed: the calling thread was
    /// already delivering an event, or dispatch stopped first.
    pub fn produce(&self, event: DebugEvent) -> bool {
        let me = std::thread::current().id();
        let mut slot = self.slot.lock();
        if slot.delivering.contains(&me) {
            tracing::debug!(target: "sda.events", kind = ?event.kind, "dropping recursive event");
            return false;
        }
        slot.delivering.insert(me);

        while (slot.pending.is_some() || slot.in_flight) && !slot.done {
            self.cond.wait(&mut slot);
        }
        if slot.done {
            slot.delivering.remove(&me);
            return false;
        }

        slot.produced += 1;
        let ticket = slot.produced;
        slot.pending = Some(event);
        self.cond.notify_all();

        while slot.consumed < ticket && !slot.done {
            self.cond.wait(&mut slot);
        }
        slot.delivering.remove(&me);
        slot.consumed >= ticket
    }

    /// Waits for the next event and dispatches it. Returns `false` once
    /// dispatch has been stopped.
    pub fn consume_one(&self) -> bool {
        let me = std::thread::current().id();
        let event = {
            let mut slot = self.slot.lock();
            loop {
                if slot.done {
                    return false;
                }
                if let Some(event) = slot.pending.take() {
                    slot.in_flight = true;
                    slot.delivering.insert(me);
                    break event;
                }
                self.cond.wait(&mut slot);
            }
        };

        let vm_death = self.catalog.dispatch(&event);

        let mut slot = self.slot.lock();
        slot.in_flight = false;
        slot.consumed += 1;
        slot.delivering.remove(&me);
        if vm_death {
            tracing::info!(target: "sda.events", "debuggee died; stopping event dispatch");
            slot.done = true;
        }
        self.cond.notify_all();
        !slot.done
    }

    /// Runs the dispatch loop until [`EventDispatcher::quit`] is called or a
    /// VM death request matches.
    pub fn run(&self) {
        while self.consume_one() {}
        // Wake any application thread still parked on the slot.
        let mut slot = self.slot.lock();
        slot.pending = None;
        self.cond.notify_all();
        tracing::info!(target: "sda.events", "event dispatch stopped");
    }

    /// Stops dispatch and releases every waiting producer.
    pub fn quit(&self) {
        let mut slot = self.slot.lock();
        if !slot.done {
            tracing::info!(target: "sda.events", "shutting down event dispatch");
        }
        slot.done = true;
        self.cond.notify_all();
    }

    pub fn is_done(&self) -> bool {
        self.slot.lock().done
    }
}

impl DebugHook for EventDispatcher {
    fn notify(&self, event: DebugEvent) {
        self.produce(event);
    }

    fn is_active(&self) -> bool {
        !self.is_done()
    }
}
