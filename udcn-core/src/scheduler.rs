//! Min-heap scheduler driving timeouts, reaping, and cache eviction
//! (spec.md §4.1).
//!
//! Ordering is strictly by due time, ties broken by insertion sequence
//! (spec.md §5 "scheduled events with the same due time fire in FIFO
//! insertion order"). Not `Send`/`Sync`: it is owned and driven by exactly
//! one dispatcher task, matching the single-threaded cooperative model.

use crate::clock::MonotonicClock;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashMap;

/// Callbacks may re-arm by returning `Some(delay_us)` or remove themselves
/// by returning `None`. `cancelled` is true exactly once: the single
/// cancellation invocation described in spec.md §4.1.
pub trait Callback {
    fn run(&mut self, cancelled: bool) -> Option<u64>;
}

impl<F> Callback for F
where
    F: FnMut(bool) -> Option<u64>,
{
    fn run(&mut self, cancelled: bool) -> Option<u64> {
        self(cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

struct Entry {
    due_time_us: u64,
    seq: u64,
    handle: Handle,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due_time_us == other.due_time_us && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the earliest due time (and for
        // ties, the earliest seq) to compare greatest so it pops first.
        other
            .due_time_us
            .cmp(&self.due_time_us)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sentinel meaning "no pending work" (spec.md §4.1 `run_once()` return).
pub const NO_PENDING_WORK: u64 = u64::MAX;

pub struct Scheduler {
    clock: MonotonicClock,
    heap: BinaryHeap<Entry>,
    callbacks: HashMap<u64, Box<dyn Callback>>,
    next_seq: u64,
    next_handle: u64,
}

impl Scheduler {
    pub fn new(clock: MonotonicClock) -> Self {
        Self {
            clock,
            heap: BinaryHeap::new(),
            callbacks: HashMap::new(),
            next_seq: 0,
            next_handle: 0,
        }
    }

    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    pub fn schedule(&mut self, delay_us: u64, callback: impl Callback + 'static) -> Handle {
        let handle_id = self.next_handle;
        self.next_handle += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        let due_time_us = self.clock.now_us().saturating_add(delay_us);
        self.callbacks.insert(handle_id, Box::new(callback));
        self.heap.push(Entry { due_time_us, seq, handle: Handle(handle_id) });
        Handle(handle_id)
    }

    /// Invokes the callback once more with `cancelled = true` so it can
    /// release owned resources, then drops it. No-op if the handle already
    /// fired or was already cancelled.
    pub fn cancel(&mut self, handle: Handle) {
        if let Some(mut callback) = self.callbacks.remove(&handle.0) {
            callback.run(true);
        }
        // The heap entry for a cancelled handle is left in place and
        // filtered out lazily in run_once -- removing mid-heap would need a
        // linear scan, and a dead entry costs only a cheap lookup miss.
    }

    /// Executes every callback whose due time has passed; re-arms those
    /// that return `Some(delay)`. Returns the microseconds until the next
    /// due event, or `NO_PENDING_WORK`.
    pub fn run_once(&mut self) -> u64 {
        let now = self.clock.now_us();
        loop {
            let Some(top) = self.heap.peek() else { break };
            if top.due_time_us > now {
                break;
            }
            let entry = self.heap.pop().unwrap();
            let Some(mut callback) = self.callbacks.remove(&entry.handle.0) else {
                continue; // cancelled since being scheduled
            };
            if let Some(delay) = callback.run(false) {
                let seq = self.next_seq;
                self.next_seq += 1;
                let due_time_us = now.saturating_add(delay);
                self.callbacks.insert(entry.handle.0, callback);
                self.heap.push(Entry { due_time_us, seq, handle: entry.handle });
            }
        }

        match self.heap.peek() {
            Some(top) => top.due_time_us.saturating_sub(self.clock.now_us()),
            None => NO_PENDING_WORK,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.callbacks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fires_once_and_reports_no_pending_work() {
        let mut scheduler = Scheduler::new(MonotonicClock::new());
        let fired = Rc::new(RefCell::new(0));
        let fired_cb = fired.clone();
        scheduler.schedule(0, move |_cancelled| {
            *fired_cb.borrow_mut() += 1;
            None
        });
        std::thread::sleep(std::time::Duration::from_millis(1));
        let next = scheduler.run_once();
        assert_eq!(*fired.borrow(), 1);
        assert_eq!(next, NO_PENDING_WORK);
    }

    #[test]
    fn cancel_invokes_callback_exactly_once_with_cancel_flag() {
        let mut scheduler = Scheduler::new(MonotonicClock::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_cb = log.clone();
        let handle = scheduler.schedule(60_000_000, move |cancelled| {
            log_cb.borrow_mut().push(cancelled);
            None
        });
        scheduler.cancel(handle);
        std::thread::sleep(std::time::Duration::from_millis(1));
        scheduler.run_once();
        assert_eq!(*log.borrow(), vec![true]);
    }

    #[test]
    fn ties_fire_in_insertion_order() {
        let mut scheduler = Scheduler::new(MonotonicClock::new());
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..5 {
            let order_cb = order.clone();
            scheduler.schedule(0, move |_| {
                order_cb.borrow_mut().push(i);
                None
            });
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
        scheduler.run_once();
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn rearm_with_positive_delay_reschedules() {
        let mut scheduler = Scheduler::new(MonotonicClock::new());
        let count = Rc::new(RefCell::new(0));
        let count_cb = count.clone();
        scheduler.schedule(0, move |cancelled| {
            if cancelled {
                return None;
            }
            let mut c = count_cb.borrow_mut();
            *c += 1;
            if *c < 3 {
                Some(0)
            } else {
                None
            }
        });
        for _ in 0..3 {
            std::thread::sleep(std::time::Duration::from_millis(1));
            scheduler.run_once();
        }
        assert_eq!(*count.borrow(), 3);
    }
}
