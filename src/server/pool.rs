//! The fixed-size connection pool.
//!
//! A pool tracks `capacity` connection records by state: one doubly-linked
//! list per state, ordered by last transition time with the oldest record
//! at the head. Links are small integer indices into a single arena, so a
//! record moves between lists without any allocation. Each state may carry
//! a timeout; [`Pool::next_expired`] surfaces records whose age in their
//! current state has exceeded it.
//!
//! The pool never reads a clock: callers supply `Instant`s, which keeps
//! aging deterministic under test.

use std::time::{Duration, Instant};

use tracing::trace;

use super::conn::ConnState;

const NIL: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct Slot {
    state: ConnState,
    prev: usize,
    next: usize,
    since: Instant,
}

#[derive(Debug, Clone, Copy)]
struct List {
    head: usize,
    tail: usize,
    len: usize,
}

impl List {
    fn empty() -> List {
        List {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }
}

/// Per-state timeout table; `None` disables aging for that state.
pub type Timeouts = [Option<Duration>; ConnState::COUNT];

pub struct Pool {
    slots: Box<[Slot]>,
    lists: [List; ConnState::COUNT],
    timeouts: Timeouts,
}

impl Pool {
    /// A pool of `capacity` records, all starting out `Free`.
    pub fn new(capacity: usize, timeouts: Timeouts, now: Instant) -> Pool {
        let slots = (0..capacity)
            .map(|i| Slot {
                state: ConnState::Free,
                prev: if i == 0 { NIL } else { i - 1 },
                next: if i + 1 == capacity { NIL } else { i + 1 },
                since: now,
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let mut lists = [List::empty(); ConnState::COUNT];
        if capacity > 0 {
            lists[ConnState::Free.index()] = List {
                head: 0,
                tail: capacity - 1,
                len: capacity,
            };
        }

        Pool {
            slots,
            lists,
            timeouts,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn state(&self, index: usize) -> ConnState {
        self.slots[index].state
    }

    /// Records currently in `state`.
    pub fn count(&self, state: ConnState) -> usize {
        self.lists[state.index()].len
    }

    /// The record that has been in `state` the longest.
    pub fn oldest(&self, state: ConnState) -> Option<usize> {
        match self.lists[state.index()].head {
            NIL => None,
            index => Some(index),
        }
    }

    /// Detaches the oldest record in `from` and relinks it as the newest
    /// in `to`. Returns `None` when `from` is empty.
    pub fn take_oldest(&mut self, from: ConnState, to: ConnState, now: Instant) -> Option<usize> {
        let index = self.oldest(from)?;
        self.unlink(index);
        self.push_newest(index, to, now);
        trace!("pool: {} {:?} -> {:?} (oldest)", index, from, to);
        Some(index)
    }

    /// Moves `index` from `from` to `to`, stamping the transition time.
    ///
    /// # Panics
    ///
    /// Panics if the record is not currently in `from`; state transitions
    /// are contract-checked.
    pub fn set_state(&mut self, index: usize, from: ConnState, to: ConnState, now: Instant) {
        assert_eq!(
            self.slots[index].state,
            from,
            "pool: record {} is not in state {:?}",
            index,
            from
        );
        self.unlink(index);
        self.push_newest(index, to, now);
        trace!("pool: {} {:?} -> {:?}", index, from, to);
    }

    /// The oldest record whose age in its current state has reached that
    /// state's timeout. The caller is expected to transition the record
    /// (ultimately back to `Free`, which has no timeout) before calling
    /// again, otherwise the same record is returned.
    pub fn next_expired(&self, now: Instant) -> Option<(usize, ConnState)> {
        for &state in ConnState::ALL.iter() {
            let timeout = match self.timeouts[state.index()] {
                Some(t) => t,
                None => continue,
            };
            let head = self.lists[state.index()].head;
            if head == NIL {
                continue;
            }
            let age = now.checked_duration_since(self.slots[head].since);
            if age.map_or(false, |age| age >= timeout) {
                return Some((head, state));
            }
        }
        None
    }

    fn unlink(&mut self, index: usize) {
        let Slot {
            prev, next, state, ..
        } = self.slots[index];
        let li = state.index();
        if prev == NIL {
            self.lists[li].head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.lists[li].tail = prev;
        } else {
            self.slots[next].prev = prev;
        }
        self.lists[li].len -= 1;
    }

    fn push_newest(&mut self, index: usize, state: ConnState, now: Instant) {
        let li = state.index();
        let tail = self.lists[li].tail;
        self.slots[index] = Slot {
            state,
            prev: tail,
            next: NIL,
            since: now,
        };
        if tail == NIL {
            self.lists[li].head = index;
        } else {
            self.slots[tail].next = index;
        }
        self.lists[li].tail = index;
        self.lists[li].len += 1;
    }
}
