//! Stage timers.
//!
//! Timers never run user code themselves: each fire posts a
//! [`StageMessage::Timer`] into the owning stage's mailbox and the stage
//! handler looks up what the id means. A repeat timer keeps at most one
//! fire in the mailbox at a time: while a fire is still queued behind a
//! saturated stage, further periods are coalesced into it instead of
//! stacking duplicates. Cancellation is idempotent; fires already queued
//! when a timer is canceled are dropped at dispatch.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use tokio::task::JoinHandle;

// Layer 3: Internal module imports
use super::event_loop::Postbox;
use super::message::StageMessage;

/// Handle to a stage timer, unique within its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

struct TimerEntry {
    handle: JoinHandle<()>,
    /// Set while a fire sits in the mailbox; repeat timers only.
    in_flight: Option<Arc<AtomicBool>>,
}

pub(crate) struct TimerSet {
    next_id: u64,
    tasks: HashMap<TimerId, TimerEntry>,
}

impl TimerSet {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            tasks: HashMap::new(),
        }
    }

    /// Fire after `initial_delay`, then every `period`, until canceled.
    ///
    /// A period that elapses while the previous fire is still unprocessed
    /// posts nothing; the backlog collapses into the one pending fire.
    pub(crate) fn add_repeat(
        &mut self,
        postbox: Postbox,
        initial_delay: Duration,
        period: Duration,
    ) -> TimerId {
        let id = self.take_id();
        let in_flight = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&in_flight);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            loop {
                if flag.swap(true, Ordering::AcqRel) {
                    // Previous fire still queued; coalesce this period.
                } else if !postbox.post(StageMessage::Timer(id)) {
                    return;
                }
                tokio::time::sleep(period).await;
            }
        });
        self.tasks.insert(
            id,
            TimerEntry {
                handle,
                in_flight: Some(in_flight),
            },
        );
        id
    }

    /// Fire after `initial_delay`, then every `period`, `count` times in
    /// total. The timer removes itself after the last fire.
    pub(crate) fn add_count(
        &mut self,
        postbox: Postbox,
        initial_delay: Duration,
        count: u32,
        period: Duration,
    ) -> TimerId {
        let id = self.take_id();
        let handle = tokio::spawn(async move {
            if count == 0 {
                return;
            }
            tokio::time::sleep(initial_delay).await;
            for fired in 0..count {
                if !postbox.post(StageMessage::Timer(id)) {
                    return;
                }
                if fired + 1 < count {
                    tokio::time::sleep(period).await;
                }
            }
        });
        self.tasks.insert(
            id,
            TimerEntry {
                handle,
                in_flight: None,
            },
        );
        id
    }

    /// Cancel a timer. Idempotent: unknown and already-expired ids are a
    /// no-op.
    pub(crate) fn cancel(&mut self, id: TimerId) {
        if let Some(entry) = self.tasks.remove(&id) {
            entry.handle.abort();
        }
    }

    /// Accept a queued fire for dispatch.
    ///
    /// Returns `false` for canceled timers (the fire is dropped). For a
    /// live repeat timer the in-flight flag is cleared here, before the
    /// handler runs, so the next period may post again.
    pub(crate) fn acknowledge_fire(&mut self, id: TimerId) -> bool {
        match self.tasks.get(&id) {
            Some(entry) => {
                if let Some(flag) = &entry.in_flight {
                    flag.store(false, Ordering::Release);
                }
                true
            }
            None => false,
        }
    }

    /// Drop the bookkeeping for a count timer whose task has finished.
    pub(crate) fn prune_finished(&mut self, id: TimerId) {
        if self
            .tasks
            .get(&id)
            .map(|entry| entry.handle.is_finished())
            .unwrap_or(false)
        {
            self.tasks.remove(&id);
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, entry) in self.tasks.drain() {
            entry.handle.abort();
        }
    }

    fn take_id(&mut self) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
