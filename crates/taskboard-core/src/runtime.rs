//! Host seams for time and deferred work.
//!
//! Everything runs on one thread. Stores read the current time through a
//! [`Clock`] and hand one-shot callbacks to a [`Scheduler`]; the browser host
//! backs these with `Date` and `setTimeout`, tests and the CLI use the manual
//! implementations below.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::trace;

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug)]
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Cell::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now.set(now);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + to_delta(by));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

pub type Deferred = Box<dyn FnOnce()>;

/// One-shot, uncancellable deferred execution on the UI thread.
pub trait Scheduler {
    fn schedule_once(&self, delay: Duration, task: Deferred);
}

struct Pending {
    due: DateTime<Utc>,
    seq: u64,
    task: Deferred,
}

/// Queues callbacks against a clock and runs them when asked.
pub struct ManualScheduler {
    clock: Rc<dyn Clock>,
    queue: RefCell<Vec<Pending>>,
    next_seq: Cell<u64>,
}

impl ManualScheduler {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            queue: RefCell::new(Vec::new()),
            next_seq: Cell::new(0),
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Runs every callback due at or before the clock's current time, in due
    /// order. Callbacks may schedule more work; anything already due runs in
    /// the same call. Returns how many callbacks ran.
    pub fn run_due(&self) -> usize {
        let mut ran = 0;
        loop {
            let now = self.clock.now();
            let next = {
                let mut queue = self.queue.borrow_mut();
                let position = queue
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.due <= now)
                    .min_by_key(|(_, p)| (p.due, p.seq))
                    .map(|(idx, _)| idx);
                position.map(|idx| queue.remove(idx))
            };

            let Some(pending) = next else {
                break;
            };
            trace!(seq = pending.seq, "running deferred task");
            (pending.task)();
            ran += 1;
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, task: Deferred) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let due = self.clock.now() + to_delta(delay);
        self.queue.borrow_mut().push(Pending { due, seq, task });
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
    TimeDelta::try_milliseconds(millis).unwrap_or(TimeDelta::MAX)
}
