//! Discrete-event scheduler
//!
//! [`Simulator`] is a cheap clonable handle to a single-threaded event
//! queue. Events are closures ordered by `(time, insertion order)`, so two
//! events scheduled for the same instant always run in the order they were
//! scheduled. Simulated time never moves backwards.

use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::fmt::{self, Display};
use std::ops::{Add, Sub};
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// A point in simulated time, nanoseconds since the simulation started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Time elapsed since the simulation started
    pub fn since_start(&self) -> Duration {
        Duration::from_nanos(self.0)
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> Self::Output {
        let nanos = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
        SimTime(self.0.saturating_add(nanos))
    }
}

impl Sub for SimTime {
    type Output = Duration;

    fn sub(self, rhs: SimTime) -> Self::Output {
        Duration::from_nanos(self.0.saturating_sub(rhs.0))
    }
}

impl Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}.{:09}s", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

thread_local! {
    static CLOCK: Cell<SimTime> = const { Cell::new(SimTime::ZERO) };
}

/// Simulated time of the simulator most recently driven on this thread
///
/// Log formatters read this to stamp records with simulated time.
pub fn current_sim_time() -> SimTime {
    CLOCK.with(Cell::get)
}

/// Handle to a scheduled event, usable for cancellation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display,
)]
#[display("ev{_0}")]
pub struct EventId(u64);

struct Event {
    time: SimTime,
    id: EventId,
    task: Box<dyn FnOnce()>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("time", &self.time)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.id).cmp(&(other.time, other.id))
    }
}

/// A queue of events ordered by their times
#[derive(Debug)]
struct EventQueue {
    queue: BinaryHeap<Reverse<Event>>,
    last_popped_event_time: SimTime,
}

impl EventQueue {
    fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            last_popped_event_time: SimTime::ZERO,
        }
    }

    /// Will panic if the event time is earlier than the last popped event
    /// time (time moves backward).
    fn push(&mut self, event: Event) {
        assert!(event.time >= self.last_popped_event_time);
        self.queue.push(Reverse(event));
    }

    fn pop(&mut self) -> Option<Event> {
        let event = self.queue.pop().map(|x| x.0);

        // make sure time never moves backward
        if let Some(ref event) = event {
            assert!(event.time >= self.last_popped_event_time);
            self.last_popped_event_time = event.time;
        }

        event
    }

    fn next_event_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|x| x.0.time)
    }
}

struct SimulatorInner {
    now: Cell<SimTime>,
    queue: RefCell<EventQueue>,
    pending: RefCell<HashSet<EventId>>,
    next_id: Cell<u64>,
    scheduled: Cell<u64>,
    executed: Cell<u64>,
    stopped: Cell<bool>,
}

/// Deterministic single-threaded discrete-event simulator
#[derive(Clone)]
pub struct Simulator {
    inner: Rc<SimulatorInner>,
}

impl Simulator {
    pub fn new() -> Self {
        CLOCK.with(|c| c.set(SimTime::ZERO));
        Self {
            inner: Rc::new(SimulatorInner {
                now: Cell::new(SimTime::ZERO),
                queue: RefCell::new(EventQueue::new()),
                pending: RefCell::new(HashSet::new()),
                next_id: Cell::new(0),
                scheduled: Cell::new(0),
                executed: Cell::new(0),
                stopped: Cell::new(false),
            }),
        }
    }

    /// Current simulated time
    pub fn now(&self) -> SimTime {
        self.inner.now.get()
    }

    /// Schedule `task` to run `delay` after the current time
    pub fn schedule(&self, delay: Duration, task: impl FnOnce() + 'static) -> EventId {
        self.schedule_at(self.now() + delay, task)
    }

    /// Schedule `task` at the current instant, after everything already
    /// scheduled for this instant
    pub fn schedule_now(&self, task: impl FnOnce() + 'static) -> EventId {
        self.schedule_at(self.now(), task)
    }

    /// Schedule `task` at an absolute time, which must not be in the past
    pub fn schedule_at(&self, time: SimTime, task: impl FnOnce() + 'static) -> EventId {
        let id = EventId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);
        self.inner.scheduled.set(self.inner.scheduled.get() + 1);
        self.inner.pending.borrow_mut().insert(id);
        self.inner.queue.borrow_mut().push(Event {
            time,
            id,
            task: Box::new(task),
        });
        trace!(event = %id, at = %time, "Event scheduled");
        id
    }

    /// Cancel a pending event; returns `false` if it already ran or was
    /// cancelled before
    pub fn cancel(&self, id: EventId) -> bool {
        self.inner.pending.borrow_mut().remove(&id)
    }

    pub fn is_pending(&self, id: EventId) -> bool {
        self.inner.pending.borrow().contains(&id)
    }

    /// Number of events still waiting to run
    pub fn pending_events(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// Number of events ever scheduled
    pub fn scheduled_total(&self) -> u64 {
        self.inner.scheduled.get()
    }

    /// Number of events that have run
    pub fn executed_total(&self) -> u64 {
        self.inner.executed.get()
    }

    /// Time of the next live event
    pub fn next_event_time(&self) -> Option<SimTime> {
        self.skip_cancelled();
        self.inner.queue.borrow().next_event_time()
    }

    fn skip_cancelled(&self) {
        let mut queue = self.inner.queue.borrow_mut();
        let pending = self.inner.pending.borrow();
        while let Some(Reverse(event)) = queue.queue.peek() {
            if pending.contains(&event.id) {
                break;
            }
            queue.queue.pop();
        }
    }

    /// Run the next live event; returns `false` when the queue is empty
    pub fn step(&self) -> bool {
        self.skip_cancelled();
        // release the queue borrow before running so the task can schedule
        let Some(event) = self.inner.queue.borrow_mut().pop() else {
            return false;
        };
        self.inner.pending.borrow_mut().remove(&event.id);
        self.set_now(event.time);
        self.inner.executed.set(self.inner.executed.get() + 1);
        trace!(event = %event.id, now = %event.time, "Event running");
        (event.task)();
        true
    }

    /// Run until the queue drains or [`Simulator::stop`] is called
    pub fn run(&self) {
        self.inner.stopped.set(false);
        while !self.inner.stopped.get() && self.step() {}
    }

    /// Run every event scheduled up to and including `until`, then advance
    /// the clock to `until`
    pub fn run_until(&self, until: SimTime) {
        self.inner.stopped.set(false);
        while !self.inner.stopped.get() {
            match self.next_event_time() {
                Some(time) if time <= until => {
                    self.step();
                }
                _ => break,
            }
        }
        if !self.inner.stopped.get() && until > self.now() {
            self.set_now(until);
            self.inner.queue.borrow_mut().last_popped_event_time = until;
        }
    }

    /// Run for `duration` of simulated time from now
    pub fn run_for(&self, duration: Duration) {
        self.run_until(self.now() + duration);
    }

    fn set_now(&self, time: SimTime) {
        self.inner.now.set(time);
        CLOCK.with(|c| c.set(time));
    }

    /// Stop a running [`Simulator::run`] after the current event
    pub fn stop(&self) {
        self.inner.stopped.set(true);
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("now", &self.now())
            .field("pending", &self.pending_events())
            .finish()
    }
}
