//! Timer arena with generation-checked cancellation tokens.
//!
//! Nothing here sleeps or spawns: owners schedule deadlines, ask for the
//! earliest one, and pop whatever is due at an instant they supply. Tests
//! drive time through [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: Arc<AtomicU64>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.offset_ms.fetch_add(millis, Ordering::SeqCst);
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    slot: usize,
    generation: u64,
}

#[derive(Debug)]
struct Timer<K> {
    deadline: Instant,
    kind: K,
}

#[derive(Debug)]
struct Slot<K> {
    generation: u64,
    timer: Option<Timer<K>>,
}

#[derive(Debug)]
pub struct Scheduler<K> {
    slots: Vec<Slot<K>>,
    free: Vec<usize>,
}

impl<K> Default for Scheduler<K> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<K> Scheduler<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, deadline: Instant, kind: K) -> TimerToken {
        let timer = Some(Timer { deadline, kind });
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot];
            entry.generation += 1;
            entry.timer = timer;
            return TimerToken {
                slot,
                generation: entry.generation,
            };
        }

        self.slots.push(Slot {
            generation: 0,
            timer,
        });
        TimerToken {
            slot: self.slots.len() - 1,
            generation: 0,
        }
    }

    /// Returns `false` for tokens that already fired, were cancelled, or
    /// belong to a recycled slot.
    pub fn cancel(&mut self, token: TimerToken) -> bool {
        match self.slots.get_mut(token.slot) {
            Some(slot) if slot.generation == token.generation && slot.timer.is_some() => {
                slot.timer = None;
                self.free.push(token.slot);
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_pending(&self, token: TimerToken) -> bool {
        self.deadline(token).is_some()
    }

    #[must_use]
    pub fn deadline(&self, token: TimerToken) -> Option<Instant> {
        self.slots
            .get(token.slot)
            .filter(|slot| slot.generation == token.generation)
            .and_then(|slot| slot.timer.as_ref())
            .map(|timer| timer.deadline)
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .filter_map(|slot| slot.timer.as_ref().map(|timer| timer.deadline))
            .min()
    }

    /// Removes and returns every timer whose deadline is at or before `now`,
    /// earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<(TimerToken, K)> {
        let mut due = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.timer.as_ref().is_some_and(|timer| timer.deadline <= now) {
                if let Some(timer) = slot.timer.take() {
                    let token = TimerToken {
                        slot: index,
                        generation: slot.generation,
                    };
                    due.push((timer.deadline, token, timer.kind));
                    self.free.push(index);
                }
            }
        }

        due.sort_by_key(|(deadline, token, _)| (*deadline, token.slot));
        due.into_iter()
            .map(|(_, token, kind)| (token, kind))
            .collect()
    }

    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.timer.take().is_some() {
                self.free.push(index);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.timer.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
