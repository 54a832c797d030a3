use std::{
    cmp::Reverse,
    collections::HashMap,
    time::{Duration, Instant},
};

use keyed_priority_queue::KeyedPriorityQueue;

/// Opaque identity of a scheduled timer, used to stop or restart it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    Periodic,
    OneShot,
}

struct Timer<E> {
    event: E,
    interval: Duration,
    mode: TimerMode,
}

/// Periodic and one-shot timers ordered by deadline.
///
/// The scheduler never calls back into its owner. Expired timers are handed out by
/// [`TimerScheduler::pop_expired`] and the control loop dispatches the returned
/// event synchronously, so a callback can never run concurrently with frame
/// processing.
pub struct TimerScheduler<E> {
    deadlines: KeyedPriorityQueue<TimerHandle, Reverse<(Instant, TimerHandle)>>,
    timers: HashMap<TimerHandle, Timer<E>>,
    next_handle: u32,
}

impl<E: Copy> TimerScheduler<E> {
    #[inline]
    fn check_rep(&self) {
        assert_eq!(self.deadlines.len(), self.timers.len());
    }

    #[must_use]
    pub fn new() -> Self {
        let this = TimerScheduler {
            deadlines: KeyedPriorityQueue::new(),
            timers: HashMap::new(),
            next_handle: 0,
        };
        this.check_rep();
        this
    }

    pub fn start_periodic(&mut self, event: E, period: Duration, now: Instant) -> TimerHandle {
        self.start(event, period, TimerMode::Periodic, now)
    }

    pub fn start_one_shot(&mut self, event: E, delay: Duration, now: Instant) -> TimerHandle {
        self.start(event, delay, TimerMode::OneShot, now)
    }

    fn start(&mut self, event: E, interval: Duration, mode: TimerMode, now: Instant) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.timers.insert(
            handle,
            Timer {
                event,
                interval,
                mode,
            },
        );
        self.deadlines.push(handle, Reverse((now + interval, handle)));
        self.check_rep();
        handle
    }

    /// Cancels a timer. Returns `false` if it had already fired (one-shot) or was
    /// stopped before.
    pub fn stop(&mut self, handle: TimerHandle) -> bool {
        let removed = self.timers.remove(&handle).is_some();
        self.deadlines.remove(&handle);
        self.check_rep();
        removed
    }

    /// Re-arms a live timer one full interval from `now`.
    pub fn restart(&mut self, handle: TimerHandle, now: Instant) -> bool {
        let interval = match self.timers.get(&handle) {
            Some(timer) => timer.interval,
            None => return false,
        };
        self.deadlines.push(handle, Reverse((now + interval, handle)));
        self.check_rep();
        true
    }

    #[must_use]
    pub fn is_active(&self, handle: TimerHandle) -> bool {
        self.timers.contains_key(&handle)
    }

    #[must_use]
    pub fn deadline(&self, handle: TimerHandle) -> Option<Instant> {
        self.deadlines
            .get_priority(&handle)
            .map(|Reverse((deadline, _))| *deadline)
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines
            .peek()
            .map(|(_, Reverse((deadline, _)))| *deadline)
    }

    /// Takes the earliest timer whose deadline is at or before `now`.
    ///
    /// One-shot timers are removed; periodic timers are re-armed one period after
    /// their deadline, or after `now` if the loop fell more than a period behind.
    pub fn pop_expired(&mut self, now: Instant) -> Option<(TimerHandle, E)> {
        match self.next_deadline() {
            Some(deadline) if deadline <= now => (),
            _ => return None,
        }
        let (handle, Reverse((deadline, _))) = self.deadlines.pop()?;
        let (event, interval, mode) = {
            let timer = self.timers.get(&handle)?;
            (timer.event, timer.interval, timer.mode)
        };
        match mode {
            TimerMode::OneShot => {
                self.timers.remove(&handle);
            }
            TimerMode::Periodic => {
                let mut next = deadline + interval;
                if next <= now {
                    next = now + interval;
                }
                self.deadlines.push(handle, Reverse((next, handle)));
            }
        }
        self.check_rep();
        Some((handle, event))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl<E: Copy> Default for TimerScheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}
