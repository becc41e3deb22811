use crossbeam_utils::CachePadded;
use log::*;
use num_complex::Complex32;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::SourceError;

/// Frame ids wrap back to zero at this value.
pub const FRAME_ID_MODULUS: usize = 6000;

/// One frame of complex baseband samples as handed to consumers.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferElement {
    pub frame_id: usize,
    pub samples: Vec<Complex32>,
    /// Set when fewer than `samples.len()` samples were actually obtained.
    pub overflow: bool,
}

impl BufferElement {
    pub fn new(frame_id: usize, samples: Vec<Complex32>, overflow: bool) -> BufferElement {
        BufferElement {
            frame_id,
            samples,
            overflow,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Counting semaphore, the steady-state wake-up signal for frame consumers.
pub struct Semaphore {
    count: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Semaphore {
        Semaphore {
            count: Mutex::new(initial),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn post(&self) {
        *self.lock() += 1;
        self.available.notify_one();
    }

    pub fn wait(&self) {
        let guard = self.lock();
        let mut count = self
            .available
            .wait_while(guard, |count| *count == 0)
            .unwrap_or_else(PoisonError::into_inner);
        *count -= 1;
    }

    /// Returns false if no permit showed up within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (mut count, _) = self
            .available
            .wait_timeout_while(guard, timeout, |count| *count == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    pub fn try_wait(&self) -> bool {
        let mut count = self.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    pub fn value(&self) -> usize {
        *self.lock()
    }
}

/// Fixed-capacity frame buffer shared by one producer and any number of
/// consumers.
///
/// Occupancy grows with every push until it reaches the capacity, after which
/// each push evicts the oldest frame. Every slot index owns a condition
/// variable that producers signal while the buffer warms up; once warm the
/// semaphore takes over as the only wake-up signal. Warm-up happens once per
/// buffer, however many times a producer loop is restarted on it.
pub struct RingBuffer {
    capacity: usize,
    frames: Mutex<VecDeque<BufferElement>>,
    slot_signals: Vec<Condvar>,
    slot_notifications: Vec<AtomicU64>,
    warm: AtomicBool,
    last_notify: AtomicBool,
    semaphore: Semaphore,
    frame_thread_started: CachePadded<AtomicBool>,
    pushed: AtomicU64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Result<RingBuffer, SourceError> {
        if capacity == 0 {
            return Err(SourceError::InvalidCapacity);
        }

        Ok(RingBuffer {
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            slot_signals: (0..capacity).map(|_| Condvar::new()).collect(),
            slot_notifications: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            warm: AtomicBool::new(false),
            last_notify: AtomicBool::new(false),
            semaphore: Semaphore::new(0),
            frame_thread_started: CachePadded::new(AtomicBool::new(false)),
            pushed: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<BufferElement>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current occupancy.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of frames ever pushed.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Appends a frame, evicting the oldest one when full, and returns the
    /// occupancy right after the push.
    ///
    /// The frame is stored before this returns, so a slot notification sent
    /// afterwards always finds it in place.
    pub fn push(&self, element: BufferElement) -> usize {
        let mut frames = self.lock();
        if frames.len() == self.capacity {
            frames.pop_front();
        }
        trace!(
            "push frame {} ({} samples, overflow={})",
            element.frame_id,
            element.len(),
            element.overflow
        );
        frames.push_back(element);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        frames.len()
    }

    /// Wakes every consumer parked on `index`.
    pub fn notify_slot(&self, index: usize) {
        if let Some(signal) = self.slot_signals.get(index) {
            self.slot_notifications[index].fetch_add(1, Ordering::Relaxed);
            signal.notify_all();
        }
    }

    /// Per-slot notification step for a push that left the ring holding
    /// `occupancy` frames.
    ///
    /// Every push notifies the slot it landed in until the ring holds
    /// `capacity - 1` frames. That push arms one more notification, delivered
    /// on the following push, and then per-slot signalling stops for the
    /// lifetime of the buffer.
    pub fn notify_after_push(&self, occupancy: usize) {
        let slot = occupancy.saturating_sub(1);

        if self.last_notify.swap(false, Ordering::AcqRel) {
            self.notify_slot(slot);
        }
        if !self.warm.load(Ordering::Acquire) {
            self.notify_slot(slot);
            if occupancy + 1 == self.capacity {
                trace!("ring warm at {} frames, arming last slot notification", occupancy);
                self.last_notify.store(true, Ordering::Release);
                self.warm.store(true, Ordering::Release);
            }
        }
    }

    /// True once per-slot notification has stopped for good.
    pub fn bootstrap_finished(&self) -> bool {
        self.warm.load(Ordering::Acquire) && !self.last_notify.load(Ordering::Acquire)
    }

    /// How many times `index` has been notified.
    pub fn slot_notifications(&self, index: usize) -> u64 {
        self.slot_notifications
            .get(index)
            .map(|n| n.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn semaphore(&self) -> &Semaphore {
        &self.semaphore
    }

    pub fn frame_thread_started(&self) -> bool {
        self.frame_thread_started.load(Ordering::Acquire)
    }

    /// Set by the consumer side once it switches to semaphore waits.
    pub fn set_frame_thread_started(&self, started: bool) {
        self.frame_thread_started.store(started, Ordering::Release);
    }

    /// Blocks until slot `index` holds a frame and returns a copy of it.
    /// Returns `None` for an index past the capacity.
    pub fn wait_slot(&self, index: usize) -> Option<BufferElement> {
        let signal = self.slot_signals.get(index)?;
        let frames = signal
            .wait_while(self.lock(), |frames| frames.len() <= index)
            .unwrap_or_else(PoisonError::into_inner);
        frames.get(index).cloned()
    }

    pub fn wait_slot_timeout(&self, index: usize, timeout: Duration) -> Option<BufferElement> {
        let signal = self.slot_signals.get(index)?;
        let deadline = Instant::now() + timeout;
        let mut frames = self.lock();
        while frames.len() <= index {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            frames = signal
                .wait_timeout(frames, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        frames.get(index).cloned()
    }

    /// The most recently pushed frame.
    pub fn latest(&self) -> Option<BufferElement> {
        self.lock().back().cloned()
    }

    /// Copies out the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<BufferElement> {
        self.lock().iter().cloned().collect()
    }
}
