use log::*;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::{BufferElement, RingBuffer, FRAME_ID_MODULUS};

/// Consumer side of the ring buffer handshake.
///
/// While the ring warms up the reader walks the slots in order, parking on
/// each slot's condition variable. After the last slot it raises the ring's
/// frame-thread-started flag and from then on waits on the semaphore, taking
/// the newest frame on every post.
pub struct FrameReader {
    ring: Arc<RingBuffer>,
    next_slot: usize,
    last_frame_id: Option<usize>,
    missed: u64,
    overflowed: u64,
}

impl FrameReader {
    pub fn new(ring: Arc<RingBuffer>) -> FrameReader {
        FrameReader {
            ring,
            next_slot: 0,
            last_frame_id: None,
            missed: 0,
            overflowed: 0,
        }
    }

    /// True once the reader has switched to semaphore waits.
    pub fn is_steady(&self) -> bool {
        self.next_slot >= self.ring.capacity()
    }

    /// Frames the producer pushed that this reader never saw.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Frames returned with the overflow flag set.
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    pub fn next_frame(&mut self) -> BufferElement {
        loop {
            if let Some(frame) = self.next_inner(None) {
                return frame;
            }
        }
    }

    /// Like `next_frame`, giving up after `timeout` without a new frame.
    pub fn next_frame_timeout(&mut self, timeout: Duration) -> Option<BufferElement> {
        self.next_inner(Some(timeout))
    }

    fn next_inner(&mut self, timeout: Option<Duration>) -> Option<BufferElement> {
        if !self.is_steady() {
            let slot = self.next_slot;
            let frame = match timeout {
                Some(timeout) => self.ring.wait_slot_timeout(slot, timeout)?,
                None => self.ring.wait_slot(slot)?,
            };
            self.next_slot += 1;
            if self.is_steady() {
                debug!("ring warm after {} slots, switching to semaphore", slot + 1);
                self.ring.set_frame_thread_started(true);
            }
            return Some(self.observe(frame));
        }

        loop {
            match timeout {
                Some(timeout) => {
                    if !self.ring.semaphore().wait_timeout(timeout) {
                        return None;
                    }
                }
                None => self.ring.semaphore().wait(),
            }

            let frame = self.ring.latest()?;
            // several posts can land before we look; each frame once
            if Some(frame.frame_id) != self.last_frame_id {
                return Some(self.observe(frame));
            }
        }
    }

    fn observe(&mut self, frame: BufferElement) -> BufferElement {
        if let Some(last) = self.last_frame_id {
            let step = (frame.frame_id + FRAME_ID_MODULUS - last) % FRAME_ID_MODULUS;
            if step > 1 {
                self.missed += (step - 1) as u64;
                trace!("skipped {} frames before frame {}", step - 1, frame.frame_id);
            }
        }
        if frame.overflow {
            self.overflowed += 1;
        }
        self.last_frame_id = Some(frame.frame_id);
        frame
    }
}
