use log::*;
use num_complex::Complex32;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Weak;

use crate::buffer::{BufferElement, RingBuffer, FRAME_ID_MODULUS};

/// Frame id sequence of one source, wrapping at `FRAME_ID_MODULUS`.
#[derive(Debug, Default)]
pub struct FrameCounter(AtomicUsize);

impl FrameCounter {
    pub fn new() -> FrameCounter {
        FrameCounter(AtomicUsize::new(0))
    }

    pub fn current(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    /// Moves to the next id and returns it.
    pub fn advance(&self) -> usize {
        let next = (self.current() + 1) % FRAME_ID_MODULUS;
        self.0.store(next, Ordering::Relaxed);
        next
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// The producer loop shared by every backend.
///
/// `fill` loads one frame worth of samples and reports how many it actually
/// obtained; anything short of `frame_size` marks the frame as overflowed.
/// Runs until `stop` is raised, which is only checked between frames.
pub(crate) fn run<F>(
    name: &str,
    ring: &Weak<RingBuffer>,
    stop: &AtomicBool,
    frame_size: usize,
    frame_id: &FrameCounter,
    mut fill: F,
) where
    F: FnMut(&mut [Complex32]) -> usize,
{
    let ring = match ring.upgrade() {
        Some(ring) => ring,
        None => {
            error!("{} recv thread has no ring buffer to feed", name);
            frame_id.reset();
            return;
        }
    };

    info!("Starting {} recv thread", name);

    let mut overflows: u64 = 0;

    while !stop.load(Ordering::Acquire) {
        let mut samples = vec![Complex32::new(0.0, 0.0); frame_size];
        let obtained = fill(&mut samples);
        let overflow = obtained < frame_size;
        if overflow {
            overflows += 1;
            debug!(
                "{}: frame {} short, got {} of {} samples",
                name,
                frame_id.current(),
                obtained,
                frame_size
            );
        }

        let occupancy = ring.push(BufferElement::new(frame_id.current(), samples, overflow));
        ring.notify_after_push(occupancy);

        if ring.frame_thread_started() {
            ring.semaphore().post();
        }

        frame_id.advance();
    }

    frame_id.reset();
    info!(
        "Finishing {} recv thread ({} overflowed frames)",
        name, overflows
    );
}
