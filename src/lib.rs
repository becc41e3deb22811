//! Sample acquisition for an SDR receive chain.
//!
//! A [`SampleSource`] fills fixed-size frames of complex baseband samples
//! from a capture file or a ZMQ publisher and hands them to consumers
//! through a shared [`RingBuffer`].

pub mod buffer;
pub mod error;
pub mod reader;
pub mod sdr;

pub use buffer::{BufferElement, RingBuffer, Semaphore, FRAME_ID_MODULUS};
pub use error::SourceError;
pub use reader::FrameReader;
pub use sdr::{
    open_source, spawn_loopback, FileSampleSource, MessageTransport, SampleSource,
    SchedulingHint, SourceLocator, StreamConfig, StreamSampleSource, Tuning, ZmqSubscriber,
};
