use crossbeam_channel::Receiver;
use log::*;
use num_complex::Complex32;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use super::iq::{self, SAMPLE_BYTES};
use super::loopback::{self, FrameCounter};
use super::{SampleSource, Tuning, TuningCell};
use crate::buffer::RingBuffer;
use crate::error::SourceError;

/// Message-oriented transport feeding a `StreamSampleSource`.
pub trait MessageTransport: Send {
    /// Blocks for the next whole message.
    fn recv_message(&mut self) -> Result<Vec<u8>, SourceError>;
}

/// In-process transport: each message on the channel is one payload.
impl MessageTransport for Receiver<Vec<u8>> {
    fn recv_message(&mut self) -> Result<Vec<u8>, SourceError> {
        self.recv()
            .map_err(|_| SourceError::Transport("sample channel disconnected".to_string()))
    }
}

/// Where and how to subscribe to a sample publisher.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamConfig {
    pub address: String,
    /// Upper bound on one receive. `None` blocks indefinitely.
    pub recv_timeout: Option<Duration>,
    pub recv_hwm: Option<i32>,
}

impl StreamConfig {
    pub fn new(address: impl Into<String>) -> StreamConfig {
        StreamConfig {
            address: address.into(),
            recv_timeout: None,
            recv_hwm: None,
        }
    }

    pub fn recv_timeout(mut self, timeout: Duration) -> StreamConfig {
        self.recv_timeout = Some(timeout);
        self
    }

    pub fn recv_hwm(mut self, hwm: i32) -> StreamConfig {
        self.recv_hwm = Some(hwm);
        self
    }
}

/// ZMQ SUB socket subscribed to every topic.
pub struct ZmqSubscriber {
    socket: zmq::Socket,
    _ctx: zmq::Context,
}

impl ZmqSubscriber {
    pub fn connect(config: &StreamConfig) -> Result<ZmqSubscriber, SourceError> {
        ZmqSubscriber::connect_in(&zmq::Context::new(), config)
    }

    /// Connects using an existing context, which `inproc://` endpoints
    /// require.
    pub fn connect_in(ctx: &zmq::Context, config: &StreamConfig) -> Result<ZmqSubscriber, SourceError> {
        let fail = |e: zmq::Error| SourceError::connection(config.address.as_str(), e);

        let socket = ctx.socket(zmq::SUB).map_err(fail)?;
        socket.set_linger(0).map_err(fail)?;
        if let Some(hwm) = config.recv_hwm {
            socket.set_rcvhwm(hwm).map_err(fail)?;
        }
        if let Some(timeout) = config.recv_timeout {
            let ms = timeout.as_millis().min(i32::MAX as u128) as i32;
            socket.set_rcvtimeo(ms).map_err(fail)?;
        }
        socket.set_subscribe(b"").map_err(fail)?;
        socket.connect(&config.address).map_err(fail)?;

        debug!("ZMQ SUB: connected to {}", config.address);

        Ok(ZmqSubscriber {
            socket,
            _ctx: ctx.clone(),
        })
    }
}

impl MessageTransport for ZmqSubscriber {
    fn recv_message(&mut self) -> Result<Vec<u8>, SourceError> {
        self.socket
            .recv_bytes(0)
            .map_err(|e| SourceError::Transport(e.to_string()))
    }
}

struct StreamTransport<T> {
    inner: T,
    sample_offset: u64,
}

impl<T: MessageTransport> StreamTransport<T> {
    /// One receive. Copies as many samples as fit into `out`; whatever does
    /// not fit is dropped and added to `discarded`.
    fn receive_samples(
        &mut self,
        out: &mut [Complex32],
        discarded: &AtomicU64,
    ) -> Result<usize, SourceError> {
        let message = self.inner.recv_message()?;

        if message.len() % SAMPLE_BYTES != 0 {
            trace!(
                "message of {} bytes is not a whole number of samples",
                message.len()
            );
        }

        let available = iq::whole_samples(message.len());
        let copied = iq::decode_into(&message, out);
        if available > copied {
            trace!("discarding {} samples beyond request", available - copied);
            discarded.fetch_add((available - copied) as u64, Ordering::Relaxed);
        }
        Ok(copied)
    }
}

/// Live samples from a pub/sub channel, assembled across messages.
pub struct StreamSampleSource<T = ZmqSubscriber> {
    label: String,
    tuning: TuningCell,
    ring: Weak<RingBuffer>,
    transport: Mutex<StreamTransport<T>>,
    frame_id: FrameCounter,
    discarded: AtomicU64,
}

impl StreamSampleSource<ZmqSubscriber> {
    pub fn connect(
        address: &str,
        tuning: Tuning,
        ring: &Arc<RingBuffer>,
    ) -> Result<StreamSampleSource<ZmqSubscriber>, SourceError> {
        StreamSampleSource::connect_with(StreamConfig::new(address), tuning, ring)
    }

    pub fn connect_with(
        config: StreamConfig,
        tuning: Tuning,
        ring: &Arc<RingBuffer>,
    ) -> Result<StreamSampleSource<ZmqSubscriber>, SourceError> {
        let subscriber = ZmqSubscriber::connect(&config)?;
        info!(
            "receiving IQ from {} ({} Hz, {} MHz)",
            config.address,
            tuning.sample_rate,
            tuning.center_frequency / 1e6
        );
        Ok(StreamSampleSource::with_transport(
            subscriber,
            config.address,
            tuning,
            ring,
        ))
    }
}

impl<T: MessageTransport> StreamSampleSource<T> {
    pub fn with_transport(
        transport: T,
        label: impl Into<String>,
        tuning: Tuning,
        ring: &Arc<RingBuffer>,
    ) -> StreamSampleSource<T> {
        StreamSampleSource {
            label: label.into(),
            tuning: TuningCell::new(tuning),
            ring: Arc::downgrade(ring),
            transport: Mutex::new(StreamTransport {
                inner: transport,
                sample_offset: 0,
            }),
            frame_id: FrameCounter::new(),
            discarded: AtomicU64::new(0),
        }
    }

    /// Samples received but dropped because a message held more than the
    /// request needed.
    pub fn discarded_samples(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, StreamTransport<T>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: MessageTransport> SampleSource for StreamSampleSource<T> {
    fn get_samples(&self, count: usize) -> Result<(Vec<Complex32>, f64), SourceError> {
        let mut samples = vec![Complex32::new(0.0, 0.0); count];
        let mut transport = self.lock();

        let mut total = 0;
        while total < count {
            let received = match transport.receive_samples(&mut samples[total..], &self.discarded) {
                Ok(n) => n,
                Err(e) => {
                    debug!("{}: {}", self.label, e);
                    0
                }
            };
            if received == 0 {
                return Err(SourceError::ShortReceive {
                    wanted: count,
                    got: total,
                });
            }
            total += received;
        }

        let time_first_sample = transport.sample_offset as f64 / self.sample_rate();
        transport.sample_offset += total as u64;
        Ok((samples, time_first_sample))
    }

    fn start_loopback_recv(&self, stop: &AtomicBool, frame_size: usize) {
        // consecutive failed receives; only the first of a run is a warning
        let mut failures: u64 = 0;
        loopback::run(
            "ZMQ source",
            &self.ring,
            stop,
            frame_size,
            &self.frame_id,
            |frame| {
                let mut transport = self.lock();
                let received = match transport.receive_samples(frame, &self.discarded) {
                    Ok(n) => {
                        if failures > 0 {
                            info!("{}: receiving again after {} failures", self.label, failures);
                            failures = 0;
                        }
                        n
                    }
                    Err(e) => {
                        failures += 1;
                        if failures == 1 {
                            warn!("{}: receive failed: {}", self.label, e);
                        } else {
                            debug!("{}: receive failed ({} in a row): {}", self.label, failures, e);
                        }
                        0
                    }
                };
                transport.sample_offset += received as u64;
                received
            },
        );
    }

    fn tuning(&self) -> Tuning {
        self.tuning.get()
    }

    fn retune(&self, f: &mut dyn FnMut(&mut Tuning)) {
        self.tuning.update(f)
    }

    fn sample_offset(&self) -> u64 {
        self.lock().sample_offset
    }

    fn frame_id(&self) -> usize {
        self.frame_id.current()
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
