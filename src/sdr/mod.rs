pub mod file;
pub mod iq;
pub mod loopback;
pub mod stream;

use log::*;
use num_complex::Complex32;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crate::buffer::RingBuffer;
use crate::error::SourceError;

pub use file::FileSampleSource;
pub use stream::{MessageTransport, StreamConfig, StreamSampleSource, ZmqSubscriber};

/// Radio metadata carried by every source. Nothing here touches hardware.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tuning {
    pub sample_rate: f64,
    pub center_frequency: f64,
    pub gain: f64,
    bandwidth: f64,
}

impl Tuning {
    pub fn new(sample_rate: f64, center_frequency: f64, gain: f64) -> Tuning {
        Tuning {
            sample_rate,
            center_frequency,
            gain,
            bandwidth: sample_rate,
        }
    }

    /// 30.72 Msps at 3.6 GHz, a 40 MHz NR carrier in band n78.
    pub fn nr_n78() -> Tuning {
        Tuning::new(30_720_000.0, 3_600_000_000.0, 40.0)
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Changing the rate also changes the bandwidth.
    pub fn set_sample_rate(&mut self, rate: f64) {
        self.sample_rate = rate;
        self.bandwidth = rate;
    }
}

/// Tuning shared between the producer thread and whoever adjusts it.
#[derive(Debug)]
pub(crate) struct TuningCell(Mutex<Tuning>);

impl TuningCell {
    pub(crate) fn new(tuning: Tuning) -> TuningCell {
        TuningCell(Mutex::new(tuning))
    }

    pub(crate) fn get(&self) -> Tuning {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn update(&self, f: &mut dyn FnMut(&mut Tuning)) {
        let mut tuning = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *tuning)
    }
}

/// What every sample backend can do.
///
/// `get_samples` and `start_loopback_recv` share one transport lock per
/// source, so using both on the same instance serializes them.
pub trait SampleSource: Send + Sync {
    /// Blocks until exactly `count` samples are available and returns them
    /// with the time of the first one in seconds. Never returns fewer.
    fn get_samples(&self, count: usize) -> Result<(Vec<Complex32>, f64), SourceError>;

    /// Pushes `frame_size`-sample frames into the ring buffer until `stop` is
    /// raised. Shortfalls are flagged on the frame rather than returned.
    fn start_loopback_recv(&self, stop: &AtomicBool, frame_size: usize);

    fn tuning(&self) -> Tuning;

    fn retune(&self, f: &mut dyn FnMut(&mut Tuning));

    /// Samples delivered so far.
    fn sample_offset(&self) -> u64;

    /// Id the next pushed frame will carry.
    fn frame_id(&self) -> usize;

    fn describe(&self) -> String;

    fn sample_rate(&self) -> f64 {
        self.tuning().sample_rate
    }

    fn set_sample_rate(&self, rate: f64) {
        self.retune(&mut |t| t.set_sample_rate(rate));
    }

    fn bandwidth(&self) -> f64 {
        self.tuning().bandwidth()
    }

    fn center_frequency(&self) -> f64 {
        self.tuning().center_frequency
    }

    fn set_center_frequency(&self, freq: f64) {
        self.retune(&mut |t| t.center_frequency = freq);
    }

    fn gain(&self) -> f64 {
        self.tuning().gain
    }

    fn set_gain(&self, gain: f64) {
        self.retune(&mut |t| t.gain = gain);
    }
}

/// The backends this crate knows how to open.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceLocator {
    File(PathBuf),
    Stream(StreamConfig),
}

const STREAM_SCHEMES: [&str; 5] = ["tcp://", "ipc://", "inproc://", "pgm://", "epgm://"];

impl FromStr for SourceLocator {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<SourceLocator, SourceError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SourceError::connection(s, "empty source locator"));
        }
        if STREAM_SCHEMES.iter().any(|scheme| s.starts_with(scheme)) {
            return Ok(SourceLocator::Stream(StreamConfig::new(s)));
        }
        let path = s.strip_prefix("file://").unwrap_or(s);
        Ok(SourceLocator::File(PathBuf::from(path)))
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::File(path) => write!(f, "file://{}", path.display()),
            SourceLocator::Stream(config) => write!(f, "{}", config.address),
        }
    }
}

/// Opens whichever backend `locator` names, bound to `ring`.
pub fn open_source(
    locator: &SourceLocator,
    tuning: Tuning,
    ring: &Arc<RingBuffer>,
) -> Result<Box<dyn SampleSource>, SourceError> {
    match locator {
        SourceLocator::File(path) => Ok(Box::new(FileSampleSource::open(path, tuning, ring)?)),
        SourceLocator::Stream(config) => Ok(Box::new(StreamSampleSource::connect_with(
            config.clone(),
            tuning,
            ring,
        )?)),
    }
}

/// Scheduling hint run on the producer thread before it enters the loop,
/// e.g. to raise its priority.
pub type SchedulingHint = Box<dyn FnOnce() + Send>;

/// Runs `source`'s producer loop on its own thread until `stop` is raised.
pub fn spawn_loopback(
    source: Arc<dyn SampleSource>,
    stop: Arc<AtomicBool>,
    frame_size: usize,
    hint: Option<SchedulingHint>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("iqfeed-recv".to_string())
        .spawn(move || {
            if let Some(hint) = hint {
                hint();
            }
            debug!("recv thread for {} running", source.describe());
            source.start_loopback_recv(&stop, frame_size);
        })
}
