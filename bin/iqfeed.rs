use failure::*;
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

use iqfeed::{
    open_source, spawn_loopback, FrameReader, RingBuffer, SampleSource, SourceLocator, Tuning,
};

#[derive(StructOpt)]
#[structopt(name = "iqfeed", about = "replay or monitor complex baseband sample sources")]
struct Cli {
    /// cf32 capture file, or a zmq endpoint (tcp://, ipc://, inproc://)
    source: String,

    #[structopt(short = "r", long, default_value = "30720000")]
    sample_rate: f64,

    #[structopt(short = "f", long, default_value = "3600000000")]
    center_frequency: f64,

    #[structopt(short = "g", long, default_value = "40")]
    gain: f64,

    /// samples per frame
    #[structopt(short = "n", long, default_value = "30720")]
    frame_size: usize,

    /// ring buffer capacity in frames
    #[structopt(short = "c", long, default_value = "16")]
    capacity: usize,

    /// number of frames to monitor before stopping
    #[structopt(long, default_value = "100")]
    frames: usize,

    /// give up on a stream receive after this many milliseconds
    #[structopt(long)]
    recv_timeout_ms: Option<u64>,

    /// zmq receive high-water mark in messages
    #[structopt(long)]
    recv_hwm: Option<i32>,

    /// fetch a single block with get_samples instead of streaming frames
    #[structopt(long)]
    once: bool,
}

fn mean_power(samples: &[num_complex::Complex32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / samples.len() as f32
}

fn main() -> Result<(), Error> {
    pretty_env_logger::init();
    let args = Cli::from_args();

    let mut locator: SourceLocator = args.source.parse()?;
    if let SourceLocator::Stream(config) = &mut locator {
        config.recv_timeout = args.recv_timeout_ms.map(Duration::from_millis);
        config.recv_hwm = args.recv_hwm;
    }

    let ring = Arc::new(RingBuffer::new(args.capacity)?);
    let tuning = Tuning::new(args.sample_rate, args.center_frequency, args.gain);
    let source: Arc<dyn SampleSource> = open_source(&locator, tuning, &ring)?.into();

    if args.once {
        let (samples, t) = source.get_samples(args.frame_size)?;
        info!(
            "{} samples at t={:.6}s, mean power {:.4}",
            samples.len(),
            t,
            mean_power(&samples)
        );
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let recv = spawn_loopback(source.clone(), stop.clone(), args.frame_size, None)?;

    let mut reader = FrameReader::new(ring.clone());
    for _ in 0..args.frames {
        match reader.next_frame_timeout(Duration::from_secs(5)) {
            Some(frame) => info!(
                "frame {} overflow={} mean power {:.4}",
                frame.frame_id,
                frame.overflow,
                mean_power(&frame.samples)
            ),
            None => {
                warn!("no frame from {} in 5s", locator);
                break;
            }
        }
    }

    stop.store(true, Ordering::Release);
    info!(
        "stopping {}: {} samples delivered, {} frames missed, {} overflowed",
        source.describe(),
        source.sample_offset(),
        reader.missed(),
        reader.overflowed()
    );
    recv.join()
        .map_err(|_| format_err!("recv thread panicked"))?;

    Ok(())
}
