use iqfeed::sdr::iq;
use iqfeed::{FileSampleSource, RingBuffer, SampleSource, SourceError, Tuning};
use num_complex::Complex32;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;

fn ramp(n: usize) -> Vec<Complex32> {
    (0..n).map(|k| Complex32::new(k as f32, k as f32 * 0.5)).collect()
}

fn capture(samples: &[Complex32]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&iq::encode(samples)).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_wraparound_stitches_tail_to_head() {
    let ring = Arc::new(RingBuffer::new(4).unwrap());
    let file = capture(&ramp(10));
    let src = FileSampleSource::open(file.path(), Tuning::new(1_000_000.0, 0.0, 0.0), &ring).unwrap();
    let all = ramp(10);

    let (first, _) = src.get_samples(4).unwrap();
    let (second, _) = src.get_samples(4).unwrap();
    let (third, _) = src.get_samples(4).unwrap();

    assert_eq!(first, all[0..4].to_vec());
    assert_eq!(second, all[4..8].to_vec());
    assert_eq!(third, vec![all[8], all[9], all[0], all[1]]);
    assert_eq!(src.sample_offset(), 12);
}

#[test]
fn test_time_first_sample_tracks_offset() {
    let ring = Arc::new(RingBuffer::new(4).unwrap());
    let file = capture(&ramp(7));
    let rate = 256.0;
    let src = FileSampleSource::open(file.path(), Tuning::new(rate, 0.0, 0.0), &ring).unwrap();

    for &n in &[1usize, 5, 13, 2, 40] {
        let before = src.sample_offset();
        let (samples, t) = src.get_samples(n).unwrap();
        assert_eq!(samples.len(), n);
        assert_eq!(t * rate, before as f64);
        assert_eq!(src.sample_offset(), before + n as u64);
    }
}

#[test]
fn test_sample_rate_change_moves_time_base() {
    let ring = Arc::new(RingBuffer::new(4).unwrap());
    let file = capture(&ramp(8));
    let src = FileSampleSource::open(file.path(), Tuning::new(100.0, 0.0, 0.0), &ring).unwrap();

    src.get_samples(4).unwrap();
    src.set_sample_rate(200.0);
    assert_eq!(src.bandwidth(), 200.0);
    let (_, t) = src.get_samples(1).unwrap();
    assert_eq!(t, 4.0 / 200.0);
}

#[test]
fn test_empty_file_loop_pushes_overflow_frames() {
    let ring = Arc::new(RingBuffer::new(64).unwrap());
    let file = capture(&[]);
    let src = FileSampleSource::open(file.path(), Tuning::nr_n78(), &ring).unwrap();
    assert!(matches!(
        src.get_samples(16),
        Err(SourceError::ShortRead { wanted: 16, got: 0 })
    ));

    let stop = AtomicBool::new(false);
    crossbeam_utils::thread::scope(|s| {
        s.spawn(|_| src.start_loopback_recv(&stop, 16));
        while ring.pushed() < 3 {
            std::thread::yield_now();
        }
        stop.store(true, Ordering::Release);
    })
    .unwrap();

    let frames = ring.snapshot();
    assert!(frames.len() >= 3);
    assert!(frames.iter().all(|f| f.overflow && f.len() == 16));
    assert_eq!(src.sample_offset(), 0);
    assert_eq!(src.frame_id(), 0);
}

#[test]
fn test_loop_frames_are_full_and_sequential() {
    let ring = Arc::new(RingBuffer::new(100_000).unwrap());
    let file = capture(&ramp(5));
    let src = FileSampleSource::open(file.path(), Tuning::nr_n78(), &ring).unwrap();

    let stop = AtomicBool::new(false);
    crossbeam_utils::thread::scope(|s| {
        s.spawn(|_| src.start_loopback_recv(&stop, 3));
        while ring.pushed() < 6002 {
            std::thread::yield_now();
        }
        stop.store(true, Ordering::Release);
    })
    .unwrap();

    let frames = ring.snapshot();
    assert!(frames.len() >= 6002);
    assert!(frames.iter().all(|f| !f.overflow));
    assert_eq!(frames[0].frame_id, 0);
    for pair in frames.windows(2) {
        assert_eq!(pair[1].frame_id, (pair[0].frame_id + 1) % 6000);
    }
    assert_eq!(frames[6000].frame_id, 0);

    // the file loops seamlessly: frame k starts at sample (3 * k) % 5
    let all = ramp(5);
    assert_eq!(frames[1].samples, vec![all[3], all[4], all[0]]);
    assert_eq!(src.sample_offset(), 3 * frames.len() as u64);
    assert_eq!(src.frame_id(), 0);
}

#[test]
fn test_restarted_loop_does_not_renotify_slots() {
    let ring = Arc::new(RingBuffer::new(5).unwrap());
    let file = capture(&ramp(7));
    let src = FileSampleSource::open(file.path(), Tuning::nr_n78(), &ring).unwrap();

    for round in 1..=2u64 {
        let stop = AtomicBool::new(false);
        crossbeam_utils::thread::scope(|s| {
            s.spawn(|_| src.start_loopback_recv(&stop, 2));
            while ring.pushed() < 20 * round {
                std::thread::yield_now();
            }
            stop.store(true, Ordering::Release);
        })
        .unwrap();

        assert!(ring.bootstrap_finished());
        let counts: Vec<u64> = (0..5).map(|i| ring.slot_notifications(i)).collect();
        assert_eq!(counts, vec![1, 1, 1, 1, 1]);
        assert_eq!(src.frame_id(), 0);
    }
}

#[test]
fn test_get_samples_and_loop_do_not_interleave() {
    let len = 7;
    let ring = Arc::new(RingBuffer::new(100_000).unwrap());
    let file = capture(&ramp(len));
    // one sample per second makes time_first_sample the sample offset
    let src = FileSampleSource::open(file.path(), Tuning::new(1.0, 0.0, 0.0), &ring).unwrap();
    let index = |s: &Complex32| s.re as usize;

    let calls = 200;
    let block = 5;
    let stop = AtomicBool::new(false);
    crossbeam_utils::thread::scope(|s| {
        s.spawn(|_| src.start_loopback_recv(&stop, 3));
        while ring.pushed() == 0 {
            std::thread::yield_now();
        }
        for _ in 0..calls {
            let (samples, t) = src.get_samples(block).unwrap();
            assert_eq!(samples.len(), block);
            assert_eq!(index(&samples[0]), t as usize % len);
            for pair in samples.windows(2) {
                assert_eq!(index(&pair[1]), (index(&pair[0]) + 1) % len);
            }
        }
        stop.store(true, Ordering::Release);
    })
    .unwrap();

    let frames = ring.snapshot();
    assert!(!frames.is_empty());
    for frame in &frames {
        assert!(!frame.overflow);
        for pair in frame.samples.windows(2) {
            assert_eq!(index(&pair[1]), (index(&pair[0]) + 1) % len);
        }
    }
    assert_eq!(
        src.sample_offset(),
        (calls * block) as u64 + 3 * ring.pushed()
    );
}
