use log::*;
use num_complex::Complex32;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::iq::{self, SAMPLE_BYTES};
use super::loopback::{self, FrameCounter};
use super::{SampleSource, Tuning, TuningCell};
use crate::buffer::RingBuffer;
use crate::error::SourceError;

const READ_BUFFER_BYTES: usize = 1024 * 1024;

/// Replays a raw cf32 capture, looping back to the start whenever the end of
/// the file is reached mid-request.
pub struct FileSampleSource {
    path: PathBuf,
    tuning: TuningCell,
    ring: Weak<RingBuffer>,
    transport: Mutex<FileTransport>,
    frame_id: FrameCounter,
}

struct FileTransport {
    reader: BufReader<File>,
    scratch: Vec<u8>,
    sample_offset: u64,
}

impl FileTransport {
    fn rewind(&mut self) -> bool {
        match self.reader.seek(SeekFrom::Start(0)) {
            Ok(_) => true,
            Err(e) => {
                warn!("unable to rewind sample file: {}", e);
                false
            }
        }
    }

    /// Reads up to `out.len()` samples from the current position, stopping
    /// at end of file.
    fn read_chunk(&mut self, out: &mut [Complex32]) -> usize {
        let want = out.len() * SAMPLE_BYTES;
        self.scratch.resize(want, 0);

        let mut filled = 0;
        while filled < want {
            match self.reader.read(&mut self.scratch[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("error reading sample file: {}", e);
                    break;
                }
            }
        }

        if filled % SAMPLE_BYTES != 0 {
            trace!("dropping {} trailing bytes", filled % SAMPLE_BYTES);
        }
        iq::decode_into(&self.scratch[..filled], out)
    }

    /// Fills `out`, rewinding as often as needed. Returns fewer than
    /// `out.len()` only when a rewind fails or the file yields nothing right
    /// after a rewind.
    fn read_samples(&mut self, out: &mut [Complex32]) -> usize {
        let count = out.len();
        let mut read = 0;
        let mut rewound = false;

        while read < count {
            let got = self.read_chunk(&mut out[read..]);
            read += got;
            if read == count {
                break;
            }
            if rewound && got == 0 {
                debug!("sample file has no whole samples, giving up at {}/{}", read, count);
                break;
            }
            if !self.rewind() {
                break;
            }
            trace!("rewound sample file after {} of {} samples", read, count);
            rewound = true;
        }

        read
    }
}

impl FileSampleSource {
    pub fn open<P: AsRef<Path>>(
        path: P,
        tuning: Tuning,
        ring: &Arc<RingBuffer>,
    ) -> Result<FileSampleSource, SourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|e| SourceError::connection(path.display().to_string(), e))?;

        info!(
            "reading IQ from {} ({} Hz, {} MHz)",
            path.display(),
            tuning.sample_rate,
            tuning.center_frequency / 1e6
        );

        Ok(FileSampleSource {
            path,
            tuning: TuningCell::new(tuning),
            ring: Arc::downgrade(ring),
            transport: Mutex::new(FileTransport {
                reader: BufReader::with_capacity(READ_BUFFER_BYTES, file),
                scratch: Vec::new(),
                sample_offset: 0,
            }),
            frame_id: FrameCounter::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, FileTransport> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SampleSource for FileSampleSource {
    fn get_samples(&self, count: usize) -> Result<(Vec<Complex32>, f64), SourceError> {
        let mut samples = vec![Complex32::new(0.0, 0.0); count];
        let mut transport = self.lock();

        let got = transport.read_samples(&mut samples);
        if got < count {
            return Err(SourceError::ShortRead { wanted: count, got });
        }

        let time_first_sample = transport.sample_offset as f64 / self.sample_rate();
        transport.sample_offset += count as u64;
        Ok((samples, time_first_sample))
    }

    fn start_loopback_recv(&self, stop: &AtomicBool, frame_size: usize) {
        loopback::run(
            "file source",
            &self.ring,
            stop,
            frame_size,
            &self.frame_id,
            |frame| {
                let mut transport = self.lock();
                let got = transport.read_samples(frame);
                transport.sample_offset += got as u64;
                got
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
        format!("file://{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn capture(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn ramp(n: usize) -> Vec<Complex32> {
        (0..n).map(|k| Complex32::new(k as f32, -(k as f32))).collect()
    }

    fn source(file: &NamedTempFile, ring: &Arc<RingBuffer>) -> FileSampleSource {
        FileSampleSource::open(file.path(), Tuning::new(1000.0, 0.0, 0.0), ring).unwrap()
    }

    #[test]
    fn missing_file_is_a_connection_error() {
        let ring = Arc::new(RingBuffer::new(4).unwrap());
        let err = FileSampleSource::open("/nonexistent/capture.cf32", Tuning::nr_n78(), &ring)
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Connection { .. }));
    }

    #[test]
    fn read_spans_many_rewinds() {
        let ring = Arc::new(RingBuffer::new(4).unwrap());
        let file = capture(&iq::encode(&ramp(3)));
        let src = source(&file, &ring);

        let (samples, _) = src.get_samples(10).unwrap();
        let expected: Vec<Complex32> = (0..10).map(|k| ramp(3)[k % 3]).collect();
        assert_eq!(samples, expected);
    }

    #[test]
    fn partial_trailing_sample_is_skipped_on_wrap() {
        let ring = Arc::new(RingBuffer::new(4).unwrap());
        let mut bytes = iq::encode(&ramp(2));
        bytes.extend_from_slice(&[0xff; 5]);
        let file = capture(&bytes);
        let src = source(&file, &ring);

        let (samples, _) = src.get_samples(3).unwrap();
        assert_eq!(samples, vec![ramp(2)[0], ramp(2)[1], ramp(2)[0]]);
    }

    #[test]
    fn empty_file_fails_without_spinning() {
        let ring = Arc::new(RingBuffer::new(4).unwrap());
        let file = capture(&[]);
        let src = source(&file, &ring);

        match src.get_samples(4) {
            Err(SourceError::ShortRead { wanted, got }) => {
                assert_eq!(wanted, 4);
                assert_eq!(got, 0);
            }
            other => panic!("expected a short read, got {:?}", other.map(|(s, _)| s.len())),
        }
        assert_eq!(src.sample_offset(), 0);
    }

    #[test]
    fn sub_sample_file_fails() {
        let ring = Arc::new(RingBuffer::new(4).unwrap());
        let file = capture(&[1, 2, 3]);
        let src = source(&file, &ring);
        assert!(matches!(
            src.get_samples(1),
            Err(SourceError::ShortRead { got: 0, .. })
        ));
    }

    #[test]
    fn zero_count_returns_current_time() {
        let ring = Arc::new(RingBuffer::new(4).unwrap());
        let file = capture(&iq::encode(&ramp(4)));
        let src = source(&file, &ring);
        src.get_samples(3).unwrap();

        let (samples, t) = src.get_samples(0).unwrap();
        assert!(samples.is_empty());
        assert_eq!(t, 3.0 / 1000.0);
        assert_eq!(src.sample_offset(), 3);
    }
}
