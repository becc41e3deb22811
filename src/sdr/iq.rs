use byteorder::{ByteOrder, LittleEndian};
use num_complex::Complex32;

/// Bytes per complex sample: little-endian f32 I followed by f32 Q.
pub const SAMPLE_BYTES: usize = 8;

/// Number of whole samples in `len` bytes. A trailing partial sample does not
/// count.
pub fn whole_samples(len: usize) -> usize {
    len / SAMPLE_BYTES
}

/// Decodes as many whole samples from `bytes` as fit in `out` and returns how
/// many were written.
pub fn decode_into(bytes: &[u8], out: &mut [Complex32]) -> usize {
    let count = whole_samples(bytes.len()).min(out.len());
    for (dst, raw) in out.iter_mut().zip(bytes.chunks_exact(SAMPLE_BYTES)) {
        *dst = Complex32::new(
            LittleEndian::read_f32(&raw[0..4]),
            LittleEndian::read_f32(&raw[4..8]),
        );
    }
    count
}

pub fn decode(bytes: &[u8]) -> Vec<Complex32> {
    let mut out = vec![Complex32::new(0.0, 0.0); whole_samples(bytes.len())];
    decode_into(bytes, &mut out);
    out
}

pub fn encode(samples: &[Complex32]) -> Vec<u8> {
    let mut out = vec![0u8; samples.len() * SAMPLE_BYTES];
    for (raw, s) in out.chunks_exact_mut(SAMPLE_BYTES).zip(samples) {
        LittleEndian::write_f32(&mut raw[0..4], s.re);
        LittleEndian::write_f32(&mut raw[4..8], s.im);
    }
    out
}
