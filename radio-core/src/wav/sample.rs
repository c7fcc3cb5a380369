//! Little-endian PCM sample encoding
//!
//! Samples are handled as `i32` at their container width. 8-bit PCM is
//! unsigned with a 128 offset; every wider width is two's complement.

/// Smallest and largest value a sample of `width` bytes can hold
pub fn sample_range(width: usize) -> (i64, i64) {
    let bits = (width * 8) as u32;
    (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
}

/// Decode one sample; its width is the length of `bytes` (1 to 4)
pub fn read_sample(bytes: &[u8]) -> i32 {
    match bytes.len() {
        1 => bytes[0] as i32 - 128,
        n => {
            let mut raw = 0u32;
            for (i, b) in bytes.iter().take(4).enumerate() {
                raw |= (*b as u32) << (i * 8);
            }
            let shift = 32 - 8 * n.min(4) as u32;
            ((raw << shift) as i32) >> shift
        }
    }
}

/// Encode `value` into `out`, clamping it to what `out.len()` bytes can hold
pub fn write_sample(out: &mut [u8], value: i64) {
    let width = out.len();
    let (min, max) = sample_range(width);
    let value = value.clamp(min, max);
    if width == 1 {
        out[0] = (value + 128) as u8;
        return;
    }
    let raw = (value as i32 as u32).to_le_bytes();
    out.copy_from_slice(&raw[..width]);
}

/// Move a sample from one container width to another by shifting
pub fn rescale(value: i32, from_width: usize, to_width: usize) -> i32 {
    if from_width == to_width {
        value
    } else if from_width > to_width {
        value >> ((from_width - to_width) * 8)
    } else {
        value << ((to_width - from_width) * 8)
    }
}
