use std::collections::VecDeque;
use std::f64::consts::PI;
use std::io::{self, Read, Write};

use super::sample::{read_sample, rescale, sample_range, write_sample};
use super::{pcm_pipe, PcmSource, PipeWriter};
use crate::chunker::PcmSink;
use crate::error::{AudioError, Result};
use crate::format::StreamFormat;

/// Length of one conversion block
const BLOCK_MS: u32 = 10;

/// Lobes of the Lanczos window
const LOBES: f64 = 3.0;

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lanczos(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else if x.abs() < LOBES {
        let px = PI * x;
        LOBES * px.sin() * (px / LOBES).sin() / (px * px)
    } else {
        0.0
    }
}

/// Windowed-sinc resampling of one channel.
///
/// Output sample `k` sits at input position `k * step_in / step_out`,
/// computed in integers so the position never drifts.
struct Lanczos {
    step_in: u64,
    step_out: u64,
    /// Kernel stretch; above 1 when downsampling, to filter before decimating
    scale: f64,
    radius: i64,
    history: VecDeque<f64>,
    /// Input index of `history[0]`
    base: u64,
    received: u64,
    next_out: u64,
}

impl Lanczos {
    fn new(rate_in: u32, rate_out: u32) -> Self {
        let g = gcd(rate_in as u64, rate_out as u64);
        let scale = (rate_in as f64 / rate_out as f64).max(1.0);
        Self {
            step_in: rate_in as u64 / g,
            step_out: rate_out as u64 / g,
            scale,
            radius: (LOBES * scale).ceil() as i64,
            history: VecDeque::new(),
            base: 0,
            received: 0,
            next_out: 0,
        }
    }

    /// Input sample index and fraction for output sample `k`
    fn position(&self, k: u64) -> (u64, f64) {
        let num = k * self.step_in;
        (
            num / self.step_out,
            (num % self.step_out) as f64 / self.step_out as f64,
        )
    }

    fn push(&mut self, input: &[i32], out: &mut Vec<i32>, range: (i64, i64)) {
        self.history.extend(input.iter().map(|&s| s as f64));
        self.received += input.len() as u64;
        self.drain(out, false, range);
    }

    fn finish(&mut self, out: &mut Vec<i32>, range: (i64, i64)) {
        self.drain(out, true, range);
    }

    fn drain(&mut self, out: &mut Vec<i32>, flush: bool, range: (i64, i64)) {
        loop {
            let (i, frac) = self.position(self.next_out);
            if i >= self.received {
                break;
            }
            if !flush && i as i64 + self.radius >= self.received as i64 {
                break;
            }
            let value = self.interpolate(i, frac).round() as i64;
            out.push(value.clamp(range.0, range.1) as i32);
            self.next_out += 1;
        }

        let (i, _) = self.position(self.next_out);
        let keep_from = (i as i64 - self.radius + 1).max(0) as u64;
        while self.base < keep_from && !self.history.is_empty() {
            self.history.pop_front();
            self.base += 1;
        }
    }

    fn interpolate(&self, i: u64, frac: f64) -> f64 {
        let t = i as f64 + frac;
        let lo = (i as i64 - self.radius + 1).max(self.base as i64);
        let hi = (i as i64 + self.radius).min(self.received as i64 - 1);

        let (mut acc, mut weights) = (0.0, 0.0);
        for j in lo..=hi {
            let w = lanczos((j as f64 - t) / self.scale);
            acc += w * self.history[(j - self.base as i64) as usize];
            weights += w;
        }
        if weights.abs() > 1e-9 {
            acc / weights
        } else {
            self.history[(i - self.base) as usize]
        }
    }
}

enum RateStage {
    Passthrough,
    /// Keep one sample in `factor`; `phase` carries across blocks
    Decimate { factor: usize, phase: usize },
    Duplicate { factor: usize },
    Lanczos(Lanczos),
}

impl RateStage {
    fn new(rate_in: u32, rate_out: u32) -> Self {
        if rate_in == rate_out {
            RateStage::Passthrough
        } else if rate_in > rate_out && rate_in % rate_out == 0 {
            RateStage::Decimate {
                factor: (rate_in / rate_out) as usize,
                phase: 0,
            }
        } else if rate_out > rate_in && rate_out % rate_in == 0 {
            RateStage::Duplicate {
                factor: (rate_out / rate_in) as usize,
            }
        } else {
            RateStage::Lanczos(Lanczos::new(rate_in, rate_out))
        }
    }

    fn process(&mut self, input: &[i32], out: &mut Vec<i32>, range: (i64, i64)) {
        match self {
            RateStage::Passthrough => out.extend_from_slice(input),
            RateStage::Decimate { factor, phase } => {
                for &s in input {
                    if *phase == 0 {
                        out.push(s);
                    }
                    *phase = (*phase + 1) % *factor;
                }
            }
            RateStage::Duplicate { factor } => {
                for &s in input {
                    out.extend(std::iter::repeat(s).take(*factor));
                }
            }
            RateStage::Lanczos(lanczos) => lanczos.push(input, out, range),
        }
    }

    fn finish(&mut self, out: &mut Vec<i32>, range: (i64, i64)) {
        if let RateStage::Lanczos(lanczos) = self {
            lanczos.finish(out, range);
        }
    }
}

/// Streaming PCM format conversion in three stages: channel count, sample
/// rate, bit depth.
///
/// Narrowing the bit depth truncates; no dither is added.
pub struct Converter {
    from: StreamFormat,
    to: StreamFormat,
    rate: Vec<RateStage>,
    planes: Vec<Vec<i32>>,
    resampled: Vec<Vec<i32>>,
}

impl Converter {
    pub fn new(from: StreamFormat, to: StreamFormat) -> Result<Self> {
        if !from.is_valid() || !to.is_valid() {
            return Err(AudioError::Config(format!(
                "cannot convert {} to {}",
                from, to
            )));
        }
        if from.channels != 1 && from.channels != to.channels {
            return Err(AudioError::Config(format!(
                "cannot map {} channels onto {}",
                from.channels, to.channels
            )));
        }

        let channels = to.channels as usize;
        Ok(Self {
            from,
            to,
            rate: (0..channels)
                .map(|_| RateStage::new(from.rate, to.rate))
                .collect(),
            planes: vec![Vec::new(); channels],
            resampled: vec![Vec::new(); channels],
        })
    }

    pub fn input_format(&self) -> StreamFormat {
        self.from
    }

    pub fn output_format(&self) -> StreamFormat {
        self.to
    }

    /// Input bytes making up one block
    pub fn block_len(&self) -> usize {
        let frames = (self.from.rate as usize * BLOCK_MS as usize + 999) / 1000;
        frames.max(1) * self.from.bytes_per_frame()
    }

    /// Convert `input` and append the result to `out`. Trailing bytes that
    /// do not make up a whole sample frame are ignored.
    pub fn process(&mut self, input: &[u8], out: &mut Vec<u8>) {
        let width = self.from.bytes_per_sample();
        let frame = self.from.bytes_per_frame();
        let range = sample_range(width);

        for (c, plane) in self.planes.iter_mut().enumerate() {
            let src = if self.from.channels == 1 { 0 } else { c };
            plane.clear();
            plane.extend(
                input
                    .chunks_exact(frame)
                    .map(|f| read_sample(&f[src * width..(src + 1) * width])),
            );
        }

        for ((stage, plane), resampled) in self
            .rate
            .iter_mut()
            .zip(&self.planes)
            .zip(self.resampled.iter_mut())
        {
            resampled.clear();
            stage.process(plane, resampled, range);
        }
        self.interleave(out);
    }

    /// Flush whatever the resampler still holds
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        let range = sample_range(self.from.bytes_per_sample());
        for (stage, resampled) in self.rate.iter_mut().zip(self.resampled.iter_mut()) {
            resampled.clear();
            stage.finish(resampled, range);
        }
        self.interleave(out);
    }

    fn interleave(&self, out: &mut Vec<u8>) {
        let from_width = self.from.bytes_per_sample();
        let to_width = self.to.bytes_per_sample();
        let frames = self.resampled.iter().map(Vec::len).min().unwrap_or(0);

        let mut sample = [0u8; 4];
        out.reserve(frames * self.to.bytes_per_frame());
        for f in 0..frames {
            for plane in &self.resampled {
                let value = rescale(plane[f], from_width, to_width);
                write_sample(&mut sample[..to_width], value as i64);
                out.extend_from_slice(&sample[..to_width]);
            }
        }
    }
}

/// Wrap `source` so it yields audio in `format`.
///
/// Returns the source unchanged when it already matches; otherwise the
/// conversion runs on its own thread behind a PCM pipe.
pub fn convert<S>(source: S, format: StreamFormat) -> Result<Box<dyn PcmSource>>
where
    S: PcmSource + 'static,
{
    if source.format() == format {
        return Ok(Box::new(source));
    }

    let converter = Converter::new(source.format(), format)?;
    tracing::debug!("Converting {} to {}", source.format(), format);

    let (reader, mut writer) = pcm_pipe(format);
    std::thread::Builder::new()
        .name("pcm-convert".to_string())
        .spawn(move || {
            let result = pump(source, converter, &mut writer);
            if let Err(e) = writer.close_with_error(result.err()) {
                tracing::debug!("Conversion stopped: {}", e);
            }
        })?;

    Ok(Box::new(reader))
}

fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(AudioError::from_io(e)),
        }
    }
    Ok(filled)
}

fn pump<S: Read>(mut source: S, mut converter: Converter, writer: &mut PipeWriter) -> Result<()> {
    let mut block = vec![0u8; converter.block_len()];
    let mut out = Vec::new();
    loop {
        let n = read_full(&mut source, &mut block)?;
        if n == 0 {
            break;
        }
        out.clear();
        converter.process(&block[..n], &mut out);
        writer.write_all(&out)?;
        if n < block.len() {
            break;
        }
    }
    out.clear();
    converter.finish(&mut out);
    writer.write_all(&out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DAT;
    use crate::wav::{WavReader, WavWriter};
    use std::io::Cursor;

    fn mono(rate: u32, bits: u16) -> StreamFormat {
        StreamFormat::new(1, rate, bits)
    }

    fn encode16(samples: &[i32]) -> Vec<u8> {
        samples
            .iter()
            .flat_map(|&s| (s as i16).to_le_bytes())
            .collect()
    }

    fn decode16(bytes: &[u8]) -> Vec<i32> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as i32)
            .collect()
    }

    /// Feed `input` in pieces of `piece` bytes, then flush
    fn run(converter: &mut Converter, input: &[u8], piece: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in input.chunks(piece) {
            converter.process(chunk, &mut out);
        }
        converter.finish(&mut out);
        out
    }

    #[test]
    fn test_rejects_channel_remaps() {
        assert!(matches!(
            Converter::new(DAT, mono(48_000, 16)),
            Err(AudioError::Config(_))
        ));
        assert!(matches!(
            Converter::new(StreamFormat::new(3, 48_000, 16), DAT),
            Err(AudioError::Config(_))
        ));
        assert!(Converter::new(mono(48_000, 16), StreamFormat::new(6, 48_000, 16)).is_ok());
    }

    #[test]
    fn test_mono_to_stereo() {
        let mut converter = Converter::new(mono(48_000, 16), DAT).unwrap();
        let out = run(&mut converter, &encode16(&[1, -2, 300]), 1024);
        assert_eq!(decode16(&out), [1, 1, -2, -2, 300, 300]);
    }

    #[test]
    fn test_bit_depth() {
        let mut narrow = Converter::new(mono(8000, 16), mono(8000, 8)).unwrap();
        let out = run(&mut narrow, &encode16(&[0x1234, -32768, 0]), 64);
        assert_eq!(out, [0x92, 0x00, 0x80]);

        let mut widen = Converter::new(mono(8000, 8), mono(8000, 16)).unwrap();
        let out = run(&mut widen, &[0x80, 0xff, 0x00], 64);
        assert_eq!(decode16(&out), [0, 0x7f00, -32768]);

        let mut deep = Converter::new(mono(8000, 16), mono(8000, 24)).unwrap();
        let out = run(&mut deep, &encode16(&[-1]), 64);
        assert_eq!(out, [0x00, 0xff, 0xff]);
    }

    #[test]
    fn test_decimation_carries_phase() {
        let input: Vec<i32> = (0..100).collect();
        let mut converter = Converter::new(mono(96_000, 16), mono(48_000, 16)).unwrap();
        // 3 samples at a time: odd block lengths must not reset the phase
        let out = run(&mut converter, &encode16(&input), 6);
        let expected: Vec<i32> = (0..100).step_by(2).collect();
        assert_eq!(decode16(&out), expected);
    }

    #[test]
    fn test_duplication() {
        let mut converter = Converter::new(mono(16_000, 16), mono(48_000, 16)).unwrap();
        let out = run(&mut converter, &encode16(&[5, 7]), 64);
        assert_eq!(decode16(&out), [5, 5, 5, 7, 7, 7]);
    }

    #[test]
    fn test_lanczos_keeps_dc() {
        let input = vec![1000; 44_100];
        let mut converter = Converter::new(mono(44_100, 16), mono(48_000, 16)).unwrap();
        let block = converter.block_len();
        let out = decode16(&run(&mut converter, &encode16(&input), block));
        assert_eq!(out.len(), 48_000);
        assert!(out.iter().all(|&s| s == 1000));
    }

    fn sine_error(rate_in: u32, rate_out: u32) -> f64 {
        let freq = 1000.0;
        let amplitude = 10_000.0;
        let input: Vec<i32> = (0..rate_in as usize / 10)
            .map(|n| (amplitude * (2.0 * PI * freq * n as f64 / rate_in as f64).sin()).round() as i32)
            .collect();

        let mut converter = Converter::new(mono(rate_in, 16), mono(rate_out, 16)).unwrap();
        let block = converter.block_len();
        let out = decode16(&run(&mut converter, &encode16(&input), block));
        assert_eq!(out.len(), rate_out as usize / 10);

        // ignore the edges, where the kernel runs out of input
        out.iter()
            .enumerate()
            .skip(20)
            .take(out.len() - 40)
            .map(|(k, &s)| {
                let expected = amplitude * (2.0 * PI * freq * k as f64 / rate_out as f64).sin();
                (s as f64 - expected).abs()
            })
            .fold(0.0, f64::max)
    }

    #[test]
    fn test_lanczos_upsampling_tracks_sine() {
        let error = sine_error(44_100, 48_000);
        assert!(error < 50.0, "max error {error}");
    }

    #[test]
    fn test_lanczos_downsampling_tracks_sine() {
        let error = sine_error(48_000, 44_100);
        assert!(error < 100.0, "max error {error}");
    }

    #[test]
    fn test_convert_threaded() {
        let format = mono(24_000, 8);
        let mut writer = WavWriter::new(Vec::new(), format);
        writer.write_all(&[0x80; 2400]).unwrap();
        writer.close().unwrap();
        let source = WavReader::new(Cursor::new(writer.into_inner())).unwrap();

        let mut converted = convert(source, DAT).unwrap();
        assert_eq!(converted.format(), DAT);
        let mut out = Vec::new();
        converted.read_to_end(&mut out).unwrap();
        // 100 ms of silence, twice the rate, two channels, 16 bits
        assert_eq!(out.len(), 4800 * 4);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_convert_same_format_is_passthrough() {
        let mut writer = WavWriter::new(Vec::new(), DAT);
        writer.init(Some(4)).unwrap();
        writer.write_all(&[1, 2, 3, 4]).unwrap();
        writer.close().unwrap();
        let source = WavReader::new(Cursor::new(writer.into_inner())).unwrap();

        let converted = convert(source, DAT).unwrap();
        assert_eq!(converted.size(), Some(4));
    }
}
