use anyhow::{anyhow, Context, Result};
use std::io::Cursor;

/// Mono waveform at a fixed sample rate. Produced once per node visit and
/// never modified afterwards; transforms build new segments.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioSegment {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Encodes a segment as a mono 32-bit float WAV file.
/// The same segment always yields the same bytes.
pub fn encode_wav(segment: &AudioSegment) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: segment.sample_rate(),
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + segment.len() * 4));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in segment.samples() {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Decodes WAV bytes into a mono segment, averaging channels and
/// normalizing integer PCM to [-1.0, 1.0].
pub fn decode_wav(bytes: &[u8]) -> Result<AudioSegment> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).context("Failed to parse WAV")?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            let max_value = (1i64)
                .checked_shl(u32::from(bits).saturating_sub(1))
                .filter(|_| bits > 0 && bits <= 32)
                .ok_or_else(|| anyhow!("Unsupported bits_per_sample: {}", bits))?
                as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok(AudioSegment::new(
        downmix(&interleaved, spec.channels as usize),
        spec.sample_rate,
    ))
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Smallest accepted resampling step, so output is at most 64x the input.
pub const MIN_RESAMPLE_STEP: f64 = 1.0 / 64.0;

/// Linear-interpolation resampling where `step` is the number of input
/// samples consumed per output sample (`step > 1` shortens the signal).
/// Steps below `MIN_RESAMPLE_STEP` are raised to it.
pub fn resample_linear(samples: &[f32], step: f64) -> Vec<f32> {
    if samples.is_empty() || !step.is_finite() || step <= 0.0 {
        return Vec::new();
    }
    let step = step.max(MIN_RESAMPLE_STEP);
    let output_len = (samples.len() as f64 / step).round() as usize;
    let last = samples.len() - 1;

    let mut output = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let src_pos = i as f64 * step;
        let src_idx = (src_pos.floor() as usize).min(last);
        let frac = (src_pos - src_idx as f64) as f32;
        if src_idx < last {
            output.push(samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac);
        } else {
            output.push(samples[last]);
        }
    }
    output
}
