use hound::{SampleFormat, WavReader};
use std::path::Path;

use crate::error::MatchError;

/// Mono waveform in the file's native amplitude scale
#[derive(Debug, Clone)]
pub struct Waveform {
    pub sample_rate: u32,
    pub samples: Vec<f64>,
}

impl Waveform {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Read a PCM WAV file.
///
/// Integer samples keep their raw integer values (an i16 file yields values
/// in -32768..=32767); float samples are kept as-is. Multi-channel audio is
/// averaged down to mono.
pub fn read_wav(path: &Path) -> Result<Waveform, MatchError> {
    let mut reader = WavReader::open(path).map_err(|e| MatchError::input(path, e))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f64> = match spec.sample_format {
        SampleFormat::Int => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f64))
            .collect::<Result<_, _>>(),
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| v as f64))
            .collect::<Result<_, _>>(),
    }
    .map_err(|e| MatchError::extraction(path, e))?;

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f64>() / channels as f64)
            .collect()
    };

    tracing::debug!(
        path = %path.display(),
        sample_rate = spec.sample_rate,
        channels,
        samples = samples.len(),
        "Read waveform"
    );

    Ok(Waveform {
        sample_rate: spec.sample_rate,
        samples,
    })
}
