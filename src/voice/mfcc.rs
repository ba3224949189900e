//! Mel-frequency cepstral coefficients and their deltas.
//!
//! Pipeline per frame:
//! - Pre-emphasis over the whole signal
//! - Framing with a zero-padded tail (rectangular window)
//! - Cooley-Tukey FFT, power spectrum scaled by 1/NFFT
//! - Triangular mel filterbank, natural log
//! - Orthonormal DCT-II, sinusoidal liftering
//! - Coefficient 0 replaced by the log frame energy

use ndarray::{concatenate, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfccConfig {
    /// Analysis window length in seconds (default: 0.025).
    #[serde(default = "default_win_len")]
    pub win_len: f64,
    /// Step between windows in seconds (default: 0.01).
    #[serde(default = "default_win_step")]
    pub win_step: f64,
    /// Number of mel filters (default: 40).
    #[serde(default = "default_num_filters")]
    pub num_filters: usize,
    /// Cepstral coefficients kept per frame (default: 20).
    #[serde(default = "default_num_ceps")]
    pub num_ceps: usize,
    /// Minimum FFT size; grows to fit the window (default: 512).
    #[serde(default = "default_nfft")]
    pub nfft: usize,
    /// Lowest filter edge in Hz (default: 0).
    #[serde(default)]
    pub low_freq: f64,
    /// Highest filter edge in Hz, `None` = Nyquist.
    #[serde(default)]
    pub high_freq: Option<f64>,
    /// Pre-emphasis coefficient (default: 0.97).
    #[serde(default = "default_pre_emphasis")]
    pub pre_emphasis: f64,
    /// Sinusoidal lifter length, 0 disables (default: 22).
    #[serde(default = "default_cep_lifter")]
    pub cep_lifter: usize,
    /// Replace coefficient 0 with log frame energy (default: true).
    #[serde(default = "default_append_energy")]
    pub append_energy: bool,
    /// Frames on each side used for deltas (default: 2).
    #[serde(default = "default_delta_window")]
    pub delta_window: usize,
}

fn default_win_len() -> f64 {
    0.025
}

fn default_win_step() -> f64 {
    0.01
}

fn default_num_filters() -> usize {
    40
}

fn default_num_ceps() -> usize {
    20
}

fn default_nfft() -> usize {
    512
}

fn default_pre_emphasis() -> f64 {
    0.97
}

fn default_cep_lifter() -> usize {
    22
}

fn default_append_energy() -> bool {
    true
}

fn default_delta_window() -> usize {
    2
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            win_len: default_win_len(),
            win_step: default_win_step(),
            num_filters: default_num_filters(),
            num_ceps: default_num_ceps(),
            nfft: default_nfft(),
            low_freq: 0.0,
            high_freq: None,
            pre_emphasis: default_pre_emphasis(),
            cep_lifter: default_cep_lifter(),
            append_energy: default_append_energy(),
            delta_window: default_delta_window(),
        }
    }
}

/// Round half away from zero, as used for frame lengths
fn round_half_up(x: f64) -> usize {
    (x + 0.5).floor().max(0.0) as usize
}

fn next_pow2(n: usize) -> usize {
    let mut p = 1;
    while p < n {
        p <<= 1;
    }
    p
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular filters over FFT bins. Returns `[num_filters][nfft/2 + 1]`.
fn mel_filterbank(num_filters: usize, nfft: usize, sample_rate: u32, low_freq: f64, high_freq: f64) -> Vec<Vec<f64>> {
    let half_fft = nfft / 2 + 1;
    let mel_low = hz_to_mel(low_freq);
    let mel_high = hz_to_mel(high_freq);

    let bins: Vec<usize> = (0..num_filters + 2)
        .map(|i| {
            let mel = mel_low + i as f64 * (mel_high - mel_low) / (num_filters + 1) as f64;
            let bin = ((nfft + 1) as f64 * mel_to_hz(mel) / sample_rate as f64).floor();
            (bin.max(0.0) as usize).min(half_fft - 1)
        })
        .collect();

    let mut fb = Vec::with_capacity(num_filters);
    for j in 0..num_filters {
        let mut filter = vec![0.0f64; half_fft];
        let (left, center, right) = (bins[j], bins[j + 1], bins[j + 2]);

        for (k, w) in filter.iter_mut().enumerate().take(center).skip(left) {
            *w = (k - left) as f64 / (center - left) as f64;
        }
        for (k, w) in filter.iter_mut().enumerate().take(right).skip(center) {
            *w = (right - k) as f64 / (right - center) as f64;
        }
        fb.push(filter);
    }
    fb
}

/// In-place Cooley-Tukey FFT.
/// Input length must be a power of 2.
fn fft(x: &mut [(f64, f64)]) {
    let n = x.len();
    if n <= 1 {
        return;
    }

    // Bit-reversal permutation.
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            x.swap(i, j);
        }
    }

    let mut size = 2;
    while size <= n {
        let half = size / 2;
        let angle = -2.0 * PI / size as f64;
        let wn = (angle.cos(), angle.sin());
        let mut start = 0;
        while start < n {
            let mut w = (1.0, 0.0);
            for k in 0..half {
                let u = x[start + k];
                let v = x[start + k + half];
                let t = (w.0 * v.0 - w.1 * v.1, w.0 * v.1 + w.1 * v.0);
                x[start + k] = (u.0 + t.0, u.1 + t.1);
                x[start + k + half] = (u.0 - t.0, u.1 - t.1);
                w = (w.0 * wn.0 - w.1 * wn.1, w.0 * wn.1 + w.1 * wn.0);
            }
            start += size;
        }
        size <<= 1;
    }
}

/// Orthonormal DCT-II of `input`, first `count` coefficients
fn dct_ortho(input: &[f64], count: usize) -> Vec<f64> {
    let n = input.len() as f64;
    (0..count)
        .map(|k| {
            let sum: f64 = input
                .iter()
                .enumerate()
                .map(|(i, &v)| v * (PI * k as f64 * (2 * i + 1) as f64 / (2.0 * n)).cos())
                .sum();
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            sum * scale
        })
        .collect()
}

/// Static cepstral coefficients, `[frames, num_ceps]`.
///
/// Returns `None` for an empty signal or a degenerate configuration.
pub fn mfcc(signal: &[f64], sample_rate: u32, cfg: &MfccConfig) -> Option<Array2<f64>> {
    if signal.is_empty() || sample_rate == 0 || cfg.num_filters == 0 || cfg.num_ceps == 0 {
        return None;
    }
    if cfg.num_ceps > cfg.num_filters {
        return None;
    }

    let frame_len = round_half_up(cfg.win_len * sample_rate as f64);
    let frame_step = round_half_up(cfg.win_step * sample_rate as f64);
    if frame_len == 0 || frame_step == 0 {
        return None;
    }

    let nfft = next_pow2(frame_len).max(cfg.nfft);
    let half_fft = nfft / 2 + 1;
    let high_freq = cfg.high_freq.unwrap_or(sample_rate as f64 / 2.0);
    let filterbank = mel_filterbank(cfg.num_filters, nfft, sample_rate, cfg.low_freq, high_freq);

    // Pre-emphasis over the whole signal.
    let mut emphasized = Vec::with_capacity(signal.len());
    emphasized.push(signal[0]);
    for i in 1..signal.len() {
        emphasized.push(signal[i] - cfg.pre_emphasis * signal[i - 1]);
    }

    let num_frames = if emphasized.len() <= frame_len {
        1
    } else {
        1 + (emphasized.len() - frame_len).div_ceil(frame_step)
    };
    emphasized.resize((num_frames - 1) * frame_step + frame_len, 0.0);

    let lifter: Vec<f64> = (0..cfg.num_ceps)
        .map(|n| {
            if cfg.cep_lifter > 0 {
                let l = cfg.cep_lifter as f64;
                1.0 + (l / 2.0) * (PI * n as f64 / l).sin()
            } else {
                1.0
            }
        })
        .collect();

    let mut features = Array2::<f64>::zeros((num_frames, cfg.num_ceps));
    let mut fft_buf = vec![(0.0f64, 0.0f64); nfft];
    let mut power_spec = vec![0.0f64; half_fft];
    let mut log_energies = vec![0.0f64; cfg.num_filters];

    for f in 0..num_frames {
        let frame = &emphasized[f * frame_step..f * frame_step + frame_len];

        for v in fft_buf.iter_mut() {
            *v = (0.0, 0.0);
        }
        for (slot, &sample) in fft_buf.iter_mut().zip(frame.iter()) {
            *slot = (sample, 0.0);
        }
        fft(&mut fft_buf);

        let mut frame_energy = 0.0;
        for (k, p) in power_spec.iter_mut().enumerate() {
            let (re, im) = fft_buf[k];
            *p = (re * re + im * im) / nfft as f64;
            frame_energy += *p;
        }

        for (m, filter) in filterbank.iter().enumerate() {
            let energy: f64 = filter.iter().zip(power_spec.iter()).map(|(w, p)| w * p).sum();
            log_energies[m] = floor_eps(energy).ln();
        }

        let mut ceps = dct_ortho(&log_energies, cfg.num_ceps);
        for (c, l) in ceps.iter_mut().zip(lifter.iter()) {
            *c *= l;
        }
        if cfg.append_energy {
            ceps[0] = floor_eps(frame_energy).ln();
        }

        for (c, value) in ceps.into_iter().enumerate() {
            features[[f, c]] = value;
        }
    }

    Some(features)
}

fn floor_eps(v: f64) -> f64 {
    if v == 0.0 {
        f64::EPSILON
    } else {
        v
    }
}

/// First-order regression deltas over `n` frames on each side, with the
/// edge frames repeated.
pub fn delta(features: &Array2<f64>, n: usize) -> Array2<f64> {
    let (frames, dims) = features.dim();
    let mut out = Array2::<f64>::zeros((frames, dims));
    if n == 0 || frames == 0 {
        return out;
    }

    let denominator = 2.0 * (1..=n).map(|i| (i * i) as f64).sum::<f64>();
    let clamp = |t: isize| t.clamp(0, frames as isize - 1) as usize;

    for t in 0..frames {
        let mut row = out.row_mut(t);
        for i in 1..=n {
            let ahead = features.row(clamp(t as isize + i as isize));
            let behind = features.row(clamp(t as isize - i as isize));
            row.scaled_add(i as f64, &(&ahead - &behind));
        }
        row /= denominator;
    }
    out
}

/// MFCCs with deltas appended, `[frames, 2 * num_ceps]`.
pub fn extract_features(signal: &[f64], sample_rate: u32, cfg: &MfccConfig) -> Option<Array2<f64>> {
    let statics = mfcc(signal, sample_rate, cfg)?;
    let deltas = delta(&statics, cfg.delta_window);
    concatenate(Axis(1), &[statics.view(), deltas.view()]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn tone(freq: f64, secs: f64, sample_rate: u32) -> Vec<f64> {
        let n = (secs * sample_rate as f64) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / sample_rate as f64).sin() * 8000.0)
            .collect()
    }

    #[test]
    fn test_config_default() {
        let cfg = MfccConfig::default();
        assert_eq!(cfg.num_filters, 40);
        assert_eq!(cfg.num_ceps, 20);
        assert_eq!(cfg.delta_window, 2);
    }

    #[test]
    fn test_frame_count() {
        // 16000 samples, 400-sample frames, 160 step: 1 + ceil(15600 / 160) = 99
        let signal = tone(440.0, 1.0, 16000);
        let feats = mfcc(&signal, 16000, &MfccConfig::default()).unwrap();
        assert_eq!(feats.dim(), (99, 20));
    }

    #[test]
    fn test_short_signal_is_one_frame() {
        let feats = mfcc(&[1.0, 2.0, 3.0], 16000, &MfccConfig::default()).unwrap();
        assert_eq!(feats.nrows(), 1);
    }

    #[test]
    fn test_empty_signal() {
        assert!(mfcc(&[], 16000, &MfccConfig::default()).is_none());
    }

    #[test]
    fn test_silence_is_finite() {
        let feats = mfcc(&vec![0.0; 4000], 16000, &MfccConfig::default()).unwrap();
        assert!(feats.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_extract_features_width() {
        let signal = tone(300.0, 0.5, 16000);
        let feats = extract_features(&signal, 16000, &MfccConfig::default()).unwrap();
        assert_eq!(feats.ncols(), 40);
        assert_eq!(feats.nrows(), 49);
    }

    #[test]
    fn test_different_tones_differ() {
        let cfg = MfccConfig::default();
        let low = mfcc(&tone(200.0, 0.3, 16000), 16000, &cfg).unwrap();
        let high = mfcc(&tone(3000.0, 0.3, 16000), 16000, &cfg).unwrap();
        let diff: f64 = (&low.row(5) - &high.row(5)).iter().map(|d| d.abs()).sum();
        assert!(diff > 1.0);
    }

    #[test]
    fn test_nfft_grows_for_high_sample_rates() {
        // 44.1 kHz: 1103-sample frames need a 2048-point FFT
        let signal = tone(440.0, 0.2, 44100);
        let feats = mfcc(&signal, 44100, &MfccConfig::default()).unwrap();
        assert!(feats.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_delta_of_constant_is_zero() {
        let feats = Array2::from_elem((6, 3), 4.2);
        let d = delta(&feats, 2);
        assert!(d.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_delta_of_ramp_is_slope() {
        let feats = Array2::from_shape_fn((10, 2), |(t, c)| (t as f64) * (c as f64 + 1.0));
        let d = delta(&feats, 2);
        for t in 2..8 {
            assert!((d[[t, 0]] - 1.0).abs() < 1e-12);
            assert!((d[[t, 1]] - 2.0).abs() < 1e-12);
        }
        // edges are padded by repetition
        assert!((d[[0, 0]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_dct_of_constant() {
        let out = dct_ortho(&[1.0, 1.0, 1.0, 1.0], 3);
        assert!((out[0] - 2.0).abs() < 1e-12);
        assert!(out[1].abs() < 1e-12);
        assert!(out[2].abs() < 1e-12);
    }

    #[test]
    fn test_fft_impulse() {
        let mut buf = vec![(1.0, 0.0), (0.0, 0.0), (0.0, 0.0), (0.0, 0.0)];
        fft(&mut buf);
        for (re, im) in &buf {
            assert!((re - 1.0).abs() < 1e-10);
            assert!(im.abs() < 1e-10);
        }
    }

    #[test]
    fn test_mel_hz_roundtrip() {
        for &hz in &[0.0, 100.0, 440.0, 1000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn test_filterbank_shape() {
        let fb = mel_filterbank(40, 512, 16000, 0.0, 8000.0);
        assert_eq!(fb.len(), 40);
        assert!(fb.iter().all(|f| f.len() == 257));
        assert!(fb.iter().flatten().all(|&w| (0.0..=1.0).contains(&w)));
    }

    #[test]
    fn test_delta_small_matrix() {
        let feats = array![[0.0], [1.0], [4.0]];
        let d = delta(&feats, 1);
        // (x[t+1] - x[t-1]) / 2 with edge padding
        assert!((d[[0, 0]] - 0.5).abs() < 1e-12);
        assert!((d[[1, 0]] - 2.0).abs() < 1e-12);
        assert!((d[[2, 0]] - 1.5).abs() < 1e-12);
    }
}
