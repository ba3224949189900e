//! Speaker verification.
//!
//! A mixture model is fitted to the reference recording's cepstral features
//! on every call and the new recording is scored against it. The model never
//! outlives the comparison.

pub mod gmm;
pub mod mfcc;
pub mod wav;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::calibration::{voice_confidence, DEFAULT_VOICE_AGGRESSIVENESS, DEFAULT_VOICE_MIDPOINT};
use crate::error::{fail_soft, MatchError};
pub use gmm::{GaussianMixture, GmmConfig};
pub use mfcc::MfccConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Mean log-likelihood that maps to 50% confidence
    #[serde(default = "default_midpoint")]
    pub midpoint: f64,

    /// Curve sharpness above the midpoint
    #[serde(default = "default_aggressiveness")]
    pub aggressiveness: f64,

    #[serde(default)]
    pub mfcc: MfccConfig,

    #[serde(default)]
    pub gmm: GmmConfig,
}

fn default_midpoint() -> f64 {
    DEFAULT_VOICE_MIDPOINT
}

fn default_aggressiveness() -> f64 {
    DEFAULT_VOICE_AGGRESSIVENESS
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            midpoint: default_midpoint(),
            aggressiveness: default_aggressiveness(),
            mfcc: MfccConfig::default(),
            gmm: GmmConfig::default(),
        }
    }
}

pub struct VoiceMatcher {
    config: VoiceConfig,
}

impl VoiceMatcher {
    pub fn new(config: VoiceConfig) -> Self {
        Self { config }
    }

    /// Confidence that both recordings share a speaker. Every failure is
    /// reported as 0.
    pub fn verify(&self, reference: &Path, new: &Path) -> f64 {
        fail_soft("verify_voice", || self.try_verify(reference, new))
    }

    pub fn try_verify(&self, reference: &Path, new: &Path) -> Result<f64, MatchError> {
        tracing::info!(reference = %reference.display(), new = %new.display(), "Starting voice verification");

        let reference_features = self.features(reference)?;
        let new_features = self.features(new)?;

        let model = GaussianMixture::fit(&reference_features, &self.config.gmm)?;
        let raw = model.score(&new_features)?;
        tracing::info!(raw_score = raw, "Voice log-likelihood");

        let confidence = voice_confidence(raw, self.config.midpoint, self.config.aggressiveness);
        tracing::info!(confidence, "Voice confidence");
        Ok(confidence)
    }

    /// Cepstral coefficients and deltas, one row per frame
    pub fn features(&self, path: &Path) -> Result<Array2<f64>, MatchError> {
        let wave = wav::read_wav(path)?;
        if wave.samples.iter().all(|s| *s == 0.0) {
            return Err(MatchError::extraction(path, "recording is silent"));
        }
        let features = mfcc::extract_features(&wave.samples, wave.sample_rate, &self.config.mfcc)
            .ok_or_else(|| MatchError::extraction(path, "no frames could be extracted"))?;
        tracing::debug!(
            path = %path.display(),
            frames = features.nrows(),
            dims = features.ncols(),
            seconds = wave.duration_secs(),
            "Extracted voice features"
        );
        Ok(features)
    }
}

impl Default for VoiceMatcher {
    fn default() -> Self {
        Self::new(VoiceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn mono_spec() -> WavSpec {
        WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    fn write_silence(dir: &TempDir, name: &str, secs: f64) -> PathBuf {
        let path = dir.path().join(name);
        let mut writer = WavWriter::create(&path, mono_spec()).unwrap();
        for _ in 0..(secs * 16000.0) as usize {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    /// Two-tone signal with a little noise so every frame differs
    fn write_voice(dir: &TempDir, name: &str, f1: f64, f2: f64, secs: f64, seed: u64) -> PathBuf {
        let path = dir.path().join(name);
        let spec = mono_spec();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut writer = WavWriter::create(&path, spec).unwrap();
        let n = (secs * 16000.0) as usize;
        for i in 0..n {
            let t = i as f64 / 16000.0;
            let v = 6000.0 * (2.0 * PI * f1 * t).sin()
                + 3000.0 * (2.0 * PI * f2 * t).sin()
                + rng.gen_range(-400.0..400.0);
            writer.write_sample(v as i16).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_config_default() {
        let cfg = VoiceConfig::default();
        assert_eq!(cfg.midpoint, -123.0);
        assert_eq!(cfg.aggressiveness, 3.0);
        assert_eq!(cfg.gmm.n_components, 16);
        assert_eq!(cfg.mfcc.num_ceps, 20);
    }

    #[test]
    fn test_features_have_forty_columns() {
        let dir = TempDir::new().unwrap();
        let path = write_voice(&dir, "a.wav", 220.0, 660.0, 1.0, 1);
        let features = VoiceMatcher::default().features(&path).unwrap();
        assert_eq!(features.ncols(), 40);
        assert_eq!(features.nrows(), 99);
    }

    #[test]
    fn test_scores_are_bounded() {
        let dir = TempDir::new().unwrap();
        let reference = write_voice(&dir, "ref.wav", 220.0, 660.0, 1.5, 1);
        let same = write_voice(&dir, "same.wav", 220.0, 660.0, 1.5, 2);
        let other = write_voice(&dir, "other.wav", 1200.0, 3100.0, 1.5, 3);

        let matcher = VoiceMatcher::default();
        let s_same = matcher.verify(&reference, &same);
        let s_other = matcher.verify(&reference, &other);
        assert!((0.0..=1.0).contains(&s_same));
        assert!((0.0..=1.0).contains(&s_other));
    }

    #[test]
    fn test_missing_file_scores_zero() {
        let dir = TempDir::new().unwrap();
        let reference = write_voice(&dir, "ref.wav", 220.0, 660.0, 1.0, 1);
        let missing = dir.path().join("missing.wav");

        let matcher = VoiceMatcher::default();
        assert_eq!(matcher.verify(&reference, &missing), 0.0);
        assert_eq!(matcher.verify(&missing, &reference), 0.0);
        assert!(matches!(
            matcher.try_verify(&missing, &reference),
            Err(MatchError::Input { .. })
        ));
    }

    #[test]
    fn test_too_short_reference_scores_zero() {
        let dir = TempDir::new().unwrap();
        // 0.05 s gives 4 frames, fewer than the 16 mixture components
        let short = write_voice(&dir, "short.wav", 220.0, 660.0, 0.05, 1);
        let long = write_voice(&dir, "long.wav", 220.0, 660.0, 1.0, 2);

        let matcher = VoiceMatcher::default();
        assert_eq!(matcher.verify(&short, &long), 0.0);
        assert!(matches!(
            matcher.try_verify(&short, &long),
            Err(MatchError::Computation(_))
        ));
    }

    #[test]
    fn test_silent_recordings_score_zero() {
        let dir = TempDir::new().unwrap();
        let silent_a = write_silence(&dir, "silent_a.wav", 1.0);
        let silent_b = write_silence(&dir, "silent_b.wav", 1.0);
        let voice = write_voice(&dir, "voice.wav", 220.0, 660.0, 1.0, 1);

        let matcher = VoiceMatcher::default();
        assert_eq!(matcher.verify(&silent_a, &silent_b), 0.0);
        assert_eq!(matcher.verify(&silent_a, &silent_a), 0.0);
        assert_eq!(matcher.verify(&voice, &silent_a), 0.0);
        assert!(matches!(
            matcher.try_verify(&silent_a, &silent_b),
            Err(MatchError::Extraction { .. })
        ));
    }
}
