//! Multi-modal biometric verification.
//!
//! Each entry point takes two sample files of one modality and returns a
//! confidence in `[0, 1]` that they come from the same person. Failures of
//! any kind (missing files, no face, no palm contour, undecodable audio)
//! are logged and reported as `0.0`.

pub mod calibration;
pub mod config;
pub mod decision;
pub mod error;
pub mod faces;
pub mod logging;
pub mod palm;
pub mod voice;

use std::path::Path;

pub use config::Config;
pub use decision::{DecisionConfig, Modality, Verdict, VerificationSummary};
pub use error::MatchError;
pub use faces::{FaceConfig, FaceMatcher};
pub use palm::{PalmConfig, PalmMatcher};
pub use voice::{VoiceConfig, VoiceMatcher};

/// Face confidence using the default ONNX models and threshold.
pub fn compare_faces(reference: &Path, candidate: &Path) -> f64 {
    FaceMatcher::onnx(FaceConfig::default()).compare(reference, candidate)
}

/// Palm confidence from segmentation and keypoint matching.
pub fn compare_palms_advanced(a: &Path, b: &Path) -> f64 {
    PalmMatcher::default().compare_advanced(a, b)
}

/// Palm confidence from whole-image structural similarity.
pub fn compare_palms_simple(a: &Path, b: &Path) -> f64 {
    PalmMatcher::default().compare_simple(a, b)
}

/// Speaker confidence of `new` against a model of `reference`.
pub fn verify_voice(reference: &Path, new: &Path) -> f64 {
    VoiceMatcher::default().verify(reference, new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_entry_points_fail_soft_on_missing_files() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");

        assert_eq!(compare_faces(&a, &b), 0.0);
        assert_eq!(compare_palms_advanced(&a, &b), 0.0);
        assert_eq!(compare_palms_simple(&a, &b), 0.0);
        assert_eq!(verify_voice(&dir.path().join("a.wav"), &dir.path().join("b.wav")), 0.0);
    }
}
