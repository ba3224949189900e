use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{default_models_dir, FaceEmbedding, FaceEncoder, OnnxFaceEncoder};
use crate::calibration::{face_confidence, DEFAULT_FACE_THRESHOLD};
use crate::error::{fail_soft, MatchError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceConfig {
    /// Embedding distance at which confidence drops below 50%.
    /// Embeddings are unit length, so 0.6 corresponds to cosine 0.82.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Where the ONNX models are cached (defaults to the data directory)
    #[serde(default)]
    pub models_dir: Option<PathBuf>,

    /// Minimum detector score for a face
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,
}

fn default_threshold() -> f64 {
    DEFAULT_FACE_THRESHOLD
}

fn default_detection_confidence() -> f32 {
    0.7
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            models_dir: None,
            detection_confidence: default_detection_confidence(),
        }
    }
}

/// Orientations tried in order when the upright image yields no face
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    Upright,
    Clockwise90,
    Rotated180,
    CounterClockwise90,
}

impl Orientation {
    const RETRY_ORDER: [Orientation; 4] = [
        Orientation::Upright,
        Orientation::Clockwise90,
        Orientation::Rotated180,
        Orientation::CounterClockwise90,
    ];

    fn apply(self, image: &DynamicImage) -> DynamicImage {
        match self {
            Orientation::Upright => image.clone(),
            Orientation::Clockwise90 => image.rotate90(),
            Orientation::Rotated180 => image.rotate180(),
            Orientation::CounterClockwise90 => image.rotate270(),
        }
    }
}

/// Face verification against a single reference image
pub struct FaceMatcher<E> {
    config: FaceConfig,
    encoder: E,
}

impl FaceMatcher<OnnxFaceEncoder> {
    /// Matcher backed by the ONNX models in `config.models_dir`, or the
    /// default models directory.
    pub fn onnx(config: FaceConfig) -> Self {
        let models_dir = config.models_dir.clone().unwrap_or_else(default_models_dir);
        let encoder = OnnxFaceEncoder::new(models_dir).with_thresholds(config.detection_confidence, 0.3);
        Self::new(config, encoder)
    }
}

impl<E: FaceEncoder> FaceMatcher<E> {
    pub fn new(config: FaceConfig, encoder: E) -> Self {
        Self { config, encoder }
    }

    /// Confidence in [0, 1] that both images show the same person.
    /// Every failure is reported as 0.
    pub fn compare(&self, reference: &Path, candidate: &Path) -> f64 {
        fail_soft("compare_faces", || self.try_compare(reference, candidate))
    }

    pub fn try_compare(&self, reference: &Path, candidate: &Path) -> Result<f64, MatchError> {
        tracing::info!(reference = %reference.display(), candidate = %candidate.display(), "Comparing faces");

        let reference_embedding = self.embedding_for(reference)?;
        let candidate_embedding = self.embedding_for(candidate)?;

        let distance = reference_embedding
            .distance(&candidate_embedding)
            .ok_or_else(|| {
                MatchError::Computation(format!(
                    "embedding dimensions differ: {} vs {}",
                    reference_embedding.dim(),
                    candidate_embedding.dim()
                ))
            })?;

        let confidence = face_confidence(distance, self.config.threshold);
        tracing::info!(distance, confidence, "Face distance calibrated");
        Ok(confidence)
    }

    fn embedding_for(&self, path: &Path) -> Result<FaceEmbedding, MatchError> {
        let image = image::open(path).map_err(|e| MatchError::input(path, e))?;
        self.encode_any_orientation(&image)?
            .ok_or_else(|| MatchError::NoFace(path.to_path_buf()))
    }

    /// First embedding found, trying the upright image and then each rotation
    fn encode_any_orientation(&self, image: &DynamicImage) -> Result<Option<FaceEmbedding>, MatchError> {
        for orientation in Orientation::RETRY_ORDER {
            let oriented = orientation.apply(image);
            let mut faces = self
                .encoder
                .encode(&oriented)
                .map_err(|e| MatchError::Model(e.to_string()))?;

            if faces.is_empty() {
                tracing::debug!(?orientation, "No face found");
                continue;
            }

            if faces.len() > 1 {
                tracing::warn!(
                    discarded = faces.len() - 1,
                    "Multiple faces detected, using the first one"
                );
            }
            if orientation != Orientation::Upright {
                tracing::info!(?orientation, "Found face after rotating");
            }

            return Ok(Some(faces.swap_remove(0)));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};
    use std::cell::Cell;
    use tempfile::TempDir;

    /// Treats a white top-left pixel as an upright face. The embedding is
    /// the mean brightness of the first row, so images can differ.
    struct MarkerEncoder {
        faces_per_image: usize,
        calls: Cell<usize>,
    }

    impl MarkerEncoder {
        fn new(faces_per_image: usize) -> Self {
            Self {
                faces_per_image,
                calls: Cell::new(0),
            }
        }
    }

    impl FaceEncoder for MarkerEncoder {
        fn encode(&self, image: &DynamicImage) -> anyhow::Result<Vec<FaceEmbedding>> {
            self.calls.set(self.calls.get() + 1);
            let rgb = image.to_rgb8();
            if rgb.get_pixel(0, 0) != &Rgb([255, 255, 255]) {
                return Ok(Vec::new());
            }

            let row_mean = (0..rgb.width())
                .map(|x| rgb.get_pixel(x, 1)[0] as f32)
                .sum::<f32>()
                / rgb.width() as f32
                / 255.0;

            Ok((0..self.faces_per_image)
                .map(|i| FaceEmbedding::new(vec![row_mean, i as f32, 0.0]))
                .collect())
        }
    }

    struct FailingEncoder;

    impl FaceEncoder for FailingEncoder {
        fn encode(&self, _image: &DynamicImage) -> anyhow::Result<Vec<FaceEmbedding>> {
            anyhow::bail!("inference failed")
        }
    }

    fn upright(second_row: u8) -> DynamicImage {
        let mut img = RgbImage::from_pixel(16, 12, Rgb([0, 0, 0]));
        img.put_pixel(0, 0, Rgb([255, 255, 255]));
        for x in 0..16 {
            img.put_pixel(x, 1, Rgb([second_row, second_row, second_row]));
        }
        DynamicImage::ImageRgb8(img)
    }

    fn save(dir: &TempDir, name: &str, img: &DynamicImage) -> PathBuf {
        let path = dir.path().join(name);
        img.save(&path).unwrap();
        path
    }

    fn matcher<E: FaceEncoder>(encoder: E) -> FaceMatcher<E> {
        FaceMatcher::new(FaceConfig::default(), encoder)
    }

    #[test]
    fn test_identical_images_full_confidence() {
        let dir = TempDir::new().unwrap();
        let a = save(&dir, "a.png", &upright(100));
        let score = matcher(MarkerEncoder::new(1)).compare(&a, &a);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rotated_faces_are_found() {
        let dir = TempDir::new().unwrap();
        let reference = save(&dir, "ref.png", &upright(100));
        let base = upright(100);

        for (name, rotated) in [
            ("r90.png", base.rotate90()),
            ("r180.png", base.rotate180()),
            ("r270.png", base.rotate270()),
        ] {
            let path = save(&dir, name, &rotated);
            let score = matcher(MarkerEncoder::new(1)).compare(&reference, &path);
            assert!(score > 0.99, "{name} scored {score}");
        }
    }

    #[test]
    fn test_retry_stops_at_first_orientation_with_a_face() {
        let m = matcher(MarkerEncoder::new(1));
        let rotated = upright(10).rotate90();
        assert_eq!(rotated.dimensions(), (12, 16));

        let found = m.encode_any_orientation(&rotated).unwrap();
        assert!(found.is_some());
        // upright, cw90, 180 miss; ccw90 restores the marker
        assert_eq!(m.encoder.calls.get(), 4);
    }

    #[test]
    fn test_first_face_is_used() {
        let m = matcher(MarkerEncoder::new(3));
        let face = m.encode_any_orientation(&upright(0)).unwrap().unwrap();
        assert_eq!(face.as_slice()[1], 0.0);
    }

    #[test]
    fn test_no_face_scores_zero() {
        let dir = TempDir::new().unwrap();
        let blank = save(&dir, "blank.png", &DynamicImage::new_rgb8(16, 12));
        let face = save(&dir, "face.png", &upright(100));

        let m = matcher(MarkerEncoder::new(1));
        assert_eq!(m.compare(&blank, &face), 0.0);
        assert_eq!(m.compare(&face, &blank), 0.0);
        assert!(matches!(m.try_compare(&blank, &face), Err(MatchError::NoFace(_))));
    }

    #[test]
    fn test_missing_file_scores_zero() {
        let dir = TempDir::new().unwrap();
        let face = save(&dir, "face.png", &upright(100));
        let missing = dir.path().join("missing.png");

        let m = matcher(MarkerEncoder::new(1));
        assert_eq!(m.compare(&face, &missing), 0.0);
        assert!(matches!(m.try_compare(&face, &missing), Err(MatchError::Input { .. })));
    }

    #[test]
    fn test_encoder_failure_scores_zero() {
        let dir = TempDir::new().unwrap();
        let face = save(&dir, "face.png", &upright(100));
        assert_eq!(matcher(FailingEncoder).compare(&face, &face), 0.0);
    }

    #[test]
    fn test_different_faces_lower_confidence() {
        let dir = TempDir::new().unwrap();
        let a = save(&dir, "a.png", &upright(0));
        let b = save(&dir, "b.png", &upright(255));
        // embeddings differ by 1.0 in the first component
        let score = matcher(MarkerEncoder::new(1)).compare(&a, &b);
        assert_eq!(score, 0.0);

        let c = save(&dir, "c.png", &upright(51));
        let near = matcher(MarkerEncoder::new(1)).compare(&a, &c);
        assert!(near > 0.5 && near < 1.0, "near scored {near}");
    }

    #[test]
    fn test_onnx_matcher_without_models_fails_with_model_error() {
        let dir = TempDir::new().unwrap();
        let face = save(&dir, "face.png", &upright(100));
        let config = FaceConfig {
            models_dir: Some(dir.path().join("models")),
            ..FaceConfig::default()
        };

        let m = FaceMatcher::onnx(config);
        assert_eq!(m.compare(&face, &face), 0.0);
        match m.try_compare(&face, &face) {
            Err(MatchError::Model(msg)) => assert!(msg.contains("model missing"), "{msg}"),
            other => panic!("expected a model error, got {other:?}"),
        }
        assert!(!dir.path().join("models").exists());
    }
}
