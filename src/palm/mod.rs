//! Palm verification.
//!
//! Two independent strategies are offered. The advanced path isolates the
//! palm (Otsu mask, largest contour, distance transform centre, fixed-size
//! crop) and scores mutual keypoint matches. The simple path compares the
//! whole resized images with SSIM.

pub mod matching;
pub mod orb;
pub mod segment;
pub mod ssim;

use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::calibration::{palm_match_score, DEFAULT_PALM_NORMALIZATION, PALM_EPSILON};
use crate::error::{fail_soft, MatchError};
pub use orb::OrbConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PalmConfig {
    /// Side of the square palm crop
    #[serde(default = "default_crop_size")]
    pub crop_size: u32,

    /// Number of best matches that contribute to the score
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Divisor for the summed inverse match distances
    #[serde(default = "default_normalization")]
    pub normalization: f64,

    /// Side of the square both images are resized to for SSIM
    #[serde(default = "default_ssim_size")]
    pub ssim_size: u32,

    #[serde(default = "default_ssim_window")]
    pub ssim_window: u32,

    #[serde(default)]
    pub orb: OrbConfig,
}

fn default_crop_size() -> u32 {
    300
}

fn default_top_k() -> usize {
    50
}

fn default_normalization() -> f64 {
    DEFAULT_PALM_NORMALIZATION
}

fn default_ssim_size() -> u32 {
    512
}

fn default_ssim_window() -> u32 {
    7
}

impl Default for PalmConfig {
    fn default() -> Self {
        Self {
            crop_size: default_crop_size(),
            top_k: default_top_k(),
            normalization: default_normalization(),
            ssim_size: default_ssim_size(),
            ssim_window: default_ssim_window(),
            orb: OrbConfig::default(),
        }
    }
}

fn load_gray(path: &Path) -> Result<GrayImage, MatchError> {
    Ok(image::open(path).map_err(|e| MatchError::input(path, e))?.to_luma8())
}

pub struct PalmMatcher {
    config: PalmConfig,
}

impl PalmMatcher {
    pub fn new(config: PalmConfig) -> Self {
        Self { config }
    }

    /// Segmentation + keypoint comparison. Every failure is reported as 0.
    pub fn compare_advanced(&self, a: &Path, b: &Path) -> f64 {
        fail_soft("compare_palms_advanced", || self.try_compare_advanced(a, b))
    }

    /// Whole-image SSIM comparison. Every failure is reported as 0.
    pub fn compare_simple(&self, a: &Path, b: &Path) -> f64 {
        fail_soft("compare_palms_simple", || self.try_compare_simple(a, b))
    }

    fn palm_crop(&self, path: &Path) -> Result<GrayImage, MatchError> {
        let gray = load_gray(path)?;
        let crop = segment::find_and_crop_palm(&gray, self.config.crop_size)
            .ok_or_else(|| MatchError::NoContours(path.to_path_buf()))?;
        tracing::debug!(path = %path.display(), "Isolated palm region");
        Ok(crop)
    }

    pub fn try_compare_advanced(&self, a: &Path, b: &Path) -> Result<f64, MatchError> {
        tracing::info!(a = %a.display(), b = %b.display(), "Starting advanced palm comparison");

        let palm_a = self.palm_crop(a)?;
        let palm_b = self.palm_crop(b)?;
        self.score_crops(&palm_a, &palm_b, a, b)
    }

    fn score_crops(&self, palm_a: &GrayImage, palm_b: &GrayImage, a: &Path, b: &Path) -> Result<f64, MatchError> {
        let features_a = orb::detect_and_compute(palm_a, &self.config.orb);
        let features_b = orb::detect_and_compute(palm_b, &self.config.orb);

        if features_a.is_empty() {
            return Err(MatchError::NoDescriptors(a.to_path_buf()));
        }
        if features_b.is_empty() {
            return Err(MatchError::NoDescriptors(b.to_path_buf()));
        }
        tracing::info!(a = features_a.len(), b = features_b.len(), "Features found in palms");

        let matches = matching::match_cross_checked(&features_a.descriptors, &features_b.descriptors);
        let total = matches.len();
        let good = matching::best_matches(matches, self.config.top_k);
        tracing::info!(total, kept = good.len(), "Descriptor matches");

        let distances: Vec<f64> = good.iter().map(|m| m.distance as f64).collect();
        let score = palm_match_score(&distances, PALM_EPSILON, self.config.normalization);
        tracing::info!(score, "Palm match score");
        Ok(score)
    }

    pub fn try_compare_simple(&self, a: &Path, b: &Path) -> Result<f64, MatchError> {
        tracing::info!(a = %a.display(), b = %b.display(), "Starting SSIM palm comparison");

        let size = self.config.ssim_size;
        let resized_a = imageops::resize(&load_gray(a)?, size, size, FilterType::Triangle);
        let resized_b = imageops::resize(&load_gray(b)?, size, size, FilterType::Triangle);

        let score = ssim::mean_ssim(&resized_a, &resized_b, self.config.ssim_window, 255.0)
            .ok_or_else(|| {
                MatchError::Computation(format!(
                    "SSIM window {} does not fit {}x{} images",
                    self.config.ssim_window, size, size
                ))
            })?;
        tracing::info!(score, "SSIM comparison score");
        Ok(score.max(0.0))
    }
}

impl Default for PalmMatcher {
    fn default() -> Self {
        Self::new(PalmConfig::default())
    }
}
