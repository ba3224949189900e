//! Oriented FAST keypoints with steered binary descriptors.
//!
//! Keypoints are detected with FAST-9 on a scale pyramid, oriented by the
//! intensity centroid of a circular patch, and described by 256 pairwise
//! intensity tests on a smoothed copy of their pyramid level. The test
//! pattern is rotated by the keypoint angle so descriptors tolerate
//! in-plane rotation.

use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Bits per descriptor
pub const DESCRIPTOR_BITS: usize = 256;

/// Binary descriptor, one bit per intensity test
pub type Descriptor = [u8; DESCRIPTOR_BITS / 8];

/// Largest test offset from the keypoint, before rotation
const PATTERN_RADIUS: i32 = 13;
/// Radius of the patch used for orientation
const ORIENTATION_RADIUS: i32 = 15;
const PATTERN_SEED: u64 = 0x0b1d_c4ec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbConfig {
    #[serde(default = "default_max_features")]
    pub max_features: usize,

    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,

    #[serde(default = "default_levels")]
    pub levels: usize,

    /// FAST intensity threshold
    #[serde(default = "default_fast_threshold")]
    pub fast_threshold: u8,

    /// Keypoints closer than this to a level border are dropped
    #[serde(default = "default_edge_threshold")]
    pub edge_threshold: u32,

    /// Smoothing applied before the intensity tests
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
}

fn default_max_features() -> usize {
    1500
}

fn default_scale_factor() -> f32 {
    1.2
}

fn default_levels() -> usize {
    8
}

fn default_fast_threshold() -> u8 {
    20
}

fn default_edge_threshold() -> u32 {
    31
}

fn default_blur_sigma() -> f32 {
    2.0
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            max_features: default_max_features(),
            scale_factor: default_scale_factor(),
            levels: default_levels(),
            fast_threshold: default_fast_threshold(),
            edge_threshold: default_edge_threshold(),
            blur_sigma: default_blur_sigma(),
        }
    }
}

/// Detected keypoint in level-0 coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Orientation in radians
    pub angle: f32,
    pub level: usize,
    pub response: f32,
}

/// Keypoints paired index-for-index with their descriptors
#[derive(Debug, Clone, Default)]
pub struct KeypointSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl KeypointSet {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

type TestPair = ((i32, i32), (i32, i32));

/// Fixed pseudo-random test pattern shared by every descriptor
fn test_pattern() -> &'static [TestPair] {
    static PATTERN: OnceLock<Vec<TestPair>> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut offset = || {
            (
                rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
            )
        };
        (0..DESCRIPTOR_BITS).map(|_| (offset(), offset())).collect()
    })
}

/// Number of differing bits
pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Per-level feature budget, shrinking geometrically with the scale
fn features_per_level(config: &OrbConfig) -> Vec<usize> {
    let levels = config.levels.max(1);
    let factor = 1.0 / config.scale_factor as f64;
    let first = if (factor - 1.0).abs() < f64::EPSILON {
        config.max_features as f64 / levels as f64
    } else {
        config.max_features as f64 * (1.0 - factor) / (1.0 - factor.powi(levels as i32))
    };

    let mut budgets = Vec::with_capacity(levels);
    let mut desired = first;
    let mut assigned = 0usize;
    for _ in 0..levels - 1 {
        let n = (desired.round() as usize).min(config.max_features - assigned);
        budgets.push(n);
        assigned += n;
        desired *= factor;
    }
    budgets.push(config.max_features - assigned);
    budgets
}

/// Intensity-centroid orientation of the circular patch around (x, y)
fn orientation(image: &GrayImage, x: u32, y: u32) -> f32 {
    let mut m01 = 0i64;
    let mut m10 = 0i64;
    let r2 = ORIENTATION_RADIUS * ORIENTATION_RADIUS;

    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let v = image.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as i64;
            m10 += dx as i64 * v;
            m01 += dy as i64 * v;
        }
    }

    (m01 as f32).atan2(m10 as f32)
}

/// Steered descriptor of the keypoint at (x, y) on a smoothed level
fn describe(smoothed: &GrayImage, x: u32, y: u32, angle: f32) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let sample = |(px, py): (i32, i32)| {
        let rx = (cos * px as f32 - sin * py as f32).round() as i32;
        let ry = (sin * px as f32 + cos * py as f32).round() as i32;
        smoothed.get_pixel((x as i32 + rx) as u32, (y as i32 + ry) as u32)[0]
    };

    let mut descriptor = [0u8; DESCRIPTOR_BITS / 8];
    for (bit, &(p, q)) in test_pattern().iter().enumerate() {
        if sample(p) < sample(q) {
            descriptor[bit / 8] |= 1 << (bit % 8);
        }
    }
    descriptor
}

/// Detect up to `max_features` keypoints and compute their descriptors.
pub fn detect_and_compute(image: &GrayImage, config: &OrbConfig) -> KeypointSet {
    let budgets = features_per_level(config);
    // rotated test offsets reach PATTERN_RADIUS * sqrt(2)
    let border = config
        .edge_threshold
        .max((ORIENTATION_RADIUS + 1) as u32)
        .max((PATTERN_RADIUS as f32 * std::f32::consts::SQRT_2).ceil() as u32 + 1);

    let mut set = KeypointSet::default();
    let mut scale = 1.0f32;

    for (level, &budget) in budgets.iter().enumerate() {
        if level > 0 {
            scale *= config.scale_factor;
        }
        let width = (image.width() as f32 / scale).round() as u32;
        let height = (image.height() as f32 / scale).round() as u32;
        if width <= 2 * border || height <= 2 * border {
            break;
        }
        if budget == 0 {
            continue;
        }

        let level_image = if level == 0 {
            image.clone()
        } else {
            imageops::resize(image, width, height, FilterType::Triangle)
        };

        let mut corners: Vec<_> = corners_fast9(&level_image, config.fast_threshold)
            .into_iter()
            .filter(|c| {
                c.x >= border && c.y >= border && c.x < width - border && c.y < height - border
            })
            .collect();
        if corners.is_empty() {
            continue;
        }

        corners.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.y.cmp(&b.y))
                .then(a.x.cmp(&b.x))
        });
        corners.truncate(budget);

        let smoothed = gaussian_blur_f32(&level_image, config.blur_sigma);

        for corner in corners {
            let angle = orientation(&level_image, corner.x, corner.y);
            set.descriptors.push(describe(&smoothed, corner.x, corner.y, angle));
            set.keypoints.push(Keypoint {
                x: corner.x as f32 * scale,
                y: corner.y as f32 * scale,
                angle,
                level,
                response: corner.score,
            });
        }
    }

    tracing::debug!(keypoints = set.len(), "Keypoints detected");
    set
}
