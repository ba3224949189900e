//! Accept/reject decisions on top of the raw confidence scores.

use serde::{Deserialize, Serialize};

/// Biometric modality of a comparison
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Face,
    Palm,
    Voice,
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modality::Face => write!(f, "face"),
            Modality::Palm => write!(f, "palm"),
            Modality::Voice => write!(f, "voice"),
        }
    }
}

/// Linear stretch of the palm score range before thresholding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescaleRange {
    #[serde(default = "default_original_min")]
    pub original_min: f64,

    #[serde(default = "default_original_max")]
    pub original_max: f64,

    #[serde(default = "default_new_min")]
    pub new_min: f64,

    #[serde(default = "default_new_max")]
    pub new_max: f64,
}

fn default_original_min() -> f64 {
    0.39
}

fn default_original_max() -> f64 {
    1.0
}

fn default_new_min() -> f64 {
    0.80
}

fn default_new_max() -> f64 {
    1.0
}

impl Default for RescaleRange {
    fn default() -> Self {
        Self {
            original_min: default_original_min(),
            original_max: default_original_max(),
            new_min: default_new_min(),
            new_max: default_new_max(),
        }
    }
}

impl RescaleRange {
    /// Map a raw score onto the new range. Scores below `original_min`
    /// are rejected outright as 0.
    pub fn apply(&self, raw: f64) -> f64 {
        if raw.is_nan() || raw < self.original_min {
            return 0.0;
        }
        if self.original_min >= self.original_max {
            return self.new_min;
        }

        let scaled = self.new_min
            + (raw - self.original_min) * (self.new_max - self.new_min)
                / (self.original_max - self.original_min);
        scaled.min(self.new_max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Face scores strictly above this are accepted
    #[serde(default = "default_face_threshold")]
    pub face_threshold: f64,

    /// Rescaled palm scores at or above this are accepted
    #[serde(default = "default_palm_threshold")]
    pub palm_threshold: f64,

    /// Voice scores strictly above this are accepted
    #[serde(default = "default_voice_threshold")]
    pub voice_threshold: f64,

    /// Tuned on whole-image SSIM palm scores
    #[serde(default)]
    pub palm_rescale: RescaleRange,
}

fn default_face_threshold() -> f64 {
    0.60
}

fn default_palm_threshold() -> f64 {
    0.75
}

fn default_voice_threshold() -> f64 {
    0.75
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            face_threshold: default_face_threshold(),
            palm_threshold: default_palm_threshold(),
            voice_threshold: default_voice_threshold(),
            palm_rescale: RescaleRange::default(),
        }
    }
}

/// Outcome of one modality
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub modality: Modality,
    /// Confidence returned by the matcher
    pub raw_score: f64,
    /// Score the threshold was applied to
    pub score: f64,
    pub accepted: bool,
}

impl Verdict {
    pub fn percent(&self) -> f64 {
        self.score * 100.0
    }
}

impl DecisionConfig {
    pub fn decide(&self, modality: Modality, raw_score: f64) -> Verdict {
        let (score, accepted) = match modality {
            Modality::Face => (raw_score, raw_score > self.face_threshold),
            Modality::Palm => {
                let rescaled = self.palm_rescale.apply(raw_score);
                (rescaled, rescaled >= self.palm_threshold)
            }
            Modality::Voice => (raw_score, raw_score > self.voice_threshold),
        };

        tracing::debug!(%modality, raw_score, score, accepted, "Decision");

        Verdict {
            modality,
            raw_score,
            score,
            accepted,
        }
    }
}

/// Combined result of a multi-modal verification session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub face: Option<Verdict>,
    pub palm: Option<Verdict>,
    pub voice: Option<Verdict>,
}

impl VerificationSummary {
    pub fn record(&mut self, verdict: Verdict) {
        match verdict.modality {
            Modality::Face => self.face = Some(verdict),
            Modality::Palm => self.palm = Some(verdict),
            Modality::Voice => self.voice = Some(verdict),
        }
    }

    pub fn verdicts(&self) -> impl Iterator<Item = &Verdict> {
        [&self.face, &self.palm, &self.voice]
            .into_iter()
            .filter_map(|v| v.as_ref())
    }

    /// True when at least one modality was checked and all checks passed
    pub fn accepted(&self) -> bool {
        let mut any = false;
        for verdict in self.verdicts() {
            if !verdict.accepted {
                return false;
            }
            any = true;
        }
        any
    }
}
