//! Calibration curves mapping raw distances and likelihoods to [0, 1].

use crate::error::clamp_unit;

/// Default face match threshold (embedding distance)
pub const DEFAULT_FACE_THRESHOLD: f64 = 0.6;

/// Raw log-likelihood that maps to 50% voice confidence
pub const DEFAULT_VOICE_MIDPOINT: f64 = -123.0;

/// Curve sharpness above the voice midpoint
pub const DEFAULT_VOICE_AGGRESSIVENESS: f64 = 3.0;

/// Log-likelihood span above the midpoint that reaches full confidence
pub const VOICE_SCALE: f64 = 15.0;

/// Keeps a zero Hamming distance from dividing by zero
pub const PALM_EPSILON: f64 = 1e-6;

/// Empirical divisor for the summed inverse match distances
pub const DEFAULT_PALM_NORMALIZATION: f64 = 2.5;

/// Face confidence from an embedding distance.
///
/// Above the threshold the confidence decays linearly from 0.5 toward 0.
/// At or below it, the distance is mapped onto `[0.5, 1]` and boosted with
/// a squared term so that mid-range distances read as confident matches.
/// The curve never increases with distance.
pub fn face_confidence(distance: f64, threshold: f64) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }

    let confidence = if distance > threshold {
        let range = 1.0 - threshold;
        ((1.0 - distance) / (range * 2.0)).max(0.0)
    } else {
        let linear = 1.0 - distance / (threshold * 2.0);
        (linear + (1.0 - linear) * linear.powi(2)).max(0.0)
    };

    clamp_unit(confidence)
}

/// Voice confidence from an average log-likelihood.
pub fn voice_confidence(raw_score: f64, midpoint: f64, aggressiveness: f64) -> f64 {
    if raw_score.is_nan() {
        return 0.0;
    }

    let difference = raw_score - midpoint;
    let confidence = if difference < 0.0 {
        0.5 * (difference * 0.5).exp()
    } else {
        let normalized = difference / VOICE_SCALE;
        0.5 + 0.5 * normalized.powf(1.0 / aggressiveness)
    };

    clamp_unit(confidence)
}

/// Palm score from the distances of the kept descriptor matches.
///
/// An empty slice scores 0.
pub fn palm_match_score(distances: &[f64], epsilon: f64, normalization: f64) -> f64 {
    if distances.is_empty() || normalization <= 0.0 {
        return 0.0;
    }

    let total_inverse: f64 = distances.iter().map(|d| 1.0 / (d + epsilon)).sum();
    clamp_unit(total_inverse / normalization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_face_identical_is_full_confidence() {
        assert!((face_confidence(0.0, DEFAULT_FACE_THRESHOLD) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_face_above_threshold_is_linear() {
        // (1 - 0.8) / (2 * 0.4)
        assert!((face_confidence(0.8, 0.6) - 0.25).abs() < 1e-12);
        assert_eq!(face_confidence(1.0, 0.6), 0.0);
        assert_eq!(face_confidence(1.7, 0.6), 0.0);
    }

    #[test]
    fn test_face_at_threshold() {
        // linear = 0.5, boosted = 0.5 + 0.5 * 0.25
        assert!((face_confidence(0.6, 0.6) - 0.625).abs() < 1e-12);
        assert!(face_confidence(0.600001, 0.6) < 0.5);
    }

    #[test]
    fn test_face_nan_is_zero() {
        assert_eq!(face_confidence(f64::NAN, 0.6), 0.0);
    }

    #[test]
    fn test_voice_midpoint_is_half() {
        assert_eq!(voice_confidence(-123.0, -123.0, 3.0), 0.5);
    }

    #[test]
    fn test_voice_full_scale_is_one() {
        // 15 above the midpoint: 0.5 + 0.5 * 1^(1/3)
        assert!((voice_confidence(-108.0, -123.0, 3.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_voice_tails() {
        assert!(voice_confidence(-200.0, -123.0, 3.0) < 1e-10);
        assert_eq!(voice_confidence(0.0, -123.0, 3.0), 1.0);
        // 1.875 above: 0.5 + 0.5 * 0.125^(1/3) = 0.75
        assert!((voice_confidence(-121.125, -123.0, 3.0) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_palm_three_matches() {
        let score = palm_match_score(&[10.0, 20.0, 30.0], PALM_EPSILON, DEFAULT_PALM_NORMALIZATION);
        let expected = (1.0 / 10.000001 + 1.0 / 20.000001 + 1.0 / 30.000001) / 2.5;
        assert!((score - expected).abs() < 1e-12);
        assert!((score - 0.0733).abs() < 1e-4);
    }

    #[test]
    fn test_palm_caps_at_one() {
        let score = palm_match_score(&[0.0, 1.0], PALM_EPSILON, DEFAULT_PALM_NORMALIZATION);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_palm_no_matches() {
        assert_eq!(palm_match_score(&[], PALM_EPSILON, DEFAULT_PALM_NORMALIZATION), 0.0);
    }

    proptest! {
        #[test]
        fn prop_face_non_increasing(a in 0.0f64..3.0, b in 0.0f64..3.0) {
            let (near, far) = if a < b { (a, b) } else { (b, a) };
            prop_assert!(face_confidence(near, DEFAULT_FACE_THRESHOLD) >= face_confidence(far, DEFAULT_FACE_THRESHOLD));
        }

        #[test]
        fn prop_face_bounded(d in -10.0f64..10.0, t in 0.05f64..0.95) {
            let c = face_confidence(d, t);
            prop_assert!((0.0..=1.0).contains(&c));
        }

        #[test]
        fn prop_voice_bounded_and_non_decreasing(a in -1000.0f64..1000.0, b in -1000.0f64..1000.0) {
            let (low, high) = if a < b { (a, b) } else { (b, a) };
            let cl = voice_confidence(low, DEFAULT_VOICE_MIDPOINT, DEFAULT_VOICE_AGGRESSIVENESS);
            let ch = voice_confidence(high, DEFAULT_VOICE_MIDPOINT, DEFAULT_VOICE_AGGRESSIVENESS);
            prop_assert!((0.0..=1.0).contains(&cl));
            prop_assert!(cl <= ch);
        }

        #[test]
        fn prop_palm_bounded(ds in proptest::collection::vec(0.0f64..256.0, 0..60)) {
            let s = palm_match_score(&ds, PALM_EPSILON, DEFAULT_PALM_NORMALIZATION);
            prop_assert!((0.0..=1.0).contains(&s));
        }
    }
}
