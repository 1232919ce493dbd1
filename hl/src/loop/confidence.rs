//! Confidence score for a validated artifact

/// Multiplier when the first execution succeeded
pub const NO_REPAIR_BONUS: f64 = 1.1;
/// Multiplier after exactly one repair
pub const ONE_REPAIR_PENALTY: f64 = 0.9;
/// Multiplier after two or more repairs
pub const MANY_REPAIRS_PENALTY: f64 = 0.75;
/// Extra multiplier when the artifact ever failed a structural check
pub const STRUCTURAL_PENALTY: f64 = 0.5;

/// Score in [0, 1]; non-increasing in `repairs`
pub fn confidence_score(baseline: f64, repairs: u32, structural_failed: bool) -> f64 {
    let mut score = baseline
        * match repairs {
            0 => NO_REPAIR_BONUS,
            1 => ONE_REPAIR_PENALTY,
            _ => MANY_REPAIRS_PENALTY,
        };
    if structural_failed {
        score *= STRUCTURAL_PENALTY;
    }
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_try_is_maximal() {
        let first = confidence_score(0.8, 0, false);
        assert!((first - 0.88).abs() < 1e-9);
        assert!(first > confidence_score(0.8, 1, false));
        assert_eq!(confidence_score(0.95, 0, false), 1.0);
    }

    #[test]
    fn test_structural_penalty() {
        assert!((confidence_score(0.8, 1, true) - 0.36).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_non_increasing_in_repairs(baseline in 0.0f64..=1.0, repairs in 0u32..10, structural: bool) {
            let now = confidence_score(baseline, repairs, structural);
            let next = confidence_score(baseline, repairs + 1, structural);
            prop_assert!(next <= now);
            prop_assert!((0.0..=1.0).contains(&now));
            prop_assert!(confidence_score(baseline, repairs, true) <= confidence_score(baseline, repairs, false));
        }
    }
}
