//! Integer log-domain scores
//!
//! All scores are integer logarithms in base [`LOG_BASE`]. Integer arithmetic keeps
//! the search deterministic and makes score sums along a path exact.

/// Log-domain score
pub type Score = i32;

/// Score of an impossible path. Far enough from `i32::MIN` that adding a handful of
/// worst scores cannot overflow.
pub const WORST_SCORE: Score = -0x2000_0000;

/// Logarithm base of [`Score`]
pub const LOG_BASE: f64 = 1.0003;

/// Convert a natural logarithm into a score
pub fn ln_to_score(ln: f64) -> Score {
    if !ln.is_finite() {
        return if ln > 0.0 { -WORST_SCORE } else { WORST_SCORE };
    }
    let v = (ln / LOG_BASE.ln()).round();
    v.clamp(WORST_SCORE as f64, -(WORST_SCORE as f64)) as Score
}

/// Convert a probability into a score (`0` maps to [`WORST_SCORE`])
pub fn prob_to_score(p: f64) -> Score {
    if p <= 0.0 {
        WORST_SCORE
    } else {
        ln_to_score(p.ln())
    }
}

/// Convert a base-10 logarithm (ARPA style) into a score
pub fn log10_to_score(log10: f64) -> Score {
    ln_to_score(log10 * std::f64::consts::LN_10)
}

/// Convert a score back to a natural logarithm
pub fn score_to_ln(score: Score) -> f64 {
    score as f64 * LOG_BASE.ln()
}

/// Add two scores, never going below [`WORST_SCORE`]
#[inline]
pub fn add(a: Score, b: Score) -> Score {
    if a <= WORST_SCORE || b <= WORST_SCORE {
        WORST_SCORE
    } else {
        a.saturating_add(b).max(WORST_SCORE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prob_to_score_is_monotonic() {
        assert_eq!(prob_to_score(1.0), 0);
        assert!(prob_to_score(0.5) < 0);
        assert!(prob_to_score(0.1) < prob_to_score(0.5));
        assert_eq!(prob_to_score(0.0), WORST_SCORE);
    }

    #[test]
    fn test_log10_matches_prob() {
        let a = log10_to_score(-1.0);
        let b = prob_to_score(0.1);
        assert!((a - b).abs() <= 1);
    }

    #[test]
    fn test_add_saturates_at_worst() {
        assert_eq!(add(WORST_SCORE, 10), WORST_SCORE);
        assert_eq!(add(-5, -7), -12);
        assert_eq!(add(WORST_SCORE / 2, WORST_SCORE / 2 - 10), WORST_SCORE);
    }
}
