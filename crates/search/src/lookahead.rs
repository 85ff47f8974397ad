//! Phone lookahead gate
//!
//! Before entering a child node the search can ask whether the child's base phone is
//! plausible at all: each frame the context-independent unit of every phone is scored
//! and phones outside `best + beam` are closed for that frame's transitions.

use lexdecode_core::logmath::{add, Score, WORST_SCORE};
use lexdecode_core::{AcousticModel, PhoneId, SenoneId, SenoneMask};

#[derive(Debug, Clone)]
pub struct PhoneLookahead {
    beam: Score,
    /// Senones of each phone's context-independent unit
    ci_senones: Vec<Vec<SenoneId>>,
    phone_scores: Vec<Score>,
    allowed: Vec<bool>,
}

impl PhoneLookahead {
    pub fn new(model: &AcousticModel, beam: Score) -> Self {
        let ci_senones: Vec<Vec<SenoneId>> = model
            .phones()
            .ids()
            .map(|p| model.senone_sequence(model.ci_unit(p)).to_vec())
            .collect();
        let n = ci_senones.len();
        Self {
            beam,
            ci_senones,
            phone_scores: vec![WORST_SCORE; n],
            allowed: vec![true; n],
        }
    }

    /// Request the context-independent senones from the scorer
    pub fn mark(&self, senones: &mut SenoneMask) {
        for seq in &self.ci_senones {
            for &s in seq {
                senones.set(s);
            }
        }
    }

    /// Recompute the open phones from this frame's senone scores
    pub fn update(&mut self, senone_scores: &[Score]) {
        for (phone, seq) in self.ci_senones.iter().enumerate() {
            self.phone_scores[phone] = seq
                .iter()
                .map(|s| senone_scores[s.index()])
                .max()
                .unwrap_or(WORST_SCORE);
        }
        let best = self.phone_scores.iter().copied().max().unwrap_or(WORST_SCORE);
        let threshold = add(best, self.beam);
        for (open, &score) in self.allowed.iter_mut().zip(&self.phone_scores) {
            *open = best <= WORST_SCORE || score >= threshold;
        }
    }

    /// Open every phone
    pub fn reset(&mut self) {
        self.phone_scores.fill(WORST_SCORE);
        self.allowed.fill(true);
    }

    #[inline]
    pub fn allows(&self, phone: PhoneId) -> bool {
        self.allowed.get(phone.index()).copied().unwrap_or(true)
    }

    /// Phones open this frame
    pub fn n_open(&self) -> usize {
        self.allowed.iter().filter(|&&a| a).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::contextual_model;

    #[test]
    fn test_closes_implausible_phones() {
        let (model, phones) = contextual_model();
        let mut la = PhoneLookahead::new(&model, -100);
        let mut mask = SenoneMask::new(model.n_senones());
        la.mark(&mut mask);
        assert_eq!(mask.count(), 3);

        let mut scores = vec![WORST_SCORE; model.n_senones()];
        scores[0] = -10; // SIL
        scores[1] = -50; // a
        scores[2] = -500; // b
        la.update(&scores);
        assert!(la.allows(phones.silence()));
        assert!(la.allows(phones.id("a").unwrap()));
        assert!(!la.allows(phones.id("b").unwrap()));
        assert_eq!(la.n_open(), 2);
    }
}
