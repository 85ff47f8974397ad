//! Filler-word penalties
//!
//! Filler words (silence, noises) bypass the language model. Both the first-pass
//! history and the lattice search charge them the same constant penalty from this
//! table.

use std::collections::HashMap;

use crate::logmath::{prob_to_score, Score};
use crate::{Dictionary, LmWeights, WordId};

/// Constant log-penalty per filler word
#[derive(Debug, Clone, Default)]
pub struct FillerPenalties {
    penalties: HashMap<WordId, Score>,
}

impl FillerPenalties {
    /// Build from silence / other-filler probabilities, scaled like LM scores
    pub fn from_dictionary(
        dict: &Dictionary,
        silence_probability: f64,
        filler_probability: f64,
        weights: LmWeights,
    ) -> Self {
        let silence = weights.apply(prob_to_score(silence_probability));
        let filler = weights.apply(prob_to_score(filler_probability));
        let penalties = dict
            .ids()
            .filter(|&w| dict.is_filler(w) && !dict.is_marker(w))
            .map(|w| (w, if w == dict.silence_word() { silence } else { filler }))
            .collect();
        Self { penalties }
    }

    /// Override a single filler's penalty
    pub fn set(&mut self, word: WordId, penalty: Score) {
        self.penalties.insert(word, penalty);
    }

    /// Whether `word` is a filler with a penalty
    pub fn is_filler(&self, word: WordId) -> bool {
        self.penalties.contains_key(&word)
    }

    /// Penalty of a filler word
    pub fn penalty(&self, word: WordId) -> Option<Score> {
        self.penalties.get(&word).copied()
    }

    /// Filler words in id order
    pub fn words(&self) -> Vec<WordId> {
        let mut words: Vec<_> = self.penalties.keys().copied().collect();
        words.sort();
        words
    }
}
