//! Language model interface
//!
//! The search keeps at most two words of LM history per hypothesis, so models up to
//! trigram order are rescored exactly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::logmath::{add, prob_to_score, Score, WORST_SCORE};
use crate::WordId;

/// Language-model history of a hypothesis, most recent word first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LmState {
    pub last: Option<WordId>,
    pub prev: Option<WordId>,
}

impl LmState {
    /// History holding only `word`
    pub fn start(word: WordId) -> Self {
        Self {
            last: Some(word),
            prev: None,
        }
    }

    /// History after appending `word`
    pub fn push(&self, word: WordId) -> Self {
        Self {
            last: Some(word),
            prev: self.last,
        }
    }
}

/// Incremental word scoring
pub trait LanguageModel: Send + Sync {
    /// Sentence start word
    fn start_word(&self) -> WordId;

    /// Sentence end word
    fn end_word(&self) -> WordId;

    /// N-gram order (1 to 3)
    fn order(&self) -> usize;

    /// Whether the model knows `word`; unknown words are left out of the search trees
    fn contains(&self, word: WordId) -> bool;

    /// Unigram score, used for the lookahead pushed into the lexical tree
    fn unigram(&self, word: WordId) -> Score;

    /// Score of `word` following `state`
    fn score(&self, state: &LmState, word: WordId) -> Score;

    /// History after `word`, truncated to what the model can distinguish
    fn advance(&self, state: &LmState, word: WordId) -> LmState {
        match self.order() {
            0 | 1 => LmState::default(),
            2 => LmState::start(word),
            _ => state.push(word),
        }
    }
}

/// Language weight and word insertion penalty applied to raw LM scores
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmWeights {
    pub language_weight: f64,
    pub insertion_penalty: Score,
}

impl Default for LmWeights {
    fn default() -> Self {
        Self {
            language_weight: 1.0,
            insertion_penalty: 0,
        }
    }
}

impl LmWeights {
    /// Scale a raw LM score
    pub fn apply(&self, raw: Score) -> Score {
        if raw <= WORST_SCORE {
            return WORST_SCORE;
        }
        let scaled = (raw as f64 * self.language_weight).round() as Score;
        add(scaled, self.insertion_penalty)
    }
}

/// In-memory back-off n-gram tables
///
/// Probabilities are supplied already estimated; this type only performs the
/// Katz back-off lookup.
#[derive(Debug, Clone)]
pub struct NgramModel {
    start: WordId,
    end: WordId,
    order: usize,
    unigrams: HashMap<WordId, (Score, Score)>,
    bigrams: HashMap<(WordId, WordId), (Score, Score)>,
    trigrams: HashMap<(WordId, WordId, WordId), Score>,
}

impl NgramModel {
    fn backoff1(&self, w: WordId) -> Score {
        self.unigrams.get(&w).map(|&(_, bo)| bo).unwrap_or(0)
    }

    fn backoff2(&self, w1: WordId, w2: WordId) -> Score {
        self.bigrams.get(&(w1, w2)).map(|&(_, bo)| bo).unwrap_or(0)
    }

    fn bigram_score(&self, h: WordId, w: WordId) -> Score {
        match self.bigrams.get(&(h, w)) {
            Some(&(p, _)) => p,
            None => add(self.backoff1(h), self.unigram(w)),
        }
    }
}

impl LanguageModel for NgramModel {
    fn start_word(&self) -> WordId {
        self.start
    }

    fn end_word(&self) -> WordId {
        self.end
    }

    fn order(&self) -> usize {
        self.order
    }

    fn contains(&self, word: WordId) -> bool {
        self.unigrams.contains_key(&word)
    }

    fn unigram(&self, word: WordId) -> Score {
        self.unigrams
            .get(&word)
            .map(|&(p, _)| p)
            .unwrap_or(WORST_SCORE)
    }

    fn score(&self, state: &LmState, word: WordId) -> Score {
        match (state.prev, state.last) {
            (Some(w1), Some(w2)) if self.order >= 3 => match self.trigrams.get(&(w1, w2, word)) {
                Some(&p) => p,
                None => add(self.backoff2(w1, w2), self.bigram_score(w2, word)),
            },
            (_, Some(h)) if self.order >= 2 => self.bigram_score(h, word),
            _ => self.unigram(word),
        }
    }
}

/// Assembles an [`NgramModel`] from probabilities
pub struct NgramModelBuilder {
    model: NgramModel,
}

impl NgramModelBuilder {
    /// Start a model with the given sentence markers
    pub fn new(start: WordId, end: WordId) -> Self {
        Self {
            model: NgramModel {
                start,
                end,
                order: 1,
                unigrams: HashMap::new(),
                bigrams: HashMap::new(),
                trigrams: HashMap::new(),
            },
        }
    }

    /// Unigram probability and back-off weight
    pub fn unigram(mut self, word: WordId, prob: f64, backoff: f64) -> Self {
        self.model
            .unigrams
            .insert(word, (prob_to_score(prob), prob_to_score(backoff)));
        self
    }

    /// Bigram probability and back-off weight
    pub fn bigram(mut self, w1: WordId, w2: WordId, prob: f64, backoff: f64) -> Self {
        self.model.order = self.model.order.max(2);
        self.model
            .bigrams
            .insert((w1, w2), (prob_to_score(prob), prob_to_score(backoff)));
        self
    }

    /// Trigram probability
    pub fn trigram(mut self, w1: WordId, w2: WordId, w3: WordId, prob: f64) -> Self {
        self.model.order = 3;
        self.model.trigrams.insert((w1, w2, w3), prob_to_score(prob));
        self
    }

    /// Force the model order (e.g. a bigram model with no explicit bigrams yet)
    pub fn order(mut self, order: usize) -> Self {
        self.model.order = order.clamp(1, 3);
        self
    }

    /// Freeze the tables
    pub fn build(self) -> NgramModel {
        self.model
    }
}
