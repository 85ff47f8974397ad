//! Search, pruning, language-model and lattice settings

use serde::{Deserialize, Serialize};

use lexdecode_core::logmath::{prob_to_score, Score};
use lexdecode_core::LmWeights;

use crate::constants::{beams, lattice, language_model};

/// How cross-word right context is resolved at word-final tree leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrossWordPolicy {
    /// Word-final leaves score a precomputed composite over all right contexts
    #[default]
    Composite,
    /// Leaves are expanded on first entry into one unit per right-context class
    Exact,
}

/// How word exits are deduplicated in the history table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAddressing {
    /// One history per word per frame
    Bigram,
    /// One history per distinct LM state per word per frame
    #[default]
    FullState,
}

/// Which tree copy receives the word exits of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TreeSelection {
    /// Cycle through the copies frame by frame
    #[default]
    RoundRobin,
    /// Copy entered least recently
    #[serde(rename = "lru")]
    LeastRecentlyUsed,
}

/// Pruning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamConfig {
    /// HMM survival beam (probability relative to the frame best)
    #[serde(default = "default_beam")]
    pub beam: f64,

    /// Phone transition beam
    #[serde(default = "default_phone_beam")]
    pub phone_beam: f64,

    /// Word exit beam
    #[serde(default = "default_word_beam")]
    pub word_beam: f64,

    /// Word history beam applied when pruning the history table
    #[serde(default = "default_history_beam")]
    pub history_beam: f64,

    /// Active HMM cap per frame (0 disables histogram pruning)
    #[serde(default = "default_max_active")]
    pub max_active: usize,

    /// Histogram bin width in log-score units
    #[serde(default = "default_bin_width")]
    pub histogram_bin_width: i32,

    /// Distinct non-filler words that may exit per frame
    #[serde(default = "default_max_words")]
    pub max_words_per_frame: usize,

    /// Histories retained per frame
    #[serde(default = "default_max_histories")]
    pub max_histories_per_frame: usize,
}

fn default_beam() -> f64 {
    beams::BEAM
}
fn default_phone_beam() -> f64 {
    beams::PHONE_BEAM
}
fn default_word_beam() -> f64 {
    beams::WORD_BEAM
}
fn default_history_beam() -> f64 {
    beams::HISTORY_BEAM
}
fn default_max_active() -> usize {
    beams::MAX_ACTIVE
}
fn default_bin_width() -> i32 {
    beams::HISTOGRAM_BIN_WIDTH
}
fn default_max_words() -> usize {
    beams::MAX_WORDS_PER_FRAME
}
fn default_max_histories() -> usize {
    beams::MAX_HISTORIES_PER_FRAME
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            beam: default_beam(),
            phone_beam: default_phone_beam(),
            word_beam: default_word_beam(),
            history_beam: default_history_beam(),
            max_active: default_max_active(),
            histogram_bin_width: default_bin_width(),
            max_words_per_frame: default_max_words(),
            max_histories_per_frame: default_max_histories(),
        }
    }
}

impl BeamConfig {
    /// Survival beam as a (negative) score offset
    pub fn beam_score(&self) -> Score {
        prob_to_score(self.beam)
    }

    /// Phone transition beam as a score offset
    pub fn phone_beam_score(&self) -> Score {
        prob_to_score(self.phone_beam)
    }

    /// Word exit beam as a score offset
    pub fn word_beam_score(&self) -> Score {
        prob_to_score(self.word_beam)
    }

    /// History beam as a score offset
    pub fn history_beam_score(&self) -> Score {
        prob_to_score(self.history_beam)
    }

    /// Wide beams, no caps: exhaustive search for tiny test models
    pub fn wide() -> Self {
        Self {
            beam: 1.0e-300,
            phone_beam: 1.0e-300,
            word_beam: 1.0e-300,
            history_beam: 1.0e-300,
            max_active: 0,
            histogram_bin_width: default_bin_width(),
            max_words_per_frame: usize::MAX,
            max_histories_per_frame: usize::MAX,
        }
    }
}

/// Search structure configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Cross-word leaf policy
    #[serde(default)]
    pub cross_word_policy: CrossWordPolicy,

    /// History deduplication mode
    #[serde(default)]
    pub history_addressing: HistoryAddressing,

    /// Number of lexical tree copies (0 is treated as 1)
    #[serde(default = "default_tree_copies")]
    pub tree_copies: usize,

    /// Tree copy selection for re-entry
    #[serde(default)]
    pub tree_selection: TreeSelection,

    /// Phone lookahead beam; `None` disables lookahead gating
    #[serde(default)]
    pub phone_lookahead_beam: Option<f64>,
}

fn default_tree_copies() -> usize {
    1
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cross_word_policy: CrossWordPolicy::default(),
            history_addressing: HistoryAddressing::default(),
            tree_copies: default_tree_copies(),
            tree_selection: TreeSelection::default(),
            phone_lookahead_beam: None,
        }
    }
}

impl SearchConfig {
    /// Effective number of tree copies
    pub fn copies(&self) -> usize {
        self.tree_copies.max(1)
    }
}

/// Language model scaling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageModelConfig {
    /// Language weight applied to every LM score
    #[serde(default = "default_language_weight")]
    pub language_weight: f64,

    /// Word insertion penalty (probability, applied once per word)
    #[serde(default = "default_wip")]
    pub word_insertion_penalty: f64,

    /// Silence probability
    #[serde(default = "default_silence_probability")]
    pub silence_probability: f64,

    /// Probability of every other filler word
    #[serde(default = "default_filler_probability")]
    pub filler_probability: f64,
}

fn default_language_weight() -> f64 {
    language_model::LANGUAGE_WEIGHT
}
fn default_wip() -> f64 {
    language_model::WORD_INSERTION_PENALTY
}
fn default_silence_probability() -> f64 {
    language_model::SILENCE_PROBABILITY
}
fn default_filler_probability() -> f64 {
    language_model::FILLER_PROBABILITY
}

impl Default for LanguageModelConfig {
    fn default() -> Self {
        Self {
            language_weight: default_language_weight(),
            word_insertion_penalty: default_wip(),
            silence_probability: default_silence_probability(),
            filler_probability: default_filler_probability(),
        }
    }
}

impl LanguageModelConfig {
    /// Weights in log-score units
    pub fn weights(&self) -> LmWeights {
        LmWeights {
            language_weight: self.language_weight,
            insertion_penalty: prob_to_score(self.word_insertion_penalty),
        }
    }
}

/// Lattice (second pass) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatticeConfig {
    /// Build a lattice and run the best-path search after each utterance
    #[serde(default)]
    pub enabled: bool,

    /// Link words whose boundaries overlap by one or two frames
    #[serde(default = "default_true")]
    pub fudge_edges: bool,

    /// Splice filler nodes out of the lattice
    #[serde(default = "default_true")]
    pub elide_fillers: bool,

    /// Link cap
    #[serde(default = "default_max_edges")]
    pub max_edges: usize,

    /// LM lookup cap
    #[serde(default = "default_max_lm_ops")]
    pub max_lm_ops: usize,
}

fn default_true() -> bool {
    true
}
fn default_max_edges() -> usize {
    lattice::MAX_EDGES
}
fn default_max_lm_ops() -> usize {
    lattice::MAX_LM_OPS
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fudge_edges: true,
            elide_fillers: true,
            max_edges: default_max_edges(),
            max_lm_ops: default_max_lm_ops(),
        }
    }
}
