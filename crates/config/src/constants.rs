//! Default values for decoder settings
//!
//! Beams are probabilities relative to the best score of the frame; they are turned
//! into log-domain offsets by the config accessors.

/// Pruning beams and per-frame caps
pub mod beams {
    /// Survival beam for active HMMs
    pub const BEAM: f64 = 1.0e-55;

    /// Beam for transitions into the next phone
    pub const PHONE_BEAM: f64 = 1.0e-50;

    /// Beam for word exits
    pub const WORD_BEAM: f64 = 1.0e-35;

    /// Beam for word histories kept per frame
    pub const HISTORY_BEAM: f64 = 1.0e-40;

    /// Active HMMs per frame before histogram pruning kicks in (0 disables)
    pub const MAX_ACTIVE: usize = 20_000;

    /// Histogram bin width, in log-score units
    pub const HISTOGRAM_BIN_WIDTH: i32 = 5_000;

    /// Distinct words that may exit in one frame
    pub const MAX_WORDS_PER_FRAME: usize = 20;

    /// Histories retained per frame
    pub const MAX_HISTORIES_PER_FRAME: usize = 100;
}

/// Language model scaling
pub mod language_model {
    /// Language weight
    pub const LANGUAGE_WEIGHT: f64 = 9.5;

    /// Word insertion penalty (probability)
    pub const WORD_INSERTION_PENALTY: f64 = 0.7;

    /// Silence filler probability
    pub const SILENCE_PROBABILITY: f64 = 0.1;

    /// Other filler probability
    pub const FILLER_PROBABILITY: f64 = 0.1;
}

/// Lattice construction and best-path limits
pub mod lattice {
    /// Maximum DAG links before the best-path search gives up
    pub const MAX_EDGES: usize = 2_000_000;

    /// Maximum LM lookups during the best-path search
    pub const MAX_LM_OPS: usize = 1_000_000;
}
