//! Collaborator interfaces consumed by the search
//!
//! - [`AcousticScorer`] - per-frame senone scores for the active senones
//! - [`LanguageModel`] - incremental word scores over a short LM history

mod language_model;
mod scorer;

pub use language_model::{LanguageModel, LmState, LmWeights, NgramModel, NgramModelBuilder};
pub use scorer::{AcousticScorer, MatrixScorer, SenoneMask};
