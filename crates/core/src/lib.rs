//! Core types and collaborator traits for the lexdecode search engine
//!
//! This crate provides the foundations used by the other crates:
//! - Identifier newtypes and integer log-domain scores
//! - Phone set, pronunciation dictionary and acoustic context model tables
//! - Collaborator traits (acoustic scorer, language model) with in-memory doubles
//! - Filler penalties shared by the first and second pass
//! - Error types and recognition results

pub mod dictionary;
pub mod error;
pub mod filler;
pub mod logmath;
pub mod model;
pub mod phone;
pub mod traits;
pub mod transcript;
pub mod types;

pub use dictionary::{DictWord, Dictionary, END_WORD, SILENCE_WORD, START_WORD};
pub use error::{Error, Result};
pub use filler::FillerPenalties;
pub use logmath::{Score, WORST_SCORE};
pub use model::{AcousticModel, AcousticModelBuilder, TransitionMatrix, TriphoneKey};
pub use phone::{PhonePosition, PhoneSet};
pub use transcript::{Hypothesis, WordSegment};
pub use types::{FrameIdx, PhoneId, SenoneId, SsId, WordId};

pub use traits::{
    AcousticScorer, LanguageModel, LmState, LmWeights, MatrixScorer, NgramModel,
    NgramModelBuilder, SenoneMask,
};
