//! Recognition results

use serde::{Deserialize, Serialize};

use crate::logmath::Score;
use crate::{FrameIdx, WordId};

/// One recognized word with its frame alignment (inclusive frame range)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordSegment {
    pub word: WordId,
    pub text: String,
    pub start_frame: FrameIdx,
    pub end_frame: FrameIdx,
    pub acoustic_score: Score,
    pub lm_score: Score,
    pub filler: bool,
}

impl WordSegment {
    /// Number of frames covered
    pub fn duration(&self) -> usize {
        (self.end_frame - self.start_frame + 1).max(0) as usize
    }
}

/// Best word sequence of an utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Hypothesis {
    /// Segments in time order
    pub segments: Vec<WordSegment>,
    /// Total path score, including the end-of-utterance LM score
    pub score: Score,
    /// Frames decoded
    pub frames: usize,
}

impl Hypothesis {
    /// Space-separated non-filler words
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter(|s| !s.filler)
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// True when no words were recognized
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
