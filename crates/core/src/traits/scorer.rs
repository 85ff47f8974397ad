//! Acoustic scoring interface

use crate::logmath::{Score, WORST_SCORE};
use crate::{Error, FrameIdx, Result, SenoneId};

/// Set of senones the search needs scored in the current frame
#[derive(Debug, Clone, Default)]
pub struct SenoneMask {
    bits: Vec<bool>,
    count: usize,
}

impl SenoneMask {
    /// Empty mask over `n` senones
    pub fn new(n: usize) -> Self {
        Self {
            bits: vec![false; n],
            count: 0,
        }
    }

    /// Mark a senone active
    #[inline]
    pub fn set(&mut self, senone: SenoneId) {
        let bit = &mut self.bits[senone.index()];
        if !*bit {
            *bit = true;
            self.count += 1;
        }
    }

    /// Test a senone
    #[inline]
    pub fn is_set(&self, senone: SenoneId) -> bool {
        self.bits[senone.index()]
    }

    /// Clear all bits
    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = false);
        self.count = 0;
    }

    /// Number of active senones
    pub fn count(&self) -> usize {
        self.count
    }

    /// Mask width
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// True for a zero-width mask
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Active senones in increasing order
    pub fn iter(&self) -> impl Iterator<Item = SenoneId> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, &b)| b)
            .map(|(i, _)| SenoneId(i as u32))
    }
}

/// Senone scoring interface
///
/// Implementations compute Gaussian-mixture (or network) scores for the senones set
/// in `active`; entries outside the mask may be left untouched.
pub trait AcousticScorer {
    /// Number of frames in the utterance
    fn num_frames(&self) -> usize;

    /// Score frame `frame` into `scores` (one slot per senone)
    fn score_frame(&mut self, frame: FrameIdx, active: &SenoneMask, scores: &mut [Score]) -> Result<()>;
}

/// Scorer over a precomputed `frames x senones` score matrix
#[derive(Debug, Clone)]
pub struct MatrixScorer {
    frames: Vec<Vec<Score>>,
    /// Frames actually requested, for diagnostics and tests
    requested: usize,
}

impl MatrixScorer {
    /// Wrap a score matrix
    pub fn new(frames: Vec<Vec<Score>>) -> Self {
        Self {
            frames,
            requested: 0,
        }
    }

    /// How many frames have been scored
    pub fn requested(&self) -> usize {
        self.requested
    }
}

impl AcousticScorer for MatrixScorer {
    fn num_frames(&self) -> usize {
        self.frames.len()
    }

    fn score_frame(&mut self, frame: FrameIdx, active: &SenoneMask, scores: &mut [Score]) -> Result<()> {
        let row = usize::try_from(frame)
            .ok()
            .and_then(|f| self.frames.get(f))
            .ok_or_else(|| Error::Scorer(format!("frame {} out of range", frame)))?;
        if row.len() < scores.len() {
            return Err(Error::Scorer(format!(
                "frame {} has {} senone scores, model needs {}",
                frame,
                row.len(),
                scores.len()
            )));
        }
        // Inactive senones read as impossible so that scoring a senone the search
        // forgot to mark shows up as a pruned path rather than a silent success.
        for (i, slot) in scores.iter_mut().enumerate() {
            *slot = if active.is_set(SenoneId(i as u32)) {
                row[i]
            } else {
                WORST_SCORE
            };
        }
        self.requested += 1;
        Ok(())
    }
}
