//! Per-frame pruning thresholds

use lexdecode_config::BeamConfig;
use lexdecode_core::logmath::{add, Score, WORST_SCORE};

/// Thresholds for one frame. A value below the threshold is pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Node survival
    pub survival: Score,
    /// Transition into a child node
    pub phone: Score,
    /// Word exit into the history
    pub word: Score,
}

impl Thresholds {
    /// Nothing survives
    pub fn closed() -> Self {
        Self {
            survival: -WORST_SCORE,
            phone: -WORST_SCORE,
            word: -WORST_SCORE,
        }
    }
}

/// Derives thresholds from fixed beams, narrowed by histogram pruning when too many
/// nodes are active
#[derive(Debug, Clone)]
pub struct BeamController {
    beam: Score,
    phone_beam: Score,
    word_beam: Score,
    max_active: usize,
    bin_width: Score,
    histogram: Vec<usize>,
    narrowed_frames: usize,
    last_offset: Score,
}

impl BeamController {
    pub fn new(config: &BeamConfig) -> Self {
        let beam = config.beam_score();
        let bin_width = config.histogram_bin_width.max(1);
        let n_bins = (-beam / bin_width) as usize + 1;
        Self {
            beam,
            phone_beam: config.phone_beam_score().max(beam),
            word_beam: config.word_beam_score(),
            max_active: config.max_active,
            bin_width,
            histogram: vec![0; n_bins],
            narrowed_frames: 0,
            last_offset: beam,
        }
    }

    /// Thresholds for a frame, given the best score of every active node, the frame
    /// best and the best word-final score
    pub fn thresholds(&mut self, node_best: &[Score], best: Score, word_best: Score) -> Thresholds {
        if best <= WORST_SCORE {
            return Thresholds::closed();
        }

        let offset = self.histogram_offset(node_best, best);
        self.last_offset = offset;
        if offset > self.beam {
            self.narrowed_frames += 1;
            tracing::trace!(offset, beam = self.beam, active = node_best.len(), "Histogram pruning narrowed the beam");
        }

        let word = if word_best > WORST_SCORE {
            add(word_best, self.word_beam.max(offset))
        } else {
            -WORST_SCORE
        };
        Thresholds {
            survival: add(best, offset),
            phone: add(best, self.phone_beam.max(offset)),
            word,
        }
    }

    /// Score offset below the frame best that keeps at most `max_active` nodes, never
    /// looser than the survival beam
    fn histogram_offset(&mut self, node_best: &[Score], best: Score) -> Score {
        if self.max_active == 0 || node_best.len() <= self.max_active {
            return self.beam;
        }
        self.histogram.fill(0);
        for &s in node_best {
            let distance = best.saturating_sub(s);
            if distance < 0 || distance > -self.beam {
                continue;
            }
            let bin = (distance / self.bin_width) as usize;
            if let Some(slot) = self.histogram.get_mut(bin) {
                *slot += 1;
            }
        }

        let mut kept = 0;
        for (bin, &count) in self.histogram.iter().enumerate() {
            kept += count;
            if kept > self.max_active {
                return (-(bin as Score) * self.bin_width).max(self.beam);
            }
        }
        self.beam
    }

    /// Histogram of the last frame with more than `max_active` active nodes (counts per
    /// bin of `bin_width` below best). Frames under the cap leave it untouched.
    pub fn histogram(&self) -> &[usize] {
        &self.histogram
    }

    /// Frames on which histogram pruning was tighter than the fixed beam
    pub fn narrowed_frames(&self) -> usize {
        self.narrowed_frames
    }

    /// Offset applied on the last frame
    pub fn last_offset(&self) -> Score {
        self.last_offset
    }

    /// Survival beam as configured
    pub fn beam(&self) -> Score {
        self.beam
    }

    pub fn reset_utterance(&mut self) {
        self.histogram.fill(0);
        self.narrowed_frames = 0;
        self.last_offset = self.beam;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_active: usize) -> BeamConfig {
        BeamConfig {
            max_active,
            histogram_bin_width: 100,
            ..BeamConfig::default()
        }
    }

    #[test]
    fn test_fixed_beams_without_cap() {
        let cfg = config(0);
        let mut bc = BeamController::new(&cfg);
        let t = bc.thresholds(&[-10, -20, -30], -10, -20);
        assert_eq!(t.survival, -10 + cfg.beam_score());
        assert_eq!(t.phone, -10 + cfg.phone_beam_score());
        assert_eq!(t.word, -20 + cfg.word_beam_score());
        assert_eq!(bc.narrowed_frames(), 0);
    }

    #[test]
    fn test_histogram_never_looser_than_beam() {
        let cfg = config(2);
        let mut bc = BeamController::new(&cfg);
        let nodes = [0, -50, -150, -250, -350, -450];
        let t = bc.thresholds(&nodes, 0, 0);
        // bin 0 holds two nodes, bin 1 overflows the cap
        assert_eq!(t.survival, -100);
        assert!(t.survival >= cfg.beam_score());
        assert!(t.word >= cfg.word_beam_score());
        assert_eq!(bc.narrowed_frames(), 1);
        assert_eq!(nodes.iter().filter(|&&s| s >= t.survival).count(), 2);
        assert_eq!(bc.histogram()[0], 2);
    }

    #[test]
    fn test_histogram_kept_until_next_capped_frame() {
        let mut bc = BeamController::new(&config(2));
        bc.thresholds(&[0, -50, -150, -250], 0, 0);
        let capped = bc.histogram().to_vec();
        assert_eq!(&capped[..3], &[2, 1, 1]);

        // Under the cap: fixed beams, histogram of the capped frame retained
        let t = bc.thresholds(&[-10, -20], -10, -10);
        assert_eq!(t.survival, -10 + config(2).beam_score());
        assert_eq!(bc.histogram(), capped.as_slice());

        bc.reset_utterance();
        assert!(bc.histogram().iter().all(|&n| n == 0));
    }

    #[test]
    fn test_empty_frame_closes_everything() {
        let mut bc = BeamController::new(&config(0));
        let t = bc.thresholds(&[], WORST_SCORE, WORST_SCORE);
        assert_eq!(t, Thresholds::closed());
        assert!(0 < t.survival);
    }
}
