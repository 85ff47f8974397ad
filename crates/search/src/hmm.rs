//! Left-to-right HMM instance carried by every lexical-tree node

use lexdecode_core::logmath::{add, Score, WORST_SCORE};
use lexdecode_core::{FrameIdx, TransitionMatrix};

use crate::history::HistoryId;

/// Viterbi state of one HMM
///
/// Entry tokens land in a separate input slot and are consumed by the next
/// [`Hmm::eval`], so a node entered during propagation never mixes its new entry with
/// the scores it is still propagating from.
#[derive(Debug, Clone)]
pub struct Hmm {
    score: Vec<Score>,
    history: Vec<Option<HistoryId>>,
    in_score: Score,
    in_history: Option<HistoryId>,
    exit_score: Score,
    exit_history: Option<HistoryId>,
    best: Score,
    /// Frame for which the owning node was last placed on an active list
    pub active_frame: FrameIdx,
}

impl Hmm {
    pub fn new(n_emit: usize) -> Self {
        Self {
            score: vec![WORST_SCORE; n_emit],
            history: vec![None; n_emit],
            in_score: WORST_SCORE,
            in_history: None,
            exit_score: WORST_SCORE,
            exit_history: None,
            best: WORST_SCORE,
            active_frame: -1,
        }
    }

    /// Offer an entry token; keeps the better one. Returns true if it was taken.
    pub fn enter(&mut self, score: Score, history: HistoryId) -> bool {
        if score > self.in_score {
            self.in_score = score;
            self.in_history = Some(history);
            true
        } else {
            false
        }
    }

    /// One Viterbi step. `emit(s)` is the state's acoustic score for this frame.
    /// Returns the best state score.
    pub fn eval(&mut self, tmat: &TransitionMatrix, emit: impl Fn(usize) -> Score) -> Score {
        let n = self.score.len();
        let mut best = WORST_SCORE;

        // Right to left so that each state reads last frame's predecessors
        for j in (0..n).rev() {
            let mut s = add(self.score[j], tmat.tp(j, j));
            let mut h = self.history[j];
            for i in j.saturating_sub(2)..j {
                let cand = add(self.score[i], tmat.tp(i, j));
                if cand > s {
                    s = cand;
                    h = self.history[i];
                }
            }
            if j == 0 && self.in_score > s {
                s = self.in_score;
                h = self.in_history;
            }
            let s = add(s, emit(j));
            self.score[j] = s;
            self.history[j] = if s > WORST_SCORE { h } else { None };
            best = best.max(s);
        }
        self.in_score = WORST_SCORE;
        self.in_history = None;

        self.exit_score = WORST_SCORE;
        self.exit_history = None;
        for i in 0..n {
            let cand = add(self.score[i], tmat.tp(i, n));
            if cand > self.exit_score {
                self.exit_score = cand;
                self.exit_history = self.history[i];
            }
        }

        self.best = best;
        best
    }

    /// Drop the state scores (pruned). A pending entry token is kept.
    pub fn clear_states(&mut self) {
        self.score.fill(WORST_SCORE);
        self.history.fill(None);
        self.exit_score = WORST_SCORE;
        self.exit_history = None;
        self.best = WORST_SCORE;
    }

    /// Full reset, including the entry slot and activity marker
    pub fn reset(&mut self) {
        self.clear_states();
        self.in_score = WORST_SCORE;
        self.in_history = None;
        self.active_frame = -1;
    }

    pub fn best(&self) -> Score {
        self.best
    }

    pub fn exit_score(&self) -> Score {
        self.exit_score
    }

    pub fn exit_history(&self) -> Option<HistoryId> {
        self.exit_history
    }

    pub fn in_score(&self) -> Score {
        self.in_score
    }

    pub fn state_score(&self, state: usize) -> Score {
        self.score[state]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexdecode_core::logmath::prob_to_score;

    #[test]
    fn test_entry_then_exit() {
        let tmat = TransitionMatrix::bakis(2, 0.5, 0.0);
        let mut hmm = Hmm::new(2);
        assert!(hmm.enter(0, HistoryId(7)));
        assert!(!hmm.enter(-10, HistoryId(8)));

        hmm.eval(&tmat, |_| -100);
        assert_eq!(hmm.state_score(0), -100);
        assert_eq!(hmm.state_score(1), WORST_SCORE);
        assert_eq!(hmm.in_score(), WORST_SCORE);

        hmm.eval(&tmat, |_| -100);
        let half = prob_to_score(0.5);
        assert_eq!(hmm.state_score(1), -100 + half - 100);
        assert_eq!(hmm.exit_score(), -200 + 2 * half);
        assert_eq!(hmm.exit_history(), Some(HistoryId(7)));
    }

    #[test]
    fn test_viterbi_keeps_best_predecessor() {
        let tmat = TransitionMatrix::bakis(1, 0.5, 0.0);
        let mut hmm = Hmm::new(1);
        hmm.enter(-50, HistoryId(1));
        hmm.eval(&tmat, |_| 0);
        // The self loop (-50 + log 0.5) loses against a strong new entry
        hmm.enter(-10, HistoryId(2));
        hmm.eval(&tmat, |_| 0);
        assert_eq!(hmm.state_score(0), -10);
        assert_eq!(hmm.exit_history(), Some(HistoryId(2)));
    }

    #[test]
    fn test_clear_keeps_pending_entry() {
        let tmat = TransitionMatrix::bakis(1, 0.5, 0.0);
        let mut hmm = Hmm::new(1);
        hmm.enter(0, HistoryId(0));
        hmm.eval(&tmat, |_| -5);
        hmm.enter(-3, HistoryId(1));
        hmm.clear_states();
        assert_eq!(hmm.best(), WORST_SCORE);
        assert_eq!(hmm.in_score(), -3);
        hmm.reset();
        assert_eq!(hmm.in_score(), WORST_SCORE);
    }
}
