//! Per-frame operations on a lexical tree

use lexdecode_core::logmath::{add, Score, WORST_SCORE};
use lexdecode_core::{Error, FrameIdx, PhoneId, Result, SenoneMask};

use super::{LexTree, NodeId, NodeKind};
use crate::beam::Thresholds;
use crate::history::{HistoryId, SearchHistory};
use crate::lookahead::PhoneLookahead;

/// Result of evaluating one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Best state score over all active nodes
    pub best: Score,
    /// Best exit score over word-final nodes
    pub best_word: Score,
}

impl LexTree {
    /// Nodes to evaluate on the current frame
    pub fn active(&self) -> &[NodeId] {
        &self.active
    }

    /// Nodes already scheduled for the next frame
    pub fn n_next_active(&self) -> usize {
        self.next_active.len()
    }

    /// Best state score of every node evaluated on the last frame
    pub fn node_scores(&self) -> &[Score] {
        &self.node_best
    }

    /// Enter every root of the group serving `left` for evaluation at `frame`.
    /// `score_into(phone)` is the predecessor's path score as seen by a word starting
    /// with `phone`. Returns the number of roots that took the entry.
    pub fn enter(
        &mut self,
        left: Option<PhoneId>,
        frame: FrameIdx,
        score_into: impl Fn(PhoneId) -> Score,
        history: HistoryId,
        threshold: Score,
    ) -> Result<usize> {
        let group = self
            .groups
            .iter()
            .position(|g| g.left == left)
            .or_else(|| self.groups.iter().position(|g| g.left.is_none()))
            .ok_or_else(|| Error::propagation(frame, format!("no root group for left context {:?}", left)))?;

        let mut entered = 0;
        for r in 0..self.groups[group].roots.len() {
            let root = self.groups[group].roots[r];
            let node = &self.nodes[root.index()];
            let score = add(score_into(node.base), node.prob);
            if score > WORST_SCORE && score >= threshold {
                self.enter_node(root, score, history, frame)?;
                entered += 1;
            }
        }
        Ok(entered)
    }

    fn enter_node(&mut self, id: NodeId, score: Score, history: HistoryId, frame: FrameIdx) -> Result<()> {
        if matches!(self.nodes[id.index()].kind, NodeKind::Lazy { .. }) {
            self.expand(id, frame)?;
        }
        match &self.nodes[id.index()].kind {
            NodeKind::Expanded { children, .. } => {
                let children = children.clone();
                for c in children {
                    self.activate(c, score, history, frame);
                }
                Ok(())
            }
            NodeKind::Released => Err(Error::propagation(frame, format!("entered released node {}", id.0))),
            _ => {
                self.activate(id, score, history, frame);
                Ok(())
            }
        }
    }

    fn activate(&mut self, id: NodeId, score: Score, history: HistoryId, frame: FrameIdx) {
        let node = &mut self.nodes[id.index()];
        if node.hmm.enter(score, history) && node.hmm.active_frame != frame {
            node.hmm.active_frame = frame;
            self.next_active.push(id);
        }
    }

    /// Materialize one child per distinct right-context unit of a lazy leaf
    fn expand(&mut self, id: NodeId, frame: FrameIdx) -> Result<()> {
        let node = &self.nodes[id.index()];
        let NodeKind::Lazy { left, single } = node.kind else {
            return Ok(());
        };
        let (base, prob, word) = (node.base, node.prob, node.word);
        let classes = self
            .table
            .final_fanout(base, left, single)
            .ok_or_else(|| Error::propagation(frame, format!("no right-context fan-out for phone {}", base)))?
            .to_vec();

        let mut children = Vec::with_capacity(classes.len());
        for class in classes {
            let child = self.new_node(class.unit, base, prob, word, NodeKind::ContextLeaf { phones: class.phones });
            children.push(self.alloc(child));
        }
        tracing::trace!(node = id.0, children = children.len(), "Expanded cross-word leaf");
        self.nodes[id.index()].kind = NodeKind::Expanded { left, single, children };
        self.expanded.push(id);
        Ok(())
    }

    /// Flag the senones and composite senones the active nodes need
    pub fn mark_active(&self, senones: &mut SenoneMask, composite_active: &mut [bool]) {
        for &id in &self.active {
            self.table.mark_unit(self.nodes[id.index()].unit, senones, composite_active);
        }
    }

    /// One Viterbi step for every active node
    pub fn evaluate(&mut self, frame: FrameIdx, senone_scores: &[Score], composite_scores: &[Score]) -> Result<Evaluation> {
        let table = &self.table;
        let model = table.model();
        self.node_best.clear();
        let mut best = WORST_SCORE;
        let mut best_word = WORST_SCORE;

        for &id in &self.active {
            let node = &mut self.nodes[id.index()];
            if node.hmm.active_frame != frame {
                return Err(Error::propagation(
                    frame,
                    format!("node {} is active but was scheduled for frame {}", id.0, node.hmm.active_frame),
                ));
            }
            let unit = node.unit;
            let score = node.hmm.eval(model.tmat(node.base), |state| {
                table.state_score(unit, state, senone_scores, composite_scores)
            });
            self.node_best.push(score);
            best = best.max(score);
            if node.word.is_some() {
                best_word = best_word.max(node.hmm.exit_score());
            }
        }
        Ok(Evaluation { best, best_word })
    }

    /// Prune nodes below the survival threshold, keep survivors for the next frame
    /// and push exits above the phone threshold into child nodes
    pub fn propagate_internal(
        &mut self,
        frame: FrameIdx,
        thresholds: &Thresholds,
        lookahead: Option<&PhoneLookahead>,
    ) -> Result<()> {
        let next = frame + 1;
        for i in 0..self.active.len() {
            let id = self.active[i];
            let node = &mut self.nodes[id.index()];
            if node.hmm.active_frame != frame && node.hmm.active_frame != next {
                return Err(Error::propagation(
                    frame,
                    format!("node {} is active but was scheduled for frame {}", id.0, node.hmm.active_frame),
                ));
            }
            if node.hmm.best() < thresholds.survival {
                node.hmm.clear_states();
                continue;
            }
            if node.hmm.active_frame != next {
                node.hmm.active_frame = next;
                self.next_active.push(id);
            }
            if node.children.is_empty() {
                continue;
            }
            let exit = node.hmm.exit_score();
            if exit < thresholds.phone {
                continue;
            }
            let history = node
                .hmm
                .exit_history()
                .ok_or_else(|| Error::propagation(frame, format!("node {} exits without a history", id.0)))?;
            let parent_prob = node.prob;

            for c in 0..self.nodes[id.index()].children.len() {
                let child = self.nodes[id.index()].children[c];
                let cnode = &self.nodes[child.index()];
                if lookahead.map_or(false, |la| !la.allows(cnode.base)) {
                    continue;
                }
                let score = add(exit, cnode.prob - parent_prob);
                if score >= thresholds.survival {
                    self.enter_node(child, score, history, next)?;
                }
            }
        }
        Ok(())
    }

    /// Turn word-final exits above `word_threshold` into history entries. Returns the
    /// number of entries created or improved.
    pub fn propagate_leaves(&self, frame: FrameIdx, word_threshold: Score, history: &mut SearchHistory) -> Result<usize> {
        let mut exits = 0;
        for &id in &self.active {
            let node = &self.nodes[id.index()];
            let Some(word) = node.word else { continue };
            let exit = node.hmm.exit_score();
            if exit <= WORST_SCORE || exit < word_threshold {
                continue;
            }
            let pred = node
                .hmm
                .exit_history()
                .ok_or_else(|| Error::propagation(frame, format!("leaf {} exits without a history", id.0)))?;
            let right_context = match &node.kind {
                NodeKind::ContextLeaf { phones } => Some(phones.as_slice()),
                _ => None,
            };
            // Lookahead was added on the way in; the history charges the real LM score
            let score = exit - node.prob;
            if history
                .record_exit(word, frame, score, pred, self.kind, right_context)?
                .is_some()
            {
                exits += 1;
            }
        }
        Ok(exits)
    }

    /// Make the nodes scheduled for the next frame the current active list
    pub fn swap_active_lists(&mut self) {
        std::mem::swap(&mut self.active, &mut self.next_active);
        self.next_active.clear();
    }

    /// Clear all per-utterance state and free the cross-word leaves expanded during
    /// the utterance
    pub fn reset_utterance(&mut self) {
        self.active.clear();
        self.next_active.clear();
        self.node_best.clear();
        for node in &mut self.nodes {
            node.hmm.reset();
        }

        let expanded = std::mem::take(&mut self.expanded);
        let n_expanded = expanded.len();
        for id in expanded {
            let kind = std::mem::replace(&mut self.nodes[id.index()].kind, NodeKind::Released);
            let NodeKind::Expanded { left, single, children } = kind else {
                self.nodes[id.index()].kind = kind;
                continue;
            };
            for c in children {
                let child = &mut self.nodes[c.index()];
                child.kind = NodeKind::Released;
                child.word = None;
                child.refs = 0;
                self.free.push(c);
            }
            self.nodes[id.index()].kind = NodeKind::Lazy { left, single };
        }
        if n_expanded > 0 {
            tracing::trace!(leaves = n_expanded, "Freed expanded cross-word leaves");
        }
    }

    /// Number of cross-word leaves expanded this utterance
    pub fn n_expanded(&self) -> usize {
        self.expanded.len()
    }
}
