//! Exact best-path search over a lattice
//!
//! The best completion of a link `u -> v` reached with LM history `h` (the two most
//! recent non-filler words, `v` included) is its acoustic score plus the best, over
//! the links `v -> y` leaving its destination, of `lm(y | h)` plus the completion of
//! that link under `h` advanced by `y`. Fillers leave the history unchanged, so a
//! word after a filler still sees the two words before it. Completions are memoized
//! per (link, history). Start frames strictly increase along links: a forward sweep
//! by source start frame collects the histories of every link, and the reverse sweep
//! computes every completion before it is needed.

use std::collections::HashMap;
use std::sync::Arc;

use lexdecode_core::logmath::{add, Score, WORST_SCORE};
use lexdecode_core::{
    Dictionary, Error, FillerPenalties, Hypothesis, LanguageModel, LmState, LmWeights, Result, WordId, WordSegment,
};

use super::Dag;

/// Best path through a lattice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestPath {
    /// Links from the entry to the exit node
    pub links: Vec<usize>,
    /// LM score charged for each link's destination word
    pub lm_scores: Vec<Score>,
    /// Total acoustic plus LM score, end of utterance included
    pub score: Score,
}

pub struct BestPathSearch {
    lm: Arc<dyn LanguageModel>,
    weights: LmWeights,
    fillers: FillerPenalties,
    max_lm_ops: usize,
    lm_ops: usize,
    memo: HashMap<(LmState, WordId), Score>,
}

impl BestPathSearch {
    pub fn new(lm: Arc<dyn LanguageModel>, weights: LmWeights, fillers: FillerPenalties, max_lm_ops: usize) -> Self {
        Self {
            lm,
            weights,
            fillers,
            max_lm_ops,
            lm_ops: 0,
            memo: HashMap::new(),
        }
    }

    /// LM lookups performed by the last search
    pub fn lm_ops(&self) -> usize {
        self.lm_ops
    }

    /// History after `word`; fillers leave it unchanged
    fn advance(&self, state: &LmState, word: WordId) -> LmState {
        if self.fillers.is_filler(word) {
            *state
        } else {
            self.lm.advance(state, word)
        }
    }

    fn score(&mut self, state: LmState, y: WordId) -> Result<Score> {
        if let Some(penalty) = self.fillers.penalty(y) {
            return Ok(penalty);
        }
        if let Some(&s) = self.memo.get(&(state, y)) {
            return Ok(s);
        }
        if self.lm_ops >= self.max_lm_ops {
            return Err(Error::ResourceLimitExceeded {
                resource: "lattice LM lookups",
                limit: self.max_lm_ops,
            });
        }
        self.lm_ops += 1;
        let s = self.weights.apply(self.lm.score(&state, y));
        self.memo.insert((state, y), s);
        Ok(s)
    }

    pub fn search(&mut self, dag: &Dag) -> Result<BestPath> {
        self.lm_ops = 0;
        self.memo.clear();

        let n = dag.links().len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&l| (dag.node(dag.link(l).from).start_frame, l));

        let entry = dag.entry();
        let root = self.advance(&LmState::default(), dag.node(entry).word);
        let word_at = |l: usize| dag.node(dag.link(l).to).word;

        // Histories each link can be reached with, in order of source start frame
        let mut histories: Vec<Vec<LmState>> = vec![Vec::new(); n];
        for &l0 in dag.out_links(entry) {
            histories[l0].push(self.advance(&root, word_at(l0)));
        }
        for &l in &order {
            let to = dag.link(l).to;
            if to == dag.exit() {
                continue;
            }
            for i in 0..histories[l].len() {
                let state = histories[l][i];
                for &l2 in dag.out_links(to) {
                    let next = self.advance(&state, word_at(l2));
                    if !histories[l2].contains(&next) {
                        histories[l2].push(next);
                    }
                }
            }
        }

        // Best completion of (link, history) and the link it continues with
        let mut best: HashMap<(usize, LmState), (Score, Option<(usize, Score)>)> = HashMap::new();
        for &l in order.iter().rev() {
            let link = dag.link(l);
            for &state in &histories[l] {
                if link.to == dag.exit() {
                    best.insert((l, state), (link.acoustic_score, None));
                    continue;
                }
                let mut pick: Option<(usize, Score, Score)> = None;
                for &l2 in dag.out_links(link.to) {
                    let y = word_at(l2);
                    let Some(&(rest, _)) = best.get(&(l2, self.advance(&state, y))) else {
                        continue;
                    };
                    if rest <= WORST_SCORE {
                        continue;
                    }
                    let lm = self.score(state, y)?;
                    let cand = add(lm, rest);
                    if pick.map_or(true, |(_, c, _)| cand > c) {
                        pick = Some((l2, cand, lm));
                    }
                }
                if let Some((l2, cand, lm)) = pick {
                    best.insert((l, state), (add(link.acoustic_score, cand), Some((l2, lm))));
                }
            }
        }

        let mut top: Option<(usize, Score, Score)> = None;
        for &l0 in dag.out_links(entry) {
            let v = word_at(l0);
            let Some(&(rest, _)) = best.get(&(l0, self.advance(&root, v))) else {
                continue;
            };
            if rest <= WORST_SCORE {
                continue;
            }
            let lm = self.score(root, v)?;
            let cand = add(lm, rest);
            if top.map_or(true, |(_, c, _)| cand > c) {
                top = Some((l0, cand, lm));
            }
        }
        let (first, score, first_lm) = top.ok_or(Error::NoRecognition)?;

        let mut links = vec![first];
        let mut lm_scores = vec![first_lm];
        let mut cur = first;
        let mut state = self.advance(&root, word_at(first));
        while let Some(&(_, Some((l2, lm)))) = best.get(&(cur, state)) {
            links.push(l2);
            lm_scores.push(lm);
            state = self.advance(&state, word_at(l2));
            cur = l2;
        }
        if dag.link(cur).to != dag.exit() {
            return Err(Error::LatticeFormat("best path does not reach the exit node".to_string()));
        }

        tracing::debug!(links = links.len(), score, lm_ops = self.lm_ops, "Best path found");
        Ok(BestPath { links, lm_scores, score })
    }

    /// Word segments of a best path (entry and exit nodes excluded)
    pub fn hypothesis(&self, dag: &Dag, path: &BestPath, dict: &Dictionary) -> Hypothesis {
        // Link i leaves the word entered by link i-1, whose LM score is lm_scores[i-1]
        let segments = path
            .links
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, &l)| {
                let link = dag.link(l);
                let node = dag.node(link.from);
                WordSegment {
                    word: node.word,
                    text: dict.base_name(node.word).to_string(),
                    start_frame: node.start_frame,
                    end_frame: link.end_frame,
                    acoustic_score: link.acoustic_score,
                    lm_score: path.lm_scores[i - 1],
                    filler: dict.is_filler(node.word),
                }
            })
            .collect();
        Hypothesis {
            segments,
            score: path.score,
            frames: dag.frames(),
        }
    }
}
