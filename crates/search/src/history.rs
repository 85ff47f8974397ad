//! Word-exit history
//!
//! Every word exit that survives the word beam becomes an entry. Entries live in
//! fixed-size blocks so that ids stay valid while the table grows; pruning marks
//! entries invalid and never moves them. Within a frame the LM-state index keeps one
//! entry per (word, LM state): the higher-scoring exit replaces the other in place,
//! which is safe because nothing refers to current-frame entries before re-entry.

use std::collections::HashMap;
use std::sync::Arc;

use lexdecode_config::HistoryAddressing;
use lexdecode_core::logmath::{add, Score, WORST_SCORE};
use lexdecode_core::{
    Dictionary, Error, FillerPenalties, FrameIdx, Hypothesis, LanguageModel, LmState, LmWeights,
    PhoneId, Result, WordId, WordSegment,
};

const BLOCK_SIZE: usize = 4096;

/// Stable id of a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HistoryId(pub u32);

impl HistoryId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Tree a word exited from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeKind {
    /// Utterance start entry
    Root,
    Word,
    Filler,
}

/// Completed word hypothesis
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub word: WordId,
    pub start_frame: FrameIdx,
    pub end_frame: FrameIdx,
    /// Acoustic score of this word alone
    pub acoustic_score: Score,
    /// Weighted LM score (or filler penalty) of this word
    pub lm_score: Score,
    /// Cumulative score from utterance start, including `lm_score`
    pub path_score: Score,
    pub pred: Option<HistoryId>,
    /// LM history after this word
    pub lm_state: LmState,
    pub valid: bool,
    pub tree: TreeKind,
    /// Path scores per following phone, when the word ended in context-expanded leaves
    pub right_context: Option<Vec<(PhoneId, Score)>>,
}

impl HistoryEntry {
    /// Path score seen by a word starting with `phone`
    pub fn score_into(&self, phone: PhoneId) -> Score {
        match &self.right_context {
            Some(rc) => rc
                .iter()
                .find(|(p, _)| *p == phone)
                .map(|&(_, s)| s)
                .unwrap_or(WORST_SCORE),
            None => self.path_score,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameSpan {
    first: u32,
    end: u32,
    best: Score,
}

/// Final hypothesis chosen by [`SearchHistory::finalize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalEntry {
    pub id: HistoryId,
    /// Path score plus the end-of-utterance LM score
    pub score: Score,
    pub end_lm_score: Score,
}

/// Per-utterance word history with LM-state deduplication
pub struct SearchHistory {
    blocks: Vec<Vec<HistoryEntry>>,
    len: usize,
    frames: Vec<FrameSpan>,
    current: FrameIdx,
    index: HashMap<WordId, HashMap<LmState, HistoryId>>,
    lm_memo: HashMap<(LmState, WordId), Score>,
    lm: Arc<dyn LanguageModel>,
    weights: LmWeights,
    fillers: FillerPenalties,
    addressing: HistoryAddressing,
    lm_ops: usize,
}

impl SearchHistory {
    pub fn new(
        lm: Arc<dyn LanguageModel>,
        weights: LmWeights,
        fillers: FillerPenalties,
        addressing: HistoryAddressing,
    ) -> Self {
        Self {
            blocks: Vec::new(),
            len: 0,
            frames: Vec::new(),
            current: -1,
            index: HashMap::new(),
            lm_memo: HashMap::new(),
            lm,
            weights,
            fillers,
            addressing,
            lm_ops: 0,
        }
    }

    /// Clear the table and add the utterance root entry, ending at frame `-1`
    pub fn begin_utterance(&mut self) -> HistoryId {
        self.blocks.clear();
        self.len = 0;
        self.frames.clear();
        self.index.clear();
        self.lm_memo.clear();
        self.lm_ops = 0;

        let start = self.lm.start_word();
        self.current = -1;
        let id = self.push(HistoryEntry {
            word: start,
            start_frame: -1,
            end_frame: -1,
            acoustic_score: 0,
            lm_score: 0,
            path_score: 0,
            pred: None,
            lm_state: LmState::start(start),
            valid: true,
            tree: TreeKind::Root,
            right_context: None,
        });
        self.frame_windup(-1);
        id
    }

    fn push(&mut self, entry: HistoryEntry) -> HistoryId {
        let slot = self.open_current();
        if self.len % BLOCK_SIZE == 0 {
            self.blocks.push(Vec::with_capacity(BLOCK_SIZE));
        }
        let id = HistoryId(self.len as u32);
        if let Some(block) = self.blocks.last_mut() {
            block.push(entry);
        }
        self.len += 1;
        self.frames[slot].end = self.len as u32;
        id
    }

    /// Span slot of the current frame, creating empty spans for skipped frames
    fn open_current(&mut self) -> usize {
        let slot = (self.current + 1) as usize;
        if self.frames.len() <= slot {
            let first = self.len as u32;
            self.frames.resize(
                slot + 1,
                FrameSpan {
                    first,
                    end: first,
                    best: WORST_SCORE,
                },
            );
        }
        slot
    }

    /// Entry by id
    pub fn get(&self, id: HistoryId) -> Option<&HistoryEntry> {
        self.blocks
            .get(id.index() / BLOCK_SIZE)
            .and_then(|b| b.get(id.index() % BLOCK_SIZE))
    }

    fn get_mut(&mut self, id: HistoryId) -> Option<&mut HistoryEntry> {
        self.blocks
            .get_mut(id.index() / BLOCK_SIZE)
            .and_then(|b| b.get_mut(id.index() % BLOCK_SIZE))
    }

    /// Total entries, valid or not
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Weighted LM lookups performed this utterance
    pub fn lm_ops(&self) -> usize {
        self.lm_ops
    }

    /// Frames with an entry span, the root frame included
    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    fn lm_score(&mut self, state: &LmState, word: WordId) -> Score {
        if let Some(&s) = self.lm_memo.get(&(*state, word)) {
            return s;
        }
        self.lm_ops += 1;
        let s = self.weights.apply(self.lm.score(state, word));
        self.lm_memo.insert((*state, word), s);
        s
    }

    /// Record a word exit at `end_frame`
    ///
    /// `score` is the exit path score with the tree lookahead already removed.
    /// `right_context` names the following phones the exiting leaf was built for.
    /// Returns the entry now holding this (word, LM state), or `None` when an
    /// existing entry already scored better.
    pub fn record_exit(
        &mut self,
        word: WordId,
        end_frame: FrameIdx,
        score: Score,
        pred: HistoryId,
        tree: TreeKind,
        right_context: Option<&[PhoneId]>,
    ) -> Result<Option<HistoryId>> {
        if end_frame < self.current {
            return Err(Error::propagation(
                end_frame,
                format!("word exit recorded after the frame was closed (now at {})", self.current),
            ));
        }
        self.current = end_frame;

        let (pred_end, pred_path, pred_state) = match self.get(pred) {
            Some(p) => (p.end_frame, p.path_score, p.lm_state),
            _ => {
                return Err(Error::propagation(
                    end_frame,
                    format!("word exit refers to missing predecessor {}", pred.0),
                ))
            }
        };
        if pred_end >= end_frame {
            return Err(Error::propagation(
                end_frame,
                format!(
                    "predecessor {} ends at frame {}, not before {}",
                    pred.0, pred_end, end_frame
                ),
            ));
        }

        let (lm_score, lm_state) = match self.fillers.penalty(word) {
            Some(penalty) => (penalty, pred_state),
            None => (self.lm_score(&pred_state, word), self.lm.advance(&pred_state, word)),
        };
        let path = add(score, lm_score);
        if path <= WORST_SCORE {
            return Ok(None);
        }
        let key = match self.addressing {
            HistoryAddressing::Bigram => LmState::default(),
            HistoryAddressing::FullState => lm_state,
        };

        let entry = HistoryEntry {
            word,
            start_frame: pred_end + 1,
            end_frame,
            acoustic_score: score - pred_path,
            lm_score,
            path_score: path,
            pred: Some(pred),
            lm_state,
            valid: true,
            tree,
            right_context: right_context.map(|phones| phones.iter().map(|&p| (p, path)).collect()),
        };

        let existing = self.index.get(&word).and_then(|m| m.get(&key)).copied();
        let id = match existing {
            Some(id) => {
                let Some(old) = self.get_mut(id) else {
                    return Err(Error::propagation(end_frame, "LM-state index refers to a missing entry"));
                };
                let better = path > old.path_score;
                match (old.right_context.take(), entry.right_context.clone()) {
                    (Some(mut merged), Some(new_rc)) => {
                        for (p, s) in new_rc {
                            match merged.iter_mut().find(|(q, _)| *q == p) {
                                Some(slot) => slot.1 = slot.1.max(s),
                                None => merged.push((p, s)),
                            }
                        }
                        if better {
                            *old = entry;
                        }
                        old.right_context = Some(merged);
                    }
                    (previous, _) => {
                        if !better {
                            old.right_context = previous;
                            return Ok(None);
                        }
                        *old = entry;
                    }
                }
                id
            }
            None => {
                let id = self.push(entry);
                self.index.entry(word).or_default().insert(key, id);
                id
            }
        };

        let slot = self.open_current();
        self.frames[slot].best = self.frames[slot].best.max(path);
        Ok(Some(id))
    }

    /// Valid entries of a frame
    pub fn entries_at(&self, frame: FrameIdx) -> impl Iterator<Item = (HistoryId, &HistoryEntry)> + '_ {
        let (first, end) = usize::try_from(frame + 1)
            .ok()
            .and_then(|slot| self.frames.get(slot))
            .map_or((0, 0), |s| (s.first, s.end));
        (first..end).filter_map(move |i| {
            let id = HistoryId(i);
            self.get(id).filter(|e| e.valid).map(|e| (id, e))
        })
    }

    /// Best path score of a frame
    pub fn frame_best(&self, frame: FrameIdx) -> Score {
        usize::try_from(frame + 1)
            .ok()
            .and_then(|slot| self.frames.get(slot))
            .map_or(WORST_SCORE, |s| s.best)
    }

    /// Invalidate entries of `frame` outside `frame_best + beam`, beyond the
    /// `max_histories` best, or belonging to more than `max_words` distinct non-filler
    /// words. Returns the number of entries kept.
    pub fn prune(&mut self, frame: FrameIdx, max_words: usize, max_histories: usize, beam: Score) -> usize {
        let best = self.frame_best(frame);
        let threshold = add(best, beam);

        let mut ranked: Vec<(Score, HistoryId)> = self
            .entries_at(frame)
            .map(|(id, e)| (e.path_score, id))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut words: Vec<WordId> = Vec::new();
        let mut kept = 0;
        let mut pruned = 0;
        for (score, id) in ranked {
            let Some(entry) = self.get(id) else { continue };
            let word = entry.word;
            let filler = self.fillers.is_filler(word);
            let word_ok = filler || words.contains(&word) || words.len() < max_words;
            let keep = score >= threshold && kept < max_histories && word_ok;
            if keep {
                kept += 1;
                if !filler && !words.contains(&word) {
                    words.push(word);
                }
            } else {
                pruned += 1;
                if let Some(e) = self.get_mut(id) {
                    e.valid = false;
                }
            }
        }

        tracing::trace!(frame, kept, pruned, words = words.len(), "History pruned");
        kept
    }

    /// Close a frame: later exits must end after it. Resets the frame-scoped LM-state
    /// index and LM memo.
    pub fn frame_windup(&mut self, frame: FrameIdx) {
        self.current = self.current.max(frame + 1);
        self.open_current();
        self.index.clear();
        self.lm_memo.clear();
    }

    /// Predecessor chain of `id`, oldest first, without the utterance root
    pub fn backtrace(&self, id: HistoryId) -> Vec<HistoryId> {
        let mut path = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let Some(e) = self.get(c) else { break };
            if e.tree == TreeKind::Root {
                break;
            }
            path.push(c);
            cur = e.pred;
        }
        path.reverse();
        path
    }

    /// Best final hypothesis: the highest path score plus end-of-utterance LM score
    /// among the valid entries of the last frame that has any
    pub fn finalize(&mut self, last_frame: FrameIdx) -> Result<FinalEntry> {
        let end = self.lm.end_word();
        let mut frame = last_frame;
        while frame >= 0 {
            let candidates: Vec<(HistoryId, LmState, Score)> = self
                .entries_at(frame)
                .map(|(id, e)| (id, e.lm_state, e.path_score))
                .collect();
            let mut best: Option<FinalEntry> = None;
            for (id, state, path) in candidates {
                let lm = self.weights.apply(self.lm.score(&state, end));
                self.lm_ops += 1;
                let score = add(path, lm);
                if best.map_or(true, |b| score > b.score) {
                    best = Some(FinalEntry {
                        id,
                        score,
                        end_lm_score: lm,
                    });
                }
            }
            if let Some(best) = best {
                if frame < last_frame {
                    tracing::debug!(last_frame, frame, "No word ended on the last frame, backing off");
                }
                return Ok(best);
            }
            frame -= 1;
        }
        Err(Error::NoRecognition)
    }

    /// Word segments of the path ending at `id`
    pub fn segments(&self, id: HistoryId, dict: &Dictionary) -> Vec<WordSegment> {
        self.backtrace(id)
            .into_iter()
            .filter_map(|h| self.get(h))
            .map(|e| WordSegment {
                word: e.word,
                text: dict.base_name(e.word).to_string(),
                start_frame: e.start_frame,
                end_frame: e.end_frame,
                acoustic_score: e.acoustic_score,
                lm_score: e.lm_score,
                filler: dict.is_filler(e.word),
            })
            .collect()
    }

    /// Hypothesis for a finalized entry
    pub fn hypothesis(&self, last: FinalEntry, dict: &Dictionary, frames: usize) -> Hypothesis {
        Hypothesis {
            segments: self.segments(last.id, dict),
            score: last.score,
            frames,
        }
    }

    /// All entries, valid or not, in id order
    pub fn iter(&self) -> impl Iterator<Item = (HistoryId, &HistoryEntry)> + '_ {
        self.blocks
            .iter()
            .flatten()
            .enumerate()
            .map(|(i, e)| (HistoryId(i as u32), e))
    }

    pub fn addressing(&self) -> HistoryAddressing {
        self.addressing
    }

    pub fn fillers(&self) -> &FillerPenalties {
        &self.fillers
    }

    pub fn language_model(&self) -> &Arc<dyn LanguageModel> {
        &self.lm
    }

    pub fn weights(&self) -> LmWeights {
        self.weights
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lexdecode_core::{NgramModelBuilder, PhoneSet};

    pub(crate) struct Fixture {
        pub dict: Dictionary,
        pub lm: Arc<dyn LanguageModel>,
        pub fillers: FillerPenalties,
        pub a: WordId,
        pub b: WordId,
        pub c: WordId,
    }

    pub(crate) fn fixture() -> Fixture {
        let phones = PhoneSet::new(&["SIL", "a", "b", "c"], "SIL").unwrap();
        let mut dict = Dictionary::new(&phones);
        let a = dict.add_word("A", &["a"], &phones).unwrap();
        let b = dict.add_word("B", &["b"], &phones).unwrap();
        let c = dict.add_word("C", &["c"], &phones).unwrap();
        let (s, e) = (dict.start_word(), dict.end_word());
        let lm = NgramModelBuilder::new(s, e)
            .unigram(s, 0.1, 0.5)
            .unigram(e, 0.1, 1.0)
            .unigram(a, 0.3, 0.5)
            .unigram(b, 0.3, 0.5)
            .unigram(c, 0.2, 0.5)
            .trigram(s, a, b, 0.9)
            .build();
        let fillers = FillerPenalties::from_dictionary(&dict, 0.1, 0.05, LmWeights::default());
        Fixture {
            dict,
            lm: Arc::new(lm),
            fillers,
            a,
            b,
            c,
        }
    }

    fn history(f: &Fixture, addressing: HistoryAddressing) -> SearchHistory {
        SearchHistory::new(f.lm.clone(), LmWeights::default(), f.fillers.clone(), addressing)
    }

    #[test]
    fn test_root_entry() {
        let f = fixture();
        let mut h = history(&f, HistoryAddressing::FullState);
        let root = h.begin_utterance();
        let e = h.get(root).unwrap();
        assert_eq!(e.end_frame, -1);
        assert_eq!(e.path_score, 0);
        assert_eq!(h.entries_at(-1).count(), 1);
        assert!(h.backtrace(root).is_empty());
    }

    #[test]
    fn test_scores_telescope() {
        let f = fixture();
        let mut h = history(&f, HistoryAddressing::FullState);
        let root = h.begin_utterance();
        let a = h.record_exit(f.a, 2, -300, root, TreeKind::Word, None).unwrap().unwrap();
        h.frame_windup(2);
        let sil = f.dict.silence_word();
        let s = h.record_exit(sil, 4, -700, a, TreeKind::Filler, None).unwrap().unwrap();
        h.frame_windup(4);
        let b = h.record_exit(f.b, 6, -1500, s, TreeKind::Word, None).unwrap().unwrap();

        let eb = h.get(b).unwrap();
        assert_eq!(eb.start_frame, 5);
        // filler keeps the predecessor's LM history
        assert_eq!(h.get(s).unwrap().lm_state, h.get(a).unwrap().lm_state);
        assert_eq!(h.get(s).unwrap().lm_score, f.fillers.penalty(sil).unwrap());

        let total: Score = h
            .backtrace(b)
            .iter()
            .map(|&id| {
                let e = h.get(id).unwrap();
                e.acoustic_score + e.lm_score
            })
            .sum();
        assert_eq!(total, eb.path_score);
        assert_eq!(h.backtrace(b), vec![a, s, b]);
    }

    #[test]
    fn test_predecessor_must_end_earlier() {
        let f = fixture();
        let mut h = history(&f, HistoryAddressing::FullState);
        let root = h.begin_utterance();
        let a = h.record_exit(f.a, 3, -100, root, TreeKind::Word, None).unwrap().unwrap();
        let err = h.record_exit(f.b, 3, -200, a, TreeKind::Word, None).unwrap_err();
        assert!(matches!(err, Error::PropagationFailure { frame: 3, .. }));
    }

    #[test]
    fn test_lm_state_deduplication() {
        let f = fixture();
        let mut full = history(&f, HistoryAddressing::FullState);
        let root = full.begin_utterance();
        let a = full.record_exit(f.a, 1, -100, root, TreeKind::Word, None).unwrap().unwrap();
        let c = full.record_exit(f.c, 1, -120, root, TreeKind::Word, None).unwrap().unwrap();
        full.frame_windup(1);
        // B after A and B after C differ in trigram history
        full.record_exit(f.b, 3, -400, a, TreeKind::Word, None).unwrap();
        full.record_exit(f.b, 3, -380, c, TreeKind::Word, None).unwrap();
        full.record_exit(f.b, 3, -450, a, TreeKind::Word, None).unwrap();
        assert_eq!(full.entries_at(3).filter(|(_, e)| e.word == f.b).count(), 2);

        let mut bigram = history(&f, HistoryAddressing::Bigram);
        let root = bigram.begin_utterance();
        let a = bigram.record_exit(f.a, 1, -100, root, TreeKind::Word, None).unwrap().unwrap();
        let c = bigram.record_exit(f.c, 1, -120, root, TreeKind::Word, None).unwrap().unwrap();
        bigram.frame_windup(1);
        // B|A has a trigram, B|C backs off; C wins only with a much better acoustic score
        let first = bigram.record_exit(f.b, 3, -8000, a, TreeKind::Word, None).unwrap();
        let second = bigram.record_exit(f.b, 3, -380, c, TreeKind::Word, None).unwrap();
        assert_eq!(first, second);
        let entries: Vec<_> = bigram.entries_at(3).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.pred, Some(c));
    }

    #[test]
    fn test_prune_applies_beam_and_caps() {
        let f = fixture();
        let mut h = history(&f, HistoryAddressing::FullState);
        let root = h.begin_utterance();
        h.record_exit(f.a, 0, -100, root, TreeKind::Word, None).unwrap();
        h.record_exit(f.b, 0, -200, root, TreeKind::Word, None).unwrap();
        h.record_exit(f.c, 0, -9000, root, TreeKind::Word, None).unwrap();
        h.record_exit(f.dict.silence_word(), 0, -300, root, TreeKind::Filler, None).unwrap();

        let best = h.frame_best(0);
        let kept = h.prune(0, 1, 10, -5000);
        let survivors: Vec<_> = h.entries_at(0).map(|(_, e)| e.word).collect();
        // C falls outside the beam; B exceeds the one-word cap; silence is exempt
        assert_eq!(kept, 2);
        assert_eq!(survivors, vec![f.a, f.dict.silence_word()]);
        assert!(h.entries_at(0).all(|(_, e)| e.path_score >= best - 5000));

        let kept = h.prune(0, 10, 1, -5000);
        assert_eq!(kept, 1);
    }

    #[test]
    fn test_right_context_scores_merge() {
        let f = fixture();
        let phones = PhoneSet::new(&["SIL", "a", "b", "c"], "SIL").unwrap();
        let (pa, pb) = (phones.id("a").unwrap(), phones.id("b").unwrap());
        let mut h = history(&f, HistoryAddressing::FullState);
        let root = h.begin_utterance();
        let id = h.record_exit(f.a, 2, -500, root, TreeKind::Word, Some(&[pa])).unwrap().unwrap();
        let again = h.record_exit(f.a, 2, -300, root, TreeKind::Word, Some(&[pb])).unwrap().unwrap();
        assert_eq!(id, again);
        let e = h.get(id).unwrap();
        assert!(e.score_into(pb) > e.score_into(pa));
        assert_eq!(e.score_into(pb), e.path_score);
        assert_eq!(e.score_into(phones.silence()), WORST_SCORE);
    }

    #[test]
    fn test_finalize_backs_off_to_last_frame_with_entries() {
        let f = fixture();
        let mut h = history(&f, HistoryAddressing::FullState);
        let root = h.begin_utterance();
        let a = h.record_exit(f.a, 2, -100, root, TreeKind::Word, None).unwrap().unwrap();
        h.prune(2, 10, 10, -1000);
        h.frame_windup(2);
        h.frame_windup(3);

        let last = h.finalize(4).unwrap();
        assert_eq!(last.id, a);
        let hyp = h.hypothesis(last, &f.dict, 5);
        assert_eq!(hyp.text(), "A");
        assert_eq!(hyp.score, h.get(a).unwrap().path_score + last.end_lm_score);
    }

    #[test]
    fn test_finalize_without_words_is_no_recognition() {
        let f = fixture();
        let mut h = history(&f, HistoryAddressing::FullState);
        h.begin_utterance();
        assert!(matches!(h.finalize(10), Err(Error::NoRecognition)));
    }
}
