//! Frame-synchronous search driver
//!
//! One [`FrameEngine`] decodes one utterance at a time. Per frame it selects the
//! senones the active tree nodes need, has the external scorer compute exactly
//! those, evaluates every tree, derives the beam thresholds, propagates inside the
//! trees, records word exits, prunes the history and re-enters the trees from the
//! surviving exits. Any error inside a frame tears the utterance down and returns the
//! engine to idle; the shared model tables are never touched.

use std::sync::Arc;

use lexdecode_config::{BeamConfig, CrossWordPolicy, LanguageModelConfig, SearchConfig, TreeSelection};
use lexdecode_core::logmath::{prob_to_score, Score, WORST_SCORE};
use lexdecode_core::{
    AcousticModel, AcousticScorer, Dictionary, Error, FillerPenalties, FrameIdx, Hypothesis, LanguageModel,
    LmWeights, PhoneId, Result, SenoneMask, WordId,
};

use crate::beam::{BeamController, Thresholds};
use crate::context::ContextUnitTable;
use crate::history::{FinalEntry, HistoryId, SearchHistory, TreeKind};
use crate::lextree::{unigram_lookahead, LexTree};
use crate::lookahead::PhoneLookahead;

/// Immutable tables shared by every engine of a session
#[derive(Clone)]
pub struct DecoderResources {
    pub dict: Arc<Dictionary>,
    pub table: Arc<ContextUnitTable>,
    pub lm: Arc<dyn LanguageModel>,
    pub weights: LmWeights,
    pub fillers: FillerPenalties,
}

impl DecoderResources {
    /// Build the context tables and filler penalties for a dictionary
    pub fn new(
        dict: Arc<Dictionary>,
        model: Arc<AcousticModel>,
        lm: Arc<dyn LanguageModel>,
        config: &LanguageModelConfig,
    ) -> Result<Self> {
        if lm.start_word() != dict.start_word() || lm.end_word() != dict.end_word() {
            return Err(Error::ModelInconsistency(
                "language model and dictionary disagree on the sentence markers".to_string(),
            ));
        }
        let table = Arc::new(ContextUnitTable::build(&dict, model)?);
        let weights = config.weights();
        let fillers = FillerPenalties::from_dictionary(
            &dict,
            config.silence_probability,
            config.filler_probability,
            weights,
        );
        Ok(Self {
            dict,
            table,
            lm,
            weights,
            fillers,
        })
    }

    /// Words searched through the word trees: in the LM, not fillers
    pub fn vocabulary(&self) -> Vec<WordId> {
        self.dict
            .ids()
            .filter(|&w| !self.dict.is_filler(w) && self.lm.contains(w))
            .collect()
    }
}

/// Choice of the word-tree copy that receives a frame's exits
#[derive(Debug, Clone)]
pub enum ReentryPolicy {
    RoundRobin { copies: usize },
    LeastRecentlyUsed { last_used: Vec<FrameIdx> },
}

impl ReentryPolicy {
    pub fn new(selection: TreeSelection, copies: usize) -> Self {
        let copies = copies.max(1);
        match selection {
            TreeSelection::RoundRobin => ReentryPolicy::RoundRobin { copies },
            TreeSelection::LeastRecentlyUsed => ReentryPolicy::LeastRecentlyUsed {
                last_used: vec![FrameIdx::MIN; copies],
            },
        }
    }

    /// Tree copy for exits of `frame`
    pub fn select(&mut self, frame: FrameIdx) -> usize {
        match self {
            ReentryPolicy::RoundRobin { copies } => frame.rem_euclid(*copies as FrameIdx) as usize,
            ReentryPolicy::LeastRecentlyUsed { last_used } => {
                let mut pick = 0;
                for (i, &f) in last_used.iter().enumerate() {
                    if f < last_used[pick] {
                        pick = i;
                    }
                }
                last_used[pick] = frame;
                pick
            }
        }
    }

    pub fn reset(&mut self) {
        if let ReentryPolicy::LeastRecentlyUsed { last_used } = self {
            last_used.fill(FrameIdx::MIN);
        }
    }
}

/// Engine life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Active { frame: FrameIdx },
}

/// Scratch buffers reused across frames
struct FrameBuffers {
    senones: SenoneMask,
    senone_scores: Vec<Score>,
    composite_active: Vec<bool>,
    composite_scores: Vec<Score>,
    node_best: Vec<Score>,
}

impl FrameBuffers {
    fn new(table: &ContextUnitTable) -> Self {
        let n = table.model().n_senones();
        Self {
            senones: SenoneMask::new(n),
            senone_scores: vec![WORST_SCORE; n],
            composite_active: vec![false; table.n_composite_senones()],
            composite_scores: Vec::with_capacity(table.n_composite_senones()),
            node_best: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.senones.clear();
        self.senone_scores.fill(WORST_SCORE);
        self.composite_active.fill(false);
        self.composite_scores.clear();
        self.node_best.clear();
    }
}

/// Per-frame diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: FrameIdx,
    pub best: Score,
    pub thresholds: Thresholds,
    pub active_nodes: usize,
    pub active_senones: usize,
    pub word_exits: usize,
    pub histories_kept: usize,
}

/// Counters of one utterance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UtteranceStats {
    pub frames: usize,
    pub nodes_evaluated: usize,
    pub senones_scored: usize,
    pub word_exits: usize,
    pub history_entries: usize,
    pub lm_ops: usize,
    pub narrowed_frames: usize,
    pub expanded_leaves: usize,
}

/// Finished utterance
pub struct Utterance {
    pub hypothesis: Hypothesis,
    pub final_entry: FinalEntry,
    /// History of the utterance, for lattice construction
    pub history: SearchHistory,
    pub stats: UtteranceStats,
}

/// Time-synchronous search over lexical trees
pub struct FrameEngine {
    resources: DecoderResources,
    trees: Vec<LexTree>,
    filler_tree: Option<LexTree>,
    reentry: ReentryPolicy,
    beam: BeamController,
    beam_config: BeamConfig,
    history: SearchHistory,
    lookahead: Option<PhoneLookahead>,
    buffers: FrameBuffers,
    state: EngineState,
    stats: UtteranceStats,
    frame_diagnostics: bool,
}

impl FrameEngine {
    pub fn new(resources: DecoderResources, beam: &BeamConfig, search: &SearchConfig) -> Result<Self> {
        let table = resources.table.clone();
        let vocabulary = resources.vocabulary();
        if vocabulary.is_empty() {
            return Err(Error::ModelInconsistency(
                "no dictionary word is known to the language model".to_string(),
            ));
        }
        let lm = resources.lm.clone();
        let weights = resources.weights;
        let words = unigram_lookahead(&vocabulary, |w| weights.apply(lm.unigram(w)));

        let mut trees = Vec::with_capacity(search.copies());
        for _ in 0..search.copies() {
            trees.push(LexTree::build(
                table.clone(),
                &resources.dict,
                &words,
                table.left_contexts(),
                search.cross_word_policy,
                TreeKind::Word,
            )?);
        }

        let fillers: Vec<(WordId, Score)> = resources.fillers.words().into_iter().map(|w| (w, 0)).collect();
        let filler_tree = if fillers.is_empty() {
            None
        } else {
            // Filler pronunciations are context independent; composite leaves suffice
            Some(LexTree::build(
                table.clone(),
                &resources.dict,
                &fillers,
                &[],
                CrossWordPolicy::Composite,
                TreeKind::Filler,
            )?)
        };

        let lookahead = search
            .phone_lookahead_beam
            .map(|b| PhoneLookahead::new(table.model(), prob_to_score(b)));

        let history = SearchHistory::new(
            resources.lm.clone(),
            resources.weights,
            resources.fillers.clone(),
            search.history_addressing,
        );

        tracing::info!(
            words = vocabulary.len(),
            fillers = fillers.len(),
            copies = trees.len(),
            nodes = trees.first().map_or(0, |t| t.n_nodes()),
            policy = ?search.cross_word_policy,
            addressing = ?search.history_addressing,
            "Frame engine ready"
        );

        Ok(Self {
            buffers: FrameBuffers::new(&table),
            resources,
            trees,
            filler_tree,
            reentry: ReentryPolicy::new(search.tree_selection, search.copies()),
            beam: BeamController::new(beam),
            beam_config: beam.clone(),
            history,
            lookahead,
            state: EngineState::Idle,
            stats: UtteranceStats::default(),
            frame_diagnostics: false,
        })
    }

    /// Emit a debug event per frame
    pub fn with_frame_diagnostics(mut self, enabled: bool) -> Self {
        self.frame_diagnostics = enabled;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn resources(&self) -> &DecoderResources {
        &self.resources
    }

    /// History of the running utterance
    pub fn history(&self) -> &SearchHistory {
        &self.history
    }

    /// Word-tree copies
    pub fn trees(&self) -> &[LexTree] {
        &self.trees
    }

    /// Start an utterance: seed the trees from the root entry
    pub fn utterance_begin(&mut self) -> Result<()> {
        if self.state != EngineState::Idle {
            return Err(Error::InvalidState("utterance already in progress".to_string()));
        }
        self.teardown();

        let root = self.history.begin_utterance();
        let left = self.last_phone(self.resources.dict.start_word());
        let copy = self.reentry.select(-1);
        let result = self.enter_from(root, left, copy, 0, WORST_SCORE + 1);
        if let Err(e) = result {
            self.teardown();
            return Err(e);
        }
        for tree in self.trees.iter_mut().chain(self.filler_tree.iter_mut()) {
            tree.swap_active_lists();
        }
        self.state = EngineState::Active { frame: 0 };
        Ok(())
    }

    /// Decode one frame
    pub fn process_frame(&mut self, scorer: &mut dyn AcousticScorer) -> Result<FrameReport> {
        let EngineState::Active { frame } = self.state else {
            return Err(Error::InvalidState("frame processed outside an utterance".to_string()));
        };
        match self.step(frame, scorer) {
            Ok(report) => {
                self.state = EngineState::Active { frame: frame + 1 };
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(frame, error = %e, "Frame failed, abandoning utterance");
                self.teardown();
                self.state = EngineState::Idle;
                Err(e)
            }
        }
    }

    fn step(&mut self, frame: FrameIdx, scorer: &mut dyn AcousticScorer) -> Result<FrameReport> {
        let table = self.resources.table.clone();
        let buffers = &mut self.buffers;
        buffers.senones.clear();
        buffers.composite_active.fill(false);

        for tree in self.trees.iter().chain(self.filler_tree.iter()) {
            tree.mark_active(&mut buffers.senones, &mut buffers.composite_active);
        }
        table.mark_active_senones(&buffers.composite_active, &mut buffers.senones);
        if let Some(la) = &self.lookahead {
            la.mark(&mut buffers.senones);
        }
        let active_senones = buffers.senones.count();

        scorer.score_frame(frame, &buffers.senones, &mut buffers.senone_scores)?;
        table.composite_scores(
            &buffers.senone_scores,
            Some(&buffers.composite_active),
            &mut buffers.composite_scores,
        );
        if let Some(la) = &mut self.lookahead {
            la.update(&buffers.senone_scores);
        }

        let mut best = WORST_SCORE;
        let mut best_word = WORST_SCORE;
        buffers.node_best.clear();
        for tree in self.trees.iter_mut().chain(self.filler_tree.iter_mut()) {
            let eval = tree.evaluate(frame, &buffers.senone_scores, &buffers.composite_scores)?;
            best = best.max(eval.best);
            best_word = best_word.max(eval.best_word);
            buffers.node_best.extend_from_slice(tree.node_scores());
        }
        let active_nodes = buffers.node_best.len();
        let thresholds = self.beam.thresholds(&buffers.node_best, best, best_word);

        let lookahead = self.lookahead.as_ref();
        for tree in self.trees.iter_mut().chain(self.filler_tree.iter_mut()) {
            tree.propagate_internal(frame, &thresholds, lookahead)?;
        }
        let mut word_exits = 0;
        for tree in self.trees.iter().chain(self.filler_tree.iter()) {
            word_exits += tree.propagate_leaves(frame, thresholds.word, &mut self.history)?;
        }

        let histories_kept = self.history.prune(
            frame,
            self.beam_config.max_words_per_frame,
            self.beam_config.max_histories_per_frame,
            self.beam_config.history_beam_score(),
        );

        let exits: Vec<(HistoryId, Option<PhoneId>)> = self
            .history
            .entries_at(frame)
            .map(|(id, e)| (id, self.resources.dict.phones(e.word).last().copied()))
            .collect();
        if !exits.is_empty() {
            let copy = self.reentry.select(frame);
            for (id, left) in exits {
                self.enter_from(id, left, copy, frame + 1, thresholds.survival)?;
            }
        }

        self.history.frame_windup(frame);
        for tree in self.trees.iter_mut().chain(self.filler_tree.iter_mut()) {
            tree.swap_active_lists();
        }

        self.stats.frames += 1;
        self.stats.nodes_evaluated += active_nodes;
        self.stats.senones_scored += active_senones;
        self.stats.word_exits += word_exits;

        let report = FrameReport {
            frame,
            best,
            thresholds,
            active_nodes,
            active_senones,
            word_exits,
            histories_kept,
        };
        if self.frame_diagnostics {
            tracing::debug!(
                frame,
                best,
                active_nodes,
                active_senones,
                word_exits,
                histories_kept,
                survival = thresholds.survival,
                "Frame"
            );
        }
        Ok(report)
    }

    /// Enter word tree `copy` and the filler tree from history entry `id`
    fn enter_from(
        &mut self,
        id: HistoryId,
        left: Option<PhoneId>,
        copy: usize,
        frame: FrameIdx,
        threshold: Score,
    ) -> Result<()> {
        let entry = self
            .history
            .get(id)
            .ok_or_else(|| Error::propagation(frame, format!("re-entry from missing history entry {}", id.0)))?;
        let tree = self
            .trees
            .get_mut(copy)
            .ok_or_else(|| Error::propagation(frame, format!("no tree copy {}", copy)))?;
        tree.enter(left, frame, |p| entry.score_into(p), id, threshold)?;
        if let Some(filler) = &mut self.filler_tree {
            filler.enter(left, frame, |p| entry.score_into(p), id, threshold)?;
        }
        Ok(())
    }

    fn last_phone(&self, word: WordId) -> Option<PhoneId> {
        self.resources.dict.phones(word).last().copied()
    }

    /// Finish the utterance and return the best hypothesis with its history
    pub fn utterance_end(&mut self) -> Result<Utterance> {
        let EngineState::Active { frame } = self.state else {
            return Err(Error::InvalidState("no utterance in progress".to_string()));
        };
        self.state = EngineState::Idle;
        self.stats.history_entries = self.history.len();
        self.stats.lm_ops = self.history.lm_ops();
        self.stats.narrowed_frames = self.beam.narrowed_frames();
        self.stats.expanded_leaves = self.trees.iter().map(|t| t.n_expanded()).sum();

        let result = self.history.finalize(frame - 1);
        let stats = self.stats;
        let fresh = SearchHistory::new(
            self.resources.lm.clone(),
            self.resources.weights,
            self.resources.fillers.clone(),
            self.history.addressing(),
        );
        let history = std::mem::replace(&mut self.history, fresh);
        self.teardown();

        let final_entry = result?;
        let hypothesis = history.hypothesis(final_entry, &self.resources.dict, frame.max(0) as usize);
        tracing::debug!(
            frames = stats.frames,
            words = hypothesis.segments.len(),
            score = hypothesis.score,
            histories = stats.history_entries,
            "Utterance finished"
        );
        Ok(Utterance {
            hypothesis,
            final_entry,
            history,
            stats,
        })
    }

    /// Decode every frame the scorer provides
    pub fn decode(&mut self, scorer: &mut dyn AcousticScorer) -> Result<Utterance> {
        self.utterance_begin()?;
        for _ in 0..scorer.num_frames() {
            self.process_frame(scorer)?;
        }
        self.utterance_end()
    }

    /// Drop all per-utterance search state
    fn teardown(&mut self) {
        for tree in self.trees.iter_mut().chain(self.filler_tree.iter_mut()) {
            tree.reset_utterance();
        }
        self.buffers.reset();
        self.beam.reset_utterance();
        self.reentry.reset();
        if let Some(la) = &mut self.lookahead {
            la.reset();
        }
        self.stats = UtteranceStats::default();
    }
}
