//! Utterance-level session driver
//!
//! [`Decoder`] owns one [`FrameEngine`] and runs whole utterances through it. Errors
//! that only invalidate the current utterance are caught here, logged and counted;
//! the session keeps decoding. Load-time errors never reach this point, and anything
//! else is returned to the caller unchanged.

use lexdecode_config::{LatticeConfig, Settings};
use lexdecode_core::{AcousticScorer, Error, Hypothesis, Result};

use crate::engine::{DecoderResources, FrameEngine, Utterance, UtteranceStats};
use crate::lattice::{BestPathSearch, Dag, LatticeBuilder};

/// How an utterance ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceStatus {
    Recognized,
    /// Every path was pruned before the end of the utterance
    NoRecognition,
    /// The utterance was abandoned; `kind` is the error label
    Aborted { kind: &'static str },
}

/// Which pass produced the reported hypothesis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HypothesisSource {
    FirstPass,
    Lattice,
}

/// Result of one decoded utterance
#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    pub utterance_id: String,
    pub status: UtteranceStatus,
    /// Reported hypothesis (empty unless recognized)
    pub hypothesis: Hypothesis,
    /// First-pass 1-best when the lattice pass replaced it
    pub first_pass: Option<Hypothesis>,
    pub source: HypothesisSource,
    pub lattice: Option<Dag>,
    pub stats: UtteranceStats,
}

impl DecodeOutcome {
    fn empty(utterance_id: &str, status: UtteranceStatus, frames: usize) -> Self {
        Self {
            utterance_id: utterance_id.to_string(),
            status,
            hypothesis: Hypothesis {
                frames,
                ..Hypothesis::default()
            },
            first_pass: None,
            source: HypothesisSource::FirstPass,
            lattice: None,
            stats: UtteranceStats::default(),
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.status == UtteranceStatus::Recognized
    }
}

/// Counters across the utterances of a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub utterances: usize,
    pub recognized: usize,
    pub no_recognition: usize,
    pub aborted: usize,
    pub lattice_fallbacks: usize,
    pub frames: usize,
}

pub struct Decoder {
    engine: FrameEngine,
    lattice: LatticeConfig,
    stats: SessionStats,
}

impl Decoder {
    /// Build the search structures for a session
    pub fn new(resources: DecoderResources, settings: &Settings) -> Result<Self> {
        let engine = FrameEngine::new(resources, &settings.beam, &settings.search)?
            .with_frame_diagnostics(settings.observability.frame_diagnostics);
        Ok(Self {
            engine,
            lattice: settings.lattice.clone(),
            stats: SessionStats::default(),
        })
    }

    pub fn engine(&self) -> &FrameEngine {
        &self.engine
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn lattice_config(&self) -> &LatticeConfig {
        &self.lattice
    }

    /// Decode one utterance
    ///
    /// Returns `Err` only for errors that make the session itself unusable.
    pub fn decode(&mut self, utterance_id: &str, scorer: &mut dyn AcousticScorer) -> Result<DecodeOutcome> {
        self.stats.utterances += 1;
        metrics::counter!("lexdecode_utterances_total").increment(1);
        let frames = scorer.num_frames();

        let utterance = match self.engine.decode(scorer) {
            Ok(utterance) => utterance,
            Err(Error::NoRecognition) => {
                self.stats.no_recognition += 1;
                metrics::counter!("lexdecode_no_recognition_total").increment(1);
                tracing::warn!(utterance = utterance_id, frames, "No hypothesis survived");
                return Ok(DecodeOutcome::empty(utterance_id, UtteranceStatus::NoRecognition, frames));
            }
            Err(e) if e.aborts_utterance() || matches!(e, Error::ResourceLimitExceeded { .. }) => {
                let kind = e.kind();
                self.stats.aborted += 1;
                metrics::counter!("lexdecode_utterances_aborted_total", "kind" => kind).increment(1);
                tracing::warn!(utterance = utterance_id, kind, error = %e, "Utterance aborted");
                return Ok(DecodeOutcome::empty(utterance_id, UtteranceStatus::Aborted { kind }, frames));
            }
            Err(e) => return Err(e),
        };

        self.stats.recognized += 1;
        self.stats.frames += utterance.stats.frames;
        let outcome = if self.lattice.enabled {
            self.with_second_pass(utterance_id, utterance)
        } else {
            DecodeOutcome {
                utterance_id: utterance_id.to_string(),
                status: UtteranceStatus::Recognized,
                hypothesis: utterance.hypothesis,
                first_pass: None,
                source: HypothesisSource::FirstPass,
                lattice: None,
                stats: utterance.stats,
            }
        };

        tracing::info!(
            utterance = utterance_id,
            text = %outcome.hypothesis.text(),
            score = outcome.hypothesis.score,
            frames = outcome.stats.frames,
            source = ?outcome.source,
            histories = outcome.stats.history_entries,
            "Utterance decoded"
        );
        Ok(outcome)
    }

    /// Rescore the utterance lattice; keep the first-pass result if that fails
    fn with_second_pass(&mut self, utterance_id: &str, utterance: Utterance) -> DecodeOutcome {
        let resources = self.engine.resources();
        let builder = LatticeBuilder::new(self.lattice.clone(), resources.fillers.clone());
        let built = builder.build(
            &utterance.history,
            &resources.dict,
            utterance.final_entry,
            utterance.hypothesis.frames,
        );

        let mut outcome = DecodeOutcome {
            utterance_id: utterance_id.to_string(),
            status: UtteranceStatus::Recognized,
            hypothesis: utterance.hypothesis,
            first_pass: None,
            source: HypothesisSource::FirstPass,
            lattice: None,
            stats: utterance.stats,
        };

        let dag = match built {
            Ok(dag) => dag,
            Err(e) => {
                lattice_fallback(&mut self.stats, utterance_id, &e);
                return outcome;
            }
        };

        let mut search = BestPathSearch::new(
            resources.lm.clone(),
            resources.weights,
            resources.fillers.clone(),
            self.lattice.max_lm_ops,
        );
        match search.search(&dag) {
            Ok(path) => {
                let rescored = search.hypothesis(&dag, &path, &resources.dict);
                tracing::debug!(
                    utterance = utterance_id,
                    nodes = dag.nodes().len(),
                    links = dag.links().len(),
                    lm_ops = search.lm_ops(),
                    first_pass = outcome.hypothesis.score,
                    best_path = path.score,
                    "Lattice rescored"
                );
                outcome.first_pass = Some(std::mem::replace(&mut outcome.hypothesis, rescored));
                outcome.source = HypothesisSource::Lattice;
            }
            Err(e) => lattice_fallback(&mut self.stats, utterance_id, &e),
        }
        outcome.lattice = Some(dag);
        outcome
    }
}

fn lattice_fallback(stats: &mut SessionStats, utterance_id: &str, error: &Error) {
    stats.lattice_fallbacks += 1;
    metrics::counter!("lexdecode_lattice_fallback_total", "kind" => error.kind()).increment(1);
    tracing::warn!(
        utterance = utterance_id,
        kind = error.kind(),
        error = %error,
        "Lattice pass failed, keeping first-pass hypothesis"
    );
}
