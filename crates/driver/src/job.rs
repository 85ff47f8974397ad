//! JSON decode jobs
//!
//! A job bundles a toy context-independent acoustic model, a dictionary, a back-off
//! language model and the per-frame senone scores of one or more utterances. Frames
//! are given either as an explicit score matrix or as the phone spoken in each frame.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use lexdecode_core::logmath::Score;
use lexdecode_core::{
    AcousticModel, AcousticModelBuilder, Dictionary, Error, Hypothesis, LanguageModel, MatrixScorer,
    NgramModelBuilder, PhoneSet, Result, TransitionMatrix, WordId,
};
use lexdecode_search::{DecodeOutcome, UtteranceStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct DecodeJob {
    pub phones: Vec<String>,
    pub silence: String,
    #[serde(default = "default_states")]
    pub states_per_phone: usize,
    #[serde(default = "default_self_loop")]
    pub self_loop: f64,
    pub words: Vec<WordSpec>,
    pub language_model: LmSpec,
    pub utterances: Vec<UtteranceSpec>,
}

fn default_states() -> usize {
    1
}

fn default_self_loop() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct WordSpec {
    pub name: String,
    pub phones: Vec<String>,
    #[serde(default)]
    pub filler: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LmSpec {
    pub unigrams: Vec<NgramSpec>,
    #[serde(default)]
    pub bigrams: Vec<NgramSpec>,
}

/// `words` holds one word for a unigram, two for a bigram
#[derive(Debug, Clone, Deserialize)]
pub struct NgramSpec {
    pub words: Vec<String>,
    pub prob: f64,
    #[serde(default = "default_backoff")]
    pub backoff: f64,
}

fn default_backoff() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct UtteranceSpec {
    pub id: String,
    /// Explicit `frames x senones` scores
    #[serde(default)]
    pub scores: Vec<Vec<Score>>,
    /// Phone spoken per frame, expanded with `match_score` / `mismatch_score`
    #[serde(default)]
    pub spoken: Vec<String>,
    #[serde(default = "default_match")]
    pub match_score: Score,
    #[serde(default = "default_mismatch")]
    pub mismatch_score: Score,
}

fn default_match() -> Score {
    -10
}

fn default_mismatch() -> Score {
    -1_000_000
}

/// Models assembled from a job
pub struct JobModels {
    pub phones: PhoneSet,
    pub dict: Arc<Dictionary>,
    pub model: Arc<AcousticModel>,
    pub lm: Arc<dyn LanguageModel>,
}

impl DecodeJob {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn models(&self) -> Result<JobModels> {
        let phones = PhoneSet::new(&self.phones, &self.silence)?;
        let n = self.states_per_phone.max(1);
        let tmat = TransitionMatrix::bakis(n, self.self_loop, 0.0);
        let mut builder = AcousticModelBuilder::new(phones.clone(), n, phones.len() * n);
        for (p, name) in self.phones.iter().enumerate() {
            let senones: Vec<u32> = (0..n).map(|s| (p * n + s) as u32).collect();
            builder = builder.ci_phone(name, &senones, tmat.clone())?;
        }
        let model = Arc::new(builder.build()?);

        let mut dict = Dictionary::new(&phones);
        for w in &self.words {
            let pron: Vec<&str> = w.phones.iter().map(String::as_str).collect();
            if w.filler {
                dict.add_filler(&w.name, &pron, &phones)?;
            } else {
                dict.add_word(&w.name, &pron, &phones)?;
            }
        }

        let lm = self.language_model(&dict)?;
        Ok(JobModels {
            phones,
            dict: Arc::new(dict),
            model,
            lm,
        })
    }

    fn language_model(&self, dict: &Dictionary) -> Result<Arc<dyn LanguageModel>> {
        let word = |name: &str| -> Result<WordId> {
            dict.id(name)
                .ok_or_else(|| Error::ModelInconsistency(format!("language model word '{}' is not in the dictionary", name)))
        };
        let mut builder = NgramModelBuilder::new(dict.start_word(), dict.end_word());
        for u in &self.language_model.unigrams {
            let [w] = u.words.as_slice() else {
                return Err(Error::ModelInconsistency(format!("unigram entry with {} words", u.words.len())));
            };
            builder = builder.unigram(word(w)?, u.prob, u.backoff);
        }
        for b in &self.language_model.bigrams {
            let [w1, w2] = b.words.as_slice() else {
                return Err(Error::ModelInconsistency(format!("bigram entry with {} words", b.words.len())));
            };
            builder = builder.bigram(word(w1)?, word(w2)?, b.prob, b.backoff);
        }
        Ok(Arc::new(builder.build()))
    }
}

impl UtteranceSpec {
    /// Score matrix for this utterance
    pub fn scorer(&self, models: &JobModels) -> Result<MatrixScorer> {
        if !self.scores.is_empty() {
            return Ok(MatrixScorer::new(self.scores.clone()));
        }
        let model = &models.model;
        let rows = self
            .spoken
            .iter()
            .map(|name| -> Result<Vec<Score>> {
                let phone = models
                    .phones
                    .id(name)
                    .ok_or_else(|| Error::Scorer(format!("utterance {}: unknown phone '{}'", self.id, name)))?;
                let mut row = vec![self.mismatch_score; model.n_senones()];
                for s in model.senone_sequence(model.ci_unit(phone)) {
                    row[s.index()] = self.match_score;
                }
                Ok(row)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(MatrixScorer::new(rows))
    }
}

/// One line of driver output
#[derive(Debug, Serialize)]
pub struct UtteranceReport<'a> {
    pub id: &'a str,
    pub status: &'static str,
    pub text: String,
    pub source: &'static str,
    pub hypothesis: &'a Hypothesis,
}

impl<'a> UtteranceReport<'a> {
    pub fn new(outcome: &'a DecodeOutcome) -> Self {
        let status = match outcome.status {
            UtteranceStatus::Recognized => "recognized",
            UtteranceStatus::NoRecognition => "no_recognition",
            UtteranceStatus::Aborted { kind } => kind,
        };
        let source = match outcome.source {
            lexdecode_search::HypothesisSource::FirstPass => "first_pass",
            lexdecode_search::HypothesisSource::Lattice => "lattice",
        };
        Self {
            id: &outcome.utterance_id,
            status,
            text: outcome.hypothesis.text(),
            source,
            hypothesis: &outcome.hypothesis,
        }
    }
}
