//! Tiny in-memory models shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use lexdecode_config::{BeamConfig, LanguageModelConfig, Settings};
use lexdecode_core::logmath::{add, Score};
use lexdecode_core::{
    AcousticModel, AcousticModelBuilder, Dictionary, FrameIdx, LanguageModel, MatrixScorer, NgramModelBuilder,
    PhonePosition, PhoneSet, TransitionMatrix, TriphoneKey,
};
use lexdecode_search::{DecoderResources, Utterance};

/// Acoustic score of the phone spoken in a frame
pub const GOOD: Score = -10;
/// Acoustic score of every other phone
pub const BAD: Score = -1_000_000;

pub struct Toy {
    pub phones: PhoneSet,
    pub dict: Arc<Dictionary>,
    pub model: Arc<AcousticModel>,
}

impl Toy {
    /// One score row per frame: `GOOD` for the named phone, `BAD` elsewhere
    pub fn scorer(&self, spoken: &[&str]) -> MatrixScorer {
        let rows = spoken
            .iter()
            .map(|name| {
                let phone = self.phones.id(name).unwrap();
                let senone = self.model.senone_sequence(self.model.ci_unit(phone))[0].index();
                let mut row = vec![BAD; self.model.n_senones()];
                row[senone] = GOOD;
                row
            })
            .collect();
        MatrixScorer::new(rows)
    }

    /// Senone of the one-state triphone `base` between `left` and `right`
    pub fn triphone_senone(&self, base: &str, left: &str, right: &str, position: PhonePosition) -> usize {
        let phone = |name: &str| self.phones.id(name).unwrap();
        let key = TriphoneKey {
            base: phone(base),
            left: phone(left),
            right: phone(right),
            position,
        };
        let ssid = self.model.lookup(key).unwrap();
        self.model.senone_sequence(ssid)[0].index()
    }
}

/// Context-independent model: one emitting state per phone, one senone each
pub fn ci_model(names: &[&str]) -> (Arc<AcousticModel>, PhoneSet) {
    let phones = PhoneSet::new(names, "SIL").unwrap();
    let tmat = TransitionMatrix::bakis(1, 0.5, 0.0);
    let mut builder = AcousticModelBuilder::new(phones.clone(), 1, names.len());
    for (i, name) in names.iter().enumerate() {
        builder = builder.ci_phone(name, &[i as u32], tmat.clone()).unwrap();
    }
    (Arc::new(builder.build().unwrap()), phones)
}

/// A = p1, B = p1 p2
pub fn ab_toy() -> Toy {
    let (model, phones) = ci_model(&["SIL", "p1", "p2"]);
    let mut dict = Dictionary::new(&phones);
    dict.add_word("A", &["p1"], &phones).unwrap();
    dict.add_word("B", &["p1", "p2"], &phones).unwrap();
    Toy {
        phones,
        dict: Arc::new(dict),
        model,
    }
}

/// Context-dependent model over SIL a b c with its own senone for every triphone of
/// `a` and `b`; A = a, B = b. No word starts with `c`.
pub fn cd_toy() -> Toy {
    let names = ["SIL", "a", "b", "c"];
    let contexts = ["SIL", "a", "b"];
    let phones = PhoneSet::new(&names, "SIL").unwrap();
    let tmat = TransitionMatrix::bakis(1, 0.5, 0.0);
    let mut builder = AcousticModelBuilder::new(phones.clone(), 1, 64);
    for (i, name) in names.iter().enumerate() {
        builder = builder.ci_phone(name, &[i as u32], tmat.clone()).unwrap();
    }
    let mut next = names.len() as u32;
    for base in ["a", "b"] {
        for l in contexts {
            for r in contexts {
                for pos in [PhonePosition::Begin, PhonePosition::End, PhonePosition::Single] {
                    builder = builder.triphone(base, l, r, pos, &[next]).unwrap();
                    next += 1;
                }
            }
        }
    }
    let model = Arc::new(builder.build().unwrap());

    let mut dict = Dictionary::new(&phones);
    dict.add_word("A", &["a"], &phones).unwrap();
    dict.add_word("B", &["b"], &phones).unwrap();
    Toy {
        phones,
        dict: Arc::new(dict),
        model,
    }
}

/// Segments cover every frame in order and their scores add up to the final score
pub fn assert_backtrace_consistent(utt: &Utterance) {
    let mut total = 0;
    let mut next_start: FrameIdx = 0;
    for seg in &utt.hypothesis.segments {
        assert_eq!(seg.start_frame, next_start);
        assert!(seg.end_frame >= seg.start_frame);
        next_start = seg.end_frame + 1;
        total = add(total, add(seg.acoustic_score, seg.lm_score));
    }
    assert_eq!(next_start, utt.hypothesis.frames as FrameIdx);

    let last = utt.history.get(utt.final_entry.id).unwrap();
    assert_eq!(total, last.path_score);
    assert_eq!(add(total, utt.final_entry.end_lm_score), utt.hypothesis.score);

    // Every predecessor ends strictly before its successor starts
    let chain = utt.history.backtrace(utt.final_entry.id);
    for pair in chain.windows(2) {
        let (p, s) = (utt.history.get(pair[0]).unwrap(), utt.history.get(pair[1]).unwrap());
        assert!(p.end_frame < s.start_frame);
        assert_eq!(s.pred, Some(pair[0]));
    }
}

/// Unigram model over the named words plus the sentence end
pub fn unigram_lm(dict: &Dictionary, words: &[(&str, f64)]) -> Arc<dyn LanguageModel> {
    let mut builder =
        NgramModelBuilder::new(dict.start_word(), dict.end_word()).unigram(dict.end_word(), 0.2, 1.0);
    for (name, p) in words {
        builder = builder.unigram(dict.id(name).unwrap(), *p, 1.0);
    }
    Arc::new(builder.build())
}

pub fn ab_lm(toy: &Toy) -> Arc<dyn LanguageModel> {
    unigram_lm(&toy.dict, &[("A", 0.4), ("B", 0.4)])
}

pub fn resources(toy: &Toy, lm: Arc<dyn LanguageModel>) -> DecoderResources {
    DecoderResources::new(toy.dict.clone(), toy.model.clone(), lm, &LanguageModelConfig::default()).unwrap()
}

/// Exhaustive search settings
pub fn wide_settings() -> Settings {
    Settings {
        beam: BeamConfig::wide(),
        ..Settings::default()
    }
}

/// "A <sil> B": two frames of p1, two of silence, then p1 p2
pub const A_SIL_B: [&str; 6] = ["p1", "p1", "SIL", "SIL", "p1", "p2"];
