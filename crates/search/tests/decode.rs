//! End-to-end first-pass decoding on tiny in-memory models

mod common;

use std::collections::HashMap;

use lexdecode_config::{BeamConfig, CrossWordPolicy, HistoryAddressing, SearchConfig, TreeSelection};
use lexdecode_core::logmath::{Score, WORST_SCORE};
use lexdecode_core::{Error, FrameIdx, MatrixScorer, PhonePosition, WordId};
use lexdecode_search::{EngineState, FrameEngine, ReentryPolicy, Utterance};

use common::{
    ab_lm, ab_toy, assert_backtrace_consistent, cd_toy, resources, wide_settings, Toy, A_SIL_B, BAD, GOOD,
};

fn decode_with(toy: &Toy, beam: &BeamConfig, search: &SearchConfig, spoken: &[&str]) -> Utterance {
    let mut engine = FrameEngine::new(resources(toy, ab_lm(toy)), beam, search).unwrap();
    engine.decode(&mut toy.scorer(spoken)).unwrap()
}

fn wide(toy: &Toy, search: &SearchConfig, spoken: &[&str]) -> Utterance {
    decode_with(toy, &wide_settings().beam, search, spoken)
}

/// Test the dictionary {A: p1, B: p1 p2} on three frames of p1
#[test]
fn test_ab_scenario_favors_a() {
    let toy = ab_toy();
    let utt = decode_with(&toy, &BeamConfig::default(), &SearchConfig::default(), &["p1", "p1", "p1"]);
    let a = toy.dict.id("A").unwrap();
    let b = toy.dict.id("B").unwrap();

    let valid: Vec<_> = utt.history.iter().filter(|(_, e)| e.valid).map(|(_, e)| e.clone()).collect();
    assert!(valid.iter().any(|e| e.word == a && e.end_frame <= 2));
    assert!(!valid.iter().any(|e| e.word == b));

    assert_eq!(utt.hypothesis.text(), "A");
    assert_eq!(utt.hypothesis.segments.len(), 1);
    assert_eq!(utt.hypothesis.segments[0].start_frame, 0);
    assert_eq!(utt.hypothesis.segments[0].end_frame, 2);
    assert_eq!(utt.hypothesis.frames, 3);
    assert_eq!(utt.stats.frames, 3);
}

#[test]
fn test_two_phone_word_is_recognized() {
    let toy = ab_toy();
    let utt = wide(&toy, &SearchConfig::default(), &["p1", "p2", "p2"]);
    assert_eq!(utt.hypothesis.text(), "B");
    assert_eq!(utt.hypothesis.segments[0].end_frame, 2);
}

#[test]
fn test_silence_between_words() {
    let toy = ab_toy();
    let utt = wide(&toy, &SearchConfig::default(), &A_SIL_B);
    let segs = &utt.hypothesis.segments;
    assert_eq!(utt.hypothesis.text(), "A B");
    assert_eq!(segs.len(), 3);
    assert!(segs[1].filler);
    assert_eq!(segs[1].word, toy.dict.silence_word());
    assert_eq!((segs[1].start_frame, segs[1].end_frame), (2, 3));
}

/// Test that segment scores telescope to the final path score
#[test]
fn test_backtrace_consistency() {
    let toy = ab_toy();
    let utt = wide(&toy, &SearchConfig::default(), &A_SIL_B);
    assert_eq!(utt.hypothesis.frames, A_SIL_B.len());
    assert_backtrace_consistent(&utt);
}

#[test]
fn test_decoding_is_deterministic() {
    let toy = ab_toy();
    let settings = wide_settings();
    let mut engine = FrameEngine::new(resources(&toy, ab_lm(&toy)), &settings.beam, &settings.search).unwrap();
    let first = engine.decode(&mut toy.scorer(&A_SIL_B)).unwrap();
    let second = engine.decode(&mut toy.scorer(&A_SIL_B)).unwrap();
    assert_eq!(first.hypothesis, second.hypothesis);
    assert_eq!(first.stats, second.stats);
    assert_eq!(first.history.len(), second.history.len());

    let other = wide(&toy, &settings.search, &A_SIL_B);
    assert_eq!(first.hypothesis, other.hypothesis);
}

/// Test that a narrower beam never finds a better path than exhaustive search
#[test]
fn test_pruning_is_monotonic() {
    let toy = ab_toy();
    let search = SearchConfig::default();
    let exhaustive = wide(&toy, &search, &A_SIL_B);
    assert_eq!(exhaustive.stats.narrowed_frames, 0);

    let narrow = BeamConfig {
        max_active: 1,
        ..BeamConfig::default()
    };
    let pruned = decode_with(&toy, &narrow, &search, &A_SIL_B);
    assert!(pruned.hypothesis.score <= exhaustive.hypothesis.score);
    assert!(pruned.stats.narrowed_frames > 0);
}

#[test]
fn test_bigram_addressing_keeps_one_entry_per_word_and_frame() {
    let toy = ab_toy();
    let search = SearchConfig {
        history_addressing: HistoryAddressing::Bigram,
        ..SearchConfig::default()
    };
    let utt = wide(&toy, &search, &A_SIL_B);
    let mut seen: HashMap<(WordId, FrameIdx), usize> = HashMap::new();
    for (_, e) in utt.history.iter() {
        *seen.entry((e.word, e.end_frame)).or_default() += 1;
    }
    assert!(seen.values().all(|&n| n == 1));
    assert_eq!(utt.hypothesis.text(), "A B");
}

#[test]
fn test_exact_policy_matches_composite_on_context_free_model() {
    let toy = ab_toy();
    let composite = wide(&toy, &SearchConfig::default(), &A_SIL_B);
    let exact = wide(
        &toy,
        &SearchConfig {
            cross_word_policy: CrossWordPolicy::Exact,
            ..SearchConfig::default()
        },
        &A_SIL_B,
    );
    assert_eq!(exact.hypothesis, composite.hypothesis);
    assert!(exact.stats.expanded_leaves > 0);
    assert_eq!(composite.stats.expanded_leaves, 0);

    // Words that ended in expanded leaves carry per-right-context scores
    let a = toy.dict.id("A").unwrap();
    assert!(exact
        .history
        .iter()
        .filter(|(_, e)| e.word == a)
        .all(|(_, e)| e.right_context.is_some()));
}

/// Test that exact cross-word leaves score each right context with its own unit,
/// where composite leaves pay the merge weight
#[test]
fn test_exact_policy_on_context_dependent_model() {
    let toy = cd_toy();
    const CLOSE: Score = -5000;
    // `base` in every context scores CLOSE, the given context GOOD
    let frame = |base: &str, left: &str, right: &str| {
        let mut row = vec![BAD; toy.model.n_senones()];
        for l in ["SIL", "a", "b"] {
            for r in ["SIL", "a", "b"] {
                row[toy.triphone_senone(base, l, r, PhonePosition::Single)] = CLOSE;
            }
        }
        row[toy.triphone_senone(base, left, right, PhonePosition::Single)] = GOOD;
        row
    };
    // A after the sentence start and before B, then B before the sentence end
    let a = frame("a", "SIL", "b");
    let b = frame("b", "a", "SIL");
    let rows = vec![a.clone(), a, b.clone(), b];
    let decode = |policy: CrossWordPolicy| {
        let search = SearchConfig {
            cross_word_policy: policy,
            ..SearchConfig::default()
        };
        let mut engine = FrameEngine::new(resources(&toy, ab_lm(&toy)), &wide_settings().beam, &search).unwrap();
        engine.decode(&mut MatrixScorer::new(rows.clone())).unwrap()
    };

    let composite = decode(CrossWordPolicy::Composite);
    let exact = decode(CrossWordPolicy::Exact);
    for utt in [&composite, &exact] {
        assert_eq!(utt.hypothesis.text(), "A B");
        let bounds: Vec<_> = utt.hypothesis.segments.iter().map(|s| (s.start_frame, s.end_frame)).collect();
        assert_eq!(bounds, [(0, 1), (2, 3)]);
        assert_backtrace_consistent(utt);
    }
    assert!(exact.hypothesis.score > composite.hypothesis.score);
    assert!(exact.stats.expanded_leaves > 0);
    assert_eq!(composite.stats.expanded_leaves, 0);

    // A's exit scores differ per following phone; B entered through phone b
    let (b_phone, c_phone) = (toy.phones.id("b").unwrap(), toy.phones.id("c").unwrap());
    let chain = exact.history.backtrace(exact.final_entry.id);
    let a_entry = exact.history.get(chain[0]).unwrap();
    assert_eq!(a_entry.word, toy.dict.id("A").unwrap());
    assert_eq!(a_entry.score_into(b_phone), a_entry.path_score);
    assert!(a_entry.score_into(toy.phones.silence()) < a_entry.path_score);
    // No word starts with c, so no leaf was built for it
    assert_eq!(a_entry.score_into(c_phone), WORST_SCORE);

    let chain = composite.history.backtrace(composite.final_entry.id);
    let a_entry = composite.history.get(chain[0]).unwrap();
    assert!(a_entry.right_context.is_none());
    assert_eq!(a_entry.score_into(c_phone), a_entry.path_score);
}

#[test]
fn test_tree_copies_do_not_change_unigram_result() {
    let toy = ab_toy();
    let single = wide(&toy, &SearchConfig::default(), &A_SIL_B);
    for (copies, selection) in [(2, TreeSelection::RoundRobin), (3, TreeSelection::LeastRecentlyUsed)] {
        let search = SearchConfig {
            tree_copies: copies,
            tree_selection: selection,
            ..SearchConfig::default()
        };
        let mut engine = FrameEngine::new(resources(&toy, ab_lm(&toy)), &wide_settings().beam, &search).unwrap();
        assert_eq!(engine.trees().len(), copies);
        let utt = engine.decode(&mut toy.scorer(&A_SIL_B)).unwrap();
        assert_eq!(utt.hypothesis.score, single.hypothesis.score);
        assert_eq!(utt.hypothesis.text(), "A B");
    }
}

#[test]
fn test_reentry_policies() {
    let mut rr = ReentryPolicy::new(TreeSelection::RoundRobin, 2);
    assert_eq!([rr.select(-1), rr.select(0), rr.select(1), rr.select(2)], [1, 0, 1, 0]);

    let mut lru = ReentryPolicy::new(TreeSelection::LeastRecentlyUsed, 3);
    assert_eq!([lru.select(-1), lru.select(0), lru.select(1), lru.select(2)], [0, 1, 2, 0]);
    lru.reset();
    assert_eq!(lru.select(7), 0);
}

#[test]
fn test_engine_state_machine() {
    let toy = ab_toy();
    let settings = wide_settings();
    let mut engine = FrameEngine::new(resources(&toy, ab_lm(&toy)), &settings.beam, &settings.search).unwrap();
    let mut scorer = toy.scorer(&["p1", "p1"]);

    assert_eq!(engine.state(), EngineState::Idle);
    assert!(matches!(engine.process_frame(&mut scorer), Err(Error::InvalidState(_))));
    assert!(matches!(engine.utterance_end(), Err(Error::InvalidState(_))));

    engine.utterance_begin().unwrap();
    assert_eq!(engine.state(), EngineState::Active { frame: 0 });
    assert!(matches!(engine.utterance_begin(), Err(Error::InvalidState(_))));

    let report = engine.process_frame(&mut scorer).unwrap();
    assert_eq!(report.frame, 0);
    assert!(report.active_nodes > 0);
    assert!(report.word_exits > 0);
    engine.process_frame(&mut scorer).unwrap();
    assert_eq!(engine.state(), EngineState::Active { frame: 2 });

    let utt = engine.utterance_end().unwrap();
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(utt.hypothesis.text(), "A");
    assert!(engine.history().is_empty());
}

#[test]
fn test_scorer_failure_returns_engine_to_idle() {
    let toy = ab_toy();
    let settings = wide_settings();
    let mut engine = FrameEngine::new(resources(&toy, ab_lm(&toy)), &settings.beam, &settings.search).unwrap();
    // One frame only: the second request is out of range
    let mut scorer = toy.scorer(&["p1"]);
    engine.utterance_begin().unwrap();
    engine.process_frame(&mut scorer).unwrap();
    assert!(matches!(engine.process_frame(&mut scorer), Err(Error::Scorer(_))));
    assert_eq!(engine.state(), EngineState::Idle);

    // The engine decodes the next utterance normally
    let utt = engine.decode(&mut toy.scorer(&["p1", "p1", "p1"])).unwrap();
    assert_eq!(utt.hypothesis.text(), "A");
}

#[test]
fn test_empty_utterance_is_no_recognition() {
    let toy = ab_toy();
    let settings = wide_settings();
    let mut engine = FrameEngine::new(resources(&toy, ab_lm(&toy)), &settings.beam, &settings.search).unwrap();
    let err = engine.decode(&mut MatrixScorer::new(Vec::new())).err();
    assert!(matches!(err, Some(Error::NoRecognition)));
    assert_eq!(engine.state(), EngineState::Idle);
}
