//! Cross-word context units
//!
//! Word-internal phones know both neighbours, so they map to ordinary
//! context-dependent units. Word boundaries do not: the left context of a first phone
//! depends on the previous word and the right context of a last phone on the next.
//! The table covers every unresolved context with a *composite* unit, the set of
//! senone sequences the phone could use, scored as the per-state maximum over its
//! members plus a `log(1/N)` weight. Composites are deduplicated by content, so the
//! table grows with the number of distinct member sets rather than with vocabulary
//! size squared.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use lexdecode_core::logmath::{prob_to_score, Score, WORST_SCORE};
use lexdecode_core::{
    AcousticModel, Dictionary, Error, PhoneId, PhonePosition, Result, SenoneId, SenoneMask,
    SsId, TriphoneKey,
};

/// Composite unit id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeId(pub u32);

/// Composite senone id (a deduplicated set of ordinary senones)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompositeSenoneId(pub u32);

/// Acoustic unit scored by a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitRef {
    Ordinary(SsId),
    Composite(CompositeId),
}

/// Merged unit standing in for several unresolved contexts
#[derive(Debug, Clone)]
pub struct CompositeUnit {
    base: PhoneId,
    members: Vec<SsId>,
    states: Vec<CompositeSenoneId>,
    weight: Score,
}

impl CompositeUnit {
    /// Base phone (selects the transition matrix)
    pub fn base(&self) -> PhoneId {
        self.base
    }

    /// Member senone sequences, sorted
    pub fn members(&self) -> &[SsId] {
        &self.members
    }

    /// Composite senone of each state
    pub fn states(&self) -> &[CompositeSenoneId] {
        &self.states
    }

    /// `log(1 / members)`, never positive
    pub fn weight(&self) -> Score {
        self.weight
    }

    /// Score of one state given composite senone scores
    #[inline]
    pub fn state_score(&self, state: usize, composite_scores: &[Score]) -> Score {
        let s = composite_scores[self.states[state].0 as usize];
        if s <= WORST_SCORE {
            WORST_SCORE
        } else {
            s + self.weight
        }
    }
}

/// Right-context phones sharing one word-final unit
#[derive(Debug, Clone, PartialEq)]
pub struct RightContextClass {
    pub unit: UnitRef,
    pub phones: Vec<PhoneId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FinalKey {
    base: PhoneId,
    left: Option<PhoneId>,
    single: bool,
}

/// Cross-word context unit tables
pub struct ContextUnitTable {
    model: Arc<AcousticModel>,
    left_contexts: Vec<PhoneId>,
    right_contexts: Vec<PhoneId>,
    composites: Vec<CompositeUnit>,
    composite_index: HashMap<(PhoneId, Vec<SsId>), CompositeId>,
    composite_senones: Vec<Vec<SenoneId>>,
    composite_senone_index: HashMap<Vec<SenoneId>, CompositeSenoneId>,
    word_internal: Vec<Vec<SsId>>,
    initial_composite: HashMap<(PhoneId, PhoneId), UnitRef>,
    initial_exact: HashMap<(PhoneId, PhoneId, PhoneId), SsId>,
    final_composite: HashMap<FinalKey, UnitRef>,
    final_fanout: HashMap<FinalKey, Vec<RightContextClass>>,
    fallbacks: usize,
}

impl ContextUnitTable {
    /// Build the tables for every word of `dict`
    pub fn build(dict: &Dictionary, model: Arc<AcousticModel>) -> Result<Self> {
        let phones = model.phones();
        let silence = phones.silence();

        let mut left: BTreeSet<PhoneId> = BTreeSet::new();
        let mut right: BTreeSet<PhoneId> = BTreeSet::new();
        left.insert(silence);
        right.insert(silence);
        for w in dict.ids() {
            let pron = dict.phones(w);
            if pron.is_empty() {
                return Err(Error::ModelInconsistency(format!(
                    "word '{}' has an empty pronunciation",
                    dict.name(w)
                )));
            }
            if let Some(&bad) = pron.iter().find(|p| !phones.contains(**p)) {
                return Err(Error::ModelInconsistency(format!(
                    "word '{}' uses phone {} outside the acoustic model",
                    dict.name(w),
                    bad
                )));
            }
            left.insert(pron[pron.len() - 1]);
            right.insert(pron[0]);
        }

        let mut table = Self {
            model: model.clone(),
            left_contexts: left.into_iter().collect(),
            right_contexts: right.into_iter().collect(),
            composites: Vec::new(),
            composite_index: HashMap::new(),
            composite_senones: Vec::new(),
            composite_senone_index: HashMap::new(),
            word_internal: Vec::with_capacity(dict.len()),
            initial_composite: HashMap::new(),
            initial_exact: HashMap::new(),
            final_composite: HashMap::new(),
            final_fanout: HashMap::new(),
            fallbacks: 0,
        };

        for w in dict.ids() {
            let pron = dict.phones(w).to_vec();
            let n = pron.len();

            let mut internal = Vec::with_capacity(n.saturating_sub(2));
            for i in 1..n.saturating_sub(1) {
                internal.push(table.resolve(pron[i], pron[i - 1], pron[i + 1], PhonePosition::Internal));
            }
            table.word_internal.push(internal);

            if n == 1 {
                let base = pron[0];
                table.build_final(FinalKey { base, left: None, single: true });
                for l in table.left_contexts.clone() {
                    table.build_final(FinalKey { base, left: Some(l), single: true });
                }
            } else {
                table.build_initial(pron[0], pron[1]);
                table.build_final(FinalKey {
                    base: pron[n - 1],
                    left: Some(pron[n - 2]),
                    single: false,
                });
            }
        }

        tracing::info!(
            words = dict.len(),
            left_contexts = table.left_contexts.len(),
            right_contexts = table.right_contexts.len(),
            composites = table.composites.len(),
            composite_senones = table.composite_senones.len(),
            fallbacks = table.fallbacks,
            "Context unit table built"
        );

        Ok(table)
    }

    /// Exact lookup with fallback to the internal-position unit, then to the base phone
    fn resolve(&mut self, base: PhoneId, left: PhoneId, right: PhoneId, position: PhonePosition) -> SsId {
        let key = TriphoneKey { base, left, right, position };
        if let Some(ssid) = self.model.lookup(key) {
            return ssid;
        }
        if position != PhonePosition::Internal {
            if let Some(ssid) = self.model.lookup(TriphoneKey {
                position: PhonePosition::Internal,
                ..key
            }) {
                return ssid;
            }
        }
        self.fallbacks += 1;
        self.model.ci_unit(base)
    }

    fn build_initial(&mut self, base: PhoneId, right: PhoneId) {
        if self.initial_composite.contains_key(&(base, right)) {
            return;
        }
        let mut members = Vec::with_capacity(self.left_contexts.len());
        for l in self.left_contexts.clone() {
            let ssid = self.resolve(base, l, right, PhonePosition::Begin);
            self.initial_exact.insert((base, l, right), ssid);
            members.push(ssid);
        }
        let unit = self.intern_composite(base, members);
        self.initial_composite.insert((base, right), unit);
    }

    fn build_final(&mut self, key: FinalKey) {
        if self.final_composite.contains_key(&key) {
            return;
        }
        let position = if key.single {
            PhonePosition::Single
        } else {
            PhonePosition::End
        };
        let lefts = match key.left {
            Some(l) => vec![l],
            None => self.left_contexts.clone(),
        };

        let mut all_members = Vec::new();
        let mut classes: Vec<RightContextClass> = Vec::new();
        for r in self.right_contexts.clone() {
            let per_right: Vec<SsId> = lefts
                .iter()
                .map(|&l| self.resolve(key.base, l, r, position))
                .collect();
            all_members.extend_from_slice(&per_right);
            let unit = self.intern_composite(key.base, per_right);
            match classes.iter_mut().find(|c| c.unit == unit) {
                Some(class) => class.phones.push(r),
                None => classes.push(RightContextClass {
                    unit,
                    phones: vec![r],
                }),
            }
        }

        let unit = self.intern_composite(key.base, all_members);
        self.final_composite.insert(key, unit);
        self.final_fanout.insert(key, classes);
    }

    /// Deduplicate a member set into a unit. A single distinct member is just the
    /// ordinary unit.
    fn intern_composite(&mut self, base: PhoneId, mut members: Vec<SsId>) -> UnitRef {
        members.sort();
        members.dedup();
        if members.len() == 1 {
            return UnitRef::Ordinary(members[0]);
        }
        let key = (base, members);
        if let Some(&id) = self.composite_index.get(&key) {
            return UnitRef::Composite(id);
        }
        let members = key.1.clone();

        let n_emit = self.model.n_emit_states();
        let mut states = Vec::with_capacity(n_emit);
        for s in 0..n_emit {
            let mut senones: Vec<SenoneId> = members
                .iter()
                .map(|&m| self.model.senone_sequence(m)[s])
                .collect();
            senones.sort();
            senones.dedup();
            let id = match self.composite_senone_index.get(&senones) {
                Some(&id) => id,
                None => {
                    let id = CompositeSenoneId(self.composite_senones.len() as u32);
                    self.composite_senones.push(senones.clone());
                    self.composite_senone_index.insert(senones, id);
                    id
                }
            };
            states.push(id);
        }

        let weight = prob_to_score(1.0 / members.len() as f64).min(0);
        let id = CompositeId(self.composites.len() as u32);
        self.composites.push(CompositeUnit {
            base,
            members,
            states,
            weight,
        });
        self.composite_index.insert(key, id);
        UnitRef::Composite(id)
    }

    /// Acoustic model the table was built from
    pub fn model(&self) -> &Arc<AcousticModel> {
        &self.model
    }

    /// Phones that can precede a word (word-final phones plus silence)
    pub fn left_contexts(&self) -> &[PhoneId] {
        &self.left_contexts
    }

    /// Phones that can follow a word (word-initial phones plus silence)
    pub fn right_contexts(&self) -> &[PhoneId] {
        &self.right_contexts
    }

    /// All composite units
    pub fn composites(&self) -> &[CompositeUnit] {
        &self.composites
    }

    /// One composite unit
    pub fn composite(&self, id: CompositeId) -> &CompositeUnit {
        &self.composites[id.0 as usize]
    }

    /// Number of composite senones
    pub fn n_composite_senones(&self) -> usize {
        self.composite_senones.len()
    }

    /// Member senones of a composite senone
    pub fn composite_senone(&self, id: CompositeSenoneId) -> &[SenoneId] {
        &self.composite_senones[id.0 as usize]
    }

    /// Number of times the base unit stood in for a missing context-dependent unit
    pub fn fallbacks(&self) -> usize {
        self.fallbacks
    }

    /// Units of the internal positions `1..n-1` of a word
    pub fn internal_units(&self, word: lexdecode_core::WordId) -> &[SsId] {
        &self.word_internal[word.index()]
    }

    /// First-phone unit when the left context is unknown
    pub fn initial_composite(&self, base: PhoneId, right: PhoneId) -> Option<UnitRef> {
        self.initial_composite.get(&(base, right)).copied()
    }

    /// First-phone unit for a known left context
    pub fn initial_exact(&self, base: PhoneId, left: PhoneId, right: PhoneId) -> Option<SsId> {
        self.initial_exact.get(&(base, left, right)).copied()
    }

    /// Last-phone composite over all right contexts. `left == None` (single-phone
    /// words only) also covers every left context.
    pub fn final_composite(&self, base: PhoneId, left: Option<PhoneId>, single: bool) -> Option<UnitRef> {
        self.final_composite
            .get(&FinalKey { base, left, single })
            .copied()
    }

    /// Last-phone units per right-context class
    pub fn final_fanout(&self, base: PhoneId, left: Option<PhoneId>, single: bool) -> Option<&[RightContextClass]> {
        self.final_fanout
            .get(&FinalKey { base, left, single })
            .map(|v| v.as_slice())
    }

    /// Number of HMM states of a unit
    pub fn n_emit_states(&self) -> usize {
        self.model.n_emit_states()
    }

    /// Score of `state` of `unit` for the current frame
    #[inline]
    pub fn state_score(
        &self,
        unit: UnitRef,
        state: usize,
        senone_scores: &[Score],
        composite_scores: &[Score],
    ) -> Score {
        match unit {
            UnitRef::Ordinary(ssid) => senone_scores[self.model.senone_sequence(ssid)[state].index()],
            UnitRef::Composite(cid) => self.composite(cid).state_score(state, composite_scores),
        }
    }

    /// Flag the senones (ordinary) or composite senones a unit needs this frame
    pub fn mark_unit(&self, unit: UnitRef, senones: &mut SenoneMask, composite_active: &mut [bool]) {
        match unit {
            UnitRef::Ordinary(ssid) => {
                for &s in self.model.senone_sequence(ssid) {
                    senones.set(s);
                }
            }
            UnitRef::Composite(cid) => {
                for s in &self.composite(cid).states {
                    composite_active[s.0 as usize] = true;
                }
            }
        }
    }

    /// Expand active composite senones into the ordinary senones that must be scored
    pub fn mark_active_senones(&self, composite_active: &[bool], senones: &mut SenoneMask) {
        for (i, _) in composite_active.iter().enumerate().filter(|(_, &a)| a) {
            for &s in &self.composite_senones[i] {
                senones.set(s);
            }
        }
    }

    /// Composite senone scores: the maximum over member senones. Inactive composite
    /// senones (when `active` is given) are set to [`WORST_SCORE`].
    pub fn composite_scores(&self, senone_scores: &[Score], active: Option<&[bool]>, out: &mut Vec<Score>) {
        out.clear();
        out.resize(self.composite_senones.len(), WORST_SCORE);
        for (i, members) in self.composite_senones.iter().enumerate() {
            if active.map_or(true, |a| a[i]) {
                out[i] = members
                    .iter()
                    .map(|s| senone_scores[s.index()])
                    .max()
                    .unwrap_or(WORST_SCORE);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lexdecode_core::{AcousticModelBuilder, PhoneSet, TransitionMatrix};

    /// Phones SIL a b, one emitting state, a distinct senone for every triphone of
    /// `a` and `b` so that every context is acoustically different.
    pub(crate) fn contextual_model() -> (Arc<AcousticModel>, PhoneSet) {
        let phones = PhoneSet::new(&["SIL", "a", "b"], "SIL").unwrap();
        let tmat = TransitionMatrix::bakis(1, 0.5, 0.0);
        let names = ["SIL", "a", "b"];
        let mut builder = AcousticModelBuilder::new(phones.clone(), 1, 64)
            .ci_phone("SIL", &[0], tmat.clone())
            .unwrap()
            .ci_phone("a", &[1], tmat.clone())
            .unwrap()
            .ci_phone("b", &[2], tmat)
            .unwrap();
        let mut next = 3;
        for base in ["a", "b"] {
            for l in names {
                for r in names {
                    for pos in [PhonePosition::Begin, PhonePosition::End, PhonePosition::Single] {
                        builder = builder.triphone(base, l, r, pos, &[next]).unwrap();
                        next += 1;
                    }
                }
            }
        }
        (Arc::new(builder.build().unwrap()), phones)
    }

    #[test]
    fn test_single_phone_word_composites() {
        let (model, phones) = contextual_model();
        let mut dict = Dictionary::new(&phones);
        dict.add_word("A", &["a"], &phones).unwrap();
        dict.add_word("AB", &["a", "b"], &phones).unwrap();
        let table = ContextUnitTable::build(&dict, model).unwrap();

        let a = phones.id("a").unwrap();
        let full = table.final_composite(a, None, true).unwrap();
        assert!(matches!(full, UnitRef::Composite(_)));

        for &l in table.left_contexts() {
            let left_specific = table.final_composite(a, Some(l), true).unwrap();
            let UnitRef::Composite(cid) = left_specific else {
                panic!("expected a composite for left context {}", l);
            };
            assert_ne!(left_specific, full);
            assert_eq!(table.composite(cid).members().len(), table.right_contexts().len());
        }
    }

    #[test]
    fn test_composite_soundness() {
        let (model, phones) = contextual_model();
        let mut dict = Dictionary::new(&phones);
        dict.add_word("A", &["a"], &phones).unwrap();
        dict.add_word("BAB", &["b", "a", "b"], &phones).unwrap();
        let table = ContextUnitTable::build(&dict, model.clone()).unwrap();
        assert!(!table.composites().is_empty());

        let scores: Vec<Score> = (0..model.n_senones() as i32).map(|i| -(i * 37 % 101)).collect();
        let mut com = Vec::new();
        table.composite_scores(&scores, None, &mut com);

        for unit in table.composites() {
            assert!(unit.weight() <= 0);
            for state in 0..model.n_emit_states() {
                let best = unit
                    .members()
                    .iter()
                    .map(|&m| scores[model.senone_sequence(m)[state].index()])
                    .max()
                    .unwrap();
                assert_eq!(unit.state_score(state, &com), best + unit.weight());
            }
        }
    }

    #[test]
    fn test_composites_are_deduplicated() {
        let (model, phones) = contextual_model();
        let mut dict = Dictionary::new(&phones);
        dict.add_word("AB", &["a", "b"], &phones).unwrap();
        dict.add_word("ABA", &["a", "b", "a"], &phones).unwrap();
        dict.add_word("AAB", &["a", "a", "b"], &phones).unwrap();
        let table = ContextUnitTable::build(&dict, model).unwrap();

        let a = phones.id("a").unwrap();
        let b = phones.id("b").unwrap();
        // AB and ABA start with the same (base, right) pair
        let first = table.initial_composite(a, b).unwrap();
        assert!(matches!(first, UnitRef::Composite(_)));
        let distinct: BTreeSet<_> = table
            .composites()
            .iter()
            .map(|c| (c.base(), c.members().to_vec()))
            .collect();
        assert_eq!(distinct.len(), table.composites().len());
    }

    #[test]
    fn test_active_senone_expansion() {
        let (model, phones) = contextual_model();
        let mut dict = Dictionary::new(&phones);
        dict.add_word("A", &["a"], &phones).unwrap();
        let table = ContextUnitTable::build(&dict, model.clone()).unwrap();

        let a = phones.id("a").unwrap();
        let UnitRef::Composite(cid) = table.final_composite(a, None, true).unwrap() else {
            panic!("expected composite");
        };
        let mut senones = SenoneMask::new(model.n_senones());
        let mut active = vec![false; table.n_composite_senones()];
        table.mark_unit(UnitRef::Composite(cid), &mut senones, &mut active);
        assert_eq!(senones.count(), 0);
        table.mark_active_senones(&active, &mut senones);
        let expected = table.composite_senone(table.composite(cid).states()[0]).len();
        assert_eq!(senones.count(), expected);
    }

    #[test]
    fn test_empty_pronunciation_is_inconsistent() {
        let (model, phones) = contextual_model();
        let mut dict = Dictionary::new(&phones);
        dict.add_word("EMPTY", &[], &phones).unwrap();
        let err = ContextUnitTable::build(&dict, model).err().unwrap();
        assert!(matches!(err, Error::ModelInconsistency(_)));
    }

    #[test]
    fn test_missing_context_falls_back_to_base() {
        let phones = PhoneSet::new(&["SIL", "a"], "SIL").unwrap();
        let tmat = TransitionMatrix::bakis(1, 0.5, 0.0);
        let model = AcousticModelBuilder::new(phones.clone(), 1, 2)
            .ci_phone("SIL", &[0], tmat.clone())
            .unwrap()
            .ci_phone("a", &[1], tmat)
            .unwrap()
            .build()
            .unwrap();
        let mut dict = Dictionary::new(&phones);
        dict.add_word("AAA", &["a", "a", "a"], &phones).unwrap();
        let model = Arc::new(model);
        let table = ContextUnitTable::build(&dict, model.clone()).unwrap();
        let a = phones.id("a").unwrap();
        let w = dict.id("AAA").unwrap();
        assert_eq!(table.internal_units(w), &[model.ci_unit(a)]);
        assert!(table.fallbacks() > 0);
        assert!(table.composites().is_empty());
    }
}
