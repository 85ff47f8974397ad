//! Context-dependent acoustic model tables
//!
//! The model is the external "context model" the search consumes: which senone
//! sequence a phone in a given context uses, and the HMM topology of each base phone.
//! Loading model files is not the job of this crate; tables are assembled in memory
//! through [`AcousticModelBuilder`].

use std::collections::HashMap;

use crate::logmath::{prob_to_score, Score, WORST_SCORE};
use crate::{Error, PhoneId, PhonePosition, PhoneSet, Result, SenoneId, SsId};

/// Left-to-right transition matrix of one base phone
///
/// Row `i` holds the transitions out of emitting state `i`; column `n_emit` is the
/// non-emitting exit state.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    n_emit: usize,
    tp: Vec<Score>,
}

impl TransitionMatrix {
    /// Build from explicit log scores, `rows[i][j]` for `j` in `0..=n_emit`
    pub fn from_scores(rows: Vec<Vec<Score>>) -> Result<Self> {
        let n_emit = rows.len();
        if n_emit == 0 {
            return Err(Error::ModelInconsistency(
                "transition matrix has no emitting states".to_string(),
            ));
        }
        let mut tp = Vec::with_capacity(n_emit * (n_emit + 1));
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n_emit + 1 {
                return Err(Error::ModelInconsistency(format!(
                    "transition row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    n_emit + 1
                )));
            }
            for (j, &s) in row.iter().enumerate() {
                if j < i && s > WORST_SCORE {
                    return Err(Error::ModelInconsistency(format!(
                        "backward transition {} -> {} in left-to-right topology",
                        i, j
                    )));
                }
            }
            tp.extend(row);
        }
        Ok(Self { n_emit, tp })
    }

    /// Standard Bakis topology: self loop, next state and (optionally) a skip
    pub fn bakis(n_emit: usize, self_loop: f64, skip: f64) -> Self {
        let mut tp = vec![WORST_SCORE; n_emit * (n_emit + 1)];
        for i in 0..n_emit {
            let row = i * (n_emit + 1);
            let can_skip = skip > 0.0 && i + 2 <= n_emit;
            let advance = 1.0 - self_loop - if can_skip { skip } else { 0.0 };
            tp[row + i] = prob_to_score(self_loop);
            tp[row + i + 1] = prob_to_score(advance);
            if can_skip {
                tp[row + i + 2] = prob_to_score(skip);
            }
        }
        Self { n_emit, tp }
    }

    /// Number of emitting states
    pub fn n_emit(&self) -> usize {
        self.n_emit
    }

    /// Transition score `from -> to` (`to == n_emit` is the exit)
    #[inline]
    pub fn tp(&self, from: usize, to: usize) -> Score {
        self.tp[from * (self.n_emit + 1) + to]
    }
}

/// Key of a context-dependent phone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriphoneKey {
    pub base: PhoneId,
    pub left: PhoneId,
    pub right: PhoneId,
    pub position: PhonePosition,
}

/// Immutable acoustic model tables
#[derive(Debug)]
pub struct AcousticModel {
    phones: PhoneSet,
    n_emit: usize,
    n_senones: usize,
    sequences: Vec<Vec<SenoneId>>,
    ci_units: Vec<SsId>,
    triphones: HashMap<TriphoneKey, SsId>,
    tmats: Vec<TransitionMatrix>,
}

impl AcousticModel {
    /// Phone inventory
    pub fn phones(&self) -> &PhoneSet {
        &self.phones
    }

    /// Emitting states per HMM
    pub fn n_emit_states(&self) -> usize {
        self.n_emit
    }

    /// Number of senones the acoustic scorer must provide
    pub fn n_senones(&self) -> usize {
        self.n_senones
    }

    /// Number of distinct senone sequences
    pub fn n_sequences(&self) -> usize {
        self.sequences.len()
    }

    /// Senones scored by each state of a sequence
    pub fn senone_sequence(&self, ssid: SsId) -> &[SenoneId] {
        &self.sequences[ssid.index()]
    }

    /// Context-independent unit of a base phone
    pub fn ci_unit(&self, phone: PhoneId) -> SsId {
        self.ci_units[phone.index()]
    }

    /// Transition matrix of a base phone
    pub fn tmat(&self, phone: PhoneId) -> &TransitionMatrix {
        &self.tmats[phone.index()]
    }

    /// Exact context-dependent lookup, no fallback
    pub fn lookup(&self, key: TriphoneKey) -> Option<SsId> {
        self.triphones.get(&key).copied()
    }

    /// Number of context-dependent entries
    pub fn n_triphones(&self) -> usize {
        self.triphones.len()
    }
}

/// Assembles an [`AcousticModel`], sharing senone sequences between contexts
pub struct AcousticModelBuilder {
    phones: PhoneSet,
    n_emit: usize,
    n_senones: usize,
    sequences: Vec<Vec<SenoneId>>,
    sequence_index: HashMap<Vec<SenoneId>, SsId>,
    ci_units: Vec<Option<SsId>>,
    triphones: HashMap<TriphoneKey, SsId>,
    tmats: Vec<Option<TransitionMatrix>>,
}

impl AcousticModelBuilder {
    /// Start a model with `n_emit` emitting states per HMM and `n_senones` senones
    pub fn new(phones: PhoneSet, n_emit: usize, n_senones: usize) -> Self {
        let n = phones.len();
        Self {
            phones,
            n_emit,
            n_senones,
            sequences: Vec::new(),
            sequence_index: HashMap::new(),
            ci_units: vec![None; n],
            triphones: HashMap::new(),
            tmats: vec![None; n],
        }
    }

    fn phone(&self, name: &str) -> Result<PhoneId> {
        self.phones
            .id(name)
            .ok_or_else(|| Error::ModelInconsistency(format!("unknown phone '{}'", name)))
    }

    fn intern(&mut self, senones: &[u32]) -> Result<SsId> {
        if senones.len() != self.n_emit {
            return Err(Error::ModelInconsistency(format!(
                "senone sequence has {} states, model uses {}",
                senones.len(),
                self.n_emit
            )));
        }
        if let Some(&bad) = senones.iter().find(|&&s| s as usize >= self.n_senones) {
            return Err(Error::ModelInconsistency(format!(
                "senone {} out of range ({} senones)",
                bad, self.n_senones
            )));
        }
        let seq: Vec<SenoneId> = senones.iter().map(|&s| SenoneId(s)).collect();
        if let Some(&id) = self.sequence_index.get(&seq) {
            return Ok(id);
        }
        let id = SsId(self.sequences.len() as u32);
        self.sequences.push(seq.clone());
        self.sequence_index.insert(seq, id);
        Ok(id)
    }

    /// Define the context-independent unit and topology of a base phone
    pub fn ci_phone(mut self, name: &str, senones: &[u32], tmat: TransitionMatrix) -> Result<Self> {
        let phone = self.phone(name)?;
        if tmat.n_emit() != self.n_emit {
            return Err(Error::ModelInconsistency(format!(
                "transition matrix of '{}' has {} states, model uses {}",
                name,
                tmat.n_emit(),
                self.n_emit
            )));
        }
        let ssid = self.intern(senones)?;
        self.ci_units[phone.index()] = Some(ssid);
        self.tmats[phone.index()] = Some(tmat);
        Ok(self)
    }

    /// Define a context-dependent phone
    pub fn triphone(
        mut self,
        base: &str,
        left: &str,
        right: &str,
        position: PhonePosition,
        senones: &[u32],
    ) -> Result<Self> {
        let key = TriphoneKey {
            base: self.phone(base)?,
            left: self.phone(left)?,
            right: self.phone(right)?,
            position,
        };
        let ssid = self.intern(senones)?;
        self.triphones.insert(key, ssid);
        Ok(self)
    }

    /// Validate and freeze the model
    pub fn build(self) -> Result<AcousticModel> {
        let mut ci_units = Vec::with_capacity(self.ci_units.len());
        let mut tmats = Vec::with_capacity(self.tmats.len());
        for (i, (unit, tmat)) in self.ci_units.into_iter().zip(self.tmats).enumerate() {
            match (unit, tmat) {
                (Some(u), Some(t)) => {
                    ci_units.push(u);
                    tmats.push(t);
                }
                _ => {
                    return Err(Error::ModelInconsistency(format!(
                        "phone '{}' has no context-independent unit",
                        self.phones.name(PhoneId(i as u16))
                    )))
                }
            }
        }
        tracing::debug!(
            phones = self.phones.len(),
            sequences = self.sequences.len(),
            triphones = self.triphones.len(),
            "Acoustic model assembled"
        );
        Ok(AcousticModel {
            phones: self.phones,
            n_emit: self.n_emit,
            n_senones: self.n_senones,
            sequences: self.sequences,
            ci_units,
            triphones: self.triphones,
            tmats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phones() -> PhoneSet {
        PhoneSet::new(&["SIL", "k", "ae"], "SIL").unwrap()
    }

    #[test]
    fn test_bakis_topology() {
        let t = TransitionMatrix::bakis(3, 0.6, 0.1);
        assert!(t.tp(0, 0) > WORST_SCORE);
        assert!(t.tp(0, 2) > WORST_SCORE);
        assert_eq!(t.tp(0, 3), WORST_SCORE);
        assert!(t.tp(2, 3) > WORST_SCORE);
        assert_eq!(t.tp(1, 0), WORST_SCORE);
    }

    #[test]
    fn test_backward_transition_rejected() {
        let rows = vec![vec![0, 0], vec![0, 0]];
        assert!(TransitionMatrix::from_scores(vec![vec![0, -1, WORST_SCORE], vec![-1, 0, -1]]).is_err());
        assert!(TransitionMatrix::from_scores(rows).is_err());
    }

    #[test]
    fn test_contexts_share_sequences() {
        let tmat = TransitionMatrix::bakis(1, 0.5, 0.0);
        let model = AcousticModelBuilder::new(phones(), 1, 4)
            .ci_phone("SIL", &[0], tmat.clone())
            .unwrap()
            .ci_phone("k", &[1], tmat.clone())
            .unwrap()
            .ci_phone("ae", &[2], tmat)
            .unwrap()
            .triphone("k", "SIL", "ae", PhonePosition::Begin, &[3])
            .unwrap()
            .triphone("k", "ae", "ae", PhonePosition::Begin, &[3])
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(model.n_sequences(), 4);
        let k = model.phones().id("k").unwrap();
        let sil = model.phones().silence();
        let ae = model.phones().id("ae").unwrap();
        let a = model.lookup(TriphoneKey { base: k, left: sil, right: ae, position: PhonePosition::Begin });
        let b = model.lookup(TriphoneKey { base: k, left: ae, right: ae, position: PhonePosition::Begin });
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_ci_unit_rejected() {
        let tmat = TransitionMatrix::bakis(1, 0.5, 0.0);
        let result = AcousticModelBuilder::new(phones(), 1, 4)
            .ci_phone("SIL", &[0], tmat)
            .unwrap()
            .build();
        assert!(result.is_err());
    }
}
