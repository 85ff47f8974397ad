//! Context-independent phone inventory

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Error, PhoneId, Result};

/// Position of a phone inside a word pronunciation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhonePosition {
    /// First phone of a multi-phone word
    Begin,
    /// Neither first nor last
    Internal,
    /// Last phone of a multi-phone word
    End,
    /// The only phone of a single-phone word
    Single,
}

impl PhonePosition {
    /// Position of phone `index` in a pronunciation of `len` phones
    pub fn of(index: usize, len: usize) -> Self {
        match (index, len) {
            (_, 1) => PhonePosition::Single,
            (0, _) => PhonePosition::Begin,
            (i, n) if i + 1 == n => PhonePosition::End,
            _ => PhonePosition::Internal,
        }
    }
}

/// Immutable set of context-independent phones
#[derive(Debug, Clone)]
pub struct PhoneSet {
    names: Vec<String>,
    index: HashMap<String, PhoneId>,
    silence: PhoneId,
}

impl PhoneSet {
    /// Create a phone set; `silence` must be one of `names`
    pub fn new<S: AsRef<str>>(names: &[S], silence: &str) -> Result<Self> {
        let mut index = HashMap::with_capacity(names.len());
        let mut owned = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let name = name.as_ref().to_string();
            if index.insert(name.clone(), PhoneId(i as u16)).is_some() {
                return Err(Error::ModelInconsistency(format!(
                    "duplicate phone name '{}'",
                    name
                )));
            }
            owned.push(name);
        }
        let silence = *index.get(silence).ok_or_else(|| {
            Error::ModelInconsistency(format!("silence phone '{}' not in phone set", silence))
        })?;

        Ok(Self {
            names: owned,
            index,
            silence,
        })
    }

    /// Number of phones
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when the set has no phones
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Look a phone up by name
    pub fn id(&self, name: &str) -> Option<PhoneId> {
        self.index.get(name).copied()
    }

    /// Phone name
    pub fn name(&self, phone: PhoneId) -> &str {
        &self.names[phone.index()]
    }

    /// Silence phone
    pub fn silence(&self) -> PhoneId {
        self.silence
    }

    /// True when `phone` is a valid id of this set
    pub fn contains(&self, phone: PhoneId) -> bool {
        phone.index() < self.names.len()
    }

    /// Iterate all phone ids
    pub fn ids(&self) -> impl Iterator<Item = PhoneId> + '_ {
        (0..self.names.len()).map(|i| PhoneId(i as u16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_positions() {
        assert_eq!(PhonePosition::of(0, 1), PhonePosition::Single);
        assert_eq!(PhonePosition::of(0, 3), PhonePosition::Begin);
        assert_eq!(PhonePosition::of(1, 3), PhonePosition::Internal);
        assert_eq!(PhonePosition::of(2, 3), PhonePosition::End);
    }

    #[test]
    fn test_phone_set_rejects_duplicates() {
        assert!(PhoneSet::new(&["SIL", "k", "k"], "SIL").is_err());
        assert!(PhoneSet::new(&["k", "ae"], "SIL").is_err());

        let phones = PhoneSet::new(&["SIL", "k", "ae"], "SIL").unwrap();
        assert_eq!(phones.len(), 3);
        assert_eq!(phones.id("ae"), Some(PhoneId(2)));
        assert_eq!(phones.silence(), PhoneId(0));
    }
}
