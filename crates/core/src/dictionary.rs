//! Pronunciation dictionary
//!
//! Words are stored one entry per pronunciation. Alternate pronunciations use the
//! `WORD(2)` naming convention and point back at their base word, which is what
//! appears in hypotheses and lattices.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Error, PhoneId, PhoneSet, Result, WordId};

/// Sentence start marker
pub const START_WORD: &str = "<s>";
/// Sentence end marker
pub const END_WORD: &str = "</s>";
/// Silence filler word
pub const SILENCE_WORD: &str = "<sil>";

/// One dictionary entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictWord {
    /// Spelling, including any `(n)` alternate suffix
    pub name: String,
    /// Pronunciation
    pub phones: Vec<PhoneId>,
    /// Filler words (silence, noises) are transparent to the language model
    pub filler: bool,
    /// Base pronunciation of this word
    pub base: WordId,
}

/// Pronunciation dictionary
#[derive(Debug, Clone)]
pub struct Dictionary {
    words: Vec<DictWord>,
    index: HashMap<String, WordId>,
    start: WordId,
    end: WordId,
    silence: WordId,
}

impl Dictionary {
    /// Create a dictionary holding the sentence markers and the silence filler, all
    /// pronounced with the silence phone.
    pub fn new(phones: &PhoneSet) -> Self {
        let mut dict = Self {
            words: Vec::new(),
            index: HashMap::new(),
            start: WordId(0),
            end: WordId(0),
            silence: WordId(0),
        };
        let sil = [phones.silence()];
        dict.start = dict.push(START_WORD, &sil, true);
        dict.end = dict.push(END_WORD, &sil, true);
        dict.silence = dict.push(SILENCE_WORD, &sil, true);
        dict
    }

    fn push(&mut self, name: &str, phones: &[PhoneId], filler: bool) -> WordId {
        let id = WordId(self.words.len() as u32);
        let base = base_name(name)
            .and_then(|b| self.index.get(b).copied())
            .unwrap_or(id);
        self.words.push(DictWord {
            name: name.to_string(),
            phones: phones.to_vec(),
            filler,
            base,
        });
        self.index.insert(name.to_string(), id);
        id
    }

    /// Add a word given phone names. Pronunciation length is validated when the
    /// context tables are built, not here.
    pub fn add_word(&mut self, name: &str, pronunciation: &[&str], phones: &PhoneSet) -> Result<WordId> {
        self.add(name, pronunciation, phones, false)
    }

    /// Add a filler word (noise, breath, ...)
    pub fn add_filler(&mut self, name: &str, pronunciation: &[&str], phones: &PhoneSet) -> Result<WordId> {
        self.add(name, pronunciation, phones, true)
    }

    fn add(&mut self, name: &str, pronunciation: &[&str], phones: &PhoneSet, filler: bool) -> Result<WordId> {
        if self.index.contains_key(name) {
            return Err(Error::ModelInconsistency(format!(
                "duplicate dictionary word '{}'",
                name
            )));
        }
        let ids = pronunciation
            .iter()
            .map(|p| {
                phones.id(p).ok_or_else(|| {
                    Error::ModelInconsistency(format!("word '{}' uses unknown phone '{}'", name, p))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.push(name, &ids, filler))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// True when only the built-in markers are present
    pub fn is_empty(&self) -> bool {
        self.words.len() <= 3
    }

    /// Entry for a word
    pub fn word(&self, id: WordId) -> &DictWord {
        &self.words[id.index()]
    }

    /// Look a word up by spelling
    pub fn id(&self, name: &str) -> Option<WordId> {
        self.index.get(name).copied()
    }

    /// Spelling of a word
    pub fn name(&self, id: WordId) -> &str {
        &self.words[id.index()].name
    }

    /// Spelling of the base pronunciation
    pub fn base_name(&self, id: WordId) -> &str {
        self.name(self.words[id.index()].base)
    }

    /// Pronunciation of a word
    pub fn phones(&self, id: WordId) -> &[PhoneId] {
        &self.words[id.index()].phones
    }

    /// Filler test
    pub fn is_filler(&self, id: WordId) -> bool {
        self.words[id.index()].filler
    }

    /// Sentence start word
    pub fn start_word(&self) -> WordId {
        self.start
    }

    /// Sentence end word
    pub fn end_word(&self) -> WordId {
        self.end
    }

    /// Silence filler word
    pub fn silence_word(&self) -> WordId {
        self.silence
    }

    /// True for the sentence markers, which never appear inside the search trees
    pub fn is_marker(&self, id: WordId) -> bool {
        id == self.start || id == self.end
    }

    /// Iterate all word ids
    pub fn ids(&self) -> impl Iterator<Item = WordId> + '_ {
        (0..self.words.len()).map(|i| WordId(i as u32))
    }
}

/// `WORD(2)` -> `WORD`
fn base_name(name: &str) -> Option<&str> {
    let open = name.rfind('(')?;
    if open > 0 && name.ends_with(')') {
        Some(&name[..open])
    } else {
        None
    }
}
