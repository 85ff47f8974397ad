//! Prefix-shared lexical tree
//!
//! Nodes live in an arena addressed by [`NodeId`]. A tree holds one root group per
//! left-context phone; groups share root nodes (and with them whole subtrees) where
//! the first-phone unit coincides, tracked by reference counts so that releasing a
//! group frees only nodes no other group still owns. Word-final leaves are never
//! shared.

mod search;

pub use search::Evaluation;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lexdecode_config::CrossWordPolicy;
use lexdecode_core::logmath::{Score, WORST_SCORE};
use lexdecode_core::{Dictionary, Error, PhoneId, Result, WordId};

use crate::context::{ContextUnitTable, UnitRef};
use crate::hmm::Hmm;
use crate::history::TreeKind;

/// Arena index of a tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Role of a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Has children, no word
    Internal,
    /// Word-final node scored with a precomputed (composite) unit
    Leaf,
    /// Word-final node whose right-context fan-out has not been built yet
    Lazy { left: Option<PhoneId>, single: bool },
    /// Fan-out built this utterance; entries go straight to the children
    Expanded {
        left: Option<PhoneId>,
        single: bool,
        children: Vec<NodeId>,
    },
    /// One right-context class of an expanded leaf
    ContextLeaf { phones: Vec<PhoneId> },
    /// Free arena slot
    Released,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) unit: UnitRef,
    pub(crate) base: PhoneId,
    pub(crate) hmm: Hmm,
    /// Best unigram score of any word at or below this node
    pub(crate) prob: Score,
    pub(crate) children: Vec<NodeId>,
    pub(crate) word: Option<WordId>,
    pub(crate) kind: NodeKind,
    pub(crate) refs: u32,
}

impl Node {
    pub fn unit(&self) -> UnitRef {
        self.unit
    }

    pub fn base(&self) -> PhoneId {
        self.base
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn word(&self) -> Option<WordId> {
        self.word
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn lookahead(&self) -> Score {
        self.prob
    }

    pub fn refs(&self) -> u32 {
        self.refs
    }

    pub fn hmm(&self) -> &Hmm {
        &self.hmm
    }
}

#[derive(Debug, Clone)]
struct RootGroup {
    left: Option<PhoneId>,
    roots: Vec<NodeId>,
}

/// Lexical tree over one word list
pub struct LexTree {
    kind: TreeKind,
    policy: CrossWordPolicy,
    table: Arc<ContextUnitTable>,
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    groups: Vec<RootGroup>,
    shared_roots: HashMap<(UnitRef, PhoneId), NodeId>,
    leaves: HashSet<(NodeId, WordId)>,
    expanded: Vec<NodeId>,
    active: Vec<NodeId>,
    next_active: Vec<NodeId>,
    node_best: Vec<Score>,
    n_words: usize,
}

impl LexTree {
    /// Build a tree over `words` (with their lookahead scores). One root group is
    /// created per entry of `left_contexts`; an empty slice builds a single group
    /// whose first phones cover every left context.
    pub fn build(
        table: Arc<ContextUnitTable>,
        dict: &Dictionary,
        words: &[(WordId, Score)],
        left_contexts: &[PhoneId],
        policy: CrossWordPolicy,
        kind: TreeKind,
    ) -> Result<Self> {
        let mut tree = Self {
            kind,
            policy,
            table,
            nodes: Vec::new(),
            free: Vec::new(),
            groups: Vec::new(),
            shared_roots: HashMap::new(),
            leaves: HashSet::new(),
            expanded: Vec::new(),
            active: Vec::new(),
            next_active: Vec::new(),
            node_best: Vec::new(),
            n_words: words.len(),
        };

        let lefts: Vec<Option<PhoneId>> = if left_contexts.is_empty() {
            vec![None]
        } else {
            left_contexts.iter().map(|&l| Some(l)).collect()
        };
        for left in lefts {
            tree.groups.push(RootGroup {
                left,
                roots: Vec::new(),
            });
            let group = tree.groups.len() - 1;
            for &(word, prob) in words {
                tree.insert(group, dict, word, prob)?;
            }
        }

        tracing::debug!(
            kind = ?tree.kind,
            policy = ?tree.policy,
            words = tree.n_words,
            groups = tree.groups.len(),
            nodes = tree.n_nodes(),
            "Lexical tree built"
        );
        Ok(tree)
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.index()] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() as u32 - 1)
            }
        }
    }

    fn new_node(&self, unit: UnitRef, base: PhoneId, prob: Score, word: Option<WordId>, kind: NodeKind) -> Node {
        Node {
            unit,
            base,
            hmm: Hmm::new(self.table.n_emit_states()),
            prob,
            children: Vec::new(),
            word,
            kind,
            refs: 1,
        }
    }

    /// Word-final node for the configured policy
    fn leaf_node(&self, word: WordId, base: PhoneId, left: Option<PhoneId>, single: bool, prob: Score) -> Result<Node> {
        let unit = self.table.final_composite(base, left, single).ok_or_else(|| {
            Error::ModelInconsistency(format!("no word-final unit for word {} (phone {})", word, base))
        })?;
        let kind = match self.policy {
            CrossWordPolicy::Composite => NodeKind::Leaf,
            CrossWordPolicy::Exact => NodeKind::Lazy { left, single },
        };
        Ok(self.new_node(unit, base, prob, Some(word), kind))
    }

    fn insert(&mut self, group: usize, dict: &Dictionary, word: WordId, prob: Score) -> Result<()> {
        let pron = dict.phones(word).to_vec();
        let n = pron.len();
        let left = self.groups[group].left;
        if n == 0 {
            return Err(Error::ModelInconsistency(format!(
                "word '{}' has an empty pronunciation",
                dict.name(word)
            )));
        }

        if n == 1 {
            let leaf = self.leaf_node(word, pron[0], left, true, prob)?;
            let id = self.alloc(leaf);
            self.groups[group].roots.push(id);
            return Ok(());
        }

        let unit = match left {
            Some(l) => self
                .table
                .initial_exact(pron[0], l, pron[1])
                .map(UnitRef::Ordinary),
            None => self.table.initial_composite(pron[0], pron[1]),
        }
        .ok_or_else(|| {
            Error::ModelInconsistency(format!("no word-initial unit for '{}'", dict.name(word)))
        })?;

        let root = match self.shared_roots.get(&(unit, pron[0])).copied() {
            Some(id) => {
                if !self.groups[group].roots.contains(&id) {
                    self.groups[group].roots.push(id);
                    self.nodes[id.index()].refs += 1;
                }
                id
            }
            None => {
                let node = self.new_node(unit, pron[0], prob, None, NodeKind::Internal);
                let id = self.alloc(node);
                self.shared_roots.insert((unit, pron[0]), id);
                self.groups[group].roots.push(id);
                id
            }
        };
        // Another group already put this word under the shared root
        if !self.leaves.insert((root, word)) {
            return Ok(());
        }

        let mut cur = root;
        self.raise(cur, prob);
        let internal = self.table.internal_units(word).to_vec();
        for (i, &ssid) in internal.iter().enumerate() {
            let base = pron[i + 1];
            let unit = UnitRef::Ordinary(ssid);
            let existing = self.nodes[cur.index()].children.iter().copied().find(|&c| {
                let child = &self.nodes[c.index()];
                child.unit == unit && child.base == base && child.kind == NodeKind::Internal
            });
            cur = match existing {
                Some(c) => c,
                None => {
                    let node = self.new_node(unit, base, prob, None, NodeKind::Internal);
                    let c = self.alloc(node);
                    self.nodes[cur.index()].children.push(c);
                    c
                }
            };
            self.raise(cur, prob);
        }

        let leaf = self.leaf_node(word, pron[n - 1], Some(pron[n - 2]), false, prob)?;
        let id = self.alloc(leaf);
        self.nodes[cur.index()].children.push(id);
        Ok(())
    }

    fn raise(&mut self, id: NodeId, prob: Score) {
        let node = &mut self.nodes[id.index()];
        node.prob = node.prob.max(prob);
    }

    /// Drop one root group; nodes are freed once no other group owns them
    pub fn release_group(&mut self, left: Option<PhoneId>) -> Result<()> {
        if !self.active.is_empty() || !self.next_active.is_empty() {
            return Err(Error::InvalidState(
                "root groups can only be released between utterances".to_string(),
            ));
        }
        let pos = self
            .groups
            .iter()
            .position(|g| g.left == left)
            .ok_or_else(|| Error::InvalidState(format!("no root group for left context {:?}", left)))?;
        let group = self.groups.remove(pos);
        for root in group.roots {
            self.release(root);
        }
        Ok(())
    }

    fn release(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.index()];
        node.refs = node.refs.saturating_sub(1);
        if node.refs > 0 {
            return;
        }
        let children = std::mem::take(&mut node.children);
        let kind = std::mem::replace(&mut node.kind, NodeKind::Released);
        node.word = None;
        node.hmm.reset();
        let key = (node.unit, node.base);
        if self.shared_roots.get(&key) == Some(&id) {
            self.shared_roots.remove(&key);
            self.leaves.retain(|&(root, _)| root != id);
        }
        self.free.push(id);

        if let NodeKind::Expanded { children: fanout, .. } = kind {
            for c in fanout {
                self.release(c);
            }
        }
        for c in children {
            self.release(c);
        }
    }

    /// Tree role (word or filler tree)
    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    pub fn policy(&self) -> CrossWordPolicy {
        self.policy
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Roots of the group serving `left`
    pub fn roots(&self, left: Option<PhoneId>) -> Option<&[NodeId]> {
        self.group(left).map(|g| g.roots.as_slice())
    }

    fn group(&self, left: Option<PhoneId>) -> Option<&RootGroup> {
        self.groups
            .iter()
            .find(|g| g.left == left)
            .or_else(|| self.groups.iter().find(|g| g.left.is_none()))
    }

    /// Left contexts with a root group (`None` for a context-free group)
    pub fn left_contexts(&self) -> Vec<Option<PhoneId>> {
        self.groups.iter().map(|g| g.left).collect()
    }

    /// Live nodes
    pub fn n_nodes(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Words the tree was built over
    pub fn n_words(&self) -> usize {
        self.n_words
    }

    /// Follow the path of `word` from the group root, returning the node at each
    /// phone position
    pub fn word_path(&self, left: Option<PhoneId>, word: WordId, dict: &Dictionary) -> Option<Vec<NodeId>> {
        let pron = dict.phones(word);
        let roots = self.roots(left)?;
        for &root in roots {
            if let Some(path) = self.find_path(root, word, pron, 0) {
                return Some(path);
            }
        }
        None
    }

    fn find_path(&self, id: NodeId, word: WordId, pron: &[PhoneId], depth: usize) -> Option<Vec<NodeId>> {
        let node = self.node(id);
        if pron.get(depth) != Some(&node.base) {
            return None;
        }
        if depth + 1 == pron.len() {
            return (node.word == Some(word)).then(|| vec![id]);
        }
        node.children.iter().find_map(|&c| {
            self.find_path(c, word, pron, depth + 1).map(|mut rest| {
                rest.insert(0, id);
                rest
            })
        })
    }

    pub(crate) fn table(&self) -> &ContextUnitTable {
        &self.table
    }
}

/// Lookahead scores for a word list: the scaled unigram of every word, or zero when
/// the tree carries no language-model lookahead (filler trees)
pub fn unigram_lookahead(words: &[WordId], score: impl Fn(WordId) -> Score) -> Vec<(WordId, Score)> {
    words
        .iter()
        .map(|&w| (w, score(w).max(WORST_SCORE + 1)))
        .collect()
}
