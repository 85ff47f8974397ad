//! Word lattice for the second pass
//!
//! A [`Dag`] node is a unique (word, start frame); a link carries the acoustic
//! score of its source word ending at the link's end frame. Start frames strictly
//! increase along every link, so the graph is acyclic by construction.

mod bestpath;
mod builder;
mod file;

pub use bestpath::{BestPath, BestPathSearch};
pub use builder::LatticeBuilder;
pub use file::{EdgeRecord, LatticeFile, NodeRecord, LATTICE_FORMAT_VERSION};

use std::collections::HashMap;

use lexdecode_core::logmath::Score;
use lexdecode_core::{FrameIdx, WordId};

#[derive(Debug, Clone, PartialEq)]
pub struct DagNode {
    pub word: WordId,
    pub start_frame: FrameIdx,
    pub first_end: FrameIdx,
    pub last_end: FrameIdx,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DagLink {
    pub from: usize,
    pub to: usize,
    /// Last frame of the source word
    pub end_frame: FrameIdx,
    /// Acoustic score of the source word
    pub acoustic_score: Score,
}

/// Immutable word graph
#[derive(Debug, Clone)]
pub struct Dag {
    nodes: Vec<DagNode>,
    links: Vec<DagLink>,
    out_links: Vec<Vec<usize>>,
    in_links: Vec<Vec<usize>>,
    entry: usize,
    exit: usize,
    frames: usize,
}

impl Dag {
    /// Assemble from node and link lists; links must reference existing nodes
    pub(crate) fn from_parts(nodes: Vec<DagNode>, links: Vec<DagLink>, entry: usize, exit: usize, frames: usize) -> Self {
        let mut out_links = vec![Vec::new(); nodes.len()];
        let mut in_links = vec![Vec::new(); nodes.len()];
        for (i, l) in links.iter().enumerate() {
            out_links[l.from].push(i);
            in_links[l.to].push(i);
        }
        Self {
            nodes,
            links,
            out_links,
            in_links,
            entry,
            exit,
            frames,
        }
    }

    pub fn nodes(&self) -> &[DagNode] {
        &self.nodes
    }

    pub fn links(&self) -> &[DagLink] {
        &self.links
    }

    pub fn node(&self, i: usize) -> &DagNode {
        &self.nodes[i]
    }

    pub fn link(&self, i: usize) -> &DagLink {
        &self.links[i]
    }

    pub fn out_links(&self, node: usize) -> &[usize] {
        &self.out_links[node]
    }

    pub fn in_links(&self, node: usize) -> &[usize] {
        &self.in_links[node]
    }

    /// Utterance start node (`<s>`, frame -1)
    pub fn entry(&self) -> usize {
        self.entry
    }

    /// Utterance end node (`</s>`)
    pub fn exit(&self) -> usize {
        self.exit
    }

    /// Frames of the utterance
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Node of (word, start frame)
    pub fn find(&self, word: WordId, start_frame: FrameIdx) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.word == word && n.start_frame == start_frame)
    }

    /// Link map keyed by (from, to)
    pub fn link_index(&self) -> HashMap<(usize, usize), usize> {
        self.links
            .iter()
            .enumerate()
            .map(|(i, l)| ((l.from, l.to), i))
            .collect()
    }
}
