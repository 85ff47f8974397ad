//! Lattice files
//!
//! Lattices are written as JSON: a header with the format version and frame count,
//! node records, edge records and the entry and final node ids. Word names are
//! stored next to ids and checked against the dictionary on read.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use lexdecode_core::logmath::Score;
use lexdecode_core::{Dictionary, Error, FrameIdx, Result, WordId};

use super::{Dag, DagLink, DagNode};

pub const LATTICE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: usize,
    pub word: String,
    pub word_id: WordId,
    pub start_frame: FrameIdx,
    pub first_end: FrameIdx,
    pub last_end: FrameIdx,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: usize,
    pub to: usize,
    pub end_frame: FrameIdx,
    pub acoustic_score: Score,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatticeFile {
    pub version: u32,
    pub frames: usize,
    pub entry: usize,
    pub exit: usize,
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}

impl LatticeFile {
    pub fn from_dag(dag: &Dag, dict: &Dictionary) -> Self {
        Self {
            version: LATTICE_FORMAT_VERSION,
            frames: dag.frames(),
            entry: dag.entry(),
            exit: dag.exit(),
            nodes: dag
                .nodes()
                .iter()
                .enumerate()
                .map(|(id, n)| NodeRecord {
                    id,
                    word: dict.name(n.word).to_string(),
                    word_id: n.word,
                    start_frame: n.start_frame,
                    first_end: n.first_end,
                    last_end: n.last_end,
                })
                .collect(),
            edges: dag
                .links()
                .iter()
                .map(|l| EdgeRecord {
                    from: l.from,
                    to: l.to,
                    end_frame: l.end_frame,
                    acoustic_score: l.acoustic_score,
                })
                .collect(),
        }
    }

    /// Validate against `dict` and rebuild the graph
    pub fn into_dag(self, dict: &Dictionary) -> Result<Dag> {
        if self.version != LATTICE_FORMAT_VERSION {
            return Err(Error::LatticeFormat(format!(
                "unsupported lattice version {} (expected {})",
                self.version, LATTICE_FORMAT_VERSION
            )));
        }
        let n = self.nodes.len();
        if self.entry >= n || self.exit >= n {
            return Err(Error::LatticeFormat(format!(
                "entry {} or exit {} outside {} nodes",
                self.entry, self.exit, n
            )));
        }

        let mut nodes = Vec::with_capacity(n);
        for (i, rec) in self.nodes.into_iter().enumerate() {
            if rec.id != i {
                return Err(Error::LatticeFormat(format!("node record {} has id {}", i, rec.id)));
            }
            if dict.id(&rec.word) != Some(rec.word_id) {
                return Err(Error::LatticeFormat(format!(
                    "node {}: word '{}' does not match dictionary id {}",
                    i, rec.word, rec.word_id
                )));
            }
            nodes.push(DagNode {
                word: rec.word_id,
                start_frame: rec.start_frame,
                first_end: rec.first_end,
                last_end: rec.last_end,
            });
        }

        let mut links = Vec::with_capacity(self.edges.len());
        for (i, e) in self.edges.into_iter().enumerate() {
            if e.from >= n || e.to >= n {
                return Err(Error::LatticeFormat(format!("edge {} references a missing node", i)));
            }
            if nodes[e.to].start_frame <= nodes[e.from].start_frame {
                return Err(Error::LatticeFormat(format!(
                    "edge {} does not advance in time ({} -> {})",
                    i, nodes[e.from].start_frame, nodes[e.to].start_frame
                )));
            }
            links.push(DagLink {
                from: e.from,
                to: e.to,
                end_frame: e.end_frame,
                acoustic_score: e.acoustic_score,
            });
        }
        Ok(Dag::from_parts(nodes, links, self.entry, self.exit, self.frames))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
