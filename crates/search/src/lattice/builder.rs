//! History to lattice conversion

use std::collections::{BTreeMap, HashMap, VecDeque};

use lexdecode_config::LatticeConfig;
use lexdecode_core::logmath::{add, Score, WORST_SCORE};
use lexdecode_core::{Dictionary, Error, FillerPenalties, FrameIdx, Result, WordId};

use super::{Dag, DagLink, DagNode};
use crate::history::{FinalEntry, SearchHistory};

/// Graph under construction; nodes and links are killed in place and compacted at
/// the end
struct Work {
    nodes: Vec<DagNode>,
    node_alive: Vec<bool>,
    links: Vec<DagLink>,
    link_alive: Vec<bool>,
    index: HashMap<(usize, usize), usize>,
    out_links: Vec<Vec<usize>>,
    in_links: Vec<Vec<usize>>,
    max_edges: usize,
}

impl Work {
    fn add_node(&mut self, node: DagNode) -> usize {
        self.nodes.push(node);
        self.node_alive.push(true);
        self.out_links.push(Vec::new());
        self.in_links.push(Vec::new());
        self.nodes.len() - 1
    }

    /// Add a link, keeping the better score for parallel links
    fn add_link(&mut self, from: usize, to: usize, end_frame: FrameIdx, acoustic_score: Score) -> Result<()> {
        if let Some(&i) = self.index.get(&(from, to)) {
            if self.link_alive[i] {
                let link = &mut self.links[i];
                if acoustic_score > link.acoustic_score {
                    link.acoustic_score = acoustic_score;
                    link.end_frame = end_frame;
                }
                return Ok(());
            }
        }
        if self.links.len() >= self.max_edges {
            return Err(Error::ResourceLimitExceeded {
                resource: "lattice edges",
                limit: self.max_edges,
            });
        }
        let i = self.links.len();
        self.links.push(DagLink {
            from,
            to,
            end_frame,
            acoustic_score,
        });
        self.link_alive.push(true);
        self.index.insert((from, to), i);
        self.out_links[from].push(i);
        self.in_links[to].push(i);
        Ok(())
    }

    fn alive_out(&self, node: usize) -> Vec<usize> {
        self.out_links[node].iter().copied().filter(|&l| self.link_alive[l]).collect()
    }

    fn alive_in(&self, node: usize) -> Vec<usize> {
        self.in_links[node].iter().copied().filter(|&l| self.link_alive[l]).collect()
    }

    fn kill_node(&mut self, node: usize) {
        self.node_alive[node] = false;
        for l in self.out_links[node].iter().chain(self.in_links[node].iter()) {
            self.link_alive[*l] = false;
        }
    }

    fn reachable(&self, start: usize, forward: bool) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([start]);
        seen[start] = true;
        while let Some(n) = queue.pop_front() {
            let links = if forward { &self.out_links[n] } else { &self.in_links[n] };
            for &l in links {
                if !self.link_alive[l] {
                    continue;
                }
                let next = if forward { self.links[l].to } else { self.links[l].from };
                if self.node_alive[next] && !seen[next] {
                    seen[next] = true;
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    fn compact(self, entry: usize, exit: usize, frames: usize) -> Dag {
        let mut renumber = vec![usize::MAX; self.nodes.len()];
        let mut nodes = Vec::new();
        for (i, node) in self.nodes.into_iter().enumerate() {
            if self.node_alive[i] {
                renumber[i] = nodes.len();
                nodes.push(node);
            }
        }
        let links = self
            .links
            .into_iter()
            .enumerate()
            .filter(|(i, l)| self.link_alive[*i] && renumber[l.from] != usize::MAX && renumber[l.to] != usize::MAX)
            .map(|(_, l)| DagLink {
                from: renumber[l.from],
                to: renumber[l.to],
                ..l
            })
            .collect();
        Dag::from_parts(nodes, links, renumber[entry], renumber[exit], frames)
    }
}

/// Builds a [`Dag`] from the valid entries of a [`SearchHistory`]
pub struct LatticeBuilder {
    config: LatticeConfig,
    fillers: FillerPenalties,
}

impl LatticeBuilder {
    pub fn new(config: LatticeConfig, fillers: FillerPenalties) -> Self {
        Self { config, fillers }
    }

    /// Build the lattice of a finished utterance of `frames` frames whose best
    /// hypothesis is `last`
    pub fn build(&self, history: &SearchHistory, dict: &Dictionary, last: FinalEntry, frames: usize) -> Result<Dag> {
        let final_frame = history
            .get(last.id)
            .map(|e| e.end_frame)
            .ok_or_else(|| Error::InvalidState("final entry is not in the history".to_string()))?;

        let mut work = Work {
            nodes: Vec::new(),
            node_alive: Vec::new(),
            links: Vec::new(),
            link_alive: Vec::new(),
            index: HashMap::new(),
            out_links: Vec::new(),
            in_links: Vec::new(),
            max_edges: self.config.max_edges,
        };

        // Nodes by (word, start frame), best acoustic score per end frame
        let mut by_key: HashMap<(WordId, FrameIdx), usize> = HashMap::new();
        let mut ends: Vec<BTreeMap<FrameIdx, Score>> = Vec::new();
        let mut entry = None;
        for (_, e) in history.iter().filter(|(_, e)| e.valid) {
            let node = *by_key.entry((e.word, e.start_frame)).or_insert_with(|| {
                ends.push(BTreeMap::new());
                work.add_node(DagNode {
                    word: e.word,
                    start_frame: e.start_frame,
                    first_end: e.end_frame,
                    last_end: e.end_frame,
                })
            });
            let n = &mut work.nodes[node];
            n.first_end = n.first_end.min(e.end_frame);
            n.last_end = n.last_end.max(e.end_frame);
            let slot = ends[node].entry(e.end_frame).or_insert(WORST_SCORE);
            *slot = (*slot).max(e.acoustic_score);
            if e.pred.is_none() {
                entry = Some(node);
            }
        }
        let entry = entry.ok_or_else(|| Error::InvalidState("history has no utterance root".to_string()))?;
        let exit = work.add_node(DagNode {
            word: dict.end_word(),
            start_frame: final_frame + 1,
            first_end: final_frame + 1,
            last_end: final_frame + 1,
        });

        let mut by_start: BTreeMap<FrameIdx, Vec<usize>> = BTreeMap::new();
        for (i, n) in work.nodes.iter().enumerate() {
            if i != exit {
                by_start.entry(n.start_frame).or_default().push(i);
            }
        }

        for u in 0..ends.len() {
            let u_start = work.nodes[u].start_frame;
            for (&ef, &ascr) in &ends[u] {
                let mut starts = vec![ef + 1];
                if self.config.fudge_edges {
                    starts.extend([ef, ef - 1]);
                }
                for sf in starts.into_iter().filter(|&sf| sf > u_start) {
                    if let Some(targets) = by_start.get(&sf) {
                        for &v in targets {
                            work.add_link(u, v, ef, ascr)?;
                        }
                    }
                }
                if ef == final_frame {
                    work.add_link(u, exit, ef, ascr)?;
                }
            }
        }
        let built = work.links.len();

        let mut elided = 0;
        if self.config.elide_fillers {
            let mut fillers: Vec<usize> = (0..work.nodes.len())
                .filter(|&n| n != entry && n != exit && self.fillers.is_filler(work.nodes[n].word))
                .collect();
            fillers.sort_by_key(|&n| (work.nodes[n].start_frame, n));
            for f in fillers {
                let penalty = self.fillers.penalty(work.nodes[f].word).unwrap_or(0);
                let ins = work.alive_in(f);
                let outs = work.alive_out(f);
                work.kill_node(f);
                for &i in &ins {
                    let (from, end_frame, a1) = {
                        let l = &work.links[i];
                        (l.from, l.end_frame, l.acoustic_score)
                    };
                    for &o in &outs {
                        let (to, a2) = (work.links[o].to, work.links[o].acoustic_score);
                        work.add_link(from, to, end_frame, add(add(a1, a2), penalty))?;
                    }
                }
                elided += 1;
            }
        }

        let forward = work.reachable(entry, true);
        if !forward[exit] {
            return Err(Error::NoRecognition);
        }
        let backward = work.reachable(exit, false);
        let mut trimmed = 0;
        for n in 0..work.nodes.len() {
            if work.node_alive[n] && !(forward[n] && backward[n]) {
                work.kill_node(n);
                trimmed += 1;
            }
        }

        let dag = work.compact(entry, exit, frames);
        tracing::debug!(
            nodes = dag.nodes().len(),
            links = dag.links().len(),
            built,
            elided,
            trimmed,
            "Lattice built"
        );
        Ok(dag)
    }
}
