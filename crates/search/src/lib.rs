//! Time-synchronous lexical-tree search
//!
//! Features:
//! - Composite context units for unresolved cross-word context
//! - Prefix-shared lexical trees with lazily expanded word-final leaves
//! - Beam and histogram pruning
//! - Word history table with LM-state deduplication and backtrace
//! - Round-robin or LRU re-entry among tree copies, plus a filler tree
//! - Word lattice construction and best-path rescoring
//! - Utterance-level session driver with error accounting

pub mod beam;
pub mod context;
pub mod decoder;
pub mod engine;
pub mod history;
pub mod hmm;
pub mod lattice;
pub mod lextree;
pub mod lookahead;

pub use beam::{BeamController, Thresholds};
pub use context::{CompositeId, CompositeUnit, ContextUnitTable, RightContextClass, UnitRef};
pub use decoder::{DecodeOutcome, Decoder, HypothesisSource, SessionStats, UtteranceStatus};
pub use engine::{
    DecoderResources, EngineState, FrameEngine, FrameReport, ReentryPolicy, Utterance, UtteranceStats,
};
pub use history::{FinalEntry, HistoryEntry, HistoryId, SearchHistory, TreeKind};
pub use hmm::Hmm;
pub use lattice::{BestPath, BestPathSearch, Dag, DagLink, DagNode, LatticeBuilder, LatticeFile};
pub use lextree::{unigram_lookahead, Evaluation, LexTree, Node, NodeId, NodeKind};
pub use lookahead::PhoneLookahead;
