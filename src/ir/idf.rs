//! Iterated dominance frontier calculation.
//!
//! Given the set of blocks that define a value and the set of blocks the
//! value is live into, computes the blocks that need phi nodes: the
//! fixpoint of the dominance-frontier operation over the defining set,
//! restricted to live-in blocks so no dead phi is requested.

use rustc_hash::FxHashSet;
use std::collections::VecDeque;

use super::analysis::CfgAnalysis;

/// One-shot IDF computation over a function's CFG analysis.
///
/// Reused across queries by resetting the defining/live-in sets between
/// calls; the dominance frontiers themselves live in the `CfgAnalysis`.
pub struct IdfCalculator<'a> {
    cfg: &'a CfgAnalysis,
    def_blocks: FxHashSet<usize>,
    live_in_blocks: Option<FxHashSet<usize>>,
}

impl<'a> IdfCalculator<'a> {
    pub fn new(cfg: &'a CfgAnalysis) -> Self {
        IdfCalculator {
            cfg,
            def_blocks: FxHashSet::default(),
            live_in_blocks: None,
        }
    }

    /// Set the blocks containing definitions of the value.
    pub fn set_defining_blocks(&mut self, blocks: impl IntoIterator<Item = usize>) {
        self.def_blocks = blocks.into_iter().collect();
    }

    /// Restrict the result to blocks the value is live into. Without this
    /// the full (non-pruned) IDF is returned.
    pub fn set_live_in_blocks(&mut self, blocks: impl IntoIterator<Item = usize>) {
        self.live_in_blocks = Some(blocks.into_iter().collect());
    }

    /// Compute the iterated dominance frontier of the defining set.
    ///
    /// The result order is the worklist discovery order; callers that
    /// need determinism sort by block number afterwards.
    pub fn calculate(&mut self) -> Vec<usize> {
        let mut phi_blocks = Vec::new();
        let mut has_phi: FxHashSet<usize> = FxHashSet::default();
        let mut ever_queued: FxHashSet<usize> = self.def_blocks.clone();
        let mut worklist: VecDeque<usize> = self.def_blocks.iter().copied().collect();

        while let Some(block) = worklist.pop_front() {
            for &df_block in &self.cfg.frontiers[block] {
                if !has_phi.insert(df_block) {
                    continue;
                }
                if let Some(live) = &self.live_in_blocks {
                    // A block the value is not live into gets no phi, and
                    // without a phi it defines nothing, so its frontier
                    // does not propagate either.
                    if !live.contains(&df_block) {
                        continue;
                    }
                }
                phi_blocks.push(df_block);
                if ever_queued.insert(df_block) {
                    worklist.push_back(df_block);
                }
            }
        }

        phi_blocks
    }
}
