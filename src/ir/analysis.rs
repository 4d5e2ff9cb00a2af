//! Shared CFG and dominator tree analysis.
//!
//! Computes control-flow graph information, immediate dominators
//! (Cooper-Harvey-Kennedy iteration), and dominance frontiers. The
//! promotion pass consumes these as read-only inputs; promotion never
//! changes the CFG, so one analysis per function stays valid for the
//! whole run.
//!
//! Edges are stored row-compressed (`Adjacency`): all targets in one
//! flat array with per-node start offsets, two allocations total no
//! matter how many blocks the function has.
//!
//! Predecessor rows keep one entry per terminator slot, so a block whose
//! switch targets the same successor through two cases appears twice in
//! that successor's row. Phi-node arity is defined against this slot
//! count. Successor rows are deduplicated (they drive traversals).

use rustc_hash::FxHashMap;
use crate::ir::instruction::BlockId;
use crate::ir::module::IrFunction;

/// Sentinel for "no immediate dominator": the block is unreachable (or
/// the computation has not reached it yet).
const NO_IDOM: usize = usize::MAX;

// ── Row-compressed adjacency ──────────────────────────────────────────────────

/// Row-compressed edge storage: `targets[starts[n]..starts[n + 1]]`
/// holds the neighbors of node `n`.
pub struct Adjacency {
    /// Per-node start offsets into `targets`; one extra entry at the end
    /// so every row has an upper bound. Length: node count + 1.
    starts: Vec<u32>,
    /// All edge targets, row by row.
    targets: Vec<u32>,
}

impl Adjacency {
    /// Flatten per-node rows, consuming them.
    fn from_rows(rows: Vec<Vec<u32>>) -> Self {
        let mut starts = Vec::with_capacity(rows.len() + 1);
        starts.push(0);
        let mut targets = Vec::with_capacity(rows.iter().map(Vec::len).sum());
        for row in rows {
            targets.extend(row);
            starts.push(targets.len() as u32);
        }
        Adjacency { starts, targets }
    }

    /// Neighbors of `node`.
    #[inline]
    pub fn row(&self, node: usize) -> &[u32] {
        &self.targets[self.starts[node] as usize..self.starts[node + 1] as usize]
    }

    /// Number of neighbors of `node`.
    #[inline]
    pub fn degree(&self, node: usize) -> usize {
        self.row(node).len()
    }
}

// ── Label map ─────────────────────────────────────────────────────────────────

/// Map each block label to its index. The index assigned by forward
/// iteration is the stable block numbering used everywhere determinism
/// matters.
pub fn build_label_map(func: &IrFunction) -> FxHashMap<BlockId, usize> {
    let mut map = FxHashMap::with_capacity_and_hasher(func.blocks.len(), Default::default());
    for (idx, block) in func.blocks.iter().enumerate() {
        map.insert(block.label, idx);
    }
    map
}

// ── CFG construction ──────────────────────────────────────────────────────────

/// Build predecessor and successor lists from the function's terminators.
/// Returns (preds, succs): preds with one entry per edge slot, succs
/// deduplicated.
pub fn build_cfg(
    func: &IrFunction,
    label_to_idx: &FxHashMap<BlockId, usize>,
) -> (Adjacency, Adjacency) {
    let n = func.blocks.len();
    let mut preds: Vec<Vec<u32>> = vec![Vec::new(); n];
    let mut succs: Vec<Vec<u32>> = vec![Vec::new(); n];

    for (i, block) in func.blocks.iter().enumerate() {
        for slot in block.terminator.successor_slots() {
            if let Some(&target) = label_to_idx.get(&slot) {
                preds[target].push(i as u32);
            }
        }
        for succ in block.terminator.successors() {
            if let Some(&target) = label_to_idx.get(&succ) {
                succs[i].push(target as u32);
            }
        }
    }

    (Adjacency::from_rows(preds), Adjacency::from_rows(succs))
}

// ── Reverse postorder ─────────────────────────────────────────────────────────

/// Blocks reachable from the entry block, in reverse postorder.
pub fn compute_reverse_postorder(num_blocks: usize, succs: &Adjacency) -> Vec<usize> {
    fn walk(succs: &Adjacency, node: usize, seen: &mut [bool], out: &mut Vec<usize>) {
        seen[node] = true;
        for &next in succs.row(node) {
            if !seen[next as usize] {
                walk(succs, next as usize, seen, out);
            }
        }
        out.push(node);
    }

    if num_blocks == 0 {
        return Vec::new();
    }
    let mut seen = vec![false; num_blocks];
    let mut order = Vec::with_capacity(num_blocks);
    walk(succs, 0, &mut seen, &mut order);
    order.reverse();
    order
}

// ── Dominator computation ─────────────────────────────────────────────────────

/// Compute immediate dominators using the Cooper-Harvey-Kennedy
/// iteration: sweep the reachable blocks in reverse postorder, folding
/// each block's already-processed predecessors together through the
/// partial dominator tree, until an entire sweep changes nothing.
/// `idom[entry] == entry`; unreachable blocks keep `usize::MAX`.
pub fn compute_dominators(num_blocks: usize, preds: &Adjacency, succs: &Adjacency) -> Vec<usize> {
    let rpo = compute_reverse_postorder(num_blocks, succs);
    let mut order_of = vec![usize::MAX; num_blocks];
    for (order, &block) in rpo.iter().enumerate() {
        order_of[block] = order;
    }

    let mut idom = vec![NO_IDOM; num_blocks];
    let Some(&entry) = rpo.first() else {
        return idom;
    };
    idom[entry] = entry;

    // Nearest common ancestor in the partial tree: climb whichever side
    // sits later in reverse postorder until the walks meet.
    let meet = |idom: &[usize], mut a: usize, mut b: usize| {
        while a != b {
            while order_of[a] > order_of[b] {
                a = idom[a];
            }
            while order_of[b] > order_of[a] {
                b = idom[b];
            }
        }
        a
    };

    loop {
        let mut changed = false;
        for &block in &rpo[1..] {
            let mut candidate = None;
            for &p in preds.row(block) {
                let p = p as usize;
                if idom[p] == NO_IDOM {
                    continue; // unreachable, or not yet processed
                }
                candidate = Some(match candidate {
                    None => p,
                    Some(seen) => meet(&idom, seen, p),
                });
            }
            let Some(candidate) = candidate else { continue };
            if idom[block] != candidate {
                idom[block] = candidate;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    idom
}

// ── Dominance frontiers ───────────────────────────────────────────────────────

/// Compute dominance frontiers: `DF(n)` holds the join blocks where
/// `n`'s dominance ends. For each join, every predecessor's idom chain
/// is walked up to (not including) the join's own immediate dominator,
/// and the join is added to the frontier of each block passed.
/// Returned as sorted Vecs so downstream iteration is deterministic.
pub fn compute_dominance_frontiers(
    num_blocks: usize,
    preds: &Adjacency,
    idom: &[usize],
) -> Vec<Vec<usize>> {
    let mut df: Vec<Vec<usize>> = vec![Vec::new(); num_blocks];

    for join in 0..num_blocks {
        // Only merge points (two or more predecessor slots) end anyone's
        // dominance.
        if preds.degree(join) < 2 {
            continue;
        }
        let stop = idom[join];
        if stop == NO_IDOM {
            continue; // unreachable join
        }
        for &p in preds.row(join) {
            let mut node = p as usize;
            if idom[node] == NO_IDOM {
                continue; // edge from unreachable code
            }
            while node != stop {
                if !df[node].contains(&join) {
                    df[node].push(join);
                }
                if idom[node] == node {
                    break; // reached the entry block
                }
                node = idom[node];
            }
        }
    }

    for row in &mut df {
        row.sort_unstable();
    }
    df
}

// ── Dominator tree ────────────────────────────────────────────────────────────

/// A dominator tree with O(1) block dominance queries.
///
/// Dominance is answered with DFS entry/exit intervals over the tree:
/// A dominates B iff A's interval contains B's. Unreachable blocks are
/// dominated by nothing and dominate nothing.
pub struct DomTree {
    idom: Vec<usize>,
    dfs_in: Vec<u32>,
    dfs_out: Vec<u32>,
}

impl DomTree {
    pub fn new(num_blocks: usize, idom: Vec<usize>) -> Self {
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); num_blocks];
        let mut entry = None;
        for b in 0..num_blocks {
            if idom[b] == NO_IDOM {
                continue;
            }
            if idom[b] == b {
                entry = Some(b);
            } else {
                children[idom[b]].push(b);
            }
        }

        // Iterative DFS assigning entry/exit timestamps.
        let mut dfs_in = vec![0u32; num_blocks];
        let mut dfs_out = vec![0u32; num_blocks];
        let mut timer = 1u32;
        if let Some(root) = entry {
            // (block, next child index to visit)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            dfs_in[root] = timer;
            timer += 1;
            while let Some(&mut (block, ref mut next)) = stack.last_mut() {
                if *next < children[block].len() {
                    let child = children[block][*next];
                    *next += 1;
                    dfs_in[child] = timer;
                    timer += 1;
                    stack.push((child, 0));
                } else {
                    dfs_out[block] = timer;
                    timer += 1;
                    stack.pop();
                }
            }
        }

        DomTree { idom, dfs_in, dfs_out }
    }

    /// Whether block `a` dominates block `b`. Every block dominates
    /// itself. Returns false if either block is unreachable.
    #[inline]
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        self.dfs_in[a] <= self.dfs_in[b] && self.dfs_out[b] <= self.dfs_out[a]
    }

    /// Whether the block is reachable from the entry block.
    #[inline]
    pub fn is_reachable(&self, b: usize) -> bool {
        self.idom[b] != NO_IDOM
    }
}

// ── Cached analysis bundle ────────────────────────────────────────────────────

/// Pre-computed CFG analysis for one function: label numbering, edge
/// lists, dominator tree, and dominance frontiers.
pub struct CfgAnalysis {
    pub label_to_idx: FxHashMap<BlockId, usize>,
    pub preds: Adjacency,
    pub succs: Adjacency,
    pub domtree: DomTree,
    pub frontiers: Vec<Vec<usize>>,
    pub num_blocks: usize,
}

impl CfgAnalysis {
    /// Build a complete CFG analysis bundle for a function.
    pub fn build(func: &IrFunction) -> Self {
        let num_blocks = func.blocks.len();
        let label_to_idx = build_label_map(func);
        let (preds, succs) = build_cfg(func, &label_to_idx);
        let idom = compute_dominators(num_blocks, &preds, &succs);
        let frontiers = compute_dominance_frontiers(num_blocks, &preds, &idom);
        let domtree = DomTree::new(num_blocks, idom);
        CfgAnalysis {
            label_to_idx,
            preds,
            succs,
            domtree,
            frontiers,
            num_blocks,
        }
    }

    /// Number of predecessor edge slots of a block (phi arity).
    #[inline]
    pub fn num_preds(&self, block: usize) -> usize {
        self.preds.degree(block)
    }
}
