//! mem2reg: promote stack cells to SSA registers with phi insertion.
//!
//! Rewrites allocas whose only users are full-width loads and stores into
//! SSA values, placing phi nodes at the iterated dominance frontier of
//! the stores and threading the live value of each cell through the CFG:
//!
//! 1. Filter promotable allocas (only direct, type-exact loads/stores;
//!    never address-taken)
//! 2. Fast paths: a single-store alloca rewrites dominated loads in
//!    place; an alloca confined to one block resolves loads against the
//!    nearest earlier store. Either may decline and fall through.
//! 3. General path: per-cell liveness, phi placement via the iterated
//!    dominance frontier, then one rename walk over the CFG for all
//!    remaining cells at once.
//! 4. Cleanup: erase the cells, fold trivial phis, and poison-fill phi
//!    entries for predecessors the walk never reached.
//!
//! Instructions are identified by (block index, instruction index)
//! throughout one promotion run. Erasure only marks instructions dead
//! and phi nodes are kept in a side table keyed by the phi registry, so
//! positions stay stable until the final sweep that compacts blocks and
//! splices the surviving phis into their block heads.

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::common::types::IrType;
use crate::ir::analysis::CfgAnalysis;
use crate::ir::idf::IdfCalculator;
use crate::ir::instruction::{BlockId, Instruction, Operand, Value};
use crate::ir::module::{IrFunction, IrModule};

/// Location of an instruction: (block index, instruction index).
type Loc = (usize, usize);

/// A promotable alloca: its cell value, allocated type, and location.
#[derive(Debug, Clone, Copy)]
pub struct AllocaRef {
    pub value: Value,
    pub ty: IrType,
    pub loc: Loc,
}

/// Promote allocas in every defined function of the module.
/// Returns the number of allocas promoted.
pub fn promote_allocas(module: &mut IrModule) -> usize {
    module.for_each_function(promote_function)
}

/// Promote allocas in a single function. Scans the entry block for
/// promotable allocas and promotes until none remain; promotion of one
/// batch can in principle expose further candidates, so the scan loops.
pub fn promote_function(func: &mut IrFunction) -> usize {
    if func.blocks.is_empty() {
        return 0;
    }

    // Promotion never adds or removes blocks or edges, so one CFG
    // analysis is valid for every iteration.
    let cfg = CfgAnalysis::build(func);
    let mut promoted = 0;

    loop {
        let mut allocas = Vec::new();
        for (i, inst) in func.blocks[0].instructions.iter().enumerate() {
            if let Instruction::Alloca { dest, ty } = inst {
                if is_alloca_promotable(func, *dest, *ty) {
                    allocas.push(AllocaRef { value: *dest, ty: *ty, loc: (0, i) });
                }
            }
        }
        if allocas.is_empty() {
            break;
        }
        promoted += promote_mem_to_reg(func, &cfg, allocas);
    }

    promoted
}

/// Whether the cell can be promoted: every user must be a load of the
/// allocated type or a store of a value of that type *into* the cell
/// (never a store of the cell itself). Any other use means the address
/// escapes and the cell must stay in memory.
pub fn is_alloca_promotable(func: &IrFunction, cell: Value, allocated_ty: IrType) -> bool {
    let uses_cell = |op: &Operand| op.as_value() == Some(cell);

    for block in &func.blocks {
        for inst in &block.instructions {
            match inst {
                Instruction::Load { ptr, ty, .. } if uses_cell(ptr) => {
                    if *ty != allocated_ty {
                        return false;
                    }
                }
                Instruction::Store { val, ptr, ty } if uses_cell(ptr) => {
                    if uses_cell(val) || *ty != allocated_ty {
                        return false;
                    }
                }
                other => {
                    let mut escapes = false;
                    other.for_each_operand(|op| escapes |= uses_cell(op));
                    if escapes {
                        return false;
                    }
                }
            }
        }
        let mut escapes = false;
        block.terminator.for_each_operand(|op| escapes |= uses_cell(op));
        if escapes {
            return false;
        }
    }

    true
}

/// Promote a batch of pre-filtered allocas in place. Every cell in
/// `allocas` must satisfy `is_alloca_promotable`; passing one that does
/// not is a programmer error. Returns the number of cells promoted
/// (always the whole batch).
pub fn promote_mem_to_reg(func: &mut IrFunction, cfg: &CfgAnalysis, allocas: Vec<AllocaRef>) -> usize {
    if allocas.is_empty() {
        return 0;
    }
    Promoter::new(func, cfg, allocas).run()
}

/// A load or store of one particular cell.
#[derive(Debug, Clone, Copy)]
struct UserRef {
    loc: Loc,
    is_store: bool,
}

/// Use/def summary of one cell, produced by a single pass over its users.
#[derive(Debug, Default)]
struct AllocaInfo {
    /// One entry per store (a multiset of block indices).
    defining_blocks: SmallVec<[usize; 8]>,
    /// One entry per load (a multiset of block indices).
    using_blocks: SmallVec<[usize; 8]>,
    /// The unique store, meaningful only when `defining_blocks.len() == 1`.
    only_store: Option<Loc>,
    /// The single block holding every access, when there is one.
    only_block: Option<usize>,
    only_used_in_one_block: bool,
}

impl AllocaInfo {
    fn analyze(users: &[UserRef]) -> AllocaInfo {
        let mut info = AllocaInfo { only_used_in_one_block: true, ..AllocaInfo::default() };
        for user in users {
            if user.is_store {
                info.defining_blocks.push(user.loc.0);
                info.only_store = Some(user.loc);
            } else {
                info.using_blocks.push(user.loc.0);
            }
            if info.only_used_in_one_block {
                match info.only_block {
                    None => info.only_block = Some(user.loc.0),
                    Some(b) if b != user.loc.0 => info.only_used_in_one_block = false,
                    Some(_) => {}
                }
            }
        }
        info
    }
}

/// Per-block index of the loads and stores that touch allocas.
///
/// `index_of` returns a monotonically increasing position among the
/// block's cell accesses, scanning the block once on first request and
/// caching every access found. This keeps repeated intra-block ordering
/// queries cheap when many cells share one large block. Erased
/// instructions must be removed with `forget`; cached positions of the
/// remaining instructions stay valid because a scanned block is never
/// renumbered.
#[derive(Default)]
struct BlockAccessIndex {
    positions: FxHashMap<Loc, usize>,
    scanned: FxHashSet<usize>,
}

impl BlockAccessIndex {
    fn index_of(
        &mut self,
        func: &IrFunction,
        dead: &[FxHashSet<usize>],
        alloca_values: &FxHashSet<Value>,
        loc: Loc,
    ) -> usize {
        if let Some(&n) = self.positions.get(&loc) {
            return n;
        }
        debug_assert!(!self.scanned.contains(&loc.0), "query for an untracked instruction");

        let block = loc.0;
        let mut next = 0;
        for (i, inst) in func.blocks[block].instructions.iter().enumerate() {
            if dead[block].contains(&i) {
                continue;
            }
            if Self::is_cell_access(inst, alloca_values) {
                self.positions.insert((block, i), next);
                next += 1;
            }
        }
        self.scanned.insert(block);
        self.positions[&loc]
    }

    fn is_cell_access(inst: &Instruction, alloca_values: &FxHashSet<Value>) -> bool {
        let ptr = match inst {
            Instruction::Load { ptr, .. } => ptr,
            Instruction::Store { ptr, .. } => ptr,
            _ => return false,
        };
        matches!(ptr.as_value(), Some(v) if alloca_values.contains(&v))
    }

    fn forget(&mut self, loc: Loc) {
        self.positions.remove(&loc);
    }

    fn clear(&mut self) {
        self.positions.clear();
        self.scanned.clear();
    }
}

/// One inserted phi node, held aside until the final splice.
struct PhiSlot {
    block: usize,
    alloca: usize,
    dest: Value,
    ty: IrType,
    incoming: Vec<(Operand, BlockId)>,
    live: bool,
}

/// Pending CFG walk state: visit `block` as reached from `pred` with
/// the given per-cell incoming values.
struct RenameJob {
    block: usize,
    pred: usize,
    values: Vec<Operand>,
}

struct Promoter<'a> {
    func: &'a mut IrFunction,
    cfg: &'a CfgAnalysis,
    allocas: Vec<AllocaRef>,

    /// Cell value -> index into `allocas`, for cells on the general path.
    alloca_lookup: FxHashMap<Value, usize>,
    /// Dest values of every alloca in the function (for access indexing).
    alloca_values: FxHashSet<Value>,
    /// Defining block of every instruction-defined value. Parameters are
    /// absent; like constants, they dominate everything.
    def_block: FxHashMap<Value, usize>,

    /// All phi nodes created by this run.
    phis: Vec<PhiSlot>,
    /// The phi registry: (block number, cell index) -> slot in `phis`.
    /// Ordered so cleanup iterates deterministically.
    phi_registry: BTreeMap<(u32, u32), usize>,
    /// Reverse record: phi dest -> slot in `phis`.
    phi_of_value: FxHashMap<Value, usize>,

    /// Per-block indices of erased instructions. Physical removal happens
    /// once, at the end of the run.
    dead: Vec<FxHashSet<usize>>,
    /// Blocks whose bodies the rename walk has already rewritten.
    visited: FxHashSet<usize>,
}

impl<'a> Promoter<'a> {
    fn new(func: &'a mut IrFunction, cfg: &'a CfgAnalysis, allocas: Vec<AllocaRef>) -> Self {
        let num_blocks = func.blocks.len();

        let mut alloca_values = FxHashSet::default();
        let mut def_block = FxHashMap::default();
        for (bi, block) in func.blocks.iter().enumerate() {
            for inst in &block.instructions {
                if let Some(dest) = inst.dest() {
                    def_block.insert(dest, bi);
                }
                if let Instruction::Alloca { dest, .. } = inst {
                    alloca_values.insert(*dest);
                }
            }
        }

        Promoter {
            func,
            cfg,
            allocas,
            alloca_lookup: FxHashMap::default(),
            alloca_values,
            def_block,
            phis: Vec::new(),
            phi_registry: BTreeMap::new(),
            phi_of_value: FxHashMap::default(),
            dead: vec![FxHashSet::default(); num_blocks],
            visited: FxHashSet::default(),
        }
    }

    fn run(&mut self) -> usize {
        let mut access_index = BlockAccessIndex::default();
        let mut promoted = 0;

        let mut alloca_num = 0;
        while alloca_num < self.allocas.len() {
            let alloca = self.allocas[alloca_num];
            debug_assert!(
                is_alloca_promotable(self.func, alloca.value, alloca.ty),
                "cannot promote non-promotable alloca"
            );

            let users = self.collect_users(alloca.value);
            if users.is_empty() {
                // Nothing reads or writes the cell; just delete it.
                self.erase(alloca.loc);
                self.allocas.swap_remove(alloca_num);
                promoted += 1;
                continue;
            }

            let mut info = AllocaInfo::analyze(&users);

            // One store: loads it dominates take the stored value directly.
            if info.defining_blocks.len() == 1
                && self.rewrite_single_store_alloca(alloca, &mut info, &users, &mut access_index)
            {
                self.allocas.swap_remove(alloca_num);
                promoted += 1;
                continue;
            }

            // All accesses in one block: resolve loads against the
            // nearest store above them.
            if info.only_used_in_one_block
                && self.promote_single_block_alloca(alloca, &mut access_index)
            {
                self.allocas.swap_remove(alloca_num);
                promoted += 1;
                continue;
            }

            // Committed to the full algorithm for this cell.
            self.alloca_lookup.insert(alloca.value, alloca_num);

            let def_blocks: FxHashSet<usize> = info.defining_blocks.iter().copied().collect();
            let live_in = self.compute_live_in_blocks(alloca.value, &info, &def_blocks);

            let mut idf = IdfCalculator::new(self.cfg);
            idf.set_defining_blocks(def_blocks.iter().copied());
            idf.set_live_in_blocks(live_in.iter().copied());
            let mut phi_blocks = idf.calculate();
            // Block indices are the stable numbering; sorting makes phi
            // creation order (and thus value ids) reproducible.
            phi_blocks.sort_unstable();
            for block in phi_blocks {
                self.queue_phi_node(block, alloca_num);
            }

            promoted += 1;
            alloca_num += 1;
        }

        if self.allocas.is_empty() {
            self.flush();
            return promoted;
        }
        // Intra-block positions are meaningless to the walk below.
        access_index.clear();

        self.rename();

        self.erase_cells();
        self.simplify_trivial_phis();
        self.fill_missing_incoming();

        self.flush();
        promoted
    }

    // ── User collection ──────────────────────────────────────────────────

    /// Every remaining load/store of the cell, in program order.
    fn collect_users(&self, cell: Value) -> Vec<UserRef> {
        let mut users = Vec::new();
        for (bi, block) in self.func.blocks.iter().enumerate() {
            for (ii, inst) in block.instructions.iter().enumerate() {
                if self.dead[bi].contains(&ii) {
                    continue;
                }
                match inst {
                    Instruction::Load { ptr, .. } if ptr.as_value() == Some(cell) => {
                        users.push(UserRef { loc: (bi, ii), is_store: false });
                    }
                    Instruction::Store { ptr, .. } if ptr.as_value() == Some(cell) => {
                        users.push(UserRef { loc: (bi, ii), is_store: true });
                    }
                    _ => {}
                }
            }
        }
        users
    }

    // ── Fast path: one store ─────────────────────────────────────────────

    /// With a single store, every load the store dominates takes the
    /// stored value. Returns true if that fully eliminated the cell.
    /// On false, loads that could not be proven dominated are recorded in
    /// `info.using_blocks` and the general path picks the cell up.
    fn rewrite_single_store_alloca(
        &mut self,
        alloca: AllocaRef,
        info: &mut AllocaInfo,
        users: &[UserRef],
        access_index: &mut BlockAccessIndex,
    ) -> bool {
        let store_loc = info.only_store.expect("single-store path without a store");
        let store_val = match &self.func.blocks[store_loc.0].instructions[store_loc.1] {
            Instruction::Store { val, .. } => *val,
            _ => unreachable!("only_store does not point at a store"),
        };
        // Constants, markers, and parameters dominate every instruction;
        // only an instruction-defined value needs dominance checks.
        let val_is_inst = store_val
            .as_value()
            .map_or(false, |v| self.def_block.contains_key(&v));
        let store_block = store_loc.0;
        let mut store_index: Option<usize> = None;

        // Rebuilt below: only the loads this path must skip remain.
        info.using_blocks.clear();

        for user in users {
            if user.is_store {
                continue;
            }
            let (load_dest, load_ty) = match &self.func.blocks[user.loc.0].instructions[user.loc.1] {
                Instruction::Load { dest, ty, .. } => (*dest, *ty),
                _ => unreachable!("non-store user is not a load"),
            };

            if val_is_inst {
                if user.loc.0 == store_block {
                    // Same block: compare positions. A load above the
                    // store cannot be rewritten from here.
                    let si = match store_index {
                        Some(si) => si,
                        None => {
                            let si = access_index.index_of(
                                self.func,
                                &self.dead,
                                &self.alloca_values,
                                store_loc,
                            );
                            store_index = Some(si);
                            si
                        }
                    };
                    let li =
                        access_index.index_of(self.func, &self.dead, &self.alloca_values, user.loc);
                    if si > li {
                        info.using_blocks.push(store_block);
                        continue;
                    }
                } else if !self.cfg.domtree.dominates(store_block, user.loc.0) {
                    info.using_blocks.push(user.loc.0);
                    continue;
                }
            }

            // A load feeding its own store can only sit in unreachable
            // code; poison it rather than building a cycle.
            let repl = if store_val.as_value() == Some(load_dest) {
                Operand::Poison(load_ty)
            } else {
                store_val
            };
            self.replace_all_uses(load_dest, repl);
            self.erase(user.loc);
            access_index.forget(user.loc);
        }

        if !info.using_blocks.is_empty() {
            return false;
        }

        self.erase(store_loc);
        access_index.forget(store_loc);
        self.erase(alloca.loc);
        true
    }

    // ── Fast path: one block ─────────────────────────────────────────────

    /// All accesses share one block: each load takes the value of the
    /// nearest store above it. A load above every store may observe a
    /// value stored on a previous trip around a loop, so that case
    /// declines and leaves the cell to the general path.
    fn promote_single_block_alloca(
        &mut self,
        alloca: AllocaRef,
        access_index: &mut BlockAccessIndex,
    ) -> bool {
        // Re-collect: the single-store path may already have erased some
        // loads before declining.
        let users = self.collect_users(alloca.value);

        let mut stores_by_index: SmallVec<[(usize, Operand); 16]> = users
            .iter()
            .filter(|u| u.is_store)
            .map(|u| {
                let val = match &self.func.blocks[u.loc.0].instructions[u.loc.1] {
                    Instruction::Store { val, .. } => *val,
                    _ => unreachable!(),
                };
                let idx = access_index.index_of(self.func, &self.dead, &self.alloca_values, u.loc);
                (idx, val)
            })
            .collect();
        stores_by_index.sort_unstable_by_key(|&(idx, _)| idx);

        for user in &users {
            if user.is_store {
                continue;
            }
            let (load_dest, load_ty) = match &self.func.blocks[user.loc.0].instructions[user.loc.1] {
                Instruction::Load { dest, ty, .. } => (*dest, *ty),
                _ => unreachable!(),
            };
            let li = access_index.index_of(self.func, &self.dead, &self.alloca_values, user.loc);

            // Nearest store strictly above the load.
            let pos = stores_by_index.partition_point(|&(idx, _)| idx < li);
            let repl = if pos == 0 {
                if stores_by_index.is_empty() {
                    // Never stored: the load sees an unspecified value.
                    Operand::Undef(load_ty)
                } else {
                    return false;
                }
            } else {
                stores_by_index[pos - 1].1
            };
            let repl = if repl.as_value() == Some(load_dest) {
                Operand::Poison(load_ty)
            } else {
                repl
            };

            self.replace_all_uses(load_dest, repl);
            self.erase(user.loc);
            access_index.forget(user.loc);
        }

        for user in &users {
            if user.is_store {
                self.erase(user.loc);
                access_index.forget(user.loc);
            }
        }
        self.erase(alloca.loc);
        true
    }

    // ── Live-in analysis ─────────────────────────────────────────────────

    /// Blocks from which a load of the cell is reachable without passing
    /// a store first. Phi nodes are only worth placing in these.
    fn compute_live_in_blocks(
        &self,
        cell: Value,
        info: &AllocaInfo,
        def_blocks: &FxHashSet<usize>,
    ) -> FxHashSet<usize> {
        let mut worklist: Vec<usize> = info.using_blocks.to_vec();

        // A block that stores before its first load redefines the cell;
        // the value is not live into it.
        let mut i = 0;
        while i < worklist.len() {
            let block = worklist[i];
            if !def_blocks.contains(&block) {
                i += 1;
                continue;
            }
            let mut keep = true;
            for (ii, inst) in self.func.blocks[block].instructions.iter().enumerate() {
                if self.dead[block].contains(&ii) {
                    continue;
                }
                match inst {
                    Instruction::Store { ptr, .. } if ptr.as_value() == Some(cell) => {
                        keep = false;
                        break;
                    }
                    Instruction::Load { ptr, .. } if ptr.as_value() == Some(cell) => {
                        break;
                    }
                    _ => {}
                }
            }
            if keep {
                i += 1;
            } else {
                worklist.swap_remove(i);
            }
        }

        // Walk predecessors until a defining block bounds the region.
        let mut live_in = FxHashSet::default();
        while let Some(block) = worklist.pop() {
            if !live_in.insert(block) {
                continue;
            }
            for &p in self.cfg.preds.row(block) {
                let p = p as usize;
                if def_blocks.contains(&p) {
                    continue;
                }
                worklist.push(p);
            }
        }
        live_in
    }

    // ── Phi placement ────────────────────────────────────────────────────

    /// Register a phi for the cell at the head of `block`, unless one is
    /// already registered. Returns true if a phi was created.
    fn queue_phi_node(&mut self, block: usize, alloca_num: usize) -> bool {
        let key = (block as u32, alloca_num as u32);
        if self.phi_registry.contains_key(&key) {
            return false;
        }
        let ty = self.allocas[alloca_num].ty;
        let dest = self.func.new_value();
        let slot = self.phis.len();
        self.phis.push(PhiSlot {
            block,
            alloca: alloca_num,
            dest,
            ty,
            incoming: Vec::with_capacity(self.cfg.num_preds(block)),
            live: true,
        });
        self.phi_registry.insert(key, slot);
        self.phi_of_value.insert(dest, slot);
        true
    }

    // ── Renaming ─────────────────────────────────────────────────────────

    /// Walk the CFG from the entry block, replacing loads with the
    /// current value of their cell and recording stores as new current
    /// values. Phi updates run once per edge; block bodies are rewritten
    /// once. Load replacements are collected and applied in one sweep at
    /// the end, which also rewrites uses sitting in blocks visited before
    /// the defining load (pre-existing phis included).
    fn rename(&mut self) {
        // Until a store is seen on the path, each cell holds undef.
        let initial: Vec<Operand> = self.allocas.iter().map(|a| Operand::Undef(a.ty)).collect();

        let mut replaced: FxHashMap<Value, Operand> = FxHashMap::default();
        let mut worklist = vec![RenameJob { block: 0, pred: usize::MAX, values: initial }];

        while let Some(job) = worklist.pop() {
            let RenameJob { mut block, mut pred, mut values } = job;
            loop {
                // Feed this edge into the phis registered for the block.
                // This runs on every edge, revisit or not: each edge owes
                // every inserted phi exactly one entry per terminator
                // slot that takes it here.
                if pred != usize::MAX {
                    let target_label = self.func.blocks[block].label;
                    let pred_label = self.func.blocks[pred].label;
                    let range =
                        self.phi_registry.range((block as u32, 0)..=(block as u32, u32::MAX));
                    let slots: SmallVec<[usize; 4]> = range.map(|(_, &slot)| slot).collect();
                    if !slots.is_empty() {
                        let num_edges = self.func.blocks[pred]
                            .terminator
                            .successor_slots()
                            .iter()
                            .filter(|s| **s == target_label)
                            .count();
                        debug_assert!(num_edges > 0, "no edge from chosen predecessor");
                        for slot in slots {
                            let phi = &mut self.phis[slot];
                            for _ in 0..num_edges {
                                phi.incoming.push((values[phi.alloca], pred_label));
                            }
                            values[phi.alloca] = Operand::Value(phi.dest);
                        }
                    }
                }

                if !self.visited.insert(block) {
                    break;
                }

                // Rewrite the block body once.
                for ii in 0..self.func.blocks[block].instructions.len() {
                    if self.dead[block].contains(&ii) {
                        continue;
                    }
                    enum Access {
                        Load { dest: Value, cell: Value },
                        Store { val: Operand, cell: Value },
                    }
                    let access = match &self.func.blocks[block].instructions[ii] {
                        Instruction::Load { dest, ptr, .. } => ptr
                            .as_value()
                            .map(|cell| Access::Load { dest: *dest, cell }),
                        Instruction::Store { val, ptr, .. } => ptr
                            .as_value()
                            .map(|cell| Access::Store { val: *val, cell }),
                        _ => None,
                    };
                    match access {
                        Some(Access::Load { dest, cell }) => {
                            if let Some(&a) = self.alloca_lookup.get(&cell) {
                                replaced.insert(dest, values[a]);
                                self.erase((block, ii));
                            }
                        }
                        Some(Access::Store { val, cell }) => {
                            if let Some(&a) = self.alloca_lookup.get(&cell) {
                                // The stored operand may itself be a load
                                // replaced just above; record its final
                                // value.
                                values[a] = resolve(&replaced, val);
                                self.erase((block, ii));
                            }
                        }
                        None => {}
                    }
                }

                let succs = self.func.blocks[block].terminator.successors();
                let mut succ_indices = succs
                    .iter()
                    .filter_map(|label| self.cfg.label_to_idx.get(label).copied());
                let Some(first) = succ_indices.next() else { break };

                pred = block;
                for succ in succ_indices {
                    worklist.push(RenameJob { block: succ, pred, values: values.clone() });
                }
                // Take the first successor without cloning the values.
                block = first;
            }
        }

        self.apply_replacements(&replaced);
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    /// Erase the cells themselves. Accesses the rename walk never saw sit
    /// in unreachable code: their loads become poison, their stores just
    /// disappear.
    fn erase_cells(&mut self) {
        for i in 0..self.allocas.len() {
            let alloca = self.allocas[i];
            for user in self.collect_users(alloca.value) {
                if !user.is_store {
                    let dest = match &self.func.blocks[user.loc.0].instructions[user.loc.1] {
                        Instruction::Load { dest, .. } => *dest,
                        _ => unreachable!(),
                    };
                    self.replace_all_uses(dest, Operand::Poison(alloca.ty));
                }
                self.erase(user.loc);
            }
            self.erase(alloca.loc);
        }
    }

    /// Fold phis that merge a single value and/or undefs, to a fixpoint:
    /// folding one phi can expose another. Registry order is
    /// deterministic, so the resulting def-use chains are reproducible.
    fn simplify_trivial_phis(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            let keys: Vec<(u32, u32)> = self.phi_registry.keys().copied().collect();
            for key in keys {
                let Some(&slot) = self.phi_registry.get(&key) else { continue };
                let Some(folded) = self.try_fold_phi(slot) else { continue };
                let dest = self.phis[slot].dest;
                self.replace_all_uses(dest, folded);
                self.phis[slot].live = false;
                self.phi_registry.remove(&key);
                self.phi_of_value.remove(&dest);
                changed = true;
            }
        }
    }

    /// The folded value of a trivial phi, or None to keep it.
    ///
    /// Two structurally identical phis must never be unified here: the
    /// surviving one need not be def-reachable from the other's block.
    /// Only operand-level folding is done.
    fn try_fold_phi(&self, slot: usize) -> Option<Operand> {
        let phi = &self.phis[slot];

        let mut common: Option<Operand> = None;
        let mut has_undef_input = false;
        for (op, _) in &phi.incoming {
            // Self-edges contribute nothing.
            if op.as_value() == Some(phi.dest) {
                continue;
            }
            if op.is_undef_like() {
                has_undef_input = true;
                continue;
            }
            match &common {
                None => common = Some(*op),
                Some(c) if c.same(op) => {}
                Some(_) => return None,
            }
        }

        // Only undefs and self-edges: the phi itself is unspecified.
        let Some(common) = common else {
            return Some(Operand::Undef(phi.ty));
        };

        if has_undef_input {
            // phi(v, undef) may only fold to v if v's definition
            // dominates the phi; otherwise the fold would materialize a
            // use above the definition.
            if self.value_dominates_phi(common, slot) {
                Some(common)
            } else {
                None
            }
        } else {
            Some(common)
        }
    }

    /// Whether the operand's definition dominates the phi at `slot`.
    fn value_dominates_phi(&self, op: Operand, slot: usize) -> bool {
        let Some(v) = op.as_value() else {
            return true; // constants and markers dominate everything
        };
        let phi_block = self.phis[slot].block;

        if let Some(&def_slot) = self.phi_of_value.get(&v) {
            let def_phi_block = self.phis[def_slot].block;
            if def_phi_block != phi_block {
                return self.cfg.domtree.dominates(def_phi_block, phi_block);
            }
            // Two inserted phis in one block: creation order is layout
            // order at the block head.
            return def_slot < slot;
        }
        match self.def_block.get(&v) {
            // An ordinary instruction in the phi's own block sits below
            // the block head, so it cannot dominate the phi.
            Some(&db) if db == phi_block => false,
            Some(&db) => self.cfg.domtree.dominates(db, phi_block),
            // Parameters dominate everything.
            None => true,
        }
    }

    /// The rename walk feeds phis only along edges from reachable code.
    /// Any inserted phi still short of entries has unreachable
    /// predecessors; give each missing edge a poison entry so arity
    /// matches the predecessor slot count again.
    fn fill_missing_incoming(&mut self) {
        let keys: Vec<(u32, u32)> = self.phi_registry.keys().copied().collect();
        let mut i = 0;
        while i < keys.len() {
            let block = keys[i].0;
            let mut group_end = i;
            while group_end < keys.len() && keys[group_end].0 == block {
                group_end += 1;
            }
            let block = block as usize;

            let first_slot = self.phi_registry[&keys[i]];
            let num_short = self.phis[first_slot].incoming.len();
            let expected = self.cfg.num_preds(block);
            if num_short == expected {
                i = group_end;
                continue;
            }
            debug_assert!(num_short < expected, "phi has more entries than predecessor slots");

            // Missing predecessors: the slot multiset minus the entries
            // already present, matched by block number.
            let mut missing: Vec<usize> = self.cfg.preds.row(block).iter().map(|&p| p as usize).collect();
            missing.sort_unstable();
            for (_, pred_label) in &self.phis[first_slot].incoming {
                let p = self.cfg.label_to_idx[pred_label];
                let pos = missing
                    .binary_search(&p)
                    .expect("phi entry for a block that is not a predecessor");
                missing.remove(pos);
            }

            // Every inserted phi in the block showing the same deficit
            // gets the same fill.
            for key in &keys[i..group_end] {
                let slot = self.phi_registry[key];
                if self.phis[slot].incoming.len() != num_short {
                    continue;
                }
                let ty = self.phis[slot].ty;
                for &p in &missing {
                    let label = self.func.blocks[p].label;
                    self.phis[slot].incoming.push((Operand::Poison(ty), label));
                }
            }
            i = group_end;
        }
    }

    // ── IR mutation primitives ───────────────────────────────────────────

    /// Mark an instruction erased. Physical removal happens in `flush`.
    fn erase(&mut self, loc: Loc) {
        let newly = self.dead[loc.0].insert(loc.1);
        debug_assert!(newly, "instruction erased twice");
    }

    /// Replace every remaining use of `old` with `new`, in live
    /// instructions, terminators, and inserted phis.
    fn replace_all_uses(&mut self, old: Value, new: Operand) {
        debug_assert!(new.as_value() != Some(old), "value replaced with itself");
        for (bi, block) in self.func.blocks.iter_mut().enumerate() {
            for (ii, inst) in block.instructions.iter_mut().enumerate() {
                if self.dead[bi].contains(&ii) {
                    continue;
                }
                inst.for_each_operand_mut(|op| {
                    if op.as_value() == Some(old) {
                        *op = new;
                    }
                });
            }
            block.terminator.for_each_operand_mut(|op| {
                if op.as_value() == Some(old) {
                    *op = new;
                }
            });
        }
        for phi in &mut self.phis {
            if !phi.live {
                continue;
            }
            for (op, _) in &mut phi.incoming {
                if op.as_value() == Some(old) {
                    *op = new;
                }
            }
        }
    }

    /// Apply the rename walk's load replacements everywhere.
    fn apply_replacements(&mut self, replaced: &FxHashMap<Value, Operand>) {
        if replaced.is_empty() {
            return;
        }
        for (bi, block) in self.func.blocks.iter_mut().enumerate() {
            for (ii, inst) in block.instructions.iter_mut().enumerate() {
                if self.dead[bi].contains(&ii) {
                    continue;
                }
                inst.for_each_operand_mut(|op| *op = resolve(replaced, *op));
            }
            block.terminator.for_each_operand_mut(|op| *op = resolve(replaced, *op));
        }
        for phi in &mut self.phis {
            if !phi.live {
                continue;
            }
            for (op, _) in &mut phi.incoming {
                *op = resolve(replaced, *op);
            }
        }
    }

    /// Physically remove erased instructions and splice the surviving
    /// phis into their blocks' heads, in creation order, ahead of any
    /// pre-existing phis.
    fn flush(&mut self) {
        for (bi, block) in self.func.blocks.iter_mut().enumerate() {
            let mut head: Vec<Instruction> = self
                .phis
                .iter()
                .filter(|p| p.live && p.block == bi)
                .map(|p| Instruction::Phi { dest: p.dest, ty: p.ty, incoming: p.incoming.clone() })
                .collect();
            if head.is_empty() && self.dead[bi].is_empty() {
                continue;
            }
            let old = std::mem::take(&mut block.instructions);
            for (ii, inst) in old.into_iter().enumerate() {
                if !self.dead[bi].contains(&ii) {
                    head.push(inst);
                }
            }
            block.instructions = head;
            self.dead[bi].clear();
        }
        self.phis.clear();
        self.phi_registry.clear();
        self.phi_of_value.clear();
    }
}

/// Chase an operand through the load-replacement map. Replacements are
/// recorded fully resolved, so this terminates immediately in practice;
/// the loop is belt and braces.
fn resolve(replaced: &FxHashMap<Value, Operand>, mut op: Operand) -> Operand {
    while let Some(v) = op.as_value() {
        match replaced.get(&v) {
            Some(&next) => op = next,
            None => break,
        }
    }
    op
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::constants::IrConst;
    use crate::ir::instruction::{BasicBlock, CallInfo, Terminator};
    use crate::ir::module::IrParam;
    use crate::ir::print::print_module;
    use crate::ir::verify::verify_function;

    fn c32(v: i32) -> Operand {
        Operand::Const(IrConst::I32(v))
    }

    fn val(n: u32) -> Operand {
        Operand::Value(Value(n))
    }

    fn block(id: u32, instructions: Vec<Instruction>, terminator: Terminator) -> BasicBlock {
        BasicBlock { label: BlockId(id), instructions, terminator }
    }

    fn alloca(dest: u32) -> Instruction {
        Instruction::Alloca { dest: Value(dest), ty: IrType::I32 }
    }

    fn store(v: Operand, ptr: u32) -> Instruction {
        Instruction::Store { val: v, ptr: Operand::Value(Value(ptr)), ty: IrType::I32 }
    }

    fn load(dest: u32, ptr: u32) -> Instruction {
        Instruction::Load { dest: Value(dest), ptr: Operand::Value(Value(ptr)), ty: IrType::I32 }
    }

    fn add(dest: u32, lhs: Operand, rhs: Operand) -> Instruction {
        Instruction::BinOp {
            dest: Value(dest),
            op: crate::ir::ops::IrBinOp::Add,
            lhs,
            rhs,
            ty: IrType::I32,
        }
    }

    fn cond_br(cond: Operand, t: u32, f: u32) -> Terminator {
        Terminator::CondBranch { cond, true_label: BlockId(t), false_label: BlockId(f) }
    }

    fn func_i32(params: Vec<IrParam>, blocks: Vec<BasicBlock>) -> IrFunction {
        let mut func = IrFunction::new("f".to_string(), IrType::I32, params);
        func.blocks = blocks;
        func
    }

    fn param_i32(value: u32) -> IrParam {
        IrParam { value: Value(value), ty: IrType::I32 }
    }

    fn assert_fully_promoted(func: &IrFunction) {
        verify_function(func).unwrap();
        for block in &func.blocks {
            for inst in &block.instructions {
                assert!(
                    !matches!(
                        inst,
                        Instruction::Alloca { .. } | Instruction::Load { .. } | Instruction::Store { .. }
                    ),
                    "memory access survived promotion: {:?}",
                    inst
                );
            }
        }
    }

    /// int f() { int x = 42; return x; }
    #[test]
    fn test_straight_line_single_store() {
        let mut func = func_i32(
            vec![],
            vec![block(
                0,
                vec![alloca(0), store(c32(42), 0), load(1, 0)],
                Terminator::Return(Some(val(1))),
            )],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert_fully_promoted(&func);
        assert!(func.blocks[0].instructions.is_empty());
        assert!(matches!(
            func.blocks[0].terminator,
            Terminator::Return(Some(Operand::Const(IrConst::I32(42))))
        ));
    }

    /// if (c) x = 1; else x = 2; return x;  => phi at the join.
    #[test]
    fn test_if_else_two_stores() {
        let mut func = func_i32(
            vec![param_i32(0)],
            vec![
                block(0, vec![alloca(1)], cond_br(val(0), 1, 2)),
                block(1, vec![store(c32(1), 1)], Terminator::Branch(BlockId(3))),
                block(2, vec![store(c32(2), 1)], Terminator::Branch(BlockId(3))),
                block(3, vec![load(2, 1)], Terminator::Return(Some(val(2)))),
            ],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert_fully_promoted(&func);

        let join = &func.blocks[3];
        assert_eq!(join.instructions.len(), 1);
        match &join.instructions[0] {
            Instruction::Phi { dest, incoming, .. } => {
                assert_eq!(*dest, Value(3));
                assert_eq!(incoming.len(), 2);
                assert!(matches!(incoming[0], (Operand::Const(IrConst::I32(1)), BlockId(1))));
                assert!(matches!(incoming[1], (Operand::Const(IrConst::I32(2)), BlockId(2))));
            }
            other => panic!("expected phi at the join, got {:?}", other),
        }
        assert!(matches!(join.terminator, Terminator::Return(Some(Operand::Value(Value(3))))));
    }

    /// sum = 0; while (sum < 10) sum = sum + 1; return sum;
    #[test]
    fn test_loop_carried_value() {
        let mut func = func_i32(
            vec![],
            vec![
                block(0, vec![alloca(0), store(c32(0), 0)], Terminator::Branch(BlockId(1))),
                block(
                    1,
                    vec![
                        load(1, 0),
                        Instruction::Cmp {
                            dest: Value(2),
                            op: crate::ir::ops::IrCmpOp::Slt,
                            lhs: val(1),
                            rhs: c32(10),
                            ty: IrType::I32,
                        },
                    ],
                    cond_br(val(2), 2, 3),
                ),
                block(
                    2,
                    vec![load(3, 0), add(4, val(3), c32(1)), store(val(4), 0)],
                    Terminator::Branch(BlockId(1)),
                ),
                block(3, vec![load(5, 0)], Terminator::Return(Some(val(5)))),
            ],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert_fully_promoted(&func);

        // One phi in the header, merging the init and the latch value.
        let header = &func.blocks[1];
        match &header.instructions[0] {
            Instruction::Phi { dest, incoming, .. } => {
                assert_eq!(*dest, Value(6));
                assert_eq!(incoming.len(), 2);
                assert!(matches!(incoming[0], (Operand::Const(IrConst::I32(0)), BlockId(0))));
                assert!(matches!(incoming[1], (Operand::Value(Value(4)), BlockId(2))));
            }
            other => panic!("expected phi in the loop header, got {:?}", other),
        }
        // The body add now reads the phi directly.
        assert!(matches!(
            func.blocks[2].instructions[0],
            Instruction::BinOp { lhs: Operand::Value(Value(6)), .. }
        ));
        // No second phi anywhere.
        let phi_count: usize = func
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| matches!(i, Instruction::Phi { .. }))
            .count();
        assert_eq!(phi_count, 1);
        assert!(matches!(
            func.blocks[3].terminator,
            Terminator::Return(Some(Operand::Value(Value(6))))
        ));
    }

    /// A load above the only (instruction-valued) store reads an
    /// unspecified value: both fast paths decline and the general path
    /// hands the load undef.
    #[test]
    fn test_read_before_write_single_block() {
        let mut func = func_i32(
            vec![param_i32(0)],
            vec![block(
                0,
                vec![alloca(1), load(2, 1), add(3, val(0), c32(1)), store(val(3), 1)],
                Terminator::Return(Some(val(2))),
            )],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert_fully_promoted(&func);
        // The add stays (promotion does not clean up dead arithmetic);
        // the returned value is undef.
        assert_eq!(func.blocks[0].instructions.len(), 1);
        assert!(matches!(
            func.blocks[0].terminator,
            Terminator::Return(Some(Operand::Undef(IrType::I32)))
        ));
    }

    /// A constant store refines the undefined read-before-write load, so
    /// the single-store rewrite takes it without dominance checks.
    #[test]
    fn test_read_before_write_constant_store() {
        let mut func = func_i32(
            vec![],
            vec![block(
                0,
                vec![alloca(0), load(1, 0), store(c32(7), 0)],
                Terminator::Return(Some(val(1))),
            )],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert_fully_promoted(&func);
        assert!(matches!(
            func.blocks[0].terminator,
            Terminator::Return(Some(Operand::Const(IrConst::I32(7))))
        ));
    }

    /// Loads in unreachable code become poison; the cell still dies.
    #[test]
    fn test_unreachable_use_becomes_poison() {
        let mut func = func_i32(
            vec![param_i32(0)],
            vec![
                block(0, vec![alloca(1)], cond_br(val(0), 1, 2)),
                block(1, vec![store(c32(1), 1)], Terminator::Branch(BlockId(3))),
                block(2, vec![store(c32(2), 1)], Terminator::Branch(BlockId(3))),
                block(3, vec![load(2, 1)], Terminator::Return(Some(val(2)))),
                // No edge leads here.
                block(4, vec![load(3, 1)], Terminator::Return(Some(val(3)))),
            ],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert_fully_promoted(&func);
        assert!(func.blocks[4].instructions.is_empty());
        assert!(matches!(
            func.blocks[4].terminator,
            Terminator::Return(Some(Operand::Poison(IrType::I32)))
        ));
        // The reachable join still promoted to a phi.
        assert!(matches!(func.blocks[3].instructions[0], Instruction::Phi { .. }));
    }

    /// A switch with two cases targeting one block contributes one phi
    /// entry per edge, and the predecessor count agrees.
    #[test]
    fn test_switch_duplicate_edges() {
        let mut func = func_i32(
            vec![param_i32(0), param_i32(1)],
            vec![
                block(0, vec![alloca(2)], cond_br(val(0), 1, 2)),
                block(
                    1,
                    vec![store(c32(1), 2)],
                    Terminator::Switch {
                        val: val(1),
                        cases: vec![(5, BlockId(4)), (6, BlockId(4))],
                        default: BlockId(3),
                    },
                ),
                block(2, vec![store(c32(2), 2)], Terminator::Branch(BlockId(4))),
                block(3, vec![], Terminator::Return(Some(c32(0)))),
                block(4, vec![load(3, 2)], Terminator::Return(Some(val(3)))),
            ],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert_fully_promoted(&func);

        match &func.blocks[4].instructions[0] {
            Instruction::Phi { incoming, .. } => {
                assert_eq!(incoming.len(), 3);
                assert!(matches!(incoming[0], (Operand::Const(IrConst::I32(1)), BlockId(1))));
                assert!(matches!(incoming[1], (Operand::Const(IrConst::I32(1)), BlockId(1))));
                assert!(matches!(incoming[2], (Operand::Const(IrConst::I32(2)), BlockId(2))));
            }
            other => panic!("expected phi, got {:?}", other),
        }
    }

    /// Passing the cell's address to a call keeps it in memory.
    #[test]
    fn test_address_taken_not_promoted() {
        let mut func = func_i32(
            vec![],
            vec![block(
                0,
                vec![
                    alloca(0),
                    store(c32(42), 0),
                    Instruction::Call {
                        func: "use_ptr".to_string(),
                        info: CallInfo {
                            dest: None,
                            args: vec![val(0)],
                            arg_types: vec![IrType::Ptr],
                            return_type: IrType::Void,
                        },
                    },
                    load(1, 0),
                ],
                Terminator::Return(Some(val(1))),
            )],
        );
        assert!(!is_alloca_promotable(&func, Value(0), IrType::I32));
        assert_eq!(promote_function(&mut func), 0);
        assert!(matches!(func.blocks[0].instructions[0], Instruction::Alloca { .. }));
    }

    /// A load at a different width than the cell disqualifies it.
    #[test]
    fn test_mistyped_access_not_promoted() {
        let func = func_i32(
            vec![],
            vec![block(
                0,
                vec![
                    alloca(0),
                    store(c32(1), 0),
                    Instruction::Load { dest: Value(1), ptr: val(0), ty: IrType::I64 },
                ],
                Terminator::Return(Some(c32(0))),
            )],
        );
        assert!(!is_alloca_promotable(&func, Value(0), IrType::I32));
    }

    /// Storing the cell pointer itself anywhere disqualifies it.
    #[test]
    fn test_escaping_store_not_promoted() {
        let func = func_i32(
            vec![],
            vec![block(
                0,
                vec![
                    alloca(0),
                    Instruction::Alloca { dest: Value(1), ty: IrType::Ptr },
                    Instruction::Store { val: val(0), ptr: val(1), ty: IrType::Ptr },
                ],
                Terminator::Return(Some(c32(0))),
            )],
        );
        assert!(!is_alloca_promotable(&func, Value(0), IrType::I32));
        // The pointer-typed cell itself is fine: its users are one store
        // into it.
        assert!(is_alloca_promotable(&func, Value(1), IrType::Ptr));
    }

    #[test]
    fn test_unused_alloca_is_deleted() {
        let mut func = func_i32(
            vec![],
            vec![block(0, vec![alloca(0)], Terminator::Return(Some(c32(0))))],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert!(func.blocks[0].instructions.is_empty());
    }

    /// Single store whose value is an instruction that does not dominate
    /// one load: partial rewrite, then a phi merging the value with
    /// undef from the store-free path.
    #[test]
    fn test_single_store_partial_then_phi() {
        let mut func = func_i32(
            vec![param_i32(0)],
            vec![
                block(0, vec![alloca(1)], cond_br(val(0), 1, 2)),
                block(
                    1,
                    vec![add(2, val(0), c32(1)), store(val(2), 1)],
                    Terminator::Branch(BlockId(3)),
                ),
                block(2, vec![], Terminator::Branch(BlockId(3))),
                block(3, vec![load(3, 1)], Terminator::Return(Some(val(3)))),
            ],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert_fully_promoted(&func);

        match &func.blocks[3].instructions[0] {
            Instruction::Phi { dest, incoming, .. } => {
                assert_eq!(incoming.len(), 2);
                assert!(matches!(incoming[0], (Operand::Value(Value(2)), BlockId(1))));
                assert!(matches!(incoming[1], (Operand::Undef(IrType::I32), BlockId(2))));
                assert!(matches!(
                    func.blocks[3].terminator,
                    Terminator::Return(Some(Operand::Value(d))) if d == *dest
                ));
            }
            other => panic!("expected phi, got {:?}", other),
        }
    }

    /// Both arms store the same constant: the phi folds away.
    #[test]
    fn test_trivial_phi_folds_to_common_value() {
        let mut func = func_i32(
            vec![param_i32(0)],
            vec![
                block(0, vec![alloca(1)], cond_br(val(0), 1, 2)),
                block(1, vec![store(c32(5), 1)], Terminator::Branch(BlockId(3))),
                block(2, vec![store(c32(5), 1)], Terminator::Branch(BlockId(3))),
                block(3, vec![load(2, 1)], Terminator::Return(Some(val(2)))),
            ],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert_fully_promoted(&func);
        assert!(func.blocks[3].instructions.is_empty());
        assert!(matches!(
            func.blocks[3].terminator,
            Terminator::Return(Some(Operand::Const(IrConst::I32(5))))
        ));
    }

    /// phi(v, undef) folds to v when v's definition dominates the phi.
    #[test]
    fn test_phi_with_undef_folds_when_value_dominates() {
        let mut func = func_i32(
            vec![param_i32(0)],
            vec![
                block(0, vec![alloca(1), add(2, val(0), c32(0))], cond_br(val(0), 1, 2)),
                block(1, vec![store(val(2), 1)], Terminator::Branch(BlockId(3))),
                block(2, vec![], Terminator::Branch(BlockId(3))),
                block(3, vec![load(3, 1)], Terminator::Return(Some(val(3)))),
            ],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert_fully_promoted(&func);
        assert!(func.blocks[3].instructions.is_empty());
        assert!(matches!(
            func.blocks[3].terminator,
            Terminator::Return(Some(Operand::Value(Value(2))))
        ));
    }

    /// Storing undef everywhere leaves nothing but undef: the phi folds
    /// to the marker itself.
    #[test]
    fn test_all_undef_phi_folds_to_undef() {
        let undef_store = || Instruction::Store {
            val: Operand::Undef(IrType::I32),
            ptr: val(1),
            ty: IrType::I32,
        };
        let mut func = func_i32(
            vec![param_i32(0)],
            vec![
                block(0, vec![alloca(1)], cond_br(val(0), 1, 2)),
                block(1, vec![undef_store()], Terminator::Branch(BlockId(3))),
                block(2, vec![undef_store()], Terminator::Branch(BlockId(3))),
                block(3, vec![load(2, 1)], Terminator::Return(Some(val(2)))),
            ],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert_fully_promoted(&func);
        assert!(func.blocks[3].instructions.is_empty());
        assert!(matches!(
            func.blocks[3].terminator,
            Terminator::Return(Some(Operand::Undef(IrType::I32)))
        ));
    }

    /// Several stores in one block: each load binary-searches the
    /// nearest store above it.
    #[test]
    fn test_single_block_multiple_stores() {
        let mut func = func_i32(
            vec![],
            vec![block(
                0,
                vec![
                    alloca(0),
                    store(c32(1), 0),
                    load(1, 0),
                    store(c32(2), 0),
                    load(2, 0),
                    add(3, val(1), val(2)),
                ],
                Terminator::Return(Some(val(3))),
            )],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert_fully_promoted(&func);
        assert_eq!(func.blocks[0].instructions.len(), 1);
        assert!(matches!(
            func.blocks[0].instructions[0],
            Instruction::BinOp {
                lhs: Operand::Const(IrConst::I32(1)),
                rhs: Operand::Const(IrConst::I32(2)),
                ..
            }
        ));
    }

    /// Promotion leaves the CFG alone and running it again changes
    /// nothing.
    #[test]
    fn test_idempotent_and_cfg_preserved() {
        let build = || {
            func_i32(
                vec![param_i32(0)],
                vec![
                    block(0, vec![alloca(1)], cond_br(val(0), 1, 2)),
                    block(1, vec![store(c32(1), 1)], Terminator::Branch(BlockId(3))),
                    block(2, vec![store(c32(2), 1)], Terminator::Branch(BlockId(3))),
                    block(3, vec![load(2, 1)], Terminator::Return(Some(val(2)))),
                ],
            )
        };
        let mut func = build();
        let terms_before: Vec<String> = func.blocks.iter().map(|b| format!("{:?}", b.terminator)).collect();
        promote_function(&mut func);
        let terms_after: Vec<String> = func.blocks.iter().map(|b| format!("{:?}", b.terminator)).collect();
        // The join's return now names the phi, every branch is untouched.
        assert_eq!(terms_before[..3], terms_after[..3]);

        let mut module = IrModule::new();
        module.functions.push(func);
        let once = print_module(&module);
        assert_eq!(promote_allocas(&mut module), 0);
        assert_eq!(print_module(&module), once);
    }

    /// Identical input produces identical output, value ids included.
    #[test]
    fn test_deterministic() {
        let build = || {
            let mut module = IrModule::new();
            module.functions.push(func_i32(
                vec![param_i32(0), param_i32(1)],
                vec![
                    block(0, vec![alloca(2), alloca(3), store(c32(1), 2), store(c32(9), 3)], cond_br(val(0), 1, 2)),
                    block(1, vec![store(c32(2), 2)], Terminator::Branch(BlockId(3))),
                    block(2, vec![store(c32(3), 3)], Terminator::Branch(BlockId(3))),
                    block(3, vec![load(4, 2), load(5, 3), add(6, val(4), val(5))], Terminator::Return(Some(val(6)))),
                ],
            ));
            module
        };
        let mut a = build();
        let mut b = build();
        promote_allocas(&mut a);
        promote_allocas(&mut b);
        assert_eq!(print_module(&a), print_module(&b));
        for func in &a.functions {
            verify_function(func).unwrap();
        }
    }

    /// A phi that was already in the input IR at the block where an
    /// inserted phi lands is left alone by the walk: it receives no edge
    /// entries, the registry never tracks it, and its own operands are
    /// only touched where they named a promoted load.
    #[test]
    fn test_pre_existing_phi_at_insertion_block() {
        // bb1 carries a hand-written phi whose latch operand is the load
        // of the cell in bb2; the cell itself needs an inserted phi at
        // bb1 as well (stores in bb0 and bb2).
        let mut func = func_i32(
            vec![],
            vec![
                block(0, vec![alloca(0), store(c32(7), 0)], Terminator::Branch(BlockId(1))),
                block(
                    1,
                    vec![
                        Instruction::Phi {
                            dest: Value(1),
                            ty: IrType::I32,
                            incoming: vec![(c32(0), BlockId(0)), (val(3), BlockId(2))],
                        },
                        Instruction::Cmp {
                            dest: Value(2),
                            op: crate::ir::ops::IrCmpOp::Slt,
                            lhs: val(1),
                            rhs: c32(10),
                            ty: IrType::I32,
                        },
                    ],
                    cond_br(val(2), 2, 3),
                ),
                block(
                    2,
                    vec![load(3, 0), add(4, val(3), val(1)), store(val(4), 0)],
                    Terminator::Branch(BlockId(1)),
                ),
                block(3, vec![load(5, 0)], Terminator::Return(Some(val(5)))),
            ],
        );
        assert_eq!(promote_function(&mut func), 1);
        assert_fully_promoted(&func);

        // The inserted phi sits first; the hand-written one follows.
        let header = &func.blocks[1];
        match &header.instructions[0] {
            Instruction::Phi { dest, incoming, .. } => {
                assert_eq!(*dest, Value(6));
                assert_eq!(incoming.len(), 2);
                assert!(matches!(incoming[0], (Operand::Const(IrConst::I32(7)), BlockId(0))));
                assert!(matches!(incoming[1], (Operand::Value(Value(4)), BlockId(2))));
            }
            other => panic!("expected the inserted phi first, got {:?}", other),
        }
        // The pre-existing phi kept its destination, arity, and entry
        // operand; only the operand that named the erased load now reads
        // the inserted phi instead.
        match &header.instructions[1] {
            Instruction::Phi { dest, incoming, .. } => {
                assert_eq!(*dest, Value(1));
                assert_eq!(incoming.len(), 2);
                assert!(matches!(incoming[0], (Operand::Const(IrConst::I32(0)), BlockId(0))));
                assert!(matches!(incoming[1], (Operand::Value(Value(6)), BlockId(2))));
            }
            other => panic!("expected the pre-existing phi second, got {:?}", other),
        }
        // The body add reads the inserted phi where it read the load.
        assert!(matches!(
            func.blocks[2].instructions[0],
            Instruction::BinOp {
                lhs: Operand::Value(Value(6)),
                rhs: Operand::Value(Value(1)),
                ..
            }
        ));
        assert!(matches!(
            func.blocks[3].terminator,
            Terminator::Return(Some(Operand::Value(Value(6))))
        ));
    }

    /// Two cells promoted together share the rename walk: each gets its
    /// own phi at the join, in cell order.
    #[test]
    fn test_two_cells_two_phis() {
        let mut func = func_i32(
            vec![param_i32(0)],
            vec![
                block(0, vec![alloca(1), alloca(2)], cond_br(val(0), 1, 2)),
                block(1, vec![store(c32(1), 1), store(c32(3), 2)], Terminator::Branch(BlockId(3))),
                block(2, vec![store(c32(2), 1), store(c32(4), 2)], Terminator::Branch(BlockId(3))),
                block(
                    3,
                    vec![load(3, 1), load(4, 2), add(5, val(3), val(4))],
                    Terminator::Return(Some(val(5))),
                ),
            ],
        );
        assert_eq!(promote_function(&mut func), 2);
        assert_fully_promoted(&func);

        let join = &func.blocks[3];
        assert_eq!(join.instructions.len(), 3);
        match (&join.instructions[0], &join.instructions[1]) {
            (
                Instruction::Phi { incoming: first, .. },
                Instruction::Phi { incoming: second, .. },
            ) => {
                assert!(matches!(first[0], (Operand::Const(IrConst::I32(1)), BlockId(1))));
                assert!(matches!(first[1], (Operand::Const(IrConst::I32(2)), BlockId(2))));
                assert!(matches!(second[0], (Operand::Const(IrConst::I32(3)), BlockId(1))));
                assert!(matches!(second[1], (Operand::Const(IrConst::I32(4)), BlockId(2))));
            }
            other => panic!("expected two phis, got {:?}", other),
        }
    }
}

