//! IR structural verifier.
//!
//! Checks the invariants the optimizer relies on and must preserve:
//! unique value definitions, resolvable branch targets, phi arity equal
//! to the predecessor slot count, phi incoming blocks matching the
//! actual predecessor multiset, phis grouped at block heads, and defs
//! dominating uses in reachable code. Uses inside unreachable blocks are
//! exempt from the dominance rule.

use rustc_hash::FxHashMap;

use crate::common::error::{Error, Result};
use super::analysis::CfgAnalysis;
use super::instruction::{Instruction, Operand, Value};
use super::module::{IrFunction, IrModule};

/// Verify every defined function in the module.
pub fn verify_module(module: &IrModule) -> Result<()> {
    for func in &module.functions {
        if func.is_declaration {
            continue;
        }
        verify_function(func).map_err(|message| Error::Verify {
            function: func.name.clone(),
            message,
        })?;
    }
    Ok(())
}

/// Verify a single function. Returns the first violation found.
pub fn verify_function(func: &IrFunction) -> std::result::Result<(), String> {
    if func.blocks.is_empty() {
        return Err("function has no blocks".to_string());
    }

    // Unique block labels, resolvable successor targets.
    let mut label_seen = FxHashMap::default();
    for (i, block) in func.blocks.iter().enumerate() {
        if let Some(prev) = label_seen.insert(block.label, i) {
            return Err(format!("duplicate block label {} (blocks {} and {})", block.label, prev, i));
        }
    }
    for block in &func.blocks {
        for slot in block.terminator.successor_slots() {
            if !label_seen.contains_key(&slot) {
                return Err(format!("{}: branch to unknown block {}", block.label, slot));
            }
        }
    }

    let cfg = CfgAnalysis::build(func);

    // Single definition per value; record def sites for dominance checks.
    // Params live at index usize::MAX (they dominate everything).
    let mut def_sites: FxHashMap<Value, (usize, usize)> = FxHashMap::default();
    for param in &func.params {
        if def_sites.insert(param.value, (usize::MAX, 0)).is_some() {
            return Err(format!("duplicate parameter value {}", param.value));
        }
    }
    for (bi, block) in func.blocks.iter().enumerate() {
        for (ii, inst) in block.instructions.iter().enumerate() {
            if let Some(dest) = inst.dest() {
                if def_sites.insert(dest, (bi, ii)).is_some() {
                    return Err(format!("{}: value {} defined more than once", block.label, dest));
                }
            }
        }
    }

    for (bi, block) in func.blocks.iter().enumerate() {
        // Phis must be grouped at the head of the block.
        let mut past_phis = false;
        for inst in &block.instructions {
            match inst {
                Instruction::Phi { .. } if past_phis => {
                    return Err(format!("{}: phi after non-phi instruction", block.label));
                }
                Instruction::Phi { .. } => {}
                _ => past_phis = true,
            }
        }

        // Phi arity and incoming-block multiset.
        let mut pred_slots: Vec<u32> = cfg.preds.row(bi).to_vec();
        pred_slots.sort_unstable();
        for inst in &block.instructions {
            if let Instruction::Phi { dest, incoming, .. } = inst {
                if incoming.len() != pred_slots.len() {
                    return Err(format!(
                        "{}: phi {} has {} incoming entries, block has {} predecessor slots",
                        block.label,
                        dest,
                        incoming.len(),
                        pred_slots.len()
                    ));
                }
                let mut incoming_idx: Vec<u32> = Vec::with_capacity(incoming.len());
                for (_, pred) in incoming {
                    match cfg.label_to_idx.get(pred) {
                        Some(&p) => incoming_idx.push(p as u32),
                        None => {
                            return Err(format!(
                                "{}: phi {} names unknown predecessor {}",
                                block.label, dest, pred
                            ))
                        }
                    }
                }
                incoming_idx.sort_unstable();
                if incoming_idx != pred_slots {
                    return Err(format!(
                        "{}: phi {} incoming blocks do not match predecessor slots",
                        block.label, dest
                    ));
                }
            }
        }

        // Defs dominate uses, for reachable blocks only.
        if !cfg.domtree.is_reachable(bi) {
            continue;
        }
        for (ii, inst) in block.instructions.iter().enumerate() {
            if let Instruction::Phi { incoming, .. } = inst {
                // A phi use must be available on the incoming edge: the
                // def has to dominate (or be inside) the predecessor.
                for (op, pred) in incoming {
                    if let Operand::Value(v) = op {
                        let p = cfg.label_to_idx[pred];
                        if !cfg.domtree.is_reachable(p) {
                            continue;
                        }
                        let (db, _) = match def_sites.get(v) {
                            Some(site) => *site,
                            None => return Err(format!("{}: use of undefined value {}", block.label, v)),
                        };
                        if db != usize::MAX && db != p && !cfg.domtree.dominates(db, p) {
                            return Err(format!(
                                "{}: phi operand {} does not dominate incoming edge from {}",
                                block.label, v, pred
                            ));
                        }
                    }
                }
                continue;
            }
            let mut err = None;
            inst.for_each_used_value(|v| {
                if err.is_some() {
                    return;
                }
                err = check_use(func, &cfg, &def_sites, v, bi, ii);
            });
            if let Some(e) = err {
                return Err(e);
            }
        }
        let mut err = None;
        block.terminator.for_each_used_value(|v| {
            if err.is_some() {
                return;
            }
            err = check_use(func, &cfg, &def_sites, v, bi, usize::MAX);
        });
        if let Some(e) = err {
            return Err(e);
        }
    }

    Ok(())
}

/// Check that value `v` used at (block, index) is defined and dominated
/// by its definition. `index == usize::MAX` means the terminator.
fn check_use(
    func: &IrFunction,
    cfg: &CfgAnalysis,
    def_sites: &FxHashMap<Value, (usize, usize)>,
    v: Value,
    use_block: usize,
    use_index: usize,
) -> Option<String> {
    let label = func.blocks[use_block].label;
    let (def_block, def_index) = match def_sites.get(&v) {
        Some(site) => *site,
        None => return Some(format!("{}: use of undefined value {}", label, v)),
    };
    if def_block == usize::MAX {
        return None; // parameter
    }
    let dominated = if def_block == use_block {
        def_index < use_index
    } else {
        cfg.domtree.dominates(def_block, use_block)
    };
    if !dominated {
        return Some(format!("{}: use of {} is not dominated by its definition", label, v));
    }
    None
}
