//! IR instruction definitions: the core SSA instruction set.
//!
//! Key types:
//! - `BlockId`: basic block identifier (u32 index, prints as "bb{id}")
//! - `Value`: SSA value reference (u32 index)
//! - `Operand`: a value, a constant, or an undef/poison marker
//! - `Instruction`: the main instruction enum
//! - `Terminator`: block terminators (return, branch, switch)
//! - `BasicBlock`: a labeled sequence of instructions ending in a terminator
//!
//! Pointer operands (load/store/gep) are full operands rather than bare
//! value references so that replace-all-uses can substitute markers into
//! them; a `load` through `poison` is representable IR, it is just UB to
//! execute.

use crate::common::types::IrType;
use super::constants::IrConst;
use super::ops::{IrBinOp, IrCmpOp, IrUnaryOp};
use smallvec::SmallVec;

/// A basic block identifier. Uses a u32 index for zero-cost copies
/// instead of heap-allocated String labels; the textual form is "bb{id}".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// An SSA value reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub u32);

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// An operand: a value reference, a constant, or one of the two marker
/// values. `Undef` means "unspecified, any concrete value is a legal
/// refinement"; `Poison` means "using this is immediate UB".
#[derive(Debug, Clone, Copy)]
pub enum Operand {
    Value(Value),
    Const(IrConst),
    Undef(IrType),
    Poison(IrType),
}

impl Operand {
    /// Whether this operand is an undef or poison marker. Poison counts:
    /// any value is a legal refinement of poison too.
    pub fn is_undef_like(&self) -> bool {
        matches!(self, Operand::Undef(_) | Operand::Poison(_))
    }

    /// Structural identity: same value id, bit-identical constant, or the
    /// same marker kind at the same type.
    pub fn same(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::Value(a), Operand::Value(b)) => a == b,
            (Operand::Const(a), Operand::Const(b)) => a.key() == b.key(),
            (Operand::Undef(a), Operand::Undef(b)) => a == b,
            (Operand::Poison(a), Operand::Poison(b)) => a == b,
            _ => false,
        }
    }

    pub fn as_value(&self) -> Option<Value> {
        match self {
            Operand::Value(v) => Some(*v),
            _ => None,
        }
    }
}

/// A basic block in the CFG.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub label: BlockId,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

/// Call metadata shared by the call instruction variants.
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// Destination value for the return, or None for void calls.
    pub dest: Option<Value>,
    /// Argument operands.
    pub args: Vec<Operand>,
    /// Type of each argument (parallel to `args`).
    pub arg_types: Vec<IrType>,
    /// Return type of the callee.
    pub return_type: IrType,
}

/// An IR instruction.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Allocate a stack cell for one value of `ty`: %dest = alloca ty
    Alloca { dest: Value, ty: IrType },

    /// Load from memory: %dest = load ty, ptr
    Load { dest: Value, ptr: Operand, ty: IrType },

    /// Store to memory: store ty val, ptr
    Store { val: Operand, ptr: Operand, ty: IrType },

    /// Binary operation: %dest = op ty lhs, rhs
    BinOp { dest: Value, op: IrBinOp, lhs: Operand, rhs: Operand, ty: IrType },

    /// Unary operation: %dest = op ty src
    UnaryOp { dest: Value, op: IrUnaryOp, src: Operand, ty: IrType },

    /// Comparison: %dest = cmp op ty lhs, rhs (produces i8)
    Cmp { dest: Value, op: IrCmpOp, lhs: Operand, rhs: Operand, ty: IrType },

    /// Type conversion: %dest = cast from_ty src to to_ty
    Cast { dest: Value, src: Operand, from_ty: IrType, to_ty: IrType },

    /// Pointer arithmetic: %dest = gep ty base, offset (byte offset)
    GetElementPtr { dest: Value, base: Operand, offset: Operand, ty: IrType },

    /// Direct function call: %dest = call ret_ty @func(args...)
    Call { func: String, info: CallInfo },

    /// SSA phi node: merges values from predecessor blocks.
    /// Each entry in `incoming` is (value, block_id) indicating which
    /// value flows in from which predecessor edge. A block that reaches
    /// this one through several terminator slots contributes one entry
    /// per slot.
    Phi { dest: Value, ty: IrType, incoming: Vec<(Operand, BlockId)> },
}

/// Block terminator.
#[derive(Debug, Clone)]
pub enum Terminator {
    /// Return from function.
    Return(Option<Operand>),

    /// Unconditional branch.
    Branch(BlockId),

    /// Conditional branch. The two labels may name the same block.
    CondBranch { cond: Operand, true_label: BlockId, false_label: BlockId },

    /// Switch dispatch. Several cases may target the same block, and a
    /// case may share its target with the default.
    Switch { val: Operand, cases: Vec<(i64, BlockId)>, default: BlockId },

    /// Unreachable (e.g., after a noreturn call).
    Unreachable,
}

impl Instruction {
    /// Get the destination value defined by this instruction, if any.
    pub fn dest(&self) -> Option<Value> {
        match self {
            Instruction::Alloca { dest, .. }
            | Instruction::Load { dest, .. }
            | Instruction::BinOp { dest, .. }
            | Instruction::UnaryOp { dest, .. }
            | Instruction::Cmp { dest, .. }
            | Instruction::Cast { dest, .. }
            | Instruction::GetElementPtr { dest, .. }
            | Instruction::Phi { dest, .. } => Some(*dest),
            Instruction::Call { info, .. } => info.dest,
            Instruction::Store { .. } => None,
        }
    }

    /// Returns the result IR type of this instruction, if any.
    pub fn result_type(&self) -> Option<IrType> {
        match self {
            Instruction::Load { ty, .. } => Some(*ty),
            Instruction::BinOp { ty, .. } => Some(*ty),
            Instruction::UnaryOp { ty, .. } => Some(*ty),
            Instruction::Cmp { .. } => Some(IrType::I8),
            Instruction::Cast { to_ty, .. } => Some(*to_ty),
            Instruction::Alloca { .. } | Instruction::GetElementPtr { .. } => Some(IrType::Ptr),
            Instruction::Call { info, .. } => Some(info.return_type),
            Instruction::Phi { ty, .. } => Some(*ty),
            Instruction::Store { .. } => None,
        }
    }

    /// Call `f(value)` for every Value used as an operand in this
    /// instruction. This is the canonical value visitor; passes that need
    /// to enumerate operands should use it instead of duplicating the
    /// match block.
    #[inline]
    pub fn for_each_used_value(&self, mut f: impl FnMut(Value)) {
        self.for_each_operand(|op| {
            if let Operand::Value(v) = op {
                f(*v);
            }
        })
    }

    /// Call `f` for every operand slot in this instruction.
    #[inline]
    pub fn for_each_operand(&self, mut f: impl FnMut(&Operand)) {
        match self {
            Instruction::Alloca { .. } => {}
            Instruction::Load { ptr, .. } => f(ptr),
            Instruction::Store { val, ptr, .. } => {
                f(val);
                f(ptr);
            }
            Instruction::BinOp { lhs, rhs, .. } | Instruction::Cmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Instruction::UnaryOp { src, .. } | Instruction::Cast { src, .. } => f(src),
            Instruction::GetElementPtr { base, offset, .. } => {
                f(base);
                f(offset);
            }
            Instruction::Call { info, .. } => {
                for arg in &info.args {
                    f(arg);
                }
            }
            Instruction::Phi { incoming, .. } => {
                for (op, _) in incoming {
                    f(op);
                }
            }
        }
    }

    /// Call `f` for every operand slot in this instruction, mutably.
    /// Used by replace-all-uses sweeps.
    #[inline]
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Operand)) {
        match self {
            Instruction::Alloca { .. } => {}
            Instruction::Load { ptr, .. } => f(ptr),
            Instruction::Store { val, ptr, .. } => {
                f(val);
                f(ptr);
            }
            Instruction::BinOp { lhs, rhs, .. } | Instruction::Cmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Instruction::UnaryOp { src, .. } | Instruction::Cast { src, .. } => f(src),
            Instruction::GetElementPtr { base, offset, .. } => {
                f(base);
                f(offset);
            }
            Instruction::Call { info, .. } => {
                for arg in &mut info.args {
                    f(arg);
                }
            }
            Instruction::Phi { incoming, .. } => {
                for (op, _) in incoming {
                    f(op);
                }
            }
        }
    }
}

impl Terminator {
    /// Call `f(value)` for every Value used as an operand in this terminator.
    #[inline]
    pub fn for_each_used_value(&self, mut f: impl FnMut(Value)) {
        self.for_each_operand(|op| {
            if let Operand::Value(v) = op {
                f(*v);
            }
        })
    }

    /// Call `f` for every operand slot in this terminator.
    #[inline]
    pub fn for_each_operand(&self, mut f: impl FnMut(&Operand)) {
        match self {
            Terminator::Return(Some(op)) => f(op),
            Terminator::CondBranch { cond, .. } => f(cond),
            Terminator::Switch { val, .. } => f(val),
            Terminator::Return(None) | Terminator::Branch(_) | Terminator::Unreachable => {}
        }
    }

    /// Call `f` for every operand slot in this terminator, mutably.
    #[inline]
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Operand)) {
        match self {
            Terminator::Return(Some(op)) => f(op),
            Terminator::CondBranch { cond, .. } => f(cond),
            Terminator::Switch { val, .. } => f(val),
            Terminator::Return(None) | Terminator::Branch(_) | Terminator::Unreachable => {}
        }
    }

    /// All successor slots of this terminator, in slot order, duplicates
    /// preserved. A conditional branch with identical labels yields two
    /// slots; a switch yields the default slot followed by one slot per
    /// case. Each slot is one CFG edge, so a block appearing N times here
    /// is N times a predecessor of its target.
    pub fn successor_slots(&self) -> SmallVec<[BlockId; 4]> {
        let mut slots = SmallVec::new();
        match self {
            Terminator::Branch(target) => slots.push(*target),
            Terminator::CondBranch { true_label, false_label, .. } => {
                slots.push(*true_label);
                slots.push(*false_label);
            }
            Terminator::Switch { cases, default, .. } => {
                slots.push(*default);
                for (_, target) in cases {
                    slots.push(*target);
                }
            }
            Terminator::Return(_) | Terminator::Unreachable => {}
        }
        slots
    }

    /// Distinct successors in first-slot order.
    pub fn successors(&self) -> SmallVec<[BlockId; 4]> {
        let mut succs: SmallVec<[BlockId; 4]> = SmallVec::new();
        for slot in self.successor_slots() {
            if !succs.contains(&slot) {
                succs.push(slot);
            }
        }
        succs
    }
}
