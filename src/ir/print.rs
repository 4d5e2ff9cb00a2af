//! Textual IR printer.
//!
//! Emits the same syntax `frontend::parser` reads. Each instruction
//! prints its operand type once; operands themselves are bare (`%5`,
//! `42`, `undef`, `poison`). Example:
//!
//! ```text
//! define i32 @max(i32 %0, i32 %1) {
//! bb0:
//!   %2 = cmp sgt i32 %0, %1
//!   br %2, bb1, bb2
//! bb1:
//!   ret i32 %0
//! bb2:
//!   ret i32 %1
//! }
//! ```

use std::fmt::Write;

use super::instruction::{Instruction, Operand, Terminator};
use super::module::{IrFunction, IrModule};

pub fn print_module(module: &IrModule) -> String {
    let mut out = String::new();
    let mut first = true;
    for func in &module.functions {
        if !first {
            out.push('\n');
        }
        first = false;
        print_function(&mut out, func);
    }
    out
}

fn operand(op: &Operand) -> String {
    match op {
        Operand::Value(v) => format!("{}", v),
        Operand::Const(c) => format!("{}", c),
        Operand::Undef(_) => "undef".to_string(),
        Operand::Poison(_) => "poison".to_string(),
    }
}

fn print_function(out: &mut String, func: &IrFunction) {
    let params: Vec<String> = func
        .params
        .iter()
        .map(|p| format!("{} {}", p.ty, p.value))
        .collect();

    if func.is_declaration {
        let tys: Vec<String> = func.params.iter().map(|p| p.ty.to_string()).collect();
        let _ = writeln!(out, "declare {} @{}({})", func.return_type, func.name, tys.join(", "));
        return;
    }

    let _ = writeln!(out, "define {} @{}({}) {{", func.return_type, func.name, params.join(", "));
    for block in &func.blocks {
        let _ = writeln!(out, "{}:", block.label);
        for inst in &block.instructions {
            print_instruction(out, inst);
        }
        print_terminator(out, &block.terminator, func.return_type);
    }
    let _ = writeln!(out, "}}");
}

fn print_instruction(out: &mut String, inst: &Instruction) {
    match inst {
        Instruction::Alloca { dest, ty } => {
            let _ = writeln!(out, "  {} = alloca {}", dest, ty);
        }
        Instruction::Load { dest, ptr, ty } => {
            let _ = writeln!(out, "  {} = load {}, {}", dest, ty, operand(ptr));
        }
        Instruction::Store { val, ptr, ty } => {
            let _ = writeln!(out, "  store {} {}, {}", ty, operand(val), operand(ptr));
        }
        Instruction::BinOp { dest, op, lhs, rhs, ty } => {
            let _ = writeln!(
                out,
                "  {} = {} {} {}, {}",
                dest,
                op.mnemonic(),
                ty,
                operand(lhs),
                operand(rhs)
            );
        }
        Instruction::UnaryOp { dest, op, src, ty } => {
            let _ = writeln!(out, "  {} = {} {} {}", dest, op.mnemonic(), ty, operand(src));
        }
        Instruction::Cmp { dest, op, lhs, rhs, ty } => {
            let _ = writeln!(
                out,
                "  {} = cmp {} {} {}, {}",
                dest,
                op.mnemonic(),
                ty,
                operand(lhs),
                operand(rhs)
            );
        }
        Instruction::Cast { dest, src, from_ty, to_ty } => {
            let _ = writeln!(out, "  {} = cast {} {} to {}", dest, from_ty, operand(src), to_ty);
        }
        Instruction::GetElementPtr { dest, base, offset, ty } => {
            let _ = writeln!(out, "  {} = gep {} {}, {}", dest, ty, operand(base), operand(offset));
        }
        Instruction::Call { func, info } => {
            let args: Vec<String> = info
                .args
                .iter()
                .zip(&info.arg_types)
                .map(|(a, t)| format!("{} {}", t, operand(a)))
                .collect();
            match info.dest {
                Some(dest) => {
                    let _ = writeln!(
                        out,
                        "  {} = call {} @{}({})",
                        dest,
                        info.return_type,
                        func,
                        args.join(", ")
                    );
                }
                None => {
                    let _ = writeln!(out, "  call {} @{}({})", info.return_type, func, args.join(", "));
                }
            }
        }
        Instruction::Phi { dest, ty, incoming } => {
            let entries: Vec<String> = incoming
                .iter()
                .map(|(op, block)| format!("[ {}, {} ]", operand(op), block))
                .collect();
            let _ = writeln!(out, "  {} = phi {} {}", dest, ty, entries.join(", "));
        }
    }
}

fn print_terminator(out: &mut String, term: &Terminator, return_type: crate::common::types::IrType) {
    match term {
        Terminator::Return(None) => {
            let _ = writeln!(out, "  ret void");
        }
        Terminator::Return(Some(op)) => {
            let _ = writeln!(out, "  ret {} {}", return_type, operand(op));
        }
        Terminator::Branch(target) => {
            let _ = writeln!(out, "  br {}", target);
        }
        Terminator::CondBranch { cond, true_label, false_label } => {
            let _ = writeln!(out, "  br {}, {}, {}", operand(cond), true_label, false_label);
        }
        Terminator::Switch { val, cases, default } => {
            let arms: Vec<String> = cases
                .iter()
                .map(|(c, target)| format!("{}: {}", c, target))
                .collect();
            let _ = writeln!(out, "  switch {}, {} [ {} ]", operand(val), default, arms.join(", "));
        }
        Terminator::Unreachable => {
            let _ = writeln!(out, "  unreachable");
        }
    }
}
