//! Parser for the textual IR format.
//!
//! The syntax is line oriented: one instruction, label, or declaration
//! per line, `;` starts a comment. Parsing is a hand-rolled loop with a
//! flat match per line shape; no parser library. Example accepted input:
//!
//! ```text
//! declare i32 @read()
//!
//! define i32 @main() {
//! bb0:
//!   %0 = alloca i32
//!   store i32 42, %0
//!   %1 = load i32, %0
//!   ret i32 %1
//! }
//! ```
//!
//! Structural rules beyond syntax (unique defs, dominance, phi arity)
//! are the verifier's job, not the parser's.

use crate::common::error::{Error, Result};
use crate::common::types::IrType;
use crate::ir::constants::IrConst;
use crate::ir::instruction::*;
use crate::ir::module::{IrFunction, IrModule, IrParam};
use crate::ir::ops::{IrBinOp, IrCmpOp, IrUnaryOp};

/// Parse a complete module from IR text.
pub fn parse_module(text: &str) -> Result<IrModule> {
    Parser::new(text).parse_module()
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    /// Bare identifier or keyword: `define`, `bb3`, `i32`, `add`, ...
    Ident(String),
    /// `%N`
    Value(u32),
    /// `@name`
    Global(String),
    Int(i64),
    Float(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Equals,
}

struct Parser {
    /// (1-based line number, source text) for each non-empty line,
    /// comments stripped. Lines are tokenized as they are visited so a
    /// bad character reports its own line number.
    lines: Vec<(usize, String)>,
    pos: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        let mut lines = Vec::new();
        for (i, raw) in text.lines().enumerate() {
            let line = match raw.find(';') {
                Some(idx) => &raw[..idx],
                None => raw,
            };
            if line.trim().is_empty() {
                continue;
            }
            lines.push((i + 1, line.to_string()));
        }
        Parser { lines, pos: 0 }
    }

    /// Tokenize the line at `pos`, without consuming it.
    fn line_tokens(&self) -> Result<(usize, Vec<Tok>)> {
        let (line_no, text) = &self.lines[self.pos];
        let toks = tokenize(text).map_err(|msg| Error::parse(*line_no, msg))?;
        Ok((*line_no, toks))
    }

    fn parse_module(&mut self) -> Result<IrModule> {
        let mut module = IrModule::new();
        while self.pos < self.lines.len() {
            let (line_no, toks) = self.line_tokens()?;
            match toks.first() {
                Some(Tok::Ident(first)) if first == "declare" => {
                    module.functions.push(parse_declare(line_no, &toks)?);
                    self.pos += 1;
                }
                Some(Tok::Ident(first)) if first == "define" => {
                    let func = self.parse_define(line_no, &toks)?;
                    module.functions.push(func);
                }
                _ => {
                    return Err(Error::parse(line_no, "expected 'define' or 'declare'"));
                }
            }
        }
        Ok(module)
    }

    /// Parse a `define ... { ... }` body starting at the current line.
    fn parse_define(&mut self, header_line: usize, header_toks: &[Tok]) -> Result<IrFunction> {
        let mut func = parse_define_header(header_line, header_toks)?;
        self.pos += 1;

        let mut current: Option<(BlockId, Vec<Instruction>)> = None;
        loop {
            if self.pos >= self.lines.len() {
                return Err(Error::parse(header_line, "unterminated function body"));
            }
            let (line_no, toks) = self.line_tokens()?;
            self.pos += 1;

            // End of function.
            if toks == [Tok::RBrace] {
                if current.is_some() {
                    return Err(Error::parse(line_no, "block is missing a terminator"));
                }
                break;
            }

            // Label line: `bbN:`
            if toks.len() == 2 && toks[1] == Tok::Colon {
                if let Tok::Ident(name) = &toks[0] {
                    if current.is_some() {
                        return Err(Error::parse(line_no, "previous block is missing a terminator"));
                    }
                    current = Some((parse_block_label(line_no, name)?, Vec::new()));
                    continue;
                }
            }

            let (label, instructions) = match &mut current {
                Some(state) => state,
                None => return Err(Error::parse(line_no, "instruction outside of a block")),
            };

            let mut cursor = Cursor { line: line_no, toks: &toks, pos: 0 };
            if let Some(term) = parse_terminator(&mut cursor)? {
                cursor.expect_end()?;
                func.blocks.push(BasicBlock {
                    label: *label,
                    instructions: std::mem::take(instructions),
                    terminator: term,
                });
                current = None;
            } else {
                let inst = parse_instruction(&mut cursor)?;
                cursor.expect_end()?;
                instructions.push(inst);
            }
        }

        func.next_value_id = 0;
        func.next_value_id = func.max_value_id() + 1;
        Ok(func)
    }
}

/// Token cursor over one line.
struct Cursor<'t> {
    line: usize,
    toks: &'t [Tok],
    pos: usize,
}

impl<'t> Cursor<'t> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Result<&'t Tok> {
        let tok = self.toks.get(self.pos).ok_or_else(|| Error::parse(self.line, "unexpected end of line"))?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, tok: Tok) -> Result<()> {
        let got = self.next()?;
        if *got != tok {
            return Err(Error::parse(self.line, format!("expected {:?}, got {:?}", tok, got)));
        }
        Ok(())
    }

    fn expect_end(&self) -> Result<()> {
        if self.pos != self.toks.len() {
            return Err(Error::parse(self.line, "trailing tokens on line"));
        }
        Ok(())
    }

    fn ident(&mut self) -> Result<&'t str> {
        match self.next()? {
            Tok::Ident(s) => Ok(s),
            other => Err(Error::parse(self.line, format!("expected identifier, got {:?}", other))),
        }
    }

    fn value(&mut self) -> Result<Value> {
        match self.next()? {
            Tok::Value(v) => Ok(Value(*v)),
            other => Err(Error::parse(self.line, format!("expected %value, got {:?}", other))),
        }
    }

    fn ty(&mut self) -> Result<IrType> {
        let line = self.line;
        let name = self.ident()?;
        IrType::from_name(name).ok_or_else(|| Error::parse(line, format!("unknown type '{}'", name)))
    }

    fn block_label(&mut self) -> Result<BlockId> {
        let line = self.line;
        let name = self.ident()?;
        parse_block_label(line, name)
    }

    /// Parse an operand; constants take `ty`.
    fn operand(&mut self, ty: IrType) -> Result<Operand> {
        let line = self.line;
        Ok(match self.next()? {
            Tok::Value(v) => Operand::Value(Value(*v)),
            Tok::Int(v) => Operand::Const(IrConst::from_i64(*v, ty)),
            Tok::Float(v) => match ty {
                IrType::F32 => Operand::Const(IrConst::F32(*v as f32)),
                IrType::F64 => Operand::Const(IrConst::F64(*v)),
                other => return Err(Error::parse(line, format!("float literal for non-float type {}", other))),
            },
            Tok::Ident(s) if s == "undef" => Operand::Undef(ty),
            Tok::Ident(s) if s == "poison" => Operand::Poison(ty),
            other => return Err(Error::parse(line, format!("expected operand, got {:?}", other))),
        })
    }
}

fn parse_block_label(line: usize, name: &str) -> Result<BlockId> {
    name.strip_prefix("bb")
        .and_then(|n| n.parse::<u32>().ok())
        .map(BlockId)
        .ok_or_else(|| Error::parse(line, format!("expected block label 'bbN', got '{}'", name)))
}

/// `declare ret_ty @name(ty, ty, ...)`
fn parse_declare(line: usize, toks: &[Tok]) -> Result<IrFunction> {
    let mut cursor = Cursor { line, toks, pos: 1 };
    let return_type = cursor.ty()?;
    let name = match cursor.next()? {
        Tok::Global(n) => n.clone(),
        other => return Err(Error::parse(line, format!("expected @name, got {:?}", other))),
    };
    cursor.expect(Tok::LParen)?;
    let mut params = Vec::new();
    if cursor.peek() != Some(&Tok::RParen) {
        loop {
            let ty = cursor.ty()?;
            params.push(IrParam { value: Value(params.len() as u32), ty });
            match cursor.next()? {
                Tok::Comma => continue,
                Tok::RParen => break,
                other => return Err(Error::parse(line, format!("expected ',' or ')', got {:?}", other))),
            }
        }
    } else {
        cursor.expect(Tok::RParen)?;
    }
    cursor.expect_end()?;

    let mut func = IrFunction::new(name, return_type, params);
    func.is_declaration = true;
    Ok(func)
}

/// `define ret_ty @name(ty %0, ty %1, ...) {`
fn parse_define_header(line: usize, toks: &[Tok]) -> Result<IrFunction> {
    let mut cursor = Cursor { line, toks, pos: 1 };
    let return_type = cursor.ty()?;
    let name = match cursor.next()? {
        Tok::Global(n) => n.clone(),
        other => return Err(Error::parse(line, format!("expected @name, got {:?}", other))),
    };
    cursor.expect(Tok::LParen)?;
    let mut params = Vec::new();
    if cursor.peek() == Some(&Tok::RParen) {
        cursor.expect(Tok::RParen)?;
    } else {
        loop {
            let ty = cursor.ty()?;
            let value = cursor.value()?;
            params.push(IrParam { value, ty });
            match cursor.next()? {
                Tok::Comma => continue,
                Tok::RParen => break,
                other => return Err(Error::parse(line, format!("expected ',' or ')', got {:?}", other))),
            }
        }
    }
    cursor.expect(Tok::LBrace)?;
    cursor.expect_end()?;
    Ok(IrFunction::new(name, return_type, params))
}

/// Parse a terminator if this line is one, else None.
fn parse_terminator(cursor: &mut Cursor) -> Result<Option<Terminator>> {
    let keyword = match cursor.peek() {
        Some(Tok::Ident(s)) => s.clone(),
        _ => return Ok(None),
    };
    Ok(Some(match keyword.as_str() {
        "ret" => {
            cursor.next()?;
            match cursor.peek() {
                Some(Tok::Ident(s)) if s == "void" => {
                    cursor.next()?;
                    Terminator::Return(None)
                }
                _ => {
                    let ty = cursor.ty()?;
                    let op = cursor.operand(ty)?;
                    Terminator::Return(Some(op))
                }
            }
        }
        "br" => {
            cursor.next()?;
            // Unconditional: `br bbN`. Conditional: `br op, bbN, bbM`.
            if let Some(Tok::Ident(s)) = cursor.peek() {
                if s.starts_with("bb") {
                    let target = cursor.block_label()?;
                    return Ok(Some(Terminator::Branch(target)));
                }
            }
            let cond = cursor.operand(IrType::I8)?;
            cursor.expect(Tok::Comma)?;
            let true_label = cursor.block_label()?;
            cursor.expect(Tok::Comma)?;
            let false_label = cursor.block_label()?;
            Terminator::CondBranch { cond, true_label, false_label }
        }
        "switch" => {
            // `switch op, default [ 1: bb2, 5: bb3 ]`
            cursor.next()?;
            let val = cursor.operand(IrType::I64)?;
            cursor.expect(Tok::Comma)?;
            let default = cursor.block_label()?;
            cursor.expect(Tok::LBracket)?;
            let mut cases = Vec::new();
            if cursor.peek() == Some(&Tok::RBracket) {
                cursor.next()?;
            } else {
                loop {
                    let case = match cursor.next()? {
                        Tok::Int(v) => *v,
                        other => return Err(Error::parse(cursor.line, format!("expected case value, got {:?}", other))),
                    };
                    cursor.expect(Tok::Colon)?;
                    let target = cursor.block_label()?;
                    cases.push((case, target));
                    match cursor.next()? {
                        Tok::Comma => continue,
                        Tok::RBracket => break,
                        other => return Err(Error::parse(cursor.line, format!("expected ',' or ']', got {:?}", other))),
                    }
                }
            }
            Terminator::Switch { val, cases, default }
        }
        "unreachable" => {
            cursor.next()?;
            Terminator::Unreachable
        }
        _ => return Ok(None),
    }))
}

/// Parse a non-terminator instruction line.
fn parse_instruction(cursor: &mut Cursor) -> Result<Instruction> {
    // Void call: `call void @f(...)`.
    if let Some(Tok::Ident(s)) = cursor.peek() {
        if s == "call" {
            cursor.next()?;
            return parse_call(cursor, None);
        }
        if s == "store" {
            cursor.next()?;
            let ty = cursor.ty()?;
            let val = cursor.operand(ty)?;
            cursor.expect(Tok::Comma)?;
            let ptr = cursor.operand(IrType::Ptr)?;
            return Ok(Instruction::Store { val, ptr, ty });
        }
    }

    // Everything else defines a value: `%N = ...`.
    let dest = cursor.value()?;
    cursor.expect(Tok::Equals)?;
    let line = cursor.line;
    let mnemonic = cursor.ident()?.to_string();
    match mnemonic.as_str() {
        "alloca" => {
            let ty = cursor.ty()?;
            Ok(Instruction::Alloca { dest, ty })
        }
        "load" => {
            let ty = cursor.ty()?;
            cursor.expect(Tok::Comma)?;
            let ptr = cursor.operand(IrType::Ptr)?;
            Ok(Instruction::Load { dest, ptr, ty })
        }
        "cmp" => {
            let op_name = cursor.ident()?.to_string();
            let op = IrCmpOp::from_mnemonic(&op_name)
                .ok_or_else(|| Error::parse(line, format!("unknown comparison '{}'", op_name)))?;
            let ty = cursor.ty()?;
            let lhs = cursor.operand(ty)?;
            cursor.expect(Tok::Comma)?;
            let rhs = cursor.operand(ty)?;
            Ok(Instruction::Cmp { dest, op, lhs, rhs, ty })
        }
        "cast" => {
            let from_ty = cursor.ty()?;
            let src = cursor.operand(from_ty)?;
            let to_kw = cursor.ident()?;
            if to_kw != "to" {
                return Err(Error::parse(line, format!("expected 'to', got '{}'", to_kw)));
            }
            let to_ty = cursor.ty()?;
            Ok(Instruction::Cast { dest, src, from_ty, to_ty })
        }
        "gep" => {
            let ty = cursor.ty()?;
            let base = cursor.operand(IrType::Ptr)?;
            cursor.expect(Tok::Comma)?;
            let offset = cursor.operand(IrType::I64)?;
            Ok(Instruction::GetElementPtr { dest, base, offset, ty })
        }
        "call" => parse_call(cursor, Some(dest)),
        "phi" => {
            let ty = cursor.ty()?;
            let mut incoming = Vec::new();
            loop {
                cursor.expect(Tok::LBracket)?;
                let op = cursor.operand(ty)?;
                cursor.expect(Tok::Comma)?;
                let block = cursor.block_label()?;
                cursor.expect(Tok::RBracket)?;
                incoming.push((op, block));
                match cursor.peek() {
                    Some(Tok::Comma) => {
                        cursor.next()?;
                    }
                    _ => break,
                }
            }
            Ok(Instruction::Phi { dest, ty, incoming })
        }
        other => {
            if let Some(op) = IrBinOp::from_mnemonic(other) {
                let ty = cursor.ty()?;
                let lhs = cursor.operand(ty)?;
                cursor.expect(Tok::Comma)?;
                let rhs = cursor.operand(ty)?;
                return Ok(Instruction::BinOp { dest, op, lhs, rhs, ty });
            }
            if let Some(op) = IrUnaryOp::from_mnemonic(other) {
                let ty = cursor.ty()?;
                let src = cursor.operand(ty)?;
                return Ok(Instruction::UnaryOp { dest, op, src, ty });
            }
            Err(Error::parse(line, format!("unknown instruction '{}'", other)))
        }
    }
}

/// Parse `ret_ty @name(ty op, ...)` after the `call` keyword.
fn parse_call(cursor: &mut Cursor, dest: Option<Value>) -> Result<Instruction> {
    let return_type = cursor.ty()?;
    let func = match cursor.next()? {
        Tok::Global(n) => n.clone(),
        other => return Err(Error::parse(cursor.line, format!("expected @name, got {:?}", other))),
    };
    cursor.expect(Tok::LParen)?;
    let mut args = Vec::new();
    let mut arg_types = Vec::new();
    if cursor.peek() == Some(&Tok::RParen) {
        cursor.next()?;
    } else {
        loop {
            let ty = cursor.ty()?;
            let op = cursor.operand(ty)?;
            args.push(op);
            arg_types.push(ty);
            match cursor.next()? {
                Tok::Comma => continue,
                Tok::RParen => break,
                other => return Err(Error::parse(cursor.line, format!("expected ',' or ')', got {:?}", other))),
            }
        }
    }
    Ok(Instruction::Call {
        func,
        info: CallInfo { dest, args, arg_types, return_type },
    })
}

/// Tokenize one line. Returns Err(message) on a bad character.
fn tokenize(line: &str) -> std::result::Result<Vec<Tok>, String> {
    let mut toks = Vec::new();
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                toks.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                toks.push(Tok::RBracket);
                i += 1;
            }
            '{' => {
                toks.push(Tok::LBrace);
                i += 1;
            }
            '}' => {
                toks.push(Tok::RBrace);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            ':' => {
                toks.push(Tok::Colon);
                i += 1;
            }
            '=' => {
                toks.push(Tok::Equals);
                i += 1;
            }
            '%' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end == start {
                    return Err("expected value number after '%'".to_string());
                }
                let id: u32 = line[start..end].parse().map_err(|_| "value number out of range".to_string())?;
                toks.push(Tok::Value(id));
                i = end;
            }
            '@' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_' || bytes[end] == b'.') {
                    end += 1;
                }
                if end == start {
                    return Err("expected name after '@'".to_string());
                }
                toks.push(Tok::Global(line[start..end].to_string()));
                i = end;
            }
            '-' | '0'..='9' => {
                let start = i;
                let mut end = i + 1;
                let mut is_float = false;
                while end < bytes.len() {
                    let b = bytes[end] as char;
                    if b.is_ascii_digit() {
                        end += 1;
                    } else if b == '.' || b == 'e' || b == 'E'
                        || ((b == '-' || b == '+') && matches!(bytes[end - 1], b'e' | b'E'))
                    {
                        is_float = true;
                        end += 1;
                    } else {
                        break;
                    }
                }
                let text = &line[start..end];
                if is_float {
                    let v: f64 = text.parse().map_err(|_| format!("bad float literal '{}'", text))?;
                    toks.push(Tok::Float(v));
                } else {
                    let v: i64 = text.parse().map_err(|_| format!("bad integer literal '{}'", text))?;
                    toks.push(Tok::Int(v));
                }
                i = end;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i + 1;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                toks.push(Tok::Ident(line[start..end].to_string()));
                i = end;
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(toks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::print::print_module;
    use indoc::indoc;

    #[test]
    fn test_parse_and_reprint_function() {
        let text = indoc! {"
            define i32 @max(i32 %0, i32 %1) {
            bb0:
              %2 = cmp sgt i32 %0, %1
              br %2, bb1, bb2
            bb1:
              ret i32 %0
            bb2:
              ret i32 %1
            }
        "};
        let module = parse_module(text).unwrap();
        assert_eq!(module.functions.len(), 1);
        let func = &module.functions[0];
        assert_eq!(func.name, "max");
        assert_eq!(func.blocks.len(), 3);
        assert_eq!(print_module(&module), text);
    }

    #[test]
    fn test_parse_memory_and_phi() {
        let text = indoc! {"
            define i32 @f(i32 %0) {
            bb0:
              %1 = alloca i32
              store i32 %0, %1
              br %0, bb1, bb2
            bb1:
              store i32 7, %1
              br bb2
            bb2:
              %2 = load i32, %1
              %3 = phi i32 [ 1, bb0 ], [ %2, bb1 ]
              ret i32 %3
            }
        "};
        let module = parse_module(text).unwrap();
        let func = &module.functions[0];
        assert!(matches!(func.blocks[0].instructions[0], Instruction::Alloca { .. }));
        assert!(matches!(
            func.blocks[2].instructions[1],
            Instruction::Phi { ref incoming, .. } if incoming.len() == 2
        ));
        assert_eq!(func.next_value_id, 4);
        assert_eq!(print_module(&module), text);
    }

    #[test]
    fn test_parse_switch_and_markers() {
        let text = indoc! {"
            define void @f(i64 %0) {
            bb0:
              store i64 undef, poison
              switch %0, bb1 [ 1: bb2, 2: bb2 ]
            bb1:
              ret void
            bb2:
              ret void
            }
        "};
        let module = parse_module(text).unwrap();
        let func = &module.functions[0];
        match &func.blocks[0].terminator {
            Terminator::Switch { cases, default, .. } => {
                assert_eq!(*default, BlockId(1));
                assert_eq!(cases, &vec![(1, BlockId(2)), (2, BlockId(2))]);
            }
            other => panic!("expected switch, got {:?}", other),
        }
        assert_eq!(print_module(&module), text);
    }

    #[test]
    fn test_parse_error_reports_line() {
        let text = indoc! {"
            define i32 @f() {
            bb0:
              %0 = frobnicate i32 1, 2
              ret i32 %0
            }
        "};
        match parse_module(text) {
            Err(Error::Parse { line, message }) => {
                assert_eq!(line, 3);
                assert!(message.contains("frobnicate"));
            }
            other => panic!("expected parse error, got {:?}", other.map(|m| m.functions.len())),
        }
    }

    #[test]
    fn test_declare() {
        let module = parse_module("declare i32 @getchar()\n").unwrap();
        assert!(module.functions[0].is_declaration);
        assert_eq!(print_module(&module), "declare i32 @getchar()\n");
    }
}
