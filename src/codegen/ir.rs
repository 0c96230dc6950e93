//! The emitted IR (§4.3, §4.4, §6): a small SSA-ish, block-structured
//! language with an LLVM-IR-flavored textual form. Structurally this plays
//! the same role `types::vcode::VCode` plays for the teacher crate (blocks
//! of instructions terminated by an explicit terminator, addressed by
//! newtype indices) without the x86-specific `arch::Inst` payload — nothing
//! downstream of this module lowers further than text, so there is no
//! virtual-register or physical-register stage to model.

use std::fmt;
use crate::codegen::idxty::{BlockId, ProcId, ValueId};
use crate::idx::{Idx, IdxVec};

/// A primitive IR type. Deliberately small: this backend only ever moves
/// machine words, doubles, bytes and pointers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IrTy {
  I1,
  I8,
  I32,
  I64,
  F64,
  Ptr,
  Void,
  /// A fixed-length array, used only for the `CType` slot tables (§4.3)
  /// and `CString`/`CList` initializers.
  Array(Box<IrTy>, u32),
}

impl fmt::Display for IrTy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      IrTy::I1 => f.write_str("i1"),
      IrTy::I8 => f.write_str("i8"),
      IrTy::I32 => f.write_str("i32"),
      IrTy::I64 => f.write_str("i64"),
      IrTy::F64 => f.write_str("double"),
      IrTy::Ptr => f.write_str("ptr"),
      IrTy::Void => f.write_str("void"),
      IrTy::Array(elem, n) => write!(f, "[{n} x {elem}]"),
    }
  }
}

/// A literal constant embeddable directly in an instruction operand or a
/// global initializer.
#[derive(Clone, Debug, PartialEq)]
pub enum Const {
  I1(bool),
  I8(i8),
  I32(i32),
  I64(i64),
  F64(f64),
  /// The address of a named global (a `CType` constant, a string literal's
  /// backing storage, or another function).
  GlobalAddr(String),
  Null,
  /// A fixed-length array initializer, e.g. a `CType`'s 20-slot function
  /// pointer table.
  Array(IrTy, Vec<Const>),
}

impl fmt::Display for Const {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Const::I1(b) => write!(f, "{}", u8::from(*b)),
      Const::I8(n) => write!(f, "{n}"),
      Const::I32(n) => write!(f, "{n}"),
      Const::I64(n) => write!(f, "{n}"),
      Const::F64(n) => write!(f, "{n:?}"),
      Const::GlobalAddr(name) => write!(f, "@{name}"),
      Const::Null => write!(f, "null"),
      Const::Array(elem, elems) => {
        write!(f, "[{} x {elem}] [", elems.len())?;
        for (i, e) in elems.iter().enumerate() {
          if i > 0 { write!(f, ", ")? }
          write!(f, "{elem} {e}")?;
        }
        write!(f, "]")
      }
    }
  }
}

/// An instruction operand: either a value produced earlier in the function,
/// or an inline constant.
#[derive(Clone, Debug)]
pub enum Operand {
  Value(ValueId),
  Const(Const),
}

impl fmt::Display for Operand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Operand::Value(v) => write!(f, "%{}", v.as_u32()),
      Operand::Const(c) => write!(f, "{c}"),
    }
  }
}

/// A binary arithmetic/comparison opcode, named after its LLVM-ish mnemonic.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IrBinop {
  AddI, SubI, MulI, SDivI,
  AddF, SubF, MulF, DivF,
  ICmpEq, ICmpNe, ICmpSlt, ICmpSle, ICmpSgt, ICmpSge,
  FCmpUeq, FCmpUne, FCmpUlt, FCmpUle, FCmpUgt, FCmpUge,
  And, Or, Xor,
}

impl fmt::Display for IrBinop {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      IrBinop::AddI => "add", IrBinop::SubI => "sub", IrBinop::MulI => "mul", IrBinop::SDivI => "sdiv",
      IrBinop::AddF => "fadd", IrBinop::SubF => "fsub", IrBinop::MulF => "fmul", IrBinop::DivF => "fdiv",
      IrBinop::ICmpEq => "icmp eq", IrBinop::ICmpNe => "icmp ne", IrBinop::ICmpSlt => "icmp slt",
      IrBinop::ICmpSle => "icmp sle", IrBinop::ICmpSgt => "icmp sgt", IrBinop::ICmpSge => "icmp sge",
      IrBinop::FCmpUeq => "fcmp ueq", IrBinop::FCmpUne => "fcmp une", IrBinop::FCmpUlt => "fcmp ult",
      IrBinop::FCmpUle => "fcmp ule", IrBinop::FCmpUgt => "fcmp ugt", IrBinop::FCmpUge => "fcmp uge",
      IrBinop::And => "and", IrBinop::Or => "or", IrBinop::Xor => "xor",
    })
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IrUnop {
  NegI,
  NegF,
  Not,
}

impl fmt::Display for IrUnop {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self { IrUnop::NegI => "neg", IrUnop::NegF => "fneg", IrUnop::Not => "not" })
  }
}

/// What a `call` instruction invokes.
#[derive(Clone, Debug)]
pub enum CallTarget {
  /// A statically known function defined in this module, named the same as
  /// its `Function::name`. Named rather than carrying a [`ProcId`] since the
  /// printed form has no module to resolve an index against — the emitter's
  /// own specialization cache is what keeps a `ProcId`/name pair together.
  Direct(String),
  /// An external symbol (`printf`, `exit`, `pow`) declared by signature only.
  Extern(String),
  /// An indirect call through a function-pointer value (the generic `call`
  /// slot of a `CType`, §4.3).
  Indirect(Operand),
}

/// One instruction. `result` is `None` for side-effecting instructions with
/// no value (`store`).
#[derive(Clone, Debug)]
pub struct Inst {
  pub result: Option<ValueId>,
  pub ty: IrTy,
  pub kind: InstKind,
}

#[derive(Clone, Debug)]
pub enum InstKind {
  Binop(IrBinop, Operand, Operand),
  Unop(IrUnop, Operand),
  /// Allocate one stack slot of the given type, producing a `ptr`.
  Alloca(IrTy),
  Load(Operand),
  Store(Operand, Operand),
  /// Pointer arithmetic: `base` offset by `index * elem_size` scaled by
  /// `field`'s type, in the spirit of LLVM's `getelementptr`.
  Gep { base: Operand, index: Operand },
  Call { target: CallTarget, args: Vec<Operand> },
  /// Integer <-> float <-> pointer conversions.
  Cast { op: Operand, from: IrTy },
  /// A no-value comment instruction, emitted at pass boundaries and before
  /// notable lowering steps purely to make the printed IR legible.
  Comment(String),
}

/// How a basic block ends. Every block must end with exactly one of these;
/// nothing may be appended after it (mirrors `Return`/`Continue`/`Break`
/// each terminating emission into the current block, §4.4).
#[derive(Clone, Debug)]
pub enum Terminator {
  Br(BlockId),
  CondBr(Operand, BlockId, BlockId),
  Ret(Option<Operand>),
  Unreachable,
}

#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
  pub insts: Vec<Inst>,
  pub term: Option<Terminator>,
}

impl BasicBlock {
  #[must_use] pub fn new() -> Self { Self::default() }
  /// Whether this block has already been terminated (a `Return`/`Continue`/
  /// `Break` closed it); further instructions must go to a fresh block.
  #[must_use] pub fn is_terminated(&self) -> bool { self.term.is_some() }
}

#[derive(Clone, Debug)]
pub struct Param {
  pub value: ValueId,
  pub ty: IrTy,
}

/// One function definition: either the generic boxed-calling-convention
/// wrapper, or a monomorphic specialization (§3 "A function is represented
/// at most twice").
#[derive(Clone, Debug)]
pub struct Function {
  pub name: String,
  pub params: Vec<Param>,
  pub ret: IrTy,
  pub blocks: IdxVec<BlockId, BasicBlock>,
  next_value: u32,
}

impl Function {
  #[must_use] pub fn new(name: String, params: Vec<Param>, ret: IrTy) -> Self {
    let next_value = params.iter().map(|p| p.value.as_u32() + 1).max().unwrap_or(0);
    Self { name, params, ret, blocks: IdxVec::new(), next_value }
  }

  /// Allocate a fresh SSA value id, not yet attached to any instruction.
  pub fn fresh_value(&mut self) -> ValueId {
    let v = ValueId::from_usize(self.next_value as usize);
    self.next_value += 1;
    v
  }

  pub fn push_block(&mut self) -> BlockId { self.blocks.push(BasicBlock::new()) }
}

#[derive(Clone, Debug)]
pub struct ExternDecl {
  pub name: String,
  pub params: Vec<IrTy>,
  pub varargs: bool,
  pub ret: IrTy,
}

#[derive(Clone, Debug)]
pub struct GlobalDecl {
  pub name: String,
  pub ty: IrTy,
  pub init: Const,
}

/// A complete compiled module (§6 "Output of the emitter").
#[derive(Clone, Debug, Default)]
pub struct Module {
  pub externs: Vec<ExternDecl>,
  pub globals: Vec<GlobalDecl>,
  pub funcs: IdxVec<ProcId, Function>,
}

impl Module {
  #[must_use] pub fn new() -> Self { Self::default() }
}

impl fmt::Display for Module {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for e in &self.externs {
      write!(f, "declare {} @{}(", e.ret, e.name)?;
      for (i, p) in e.params.iter().enumerate() {
        if i > 0 { write!(f, ", ")? }
        write!(f, "{p}")?;
      }
      if e.varargs { write!(f, "{}...", if e.params.is_empty() { "" } else { ", " })? }
      writeln!(f, ")")?;
    }
    if !self.externs.is_empty() { writeln!(f)?; }
    for g in &self.globals {
      writeln!(f, "@{} = global {} {}", g.name, g.ty, g.init)?;
    }
    if !self.globals.is_empty() { writeln!(f)?; }
    for func in self.funcs.iter() {
      writeln!(f, "{func}")?;
    }
    Ok(())
  }
}

impl fmt::Display for Function {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "define {} @{}(", self.ret, self.name)?;
    for (i, p) in self.params.iter().enumerate() {
      if i > 0 { write!(f, ", ")? }
      write!(f, "{} %{}", p.ty, p.value.as_u32())?;
    }
    writeln!(f, ") {{")?;
    for (id, block) in self.blocks.enum_iter() {
      writeln!(f, "bb{}:", id.as_u32())?;
      for inst in &block.insts {
        write!(f, "  ")?;
        if let Some(r) = inst.result { write!(f, "%{} = ", r.as_u32())?; }
        writeln!(f, "{}", fmt_inst_kind(&inst.kind, &inst.ty))?;
      }
      match &block.term {
        Some(Terminator::Br(tgt)) => writeln!(f, "  br label %bb{}", tgt.as_u32())?,
        Some(Terminator::CondBr(cond, t, e)) => {
          writeln!(f, "  br i1 {cond}, label %bb{}, label %bb{}", t.as_u32(), e.as_u32())?;
        }
        Some(Terminator::Ret(Some(v))) => writeln!(f, "  ret {} {v}", self.ret)?,
        Some(Terminator::Ret(None)) => writeln!(f, "  ret void")?,
        Some(Terminator::Unreachable) => writeln!(f, "  unreachable")?,
        None => writeln!(f, "  ; <unterminated>")?,
      }
    }
    writeln!(f, "}}")
  }
}

fn fmt_inst_kind(kind: &InstKind, ty: &IrTy) -> String {
  match kind {
    InstKind::Binop(op, a, b) => format!("{op} {ty} {a}, {b}"),
    InstKind::Unop(op, a) => format!("{op} {ty} {a}"),
    InstKind::Alloca(t) => format!("alloca {t}"),
    InstKind::Load(p) => format!("load {ty}, ptr {p}"),
    InstKind::Store(p, v) => format!("store {v}, ptr {p}"),
    InstKind::Gep { base, index } => format!("getelementptr {ty}, ptr {base}, i64 {index}"),
    InstKind::Call { target, args } => {
      let callee = match target {
        CallTarget::Direct(name) | CallTarget::Extern(name) => format!("@{name}"),
        CallTarget::Indirect(op) => op.to_string(),
      };
      let args = args.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
      format!("call {ty} {callee}({args})")
    }
    InstKind::Cast { op, from } => format!("cast {from} {op} to {ty}"),
    InstKind::Comment(s) => format!("; {s}"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_function_prints_entry_block_and_ret() {
    let mut func = Function::new("main".to_string(), vec![], IrTy::I32);
    let bb = func.push_block();
    assert_eq!(bb, BlockId::ENTRY);
    func.blocks[bb].term = Some(Terminator::Ret(Some(Operand::Const(Const::I32(0)))));
    let text = func.to_string();
    assert!(text.contains("define i32 @main"));
    assert!(text.contains("ret i32 0"));
  }
}
