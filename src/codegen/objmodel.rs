//! The uniform object representation and its operator dispatch tables
//! (§3 "Object representation (IR level)", §4.3). Every emitted value is a
//! `CObj { data: byte*, type: CType* }`; `CType` is a 20-slot table of
//! operation thunks, one static instance per primitive type. This module
//! only describes the table declaratively — `codegen::mod` is what actually
//! walks it to emit the per-type operator functions and the `CType`
//! constants into an [`crate::codegen::ir::Module`].

use bitflags::bitflags;
use crate::codegen::ir::{IrBinop, IrTy, IrUnop};

/// One of the seven primitive types that get a statically-initialized
/// `CType` (§4.3).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimType {
  Int,
  Float,
  Bool,
  Char,
  List,
  String,
  Func,
}

impl PrimType {
  pub const ALL: [PrimType; 7] =
    [PrimType::Int, PrimType::Float, PrimType::Bool, PrimType::Char, PrimType::List, PrimType::String, PrimType::Func];

  /// The symbol-name fragment used for this type's emitted operator
  /// functions and its `CType` global (e.g. `int_add`, `@ctype_int`).
  #[must_use] pub fn keyword(self) -> &'static str {
    match self {
      PrimType::Int => "int",
      PrimType::Float => "float",
      PrimType::Bool => "bool",
      PrimType::Char => "char",
      PrimType::List => "list",
      PrimType::String => "string",
      PrimType::Func => "func",
    }
  }

  /// The raw IR type this primitive's `CObj.data` field is interpreted as
  /// once unboxed (§4.4 "heapify", "raw addressing").
  #[must_use] pub fn data_ty(self) -> IrTy {
    match self {
      PrimType::Int => IrTy::I64,
      PrimType::Float => IrTy::F64,
      PrimType::Bool => IrTy::I1,
      PrimType::Char => IrTy::I8,
      PrimType::List | PrimType::String | PrimType::Func => IrTy::Ptr,
    }
  }
}

/// The 20 `CType` slots, in the fixed order the spec requires (§3).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
  Add, Sub, Mul, Div, Exp, Eq, Neq, Lt, Le, Gt, Ge, And, Or,
  Idx, IdxParent, Neg, Not, Heapify, Print, Call,
}

/// The canonical slot order a `CType`'s 20 function pointers are laid out
/// in; also the order `codegen::mod` writes them when building the global
/// constant.
pub const SLOT_ORDER: [Slot; 20] = [
  Slot::Add, Slot::Sub, Slot::Mul, Slot::Div, Slot::Exp, Slot::Eq, Slot::Neq,
  Slot::Lt, Slot::Le, Slot::Gt, Slot::Ge, Slot::And, Slot::Or,
  Slot::Idx, Slot::IdxParent, Slot::Neg, Slot::Not, Slot::Heapify, Slot::Print, Slot::Call,
];

impl Slot {
  #[must_use] pub fn keyword(self) -> &'static str {
    match self {
      Slot::Add => "add", Slot::Sub => "sub", Slot::Mul => "mul", Slot::Div => "div", Slot::Exp => "exp",
      Slot::Eq => "eq", Slot::Neq => "neq", Slot::Lt => "lt", Slot::Le => "le", Slot::Gt => "gt", Slot::Ge => "ge",
      Slot::And => "and", Slot::Or => "or", Slot::Idx => "idx", Slot::IdxParent => "idx_parent",
      Slot::Neg => "neg", Slot::Not => "not", Slot::Heapify => "heapify", Slot::Print => "print", Slot::Call => "call",
    }
  }
}

bitflags! {
  /// Which of a `CType`'s 20 slots are populated with a real function
  /// pointer rather than null (§4.3 item 2: "a null function pointer"
  /// marks an unsupported operation). Mirrors the role `ArgAttr` plays for
  /// per-argument capabilities in the teacher crate's MIR.
  #[derive(Copy, Clone, Debug, PartialEq, Eq)]
  pub struct SlotMask: u32 {
    const ADD = 1 << 0;
    const SUB = 1 << 1;
    const MUL = 1 << 2;
    const DIV = 1 << 3;
    const EXP = 1 << 4;
    const EQ = 1 << 5;
    const NEQ = 1 << 6;
    const LT = 1 << 7;
    const LE = 1 << 8;
    const GT = 1 << 9;
    const GE = 1 << 10;
    const AND = 1 << 11;
    const OR = 1 << 12;
    const IDX = 1 << 13;
    const IDX_PARENT = 1 << 14;
    const NEG = 1 << 15;
    const NOT = 1 << 16;
    const HEAPIFY = 1 << 17;
    const PRINT = 1 << 18;
    const CALL = 1 << 19;
  }
}

impl Slot {
  #[must_use] pub fn mask(self) -> SlotMask {
    match self {
      Slot::Add => SlotMask::ADD, Slot::Sub => SlotMask::SUB, Slot::Mul => SlotMask::MUL,
      Slot::Div => SlotMask::DIV, Slot::Exp => SlotMask::EXP, Slot::Eq => SlotMask::EQ,
      Slot::Neq => SlotMask::NEQ, Slot::Lt => SlotMask::LT, Slot::Le => SlotMask::LE,
      Slot::Gt => SlotMask::GT, Slot::Ge => SlotMask::GE, Slot::And => SlotMask::AND, Slot::Or => SlotMask::OR,
      Slot::Idx => SlotMask::IDX, Slot::IdxParent => SlotMask::IDX_PARENT, Slot::Neg => SlotMask::NEG,
      Slot::Not => SlotMask::NOT, Slot::Heapify => SlotMask::HEAPIFY, Slot::Print => SlotMask::PRINT,
      Slot::Call => SlotMask::CALL,
    }
  }
}

/// How a given `(type, slot)` operator function's body is built (§4.3 item
/// 1: "apply the builder, wrap the result in a freshly allocated `CObj`").
#[derive(Copy, Clone, Debug)]
pub enum Builder {
  /// A plain binary instruction on the two unboxed data fields.
  Bin(IrBinop),
  /// A plain unary instruction on the unboxed data field.
  Un(IrUnop),
  /// `String`'s `add`: allocate `len1+len2` char-pointer slots and copy both
  /// sources' pointers in (shallow, §4.3).
  StringConcat,
  /// `List`'s `add`: identical shape to `StringConcat` but over `CObj*`
  /// elements instead of chars.
  ListConcat,
  /// Shared by `List`/`String` `idx`: bounds-check, then load the stored
  /// `CObj*` (list) or build a fresh single-char `CString` (string).
  ListIdx,
  StringIdx,
  /// `idx_parent`: return a pointer to the slot itself, for indexed
  /// assignment.
  IdxParent,
  /// Copies the raw value into a fresh heap allocation for scalar types; a
  /// no-op passthrough for already-heap types.
  HeapifyScalar,
  HeapifyNoop,
  /// Per-type `print` thunk (`%d`/`%g`/`%d`/`%c`, or the list/string
  /// iteration forms, §4.3).
  PrintScalar(&'static str),
  PrintList,
  PrintString,
  /// The generic boxed call convention's `call` slot (§4.4 generic path).
  CallFunc,
  /// `Exp`: goes through a floating-point `pow`, converting back to `int`
  /// when `to_int` is set (§4.3, "exponentiation goes through a
  /// floating-point pow and converts back to int").
  Exp { to_int: bool },
}

/// One populated `(type, slot)` cell.
#[derive(Copy, Clone, Debug)]
pub struct OpEntry {
  pub prim: PrimType,
  pub slot: Slot,
  pub builder: Builder,
}

/// The declarative operator table (§4.3 item 1, §9 "implausible operator
/// table cells"). Absent `(type, slot)` pairs compile to a null function
/// pointer in that type's `CType`.
///
/// Preserves the table's one implausible cell exactly as specified: `Or` on
/// `Char` is wired through the same integer logical-or builder used for
/// `Int`/`Bool`, rather than being left unsupported. Not a bug to fix here —
/// see DESIGN.md Open Question 2.
pub static OP_TABLE: &[OpEntry] = &[
  // Int
  OpEntry { prim: PrimType::Int, slot: Slot::Add, builder: Builder::Bin(IrBinop::AddI) },
  OpEntry { prim: PrimType::Int, slot: Slot::Sub, builder: Builder::Bin(IrBinop::SubI) },
  OpEntry { prim: PrimType::Int, slot: Slot::Mul, builder: Builder::Bin(IrBinop::MulI) },
  OpEntry { prim: PrimType::Int, slot: Slot::Div, builder: Builder::Bin(IrBinop::SDivI) },
  OpEntry { prim: PrimType::Int, slot: Slot::Exp, builder: Builder::Exp { to_int: true } },
  OpEntry { prim: PrimType::Int, slot: Slot::Eq, builder: Builder::Bin(IrBinop::ICmpEq) },
  OpEntry { prim: PrimType::Int, slot: Slot::Neq, builder: Builder::Bin(IrBinop::ICmpNe) },
  OpEntry { prim: PrimType::Int, slot: Slot::Lt, builder: Builder::Bin(IrBinop::ICmpSlt) },
  OpEntry { prim: PrimType::Int, slot: Slot::Le, builder: Builder::Bin(IrBinop::ICmpSle) },
  OpEntry { prim: PrimType::Int, slot: Slot::Gt, builder: Builder::Bin(IrBinop::ICmpSgt) },
  OpEntry { prim: PrimType::Int, slot: Slot::Ge, builder: Builder::Bin(IrBinop::ICmpSge) },
  OpEntry { prim: PrimType::Int, slot: Slot::And, builder: Builder::Bin(IrBinop::And) },
  OpEntry { prim: PrimType::Int, slot: Slot::Or, builder: Builder::Bin(IrBinop::Or) },
  OpEntry { prim: PrimType::Int, slot: Slot::Neg, builder: Builder::Un(IrUnop::NegI) },
  OpEntry { prim: PrimType::Int, slot: Slot::Not, builder: Builder::Un(IrUnop::Not) },
  OpEntry { prim: PrimType::Int, slot: Slot::Heapify, builder: Builder::HeapifyScalar },
  OpEntry { prim: PrimType::Int, slot: Slot::Print, builder: Builder::PrintScalar("%d") },
  // Float
  OpEntry { prim: PrimType::Float, slot: Slot::Add, builder: Builder::Bin(IrBinop::AddF) },
  OpEntry { prim: PrimType::Float, slot: Slot::Sub, builder: Builder::Bin(IrBinop::SubF) },
  OpEntry { prim: PrimType::Float, slot: Slot::Mul, builder: Builder::Bin(IrBinop::MulF) },
  OpEntry { prim: PrimType::Float, slot: Slot::Div, builder: Builder::Bin(IrBinop::DivF) },
  OpEntry { prim: PrimType::Float, slot: Slot::Exp, builder: Builder::Exp { to_int: false } },
  OpEntry { prim: PrimType::Float, slot: Slot::Eq, builder: Builder::Bin(IrBinop::FCmpUeq) },
  OpEntry { prim: PrimType::Float, slot: Slot::Neq, builder: Builder::Bin(IrBinop::FCmpUne) },
  OpEntry { prim: PrimType::Float, slot: Slot::Lt, builder: Builder::Bin(IrBinop::FCmpUlt) },
  OpEntry { prim: PrimType::Float, slot: Slot::Le, builder: Builder::Bin(IrBinop::FCmpUle) },
  OpEntry { prim: PrimType::Float, slot: Slot::Gt, builder: Builder::Bin(IrBinop::FCmpUgt) },
  OpEntry { prim: PrimType::Float, slot: Slot::Ge, builder: Builder::Bin(IrBinop::FCmpUge) },
  OpEntry { prim: PrimType::Float, slot: Slot::Neg, builder: Builder::Un(IrUnop::NegF) },
  OpEntry { prim: PrimType::Float, slot: Slot::Heapify, builder: Builder::HeapifyScalar },
  OpEntry { prim: PrimType::Float, slot: Slot::Print, builder: Builder::PrintScalar("%g") },
  // Bool
  OpEntry { prim: PrimType::Bool, slot: Slot::Eq, builder: Builder::Bin(IrBinop::ICmpEq) },
  OpEntry { prim: PrimType::Bool, slot: Slot::Neq, builder: Builder::Bin(IrBinop::ICmpNe) },
  OpEntry { prim: PrimType::Bool, slot: Slot::And, builder: Builder::Bin(IrBinop::And) },
  OpEntry { prim: PrimType::Bool, slot: Slot::Or, builder: Builder::Bin(IrBinop::Or) },
  OpEntry { prim: PrimType::Bool, slot: Slot::Not, builder: Builder::Un(IrUnop::Not) },
  OpEntry { prim: PrimType::Bool, slot: Slot::Heapify, builder: Builder::HeapifyScalar },
  OpEntry { prim: PrimType::Bool, slot: Slot::Print, builder: Builder::PrintScalar("%d") },
  // Char (never directly constructible by the analyzer, only appears boxed
  // inside a `CString`'s `CList`; still gets a full `CType`, §4.3).
  OpEntry { prim: PrimType::Char, slot: Slot::Eq, builder: Builder::Bin(IrBinop::ICmpEq) },
  OpEntry { prim: PrimType::Char, slot: Slot::Neq, builder: Builder::Bin(IrBinop::ICmpNe) },
  OpEntry { prim: PrimType::Char, slot: Slot::Or, builder: Builder::Bin(IrBinop::Or) },
  OpEntry { prim: PrimType::Char, slot: Slot::Heapify, builder: Builder::HeapifyScalar },
  OpEntry { prim: PrimType::Char, slot: Slot::Print, builder: Builder::PrintScalar("%c") },
  // List
  OpEntry { prim: PrimType::List, slot: Slot::Add, builder: Builder::ListConcat },
  OpEntry { prim: PrimType::List, slot: Slot::Idx, builder: Builder::ListIdx },
  OpEntry { prim: PrimType::List, slot: Slot::IdxParent, builder: Builder::IdxParent },
  OpEntry { prim: PrimType::List, slot: Slot::Heapify, builder: Builder::HeapifyNoop },
  OpEntry { prim: PrimType::List, slot: Slot::Print, builder: Builder::PrintList },
  // String
  OpEntry { prim: PrimType::String, slot: Slot::Add, builder: Builder::StringConcat },
  OpEntry { prim: PrimType::String, slot: Slot::Idx, builder: Builder::StringIdx },
  OpEntry { prim: PrimType::String, slot: Slot::IdxParent, builder: Builder::IdxParent },
  OpEntry { prim: PrimType::String, slot: Slot::Heapify, builder: Builder::HeapifyNoop },
  OpEntry { prim: PrimType::String, slot: Slot::Print, builder: Builder::PrintString },
  // Func
  OpEntry { prim: PrimType::Func, slot: Slot::Heapify, builder: Builder::HeapifyNoop },
  OpEntry { prim: PrimType::Func, slot: Slot::Call, builder: Builder::CallFunc },
];

/// Look up the builder for a `(type, slot)` pair, if the table defines one.
#[must_use] pub fn lookup(prim: PrimType, slot: Slot) -> Option<Builder> {
  OP_TABLE.iter().find(|e| e.prim == prim && e.slot == slot).map(|e| e.builder)
}

/// Which slots are populated for a given type, derived from [`OP_TABLE`].
#[must_use] pub fn slot_mask(prim: PrimType) -> SlotMask {
  OP_TABLE.iter().filter(|e| e.prim == prim).fold(SlotMask::empty(), |m, e| m | e.slot.mask())
}

/// The emitted symbol name for a type's operator function at one slot, e.g.
/// `int_add`.
#[must_use] pub fn op_symbol(prim: PrimType, slot: Slot) -> String {
  format!("{}_{}", prim.keyword(), slot.keyword())
}

/// The emitted symbol name for a type's global `CType` constant, e.g.
/// `ctype_int`.
#[must_use] pub fn ctype_symbol(prim: PrimType) -> String {
  format!("ctype_{}", prim.keyword())
}

/// Byte layout of `CObj`: `{ data: ptr, type: ptr }`. Field offsets are in
/// machine words (one pointer each), used by `codegen::mod` to build `Gep`s.
pub mod layout {
  pub const COBJ_DATA_OFFSET: i64 = 0;
  pub const COBJ_TYPE_OFFSET: i64 = 1;
  /// `CList`/`CString`: `{ data: ptr, len: i32, cap: i32 }`.
  pub const CLIST_DATA_OFFSET: i64 = 0;
  pub const CLIST_LEN_OFFSET: i64 = 1;
  pub const CLIST_CAP_OFFSET: i64 = 2;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn int_has_no_idx_slot() {
    assert!(lookup(PrimType::Int, Slot::Idx).is_none());
  }

  #[test]
  fn char_or_quirk_is_preserved() {
    assert!(matches!(lookup(PrimType::Char, Slot::Or), Some(Builder::Bin(IrBinop::Or))));
  }

  #[test]
  fn list_has_no_arithmetic_slots() {
    assert!(lookup(PrimType::List, Slot::Mul).is_none());
    assert!(lookup(PrimType::List, Slot::Add).is_some());
  }

  #[test]
  fn slot_mask_matches_table() {
    let mask = slot_mask(PrimType::Int);
    assert!(mask.contains(SlotMask::ADD));
    assert!(!mask.contains(SlotMask::IDX));
  }
}
