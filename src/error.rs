//! Error types (§7). Static errors are a plain enum with a hand-written
//! `Display` impl that reproduces the bit-exact prefixed messages from §6 —
//! the same style the teacher crate uses for its own `LowerErr`
//! (`build_vcode.rs`) rather than reaching for `thiserror`.

use crate::intern::Symbol;
use crate::types::ty::Type;

/// A static error raised by the semantic analyzer (§7 tier 1). Fatal: the
/// first one aborts the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticError {
  /// A type mismatch detected during inference (binop/unop/cast/assignment/
  /// return-type rules).
  Type(String),
  /// A name was referenced that is not bound in the current environment
  /// (outside of `noeval` scanning).
  Name(Symbol),
  /// A construct the grammar allows but this compiler does not support:
  /// invalid lvalues, duplicate formals, call-arity mismatches, explicit
  /// typing introduced for the first time inside a conditional branch.
  Syntax(String),
  /// A deliberately unimplemented language feature: classes, field/method
  /// access (§1 Non-goals).
  NotImplemented(String),
}

impl std::fmt::Display for StaticError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      StaticError::Type(msg) => write!(f, "STypeError: {msg}"),
      StaticError::Name(n) => write!(f, "SNameError: name '{n}' is not defined"),
      StaticError::Syntax(msg) => write!(f, "SSyntaxError: {msg}"),
      StaticError::NotImplemented(msg) => write!(f, "SNotImplementedError: {msg}"),
    }
  }
}

impl std::error::Error for StaticError {}

impl StaticError {
  /// Build a [`StaticError::Type`] for a binop whose operand types don't
  /// fit any rule in §4.1's inference table.
  #[must_use] pub fn bad_binop(op: &str, lhs: &Type, rhs: &Type) -> Self {
    Self::Type(format!("unsupported operand type(s) for binary {op}: '{lhs}' and '{rhs}'"))
  }

  /// Build a [`StaticError::Type`] for a unop whose operand type doesn't fit.
  #[must_use] pub fn bad_unop(op: &str, ty: &Type) -> Self {
    Self::Type(format!("unsupported operand type for unary {op}: '{ty}'"))
  }
}

/// The top-level error type returned by [`crate::compile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
  Static(StaticError),
}

impl From<StaticError> for CompileError {
  fn from(e: StaticError) -> Self { CompileError::Static(e) }
}

impl std::fmt::Display for CompileError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CompileError::Static(e) => e.fmt(f),
    }
  }
}

impl std::error::Error for CompileError {}

/// The fixed runtime error messages the emitter embeds into guarded IR
/// (§4.6, §6). Bit-exact strings, kept in one place so both the emitter and
/// its tests refer to the same constants.
pub mod runtime_messages {
  /// `"RuntimeError: name '<n>' is not defined"`
  #[must_use] pub fn name_not_defined(n: &str) -> String {
    format!("RuntimeError: name '{n}' is not defined")
  }
  /// `"RuntimeError: unsupported operand type(s) for binary <op>"`
  #[must_use] pub fn bad_binop(op: &str) -> String {
    format!("RuntimeError: unsupported operand type(s) for binary {op}")
  }
  /// `"RuntimeError: unsupported operand type(s) for list access"`
  pub const BAD_LIST_ACCESS: &str = "RuntimeError: unsupported operand type(s) for list access";
  /// `"RuntimeError: list index out of bounds"`
  pub const INDEX_OUT_OF_BOUNDS: &str = "RuntimeError: list index out of bounds";
  /// `"RuntimeError: invalid type assigned to <n>"`
  #[must_use] pub fn invalid_assign_type(n: &str) -> String {
    format!("RuntimeError: invalid type assigned to {n}")
  }
  /// `"RuntimeError: invalid return type (expected <T>)"`
  #[must_use] pub fn invalid_return_type(expected: &str) -> String {
    format!("RuntimeError: invalid return type (expected {expected})")
  }
  /// `"RuntimeError: invalid boolean type in if statement"`
  pub const BAD_IF_BOOL: &str = "RuntimeError: invalid boolean type in if statement";
  /// `"RuntimeError: invalid boolean type in while statement"`
  pub const BAD_WHILE_BOOL: &str = "RuntimeError: invalid boolean type in while statement";
  /// `"RuntimeError: unsupported operand type for unary <op>"`
  #[must_use] pub fn bad_unop(op: &str) -> String {
    format!("RuntimeError: unsupported operand type for unary {op}")
  }
}
