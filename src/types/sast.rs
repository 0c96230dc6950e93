//! The annotated AST (SAST, §2): the semantic analyzer's output and the
//! emitter's input. Every expression carries its inferred [`Type`]; calls
//! carry either a specialized function record or a generic dispatch
//! [`Stage`]; a dedicated [`SStmt::Transform`] statement records the
//! boxing/unboxing moves computed by [`crate::semant::transform`].

use std::rc::Rc;
use crate::intern::Symbol;
use crate::types::ast::{Binop, Lit, Unop};
use crate::types::ty::Type;

/// A type-annotated expression.
#[derive(Clone, Debug)]
pub struct SExpr {
  pub ty: Type,
  pub kind: Box<SExprKind>,
}

impl SExpr {
  #[must_use] pub fn new(ty: Type, kind: SExprKind) -> Self { Self { ty, kind: Box::new(kind) } }
}

/// The shape of a type-annotated expression.
#[derive(Clone, Debug)]
pub enum SExprKind {
  Lit(Lit),
  Var(Symbol),
  Binop(Binop, SExpr, SExpr),
  Unop(Unop, SExpr),
  Call(SExpr, Vec<SExpr>, CallMode),
  List(Vec<SExpr>),
  ListAccess(SExpr, SExpr),
  Cast(SExpr, Type),
}

/// How a call site is compiled: either to a specific monomorphic
/// specialization (§4.1 step 5), or through the generic boxed-calling
/// convention wrapped in entry/exit [`Transform`]s (§4.1, last paragraph).
#[derive(Clone, Debug)]
pub enum CallMode {
  Specialized(Rc<SFunc>),
  Generic(Stage<()>),
}

/// An lvalue in the SAST: a plain name, or an indexed slot of an array-typed
/// expression (whose own type has already been checked).
#[derive(Clone, Debug)]
pub enum Lvalue {
  Name(Symbol),
  Index(SExpr, SExpr),
}

/// A boxing/unboxing move, the output of transform synthesis (§4.2, §4.5).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transform {
  pub name: Symbol,
  pub from: Type,
  pub to: Type,
}

/// A `(entry_transforms, body, exit_transforms)` wrapper (§2 GLOSSARY,
/// "Stage"). Used both around generic calls (`body = ()`) and around loops
/// (`body = Vec<SStmt>`).
#[derive(Clone, Debug)]
pub struct Stage<B> {
  pub entry: Vec<Transform>,
  pub body: B,
  pub exit: Vec<Transform>,
}

/// A specialized (or generic, with every formal `Dyn`) function record.
#[derive(Debug)]
pub struct SFunc {
  pub return_type: Type,
  pub name: Symbol,
  pub formals: Vec<(Symbol, Type)>,
  pub locals: Vec<(Symbol, Type)>,
  pub body: Vec<SStmt>,
}

/// An annotated statement.
#[derive(Clone, Debug)]
pub enum SStmt {
  Block(Vec<SStmt>),
  Asn(Vec<Lvalue>, SExpr),
  If(SExpr, Vec<SStmt>, Vec<SStmt>),
  While(SExpr, Stage<Vec<SStmt>>),
  For(Symbol, SExpr, Stage<Vec<SStmt>>),
  Range(Symbol, SExpr, Stage<Vec<SStmt>>),
  Return(Option<SExpr>),
  /// The generic, fully-`Dyn`-parameterized version of a function
  /// declaration. Always emitted so the function is first-class
  /// (§9 "Dual calling conventions").
  Func(Rc<SFunc>),
  Expr(SExpr),
  Print(SExpr),
  Nop,
  Transform(Transform),
  Continue,
  Break,
}
