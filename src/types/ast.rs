//! The untyped AST (§2): the parser's output and the semantic analyzer's
//! input. Nothing in this module is produced by this crate; it is the
//! external interface the (out-of-scope) parser targets.

use std::rc::Rc;
use smallvec::SmallVec;
use crate::intern::Symbol;
use crate::types::ty::Type;

/// A binary operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Binop {
  Add, Sub, Mul, Div, Exp,
  Eq, Neq, Lt, Le, Gt, Ge,
  And, Or,
}

/// A unary operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Unop { Neg, Not }

/// An expression.
#[derive(Clone, Debug)]
pub enum Expr {
  /// An integer, float, bool or string literal.
  Lit(Lit),
  /// A variable reference.
  Var(Symbol),
  Binop(Binop, Box<Expr>, Box<Expr>),
  Unop(Unop, Box<Expr>),
  /// A function call `f(args...)`.
  Call(Box<Expr>, Vec<Expr>),
  /// A list literal `[e1, e2, ...]`.
  List(Vec<Expr>),
  /// `arr[idx]`.
  ListAccess(Box<Expr>, Box<Expr>),
  /// `e as T`.
  Cast(Box<Expr>, Type),
  /// `e.field` — always rejected by the analyzer (no classes, SPEC_FULL
  /// §4.1); kept in the AST so the external parser can emit it.
  Field(Box<Expr>, Symbol),
  /// `e.method(args...)` — likewise always rejected.
  Method(Box<Expr>, Symbol, Vec<Expr>),
}

/// A literal value.
#[derive(Clone, Debug, PartialEq)]
pub enum Lit {
  Int(i64),
  Float(f64),
  Bool(bool),
  Str(Rc<str>),
}

/// An lvalue as written in source: either a bare name or an indexed slot.
/// `Asn` may target several of these at once (`a, b = 1, 2`).
#[derive(Clone, Debug)]
pub enum LvalueExpr {
  Name(Symbol),
  Index(Box<Expr>, Box<Expr>),
}

/// A formal parameter: `(name, explicit type)`, `Dyn` if unannotated.
pub type Formal = (Symbol, Type);

/// A function declaration.
#[derive(Clone, Debug)]
pub struct FuncDecl {
  pub name: Symbol,
  pub formals: Vec<Formal>,
  /// `Dyn` if the source gave no `-> T` annotation.
  pub ret: Type,
  pub body: Vec<Stmt>,
}

/// A statement.
#[derive(Clone, Debug)]
pub enum Stmt {
  Block(Vec<Stmt>),
  /// `lhs1, lhs2, ... = rhs`. Most assignments have exactly one lvalue.
  Asn(SmallVec<[LvalueExpr; 1]>, Expr),
  If(Expr, Vec<Stmt>, Vec<Stmt>),
  While(Expr, Vec<Stmt>),
  /// `for name in iterable: body`.
  For(Symbol, Expr, Vec<Stmt>),
  /// `for name in range(n): body`.
  Range(Symbol, Expr, Vec<Stmt>),
  Return(Option<Expr>),
  Func(Rc<FuncDecl>),
  Expr(Expr),
  Print(Expr),
  /// `name: T` with no value, a forward type declaration.
  Type(Symbol, Type),
  Nop,
  /// An import whose resolution already happened upstream (§1).
  Import(Symbol),
  /// A class definition — always rejected, see SPEC_FULL §4.1.
  Class(Symbol, Vec<Stmt>),
  Continue,
  Break,
}
