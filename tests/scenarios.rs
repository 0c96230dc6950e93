//! End-to-end scenarios (SPEC_FULL §8), run directly against hand-built
//! `ast::Stmt` trees — there's no lexer/parser in this crate's scope (see
//! `src/lib.rs`), so these stand in for source-level test programs.

use std::rc::Rc;
use smallvec::smallvec;

use pylite_compiler::codegen::ir::{Const, IrTy, Module};
use pylite_compiler::codegen::{compile, compile_with, CompileOptions};
use pylite_compiler::intern::{self, Symbol};
use pylite_compiler::types::ast::{Binop, Expr, FuncDecl, Lit, LvalueExpr, Stmt};
use pylite_compiler::types::ty::Type;

fn sym(s: &str) -> Symbol { intern::intern(s) }

fn asn(name: Symbol, rhs: Expr) -> Stmt { Stmt::Asn(smallvec![LvalueExpr::Name(name)], rhs) }

fn int(n: i64) -> Expr { Expr::Lit(Lit::Int(n)) }
fn float(n: f64) -> Expr { Expr::Lit(Lit::Float(n)) }
fn string(s: &str) -> Expr { Expr::Lit(Lit::Str(Rc::from(s))) }
fn var(s: Symbol) -> Expr { Expr::Var(s) }

fn main_fn(m: &Module) -> &pylite_compiler::codegen::ir::Function {
  m.funcs.iter().find(|f| f.name == "main").expect("a main function is always emitted")
}

fn find_fn<'a>(m: &'a Module, name: &str) -> Option<&'a pylite_compiler::codegen::ir::Function> {
  m.funcs.iter().find(|f| f.name == name)
}

/// Decode a `Const::Array(IrTy::I8, ...)` global's bytes back to a `String`,
/// stopping at the first NUL (`cstr_global` always appends one).
fn decode_cstring_global(m: &Module, name: &str) -> String {
  let g = m.globals.iter().find(|g| g.name == name).unwrap_or_else(|| panic!("no global named {name}"));
  let Const::Array(IrTy::I8, bytes) = &g.init else { panic!("global {name} is not a byte array") };
  let mut s = String::new();
  for b in bytes {
    let Const::I8(byte) = b else { panic!("non-I8 element in byte array global") };
    if *byte == 0 { break; }
    s.push(*byte as u8 as char);
  }
  s
}

/// Every string-literal-backed global is named `str<N>`; find the one whose
/// decoded text contains `needle`.
fn any_global_contains(m: &Module, needle: &str) -> bool {
  m.globals.iter().any(|g| {
    if let Const::Array(IrTy::I8, _) = &g.init { decode_cstring_global(m, &g.name).contains(needle) } else { false }
  })
}

// ---- scenario 1: straight-line raw arithmetic never boxes ----

#[test]
fn straight_line_ints_stay_raw() {
  let x = sym("x");
  let y = sym("y");
  let prog = vec![
    asn(x, int(1)),
    asn(y, int(2)),
    Stmt::Print(Expr::Binop(Binop::Add, Box::new(var(x)), Box::new(var(y)))),
  ];
  let module = compile(&prog).expect("a well-typed program compiles");
  let text = main_fn(&module).to_string();
  assert!(text.contains("add i64"), "expected a raw i64 add, got:\n{text}");
  assert!(!text.contains("ctype_"), "raw arithmetic should never touch a CType dispatch table, got:\n{text}");
}

// ---- scenario 2: dynify allocates both slots, and the first store stays raw ----

#[test]
fn reassigning_to_a_different_type_gets_dual_slots() {
  let x = sym("x");
  let prog = vec![
    asn(x, int(1)),
    asn(x, string("hi")),
    Stmt::Print(var(x)),
  ];
  let module = compile(&prog).expect("reassignment to a different concrete type dynifies, it doesn't error");
  assert!(module.globals.iter().any(|g| g.name == "g_x_raw"), "x needs a raw slot");
  assert!(module.globals.iter().any(|g| g.name == "g_x_box"), "x needs a box slot");
  let text = main_fn(&module).to_string();
  assert!(text.contains("store 1, ptr @g_x_raw"), "the first assignment must go into the raw slot, got:\n{text}");
  assert!(!text.contains("store 1, ptr @g_x_box"), "the first assignment must not corrupt the box slot, got:\n{text}");
}

// ---- scenario 3: an annotated formal specializes to exactly one variant ----

#[test]
fn annotated_call_specializes_once() {
  let f = sym("f");
  let a = sym("a");
  let decl = FuncDecl {
    name: f,
    formals: vec![(a, Type::Int)],
    ret: Type::Int,
    body: vec![Stmt::Return(Some(Expr::Binop(Binop::Add, Box::new(var(a)), Box::new(int(1)))))],
  };
  let prog = vec![
    Stmt::Func(Rc::new(decl)),
    Stmt::Print(Expr::Call(Box::new(var(f)), vec![int(5)])),
  ];
  let module = compile(&prog).expect("a fully-annotated call compiles");
  let specialized: Vec<_> = module.funcs.iter().filter(|fun| fun.name.starts_with("f__spec")).collect();
  assert_eq!(specialized.len(), 1, "exactly one specialization should be built, found {:?}", specialized.iter().map(|f| &f.name).collect::<Vec<_>>());
  assert_eq!(specialized[0].name, "f__spec_int");
  assert_eq!(specialized[0].ret, IrTy::I64);
}

// ---- scenario 4: an out-of-bounds index traps, not segfaults ----

#[test]
fn out_of_bounds_list_access_traps() {
  let l = sym("L");
  let prog = vec![
    asn(l, Expr::List(vec![int(1), int(2), int(3)])),
    Stmt::Expr(Expr::ListAccess(Box::new(var(l)), Box::new(int(5)))),
  ];
  let module = compile_with(&prog, CompileOptions::default()).expect("the analyzer can't rule out an OOB index statically");
  let text = main_fn(&module).to_string();
  assert!(text.contains("call i32 @exit(1)"), "an OOB access must call exit(1), got:\n{text}");
  assert!(text.contains("unreachable"), "the trap block must end in unreachable, got:\n{text}");
  assert!(any_global_contains(&module, "list index out of bounds"), "the trap message must be embedded somewhere in the module's globals");
}

#[test]
fn negative_list_index_shares_the_same_bounds_guard() {
  let l = sym("L");
  let prog = vec![
    asn(l, Expr::List(vec![int(1), int(2), int(3)])),
    Stmt::Expr(Expr::ListAccess(Box::new(var(l)), Box::new(int(-1)))),
  ];
  let module = compile(&prog).expect("a negative literal index is not statically rejected");
  let text = main_fn(&module).to_string();
  assert!(text.contains("icmp sge"), "the guard must check non-negativity, got:\n{text}");
  assert!(text.contains("unreachable"));
}

// ---- scenario 5: an unannotated (Dyn) formal specializes per call site ----

#[test]
fn unannotated_formal_specializes_per_call_site() {
  let f = sym("f");
  let x = sym("x");
  let decl = FuncDecl {
    name: f,
    formals: vec![(x, Type::Dyn)],
    ret: Type::Dyn,
    body: vec![Stmt::Return(Some(Expr::Binop(Binop::Add, Box::new(var(x)), Box::new(var(x)))))],
  };
  let prog = vec![
    Stmt::Func(Rc::new(decl)),
    Stmt::Print(Expr::Call(Box::new(var(f)), vec![int(1)])),
    Stmt::Print(Expr::Call(Box::new(var(f)), vec![float(1.5)])),
  ];
  let module = compile(&prog).expect("each call site specializes independently");
  assert!(find_fn(&module, "f__spec_int").is_some(), "expected an int specialization");
  assert!(find_fn(&module, "f__spec_float").is_some(), "expected a float specialization");
  let specialized_count = module.funcs.iter().filter(|fun| fun.name.starts_with("f__spec")).count();
  assert_eq!(specialized_count, 2, "one specialization per distinct call-site argument type, no more");
}

// ---- scenario 6: a name reassigned to different types on each arm of an `If` ----

#[test]
fn branch_local_dynify_compiles_and_does_not_panic() {
  let x = sym("x");
  let cond = Expr::Lit(Lit::Bool(true));
  let prog = vec![
    Stmt::If(cond, vec![asn(x, int(1))], vec![asn(x, string("s"))]),
    Stmt::Print(var(x)),
  ];
  let module = compile(&prog).expect("both arms dynify x; that's not a type error, just a dual-slot name");
  assert!(module.globals.iter().any(|g| g.name == "g_x_raw"));
  assert!(module.globals.iter().any(|g| g.name == "g_x_box"));
}

// ---- boundary behavior ----

#[test]
fn empty_list_literal_is_dyn_typed() {
  let x = sym("x");
  let prog = vec![asn(x, Expr::List(vec![])), Stmt::Print(var(x))];
  let module = compile(&prog).expect("an empty list literal is legal, just unspecialized");
  let g = module.globals.iter().find(|g| g.name == "g_x").expect("an always-Dyn name gets a single boxed global, not a dual slot");
  assert_eq!(g.ty, IrTy::Ptr);
}

#[test]
fn for_loop_over_a_list_literal_compiles() {
  let l = sym("L");
  let i = sym("i");
  let prog = vec![
    asn(l, Expr::List(vec![])),
    Stmt::For(i, var(l), vec![Stmt::Print(var(i))]),
  ];
  let module = compile(&prog).expect("iterating an empty list is well-typed, it just runs zero times at runtime");
  let text = main_fn(&module).to_string();
  assert!(text.contains("bb"), "a for loop always lowers to at least a header/body/exit block split:\n{text}");
}
