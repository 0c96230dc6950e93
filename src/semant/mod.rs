//! The semantic analyzer (§4.1): walks the untyped AST and produces the
//! annotated SAST, threading a [`State`] of persistent environments.
//!
//! Control-flow termination (`Return`/`Continue`/`Break`) is modeled the same
//! way the teacher crate tracks diverging MIR blocks: each analyzed
//! statement/block reports whether it diverged alongside its SAST node, and
//! callers stop analyzing the remaining statements in a block once they see
//! one. Kept as a plain `bool` rather than a dedicated sentinel type since
//! `StaticError` already carries the analyzer's other exceptional channel.

pub mod transform;

use std::rc::Rc;
use if_chain::if_chain;

use crate::env::{Binding, Env, SpecStatus, State};
use crate::error::StaticError;
use crate::intern::Symbol;
use crate::types::ast::{Binop, Expr, FuncDecl, Lit, LvalueExpr, Stmt, Unop};
use crate::types::sast::{CallMode, Lvalue, SExpr, SExprKind, SFunc, SStmt, Stage, Transform};
use crate::types::ty::Type;

/// The result of an assignment (§4.1 "The assign rule matrix, worked out").
struct AssignOutcome {
  explicit: Type,
  inferred: Type,
  /// Set when the emitter must insert a runtime type check at this
  /// assignment (§4.6 item d).
  #[allow(dead_code)] // consumed once the emitter exists; kept for callers that want it now
  runtime_check: Option<Type>,
  /// Set when the name's address kind changes and the emitter must move the
  /// live value between slots (§4.5).
  transform: Option<Transform>,
}

/// Implements the worked-out assign rule matrix. `declared` is `Some` only
/// when this call site is itself introducing or confirming an annotation
/// (a `Type` statement, or a formal bound against its declared type); an
/// ordinary `Asn` passes `None`.
fn assign(
  env: &mut Env,
  name: Symbol,
  rhs_ty: &Type,
  declared: Option<&Type>,
  func: Option<Rc<FuncDecl>>,
  in_conditional: bool,
) -> Result<AssignOutcome, StaticError> {
  match env.get(&name).cloned() {
    None => {
      let explicit = if in_conditional {
        Type::Dyn
      } else {
        declared.filter(|d| !d.is_dyn()).cloned().unwrap_or_else(|| rhs_ty.clone())
      };
      let inferred = rhs_ty.clone();
      let mut binding = Binding::new(explicit.clone(), inferred.clone());
      binding.func = func;
      env.insert(name, binding);
      Ok(AssignOutcome { explicit, inferred, runtime_check: None, transform: None })
    }
    Some(old) => {
      let old_exp = old.explicit.clone();
      let requested = declared.filter(|d| !d.is_dyn());
      if_chain! {
        if let Some(d) = requested;
        if !old_exp.is_dyn();
        if *d != old_exp;
        then {
          return Err(StaticError::Type(format!(
            "conflicting type annotation for '{name}': expected '{old_exp}', found '{d}'"
          )));
        }
      }
      let new_explicit = if let Some(d) = requested {
        d.clone()
      } else if old_exp.is_dyn() {
        Type::Dyn
      } else if rhs_ty.is_dyn() {
        old_exp.clone()
      } else if *rhs_ty == old_exp {
        old_exp.clone()
      } else {
        Type::Dyn
      };
      let runtime_check = if !new_explicit.is_dyn() && rhs_ty.is_dyn() {
        Some(new_explicit.clone())
      } else {
        None
      };
      let new_inferred = if runtime_check.is_some() { new_explicit.clone() } else { rhs_ty.clone() };
      let transform = (old_exp != new_explicit).then(|| Transform {
        name,
        from: old_exp.clone(),
        to: new_explicit.clone(),
      });
      let mut binding = Binding::new(new_explicit.clone(), new_inferred.clone());
      binding.func = func.or(old.func);
      env.insert(name, binding);
      Ok(AssignOutcome { explicit: new_explicit, inferred: new_inferred, runtime_check, transform })
    }
  }
}

/// Binop type inference (§4.1). `Dyn` on either side short-circuits to `Dyn`.
fn binop_type(op: Binop, lhs: &Type, rhs: &Type) -> Result<Type, StaticError> {
  if lhs.is_dyn() || rhs.is_dyn() { return Ok(Type::Dyn) }
  let numeric_mix = |a: &Type, b: &Type| -> Option<Type> {
    if_chain! {
      if (*a == Type::Int && *b == Type::Bool) || (*a == Type::Bool && *b == Type::Int);
      then { Some(Type::Int) } else { None }
    }
  };
  match op {
    Binop::Add | Binop::Sub | Binop::Mul | Binop::Exp => {
      if_chain! {
        if lhs == rhs;
        if lhs.is_raw_scalar();
        then { return Ok(lhs.clone()) }
      }
      if op == Binop::Add {
        if *lhs == Type::String && *rhs == Type::String { return Ok(Type::String) }
        if_chain! {
          if let Type::Arr(a) = lhs;
          if let Type::Arr(b) = rhs;
          if a == b;
          then { return Ok(lhs.clone()) }
        }
      }
      if op == Binop::Mul && lhs.is_arr() && *rhs == Type::Int {
        return Ok(lhs.clone());
      }
      if let Some(t) = numeric_mix(lhs, rhs) { return Ok(t) }
      Err(StaticError::bad_binop(binop_name(op), lhs, rhs))
    }
    Binop::Div => {
      if (*lhs == Type::Int && *rhs == Type::Int) || (*lhs == Type::Float && *rhs == Type::Float) {
        return Ok(lhs.clone());
      }
      if let Some(t) = numeric_mix(lhs, rhs) { return Ok(t) }
      Err(StaticError::bad_binop("/", lhs, rhs))
    }
    Binop::Eq | Binop::Neq | Binop::Lt | Binop::Le | Binop::Gt | Binop::Ge => {
      if lhs == rhs { Ok(Type::Bool) } else { Err(StaticError::bad_binop(binop_name(op), lhs, rhs)) }
    }
    Binop::And | Binop::Or => {
      if lhs == rhs { Ok(lhs.clone()) } else { Err(StaticError::bad_binop(binop_name(op), lhs, rhs)) }
    }
  }
}

fn binop_name(op: Binop) -> &'static str {
  match op {
    Binop::Add => "+", Binop::Sub => "-", Binop::Mul => "*", Binop::Div => "/", Binop::Exp => "**",
    Binop::Eq => "==", Binop::Neq => "!=", Binop::Lt => "<", Binop::Le => "<=",
    Binop::Gt => ">", Binop::Ge => ">=", Binop::And => "and", Binop::Or => "or",
  }
}

/// Unop type inference (§4.1). Deliberately permissive for `Not` (the spec
/// names no restriction beyond type preservation — not "fixed" here).
fn unop_type(op: Unop, ty: &Type) -> Result<Type, StaticError> {
  if ty.is_dyn() { return Ok(Type::Dyn) }
  match op {
    Unop::Neg if ty.is_raw_scalar() => Ok(ty.clone()),
    Unop::Neg => Err(StaticError::bad_unop("-", ty)),
    Unop::Not => Ok(ty.clone()),
  }
}

/// Shared by `ListAccess` and `For`'s element-type rule: the LHS must be
/// `Dyn` or array-typed.
fn check_array_like(ty: &Type, ctx: &str) -> Result<(), StaticError> {
  if ty.is_dyn() || ty.is_arr() { Ok(()) } else {
    Err(StaticError::Type(format!("{ctx} requires an array or dyn, found '{ty}'")))
  }
}

fn element_type(lhs: &Type) -> Type {
  match lhs {
    Type::String => Type::String,
    Type::Arr(t) => (**t).clone(),
    _ => Type::Dyn,
  }
}

fn listaccess_type(lhs: &Type, idx: &Type) -> Result<Type, StaticError> {
  check_array_like(lhs, "list access")?;
  if !(matches!(idx, Type::Int) || idx.is_dyn()) {
    return Err(StaticError::Type(format!("list index must be 'int' or 'dyn', found '{idx}'")));
  }
  Ok(element_type(lhs))
}

fn cast_check(src: &Type, dst: &Type) -> Result<(), StaticError> {
  if matches!(dst, Type::Dyn | Type::Arr(_) | Type::FuncType | Type::Null | Type::Object) {
    return Err(StaticError::Type(format!("cannot cast to '{dst}'")));
  }
  if src == dst {
    return Err(StaticError::Type(format!("cast from '{src}' to itself is redundant")));
  }
  let numeric = |t: &Type| t.is_raw_scalar();
  if src.is_dyn() || numeric(src) && numeric(dst) || *dst == Type::String {
    Ok(())
  } else {
    Err(StaticError::Type(format!("cannot cast '{src}' to '{dst}'")))
  }
}

/// §4.1 "List literal": the common element type if all match, else `Dyn`
/// (the empty-list case, preserved deliberately — §9 open question).
fn list_literal_type(elem_types: &[Type]) -> Type {
  let mut it = elem_types.iter();
  match it.next() {
    None => Type::Dyn,
    Some(first) => {
      let common = it.fold(first.clone(), |acc, t| acc.join(t));
      Type::Arr(Rc::new(common))
    }
  }
}

fn dynify_explicit(env: &Env) -> Env {
  env.iter().map(|(k, v)| (*k, Binding { explicit: Type::Dyn, inferred: v.inferred.clone(), func: v.func.clone() })).collect()
}

fn remove_binding(mut env: Env, name: Symbol) -> Env {
  env.remove(&name);
  env
}

/// Analyzes a whole top-level program. Returns the SAST and the list of
/// globals with their final inferred types (§4.1 public contract).
pub fn analyze_program(program: &[Stmt]) -> Result<(Vec<SStmt>, Vec<(Symbol, Type)>), StaticError> {
  let mut state = State::new();
  let (body, _diverged) = analyze_block(&mut state, program)?;
  let globals = state.globals.iter().map(|(k, v)| (*k, v.inferred.clone())).collect();
  Ok((body, globals))
}

fn analyze_block(state: &mut State, stmts: &[Stmt]) -> Result<(Vec<SStmt>, bool), StaticError> {
  let mut out = Vec::with_capacity(stmts.len());
  let mut diverged = false;
  for s in stmts {
    let (sstmt, d) = analyze_stmt(state, s)?;
    out.push(sstmt);
    if d { diverged = true; break }
  }
  Ok((out, diverged))
}

/// One first-pass-then-final-pass loop iteration (§4.1 "For loops..."),
/// shared by `While`, `For` and `Range`. Runs `body` once under
/// `env_for_pass` with `in_conditional`/`in_forloop` set, then restores the
/// flags (but not the active environment — the caller decides what happens
/// to it).
fn run_loop_pass(state: &mut State, env_for_pass: Env, body: &[Stmt]) -> Result<(Vec<SStmt>, Env), StaticError> {
  let saved_cond = state.in_conditional;
  let saved_loop = state.in_forloop;
  let saved_env = state.active_env().clone();
  state.in_conditional = true;
  state.in_forloop = true;
  state.set_active_env(env_for_pass);
  let (body_out, _) = analyze_block(state, body)?;
  let result_env = state.active_env().clone();
  state.in_conditional = saved_cond;
  state.in_forloop = saved_loop;
  state.set_active_env(saved_env);
  Ok((body_out, result_env))
}

/// Runs the two-pass loop-stabilization protocol (§4.1) given a function to
/// bind any loop variable into a fresh pass environment. Returns the `Stage`
/// and leaves `state`'s active environment set to the stabilized result.
fn stage_loop_body(
  state: &mut State,
  body: &[Stmt],
  scope_name: Option<Symbol>,
  bind_into: impl Fn(&mut Env),
) -> Result<Stage<Vec<SStmt>>, StaticError> {
  let pre_env = state.active_env().clone();
  let mut probe_env = pre_env.clone();
  bind_into(&mut probe_env);
  let (_first_body, post_env_full) = run_loop_pass(state, probe_env, body)?;
  // The loop variable (`For`/`Range`) is scoped to the body; it must not
  // participate in the pre/post-loop environment comparison or merge.
  let post_env_raw = match scope_name {
    Some(name) => remove_binding(post_env_full, name),
    None => post_env_full,
  };

  if post_env_raw == pre_env {
    let mut env2 = pre_env.clone();
    bind_into(&mut env2);
    let (final_body, _) = run_loop_pass(state, env2, body)?;
    state.set_active_env(pre_env);
    return Ok(Stage { entry: vec![], body: final_body, exit: vec![] });
  }

  let (merged, entry, exit, _new_dyn) = transform::reconcile(&pre_env, &post_env_raw);
  let mut env2 = merged.clone();
  bind_into(&mut env2);
  let (final_body, _) = run_loop_pass(state, env2, body)?;
  state.set_active_env(merged);
  Ok(Stage { entry, body: final_body, exit })
}

fn analyze_expr(state: &mut State, expr: &Expr) -> Result<SExpr, StaticError> {
  match expr {
    Expr::Lit(lit) => {
      let ty = match lit {
        Lit::Int(_) => Type::Int,
        Lit::Float(_) => Type::Float,
        Lit::Bool(_) => Type::Bool,
        Lit::Str(_) => Type::String,
      };
      Ok(SExpr::new(ty, SExprKind::Lit(lit.clone())))
    }
    Expr::Var(name) => {
      match state.lookup(*name) {
        Some(binding) => Ok(SExpr::new(binding.inferred.clone(), SExprKind::Var(*name))),
        // A name this first-pass scan can't see yet is assumed to be a
        // forward reference to a global declared later in the program,
        // rather than a real `SNameError` — deferred to `Dyn` instead of
        // resolved, since this compiler never revisits a function body once
        // its generic specialization has been built.
        None if state.noeval_flag => Ok(SExpr::new(Type::Dyn, SExprKind::Var(*name))),
        None => Err(StaticError::Name(*name)),
      }
    }
    Expr::Binop(op, lhs, rhs) => {
      let slhs = analyze_expr(state, lhs)?;
      let srhs = analyze_expr(state, rhs)?;
      let ty = binop_type(*op, &slhs.ty, &srhs.ty)?;
      Ok(SExpr::new(ty, SExprKind::Binop(*op, slhs, srhs)))
    }
    Expr::Unop(op, e) => {
      let se = analyze_expr(state, e)?;
      let ty = unop_type(*op, &se.ty)?;
      Ok(SExpr::new(ty, SExprKind::Unop(*op, se)))
    }
    Expr::Call(callee, args) => analyze_call(state, callee, args),
    Expr::List(elems) => {
      let selems = elems.iter().map(|e| analyze_expr(state, e)).collect::<Result<Vec<_>, _>>()?;
      let elem_types: Vec<Type> = selems.iter().map(|e| e.ty.clone()).collect();
      let ty = list_literal_type(&elem_types);
      Ok(SExpr::new(ty, SExprKind::List(selems)))
    }
    Expr::ListAccess(lhs, idx) => {
      let slhs = analyze_expr(state, lhs)?;
      let sidx = analyze_expr(state, idx)?;
      let ty = listaccess_type(&slhs.ty, &sidx.ty)?;
      Ok(SExpr::new(ty, SExprKind::ListAccess(slhs, sidx)))
    }
    Expr::Cast(e, target) => {
      let se = analyze_expr(state, e)?;
      cast_check(&se.ty, target)?;
      Ok(SExpr::new(target.clone(), SExprKind::Cast(se, target.clone())))
    }
    Expr::Field(..) => Err(StaticError::NotImplemented("field access".to_string())),
    Expr::Method(..) => Err(StaticError::NotImplemented("method calls".to_string())),
  }
}

/// Builds the `Stage` for a call whose callee isn't a statically known
/// function: every currently-tracked global is dynified across the call
/// boundary and restored after (§4.1, last paragraph).
fn generic_call_stage(state: &State) -> Stage<()> {
  let mut entry = Vec::new();
  let mut exit = Vec::new();
  for (name, binding) in state.globals.iter() {
    if !binding.inferred.is_dyn() {
      entry.push(Transform { name: *name, from: binding.inferred.clone(), to: Type::Dyn });
      exit.push(Transform { name: *name, from: Type::Dyn, to: binding.inferred.clone() });
    }
  }
  Stage { entry, body: (), exit }
}

fn analyze_call(state: &mut State, callee: &Expr, args: &[Expr]) -> Result<SExpr, StaticError> {
  let scallee = analyze_expr(state, callee)?;
  let sargs = args.iter().map(|a| analyze_expr(state, a)).collect::<Result<Vec<_>, _>>()?;
  let callee_func = if let Expr::Var(name) = callee {
    state.lookup(*name).and_then(|b| b.func.clone())
  } else {
    None
  };
  match callee_func {
    Some(func) => {
      let arg_types: Vec<Type> = sargs.iter().map(|a| a.ty.clone()).collect();
      let (ret_ty, mode) = specialize_call(state, &func, &arg_types)?;
      Ok(SExpr::new(ret_ty, SExprKind::Call(scallee, sargs, mode)))
    }
    None => {
      let stage = generic_call_stage(state);
      Ok(SExpr::new(Type::Dyn, SExprKind::Call(scallee, sargs, CallMode::Generic(stage))))
    }
  }
}

/// Steps 1-5 of §4.1's function-call handling: the call-stack memo, scope
/// entry, formal binding, recursive body analysis and return-type checking.
fn specialize_call(state: &mut State, func: &Rc<FuncDecl>, arg_types: &[Type]) -> Result<(Type, CallMode), StaticError> {
  if func.formals.len() != arg_types.len() {
    return Err(StaticError::Syntax(format!(
      "'{}' takes {} argument(s) but {} were given",
      func.name, func.formals.len(), arg_types.len()
    )));
  }
  for (i, (name, _)) in func.formals.iter().enumerate() {
    if func.formals[..i].iter().any(|(other, _)| other == name) {
      return Err(StaticError::Syntax(format!("duplicate formal parameter '{name}' in '{}'", func.name)));
    }
  }
  if let Some(status) = state.callstack_memo.get(func, arg_types) {
    return match status {
      // Step 3: a key already in progress breaks recursion by returning
      // `Dyn` without recursing further (§9 "Recursion guard" — a
      // deliberate quirk, not a true fixed point).
      SpecStatus::InProgress => Ok((Type::Dyn, CallMode::Generic(Stage { entry: vec![], body: (), exit: vec![] }))),
      SpecStatus::Done(sfunc) => Ok((sfunc.return_type.clone(), CallMode::Specialized(sfunc))),
    };
  }
  state.callstack_memo.start(func, arg_types);

  // Step 1: fresh locals; globals stay visible but lose their explicit types.
  let mut fn_state = State {
    locals: Env::new(),
    globals: dynify_explicit(&state.globals),
    in_function: true,
    in_conditional: false,
    in_forloop: false,
    noeval_flag: state.noeval_flag,
    callstack_memo: state.callstack_memo.clone(),
    returns: std::rc::Rc::new(std::cell::RefCell::new(Vec::new())),
  };

  // Step 2: bind formals against the actual argument types.
  let mut formals = Vec::with_capacity(func.formals.len());
  for ((fname, fty), aty) in func.formals.iter().zip(arg_types) {
    let outcome = assign(&mut fn_state.locals, *fname, aty, Some(fty), None, false)?;
    formals.push((*fname, outcome.explicit));
  }

  // Step 4: recurse into the body.
  let (body, _diverged) = analyze_block(&mut fn_state, &func.body)?;
  let returns = fn_state.returns.borrow();
  let observed = returns.iter().fold(Type::Null, |acc, t| acc.join(t));
  let return_type = if func.ret.is_dyn() {
    observed
  } else {
    if returns.is_empty() {
      return Err(StaticError::Type(format!(
        "function '{}' is declared to return '{}' but has no reachable return",
        func.name, func.ret
      )));
    }
    if !observed.is_dyn() && observed != func.ret {
      return Err(StaticError::Type(format!(
        "function '{}' returns '{}' but is declared to return '{}'",
        func.name, observed, func.ret
      )));
    }
    func.ret.clone()
  };
  drop(returns);

  let locals: Vec<(Symbol, Type)> = fn_state.locals.iter().map(|(k, v)| (*k, v.inferred.clone())).collect();
  let sfunc = Rc::new(SFunc { return_type: return_type.clone(), name: func.name, formals, locals, body });
  state.callstack_memo.finish(func, arg_types, sfunc.clone());
  Ok((return_type, CallMode::Specialized(sfunc)))
}

fn analyze_lvalue(state: &mut State, lvalue: &LvalueExpr, rhs: &SExpr) -> Result<Lvalue, StaticError> {
  match lvalue {
    LvalueExpr::Name(name) => {
      let func = if let SExprKind::Var(v) = &*rhs.kind { state.lookup(*v).and_then(|b| b.func.clone()) } else { None };
      let in_conditional = state.in_conditional;
      let env = if state.in_function { &mut state.locals } else { &mut state.globals };
      // `Asn` re-derives the pre/post explicit type itself (to emit a
      // `Transform` when it changes), so the outcome is only needed for its
      // environment side effect here.
      assign(env, *name, &rhs.ty, None, func, in_conditional)?;
      Ok(Lvalue::Name(*name))
    }
    LvalueExpr::Index(arr, idx) => {
      let sarr = analyze_expr(state, arr)?;
      let sidx = analyze_expr(state, idx)?;
      check_array_like(&sarr.ty, "indexed assignment")?;
      if !(matches!(sidx.ty, Type::Int) || sidx.ty.is_dyn()) {
        return Err(StaticError::Type(format!("list index must be 'int' or 'dyn', found '{}'", sidx.ty)));
      }
      Ok(Lvalue::Index(sarr, sidx))
    }
  }
}

fn analyze_stmt(state: &mut State, stmt: &Stmt) -> Result<(SStmt, bool), StaticError> {
  match stmt {
    Stmt::Block(stmts) => {
      let (body, diverged) = analyze_block(state, stmts)?;
      Ok((SStmt::Block(body), diverged))
    }
    Stmt::Asn(lvalues, rhs) => {
      let srhs = analyze_expr(state, rhs)?;
      let mut pre = Vec::new();
      let mut out_lvalues = Vec::with_capacity(lvalues.len());
      for lv in lvalues {
        match lv {
          LvalueExpr::Name(name) => {
            let old_exp = state.lookup(*name).map(|b| b.explicit.clone());
            analyze_lvalue(state, lv, &srhs)?;
            let new_exp = state.lookup(*name).expect("just bound").explicit.clone();
            if let Some(old) = old_exp {
              if old != new_exp {
                pre.push(SStmt::Transform(Transform { name: *name, from: old, to: new_exp }));
              }
            }
            out_lvalues.push(Lvalue::Name(*name));
          }
          LvalueExpr::Index(..) => out_lvalues.push(analyze_lvalue(state, lv, &srhs)?),
        }
      }
      if pre.is_empty() {
        Ok((SStmt::Asn(out_lvalues, srhs), false))
      } else {
        pre.push(SStmt::Asn(out_lvalues, srhs));
        Ok((SStmt::Block(pre), false))
      }
    }
    Stmt::If(cond, then_b, else_b) => {
      let scond = analyze_expr(state, cond)?;

      let mut state_a = state.clone();
      state_a.in_conditional = true;
      let (mut body_a, diverged_a) = analyze_block(&mut state_a, then_b)?;

      let mut state_b = state.clone();
      state_b.in_conditional = true;
      let (mut body_b, diverged_b) = analyze_block(&mut state_b, else_b)?;

      let env_a = state_a.active_env().clone();
      let env_b = state_b.active_env().clone();
      let diverged = diverged_a && diverged_b;

      let merged = if diverged {
        // Neither side of the merge point is reachable; the environment
        // computed here only feeds bookkeeping (e.g. the function's final
        // locals list), never live code.
        env_a
      } else if diverged_a {
        env_b
      } else if diverged_b {
        env_a
      } else if env_a == env_b {
        env_a
      } else {
        let (merged, exit_a, exit_b, _new_dyn) = transform::reconcile(&env_a, &env_b);
        body_a.extend(exit_a.into_iter().map(SStmt::Transform));
        body_b.extend(exit_b.into_iter().map(SStmt::Transform));
        merged
      };
      state.set_active_env(merged);
      Ok((SStmt::If(scond, body_a, body_b), diverged))
    }
    Stmt::While(cond, body) => {
      let scond = analyze_expr(state, cond)?;
      let stage = stage_loop_body(state, body, None, |_env| {})?;
      Ok((SStmt::While(scond, stage), false))
    }
    Stmt::For(name, iterable, body) => {
      let s_iter = analyze_expr(state, iterable)?;
      check_array_like(&s_iter.ty, "'for' iterable")?;
      let elem_ty = element_type(&s_iter.ty);
      let name = *name;
      let stage = stage_loop_body(state, body, Some(name), move |env| {
        env.insert(name, Binding::new(Type::Dyn, elem_ty.clone()));
      })?;
      Ok((SStmt::For(name, s_iter, stage), false))
    }
    Stmt::Range(name, n, body) => {
      let s_n = analyze_expr(state, n)?;
      if !(matches!(s_n.ty, Type::Int) || s_n.ty.is_dyn()) {
        return Err(StaticError::Type(format!("'range' argument must be 'int' or 'dyn', found '{}'", s_n.ty)));
      }
      let name = *name;
      let stage = stage_loop_body(state, body, Some(name), move |env| {
        env.insert(name, Binding::new(Type::Dyn, Type::Int));
      })?;
      Ok((SStmt::Range(name, s_n, stage), false))
    }
    Stmt::Return(opt_expr) => {
      let sexpr = opt_expr.as_ref().map(|e| analyze_expr(state, e)).transpose()?;
      let ty = sexpr.as_ref().map_or(Type::Null, |e| e.ty.clone());
      state.returns.borrow_mut().push(ty);
      Ok((SStmt::Return(sexpr), true))
    }
    Stmt::Func(fdecl) => {
      let mut binding = Binding::new(Type::FuncType, Type::FuncType);
      binding.func = Some(fdecl.clone());
      let env = if state.in_function { &mut state.locals } else { &mut state.globals };
      env.insert(fdecl.name, binding);
      let all_dyn = vec![Type::Dyn; fdecl.formals.len()];
      // This eager declaration-time pass builds the generic calling
      // convention's body before anything can have called `fdecl` for real,
      // so any name it can't resolve yet is a forward reference, not an
      // error (§3 "noeval_flag").
      let prev_noeval = state.noeval_flag;
      state.noeval_flag = true;
      let result = specialize_call(state, fdecl, &all_dyn);
      state.noeval_flag = prev_noeval;
      let (_ret, mode) = result?;
      let CallMode::Specialized(generic) = mode else {
        unreachable!("a freshly specialized call always returns Specialized")
      };
      Ok((SStmt::Func(generic), false))
    }
    Stmt::Expr(e) => Ok((SStmt::Expr(analyze_expr(state, e)?), false)),
    Stmt::Print(e) => Ok((SStmt::Print(analyze_expr(state, e)?), false)),
    Stmt::Type(name, ty) => {
      let env = if state.in_function { &mut state.locals } else { &mut state.globals };
      match env.get(name).cloned() {
        None => { env.insert(*name, Binding::new(ty.clone(), Type::Dyn)); }
        Some(b) => {
          if !ty.is_dyn() && !b.explicit.is_dyn() && *ty != b.explicit {
            return Err(StaticError::Type(format!(
              "conflicting type annotation for '{name}': expected '{}', found '{ty}'", b.explicit
            )));
          }
          if !ty.is_dyn() && b.explicit.is_dyn() {
            env.insert(*name, Binding { explicit: ty.clone(), ..b });
          }
        }
      }
      Ok((SStmt::Nop, false))
    }
    Stmt::Nop | Stmt::Import(_) => Ok((SStmt::Nop, false)),
    Stmt::Class(..) => Err(StaticError::NotImplemented("class definitions".to_string())),
    Stmt::Continue => {
      if !state.in_forloop {
        return Err(StaticError::Syntax("'continue' outside a loop".to_string()));
      }
      Ok((SStmt::Continue, true))
    }
    Stmt::Break => {
      if !state.in_forloop {
        return Err(StaticError::Syntax("'break' outside a loop".to_string()));
      }
      Ok((SStmt::Break, true))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intern::intern;
  use smallvec::smallvec;

  fn analyze(stmts: Vec<Stmt>) -> Result<(Vec<SStmt>, Vec<(Symbol, Type)>), StaticError> {
    analyze_program(&stmts)
  }

  #[test]
  fn plain_assignment_infers_int() {
    let x = intern("x");
    let (_, globals) = analyze(vec![Stmt::Asn(smallvec![LvalueExpr::Name(x)], Expr::Lit(Lit::Int(1)))]).unwrap();
    assert_eq!(globals, vec![(x, Type::Int)]);
  }

  #[test]
  fn reassignment_to_different_concrete_type_dynifies() {
    let x = intern("x");
    let (body, globals) = analyze(vec![
      Stmt::Asn(smallvec![LvalueExpr::Name(x)], Expr::Lit(Lit::Int(1))),
      Stmt::Asn(smallvec![LvalueExpr::Name(x)], Expr::Lit(Lit::Str("hi".into()))),
    ]).unwrap();
    assert_eq!(globals, vec![(x, Type::String)]);
    // second assignment should be wrapped with a preceding Transform
    assert!(matches!(body[1], SStmt::Block(_)));
  }

  #[test]
  fn mismatched_binop_operands_error() {
    let x = intern("x");
    let err = analyze(vec![Stmt::Asn(
      smallvec![LvalueExpr::Name(x)],
      Expr::Binop(Binop::Add, Box::new(Expr::Lit(Lit::Int(1))), Box::new(Expr::Lit(Lit::Str("a".into())))),
    )]).unwrap_err();
    assert!(matches!(err, StaticError::Type(_)));
  }

  #[test]
  fn undefined_name_is_a_name_error() {
    let x = intern("undefined_var_xyz");
    let err = analyze(vec![Stmt::Expr(Expr::Var(x))]).unwrap_err();
    assert_eq!(err, StaticError::Name(x));
  }

  #[test]
  fn continue_outside_loop_is_a_syntax_error() {
    let err = analyze(vec![Stmt::Continue]).unwrap_err();
    assert!(matches!(err, StaticError::Syntax(_)));
  }

  #[test]
  fn function_call_specializes_by_argument_type() {
    let f = intern("f");
    let n = intern("n");
    let decl = Rc::new(FuncDecl {
      name: f,
      formals: vec![(n, Type::Dyn)],
      ret: Type::Dyn,
      body: vec![Stmt::Return(Some(Expr::Var(n)))],
    });
    let x = intern("x");
    let (_, globals) = analyze(vec![
      Stmt::Func(decl),
      Stmt::Asn(smallvec![LvalueExpr::Name(x)], Expr::Call(Box::new(Expr::Var(f)), vec![Expr::Lit(Lit::Int(1))])),
    ]).unwrap();
    let x_ty = globals.iter().find(|(n, _)| *n == x).unwrap().1.clone();
    assert_eq!(x_ty, Type::Int);
  }
}
