//! The emitter (§4.3-§4.8, §6): lowers the annotated SAST into the textual
//! IR defined by [`ir`], under the uniform `CObj` representation described
//! by [`objmodel`], threading per-function [`addr::Address`]es.
//!
//! Structurally this plays the role `build_vcode.rs` plays for the teacher
//! crate: one pass over an already-analyzed tree, building up blocks of
//! instructions in a single forward walk with an explicit insertion point
//! (`FuncCtx::block`) and a loop-label stack for `Continue`/`Break`, the same
//! shape as the teacher's own label-stack handling of its analogous
//! control-flow constructs.

pub mod addr;
pub mod idxty;
pub mod ir;
pub mod objmodel;

use std::collections::HashMap;
use std::rc::Rc;

use bit_vec::BitVec;
use log::debug;

use crate::codegen::addr::{Address, SymbolTable};
use crate::codegen::idxty::{BlockId, ValueId};
use crate::codegen::ir::{
  CallTarget, Const, ExternDecl, Function, GlobalDecl, Inst, InstKind, IrBinop, IrTy, IrUnop, Module,
  Operand, Param, Terminator,
};
use crate::idx::Idx;
use crate::codegen::objmodel::{self, layout, Builder, PrimType, Slot, SLOT_ORDER};
use crate::error::{runtime_messages, CompileError};
use crate::intern::{self, Symbol};
use crate::semant;
use crate::types::ast::{Binop, Lit, Stmt, Unop};
use crate::types::sast::{CallMode, Lvalue, SExpr, SExprKind, SFunc, SStmt, Transform};
use crate::types::ty::Type;

/// Compile-time knobs (§4.7). `Copy` and `Default`, the same "sensible
/// default plus an escape hatch" shape the teacher uses for its own entry
/// points.
#[derive(Copy, Clone, Debug)]
pub struct CompileOptions {
  /// Insert the six runtime checks of §4.6. Disabling this trusts the
  /// static analysis completely: every guard's branch and trap block is
  /// skipped, producing smaller code that has undefined behavior on input
  /// the analyzer couldn't prove safe.
  pub exceptions: bool,
  /// The emitted name of the top-level entry function, so an embedder
  /// linking several modules together can avoid a `main` collision.
  pub entry_name: &'static str,
}

impl Default for CompileOptions {
  fn default() -> Self { Self { exceptions: true, entry_name: "main" } }
}

/// Compile a program with the default [`CompileOptions`].
pub fn compile(program: &[Stmt]) -> Result<Module, CompileError> { compile_with(program, CompileOptions::default()) }

/// Compile a program, running the semantic analyzer then the emitter.
pub fn compile_with(program: &[Stmt], opts: CompileOptions) -> Result<Module, CompileError> {
  debug!("analyze: {} top-level statements", program.len());
  let (body, globals) = semant::analyze_program(program)?;
  debug!("analyze: done, {} globals inferred", globals.len());
  let transform_info = collect_transform_info(&body);
  let mut emitter = Emitter::new(opts);
  debug!("transform: {} names need dual raw/box slots", transform_info.len());
  emitter.declare_globals(&globals, &transform_info);
  debug!("emit: building CType dispatch tables");
  emitter.emit_ctypes();
  debug!("emit: lowering top-level body into @{}", opts.entry_name);
  emitter.emit_main(&body, &transform_info);
  debug!("emit: module complete, {} functions", emitter.module.funcs.len());
  Ok(emitter.module)
}

/// A value whose width and object-representation don't fit a plain `ptr`,
/// i.e. one of the raw-representable scalars (§3 Addresses).
fn prim_for(ty: &Type) -> Option<PrimType> {
  match ty {
    Type::Int => Some(PrimType::Int),
    Type::Float => Some(PrimType::Float),
    Type::Bool => Some(PrimType::Bool),
    _ => None,
  }
}

/// The IR type a variable of this static type lives in: the primitive's raw
/// data type for the three raw scalars, `ptr` for everything box-shaped.
fn ir_ty_for(ty: &Type) -> IrTy {
  prim_for(ty).map_or(IrTy::Ptr, PrimType::data_ty)
}

fn zero_const(prim: PrimType) -> Const {
  match prim {
    PrimType::Int => Const::I64(0),
    PrimType::Float => Const::F64(0.0),
    PrimType::Bool => Const::I1(false),
    PrimType::Char => Const::I8(0),
    PrimType::List | PrimType::String | PrimType::Func => Const::Null,
  }
}

fn zero_operand(prim: PrimType) -> Operand { Operand::Const(zero_const(prim)) }

fn slot_for_binop(op: Binop) -> Slot {
  match op {
    Binop::Add => Slot::Add,
    Binop::Sub => Slot::Sub,
    Binop::Mul => Slot::Mul,
    Binop::Div => Slot::Div,
    Binop::Exp => Slot::Exp,
    Binop::Eq => Slot::Eq,
    Binop::Neq => Slot::Neq,
    Binop::Lt => Slot::Lt,
    Binop::Le => Slot::Le,
    Binop::Gt => Slot::Gt,
    Binop::Ge => Slot::Ge,
    Binop::And => Slot::And,
    Binop::Or => Slot::Or,
  }
}

fn binop_symbol(op: Binop) -> &'static str {
  match op {
    Binop::Add => "+", Binop::Sub => "-", Binop::Mul => "*", Binop::Div => "/", Binop::Exp => "**",
    Binop::Eq => "==", Binop::Neq => "!=", Binop::Lt => "<", Binop::Le => "<=",
    Binop::Gt => ">", Binop::Ge => ">=", Binop::And => "and", Binop::Or => "or",
  }
}

fn unop_symbol(op: Unop) -> &'static str {
  match op { Unop::Neg => "-", Unop::Not => "not" }
}

/// A comparison always yields `Bool`; every other slot's result shares its
/// operand's primitive type (§4.3 operator semantics).
fn result_prim(prim: PrimType, slot: Slot) -> PrimType {
  match slot {
    Slot::Eq | Slot::Neq | Slot::Lt | Slot::Le | Slot::Gt | Slot::Ge => PrimType::Bool,
    _ => prim,
  }
}

fn slot_index(slot: Slot) -> i64 {
  SLOT_ORDER.iter().position(|s| *s == slot).expect("every Slot appears in SLOT_ORDER") as i64
}

fn cstr_global(name: &str, s: &str) -> GlobalDecl {
  let mut bytes: Vec<Const> = s.bytes().map(|b| Const::I8(b as i8)).collect();
  bytes.push(Const::I8(0));
  let len = bytes.len() as u32;
  GlobalDecl { name: name.to_string(), ty: IrTy::Array(Box::new(IrTy::I8), len), init: Const::Array(IrTy::I8, bytes) }
}

/// Both slots of a name that needs to hold either representation at
/// different points in its lifetime (§3 "at most one ... is the live one";
/// §4.5 Transform Table). Pre-allocated once at function entry; which one
/// is current is tracked by which [`Address`] variant is bound in the
/// symbol table for that name.
#[derive(Clone)]
struct DualSlot {
  raw: Option<(Operand, PrimType)>,
  boxed: Operand,
}

/// Walk a body collecting every name that is ever the target of a
/// [`Transform`], together with the one raw primitive type it alternates
/// with `Dyn`. Used to decide which locals/globals need [`DualSlot`]s.
/// A name that needs both a raw and a boxed slot (§4.5): the raw primitive
/// it alternates with, and whether its first `Transform` in program order
/// moves *out of* that raw representation (as opposed to *into* it, e.g. a
/// `Dyn` formal later narrowed by an annotation). This is what a dual-slot
/// binding's entry-time [`Address`] must match — not its final inferred type,
/// which may differ once the name has been reassigned to another type.
#[derive(Clone, Copy)]
struct DualInfo { raw_prim: PrimType, starts_raw: bool }

fn collect_transform_info(stmts: &[SStmt]) -> HashMap<Symbol, DualInfo> {
  let mut map = HashMap::new();
  note_all(stmts, &mut map);
  map
}

fn note_transform(map: &mut HashMap<Symbol, DualInfo>, t: &Transform) {
  if t.from == t.to { return; }
  let from_raw = prim_for(&t.from);
  let Some(raw_prim) = from_raw.or_else(|| prim_for(&t.to)) else { return };
  map.entry(t.name).or_insert(DualInfo { raw_prim, starts_raw: from_raw.is_some() });
}

fn note_expr(e: &SExpr, map: &mut HashMap<Symbol, DualInfo>) {
  match &*e.kind {
    SExprKind::Binop(_, l, r) => { note_expr(l, map); note_expr(r, map); }
    SExprKind::Unop(_, x) => note_expr(x, map),
    SExprKind::Call(callee, args, mode) => {
      if let CallMode::Generic(stage) = mode {
        for t in &stage.entry { note_transform(map, t); }
        for t in &stage.exit { note_transform(map, t); }
      }
      note_expr(callee, map);
      for a in args { note_expr(a, map); }
    }
    SExprKind::List(xs) => for x in xs { note_expr(x, map); },
    SExprKind::ListAccess(l, i) => { note_expr(l, map); note_expr(i, map); }
    SExprKind::Cast(x, _) => note_expr(x, map),
    SExprKind::Lit(_) | SExprKind::Var(_) => {}
  }
}

fn note_all(stmts: &[SStmt], map: &mut HashMap<Symbol, DualInfo>) {
  for s in stmts {
    match s {
      SStmt::Block(b) => note_all(b, map),
      SStmt::Asn(lvs, rhs) => {
        note_expr(rhs, map);
        for lv in lvs { if let Lvalue::Index(l, i) = lv { note_expr(l, map); note_expr(i, map); } }
      }
      SStmt::If(c, a, b) => { note_expr(c, map); note_all(a, map); note_all(b, map); }
      SStmt::While(c, stage) => {
        note_expr(c, map);
        for t in &stage.entry { note_transform(map, t); }
        note_all(&stage.body, map);
        for t in &stage.exit { note_transform(map, t); }
      }
      SStmt::For(_, it, stage) | SStmt::Range(_, it, stage) => {
        note_expr(it, map);
        for t in &stage.entry { note_transform(map, t); }
        note_all(&stage.body, map);
        for t in &stage.exit { note_transform(map, t); }
      }
      SStmt::Return(Some(e)) | SStmt::Expr(e) | SStmt::Print(e) => note_expr(e, map),
      SStmt::Transform(t) => note_transform(map, t),
      SStmt::Return(None) | SStmt::Func(_) | SStmt::Nop | SStmt::Continue | SStmt::Break => {}
    }
  }
}

/// The lowered form of one expression (§4.4 "each SAST expression returns a
/// `Value` variant"): an unboxed primitive living in an SSA register, or a
/// `CObj*`.
#[derive(Clone)]
enum Val {
  Raw(Operand, PrimType),
  Boxed(Operand),
}

/// Per-function lowering context: the function under construction, the
/// current insertion block, the live symbol table, the dual-slot registry
/// for names under active `Transform`s, and the loop header/exit stack for
/// `Continue`/`Break`.
struct FuncCtx {
  func: Function,
  block: BlockId,
  syms: SymbolTable,
  dual_slots: HashMap<Symbol, DualSlot>,
  /// `Some(p)` when this function returns a raw scalar (a specialization
  /// with a concrete, non-`Dyn` return type); `None` for the generic
  /// boxed-calling convention and for `Dyn`-returning specializations.
  ret_kind: Option<PrimType>,
  /// `Continue`/`Break` targets: `(step_or_header, exit)` per nested loop.
  loop_stack: Vec<(BlockId, BlockId)>,
  /// Set only for the top-level entry function: a bare `Return` there exits
  /// the whole program rather than returning a value to a caller (§6).
  is_main: bool,
}

impl FuncCtx {
  fn new(name: String, params: Vec<Param>, ret: IrTy) -> Self {
    let mut func = Function::new(name, params, ret);
    let entry = func.push_block();
    Self { func, block: entry, syms: SymbolTable::new(), dual_slots: HashMap::new(), ret_kind: None, loop_stack: Vec::new(), is_main: false }
  }

  fn is_terminated(&self) -> bool { self.func.blocks[self.block].is_terminated() }

  fn push_inst(&mut self, ty: IrTy, kind: InstKind) -> Operand {
    let result = self.func.fresh_value();
    self.func.blocks[self.block].insts.push(Inst { result: Some(result), ty, kind });
    Operand::Value(result)
  }

  fn push_void(&mut self, kind: InstKind) {
    self.func.blocks[self.block].insts.push(Inst { result: None, ty: IrTy::Void, kind });
  }

  #[allow(dead_code)] // used sparingly; most lowering is legible enough without extra comment insts
  fn comment(&mut self, s: impl Into<String>) { self.push_void(InstKind::Comment(s.into())); }

  fn terminate(&mut self, term: Terminator) {
    if !self.is_terminated() { self.func.blocks[self.block].term = Some(term); }
  }

  fn new_block(&mut self) -> BlockId { self.func.push_block() }

  fn switch_to(&mut self, block: BlockId) { self.block = block; }

  fn alloca(&mut self, ty: IrTy) -> Operand { self.push_inst(IrTy::Ptr, InstKind::Alloca(ty)) }

  fn load(&mut self, ty: IrTy, ptr: Operand) -> Operand { self.push_inst(ty, InstKind::Load(ptr)) }

  fn store(&mut self, ptr: Operand, val: Operand) { self.push_void(InstKind::Store(ptr, val)); }

  /// Dynamic-index `getelementptr`, word-scaled (every layout in this
  /// compiler — `CObj`, `CList`, `CType` — is laid out in machine words).
  fn gep(&mut self, base: Operand, index: Operand) -> Operand {
    self.push_inst(IrTy::Ptr, InstKind::Gep { base, index })
  }

  fn gep_field(&mut self, base: Operand, field: i64) -> Operand { self.gep(base, Operand::Const(Const::I64(field))) }

  fn binop(&mut self, ty: IrTy, op: IrBinop, a: Operand, b: Operand) -> Operand {
    self.push_inst(ty, InstKind::Binop(op, a, b))
  }

  fn unop(&mut self, ty: IrTy, op: IrUnop, a: Operand) -> Operand { self.push_inst(ty, InstKind::Unop(op, a)) }

  fn cast(&mut self, ty: IrTy, op: Operand, from: IrTy) -> Operand { self.push_inst(ty, InstKind::Cast { op, from }) }

  fn call(&mut self, ty: IrTy, target: CallTarget, args: Vec<Operand>) -> Operand {
    self.push_inst(ty, InstKind::Call { target, args })
  }
}

fn malloc(fc: &mut FuncCtx, bytes: Operand) -> Operand {
  fc.call(IrTy::Ptr, CallTarget::Extern("malloc".to_string()), vec![bytes])
}

fn malloc_words(fc: &mut FuncCtx, words: i64) -> Operand { malloc(fc, Operand::Const(Const::I64(words * 8))) }

fn printf(fc: &mut FuncCtx, args: Vec<Operand>) -> Operand { fc.call(IrTy::I32, CallTarget::Extern("printf".to_string()), args) }

fn print_cstr(fc: &mut FuncCtx, global: &str) { printf(fc, vec![Operand::Const(Const::GlobalAddr(global.to_string()))]); }

/// Allocate a fresh `CObj` of the given scalar primitive, with its own
/// heap-backed storage cell (§4.3 "wrap the result in a freshly allocated
/// `CObj` pointing at freshly allocated data").
fn alloc_boxed_scalar(fc: &mut FuncCtx, prim: PrimType, val: Operand) -> Operand {
  let storage = malloc_words(fc, 1);
  fc.store(storage, val);
  let obj = malloc_words(fc, 2);
  let data_field = fc.gep_field(obj, layout::COBJ_DATA_OFFSET);
  fc.store(data_field, storage);
  let type_field = fc.gep_field(obj, layout::COBJ_TYPE_OFFSET);
  fc.store(type_field, Operand::Const(Const::GlobalAddr(objmodel::ctype_symbol(prim))));
  obj
}

/// The per-module emitter: the module under construction, the global symbol
/// table, and the specialization memo (§8 "identical keys produce the same
/// IR function referentially").
struct Emitter {
  opts: CompileOptions,
  module: Module,
  globals: SymbolTable,
  global_duals: HashMap<Symbol, DualSlot>,
  /// Built (generic or specialized) functions, keyed by the pointer
  /// identity of the [`SFunc`] record they were built from.
  funcs_by_identity: HashMap<usize, String>,
  name_counts: HashMap<String, u32>,
  string_counter: u32,
}

impl Emitter {
  fn new(opts: CompileOptions) -> Self {
    let mut module = Module::new();
    module.externs = vec![
      ExternDecl { name: "malloc".to_string(), params: vec![IrTy::I64], varargs: false, ret: IrTy::Ptr },
      ExternDecl { name: "printf".to_string(), params: vec![IrTy::Ptr], varargs: true, ret: IrTy::I32 },
      ExternDecl { name: "exit".to_string(), params: vec![IrTy::I32], varargs: false, ret: IrTy::I32 },
      ExternDecl { name: "pow".to_string(), params: vec![IrTy::F64, IrTy::F64], varargs: false, ret: IrTy::F64 },
    ];
    module.globals.push(GlobalDecl {
      name: "null_sentinel".to_string(),
      ty: IrTy::Array(Box::new(IrTy::Ptr), 2),
      init: Const::Array(IrTy::Ptr, vec![Const::Null, Const::Null]),
    });
    module.globals.push(cstr_global("fmt_d", "%d"));
    module.globals.push(cstr_global("fmt_g", "%g"));
    module.globals.push(cstr_global("fmt_c", "%c"));
    module.globals.push(cstr_global("fmt_nl", "\n"));
    module.globals.push(cstr_global("fmt_lbracket", "["));
    module.globals.push(cstr_global("fmt_rbracket", "]"));
    module.globals.push(cstr_global("fmt_comma_sep", ", "));
    Self {
      opts,
      module,
      globals: SymbolTable::new(),
      global_duals: HashMap::new(),
      funcs_by_identity: HashMap::new(),
      name_counts: HashMap::new(),
      string_counter: 0,
    }
  }

  fn unique_name(&mut self, base: String) -> String {
    let count = self.name_counts.entry(base.clone()).or_insert(0);
    let name = if *count == 0 { base } else { format!("{base}_{count}") };
    *count += 1;
    name
  }

  fn fresh_global_name(&mut self, prefix: &str) -> String {
    let n = self.string_counter;
    self.string_counter += 1;
    format!("{prefix}{n}")
  }

  fn global_string_literal(&mut self, s: &str) -> Operand {
    let name = self.fresh_global_name("str");
    self.module.globals.push(cstr_global(&name, s));
    Operand::Const(Const::GlobalAddr(name))
  }

  // ---- globals (§3 Bindings, §4.4 Variables applied at module scope) ----

  fn declare_globals(&mut self, globals: &[(Symbol, Type)], transform_info: &HashMap<Symbol, DualInfo>) {
    for (name, ty) in globals {
      let sym_name = intern::resolve(*name);
      if let Some(info) = transform_info.get(name) {
        let raw_name = format!("g_{sym_name}_raw");
        self.module.globals.push(GlobalDecl { name: raw_name.clone(), ty: info.raw_prim.data_ty(), init: zero_const(info.raw_prim) });
        let box_name = format!("g_{sym_name}_box");
        self.module.globals.push(GlobalDecl { name: box_name.clone(), ty: IrTy::Ptr, init: Const::GlobalAddr("null_sentinel".to_string()) });
        let raw_slot = Operand::Const(Const::GlobalAddr(raw_name));
        let box_slot = Operand::Const(Const::GlobalAddr(box_name));
        self.global_duals.insert(*name, DualSlot { raw: Some((raw_slot.clone(), info.raw_prim)), boxed: box_slot.clone() });
        let addr = if info.starts_raw {
          Address::RawAddr { slot: raw_slot, prim: info.raw_prim }
        } else {
          Address::BoxAddr { slot: box_slot, needs_heapify: false }
        };
        self.globals.bind(*name, addr);
      } else if let Some(p) = prim_for(ty) {
        let gname = format!("g_{sym_name}");
        self.module.globals.push(GlobalDecl { name: gname.clone(), ty: p.data_ty(), init: zero_const(p) });
        self.globals.bind(*name, Address::RawAddr { slot: Operand::Const(Const::GlobalAddr(gname)), prim: p });
      } else {
        let gname = format!("g_{sym_name}");
        self.module.globals.push(GlobalDecl { name: gname.clone(), ty: IrTy::Ptr, init: Const::GlobalAddr("null_sentinel".to_string()) });
        self.globals.bind(*name, Address::BoxAddr { slot: Operand::Const(Const::GlobalAddr(gname)), needs_heapify: false });
      }
    }
  }

  // ---- CType tables (§4.3) ----

  fn emit_ctypes(&mut self) {
    for prim in PrimType::ALL {
      let mut slots = Vec::with_capacity(20);
      for slot in SLOT_ORDER {
        let entry = match objmodel::lookup(prim, slot) {
          Some(builder) => Const::GlobalAddr(self.build_op_function(prim, slot, builder)),
          None => Const::Null,
        };
        slots.push(entry);
      }
      self.module.globals.push(GlobalDecl {
        name: objmodel::ctype_symbol(prim),
        ty: IrTy::Array(Box::new(IrTy::Ptr), 20),
        init: Const::Array(IrTy::Ptr, slots),
      });
    }
  }

  fn push_func(&mut self, func: Function) { self.module.funcs.push(func); }

  fn build_op_function(&mut self, prim: PrimType, slot: Slot, builder: Builder) -> String {
    let name = objmodel::op_symbol(prim, slot);
    match builder {
      Builder::Bin(irop) => self.build_bin_fn(&name, prim, slot, irop),
      Builder::Un(irop) => self.build_un_fn(&name, prim, irop),
      Builder::StringConcat | Builder::ListConcat => self.build_concat_fn(&name, prim),
      Builder::ListIdx => self.build_list_idx_fn(&name),
      Builder::StringIdx => self.build_string_idx_fn(&name),
      Builder::IdxParent => self.build_idx_parent_fn(&name),
      Builder::HeapifyScalar => self.build_heapify_scalar_fn(&name, prim),
      Builder::HeapifyNoop => self.build_heapify_noop_fn(&name),
      Builder::PrintScalar(fmt) => self.build_print_scalar_fn(&name, prim, fmt),
      Builder::PrintList => self.build_print_list_fn(&name),
      Builder::PrintString => self.build_print_string_fn(&name),
      Builder::CallFunc => self.build_call_func_fn(&name),
      Builder::Exp { to_int } => self.build_exp_fn(&name, prim, to_int),
    }
    name
  }

  fn build_bin_fn(&mut self, name: &str, prim: PrimType, slot: Slot, irop: IrBinop) {
    let a_id = ValueId::from_usize(0);
    let b_id = ValueId::from_usize(1);
    let mut fc = FuncCtx::new(name.to_string(), vec![Param { value: a_id, ty: IrTy::Ptr }, Param { value: b_id, ty: IrTy::Ptr }], IrTy::Ptr);
    let a = Operand::Value(a_id);
    let b = Operand::Value(b_id);
    let a_storage = fc.load(IrTy::Ptr, fc_gep_data(&mut fc, a));
    let a_val = fc.load(prim.data_ty(), a_storage);
    let b_storage = fc.load(IrTy::Ptr, fc_gep_data(&mut fc, b));
    let b_val = fc.load(prim.data_ty(), b_storage);
    let rp = result_prim(prim, slot);
    let result = fc.binop(rp.data_ty(), irop, a_val, b_val);
    let obj = alloc_boxed_scalar(&mut fc, rp, result);
    fc.terminate(Terminator::Ret(Some(obj)));
    self.finalize_and_push(fc);
  }

  fn build_un_fn(&mut self, name: &str, prim: PrimType, irop: IrUnop) {
    let a_id = ValueId::from_usize(0);
    let mut fc = FuncCtx::new(name.to_string(), vec![Param { value: a_id, ty: IrTy::Ptr }], IrTy::Ptr);
    let a = Operand::Value(a_id);
    let a_storage = fc.load(IrTy::Ptr, fc_gep_data(&mut fc, a));
    let a_val = fc.load(prim.data_ty(), a_storage);
    let result = fc.unop(prim.data_ty(), irop, a_val);
    let obj = alloc_boxed_scalar(&mut fc, prim, result);
    fc.terminate(Terminator::Ret(Some(obj)));
    self.finalize_and_push(fc);
  }

  /// `String`/`List` `add`: allocate `len_a + len_b` word slots and copy
  /// both sources' element pointers in, shallowly (§4.3).
  fn build_concat_fn(&mut self, name: &str, prim: PrimType) {
    let a_id = ValueId::from_usize(0);
    let b_id = ValueId::from_usize(1);
    let mut fc = FuncCtx::new(name.to_string(), vec![Param { value: a_id, ty: IrTy::Ptr }, Param { value: b_id, ty: IrTy::Ptr }], IrTy::Ptr);
    let a = Operand::Value(a_id);
    let b = Operand::Value(b_id);
    let a_list = fc.load(IrTy::Ptr, fc_gep_data(&mut fc, a));
    let b_list = fc.load(IrTy::Ptr, fc_gep_data(&mut fc, b));
    let a_len = fc.load(IrTy::I64, fc.gep_field(a_list, layout::CLIST_LEN_OFFSET));
    let b_len = fc.load(IrTy::I64, fc.gep_field(b_list, layout::CLIST_LEN_OFFSET));
    let a_data = fc.load(IrTy::Ptr, fc.gep_field(a_list, layout::CLIST_DATA_OFFSET));
    let b_data = fc.load(IrTy::Ptr, fc.gep_field(b_list, layout::CLIST_DATA_OFFSET));
    let new_len = fc.binop(IrTy::I64, IrBinop::AddI, a_len, b_len);
    let bytes = fc.binop(IrTy::I64, IrBinop::MulI, new_len, Operand::Const(Const::I64(8)));
    let new_data = malloc(&mut fc, bytes);
    emit_copy_loop(&mut fc, a_data, new_data, Operand::Const(Const::I64(0)), a_len);
    emit_copy_loop(&mut fc, b_data, new_data, a_len, b_len);
    let new_list = malloc_words(&mut fc, 3);
    fc.store(fc.gep_field(new_list, layout::CLIST_DATA_OFFSET), new_data);
    fc.store(fc.gep_field(new_list, layout::CLIST_LEN_OFFSET), new_len);
    fc.store(fc.gep_field(new_list, layout::CLIST_CAP_OFFSET), new_len);
    let obj = malloc_words(&mut fc, 2);
    fc.store(fc.gep_field(obj, layout::COBJ_DATA_OFFSET), new_list);
    fc.store(fc.gep_field(obj, layout::COBJ_TYPE_OFFSET), Operand::Const(Const::GlobalAddr(objmodel::ctype_symbol(prim))));
    fc.terminate(Terminator::Ret(Some(obj)));
    self.finalize_and_push(fc);
  }

  /// `List`'s `idx`: bounds already validated by the caller; load the
  /// stored `CObj*` directly.
  fn build_list_idx_fn(&mut self, name: &str) {
    let self_id = ValueId::from_usize(0);
    let idx_id = ValueId::from_usize(1);
    let mut fc = FuncCtx::new(name.to_string(), vec![Param { value: self_id, ty: IrTy::Ptr }, Param { value: idx_id, ty: IrTy::I64 }], IrTy::Ptr);
    let elem_ptr = idx_elem_ptr(&mut fc, Operand::Value(self_id), Operand::Value(idx_id));
    let elem = fc.load(IrTy::Ptr, elem_ptr);
    fc.terminate(Terminator::Ret(Some(elem)));
    self.finalize_and_push(fc);
  }

  /// `String`'s `idx`: build a freshly allocated single-char `CString`.
  fn build_string_idx_fn(&mut self, name: &str) {
    let self_id = ValueId::from_usize(0);
    let idx_id = ValueId::from_usize(1);
    let mut fc = FuncCtx::new(name.to_string(), vec![Param { value: self_id, ty: IrTy::Ptr }, Param { value: idx_id, ty: IrTy::I64 }], IrTy::Ptr);
    let elem_ptr = idx_elem_ptr(&mut fc, Operand::Value(self_id), Operand::Value(idx_id));
    let ch_obj = fc.load(IrTy::Ptr, elem_ptr);
    let ch_storage = fc.load(IrTy::Ptr, fc_gep_data(&mut fc, ch_obj));
    let ch_val = fc.load(IrTy::I8, ch_storage);
    let new_char = alloc_boxed_scalar(&mut fc, PrimType::Char, ch_val);
    let data = malloc_words(&mut fc, 1);
    fc.store(data, new_char);
    let list = malloc_words(&mut fc, 3);
    fc.store(fc.gep_field(list, layout::CLIST_DATA_OFFSET), data);
    fc.store(fc.gep_field(list, layout::CLIST_LEN_OFFSET), Operand::Const(Const::I64(1)));
    fc.store(fc.gep_field(list, layout::CLIST_CAP_OFFSET), Operand::Const(Const::I64(1)));
    let obj = malloc_words(&mut fc, 2);
    fc.store(fc.gep_field(obj, layout::COBJ_DATA_OFFSET), list);
    fc.store(fc.gep_field(obj, layout::COBJ_TYPE_OFFSET), Operand::Const(Const::GlobalAddr(objmodel::ctype_symbol(PrimType::String))));
    fc.terminate(Terminator::Ret(Some(obj)));
    self.finalize_and_push(fc);
  }

  /// `idx_parent`: a pointer to the element slot itself, for indexed
  /// assignment. Shared by `List` and `String` (§4.3).
  fn build_idx_parent_fn(&mut self, name: &str) {
    let self_id = ValueId::from_usize(0);
    let idx_id = ValueId::from_usize(1);
    let mut fc = FuncCtx::new(name.to_string(), vec![Param { value: self_id, ty: IrTy::Ptr }, Param { value: idx_id, ty: IrTy::I64 }], IrTy::Ptr);
    let elem_ptr = idx_elem_ptr(&mut fc, Operand::Value(self_id), Operand::Value(idx_id));
    fc.terminate(Terminator::Ret(Some(elem_ptr)));
    self.finalize_and_push(fc);
  }

  fn build_heapify_scalar_fn(&mut self, name: &str, prim: PrimType) {
    let self_id = ValueId::from_usize(0);
    let mut fc = FuncCtx::new(name.to_string(), vec![Param { value: self_id, ty: IrTy::Ptr }], IrTy::Ptr);
    let this = Operand::Value(self_id);
    let storage = fc.load(IrTy::Ptr, fc_gep_data(&mut fc, this));
    let val = fc.load(prim.data_ty(), storage);
    let new_storage = malloc_words(&mut fc, 1);
    fc.store(new_storage, val);
    fc.store(fc_gep_data(&mut fc, this), new_storage);
    fc.terminate(Terminator::Ret(Some(this)));
    self.finalize_and_push(fc);
  }

  fn build_heapify_noop_fn(&mut self, name: &str) {
    let self_id = ValueId::from_usize(0);
    let mut fc = FuncCtx::new(name.to_string(), vec![Param { value: self_id, ty: IrTy::Ptr }], IrTy::Ptr);
    fc.terminate(Terminator::Ret(Some(Operand::Value(self_id))));
    self.finalize_and_push(fc);
  }

  fn build_print_scalar_fn(&mut self, name: &str, prim: PrimType, fmt: &'static str) {
    let self_id = ValueId::from_usize(0);
    let mut fc = FuncCtx::new(name.to_string(), vec![Param { value: self_id, ty: IrTy::Ptr }], IrTy::I32);
    let this = Operand::Value(self_id);
    let storage = fc.load(IrTy::Ptr, fc_gep_data(&mut fc, this));
    let val = fc.load(prim.data_ty(), storage);
    let promoted = promote_for_printf(&mut fc, prim, val);
    let fmt_name = match fmt { "%d" => "fmt_d", "%g" => "fmt_g", "%c" => "fmt_c", _ => unreachable!("print format is one of %d/%g/%c") };
    let result = printf(&mut fc, vec![Operand::Const(Const::GlobalAddr(fmt_name.to_string())), promoted]);
    fc.terminate(Terminator::Ret(Some(result)));
    self.finalize_and_push(fc);
  }

  /// List printing: `[`, each element's own `print` thunk separated by
  /// `, ` (including after the last element — §6 "trailing `, ` before `]`
  /// is part of the spec"), then `]`.
  fn build_print_list_fn(&mut self, name: &str) {
    let self_id = ValueId::from_usize(0);
    let mut fc = FuncCtx::new(name.to_string(), vec![Param { value: self_id, ty: IrTy::Ptr }], IrTy::I32);
    let this = Operand::Value(self_id);
    print_cstr(&mut fc, "fmt_lbracket");
    let list = fc.load(IrTy::Ptr, fc_gep_data(&mut fc, this));
    let len = fc.load(IrTy::I64, fc.gep_field(list, layout::CLIST_LEN_OFFSET));
    let data = fc.load(IrTy::Ptr, fc.gep_field(list, layout::CLIST_DATA_OFFSET));
    for_range(&mut fc, len, |fc, i| {
      let elem = fc.load(IrTy::Ptr, fc.gep(data, i));
      dispatch_print(fc, elem);
      print_cstr(fc, "fmt_comma_sep");
    });
    print_cstr(&mut fc, "fmt_rbracket");
    fc.terminate(Terminator::Ret(Some(Operand::Const(Const::I32(0)))));
    self.finalize_and_push(fc);
  }

  /// String printing: raw characters, no separators or brackets (§6).
  fn build_print_string_fn(&mut self, name: &str) {
    let self_id = ValueId::from_usize(0);
    let mut fc = FuncCtx::new(name.to_string(), vec![Param { value: self_id, ty: IrTy::Ptr }], IrTy::I32);
    let this = Operand::Value(self_id);
    let list = fc.load(IrTy::Ptr, fc_gep_data(&mut fc, this));
    let len = fc.load(IrTy::I64, fc.gep_field(list, layout::CLIST_LEN_OFFSET));
    let data = fc.load(IrTy::Ptr, fc.gep_field(list, layout::CLIST_DATA_OFFSET));
    for_range(&mut fc, len, |fc, i| {
      let elem = fc.load(IrTy::Ptr, fc.gep(data, i));
      let storage = fc.load(IrTy::Ptr, fc_gep_data(fc, elem));
      let ch = fc.load(IrTy::I8, storage);
      let ch32 = fc.cast(IrTy::I32, ch, IrTy::I8);
      printf(fc, vec![Operand::Const(Const::GlobalAddr("fmt_c".to_string())), ch32]);
    });
    fc.terminate(Terminator::Ret(Some(Operand::Const(Const::I32(0)))));
    self.finalize_and_push(fc);
  }

  /// The generic boxed calling convention's `call` slot thunk: extract the
  /// raw function pointer stored directly in `self`'s data field and
  /// invoke it with the packed `argv` (§4.4 generic path).
  fn build_call_func_fn(&mut self, name: &str) {
    let self_id = ValueId::from_usize(0);
    let argv_id = ValueId::from_usize(1);
    let mut fc = FuncCtx::new(name.to_string(), vec![Param { value: self_id, ty: IrTy::Ptr }, Param { value: argv_id, ty: IrTy::Ptr }], IrTy::Ptr);
    let fnptr = fc.load(IrTy::Ptr, fc_gep_data(&mut fc, Operand::Value(self_id)));
    let result = fc.call(IrTy::Ptr, CallTarget::Indirect(fnptr), vec![Operand::Value(argv_id)]);
    fc.terminate(Terminator::Ret(Some(result)));
    self.finalize_and_push(fc);
  }

  /// `Exp`: always goes through a floating-point `pow`, converting back to
  /// `int` when `to_int` is set (§4.3).
  fn build_exp_fn(&mut self, name: &str, prim: PrimType, to_int: bool) {
    let a_id = ValueId::from_usize(0);
    let b_id = ValueId::from_usize(1);
    let mut fc = FuncCtx::new(name.to_string(), vec![Param { value: a_id, ty: IrTy::Ptr }, Param { value: b_id, ty: IrTy::Ptr }], IrTy::Ptr);
    let a_storage = fc.load(IrTy::Ptr, fc_gep_data(&mut fc, Operand::Value(a_id)));
    let a_val = fc.load(prim.data_ty(), a_storage);
    let b_storage = fc.load(IrTy::Ptr, fc_gep_data(&mut fc, Operand::Value(b_id)));
    let b_val = fc.load(prim.data_ty(), b_storage);
    let (af, bf) = if matches!(prim, PrimType::Int) {
      (fc.cast(IrTy::F64, a_val, IrTy::I64), fc.cast(IrTy::F64, b_val, IrTy::I64))
    } else {
      (a_val, b_val)
    };
    let powed = fc.call(IrTy::F64, CallTarget::Extern("pow".to_string()), vec![af, bf]);
    let obj = if to_int {
      let as_int = fc.cast(IrTy::I64, powed, IrTy::F64);
      alloc_boxed_scalar(&mut fc, PrimType::Int, as_int)
    } else {
      alloc_boxed_scalar(&mut fc, PrimType::Float, powed)
    };
    fc.terminate(Terminator::Ret(Some(obj)));
    self.finalize_and_push(fc);
  }

  fn finalize_and_push(&mut self, mut fc: FuncCtx) {
    finalize_function(&mut fc.func);
    self.push_func(fc.func);
  }

  // ---- runtime checks (§4.6) ----

  /// Insert a guard: if `cond` is false, print `message` and exit
  /// nonzero. A no-op when `exceptions` is disabled.
  fn guard(&mut self, fc: &mut FuncCtx, cond: Operand, message: &str) {
    if !self.opts.exceptions { return; }
    let trap = fc.new_block();
    let cont = fc.new_block();
    fc.terminate(Terminator::CondBr(cond, cont, trap));
    fc.switch_to(trap);
    let msg = self.global_string_literal(&format!("{message}\n"));
    printf(fc, vec![msg]);
    fc.call(IrTy::I32, CallTarget::Extern("exit".to_string()), vec![Operand::Const(Const::I32(1))]);
    fc.terminate(Terminator::Unreachable);
    fc.switch_to(cont);
  }

  // ---- string/list literal construction (§4.4 "Lit: boxed for string") ----

  /// Build a `CString` at runtime from a compile-time-known literal: one
  /// `char` `CObj` per codepoint, unrolled (the length is static, so there's
  /// no need for a loop).
  fn build_string_literal(&mut self, fc: &mut FuncCtx, s: &str) -> Operand {
    let chars: Vec<u8> = s.bytes().collect();
    let n = chars.len() as i64;
    let data = malloc_words(fc, n.max(1));
    for (i, byte) in chars.iter().enumerate() {
      let ch_obj = alloc_boxed_scalar(fc, PrimType::Char, Operand::Const(Const::I8(*byte as i8)));
      fc.store(fc.gep_field(data, i as i64), ch_obj);
    }
    self.build_clist_obj_from_data(fc, data, n, PrimType::String)
  }

  /// Build a `List`/`String` object from an already-populated `data` array
  /// of `n` `CObj*` element slots.
  fn build_clist_obj_from_data(&mut self, fc: &mut FuncCtx, data: Operand, n: i64, prim: PrimType) -> Operand {
    let list = malloc_words(fc, 3);
    fc.store(fc.gep_field(list, layout::CLIST_DATA_OFFSET), data);
    fc.store(fc.gep_field(list, layout::CLIST_LEN_OFFSET), Operand::Const(Const::I64(n)));
    fc.store(fc.gep_field(list, layout::CLIST_CAP_OFFSET), Operand::Const(Const::I64(n)));
    let obj = malloc_words(fc, 2);
    fc.store(fc.gep_field(obj, layout::COBJ_DATA_OFFSET), list);
    fc.store(fc.gep_field(obj, layout::COBJ_TYPE_OFFSET), Operand::Const(Const::GlobalAddr(objmodel::ctype_symbol(prim))));
    obj
  }

  /// `[e1, e2, ...]`: every element already boxed, copied into a freshly
  /// allocated `CList` (§4.4 `List`).
  fn build_list_literal(&mut self, fc: &mut FuncCtx, elements: &[Operand]) -> Operand {
    let n = elements.len() as i64;
    let data = malloc_words(fc, n.max(1));
    for (i, e) in elements.iter().enumerate() { fc.store(fc.gep_field(data, i as i64), e.clone()); }
    self.build_clist_obj_from_data(fc, data, n, PrimType::List)
  }

  /// A `Func`-typed `CObj` wrapping a generic function's address directly in
  /// its data field (no separate storage cell: a function pointer is
  /// already `ptr`-sized, §4.4 `Func`).
  fn build_func_obj(&mut self, fc: &mut FuncCtx, fn_name: &str) -> Operand {
    let obj = malloc_words(fc, 2);
    fc.store(fc.gep_field(obj, layout::COBJ_DATA_OFFSET), Operand::Const(Const::GlobalAddr(fn_name.to_string())));
    fc.store(fc.gep_field(obj, layout::COBJ_TYPE_OFFSET), Operand::Const(Const::GlobalAddr(objmodel::ctype_symbol(PrimType::Func))));
    obj
  }

  /// Pack boxed arguments into the `argv: CObj**` array the generic calling
  /// convention expects (§4.4 generic path).
  fn build_argv(&mut self, fc: &mut FuncCtx, args: &[Operand]) -> Operand {
    let n = args.len() as i64;
    let argv = malloc_words(fc, n.max(1));
    for (i, a) in args.iter().enumerate() { fc.store(fc.gep_field(argv, i as i64), a.clone()); }
    argv
  }

  // ---- coercions between Val and a target representation ----

  fn to_boxed(&mut self, fc: &mut FuncCtx, v: Val) -> Operand {
    match v {
      Val::Raw(op, prim) => alloc_boxed_scalar(fc, prim, op),
      Val::Boxed(op) => op,
    }
  }

  /// Unwrap a [`Val`] already statically known to be raw (used once the
  /// caller has checked both operands are the same raw scalar type).
  fn as_raw_unchecked(&self, v: Val) -> Operand {
    match v { Val::Raw(op, _) => op, Val::Boxed(_) => unreachable!("as_raw_unchecked called on a boxed value") }
  }

  /// A value known to be `Int` that might be boxed (e.g. an index or range
  /// count): check its runtime `CType` and extract the raw `i64`.
  fn coerce_int_checked(&mut self, fc: &mut FuncCtx, v: Val, msg: &str) -> Operand {
    match v {
      Val::Raw(op, PrimType::Int) => op,
      Val::Raw(_, _) => unreachable!("static analysis guarantees an Int or Dyn index"),
      Val::Boxed(op) => {
        let obj_type = fc.load(IrTy::Ptr, fc_gep_type(fc, op.clone()));
        let expect = Operand::Const(Const::GlobalAddr(objmodel::ctype_symbol(PrimType::Int)));
        let cond = fc.binop(IrTy::I1, IrBinop::ICmpEq, obj_type, expect);
        self.guard(fc, cond, msg);
        let storage = fc.load(IrTy::Ptr, fc_gep_data(fc, op));
        fc.load(IrTy::I64, storage)
      }
    }
  }

  /// A value known to be `Bool` that might be boxed (an `If`/`While`
  /// condition): check its runtime `CType` and extract the raw `i1`.
  fn coerce_bool(&mut self, fc: &mut FuncCtx, v: Val, msg: &str) -> Operand {
    match v {
      Val::Raw(op, PrimType::Bool) => op,
      Val::Raw(_, _) => unreachable!("static analysis guarantees a Bool or Dyn condition"),
      Val::Boxed(op) => {
        let obj_type = fc.load(IrTy::Ptr, fc_gep_type(fc, op.clone()));
        let expect = Operand::Const(Const::GlobalAddr(objmodel::ctype_symbol(PrimType::Bool)));
        let cond = fc.binop(IrTy::I1, IrBinop::ICmpEq, obj_type, expect);
        self.guard(fc, cond, msg);
        let storage = fc.load(IrTy::Ptr, fc_gep_data(fc, op));
        fc.load(IrTy::I1, storage)
      }
    }
  }

  /// Coerce a value into the representation a formal/return/assignment
  /// target of static type `target` expects, inserting the runtime type
  /// check of §4.6(d) when the source is boxed and the target is raw.
  fn coerce_to_prim(&mut self, fc: &mut FuncCtx, v: Val, target: PrimType, msg: &str) -> Operand {
    match v {
      Val::Raw(op, p) if p == target => op,
      Val::Raw(_, _) => unreachable!("static analysis guarantees matching raw types at this point"),
      Val::Boxed(op) => {
        let obj_type = fc.load(IrTy::Ptr, fc_gep_type(fc, op.clone()));
        let expect = Operand::Const(Const::GlobalAddr(objmodel::ctype_symbol(target)));
        let cond = fc.binop(IrTy::I1, IrBinop::ICmpEq, obj_type, expect);
        self.guard(fc, cond, msg);
        let storage = fc.load(IrTy::Ptr, fc_gep_data(fc, op));
        fc.load(target.data_ty(), storage)
      }
    }
  }

  fn coerce_to_formal(&mut self, fc: &mut FuncCtx, v: Val, formal_ty: &Type, formal_name: Symbol) -> Operand {
    match prim_for(formal_ty) {
      Some(p) => self.coerce_to_prim(fc, v, p, &runtime_messages::invalid_assign_type(intern::resolve(formal_name))),
      None => self.to_boxed(fc, v),
    }
  }

  // ---- CType dynamic dispatch (§4.4 binop/unop boxed path) ----

  /// Dispatch a binary op through the **left** operand's `CType` (§4.4:
  /// "dispatch through the CType slot on the left operand"), after checking
  /// both operands share a runtime type and the slot is populated.
  fn dispatch_binary_slot(&mut self, fc: &mut FuncCtx, lhs: Operand, rhs: Operand, slot: Slot, op_sym: &str) -> Operand {
    let lhs_type = fc.load(IrTy::Ptr, fc_gep_type(fc, lhs.clone()));
    let rhs_type = fc.load(IrTy::Ptr, fc_gep_type(fc, rhs.clone()));
    let same_type = fc.binop(IrTy::I1, IrBinop::ICmpEq, lhs_type.clone(), rhs_type);
    self.guard(fc, same_type, &runtime_messages::bad_binop(op_sym));
    let slot_ptr = fc.gep_field(lhs_type, slot_index(slot));
    let fnptr = fc.load(IrTy::Ptr, slot_ptr);
    let not_null = fc.binop(IrTy::I1, IrBinop::ICmpNe, fnptr.clone(), Operand::Const(Const::Null));
    self.guard(fc, not_null, &runtime_messages::bad_binop(op_sym));
    fc.call(IrTy::Ptr, CallTarget::Indirect(fnptr), vec![lhs, rhs])
  }

  fn dispatch_unary_slot(&mut self, fc: &mut FuncCtx, operand: Operand, slot: Slot, op_sym: &str) -> Operand {
    let obj_type = fc.load(IrTy::Ptr, fc_gep_type(fc, operand.clone()));
    let slot_ptr = fc.gep_field(obj_type, slot_index(slot));
    let fnptr = fc.load(IrTy::Ptr, slot_ptr);
    let not_null = fc.binop(IrTy::I1, IrBinop::ICmpNe, fnptr.clone(), Operand::Const(Const::Null));
    self.guard(fc, not_null, &runtime_messages::bad_unop(op_sym));
    fc.call(IrTy::Ptr, CallTarget::Indirect(fnptr), vec![operand])
  }

  /// Heapify a boxed value unconditionally (always populated, never
  /// guarded): used wherever a box address's `needs_heapify` flag is set.
  fn call_heapify(&mut self, fc: &mut FuncCtx, operand: Operand) -> Operand {
    let obj_type = fc.load(IrTy::Ptr, fc_gep_type(fc, operand.clone()));
    let slot_ptr = fc.gep_field(obj_type, slot_index(Slot::Heapify));
    let fnptr = fc.load(IrTy::Ptr, slot_ptr);
    fc.call(IrTy::Ptr, CallTarget::Indirect(fnptr), vec![operand])
  }

  // ---- raw fast path for scalar binops/unops (§4.4: "no boxing when both
  // operands are raw and share a type") ----

  fn raw_binop(&mut self, fc: &mut FuncCtx, prim: PrimType, op: Binop, a: Operand, b: Operand) -> Val {
    let slot = slot_for_binop(op);
    match objmodel::lookup(prim, slot).expect("static analysis only takes this path for a valid (type, op) pair") {
      Builder::Bin(irop) => {
        let rp = result_prim(prim, slot);
        Val::Raw(fc.binop(rp.data_ty(), irop, a, b), rp)
      }
      Builder::Exp { to_int } => {
        let (af, bf) = if matches!(prim, PrimType::Int) {
          (fc.cast(IrTy::F64, a, IrTy::I64), fc.cast(IrTy::F64, b, IrTy::I64))
        } else {
          (a, b)
        };
        let powed = fc.call(IrTy::F64, CallTarget::Extern("pow".to_string()), vec![af, bf]);
        if to_int { Val::Raw(fc.cast(IrTy::I64, powed, IrTy::F64), PrimType::Int) } else { Val::Raw(powed, PrimType::Float) }
      }
      _ => unreachable!("raw scalar path only ever uses Bin/Exp builders"),
    }
  }

  fn raw_unop(&mut self, fc: &mut FuncCtx, prim: PrimType, op: Unop, a: Operand) -> Val {
    let slot = match op { Unop::Neg => Slot::Neg, Unop::Not => Slot::Not };
    match objmodel::lookup(prim, slot).expect("static analysis only takes this path for a valid (type, op) pair") {
      Builder::Un(irop) => Val::Raw(fc.unop(prim.data_ty(), irop, a), prim),
      _ => unreachable!("unary raw path only ever uses the Un builder"),
    }
  }

  // ---- expression lowering (§4.4) ----

  fn lower_expr(&mut self, fc: &mut FuncCtx, e: &SExpr) -> Val {
    match &*e.kind {
      SExprKind::Lit(lit) => match lit {
        Lit::Int(n) => Val::Raw(Operand::Const(Const::I64(*n)), PrimType::Int),
        Lit::Float(n) => Val::Raw(Operand::Const(Const::F64(*n)), PrimType::Float),
        Lit::Bool(b) => Val::Raw(Operand::Const(Const::I1(*b)), PrimType::Bool),
        Lit::Str(s) => Val::Boxed(self.build_string_literal(fc, s)),
      },
      SExprKind::Var(sym) => self.lower_var(fc, *sym),
      SExprKind::Binop(op, lhs, rhs) => self.lower_binop(fc, *op, lhs, rhs),
      SExprKind::Unop(op, operand) => self.lower_unop(fc, *op, operand),
      SExprKind::Call(callee, args, mode) => self.lower_call(fc, callee, args, mode),
      SExprKind::List(exprs) => {
        let mut boxed = Vec::with_capacity(exprs.len());
        for x in exprs { let v = self.lower_expr(fc, x); boxed.push(self.to_boxed(fc, v)); }
        Val::Boxed(self.build_list_literal(fc, &boxed))
      }
      SExprKind::ListAccess(lhs, idx) => self.lower_list_access(fc, lhs, idx),
      SExprKind::Cast(inner, target) => self.lower_cast(fc, inner, target),
    }
  }

  fn lower_var(&mut self, fc: &mut FuncCtx, sym: Symbol) -> Val {
    let addr = fc.syms.get(sym).cloned().expect("every Var is bound by the time it reaches codegen");
    match addr {
      Address::RawAddr { slot, prim } => Val::Raw(fc.load(prim.data_ty(), slot), prim),
      Address::BoxAddr { slot, needs_heapify } => {
        let ptr = fc.load(IrTy::Ptr, slot.clone());
        let data_ptr = fc.load(IrTy::Ptr, fc_gep_data(fc, ptr.clone()));
        let defined = fc.binop(IrTy::I1, IrBinop::ICmpNe, data_ptr, Operand::Const(Const::Null));
        self.guard(fc, defined, &runtime_messages::name_not_defined(intern::resolve(sym)));
        let ptr = if needs_heapify {
          let heapified = self.call_heapify(fc, ptr);
          fc.store(slot.clone(), heapified.clone());
          if let Some(a) = fc.syms.get_mut(sym) { *a = Address::BoxAddr { slot, needs_heapify: false }; }
          heapified
        } else {
          ptr
        };
        Val::Boxed(ptr)
      }
    }
  }

  fn lower_binop(&mut self, fc: &mut FuncCtx, op: Binop, lhs: &SExpr, rhs: &SExpr) -> Val {
    if lhs.ty.is_raw_scalar() && rhs.ty.is_raw_scalar() && lhs.ty == rhs.ty {
      let prim = prim_for(&lhs.ty).expect("is_raw_scalar implies a PrimType exists");
      let a = self.lower_expr(fc, lhs);
      let b = self.lower_expr(fc, rhs);
      let a = self.as_raw_unchecked(a);
      let b = self.as_raw_unchecked(b);
      self.raw_binop(fc, prim, op, a, b)
    } else {
      let a = self.lower_expr(fc, lhs);
      let b = self.lower_expr(fc, rhs);
      let ao = self.to_boxed(fc, a);
      let bo = self.to_boxed(fc, b);
      let slot = slot_for_binop(op);
      Val::Boxed(self.dispatch_binary_slot(fc, ao, bo, slot, binop_symbol(op)))
    }
  }

  fn lower_unop(&mut self, fc: &mut FuncCtx, op: Unop, operand: &SExpr) -> Val {
    if operand.ty.is_raw_scalar() {
      let prim = prim_for(&operand.ty).expect("is_raw_scalar implies a PrimType exists");
      let v = self.lower_expr(fc, operand);
      let raw = self.as_raw_unchecked(v);
      self.raw_unop(fc, prim, op, raw)
    } else {
      let v = self.lower_expr(fc, operand);
      let o = self.to_boxed(fc, v);
      let slot = match op { Unop::Neg => Slot::Neg, Unop::Not => Slot::Not };
      Val::Boxed(self.dispatch_unary_slot(fc, o, slot, unop_symbol(op)))
    }
  }

  fn lower_list_access(&mut self, fc: &mut FuncCtx, lhs: &SExpr, idx: &SExpr) -> Val {
    let lv = self.lower_expr(fc, lhs);
    let lhs_boxed = self.to_boxed(fc, lv);
    let iv = self.lower_expr(fc, idx);
    let idx_raw = self.coerce_int_checked(fc, iv, runtime_messages::BAD_LIST_ACCESS);
    self.bounds_check(fc, lhs_boxed.clone(), idx_raw.clone());
    Val::Boxed(self.dispatch_unary_indexed(fc, lhs_boxed, idx_raw, Slot::Idx, runtime_messages::BAD_LIST_ACCESS))
  }

  /// `(e), (f)`: index must be a non-negative, in-bounds `Int`.
  fn bounds_check(&mut self, fc: &mut FuncCtx, lhs_boxed: Operand, idx_raw: Operand) {
    let list = fc.load(IrTy::Ptr, fc_gep_data(fc, lhs_boxed));
    let len = fc.load(IrTy::I64, fc.gep_field(list, layout::CLIST_LEN_OFFSET));
    let non_negative = fc.binop(IrTy::I1, IrBinop::ICmpSge, idx_raw.clone(), Operand::Const(Const::I64(0)));
    let below_len = fc.binop(IrTy::I1, IrBinop::ICmpSlt, idx_raw, len);
    let in_bounds = fc.binop(IrTy::I1, IrBinop::And, non_negative, below_len);
    self.guard(fc, in_bounds, runtime_messages::INDEX_OUT_OF_BOUNDS);
  }

  /// A binary-shaped dispatch (`self`, raw `i64` index) that isn't part of
  /// the generic same-type binop dispatch: `idx`/`idx_parent`.
  fn dispatch_unary_indexed(&mut self, fc: &mut FuncCtx, obj: Operand, idx: Operand, slot: Slot, msg: &str) -> Operand {
    let obj_type = fc.load(IrTy::Ptr, fc_gep_type(fc, obj.clone()));
    let slot_ptr = fc.gep_field(obj_type, slot_index(slot));
    let fnptr = fc.load(IrTy::Ptr, slot_ptr);
    let not_null = fc.binop(IrTy::I1, IrBinop::ICmpNe, fnptr.clone(), Operand::Const(Const::Null));
    self.guard(fc, not_null, msg);
    fc.call(IrTy::Ptr, CallTarget::Indirect(fnptr), vec![obj, idx])
  }

  fn lower_cast(&mut self, fc: &mut FuncCtx, inner: &SExpr, target: &Type) -> Val {
    let v = self.lower_expr(fc, inner);
    match (prim_for(&inner.ty), prim_for(target)) {
      (Some(sp), Some(tp)) if sp != tp => {
        let raw = self.as_raw_unchecked(v);
        Val::Raw(fc.cast(tp.data_ty(), raw, sp.data_ty()), tp)
      }
      (_, Some(tp)) if !target.is_box_type() => {
        // Narrowing from Dyn (or an already-matching raw value): checked
        // extraction. There's no dedicated runtime message for a failed
        // cast in the bit-exact set (§6), so this reuses the same
        // invalid-type wording a checked assignment uses — it's the same
        // underlying guard (§4.6(d)), just with no lvalue name to report.
        Val::Raw(self.coerce_to_prim(fc, v, tp, &runtime_messages::invalid_assign_type("cast")), tp)
      }
      _ => Val::Boxed(self.to_boxed(fc, v)),
    }
  }

  fn lower_call(&mut self, fc: &mut FuncCtx, callee: &SExpr, args: &[SExpr], mode: &CallMode) -> Val {
    match mode {
      CallMode::Specialized(sfunc) => {
        let name = self.get_or_build_specialized(sfunc.clone());
        let mut operands = Vec::with_capacity(args.len());
        for (arg, (formal_name, formal_ty)) in args.iter().zip(sfunc.formals.iter()) {
          let v = self.lower_expr(fc, arg);
          operands.push(self.coerce_to_formal(fc, v, formal_ty, *formal_name));
        }
        let ret_ty = ir_ty_for(&sfunc.return_type);
        let result = fc.call(ret_ty, CallTarget::Direct(name), operands);
        match prim_for(&sfunc.return_type) { Some(p) => Val::Raw(result, p), None => Val::Boxed(result) }
      }
      CallMode::Generic(stage) => {
        self.exec_transforms(fc, &stage.entry);
        let callee_val = self.lower_expr(fc, callee);
        let callee_obj = self.to_boxed(fc, callee_val);
        let mut boxed_args = Vec::with_capacity(args.len());
        for a in args { let v = self.lower_expr(fc, a); boxed_args.push(self.to_boxed(fc, v)); }
        let argv = self.build_argv(fc, &boxed_args);
        let fnptr = self.dispatch_unary_indexed_noarg(fc, callee_obj.clone(), Slot::Call);
        let result = fc.call(IrTy::Ptr, CallTarget::Indirect(fnptr), vec![callee_obj, argv]);
        self.exec_transforms(fc, &stage.exit);
        Val::Boxed(result)
      }
    }
  }

  fn dispatch_unary_indexed_noarg(&mut self, fc: &mut FuncCtx, obj: Operand, slot: Slot) -> Operand {
    let obj_type = fc.load(IrTy::Ptr, fc_gep_type(fc, obj));
    let slot_ptr = fc.gep_field(obj_type, slot_index(slot));
    fc.load(IrTy::Ptr, slot_ptr)
  }

  // ---- statement lowering (§4.4) ----

  fn lower_block(&mut self, fc: &mut FuncCtx, stmts: &[SStmt]) {
    for s in stmts {
      if fc.is_terminated() { break; }
      self.lower_stmt(fc, s);
    }
  }

  fn lower_stmt(&mut self, fc: &mut FuncCtx, stmt: &SStmt) {
    match stmt {
      SStmt::Block(b) => self.lower_block(fc, b),
      SStmt::Asn(lvalues, rhs) => {
        let v = self.lower_expr(fc, rhs);
        for lv in lvalues { self.lower_assign(fc, lv, v.clone(), &rhs.ty); }
      }
      SStmt::If(cond, then_b, else_b) => self.lower_if(fc, cond, then_b, else_b),
      SStmt::While(cond, stage) => self.lower_while(fc, cond, &stage.entry, &stage.body, &stage.exit),
      SStmt::For(var, iter, stage) => self.lower_for(fc, *var, iter, &stage.entry, &stage.body, &stage.exit),
      SStmt::Range(var, n, stage) => self.lower_range(fc, *var, n, &stage.entry, &stage.body, &stage.exit),
      SStmt::Return(opt_e) => self.lower_return(fc, opt_e.as_ref()),
      SStmt::Func(sfunc) => {
        let name = self.get_or_build_generic(sfunc.clone());
        let obj = self.build_func_obj(fc, &name);
        self.store_into_symbol(fc, sfunc.name, Val::Boxed(obj));
      }
      SStmt::Expr(e) => { self.lower_expr(fc, e); }
      SStmt::Print(e) => self.lower_print(fc, e),
      SStmt::Nop => {}
      SStmt::Transform(t) => self.exec_transform(fc, t),
      SStmt::Continue => {
        let (step, _) = *fc.loop_stack.last().expect("Continue only ever appears inside a loop body");
        fc.terminate(Terminator::Br(step));
      }
      SStmt::Break => {
        let (_, exit) = *fc.loop_stack.last().expect("Break only ever appears inside a loop body");
        fc.terminate(Terminator::Br(exit));
      }
    }
  }

  fn lower_assign(&mut self, fc: &mut FuncCtx, lv: &Lvalue, v: Val, rhs_ty: &Type) {
    match lv {
      Lvalue::Name(sym) => self.store_into_symbol_checked(fc, *sym, v, rhs_ty),
      Lvalue::Index(lhs, idx) => {
        let lv_val = self.lower_expr(fc, lhs);
        let lhs_boxed = self.to_boxed(fc, lv_val);
        let iv = self.lower_expr(fc, idx);
        let idx_raw = self.coerce_int_checked(fc, iv, runtime_messages::BAD_LIST_ACCESS);
        self.bounds_check(fc, lhs_boxed.clone(), idx_raw.clone());
        let slot_ptr = self.dispatch_unary_indexed(fc, lhs_boxed, idx_raw, Slot::IdxParent, runtime_messages::BAD_LIST_ACCESS);
        let boxed_val = self.to_boxed(fc, v);
        fc.store(slot_ptr, boxed_val);
      }
    }
  }

  /// Store into a bound name, respecting its canonical [`Address`]
  /// representation and running the §4.6(d) type check when needed.
  ///
  /// A dual-slot name is the one exception: its whole reason for existing
  /// is that it alternates representations (§4.5), so a write to it adopts
  /// whatever representation the incoming value already has rather than
  /// being checked against whichever one happened to be live before this
  /// statement — two branches of an `If` that each give a fresh name a
  /// different concrete type (scenario: `if c: x = 1 else: x = "s"`) must
  /// each be free to write their own representation here, since neither
  /// can see what the other branch would have done.
  fn store_into_symbol_checked(&mut self, fc: &mut FuncCtx, sym: Symbol, v: Val, _rhs_ty: &Type) {
    if let Some(dual) = fc.dual_slots.get(&sym).or_else(|| self.global_duals.get(&sym)).cloned() {
      self.store_dual(fc, sym, &dual, v);
      return;
    }
    let addr = fc.syms.get(sym).cloned().expect("every Asn target is bound by the time it reaches codegen");
    match addr {
      Address::RawAddr { slot, prim } => {
        let msg = runtime_messages::invalid_assign_type(intern::resolve(sym));
        let raw = self.coerce_to_prim(fc, v, prim, &msg);
        fc.store(slot, raw);
      }
      Address::BoxAddr { slot, .. } => {
        let boxed = self.to_boxed(fc, v);
        fc.store(slot.clone(), boxed);
        if let Some(a) = fc.syms.get_mut(sym) { *a = Address::BoxAddr { slot, needs_heapify: true }; }
      }
    }
  }

  fn store_dual(&mut self, fc: &mut FuncCtx, sym: Symbol, dual: &DualSlot, v: Val) {
    match v {
      Val::Raw(op, p) => {
        let (raw_slot, _) = dual.raw.clone().expect("a dual slot's raw half always exists for a raw value");
        fc.store(raw_slot.clone(), op);
        fc.syms.bind(sym, Address::RawAddr { slot: raw_slot, prim: p });
      }
      Val::Boxed(op) => {
        fc.store(dual.boxed.clone(), op);
        fc.syms.bind(sym, Address::BoxAddr { slot: dual.boxed.clone(), needs_heapify: true });
      }
    }
  }

  /// Like [`Self::store_into_symbol_checked`] but for internally-generated
  /// stores (loop variables, `Func` bindings) that never need the runtime
  /// type check, since the value's shape is already known to match.
  fn store_into_symbol(&mut self, fc: &mut FuncCtx, sym: Symbol, v: Val) {
    let addr = fc.syms.get(sym).cloned().expect("every bound name has an address by the time it's stored into");
    match addr {
      Address::RawAddr { slot, .. } => {
        let raw = self.as_raw_unchecked(v);
        fc.store(slot, raw);
      }
      Address::BoxAddr { slot, .. } => {
        let boxed = self.to_boxed(fc, v);
        fc.store(slot.clone(), boxed);
        if let Some(a) = fc.syms.get_mut(sym) { *a = Address::BoxAddr { slot, needs_heapify: true }; }
      }
    }
  }

  /// The two arms are mutually exclusive at runtime, so each must lower
  /// starting from the *same* pre-branch symbol table — not from whatever
  /// state the other arm's lowering happened to leave behind. Both arms'
  /// own trailing reconciliation `Transform`s (§4.2) already bring every
  /// name they touch to a matching `Address` kind, so it's safe to carry
  /// only the `else` arm's ending table into `merge_bb`.
  fn lower_if(&mut self, fc: &mut FuncCtx, cond: &SExpr, then_b: &[SStmt], else_b: &[SStmt]) {
    let c = self.lower_expr(fc, cond);
    let cond_op = self.coerce_bool(fc, c, runtime_messages::BAD_IF_BOOL);
    let then_bb = fc.new_block();
    let else_bb = fc.new_block();
    let merge_bb = fc.new_block();
    fc.terminate(Terminator::CondBr(cond_op, then_bb, else_bb));
    let entry_syms = fc.syms.clone();
    fc.switch_to(then_bb);
    self.lower_block(fc, then_b);
    fc.terminate(Terminator::Br(merge_bb));
    fc.syms = entry_syms;
    fc.switch_to(else_bb);
    self.lower_block(fc, else_b);
    fc.terminate(Terminator::Br(merge_bb));
    fc.switch_to(merge_bb);
  }

  fn lower_while(&mut self, fc: &mut FuncCtx, cond: &SExpr, entry: &[Transform], body: &[SStmt], exit: &[Transform]) {
    self.exec_transforms(fc, entry);
    let header = fc.new_block();
    let body_bb = fc.new_block();
    let exit_bb = fc.new_block();
    fc.terminate(Terminator::Br(header));
    fc.switch_to(header);
    let c = self.lower_expr(fc, cond);
    let cond_op = self.coerce_bool(fc, c, runtime_messages::BAD_WHILE_BOOL);
    fc.terminate(Terminator::CondBr(cond_op, body_bb, exit_bb));
    fc.switch_to(body_bb);
    fc.loop_stack.push((header, exit_bb));
    self.lower_block(fc, body);
    fc.loop_stack.pop();
    fc.terminate(Terminator::Br(header));
    fc.switch_to(exit_bb);
    self.exec_transforms(fc, exit);
  }

  /// Iterates the boxed list via its runtime `idx` slot (§4.4 "For iterates
  /// a boxed list via its idx slot"), so string and list iteration share the
  /// same dispatch path as explicit indexing.
  fn lower_for(&mut self, fc: &mut FuncCtx, var: Symbol, iter: &SExpr, entry: &[Transform], body: &[SStmt], exit: &[Transform]) {
    // `stage_loop_body` drops the loop variable from the post-loop
    // environment (it doesn't survive past the loop), so it never appears in
    // `sfunc.locals` and `allocate_locals` never gives it a slot. Each
    // element is read out of the list already boxed, so a plain `BoxAddr`
    // local is all it needs.
    Self::alloc_local_default(fc, var, &Type::Dyn);
    self.exec_transforms(fc, entry);
    let iter_val = self.lower_expr(fc, iter);
    let iter_boxed = self.to_boxed(fc, iter_val);
    let list = fc.load(IrTy::Ptr, fc_gep_data(fc, iter_boxed.clone()));
    let len = fc.load(IrTy::I64, fc.gep_field(list, layout::CLIST_LEN_OFFSET));
    let idx_slot = fc.alloca(IrTy::I64);
    fc.store(idx_slot.clone(), Operand::Const(Const::I64(0)));
    let header = fc.new_block();
    let body_bb = fc.new_block();
    let step_bb = fc.new_block();
    let exit_bb = fc.new_block();
    fc.terminate(Terminator::Br(header));
    fc.switch_to(header);
    let idx_cur = fc.load(IrTy::I64, idx_slot.clone());
    let cond = fc.binop(IrTy::I1, IrBinop::ICmpSlt, idx_cur, len);
    fc.terminate(Terminator::CondBr(cond, body_bb, exit_bb));
    fc.switch_to(body_bb);
    let idx_cur = fc.load(IrTy::I64, idx_slot.clone());
    let elem = self.dispatch_unary_indexed(fc, iter_boxed.clone(), idx_cur, Slot::Idx, runtime_messages::BAD_LIST_ACCESS);
    self.store_into_symbol(fc, var, Val::Boxed(elem));
    fc.loop_stack.push((step_bb, exit_bb));
    self.lower_block(fc, body);
    fc.loop_stack.pop();
    fc.terminate(Terminator::Br(step_bb));
    fc.switch_to(step_bb);
    let idx_cur = fc.load(IrTy::I64, idx_slot.clone());
    let next = fc.binop(IrTy::I64, IrBinop::AddI, idx_cur, Operand::Const(Const::I64(1)));
    fc.store(idx_slot, next);
    fc.terminate(Terminator::Br(header));
    fc.switch_to(exit_bb);
    self.exec_transforms(fc, exit);
  }

  fn lower_range(&mut self, fc: &mut FuncCtx, var: Symbol, n: &SExpr, entry: &[Transform], body: &[SStmt], exit: &[Transform]) {
    // Same reasoning as `lower_for`: the loop variable doesn't survive the
    // loop, so it's absent from `sfunc.locals` and needs its own slot here.
    // A `range` counter is always a raw `Int`.
    Self::alloc_local_default(fc, var, &Type::Int);
    self.exec_transforms(fc, entry);
    let nv = self.lower_expr(fc, n);
    let count = self.coerce_int_checked(fc, nv, &runtime_messages::bad_unop("range"));
    let idx_slot = fc.alloca(IrTy::I64);
    fc.store(idx_slot.clone(), Operand::Const(Const::I64(0)));
    let header = fc.new_block();
    let body_bb = fc.new_block();
    let step_bb = fc.new_block();
    let exit_bb = fc.new_block();
    fc.terminate(Terminator::Br(header));
    fc.switch_to(header);
    let idx_cur = fc.load(IrTy::I64, idx_slot.clone());
    let cond = fc.binop(IrTy::I1, IrBinop::ICmpSlt, idx_cur, count);
    fc.terminate(Terminator::CondBr(cond, body_bb, exit_bb));
    fc.switch_to(body_bb);
    let idx_cur = fc.load(IrTy::I64, idx_slot.clone());
    self.store_into_symbol(fc, var, Val::Raw(idx_cur, PrimType::Int));
    fc.loop_stack.push((step_bb, exit_bb));
    self.lower_block(fc, body);
    fc.loop_stack.pop();
    fc.terminate(Terminator::Br(step_bb));
    fc.switch_to(step_bb);
    let idx_cur = fc.load(IrTy::I64, idx_slot.clone());
    let next = fc.binop(IrTy::I64, IrBinop::AddI, idx_cur, Operand::Const(Const::I64(1)));
    fc.store(idx_slot, next);
    fc.terminate(Terminator::Br(header));
    fc.switch_to(exit_bb);
    self.exec_transforms(fc, exit);
  }

  fn lower_return(&mut self, fc: &mut FuncCtx, opt_e: Option<&SExpr>) {
    if fc.is_main {
      fc.terminate(Terminator::Ret(Some(Operand::Const(Const::I32(0)))));
      return;
    }
    match opt_e {
      Some(e) => {
        let v = self.lower_expr(fc, e);
        let operand = match fc.ret_kind {
          Some(p) => self.coerce_to_prim(fc, v, p, &runtime_messages::invalid_return_type(p.keyword())),
          None => self.to_boxed(fc, v),
        };
        fc.terminate(Terminator::Ret(Some(operand)));
      }
      None => {
        let operand = match fc.ret_kind {
          Some(p) => zero_operand(p),
          None => Operand::Const(Const::Null),
        };
        fc.terminate(Terminator::Ret(Some(operand)));
      }
    }
  }

  fn lower_print(&mut self, fc: &mut FuncCtx, e: &SExpr) {
    let v = self.lower_expr(fc, e);
    match v {
      Val::Raw(op, prim) => { self.print_raw_value(fc, prim, op); }
      Val::Boxed(op) => {
        let obj_type = fc.load(IrTy::Ptr, fc_gep_type(fc, op.clone()));
        let slot_ptr = fc.gep_field(obj_type, slot_index(Slot::Print));
        let fnptr = fc.load(IrTy::Ptr, slot_ptr);
        let not_null = fc.binop(IrTy::I1, IrBinop::ICmpNe, fnptr.clone(), Operand::Const(Const::Null));
        self.guard(fc, not_null, &runtime_messages::bad_unop("print"));
        fc.call(IrTy::I32, CallTarget::Indirect(fnptr), vec![op]);
      }
    }
    print_cstr(fc, "fmt_nl");
  }

  fn print_raw_value(&mut self, fc: &mut FuncCtx, prim: PrimType, op: Operand) {
    let promoted = promote_for_printf(fc, prim, op);
    let fmt = match prim {
      PrimType::Int => "fmt_d",
      PrimType::Float => "fmt_g",
      PrimType::Bool => "fmt_d",
      PrimType::Char => "fmt_c",
      PrimType::List | PrimType::String | PrimType::Func => unreachable!("List/String/Func are never raw-represented"),
    };
    printf(fc, vec![Operand::Const(Const::GlobalAddr(fmt.to_string())), promoted]);
  }

  // ---- Transform execution (§4.5) ----

  fn exec_transforms(&mut self, fc: &mut FuncCtx, ts: &[Transform]) { for t in ts { self.exec_transform(fc, t); } }

  fn exec_transform(&mut self, fc: &mut FuncCtx, t: &Transform) {
    if t.from == t.to { return; }
    let is_box_box = t.from.is_box_type() && t.to.is_box_type();
    if is_box_box {
      // Same physical `ptr` slot either way (`String`/`Arr`/`FuncType`/`Dyn`
      // all live in the box slot): nothing to move.
      return;
    }
    let dual = fc
      .dual_slots
      .get(&t.name)
      .cloned()
      .or_else(|| self.global_duals.get(&t.name).cloned())
      .expect("a non-no-op Transform's name was registered with dual slots at allocation time");
    match (prim_for(&t.from), prim_for(&t.to)) {
      (Some(_), None) => {
        // raw -> Dyn: box the current raw value, mark needs_heapify.
        let (raw_slot, prim) = dual.raw.expect("raw->Dyn transform implies a raw slot was allocated");
        let raw_val = fc.load(prim.data_ty(), raw_slot);
        let boxed = alloc_boxed_scalar(fc, prim, raw_val);
        fc.store(dual.boxed.clone(), boxed);
        fc.syms.bind(t.name, Address::BoxAddr { slot: dual.boxed, needs_heapify: true });
      }
      (None, Some(p)) => {
        // Dyn -> raw: heapify-if-needed, then extract.
        let boxed_ptr = fc.load(IrTy::Ptr, dual.boxed.clone());
        let heapified = self.call_heapify(fc, boxed_ptr);
        let storage = fc.load(IrTy::Ptr, fc_gep_data(fc, heapified));
        let raw_val = fc.load(p.data_ty(), storage);
        let (raw_slot, _) = dual.raw.expect("Dyn->raw transform implies a raw slot was allocated");
        fc.store(raw_slot.clone(), raw_val);
        fc.syms.bind(t.name, Address::RawAddr { slot: raw_slot, prim: p });
      }
      _ => unreachable!("Transform rows are raw<->Dyn or box<->box per the Transform Table"),
    }
  }

  // ---- function/global allocation (§3 Bindings, §4.4 Variables) ----

  fn alloc_local_default(fc: &mut FuncCtx, sym: Symbol, ty: &Type) {
    let addr = match prim_for(ty) {
      Some(p) => {
        let slot = fc.alloca(p.data_ty());
        fc.store(slot.clone(), zero_operand(p));
        Address::RawAddr { slot, prim: p }
      }
      None => {
        let slot = fc.alloca(IrTy::Ptr);
        fc.store(slot.clone(), Operand::Const(Const::GlobalAddr("null_sentinel".to_string())));
        Address::BoxAddr { slot, needs_heapify: false }
      }
    };
    fc.syms.bind(sym, addr);
  }

  fn alloc_local_dual(fc: &mut FuncCtx, sym: Symbol, raw_prim: PrimType, starts_raw: bool) {
    let raw_slot = fc.alloca(raw_prim.data_ty());
    fc.store(raw_slot.clone(), zero_operand(raw_prim));
    let box_slot = fc.alloca(IrTy::Ptr);
    fc.store(box_slot.clone(), Operand::Const(Const::GlobalAddr("null_sentinel".to_string())));
    fc.dual_slots.insert(sym, DualSlot { raw: Some((raw_slot.clone(), raw_prim)), boxed: box_slot.clone() });
    let addr = if starts_raw {
      Address::RawAddr { slot: raw_slot, prim: raw_prim }
    } else {
      Address::BoxAddr { slot: box_slot, needs_heapify: false }
    };
    fc.syms.bind(sym, addr);
  }

  /// Allocate every local named in `sfunc.locals`, seeding the symbol table
  /// with the enclosing globals first (locals shadow globals by name, the
  /// same lookup order as [`crate::env::State::lookup`]), then bind the
  /// incoming parameters over their freshly allocated slots.
  ///
  /// A dual-slot formal's entry representation is dictated by its own
  /// declared type, not by `sfunc.locals`' post-analysis inferred type
  /// (which may have since drifted to whatever it's last reassigned to) —
  /// the formal-binding loop below stores into whichever address this
  /// allocates, so the two must agree.
  fn allocate_locals(&mut self, fc: &mut FuncCtx, sfunc: &SFunc, generic: bool, transform_info: &HashMap<Symbol, DualInfo>) {
    fc.syms = self.globals.clone();
    let formal_types: HashMap<Symbol, &Type> = sfunc.formals.iter().map(|(s, t)| (*s, t)).collect();
    for (sym, ty) in &sfunc.locals {
      match transform_info.get(sym) {
        Some(info) => {
          let starts_raw = match formal_types.get(sym) {
            Some(formal_ty) => prim_for(formal_ty).is_some(),
            None => info.starts_raw,
          };
          Self::alloc_local_dual(fc, *sym, info.raw_prim, starts_raw);
        }
        None => Self::alloc_local_default(fc, *sym, ty),
      }
    }
    if generic {
      let argv = Operand::Value(fc.func.params[0].value);
      for (i, (sym, ty)) in sfunc.formals.iter().enumerate() {
        let boxed_arg = fc.load(IrTy::Ptr, fc.gep_field(argv.clone(), i as i64));
        let msg = runtime_messages::invalid_assign_type(intern::resolve(*sym));
        match prim_for(ty) {
          Some(p) => {
            let raw = self.coerce_to_prim(fc, Val::Boxed(boxed_arg), p, &msg);
            self.store_into_symbol(fc, *sym, Val::Raw(raw, p));
          }
          None => self.store_into_symbol(fc, *sym, Val::Boxed(boxed_arg)),
        }
      }
    } else {
      let params: Vec<Operand> = fc.func.params.iter().map(|p| Operand::Value(p.value)).collect();
      for (param, (sym, ty)) in params.into_iter().zip(sfunc.formals.iter()) {
        match prim_for(ty) {
          Some(p) => self.store_into_symbol(fc, *sym, Val::Raw(param, p)),
          None => self.store_into_symbol(fc, *sym, Val::Boxed(param)),
        }
      }
    }
  }

  fn specialized_name(base: &str, formals: &[(Symbol, Type)]) -> String {
    let mut s = format!("{base}__spec");
    for (_, t) in formals { s.push('_'); s.push_str(t.keyword()); }
    s
  }

  fn get_or_build_generic(&mut self, sfunc: Rc<SFunc>) -> String {
    let key = Rc::as_ptr(&sfunc) as usize;
    if let Some(name) = self.funcs_by_identity.get(&key) { return name.clone(); }
    let base = intern::resolve(sfunc.name).to_string();
    let name = self.unique_name(base);
    self.funcs_by_identity.insert(key, name.clone());
    self.build_function_body(&sfunc, name.clone(), true);
    name
  }

  fn get_or_build_specialized(&mut self, sfunc: Rc<SFunc>) -> String {
    let key = Rc::as_ptr(&sfunc) as usize;
    if let Some(name) = self.funcs_by_identity.get(&key) { return name.clone(); }
    let base = Self::specialized_name(intern::resolve(sfunc.name), &sfunc.formals);
    let name = self.unique_name(base);
    self.funcs_by_identity.insert(key, name.clone());
    self.build_function_body(&sfunc, name.clone(), false);
    name
  }

  fn build_function_body(&mut self, sfunc: &Rc<SFunc>, name: String, generic: bool) {
    let (params, ret_ty, ret_kind) = if generic {
      (vec![Param { value: ValueId::from_usize(0), ty: IrTy::Ptr }], IrTy::Ptr, None)
    } else {
      let params = sfunc
        .formals
        .iter()
        .enumerate()
        .map(|(i, (_, ty))| Param { value: ValueId::from_usize(i), ty: ir_ty_for(ty) })
        .collect();
      let ret_kind = prim_for(&sfunc.return_type);
      (params, ir_ty_for(&sfunc.return_type), ret_kind)
    };
    let mut fc = FuncCtx::new(name, params, ret_ty);
    fc.ret_kind = ret_kind;
    let transform_info = collect_transform_info(&sfunc.body);
    self.allocate_locals(&mut fc, sfunc, generic, &transform_info);
    self.lower_block(&mut fc, &sfunc.body);
    if !fc.is_terminated() {
      let default = match fc.ret_kind { Some(p) => zero_operand(p), None => Operand::Const(Const::Null) };
      fc.terminate(Terminator::Ret(Some(default)));
    }
    self.finalize_and_push(fc);
  }

  /// Assemble the top-level body into the entry function (§6: `main: () -> i32`).
  fn emit_main(&mut self, body: &[SStmt], transform_info: &HashMap<Symbol, DualInfo>) {
    let mut fc = FuncCtx::new(self.opts.entry_name.to_string(), vec![], IrTy::I32);
    fc.is_main = true;
    fc.syms = self.globals.clone();
    let _ = transform_info; // globals' dual slots were already allocated in declare_globals
    self.lower_block(&mut fc, body);
    if !fc.is_terminated() { fc.terminate(Terminator::Ret(Some(Operand::Const(Const::I32(0))))); }
    self.finalize_and_push(fc);
  }
}

/// `CObj.data` field address (word 0), used for every load/store against an
/// object's own (non-CList) storage pointer.
fn fc_gep_data(fc: &mut FuncCtx, obj: Operand) -> Operand { fc.gep_field(obj, layout::COBJ_DATA_OFFSET) }

fn fc_gep_type(fc: &mut FuncCtx, obj: Operand) -> Operand { fc.gep_field(obj, layout::COBJ_TYPE_OFFSET) }

/// `&data[idx]` for a `List`/`String`'s backing `CList`, given the owning
/// `CObj*` and an already-validated raw `i64` index.
fn idx_elem_ptr(fc: &mut FuncCtx, cobj: Operand, idx: Operand) -> Operand {
  let list = fc.load(IrTy::Ptr, fc_gep_data(fc, cobj));
  let data = fc.load(IrTy::Ptr, fc.gep_field(list, layout::CLIST_DATA_OFFSET));
  fc.gep(data, idx)
}

/// Copy `count` word-sized (`CObj*`) slots from `src[0..count)` into
/// `dst[base..base+count)`, as an explicit counted loop (§4.3 concat).
fn emit_copy_loop(fc: &mut FuncCtx, src: Operand, dst: Operand, base: Operand, count: Operand) {
  for_range(fc, count, |fc, i| {
    let v = fc.load(IrTy::Ptr, fc.gep(src, i));
    let dst_i = fc.binop(IrTy::I64, IrBinop::AddI, base.clone(), i);
    fc.store(fc.gep(dst, dst_i), v);
  });
}

/// Emit a simple counted `for i in 0..count` loop, reloading the counter
/// from a stack slot each iteration (this IR has no phi nodes). `body` is
/// run with the insertion point inside the loop body, given the current
/// counter value.
fn for_range(fc: &mut FuncCtx, count: Operand, mut body: impl FnMut(&mut FuncCtx, Operand)) {
  let slot = fc.alloca(IrTy::I64);
  fc.store(slot, Operand::Const(Const::I64(0)));
  let header = fc.new_block();
  let body_bb = fc.new_block();
  let exit = fc.new_block();
  fc.terminate(Terminator::Br(header));
  fc.switch_to(header);
  let i = fc.load(IrTy::I64, slot);
  let cond = fc.binop(IrTy::I1, IrBinop::ICmpSlt, i, count);
  fc.terminate(Terminator::CondBr(cond, body_bb, exit));
  fc.switch_to(body_bb);
  let i = fc.load(IrTy::I64, slot);
  body(fc, i);
  let i = fc.load(IrTy::I64, slot);
  let next = fc.binop(IrTy::I64, IrBinop::AddI, i, Operand::Const(Const::I64(1)));
  fc.store(slot, next);
  fc.terminate(Terminator::Br(header));
  fc.switch_to(exit);
}

/// `bool`/`char` need promoting to `i32` before a varargs `printf` call;
/// `int`/`float` pass through as-is.
fn promote_for_printf(fc: &mut FuncCtx, prim: PrimType, val: Operand) -> Operand {
  match prim {
    PrimType::Bool => fc.cast(IrTy::I32, val, IrTy::I1),
    PrimType::Char => fc.cast(IrTy::I32, val, IrTy::I8),
    _ => val,
  }
}

/// Dynamically dispatch to `elem`'s own `print` thunk (used for list
/// elements, which may hold any runtime type).
fn dispatch_print(fc: &mut FuncCtx, elem: Operand) -> Operand {
  let ty = fc.load(IrTy::Ptr, fc_gep_type(fc, elem));
  let slot_ptr = fc.gep_field(ty, slot_index(Slot::Print));
  let fnptr = fc.load(IrTy::Ptr, slot_ptr);
  fc.call(IrTy::I32, CallTarget::Indirect(fnptr), vec![elem])
}

/// Walk every block reachable from the entry; any block left without a
/// terminator (a branch target that both arms of an `If`/loop return out
/// of before reaching) is closed off with `unreachable`, mirroring
/// `mir_opt::BitSet`'s role tracking visited blocks in `build_vcode.rs`.
fn finalize_function(func: &mut Function) {
  let n = func.blocks.len();
  let mut visited = BitVec::from_elem(n, false);
  let mut stack = vec![BlockId::ENTRY];
  while let Some(b) = stack.pop() {
    let i = b.as_u32() as usize;
    if visited.get(i) == Some(true) { continue; }
    visited.set(i, true);
    if let Some(term) = func.blocks[b].term.clone() {
      match term {
        Terminator::Br(t) => stack.push(t),
        Terminator::CondBr(_, t, e) => { stack.push(t); stack.push(e); }
        Terminator::Ret(_) | Terminator::Unreachable => {}
      }
    }
  }
  for block in func.blocks.iter_mut() {
    if block.term.is_none() { block.term = Some(Terminator::Unreachable); }
  }
}
