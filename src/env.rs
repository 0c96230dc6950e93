//! The semantic environment (§3 Bindings/Environments, §9 "Environment
//! immutability at branches"). Implemented with [`im::HashMap`] so that
//! cloning the environment at every `If`/loop iteration — which the
//! analyzer does constantly, since each branch must see an independent copy
//! before [`crate::semant::transform`] reconciles them — is O(1) amortized
//! rather than a deep copy.

use std::cell::RefCell;
use std::rc::Rc;
use im::HashMap;
use crate::intern::Symbol;
use crate::types::ast::FuncDecl;
use crate::types::sast::SFunc;
use crate::types::ty::Type;

/// A single name's binding: `(explicit_type, inferred_type, associated_data)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Binding {
  /// The user's annotation, or `Dyn` if none was given.
  pub explicit: Type,
  /// The current flow-sensitive type.
  pub inferred: Type,
  /// Present only for names bound to a known function declaration (enables
  /// inline specialization at call sites, §4.1).
  pub func: Option<Rc<FuncDecl>>,
}

impl Binding {
  #[must_use] pub fn new(explicit: Type, inferred: Type) -> Self {
    Self { explicit, inferred, func: None }
  }
  #[must_use] pub fn with_func(inferred: Type, func: Rc<FuncDecl>) -> Self {
    Self { explicit: Type::FuncType, inferred, func: Some(func) }
  }
}

/// A persistent, insertion-order-irrelevant mapping from name to [`Binding`].
pub type Env = HashMap<Symbol, Binding>;

/// The outcome of building a specialization: either a finished record, or
/// `InProgress` (the recursion guard, §9 "Recursion guard").
#[derive(Clone, Debug)]
pub enum SpecStatus {
  InProgress,
  Done(Rc<SFunc>),
}

/// The call-stack memo (§3 State, §4.1 step 3-4, §8 "identical keys produce
/// the same IR function referentially"). Keyed by the *identity* of the
/// function's AST (not its contents — two syntactically identical `def`s at
/// different source locations must specialize independently) together with
/// the tuple of formal argument types.
///
/// This is shared (via `Rc<RefCell<_>>`) across the whole analysis rather
/// than threaded by value like [`Env`]: specializations discovered down one
/// branch of an `if` remain valid and must be visible to a sibling branch
/// or an enclosing call, whereas environments themselves must diverge per
/// branch. It is monotonic — entries are added, never removed or rolled
/// back.
#[derive(Clone, Default)]
pub struct CallMemo(Rc<RefCell<std::collections::HashMap<(usize, Vec<Type>), SpecStatus>>>);

impl CallMemo {
  #[must_use] pub fn new() -> Self { Self::default() }

  fn key(func: &Rc<FuncDecl>, arg_types: &[Type]) -> (usize, Vec<Type>) {
    (Rc::as_ptr(func) as usize, arg_types.to_vec())
  }

  /// Look up a previously recorded status for this `(function, arg types)`
  /// pair without changing anything.
  #[must_use] pub fn get(&self, func: &Rc<FuncDecl>, arg_types: &[Type]) -> Option<SpecStatus> {
    self.0.borrow().get(&Self::key(func, arg_types)).cloned()
  }

  /// Mark a `(function, arg types)` pair as currently being specialized,
  /// guarding against infinite recursion. Must be paired with a later call
  /// to [`Self::finish`].
  pub fn start(&self, func: &Rc<FuncDecl>, arg_types: &[Type]) {
    self.0.borrow_mut().insert(Self::key(func, arg_types), SpecStatus::InProgress);
  }

  /// Record the finished specialization.
  pub fn finish(&self, func: &Rc<FuncDecl>, arg_types: &[Type], sfunc: Rc<SFunc>) {
    self.0.borrow_mut().insert(Self::key(func, arg_types), SpecStatus::Done(sfunc));
  }
}

/// The observed types of every `Return` reached so far while analyzing one
/// function body (SPEC_FULL §4.1 step 4, "Merge semantics for return data").
/// Shared (not threaded by value) for the same reason as [`CallMemo`]: a
/// `Return` inside either arm of an `If` must contribute to the same
/// function-wide tally, even though the two arms analyze independent `Env`
/// clones. [`crate::semant::specialize_call`] installs a fresh one per call.
pub type Returns = Rc<RefCell<Vec<Type>>>;

/// The analyzer's threaded state (§3 State).
#[derive(Clone)]
pub struct State {
  pub locals: Env,
  pub globals: Env,
  pub in_function: bool,
  pub in_conditional: bool,
  pub in_forloop: bool,
  /// Set while first-pass scanning a function body, to defer resolution of
  /// possibly forward-referenced globals (§3).
  pub noeval_flag: bool,
  pub callstack_memo: CallMemo,
  pub returns: Returns,
}

impl State {
  #[must_use] pub fn new() -> Self {
    Self {
      locals: Env::new(),
      globals: Env::new(),
      in_function: false,
      in_conditional: false,
      in_forloop: false,
      noeval_flag: false,
      callstack_memo: CallMemo::new(),
      returns: Rc::new(RefCell::new(Vec::new())),
    }
  }

  /// The environment a lookup/assignment should consult: locals while
  /// inside a function, globals at top level.
  #[must_use] pub fn active_env(&self) -> &Env { if self.in_function { &self.locals } else { &self.globals } }

  pub fn set_active_env(&mut self, env: Env) {
    if self.in_function { self.locals = env } else { self.globals = env }
  }

  /// Look up a name in the active scope, falling back to globals if this is
  /// a function scope (so a function body can read enclosing globals).
  #[must_use] pub fn lookup(&self, name: Symbol) -> Option<&Binding> {
    self.locals.get(&name).or_else(|| if self.in_function { self.globals.get(&name) } else { None })
  }
}

impl Default for State {
  fn default() -> Self { Self::new() }
}
