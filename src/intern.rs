//! A simple string interner. Every distinct name the compiler sees (variable
//! names, function names, field names it rejects) is interned once; the
//! resulting `Symbol` is `Copy` and compares by index rather than by string
//! contents.

use std::cell::RefCell;
use hashbrown::HashMap;
use typed_arena::Arena;

/// An interned string.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl std::fmt::Debug for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    INTERNER.with(|i| write!(f, "{:?}", i.borrow().resolve(*self)))
  }
}

impl std::fmt::Display for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    INTERNER.with(|i| write!(f, "{}", i.borrow().resolve(*self)))
  }
}

struct Interner {
  arena: Arena<u8>,
  map: HashMap<&'static str, Symbol>,
  vec: Vec<&'static str>,
}

impl Interner {
  fn new() -> Self { Self { arena: Arena::new(), map: HashMap::new(), vec: vec![] } }

  fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    // Safety: the arena outlives the interner (both live for the program's
    // duration, via the thread-local below), and we never hand out `&mut`
    // references into it again, so this reference can be safely extended
    // to `'static`.
    let buf = self.arena.alloc_str(s);
    let buf: &'static str = unsafe { std::mem::transmute::<&str, &'static str>(buf) };
    let sym = Symbol(self.vec.len().try_into().expect("too many symbols"));
    self.vec.push(buf);
    self.map.insert(buf, sym);
    sym
  }

  fn resolve(&self, sym: Symbol) -> &'static str { self.vec[sym.0 as usize] }
}

thread_local! {
  static INTERNER: RefCell<Interner> = RefCell::new(Interner::new());
}

/// Intern a string, returning its [`Symbol`].
#[must_use] pub fn intern(s: &str) -> Symbol {
  INTERNER.with(|i| i.borrow_mut().intern(s))
}

/// Resolve a [`Symbol`] back to its string contents.
#[must_use] pub fn resolve(sym: Symbol) -> &'static str {
  INTERNER.with(|i| i.borrow().resolve(sym))
}
