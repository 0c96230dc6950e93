//! Per-function addressing (§3 "Addresses", §4.4 "Variables"). The emitter
//! threads a symbol table mapping each live binding to where its value
//! currently lives: an unboxed primitive slot, or a slot holding a `CObj*`.

use hashbrown::HashMap;
use crate::codegen::ir::Operand;
use crate::codegen::objmodel::PrimType;
use crate::intern::Symbol;

/// Where one binding's current value lives.
#[derive(Clone, Debug)]
pub enum Address {
  /// An unboxed primitive slot holding the type's raw IR representation
  /// directly (`int`/`float`/`bool`).
  RawAddr { slot: Operand, prim: PrimType },
  /// A slot holding a `CObj*` (`String`/`Arr`/`FuncType`/`Dyn`).
  /// `needs_heapify` is set once the pointed-to `CObj`'s data references
  /// stack memory that must be copied to the heap before this box is
  /// captured or aliased elsewhere (§4.5).
  BoxAddr { slot: Operand, needs_heapify: bool },
}

impl Address {
  #[must_use] pub fn is_raw(&self) -> bool { matches!(self, Address::RawAddr { .. }) }
  #[must_use] pub fn is_box(&self) -> bool { matches!(self, Address::BoxAddr { .. }) }

  /// Mark a box address as referencing possibly-stack-local data. A no-op on
  /// a raw address (callers only ever call this right after allocating a
  /// temporary box).
  pub fn mark_needs_heapify(&mut self) {
    if let Address::BoxAddr { needs_heapify, .. } = self { *needs_heapify = true; }
  }
}

/// The per-function symbol table: every currently-live local/global name to
/// its [`Address`]. Reset on function entry; the emitter keeps one of these
/// per specialization being lowered (§4.4 "Variables").
#[derive(Clone, Debug, Default)]
pub struct SymbolTable(HashMap<Symbol, Address>);

impl SymbolTable {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn bind(&mut self, name: Symbol, addr: Address) { self.0.insert(name, addr); }

  #[must_use] pub fn get(&self, name: Symbol) -> Option<&Address> { self.0.get(&name) }

  #[must_use] pub fn get_mut(&mut self, name: Symbol) -> Option<&mut Address> { self.0.get_mut(&name) }
}
