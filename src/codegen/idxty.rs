//! Newtype indices used by the emitted IR (§4.4, §6). Mirrors the
//! `BlockId`/`ProcId`/`VReg` family in `types::vcode` that `build_vcode.rs`
//! builds against, minus the register-allocation-specific members this
//! compiler has no use for (there is no physical-register stage downstream
//! of the textual IR this crate emits).

use crate::idx::mk_idx;

mk_idx! {
  /// A basic block within one [`crate::codegen::ir::Function`].
  BlockId
}

impl BlockId {
  /// Every function's first block, exactly as `cfg[BlockId::ENTRY]` is used
  /// throughout `build_vcode.rs`.
  pub const ENTRY: BlockId = BlockId(0);
}

mk_idx! {
  /// An SSA value produced by some [`crate::codegen::ir::Inst`] or taken as
  /// a function parameter.
  ValueId
}

mk_idx! {
  /// A function (generic or specialized) within the emitted [`crate::codegen::ir::Module`].
  ProcId
}
