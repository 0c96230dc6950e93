//! Transform synthesis (§4.2): given two environments that were reached from
//! a common starting point along different paths, compute the merged
//! environment plus the `Transform` lists that reconcile each side to it.
//!
//! One function serves both call sites described in §4.1: `If` reconciles
//! the two branch-exit environments directly (both outputs are "exit"
//! prefixes, one per branch); loops reconcile the pre-loop environment
//! against the first-pass post-body environment (the first output becomes
//! the `entry` transforms run once before the loop, the second the `exit`
//! transforms run once after).

use crate::env::{Binding, Env};
use crate::intern::Symbol;
use crate::types::sast::Transform;
use crate::types::ty::Type;

/// `reconcile(m1, m2)` as described in §4.2. Returns `(merged, side1, side2,
/// newly_dynified)`.
#[must_use]
pub fn reconcile(m1: &Env, m2: &Env) -> (Env, Vec<Transform>, Vec<Transform>, Vec<Symbol>) {
  let mut merged = Env::new();
  let mut side1 = Vec::new();
  let mut side2 = Vec::new();
  let mut newly_dynified = Vec::new();

  let names: std::collections::HashSet<Symbol> = m1.keys().chain(m2.keys()).copied().collect();

  for name in names {
    let b1 = m1.get(&name);
    let b2 = m2.get(&name);
    let (merged_binding, t1, t2) = match (b1, b2) {
      (Some(b1), Some(b2)) => {
        let inferred = b1.inferred.join(&b2.inferred);
        let explicit = if b1.explicit == b2.explicit { b1.explicit.clone() } else { Type::Dyn };
        let func = match (&b1.func, &b2.func) {
          (Some(f1), Some(f2)) if std::rc::Rc::ptr_eq(f1, f2) => Some(f1.clone()),
          _ => None,
        };
        (Binding { explicit, inferred, func }, b1.inferred.clone(), b2.inferred.clone())
      }
      // A name known on only one side (e.g. declared inside a branch that
      // does not survive into the merge point) widens to `Dyn`: the other
      // side never initialized it.
      (Some(b1), None) => (Binding::new(Type::Dyn, Type::Dyn), b1.inferred.clone(), Type::Null),
      (None, Some(b2)) => (Binding::new(Type::Dyn, Type::Dyn), Type::Null, b2.inferred.clone()),
      (None, None) => unreachable!("name collected from a key set it belongs to"),
    };
    if merged_binding.inferred != t1 && b1.is_some() {
      if !t1.is_dyn() && merged_binding.inferred.is_dyn() { newly_dynified.push(name); }
      side1.push(Transform { name, from: t1, to: merged_binding.inferred.clone() });
    }
    if merged_binding.inferred != t2 && b2.is_some() {
      if !t2.is_dyn() && merged_binding.inferred.is_dyn() { newly_dynified.push(name); }
      side2.push(Transform { name, from: t2, to: merged_binding.inferred.clone() });
    }
    merged.insert(name, merged_binding);
  }
  (merged, side1, side2, newly_dynified)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::intern::intern;

  #[test]
  fn identical_envs_need_no_transforms() {
    let x = intern("x");
    let mut m = Env::new();
    m.insert(x, Binding::new(Type::Int, Type::Int));
    let (merged, side1, side2, dyn_) = reconcile(&m, &m);
    assert!(side1.is_empty());
    assert!(side2.is_empty());
    assert!(dyn_.is_empty());
    assert_eq!(merged.get(&x).unwrap().inferred, Type::Int);
  }

  #[test]
  fn diverging_concrete_types_dynify_both_sides() {
    let x = intern("y");
    let mut a = Env::new();
    a.insert(x, Binding::new(Type::Dyn, Type::Int));
    let mut b = Env::new();
    b.insert(x, Binding::new(Type::Dyn, Type::String));
    let (merged, side1, side2, dyn_) = reconcile(&a, &b);
    assert_eq!(merged.get(&x).unwrap().inferred, Type::Dyn);
    assert_eq!(side1, vec![Transform { name: x, from: Type::Int, to: Type::Dyn }]);
    assert_eq!(side2, vec![Transform { name: x, from: Type::String, to: Type::Dyn }]);
    assert_eq!(dyn_, vec![x]);
  }
}
