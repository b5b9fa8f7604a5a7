//! Memoization keys, rule states and the session value map.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::rules::Param;
use crate::util::hash::{Fingerprint, Hashable};

/// Identity of one rule invocation: the rule plus the hash of its param.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleKey {
  pub rule_id: String,
  pub inputs: Vec<Fingerprint>,
}

impl RuleKey {
  pub fn new<P: Param>(rule_id: impl Into<String>, param: &P) -> Result<Self, Error> {
    let rule_id = rule_id.into();
    let fingerprint = param
      .compute_hash()
      .map_err(|e| Error::custom(format!("failed to hash param for rule '{rule_id}': {e}")))?;
    Ok(Self {
      rule_id,
      inputs: vec![fingerprint],
    })
  }
}

impl fmt::Display for RuleKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.rule_id)?;
    for input in &self.inputs {
      write!(f, "@{}", &input.to_hex()[..12])?;
    }
    Ok(())
  }
}

impl fmt::Debug for RuleKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "RuleKey({self})")
  }
}

/// Lifecycle of a memo entry. Moves from `Pending` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
  Pending,
  Done,
  Failed,
}

/// Typed values shared with every rule for the lifetime of an executor.
///
/// Holds resolved options (bash setup, linter options, test options) and the
/// services rules dispatch to (process runner, tool cache). One value per
/// type.
#[derive(Clone, Default)]
pub struct Session {
  values: HashMap<TypeId, (&'static str, Arc<dyn Any + Send + Sync>)>,
}

impl Session {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder-style [`Session::insert`].
  pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
    self.insert(value);
    self
  }

  /// Set the value for `T`, replacing any earlier one.
  pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
    self
      .values
      .insert(TypeId::of::<T>(), (std::any::type_name::<T>(), Arc::new(value)));
  }

  pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
    let (_, value) = self.values.get(&TypeId::of::<T>())?;
    value.clone().downcast::<T>().ok()
  }

  pub fn contains<T: 'static>(&self) -> bool {
    self.values.contains_key(&TypeId::of::<T>())
  }
}

impl fmt::Debug for Session {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut names: Vec<_> = self.values.values().map(|(name, _)| *name).collect();
    names.sort_unstable();
    f.debug_struct("Session").field("values", &names).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, PartialEq)]
  struct Parallelism(usize);

  #[test]
  fn session_values_by_type() {
    let session = Session::new().with(Parallelism(4)).with("name".to_string());

    assert_eq!(*session.get::<Parallelism>().unwrap(), Parallelism(4));
    assert_eq!(session.get::<String>().unwrap().as_str(), "name");
    assert!(session.get::<u32>().is_none());
  }

  #[test]
  fn rule_key_depends_on_param_value() {
    let a = RuleKey::new("r", &"x".to_string()).unwrap();
    let b = RuleKey::new("r", &"x".to_string()).unwrap();
    let c = RuleKey::new("r", &"y".to_string()).unwrap();
    let d = RuleKey::new("other", &"x".to_string()).unwrap();

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_ne!(a, d);
    assert!(a.to_string().starts_with("r@"));
  }
}
