//! Rule definitions and the type keys they are registered under.

use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

use crate::error::Error;
use crate::execute::Context;

/// A type-erased rule input or output.
pub type Value = Arc<dyn Any + Send + Sync>;

pub(crate) type RuleFuture = BoxFuture<'static, Result<Value, Error>>;
type Body = Arc<dyn Fn(Context, Value) -> RuleFuture + Send + Sync>;

/// Bound for rule params: hashable for memoization, shareable across tasks.
pub trait Param: Serialize + Clone + Send + Sync + 'static {}

impl<T: Serialize + Clone + Send + Sync + 'static> Param for T {}

/// Runtime identity of a Rust type, with its name for diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey {
  id: TypeId,
  name: &'static str,
}

impl TypeKey {
  pub fn of<T: ?Sized + 'static>() -> Self {
    Self {
      id: TypeId::of::<T>(),
      name: std::any::type_name::<T>(),
    }
  }

  /// The type name without its module path.
  pub fn short_name(&self) -> &'static str {
    let base = self.name.split('<').next().unwrap_or(self.name);
    match base.rfind("::") {
      Some(idx) => &self.name[idx + 2..],
      None => self.name,
    }
  }
}

impl fmt::Display for TypeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.short_name())
  }
}

impl fmt::Debug for TypeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name)
  }
}

/// An (output, param) pair: what a rule produces and from what.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Signature {
  pub output: TypeKey,
  pub param: TypeKey,
}

impl Signature {
  pub fn of<P: 'static, O: 'static>() -> Self {
    Self {
      output: TypeKey::of::<O>(),
      param: TypeKey::of::<P>(),
    }
  }
}

impl fmt::Display for Signature {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Get({}, {})", self.output, self.param)
  }
}

/// Errors from building or querying the rule graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("no rule produces {output} from {param}")]
  NoRuleFound { output: String, param: String },

  #[error("more than one rule produces {output} from {param}: {}", rules.join(", "))]
  AmbiguousRule {
    output: String,
    param: String,
    rules: Vec<String>,
  },

  #[error("registering rule '{rule}' would create a cycle: {}", cycle.join(" -> "))]
  CyclicDependency { rule: String, cycle: Vec<String> },

  #[error("rule '{rule}' requested {request} without declaring it")]
  UndeclaredRequest { rule: String, request: String },

  #[error("rule id '{0}' is already registered")]
  DuplicateRuleId(String),
}

impl GraphError {
  pub(crate) fn no_rule(signature: &Signature) -> Self {
    GraphError::NoRuleFound {
      output: signature.output.to_string(),
      param: signature.param.to_string(),
    }
  }
}

/// A typed async computation registered with the rule graph.
///
/// ```ignore
/// let rule = RuleDef::new("bash.package", |ctx: Context, req: PackageRequest| async move {
///   let sources = ctx.get::<SourceFilesRequest, SourceFiles>(req.sources()).await?;
///   Ok(build_package(&ctx, &sources)?)
/// })
/// .gets::<SourceFilesRequest, SourceFiles>();
/// ```
#[derive(Clone)]
pub struct RuleDef {
  pub(crate) id: String,
  pub(crate) signature: Signature,
  pub(crate) gets: Vec<Signature>,
  pub(crate) body: Body,
}

impl RuleDef {
  pub fn new<P, O, F, Fut>(id: impl Into<String>, body: F) -> Self
  where
    P: Param,
    O: Send + Sync + 'static,
    F: Fn(Context, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, Error>> + Send + 'static,
  {
    let id = id.into();
    let rule_id = id.clone();
    let body: Body = Arc::new(move |ctx, value: Value| match value.downcast::<P>() {
      Ok(param) => body(ctx, P::clone(&param)).map(|r| r.map(|o| Arc::new(o) as Value)).boxed(),
      Err(_) => {
        let err = Error::custom(format!("rule '{rule_id}' received a param of the wrong type"));
        async move { Err(err) }.boxed()
      }
    });

    Self {
      id,
      signature: Signature::of::<P, O>(),
      gets: Vec::new(),
      body,
    }
  }

  /// Declare that this rule may request `O` from `P`.
  pub fn gets<P: 'static, O: 'static>(mut self) -> Self {
    let signature = Signature::of::<P, O>();
    if !self.gets.contains(&signature) {
      self.gets.push(signature);
    }
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn signature(&self) -> Signature {
    self.signature
  }

  pub fn declared_gets(&self) -> &[Signature] {
    &self.gets
  }
}

impl fmt::Debug for RuleDef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RuleDef")
      .field("id", &self.id)
      .field("signature", &self.signature)
      .field("gets", &self.gets)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  mod nested {
    pub struct Inner;
  }

  #[test]
  fn short_names_strip_module_path() {
    assert_eq!(TypeKey::of::<nested::Inner>().short_name(), "Inner");
    assert_eq!(TypeKey::of::<u32>().short_name(), "u32");
    assert_eq!(Signature::of::<u32, String>().to_string(), "Get(String, u32)");
  }

  #[test]
  fn gets_are_deduplicated() {
    let rule = RuleDef::new("r", |_ctx: Context, _p: u32| async { Ok(0u8) })
      .gets::<u32, String>()
      .gets::<u32, String>();
    assert_eq!(rule.declared_gets().len(), 1);
  }
}
