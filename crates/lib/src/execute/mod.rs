//! Memoized, concurrent rule execution.
//!
//! The executor owns a memo table from [`RuleKey`] to a shared handle on the
//! rule's result. The first request for a key spawns the rule body as its own
//! tokio task and records the handle; every later or concurrent request for
//! the same key awaits that handle instead of running the body again.
//!
//! Because bodies run as spawned tasks:
//! - independent sub-requests run in parallel on the multi-thread runtime
//! - dropping a requester never cancels the body; its result is still memoized
//! - a failure is stored once and shared with every waiter
//!
//! Rules reach the executor through a [`Context`], which enforces that every
//! sub-request was declared when the rule was registered.

pub mod types;

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::FutureExt;
use futures::future::{Shared, try_join_all};
use tracing::{Instrument, debug, debug_span, trace};

use crate::config::ConfigError;
use crate::error::Error;
use crate::rules::types::RuleFuture;
use crate::rules::{GraphError, Param, RuleDef, RuleGraph, Signature, Value};
use crate::store::ContentStore;

pub use types::{RuleKey, RuleState, Session};

struct MemoEntry {
  state: Arc<Mutex<RuleState>>,
  result: Shared<RuleFuture>,
}

struct Inner {
  graph: RuleGraph,
  store: ContentStore,
  session: Session,
  memo: Mutex<HashMap<RuleKey, MemoEntry>>,
  executions: Mutex<HashMap<String, u64>>,
}

/// Runs rules from a validated [`RuleGraph`]. Cheap to clone.
#[derive(Clone)]
pub struct Executor {
  inner: Arc<Inner>,
}

impl Executor {
  /// Validate `graph` and build an executor over it.
  ///
  /// Ambiguous rules and declared requests without a provider are reported
  /// here rather than at request time.
  pub fn new(graph: RuleGraph, store: ContentStore, session: Session) -> Result<Self, GraphError> {
    graph.validate()?;
    debug!(rules = graph.len(), session = ?session, "executor ready");

    Ok(Self {
      inner: Arc::new(Inner {
        graph,
        store,
        session,
        memo: Mutex::default(),
        executions: Mutex::default(),
      }),
    })
  }

  pub fn store(&self) -> &ContentStore {
    &self.inner.store
  }

  pub fn session(&self) -> &Session {
    &self.inner.session
  }

  /// Compute `O` from `param` with the single rule registered for it.
  pub async fn request<P: Param, O: Send + Sync + 'static>(&self, param: P) -> Result<Arc<O>, Error> {
    let rule = self.inner.graph.resolve(&Signature::of::<P, O>())?;
    let value = self.inner.invoke(rule, param)?.await?;
    downcast(value)
  }

  /// State of a memo entry, if the key was ever requested.
  pub fn state(&self, key: &RuleKey) -> Option<RuleState> {
    let memo = lock(&self.inner.memo);
    memo.get(key).map(|entry| *lock(&entry.state))
  }

  /// How many times the body of `rule_id` was started.
  pub fn executions(&self, rule_id: &str) -> u64 {
    lock(&self.inner.executions).get(rule_id).copied().unwrap_or(0)
  }
}

impl Inner {
  /// Look up or start the invocation of `rule` with `param`.
  fn invoke<P: Param>(self: &Arc<Self>, rule: Arc<RuleDef>, param: P) -> Result<Shared<RuleFuture>, Error> {
    let key = RuleKey::new(&rule.id, &param)?;
    let mut memo = lock(&self.memo);
    if let Some(entry) = memo.get(&key) {
      trace!(key = %key, "memo hit");
      return Ok(entry.result.clone());
    }

    let state = Arc::new(Mutex::new(RuleState::Pending));
    let ctx = Context {
      inner: self.clone(),
      rule: rule.clone(),
    };
    let body = (rule.body)(ctx, Arc::new(param) as Value);

    let task_state = state.clone();
    let rule_id = rule.id.clone();
    let span = debug_span!("rule", rule = %rule.id, key = %key);
    let task = async move {
      let started = Instant::now();
      let result = match AssertUnwindSafe(body).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(Error::Panicked(panic_message(panic.as_ref()))),
      };
      let result = result.map_err(|e| e.within(rule_id.as_str()));

      *lock(&task_state) = match &result {
        Ok(_) => RuleState::Done,
        Err(_) => RuleState::Failed,
      };
      match &result {
        Ok(_) => debug!(elapsed = ?started.elapsed(), "rule completed"),
        Err(e) => debug!(error = %e, "rule failed"),
      }
      result
    }
    .instrument(span);

    let handle = tokio::spawn(task);
    let rule_id = rule.id.clone();
    let result = async move {
      handle
        .await
        .unwrap_or_else(|e| Err(Error::Panicked(e.to_string()).within(rule_id)))
    }
    .boxed()
    .shared();

    memo.insert(
      key,
      MemoEntry {
        state,
        result: result.clone(),
      },
    );
    drop(memo);

    *lock(&self.executions).entry(rule.id.clone()).or_default() += 1;
    Ok(result)
  }
}

/// A union member handle returned by [`Context::union_members`].
#[derive(Clone, Debug)]
pub struct UnionMember(Arc<RuleDef>);

impl UnionMember {
  pub fn id(&self) -> &str {
    &self.0.id
  }
}

/// Handle passed to every rule body.
#[derive(Clone)]
pub struct Context {
  inner: Arc<Inner>,
  rule: Arc<RuleDef>,
}

impl Context {
  /// Id of the rule this context was created for.
  pub fn rule_id(&self) -> &str {
    &self.rule.id
  }

  pub fn store(&self) -> &ContentStore {
    &self.inner.store
  }

  /// Read a session value.
  pub fn option<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, Error> {
    self
      .inner
      .session
      .get::<T>()
      .ok_or_else(|| ConfigError::MissingOption(std::any::type_name::<T>().to_string()).into())
  }

  /// Request `O` from `param`. The pair must have been declared with
  /// [`RuleDef::gets`].
  pub async fn get<P: Param, O: Send + Sync + 'static>(&self, param: P) -> Result<Arc<O>, Error> {
    let signature = self.declared::<P, O>()?;
    let rule = self.inner.graph.resolve(&signature)?;
    let value = self.inner.invoke(rule, param)?.await?;
    downcast(value)
  }

  /// Request `O` for every param concurrently; results keep param order.
  pub async fn get_all<P: Param, O: Send + Sync + 'static>(
    &self,
    params: impl IntoIterator<Item = P>,
  ) -> Result<Vec<Arc<O>>, Error> {
    try_join_all(params.into_iter().map(|param| self.get::<P, O>(param))).await
  }

  /// Union members registered for `O` from `P`, in registration order.
  pub fn union_members<P: Param, O: Send + Sync + 'static>(&self) -> Result<Vec<UnionMember>, Error> {
    let signature = self.declared::<P, O>()?;
    Ok(
      self
        .inner
        .graph
        .union_members(&signature)
        .iter()
        .cloned()
        .map(UnionMember)
        .collect(),
    )
  }

  /// Run one union member.
  pub async fn get_member<P: Param, O: Send + Sync + 'static>(
    &self,
    member: &UnionMember,
    param: P,
  ) -> Result<Arc<O>, Error> {
    let signature = self.declared::<P, O>()?;
    if member.0.signature != signature {
      return Err(Error::custom(format!(
        "union member '{}' does not produce {signature}",
        member.id()
      )));
    }
    let value = self.inner.invoke(member.0.clone(), param)?.await?;
    downcast(value)
  }

  /// Run every union member for `param` concurrently. Results are in
  /// registration order.
  pub async fn get_union<P: Param, O: Send + Sync + 'static>(&self, param: P) -> Result<Vec<Arc<O>>, Error> {
    let members = self.union_members::<P, O>()?;
    try_join_all(members.iter().map(|member| self.get_member::<P, O>(member, param.clone()))).await
  }

  fn declared<P: 'static, O: 'static>(&self) -> Result<Signature, Error> {
    let signature = Signature::of::<P, O>();
    if self.rule.gets.contains(&signature) {
      Ok(signature)
    } else {
      Err(
        GraphError::UndeclaredRequest {
          rule: self.rule.id.clone(),
          request: signature.to_string(),
        }
        .into(),
      )
    }
  }
}

fn downcast<O: Send + Sync + 'static>(value: Value) -> Result<Arc<O>, Error> {
  value
    .downcast::<O>()
    .map_err(|_| Error::custom(format!("rule produced a value that is not {}", std::any::type_name::<O>())))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
