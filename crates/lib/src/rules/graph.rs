//! The rule registry.
//!
//! Rules are indexed by the [`Signature`] they produce. Alongside the index
//! the graph keeps a petgraph `DiGraph` over signatures with an edge from
//! every declared request to the rule that declares it, so a registration
//! that would close a loop is refused on the spot.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use super::types::{GraphError, RuleDef, Signature};

#[derive(Debug, Default)]
pub struct RuleGraph {
  rules: HashMap<Signature, Vec<Arc<RuleDef>>>,
  unions: HashMap<Signature, Vec<Arc<RuleDef>>>,
  ids: Vec<String>,
  edges: DiGraph<Signature, ()>,
  nodes: HashMap<Signature, NodeIndex>,
}

impl RuleGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a rule.
  ///
  /// Fails with `CyclicDependency` if any declared request could reach back
  /// to this rule's own signature, and leaves the graph unchanged.
  pub fn register(&mut self, rule: RuleDef) -> Result<(), GraphError> {
    let rule = self.admit(rule)?;
    self.rules.entry(rule.signature).or_default().push(rule);
    Ok(())
  }

  /// Register a member of an extension point.
  ///
  /// Any number of members may share one signature; they are kept in
  /// registration order.
  pub fn register_union_member(&mut self, rule: RuleDef) -> Result<(), GraphError> {
    let rule = self.admit(rule)?;
    self.unions.entry(rule.signature).or_default().push(rule);
    Ok(())
  }

  /// The single non-union rule producing `signature`.
  pub fn resolve(&self, signature: &Signature) -> Result<Arc<RuleDef>, GraphError> {
    match self.rules.get(signature).map(Vec::as_slice) {
      None | Some([]) => Err(GraphError::no_rule(signature)),
      Some([rule]) => Ok(rule.clone()),
      Some(many) => Err(ambiguous(signature, many)),
    }
  }

  /// Union members for `signature`, in registration order. Possibly empty.
  pub fn union_members(&self, signature: &Signature) -> &[Arc<RuleDef>] {
    self.unions.get(signature).map(Vec::as_slice).unwrap_or_default()
  }

  /// Check the whole graph: no ambiguous signatures and a provider for
  /// every declared request.
  pub fn validate(&self) -> Result<(), GraphError> {
    let mut signatures: Vec<_> = self.rules.keys().collect();
    signatures.sort();
    for signature in signatures {
      let rules = &self.rules[signature];
      if rules.len() > 1 {
        return Err(ambiguous(signature, rules));
      }
    }

    for rule in self.all_rules() {
      for get in &rule.gets {
        let provided = self.rules.contains_key(get) || self.unions.contains_key(get);
        if !provided {
          return Err(GraphError::no_rule(get));
        }
      }
    }

    debug!(rules = self.ids.len(), "rule graph validated");
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ids.is_empty()
  }

  /// Registered rule ids in registration order.
  pub fn rule_ids(&self) -> &[String] {
    &self.ids
  }

  fn all_rules(&self) -> impl Iterator<Item = &Arc<RuleDef>> {
    self.rules.values().chain(self.unions.values()).flatten()
  }

  fn admit(&mut self, rule: RuleDef) -> Result<Arc<RuleDef>, GraphError> {
    if self.ids.contains(&rule.id) {
      return Err(GraphError::DuplicateRuleId(rule.id));
    }

    let target = rule.signature;
    for get in &rule.gets {
      if let Some(cycle) = self.cycle_through(*get, target) {
        return Err(GraphError::CyclicDependency {
          rule: rule.id.clone(),
          cycle,
        });
      }
    }

    let target_idx = self.node(target);
    for get in &rule.gets {
      let get_idx = self.node(*get);
      self.edges.update_edge(get_idx, target_idx, ());
    }

    debug!(rule = %rule.id, signature = %target, gets = rule.gets.len(), "registered rule");
    self.ids.push(rule.id.clone());
    Ok(Arc::new(rule))
  }

  /// If adding `from -> to` would close a loop, the loop's signatures.
  fn cycle_through(&self, from: Signature, to: Signature) -> Option<Vec<String>> {
    if from == to {
      return Some(vec![to.to_string(), to.to_string()]);
    }

    let (&to_idx, &from_idx) = (self.nodes.get(&to)?, self.nodes.get(&from)?);
    let (_, path) = astar(&self.edges, to_idx, |n| n == from_idx, |_| 1u32, |_| 0)?;
    let mut cycle: Vec<String> = path.iter().map(|idx| self.edges[*idx].to_string()).collect();
    cycle.push(to.to_string());
    Some(cycle)
  }

  fn node(&mut self, signature: Signature) -> NodeIndex {
    *self
      .nodes
      .entry(signature)
      .or_insert_with(|| self.edges.add_node(signature))
  }
}

fn ambiguous(signature: &Signature, rules: &[Arc<RuleDef>]) -> GraphError {
  GraphError::AmbiguousRule {
    output: signature.output.to_string(),
    param: signature.param.to_string(),
    rules: rules.iter().map(|r| r.id.clone()).collect(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::execute::Context;

  #[derive(Clone, serde::Serialize)]
  struct A;
  #[derive(Clone, serde::Serialize)]
  struct B;
  #[derive(Clone, serde::Serialize)]
  struct C;

  fn rule<P: crate::rules::Param, O: Send + Sync + Default + 'static>(id: &str) -> RuleDef {
    RuleDef::new(id, |_ctx: Context, _p: P| async { Ok(O::default()) })
  }

  #[test]
  fn resolve_by_signature() {
    let mut graph = RuleGraph::new();
    graph.register(rule::<A, u32>("a_to_u32")).unwrap();

    assert_eq!(graph.resolve(&Signature::of::<A, u32>()).unwrap().id(), "a_to_u32");
    assert!(matches!(
      graph.resolve(&Signature::of::<B, u32>()),
      Err(GraphError::NoRuleFound { .. })
    ));
  }

  #[test]
  fn self_request_is_a_cycle() {
    let mut graph = RuleGraph::new();
    let err = graph.register(rule::<A, u32>("loop").gets::<A, u32>()).unwrap_err();
    assert!(matches!(err, GraphError::CyclicDependency { ref rule, .. } if rule == "loop"));
    assert!(graph.is_empty());
  }

  #[test]
  fn indirect_cycle_rejected_at_registration() {
    let mut graph = RuleGraph::new();
    // Get(u32, A) needs Get(u64, B); Get(u64, B) needs Get(u8, C).
    graph.register(rule::<A, u32>("first").gets::<B, u64>()).unwrap();
    graph.register(rule::<B, u64>("second").gets::<C, u8>()).unwrap();

    // Closing the loop back to Get(u32, A) fails immediately.
    let err = graph.register(rule::<C, u8>("third").gets::<A, u32>()).unwrap_err();
    match err {
      GraphError::CyclicDependency { rule, cycle } => {
        assert_eq!(rule, "third");
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
      }
      other => panic!("expected cycle, got {other:?}"),
    }

    // The rejected rule left nothing behind.
    assert_eq!(graph.rule_ids(), ["first", "second"]);
    graph.register(rule::<C, u8>("third")).unwrap();
    graph.validate().unwrap();
  }

  #[test]
  fn same_output_from_different_params_is_not_a_cycle() {
    let mut graph = RuleGraph::new();
    graph.register(rule::<A, u32>("from_a").gets::<B, u32>()).unwrap();
    graph.register(rule::<B, u32>("from_b")).unwrap();
    graph.validate().unwrap();
  }

  #[test]
  fn validate_reports_ambiguity() {
    let mut graph = RuleGraph::new();
    graph.register(rule::<A, u32>("one")).unwrap();
    graph.register(rule::<A, u32>("two")).unwrap();

    let err = graph.validate().unwrap_err();
    assert!(matches!(err, GraphError::AmbiguousRule { ref rules, .. } if rules == &["one", "two"]));
  }

  #[test]
  fn validate_reports_missing_provider() {
    let mut graph = RuleGraph::new();
    graph.register(rule::<A, u32>("needs_b").gets::<B, u64>()).unwrap();
    assert!(matches!(graph.validate(), Err(GraphError::NoRuleFound { .. })));
  }

  #[test]
  fn union_members_keep_registration_order() {
    let mut graph = RuleGraph::new();
    graph.register_union_member(rule::<A, u32>("lint.first")).unwrap();
    graph.register_union_member(rule::<A, u32>("lint.second")).unwrap();
    graph.register(rule::<B, u64>("goal").gets::<A, u32>()).unwrap();

    graph.validate().unwrap();
    let ids: Vec<_> = graph
      .union_members(&Signature::of::<A, u32>())
      .iter()
      .map(|r| r.id())
      .collect();
    assert_eq!(ids, vec!["lint.first", "lint.second"]);
  }

  #[test]
  fn duplicate_ids_rejected() {
    let mut graph = RuleGraph::new();
    graph.register(rule::<A, u32>("same")).unwrap();
    assert_eq!(
      graph.register(rule::<B, u32>("same")).unwrap_err(),
      GraphError::DuplicateRuleId("same".into())
    );
  }
}
