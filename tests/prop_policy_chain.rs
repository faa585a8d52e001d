use std::sync::Arc;

use proptest::prelude::*;
use ownership_core::context::CallerContext;
use ownership_core::declaration::OwnershipDeclaration;
use ownership_core::env::Env;
use ownership_core::error::AccessError;
use ownership_core::ops::Op;
use ownership_core::policy::{AllOf, Decision, OperationDescriptor, Rule, RuleChain, RuleRef, ScopedRule};
use ownership_core::rebac::MemoryRebacStore;
use ownership_core::storage::Mutation;

// Rule that always returns the decision it was built with.
#[derive(Debug)]
struct Fixed(Decision);

impl Rule for Fixed {
    fn evaluate(&self, _env: &Env<'_>, _op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        Ok(self.0.clone())
    }
}

fn decision() -> impl Strategy<Value = Decision> {
    prop_oneof![
        Just(Decision::Allow),
        Just(Decision::Skip),
        "[a-z]{1,8}".prop_map(Decision::Deny),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Create),
        Just(Op::Update),
        Just(Op::UpdateOne),
        Just(Op::Delete),
        Just(Op::DeleteOne),
    ]
}

fn mutation_for(op: Op) -> Mutation {
    match op {
        Op::Create => Mutation::create("program"),
        Op::Update => Mutation::update("program"),
        Op::UpdateOne => Mutation::update_one("program", "p1"),
        Op::Delete => Mutation::delete("program"),
        Op::DeleteOne => Mutation::delete_one("program", "p1"),
    }
}

fn evaluate_mutation(chain: &RuleChain, m: &Mutation) -> Decision {
    let ctx = CallerContext::for_subject("u1");
    let store = MemoryRebacStore::new();
    let env = Env::new(&ctx, &store);
    let decl = OwnershipDeclaration::organization("program");
    chain
        .evaluate_mutation(&env, &OperationDescriptor::mutation(&decl, m))
        .unwrap()
}

fn first_non_skip<'a>(decisions: impl IntoIterator<Item = &'a Decision>) -> Decision {
    decisions
        .into_iter()
        .find(|d| **d != Decision::Skip)
        .cloned()
        .unwrap_or_else(|| Decision::deny("no rule allowed the operation"))
}

proptest! {
    /// The first non-skip decision wins; an exhausted chain denies.
    #[test]
    fn prop_first_non_skip_wins(decisions in prop::collection::vec(decision(), 0..8), kind in op()) {
        let mut chain = RuleChain::new();
        for d in &decisions {
            chain = chain.mutation_rule(Fixed(d.clone()));
        }
        let got = evaluate_mutation(&chain, &mutation_for(kind));
        prop_assert_eq!(got, first_non_skip(&decisions));
    }

    /// Scoped rules only take part for the kinds in their mask.
    #[test]
    fn prop_scoped_rules_filter_by_kind(
        rules in prop::collection::vec((0u8..32, decision()), 0..8),
        kind in op(),
    ) {
        let scoped: Vec<ScopedRule> = rules
            .iter()
            .map(|(mask, d)| ScopedRule::on(*mask, Fixed(d.clone())))
            .collect();
        let chain = RuleChain::from_parts(Vec::new(), scoped);
        let expected = first_non_skip(rules.iter().filter(|(mask, _)| kind.is(*mask)).map(|(_, d)| d));
        prop_assert_eq!(evaluate_mutation(&chain, &mutation_for(kind)), expected);
    }

    /// A conjunction returns its first deny, skips on any skip, and allows only unanimously.
    #[test]
    fn prop_all_of_semantics(decisions in prop::collection::vec(decision(), 0..6)) {
        let members: Vec<RuleRef> = decisions.iter().map(|d| Arc::new(Fixed(d.clone())) as RuleRef).collect();
        let chain = RuleChain::new().mutation_rule(AllOf::new(members));
        let got = evaluate_mutation(&chain, &mutation_for(Op::Create));

        let expected = if let Some(deny) = decisions.iter().find(|d| matches!(d, Decision::Deny(_))) {
            deny.clone()
        } else if decisions.is_empty() || decisions.contains(&Decision::Skip) {
            // a skipping conjunction falls through to the end of the chain
            Decision::deny("no rule allowed the operation")
        } else {
            Decision::Allow
        };
        prop_assert_eq!(got, expected);
    }

    /// `enforce` succeeds exactly when evaluation allows.
    #[test]
    fn prop_enforce_matches_evaluation(decisions in prop::collection::vec(decision(), 0..6), kind in op()) {
        let mut chain = RuleChain::new();
        for d in &decisions {
            chain = chain.mutation_rule(Fixed(d.clone()));
        }
        let ctx = CallerContext::for_subject("u1");
        let store = MemoryRebacStore::new();
        let env = Env::new(&ctx, &store);
        let decl = OwnershipDeclaration::organization("program");
        let m = mutation_for(kind);
        let descriptor = OperationDescriptor::mutation(&decl, &m);
        let allowed = chain.evaluate_mutation(&env, &descriptor).unwrap() == Decision::Allow;
        match chain.enforce(&env, &descriptor) {
            Ok(()) => prop_assert!(allowed),
            Err(AccessError::PolicyDenied { .. }) => prop_assert!(!allowed),
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }
}
