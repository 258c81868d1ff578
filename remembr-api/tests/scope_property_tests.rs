//! Property tests for scope resolution and its SQL projection.
//!
//! Any record a readable predicate matches must belong to one of the
//! resolved scopes; these properties pin the invariants the predicate
//! builder has to uphold for that to be true.

use proptest::prelude::*;
use remembr_core::{
    AgentId, EntityIdType, MemoryScope, OrgId, ScopeLevel, ScopeResolver, TeamId, UserId,
};
use uuid::Uuid;

fn arb_uuid() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

fn arb_scope() -> impl Strategy<Value = MemoryScope> {
    (
        arb_uuid(),
        proptest::option::of(arb_uuid()),
        arb_uuid(),
        arb_uuid(),
        0u8..4,
    )
        .prop_map(|(org, team, user, agent, level)| {
            let org = OrgId::new(org);
            let team = team.map(TeamId::new);
            let user = UserId::new(user);
            let agent = AgentId::new(agent);
            match level {
                0 => MemoryScope::org(org),
                1 => MemoryScope::team(org, team.unwrap_or_else(TeamId::new_v4)),
                2 => MemoryScope::user(org, team, user),
                _ => MemoryScope::agent(org, team, user, agent),
            }
        })
}

proptest! {
    /// The readable chain always starts at the identity's own scope and
    /// ends at the org root.
    #[test]
    fn readable_chain_spans_identity_to_root(scope in arb_scope()) {
        let chain = ScopeResolver::resolve_readable_scopes(&scope);

        prop_assert!(!chain.is_empty());
        prop_assert_eq!(chain[0].level, scope.level);
        let root = chain.last().unwrap();
        prop_assert_eq!(root.level, ScopeLevel::Org);
        prop_assert_eq!(root.org_id, scope.org_id);
    }

    /// Every scope in the chain stays inside the same organization and
    /// strictly decreases in specificity.
    #[test]
    fn readable_chain_is_monotone(scope in arb_scope()) {
        let chain = ScopeResolver::resolve_readable_scopes(&scope);

        fn rank(level: ScopeLevel) -> u8 {
            match level {
                ScopeLevel::Agent => 3,
                ScopeLevel::User => 2,
                ScopeLevel::Team => 1,
                ScopeLevel::Org => 0,
            }
        }

        for window in chain.windows(2) {
            prop_assert_eq!(window[0].org_id, scope.org_id);
            prop_assert!(rank(window[0].level) > rank(window[1].level));
        }
    }

    /// Agent scopes always carry a user; the resolver never produces an
    /// agent scope with the user elided.
    #[test]
    fn agent_scopes_always_carry_user(scope in arb_scope()) {
        for readable in ScopeResolver::resolve_readable_scopes(&scope) {
            if readable.level == ScopeLevel::Agent {
                prop_assert!(readable.user_id.is_some());
                prop_assert!(readable.agent_id.is_some());
            }
        }
    }

    /// The writable scope is idempotent and never broader than the input.
    #[test]
    fn writable_scope_is_idempotent(scope in arb_scope()) {
        let writable = ScopeResolver::resolve_writable_scope(&scope);
        let again = ScopeResolver::resolve_writable_scope(&writable);
        prop_assert_eq!(writable, again);
        prop_assert_eq!(writable.org_id, scope.org_id);
    }

    /// The number of emitted placeholders equals the number of parameters,
    /// and numbering continues from the requested offset without gaps.
    #[test]
    fn predicate_params_match_placeholders(scope in arb_scope(), first in 1usize..20) {
        let chain = ScopeResolver::resolve_readable_scopes(&scope);
        let pred = MemoryScope::to_sql_predicate(&chain, "t.", first);

        for i in 0..pred.params.len() {
            let placeholder = format!("${}", first + i);
            prop_assert!(pred.sql.contains(&placeholder));
        }
        let excess_placeholder = format!("${}", first + pred.params.len());
        prop_assert!(!pred.sql.contains(&excess_placeholder));
        // Readable predicates never bind NULL parameters
        prop_assert!(pred.params.iter().all(|p| p.is_some()));
    }

    /// Each scope in the chain contributes exactly one OR-branch, and every
    /// branch pins the columns above its level to NULL.
    #[test]
    fn predicate_has_one_branch_per_scope(scope in arb_scope()) {
        let chain = ScopeResolver::resolve_readable_scopes(&scope);
        let pred = MemoryScope::to_sql_predicate(&chain, "", 1);

        prop_assert_eq!(pred.sql.matches(" OR ").count(), chain.len() - 1);

        let agent_null = pred.sql.matches("agent_id IS NULL").count();
        let non_agent_scopes = chain.iter().filter(|s| s.level != ScopeLevel::Agent).count();
        prop_assert_eq!(agent_null, non_agent_scopes);
    }

    /// The exact-match predicate always binds all four scope columns.
    #[test]
    fn exact_predicate_binds_four_params(scope in arb_scope(), first in 1usize..20) {
        let pred = scope.to_exact_predicate("", first);
        prop_assert_eq!(pred.params.len(), 4);
        prop_assert_eq!(pred.params[0], Some(scope.org_id.as_uuid()));
        prop_assert!(pred.sql.contains("IS NOT DISTINCT FROM"));
    }
}
