//! Memory scoping for the org → team → user → agent hierarchy.
//!
//! A [`MemoryScope`] identifies one tenancy slice. Writes always pin to the
//! most specific level available; reads inherit toward the root. The SQL
//! projection emits an OR-of-AND filter in which each readable scope matches
//! exactly the columns it names and pins strictly-more-specific columns to
//! NULL, so `user=U` can never match private agent records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::enums::ScopeLevel;
use crate::error::{CoreError, CoreResult};
use crate::identity::{AgentId, EntityIdType, OrgId, TeamId, UserId};

// ============================================================================
// MEMORY SCOPE
// ============================================================================

/// Scope envelope used for read/write memory access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryScope {
    pub org_id: OrgId,
    pub team_id: Option<TeamId>,
    pub user_id: Option<UserId>,
    pub agent_id: Option<AgentId>,
    pub level: ScopeLevel,
}

impl MemoryScope {
    /// Construct a scope, validating the hierarchy rules:
    /// the declared level must be backed by its id, and an agent id always
    /// requires a user id.
    pub fn new(
        org_id: OrgId,
        team_id: Option<TeamId>,
        user_id: Option<UserId>,
        agent_id: Option<AgentId>,
        level: ScopeLevel,
    ) -> CoreResult<Self> {
        match level {
            ScopeLevel::Team if team_id.is_none() => {
                return Err(CoreError::ScopeIdMissing {
                    level,
                    missing: "team_id",
                })
            }
            ScopeLevel::User if user_id.is_none() => {
                return Err(CoreError::ScopeIdMissing {
                    level,
                    missing: "user_id",
                })
            }
            ScopeLevel::Agent if agent_id.is_none() => {
                return Err(CoreError::ScopeIdMissing {
                    level,
                    missing: "agent_id",
                })
            }
            _ => {}
        }

        if agent_id.is_some() && user_id.is_none() {
            return Err(CoreError::InvalidScope(
                "user_id required when agent_id is set".to_string(),
            ));
        }

        Ok(Self {
            org_id,
            team_id,
            user_id,
            agent_id,
            level,
        })
    }

    /// Org-level scope.
    pub fn org(org_id: OrgId) -> Self {
        Self {
            org_id,
            team_id: None,
            user_id: None,
            agent_id: None,
            level: ScopeLevel::Org,
        }
    }

    /// Team-level scope.
    pub fn team(org_id: OrgId, team_id: TeamId) -> Self {
        Self {
            org_id,
            team_id: Some(team_id),
            user_id: None,
            agent_id: None,
            level: ScopeLevel::Team,
        }
    }

    /// User-level scope, optionally carrying the user's team.
    pub fn user(org_id: OrgId, team_id: Option<TeamId>, user_id: UserId) -> Self {
        Self {
            org_id,
            team_id,
            user_id: Some(user_id),
            agent_id: None,
            level: ScopeLevel::User,
        }
    }

    /// Agent-level scope. An agent always belongs to a user.
    pub fn agent(
        org_id: OrgId,
        team_id: Option<TeamId>,
        user_id: UserId,
        agent_id: AgentId,
    ) -> Self {
        Self {
            org_id,
            team_id,
            user_id: Some(user_id),
            agent_id: Some(agent_id),
            level: ScopeLevel::Agent,
        }
    }
}

// ============================================================================
// SCOPE RESOLVER
// ============================================================================

/// Resolver for deterministic read/write scope evaluation.
pub struct ScopeResolver;

impl ScopeResolver {
    /// Build the most-specific scope available for an authenticated identity.
    ///
    /// Level is agent when an agent id is present, user when only a user id
    /// is present, org otherwise. Invariant: `agent ⇒ user`.
    pub fn from_identity(
        org_id: OrgId,
        user_id: Option<UserId>,
        agent_id: Option<AgentId>,
    ) -> CoreResult<MemoryScope> {
        let level = if agent_id.is_some() {
            ScopeLevel::Agent
        } else if user_id.is_some() {
            ScopeLevel::User
        } else {
            ScopeLevel::Org
        };
        MemoryScope::new(org_id, None, user_id, agent_id, level)
    }

    /// Return the most-specific writable scope for the given identity scope.
    ///
    /// Writes always land at the most specific level the identity permits.
    pub fn resolve_writable_scope(scope: &MemoryScope) -> MemoryScope {
        if let Some(agent_id) = scope.agent_id {
            // new() is infallible here: agent_id implies user_id by
            // construction of the input scope.
            MemoryScope {
                org_id: scope.org_id,
                team_id: scope.team_id,
                user_id: scope.user_id,
                agent_id: Some(agent_id),
                level: ScopeLevel::Agent,
            }
        } else if scope.user_id.is_some() {
            MemoryScope {
                org_id: scope.org_id,
                team_id: scope.team_id,
                user_id: scope.user_id,
                agent_id: None,
                level: ScopeLevel::User,
            }
        } else if let Some(team_id) = scope.team_id {
            MemoryScope::team(scope.org_id, team_id)
        } else {
            MemoryScope::org(scope.org_id)
        }
    }

    /// Resolve the readable inclusion chain, most specific first, root last.
    ///
    /// agent → [agent, user, team?, org]; user → [user, team?, org];
    /// team → [team, org]; org → [org].
    pub fn resolve_readable_scopes(scope: &MemoryScope) -> Vec<MemoryScope> {
        match scope.level {
            ScopeLevel::Org => vec![MemoryScope::org(scope.org_id)],
            ScopeLevel::Team => {
                let team_id = scope.team_id.expect("team scope carries team_id");
                vec![
                    MemoryScope::team(scope.org_id, team_id),
                    MemoryScope::org(scope.org_id),
                ]
            }
            ScopeLevel::User => {
                let user_id = scope.user_id.expect("user scope carries user_id");
                let mut scopes = vec![MemoryScope::user(scope.org_id, scope.team_id, user_id)];
                if let Some(team_id) = scope.team_id {
                    scopes.push(MemoryScope::team(scope.org_id, team_id));
                }
                scopes.push(MemoryScope::org(scope.org_id));
                scopes
            }
            ScopeLevel::Agent => {
                let user_id = scope.user_id.expect("agent scope carries user_id");
                let agent_id = scope.agent_id.expect("agent scope carries agent_id");
                let mut scopes = vec![
                    MemoryScope::agent(scope.org_id, scope.team_id, user_id, agent_id),
                    MemoryScope::user(scope.org_id, None, user_id),
                ];
                if let Some(team_id) = scope.team_id {
                    scopes.push(MemoryScope::team(scope.org_id, team_id));
                }
                scopes.push(MemoryScope::org(scope.org_id));
                scopes
            }
        }
    }
}

// ============================================================================
// SQL PROJECTION
// ============================================================================

/// A SQL fragment plus its positional parameters.
///
/// All parameters are optional UUIDs; `None` binds SQL NULL (used by the
/// exact-match predicate's `IS NOT DISTINCT FROM` comparisons).
#[derive(Debug, Clone, PartialEq)]
pub struct ScopePredicate {
    pub sql: String,
    pub params: Vec<Option<Uuid>>,
}

impl MemoryScope {
    /// Exact-match predicate for write-side lookups: every scope column must
    /// equal the scope's value, with NULL matching NULL.
    ///
    /// `prefix` is a column prefix such as `"e."` (or empty). `first_param`
    /// is the 1-based index of the first positional parameter to emit.
    pub fn to_exact_predicate(&self, prefix: &str, first_param: usize) -> ScopePredicate {
        let p = first_param;
        ScopePredicate {
            sql: format!(
                "{pfx}org_id = ${} AND {pfx}team_id IS NOT DISTINCT FROM ${} \
                 AND {pfx}user_id IS NOT DISTINCT FROM ${} \
                 AND {pfx}agent_id IS NOT DISTINCT FROM ${}",
                p,
                p + 1,
                p + 2,
                p + 3,
                pfx = prefix,
            ),
            params: vec![
                Some(self.org_id.as_uuid()),
                self.team_id.map(|id| id.as_uuid()),
                self.user_id.map(|id| id.as_uuid()),
                self.agent_id.map(|id| id.as_uuid()),
            ],
        }
    }

    /// OR-of-AND readable predicate across the given scopes.
    ///
    /// Each scope contributes one conjunction: exact matches on the columns
    /// it names and literal `IS NULL` on strictly-more-specific columns.
    /// An empty scope list yields `FALSE` (matches nothing).
    pub fn to_sql_predicate(
        scopes: &[MemoryScope],
        prefix: &str,
        first_param: usize,
    ) -> ScopePredicate {
        if scopes.is_empty() {
            return ScopePredicate {
                sql: "FALSE".to_string(),
                params: Vec::new(),
            };
        }

        let mut params: Vec<Option<Uuid>> = Vec::new();
        let mut conditions: Vec<String> = Vec::new();
        let mut next = first_param;

        let bind = |params: &mut Vec<Option<Uuid>>, next: &mut usize, value: Uuid| {
            params.push(Some(value));
            let placeholder = format!("${}", *next);
            *next += 1;
            placeholder
        };

        for scope in scopes {
            let org = bind(&mut params, &mut next, scope.org_id.as_uuid());
            let condition = match scope.level {
                ScopeLevel::Org => format!(
                    "({pfx}org_id = {org} AND {pfx}team_id IS NULL \
                     AND {pfx}user_id IS NULL AND {pfx}agent_id IS NULL)",
                    pfx = prefix,
                ),
                ScopeLevel::Team => {
                    let team = bind(
                        &mut params,
                        &mut next,
                        scope.team_id.expect("team scope carries team_id").as_uuid(),
                    );
                    format!(
                        "({pfx}org_id = {org} AND {pfx}team_id = {team} \
                         AND {pfx}user_id IS NULL AND {pfx}agent_id IS NULL)",
                        pfx = prefix,
                    )
                }
                ScopeLevel::User => {
                    let team_match = match scope.team_id {
                        Some(team_id) => {
                            let team = bind(&mut params, &mut next, team_id.as_uuid());
                            format!("{pfx}team_id = {team}", pfx = prefix)
                        }
                        None => format!("{pfx}team_id IS NULL", pfx = prefix),
                    };
                    let user = bind(
                        &mut params,
                        &mut next,
                        scope.user_id.expect("user scope carries user_id").as_uuid(),
                    );
                    format!(
                        "({pfx}org_id = {org} AND {team_match} \
                         AND {pfx}user_id = {user} AND {pfx}agent_id IS NULL)",
                        pfx = prefix,
                    )
                }
                ScopeLevel::Agent => {
                    let team_match = match scope.team_id {
                        Some(team_id) => {
                            let team = bind(&mut params, &mut next, team_id.as_uuid());
                            format!("{pfx}team_id = {team}", pfx = prefix)
                        }
                        None => format!("{pfx}team_id IS NULL", pfx = prefix),
                    };
                    let user = bind(
                        &mut params,
                        &mut next,
                        scope.user_id.expect("agent scope carries user_id").as_uuid(),
                    );
                    let agent = bind(
                        &mut params,
                        &mut next,
                        scope
                            .agent_id
                            .expect("agent scope carries agent_id")
                            .as_uuid(),
                    );
                    format!(
                        "({pfx}org_id = {org} AND {team_match} \
                         AND {pfx}user_id = {user} AND {pfx}agent_id = {agent})",
                        pfx = prefix,
                    )
                }
            };
            conditions.push(condition);
        }

        ScopePredicate {
            sql: format!("({})", conditions.join(" OR ")),
            params,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (OrgId, TeamId, UserId, AgentId) {
        (
            OrgId::new_v4(),
            TeamId::new_v4(),
            UserId::new_v4(),
            AgentId::new_v4(),
        )
    }

    #[test]
    fn test_scope_validation() {
        let (org, team, user, agent) = ids();

        assert!(MemoryScope::new(org, None, None, None, ScopeLevel::Org).is_ok());
        assert!(MemoryScope::new(org, None, None, None, ScopeLevel::Team).is_err());
        assert!(MemoryScope::new(org, Some(team), None, None, ScopeLevel::Team).is_ok());
        assert!(MemoryScope::new(org, None, None, None, ScopeLevel::User).is_err());
        assert!(MemoryScope::new(org, None, Some(user), None, ScopeLevel::User).is_ok());
        assert!(MemoryScope::new(org, None, Some(user), Some(agent), ScopeLevel::Agent).is_ok());
        // agent without user violates the hierarchy
        assert!(MemoryScope::new(org, None, None, Some(agent), ScopeLevel::Agent).is_err());
    }

    #[test]
    fn test_from_identity_levels() {
        let (org, _, user, agent) = ids();

        let scope = ScopeResolver::from_identity(org, None, None).expect("org identity");
        assert_eq!(scope.level, ScopeLevel::Org);

        let scope = ScopeResolver::from_identity(org, Some(user), None).expect("user identity");
        assert_eq!(scope.level, ScopeLevel::User);

        let scope =
            ScopeResolver::from_identity(org, Some(user), Some(agent)).expect("agent identity");
        assert_eq!(scope.level, ScopeLevel::Agent);
        assert_eq!(scope.user_id, Some(user));

        // Agent identity without a user is rejected
        assert!(ScopeResolver::from_identity(org, None, Some(agent)).is_err());
    }

    #[test]
    fn test_readable_chain_org() {
        let (org, ..) = ids();
        let scopes = ScopeResolver::resolve_readable_scopes(&MemoryScope::org(org));
        assert_eq!(scopes, vec![MemoryScope::org(org)]);
    }

    #[test]
    fn test_readable_chain_user_with_team() {
        let (org, team, user, _) = ids();
        let scope = MemoryScope::user(org, Some(team), user);
        let scopes = ScopeResolver::resolve_readable_scopes(&scope);

        assert_eq!(scopes.len(), 3);
        assert_eq!(scopes[0], MemoryScope::user(org, Some(team), user));
        assert_eq!(scopes[1], MemoryScope::team(org, team));
        assert_eq!(scopes[2], MemoryScope::org(org));
    }

    #[test]
    fn test_readable_chain_user_without_team() {
        let (org, _, user, _) = ids();
        let scopes = ScopeResolver::resolve_readable_scopes(&MemoryScope::user(org, None, user));
        assert_eq!(
            scopes,
            vec![MemoryScope::user(org, None, user), MemoryScope::org(org)]
        );
    }

    #[test]
    fn test_readable_chain_agent() {
        let (org, team, user, agent) = ids();
        let scope = MemoryScope::agent(org, Some(team), user, agent);
        let scopes = ScopeResolver::resolve_readable_scopes(&scope);

        assert_eq!(scopes.len(), 4);
        assert_eq!(scopes[0].level, ScopeLevel::Agent);
        // The inherited user scope drops the team qualifier
        assert_eq!(scopes[1], MemoryScope::user(org, None, user));
        assert_eq!(scopes[2], MemoryScope::team(org, team));
        assert_eq!(scopes[3], MemoryScope::org(org));
    }

    #[test]
    fn test_writable_scope_is_most_specific() {
        let (org, team, user, agent) = ids();

        let scope = MemoryScope::agent(org, Some(team), user, agent);
        assert_eq!(
            ScopeResolver::resolve_writable_scope(&scope).level,
            ScopeLevel::Agent
        );

        let scope = MemoryScope::user(org, None, user);
        assert_eq!(
            ScopeResolver::resolve_writable_scope(&scope).level,
            ScopeLevel::User
        );

        let scope = MemoryScope::org(org);
        assert_eq!(
            ScopeResolver::resolve_writable_scope(&scope).level,
            ScopeLevel::Org
        );
    }

    #[test]
    fn test_sql_predicate_org_pins_specific_columns_null() {
        let (org, ..) = ids();
        let pred = MemoryScope::to_sql_predicate(&[MemoryScope::org(org)], "", 1);

        assert_eq!(
            pred.sql,
            "((org_id = $1 AND team_id IS NULL AND user_id IS NULL AND agent_id IS NULL))"
        );
        assert_eq!(pred.params, vec![Some(org.as_uuid())]);
    }

    #[test]
    fn test_sql_predicate_user_without_team_pins_team_null() {
        let (org, _, user, _) = ids();
        let pred = MemoryScope::to_sql_predicate(&[MemoryScope::user(org, None, user)], "e.", 1);

        // user=U team=NULL must not match private agent records
        assert!(pred.sql.contains("e.team_id IS NULL"));
        assert!(pred.sql.contains("e.agent_id IS NULL"));
        assert!(pred.sql.contains("e.user_id = $2"));
        assert_eq!(pred.params.len(), 2);
    }

    #[test]
    fn test_sql_predicate_numbers_params_across_scopes() {
        let (org, team, user, agent) = ids();
        let scope = MemoryScope::agent(org, Some(team), user, agent);
        let readable = ScopeResolver::resolve_readable_scopes(&scope);
        let pred = MemoryScope::to_sql_predicate(&readable, "", 3);

        // Four scopes: agent(4 params) + user(2) + team(2) + org(1) = 9
        assert_eq!(pred.params.len(), 9);
        assert!(pred.sql.contains("$3"));
        assert!(pred.sql.contains("$11"));
        assert!(!pred.sql.contains("$12"));
        assert_eq!(pred.sql.matches(" OR ").count(), 3);
    }

    #[test]
    fn test_sql_predicate_empty_is_false() {
        let pred = MemoryScope::to_sql_predicate(&[], "", 1);
        assert_eq!(pred.sql, "FALSE");
        assert!(pred.params.is_empty());
    }

    #[test]
    fn test_exact_predicate_binds_nulls() {
        let (org, _, user, _) = ids();
        let scope = MemoryScope::user(org, None, user);
        let pred = scope.to_exact_predicate("s.", 2);

        assert_eq!(
            pred.sql,
            "s.org_id = $2 AND s.team_id IS NOT DISTINCT FROM $3 \
             AND s.user_id IS NOT DISTINCT FROM $4 \
             AND s.agent_id IS NOT DISTINCT FROM $5"
        );
        assert_eq!(
            pred.params,
            vec![Some(org.as_uuid()), None, Some(user.as_uuid()), None]
        );
    }
}
