//! Repository functions over raw SQL.
//!
//! Functions are generic over [`tokio_postgres::GenericClient`] so they run
//! against both pooled connections and transactions. Every tenant-scoped
//! query applies the scope predicate before any other filter; bypassing scope
//! is not a supported call pattern.

pub mod api_keys;
pub mod audit;
pub mod embeddings;
pub mod episodes;
pub mod sessions;
pub mod users;

use remembr_core::{MemoryScope, ScopePredicate, ScopeResolver};
use tokio_postgres::types::ToSql;

/// Borrow scope-predicate parameters as query parameters.
pub(crate) fn predicate_params(pred: &ScopePredicate) -> Vec<&(dyn ToSql + Sync)> {
    pred.params
        .iter()
        .map(|p| p as &(dyn ToSql + Sync))
        .collect()
}

/// Readable predicate for the scope's inclusion chain: reads inherit toward
/// the org root, writes pin to the exact tuple.
pub(crate) fn readable_predicate(
    scope: &MemoryScope,
    prefix: &str,
    first_param: usize,
) -> ScopePredicate {
    let chain = ScopeResolver::resolve_readable_scopes(scope);
    MemoryScope::to_sql_predicate(&chain, prefix, first_param)
}
