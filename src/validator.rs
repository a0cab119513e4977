use crate::error::{Decision, GateError};
use crate::rate_limit::{self, RateLimit};
use crate::store::TokenStore;

/// Checks a token against its table and, when it is valid, charges it one
/// request.
///
/// Table existence is checked on its own so a missing table (404) stays
/// distinguishable from an unknown token (401). Every step exits early.
pub async fn validate(
    store: &dyn TokenStore,
    table: &str,
    token: &str,
    limit: &RateLimit,
) -> Decision {
    if !store.table_exists(table).await? {
        return Err(GateError::UnknownTable {
            table: table.to_string(),
        });
    }

    if !store.is_member(table, token).await? {
        return Err(GateError::InvalidToken {
            table: table.to_string(),
        });
    }

    rate_limit::consume(store, token, limit).await
}
