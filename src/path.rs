use crate::error::GateError;

// Table and token pulled out of "/<table>/<token>/..."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPath<'a> {
    pub table: &'a str,
    pub token: &'a str,
}

/// Reads the table name and token from the first two path segments.
///
/// Anything after the token is left alone for the upstream. Both segments
/// must be non-empty, so `/`, `/table` and `/table/` are all rejected.
pub fn parse_path(path: &str) -> Result<TokenPath<'_>, GateError> {
    let mut segments = path.strip_prefix('/').unwrap_or(path).splitn(3, '/');

    let table = segments.next().unwrap_or_default();
    let token = segments.next().unwrap_or_default();

    if table.is_empty() || token.is_empty() {
        return Err(GateError::MalformedRequest {
            path: path.to_string(),
        });
    }

    Ok(TokenPath { table, token })
}
