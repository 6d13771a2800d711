//! PostgreSQL statement generation for the durable keychain.
//!
//! Each [`QueryKind`] maps to a fixed template with a `{table}` placeholder.
//! Generation is pure: the same table and kind always produce the same text.

use crate::contracts::{KeychainError, KeychainResult, QueryKind, Statement};

/// Default table holding the durable sequences.
pub const DEFAULT_TABLE: &str = "serialkeys";

/// Longest identifier PostgreSQL accepts without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Params: $1 key, $2 start.
const NEXT_TEMPLATE: &str = "INSERT INTO {table} AS t (key, value) VALUES ($1, $2) \
ON CONFLICT (key) DO UPDATE SET value = t.value + 1 \
RETURNING t.value";

/// Params: $1 key, $2 count, $3 start. The VALUES expression is evaluated
/// before the conflict check, so it overflows whenever `start + count - 1` does.
const NEXT_N_TEMPLATE: &str = "INSERT INTO {table} AS t (key, value) VALUES ($1, $3 + $2 - 1) \
ON CONFLICT (key) DO UPDATE SET value = t.value + $2 \
RETURNING t.value";

/// Params: $1 key.
const LAST_TEMPLATE: &str = "SELECT value FROM {table} WHERE key = $1";

/// Params: $1 key, $2 target.
const FORWARD_TEMPLATE: &str = "INSERT INTO {table} AS t (key, value) VALUES ($1, $2) \
ON CONFLICT (key) DO UPDATE SET value = GREATEST(t.value, EXCLUDED.value) \
RETURNING t.value";

const CREATE_TABLE_TEMPLATE: &str = "CREATE TABLE IF NOT EXISTS {table} (\
key TEXT PRIMARY KEY, \
value BIGINT NOT NULL)";

fn template(kind: QueryKind) -> &'static str {
    match kind {
        QueryKind::Next => NEXT_TEMPLATE,
        QueryKind::NextN => NEXT_N_TEMPLATE,
        QueryKind::Last => LAST_TEMPLATE,
        QueryKind::Forward => FORWARD_TEMPLATE,
        QueryKind::CreateTable => CREATE_TABLE_TEMPLATE,
    }
}

/// Statement generator for the PostgreSQL dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgreSql {
    table: String,
}

impl Default for PostgreSql {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE)
    }
}

impl PostgreSql {
    /// Creates a generator for `table`. The name is validated at generation time.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Returns the table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Generates the statement for `kind`.
    pub fn generate(&self, kind: QueryKind) -> KeychainResult<Statement> {
        validate_table(&self.table).map_err(|reason| KeychainError::QueryGeneration {
            kind,
            reason,
        })?;
        let sql = render(template(kind), &self.table)
            .map_err(|reason| KeychainError::QueryGeneration { kind, reason })?;
        Ok(Statement::new(kind, sql))
    }
}

/// Substitutes `{table}` placeholders in `template`.
fn render(template: &str, table: &str) -> Result<String, String> {
    let mut out = String::with_capacity(template.len() + table.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| format!("unterminated placeholder at byte {}", template.len() - rest.len() + open))?;
        match &after[..close] {
            "table" => out.push_str(table),
            other => return Err(format!("unknown placeholder {{{}}}", other)),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

/// Accepts `name` or `schema.name`, each part a plain SQL identifier.
fn validate_table(table: &str) -> Result<(), String> {
    if table.is_empty() {
        return Err("empty table name".into());
    }

    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 {
        return Err(format!("invalid table name {:?}: too many qualifiers", table));
    }

    for part in parts {
        let mut chars = part.chars();
        let valid_head = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
        if !valid_head || !valid_tail {
            return Err(format!("invalid table name {:?}", table));
        }
        if part.len() > MAX_IDENTIFIER_LEN {
            return Err(format!(
                "invalid table name {:?}: identifier longer than {} bytes",
                table, MAX_IDENTIFIER_LEN
            ));
        }
    }

    Ok(())
}
