use std::fmt;
use std::sync::Arc;

/// Statement kinds issued by the durable keychain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Fetch and advance by one.
    Next,
    /// Fetch and advance by N.
    NextN,
    /// Fetch the current value without advancing.
    Last,
    /// Advance to at least a target.
    Forward,
    /// Create the table if it does not exist.
    CreateTable,
}

impl QueryKind {
    pub const ALL: [QueryKind; 5] = [
        QueryKind::Next,
        QueryKind::NextN,
        QueryKind::Last,
        QueryKind::Forward,
        QueryKind::CreateTable,
    ];
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Next => "next value fetching",
            Self::NextN => "next N values fetching",
            Self::Last => "last value fetching",
            Self::Forward => "forward value",
            Self::CreateTable => "table creation",
        };
        f.write_str(name)
    }
}

/// Generated statement text together with its kind.
///
/// Cloning is cheap; the text is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    kind: QueryKind,
    sql: Arc<str>,
}

impl Statement {
    pub fn new(kind: QueryKind, sql: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            sql: sql.into(),
        }
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}
