//! Error types for catalog access and chain resolution

use std::fmt;

/// Failure talking to a catalog backend. A missing record is not an error
/// here; lookups report that as `Ok(None)`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    /// The backend is temporarily unavailable (locked, busy).
    #[error("catalog busy: {0}")]
    Busy(String),

    /// Storage or network failure that may succeed on retry.
    #[error("catalog I/O failure: {0}")]
    Io(String),

    /// Stored data could not be decoded.
    #[error("catalog data is corrupt: {0}")]
    Corrupt(String),
}

impl CatalogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Busy(_) | CatalogError::Io(_))
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                CatalogError::Busy(err.to_string())
            }
            Some(_) => CatalogError::Io(err.to_string()),
            None => CatalogError::Corrupt(err.to_string()),
        }
    }
}

/// Which kind of catalog record a lookup was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Item,
    Machine,
    StandardRecipe,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Item => f.write_str("item"),
            RecordKind::Machine => f.write_str("machine"),
            RecordKind::StandardRecipe => f.write_str("standard recipe for"),
        }
    }
}

/// Errors that abort a resolve call. No partial tree is ever returned.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// A referenced item or machine has no catalog record, or the backend
    /// kept failing until the catalog gave up retrying (`source` is set).
    #[error("{kind} '{id}' {}", lookup_outcome(source))]
    CatalogLookup {
        kind: RecordKind,
        id: String,
        #[source]
        source: Option<CatalogError>,
    },

    /// An item reappeared on its own resolution path.
    #[error("cyclic recipe chain: {}", path.join(" -> "))]
    CyclicRecipe { path: Vec<String> },

    /// The requested rate is not a positive finite number.
    #[error("invalid request: rate must be positive, got {rate}")]
    InvalidRequest { rate: f64 },

    /// A standard recipe cannot be used to produce the item it is registered for.
    #[error("recipe '{recipe_id}' cannot produce '{item_id}': {reason}")]
    InvalidRecipe {
        recipe_id: String,
        item_id: String,
        reason: &'static str,
    },

    /// The caller cancelled the call or its deadline passed.
    #[error("resolve cancelled")]
    Cancelled,
}

fn lookup_outcome(source: &Option<CatalogError>) -> &'static str {
    match source {
        None => "not found in catalog",
        Some(_) => "could not be read from catalog",
    }
}
