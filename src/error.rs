//! Engine error taxonomy.
//!
//! Store functions surface database errors with a context wrapper naming
//! the operation and primary key; unique-constraint violations and lost
//! `FOR UPDATE NOWAIT` races map to [`EngineError::Conflict`] so callers
//! can retry. Collaborator failures (VCS, event bus, cache) never reach
//! this type: they are demoted to warnings at the call site.

use diesel::result::DatabaseErrorKind;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No matching build, pipeline, application or environment.
    #[error("{0} not found")]
    NotFound(String),

    /// Lost a lock race or hit a unique constraint; retriable.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Aggregation produced an impossible state, or a trigger is malformed.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A collaborator is down. Only raised where degradation is impossible.
    #[error("external collaborator unavailable: {0}")]
    ExternalUnavailable(String),

    /// Opaque-blob encode/decode failure; fatal for the operation.
    #[error("cannot decode {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("database error during {op}")]
    Database {
        op: String,
        #[source]
        source: diesel::result::Error,
    },
}

impl EngineError {
    /// Wrap a diesel error, remapping the retriable and not-found cases.
    ///
    /// `op` identifies the store operation and primary key, e.g.
    /// `"insert_build app=42 pip=7 env=3"`.
    pub fn database(op: impl Into<String>, source: diesel::result::Error) -> Self {
        let op = op.into();
        match &source {
            diesel::result::Error::NotFound => EngineError::NotFound(op),
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                EngineError::Conflict(format!("{op}: {}", info.message()))
            }
            // 55P03 lock_not_available surfaces as an unknown kind.
            diesel::result::Error::DatabaseError(_, info)
                if info.message().contains("could not obtain lock") =>
            {
                EngineError::Conflict(format!("{op}: {}", info.message()))
            }
            _ => EngineError::Database { op, source },
        }
    }

    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        EngineError::Serialization {
            context: context.into(),
            source,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }

    /// Whether the caller should retry after a short backoff.
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl From<diesel::result::Error> for EngineError {
    fn from(source: diesel::result::Error) -> Self {
        EngineError::database("transaction", source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_maps_to_conflict() {
        let err = diesel::result::Error::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key value violates unique constraint".to_string()),
        );
        let mapped = EngineError::database("insert_build", err);
        assert!(matches!(mapped, EngineError::Conflict(_)));
        assert!(mapped.is_retriable());
    }

    #[test]
    fn lock_not_available_maps_to_conflict() {
        let err = diesel::result::Error::DatabaseError(
            DatabaseErrorKind::Unknown,
            Box::new("could not obtain lock on row in relation \"pipeline_build\"".to_string()),
        );
        assert!(matches!(
            EngineError::database("lock_build id=7", err),
            EngineError::Conflict(_)
        ));
    }

    #[test]
    fn not_found_carries_operation_context() {
        let mapped = EngineError::database("load_build id=9", diesel::result::Error::NotFound);
        assert_eq!(mapped.to_string(), "load_build id=9 not found");
        assert!(!mapped.is_retriable());
    }
}
