use thiserror::Error;

use abode_types::models::{ActorRole, VisitStatus};

/// Failure of an engine operation.
///
/// `InvalidTransition` and `Forbidden` reject the whole operation before any
/// write. `DependencyUnavailable` is only surfaced when the operation cannot
/// proceed without the dependency; follow-up notifications swallow it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{role} cannot move a {from} visit to {to}")]
    InvalidTransition {
        role: ActorRole,
        from: VisitStatus,
        to: VisitStatus,
    },

    #[error("forbidden for {role}: {reason}")]
    Forbidden { role: &'static str, reason: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn forbidden(role: &'static str, reason: impl Into<String>) -> Self {
        Self::Forbidden {
            role,
            reason: reason.into(),
        }
    }

    pub fn dependency(what: &str, err: impl std::fmt::Display) -> Self {
        Self::DependencyUnavailable(format!("{what}: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Runs store and lookup work on the blocking pool, off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Storage(anyhow::anyhow!("blocking task failed: {e}")))?
}
