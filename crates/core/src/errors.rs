//! Error taxonomy shared by the store facade, the reconciler and the assembler.

use std::time::Duration;

use crate::model::{DeleteFailure, ObjectIdentity};

/// Store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    List,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Errors raised by a cluster store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not_found: {kind} {identity}")]
    NotFound { kind: String, identity: ObjectIdentity },
    /// Opaque transport failure, tagged with the operation that hit it.
    #[error("transport: {verb} {kind} {target}: {source}")]
    Transport {
        verb: Verb,
        kind: String,
        target: String,
        #[source]
        source: anyhow::Error,
    },
}

impl StoreError {
    pub fn not_found(kind: impl Into<String>, identity: ObjectIdentity) -> Self {
        StoreError::NotFound { kind: kind.into(), identity }
    }

    pub fn transport(verb: Verb, kind: impl Into<String>, target: impl Into<String>, source: anyhow::Error) -> Self {
        StoreError::Transport { verb, kind: kind.into(), target: target.into(), source }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, StoreError::NotFound { .. }) }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Related objects fetched while assembling a detail view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Pods,
    Events,
    Services,
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Dependency::Pods => "pods",
            Dependency::Events => "events",
            Dependency::Services => "services",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KestrelError {
    /// Primary object absent: nothing to show.
    #[error("not_found: {kind} {identity}")]
    NotFound { kind: String, identity: ObjectIdentity },
    /// A required related-object fetch failed: the view cannot be shown.
    #[error("dependency_fetch_failed: {dependency}: {source}")]
    DependencyFetchFailed {
        dependency: Dependency,
        #[source]
        source: StoreError,
    },
    #[error("partial_delete_failure: {} deleted, {} failed", .deleted.len(), .failures.len())]
    PartialDeleteFailure { deleted: Vec<ObjectIdentity>, failures: Vec<DeleteFailure> },
    #[error(transparent)]
    Transport(StoreError),
    #[error("cancelled")]
    Cancelled,
    #[error("deadline_exceeded: {0:?}")]
    DeadlineExceeded(Duration),
    #[error("validation: {0}")]
    Validation(String),
}

impl KestrelError {
    pub fn dependency(dependency: Dependency) -> impl FnOnce(StoreError) -> KestrelError {
        move |source| KestrelError::DependencyFetchFailed { dependency, source }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, KestrelError::NotFound { .. }) }
}

impl From<StoreError> for KestrelError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, identity } => KestrelError::NotFound { kind, identity },
            other => KestrelError::Transport(other),
        }
    }
}

pub type KestrelResult<T> = Result<T, KestrelError>;
