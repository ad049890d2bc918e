//! Error types for the service container.

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while resolving services.
///
/// None of these are retried: they describe configuration mistakes.
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// No registration exists for the requested key.
    #[error("Service not found: {0}")]
    NotFound(&'static str),

    /// Scoped or transient service requested from the root provider, or a
    /// scoped service captured by a singleton.
    #[error("Scope validation failed: {0}")]
    ScopeValidation(String),

    /// The provider (or the root it belongs to) has been disposed.
    #[error("Cannot access a disposed service provider")]
    Disposed,

    /// A factory requested a service that is already being constructed.
    #[error("Circular dependency detected: {0}")]
    Circular(String),

    /// A factory produced an instance of the wrong type.
    #[error("Service type mismatch: {0}")]
    TypeMismatch(&'static str),

    /// A factory failed with an error of its own.
    #[error("Failed to activate {service}: {source}")]
    Activation {
        /// Service being activated.
        service: &'static str,
        /// Error returned by the factory.
        source: Arc<dyn StdError + Send + Sync>,
    },
}

impl DiError {
    /// Wrap an arbitrary factory error.
    pub fn activation<E>(service: &'static str, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        DiError::Activation {
            service,
            source: Arc::new(error),
        }
    }

    /// Downcast the error a factory failed with.
    pub fn activation_source<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            DiError::Activation { source, .. } => source.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Whether this is a scope validation failure.
    pub fn is_scope_validation(&self) -> bool {
        matches!(self, DiError::ScopeValidation(_))
    }
}

/// Result type alias for container operations.
pub type DiResult<T> = Result<T, DiError>;
