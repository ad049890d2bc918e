//! Error types for contexts and change tracking.

use keel_di::DiError;
use thiserror::Error;

/// Result type for context operations.
pub type ContextResult<T> = Result<T, ContextError>;

/// Errors raised by a unit of work, its configuration or its change tracker.
#[derive(Error, Debug, Clone)]
pub enum ContextError {
    /// The context was disposed.
    #[error("Cannot access a disposed context instance")]
    Disposed,

    /// `replace_service` was combined with an externally owned provider.
    #[error(
        "A call was made to replace_service, but the context is also configured with \
         use_internal_service_provider. Register replacement services in the external provider instead"
    )]
    InvalidReplaceService,

    /// An unconditional service override was combined with an externally owned provider.
    #[error(
        "A call was made to '{option}' that changes the '{service}' service, but the context is also \
         configured with use_internal_service_provider. Register the service in the external provider instead"
    )]
    InvalidUseService {
        /// Option setter name
        option: &'static str,
        /// Overridden service
        service: &'static str,
    },

    /// A singleton option differs from the value the external provider was first used with.
    #[error(
        "A call was made to '{option}' that changed an option that must be constant within a service \
         provider, but the provider is used by another context configured differently"
    )]
    SingletonOptionChanged {
        /// Option setter name
        option: &'static str,
    },

    /// No store provider was configured.
    #[error(
        "No store provider has been configured for this context. Configure one in on_configuring \
         or pass ContextOptions to the context constructor"
    )]
    NoProviderConfigured,

    /// A service could not be resolved and no store provider was configured.
    #[error(
        "Unable to resolve service for type '{service}'. This is often because no store provider \
         has been configured for this context"
    )]
    NoProviderConfiguredFailedToResolveService {
        /// Requested service
        service: &'static str,
    },

    /// The service provider in use does not contain the core services.
    #[error(
        "The service provider in use does not contain the core keel services, or no constructor \
         of the context could be activated. Call add_keel_core on the service collection"
    )]
    NoCoreServices,

    /// Options built for one context type were handed to another.
    #[error("The options passed to the '{actual}' constructor were built for '{expected}'")]
    NonGenericConfiguration {
        /// Context type the options were built for
        expected: &'static str,
        /// Context type being constructed
        actual: &'static str,
    },

    /// A context registered with configuration has no constructor accepting options.
    #[error(
        "Context '{context}' was registered with configuration but has no constructor that accepts \
         ContextOptions"
    )]
    MissingConstructor {
        /// Context type
        context: &'static str,
    },

    /// `on_configuring` changed the options of a pooled context.
    #[error("on_configuring cannot be used to modify the options of a pooled context")]
    PoolingOptionsModified,

    /// An entity type is missing from the model.
    #[error("The entity type '{0}' was not found in the model")]
    EntityTypeNotFound(String),

    /// A navigation is missing from the model.
    #[error("The navigation '{navigation}' is not defined on entity type '{entity_type}'")]
    UnknownNavigation {
        /// Entity type
        entity_type: String,
        /// Navigation name
        navigation: String,
    },

    /// A foreign key property is missing from the model.
    #[error("The property '{property}' is not a foreign key of entity type '{entity_type}'")]
    UnknownForeignKey {
        /// Entity type
        entity_type: String,
        /// Property name
        property: String,
    },

    /// A diagnostic event configured to throw was raised.
    #[error("An error was generated for warning '{event}': {message}")]
    WarningAsError {
        /// Event name
        event: &'static str,
        /// Rendered message
        message: String,
    },

    /// The store rejected an operation.
    #[error("Store error: {0}")]
    Store(String),

    /// Service container error.
    #[error(transparent)]
    Di(DiError),
}

impl ContextError {
    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Whether this is a scope validation failure raised by the container.
    pub fn is_scope_validation(&self) -> bool {
        matches!(self, Self::Di(e) if e.is_scope_validation())
    }
}

impl From<DiError> for ContextError {
    /// Context errors raised while the container activates a context are
    /// surfaced as themselves rather than as activation failures.
    fn from(err: DiError) -> Self {
        match err.activation_source::<ContextError>() {
            Some(inner) => inner.clone(),
            None => Self::Di(err),
        }
    }
}
