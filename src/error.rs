//! Error types for the Apigee provider.

use thiserror::Error;

use crate::client::ApiError;
use crate::config::Backend;

/// Errors that can occur while serving a provider operation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A resource identifier could not be decoded into its path segments.
    #[error("Malformed identity '{id}': {reason}")]
    MalformedIdentity {
        /// The identifier as received.
        id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The API returned a revision label that is not an integer.
    #[error("Invalid revision label: '{0}'")]
    InvalidRevisionLabel(String),

    /// A revision listing was empty.
    #[error("No revisions found for {0}")]
    NoRevisionsFound(String),

    /// A deployment parameter was set that the configured backend does not accept.
    #[error("{parameter} cannot be set for the {backend} Apigee backend")]
    UnsupportedParameterForBackend {
        /// The attribute name.
        parameter: &'static str,
        /// The configured backend.
        backend: Backend,
    },

    /// Deploying the target revision failed; nothing was pruned.
    #[error("Failed to deploy revision {revision}: {source}")]
    DeployFailed {
        /// The revision that was being deployed.
        revision: u32,
        /// The remote failure.
        source: ApiError,
    },

    /// Undeploying a superseded revision failed.
    #[error("Failed to undeploy revision {revision}: {source}")]
    PruneFailed {
        /// The revision that is still deployed.
        revision: u32,
        /// The remote failure.
        source: ApiError,
    },

    /// No revision of the artifact is deployed to the environment.
    #[error("No active deployment of {artifact} in environment {environment}")]
    NoActiveBindingFound {
        /// The proxy or shared flow name.
        artifact: String,
        /// The environment name.
        environment: String,
    },

    /// A remote call failed.
    #[error("Apigee API error: {0}")]
    Api(#[from] ApiError),

    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A local file (bundle, certificate, policy) could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Shorthand for a [`ProviderError::MalformedIdentity`].
    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedIdentity {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the remote entity does not exist.
    ///
    /// Read handlers turn these into "resource absent" instead of failing.
    pub fn is_absent(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::NoActiveBindingFound { .. } => true,
            Self::Api(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// The HTTP status behind this error, if it came from the API.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api(err) => err.status_code(),
            Self::DeployFailed { source, .. } | Self::PruneFailed { source, .. } => {
                source.status_code()
            }
            _ => None,
        }
    }
}
