//! Proxy and shared-flow deployments.
//!
//! A deployment binds one revision of an artifact (API proxy or shared flow)
//! to one environment. [`Reconciler`] brings the bindings of an
//! (artifact, environment) pair to a declared revision:
//!
//! 1. deploy the target revision with `override=true`, so the backend swaps
//!    traffic without a gap;
//! 2. list what is actually deployed now;
//! 3. undeploy every other listed revision, treating 404 as already done.
//!
//! Deploy always precedes pruning. Nothing is cached between calls: the live
//! API is the only source of truth, and re-running a reconcile converges.

mod binding;
mod reconcile;

pub use binding::DeploymentBinding;
pub use reconcile::{ActiveDeployment, ArtifactDeletion, ReconcileReport, Reconciler};

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of deployable artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// An API proxy.
    Proxy,
    /// A shared flow.
    SharedFlow,
}

impl ArtifactKind {
    /// The collection name in management API paths.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Proxy => "apis",
            Self::SharedFlow => "sharedflows",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proxy => f.write_str("proxy"),
            Self::SharedFlow => f.write_str("shared flow"),
        }
    }
}

/// What the caller wants deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentDesiredState {
    /// Proxy or shared flow.
    pub kind: ArtifactKind,
    /// Artifact name.
    pub artifact: String,
    /// Environment name.
    pub environment: String,
    /// Revision to deploy, at least 1.
    pub revision: u32,
    /// Seconds the previous revision keeps serving in-flight requests.
    /// Legacy backend only.
    pub delay: Option<u64>,
    /// Identity the deployment runs as. Cloud backend only.
    pub service_account: Option<String>,
}

impl DeploymentDesiredState {
    /// Deploy `revision` of `artifact` to `environment`, with no extra parameters.
    pub fn new(
        kind: ArtifactKind,
        artifact: impl Into<String>,
        environment: impl Into<String>,
        revision: u32,
    ) -> Self {
        Self {
            kind,
            artifact: artifact.into(),
            environment: environment.into(),
            revision,
            delay: None,
            service_account: None,
        }
    }

    /// Attach a drain delay in seconds.
    pub fn with_delay(mut self, delay: u64) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Attach a deploying identity.
    pub fn with_service_account(mut self, service_account: impl Into<String>) -> Self {
        self.service_account = Some(service_account.into());
        self
    }
}
