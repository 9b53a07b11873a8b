//! Wire shapes of the deployment listings.
//!
//! The legacy and cloud backends answer "what is deployed" differently. Both
//! shapes are normalized into [`DeploymentBinding`]s right after
//! deserialization so the reconciler never looks at either.

use serde::Deserialize;

use crate::client::decode;
use crate::config::Backend;
use crate::error::ProviderError;
use crate::revision::RevisionSet;

/// Prefix the cloud backend puts in front of service account emails.
pub const SERVICE_ACCOUNT_PREFIX: &str = "projects/-/serviceAccounts/";

/// One revision of an artifact deployed to one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentBinding {
    /// Environment name.
    pub environment: String,
    /// Revision label as returned by the API.
    pub revision: String,
    /// Deploying identity (cloud backend only), without the resource prefix.
    pub service_account: Option<String>,
}

/// Legacy: `GET .../environments/{env}/apis/{name}/deployments`.
#[derive(Debug, Default, Deserialize)]
struct LegacyEnvironmentDeployment {
    #[serde(default)]
    environment: Option<String>,
    #[serde(default)]
    revision: Vec<LegacyRevision>,
}

#[derive(Debug, Deserialize)]
struct LegacyRevision {
    name: String,
}

/// Legacy: `GET .../apis/{name}/deployments`.
#[derive(Debug, Default, Deserialize)]
struct LegacyArtifactDeployments {
    #[serde(default)]
    environment: Vec<LegacyEnvironment>,
}

#[derive(Debug, Deserialize)]
struct LegacyEnvironment {
    name: String,
    #[serde(default)]
    revision: Vec<LegacyRevision>,
}

/// Cloud: both listings.
#[derive(Debug, Default, Deserialize)]
struct CloudDeployments {
    #[serde(default)]
    deployments: Vec<CloudDeployment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloudDeployment {
    #[serde(default)]
    environment: String,
    revision: String,
    #[serde(default)]
    service_account: Option<String>,
}

impl DeploymentBinding {
    /// Parse a per-environment listing.
    ///
    /// The legacy shape omits the environment on each revision; `environment`
    /// fills it in.
    pub fn parse_environment(
        backend: Backend,
        environment: &str,
        body: &[u8],
    ) -> Result<Vec<Self>, ProviderError> {
        match backend {
            Backend::Legacy => {
                let listing: Option<LegacyEnvironmentDeployment> = decode(body)?;
                let listing = listing.unwrap_or_default();
                let env = listing.environment.unwrap_or_else(|| environment.to_string());
                Ok(listing
                    .revision
                    .into_iter()
                    .map(|r| Self::legacy(&env, r))
                    .collect())
            }
            Backend::Cloud => Self::parse_cloud(body, Some(environment)),
        }
    }

    /// Environments named in an artifact-wide listing.
    ///
    /// A legacy environment entry counts even when its revision list is
    /// empty; the artifact is still attached there.
    pub fn deployed_environments(backend: Backend, body: &[u8]) -> Result<Vec<String>, ProviderError> {
        let mut environments: Vec<String> = match backend {
            Backend::Legacy => {
                let listing: Option<LegacyArtifactDeployments> = decode(body)?;
                listing
                    .unwrap_or_default()
                    .environment
                    .into_iter()
                    .map(|env| env.name)
                    .collect()
            }
            Backend::Cloud => Self::parse_cloud(body, None)?
                .into_iter()
                .map(|b| b.environment)
                .collect(),
        };
        environments.sort();
        environments.dedup();
        Ok(environments)
    }

    fn legacy(environment: &str, revision: LegacyRevision) -> Self {
        Self {
            environment: environment.to_string(),
            revision: revision.name,
            service_account: None,
        }
    }

    fn parse_cloud(body: &[u8], environment: Option<&str>) -> Result<Vec<Self>, ProviderError> {
        let listing: Option<CloudDeployments> = decode(body)?;
        Ok(listing
            .unwrap_or_default()
            .deployments
            .into_iter()
            .map(|d| Self {
                environment: match (d.environment.is_empty(), environment) {
                    (true, Some(env)) => env.to_string(),
                    _ => d.environment,
                },
                revision: d.revision,
                service_account: d
                    .service_account
                    .filter(|sa| !sa.is_empty())
                    .map(|sa| sa.trim_start_matches(SERVICE_ACCOUNT_PREFIX).to_string()),
            })
            .collect())
    }
}

/// The revision labels of a set of bindings.
pub fn revision_set(bindings: &[DeploymentBinding]) -> RevisionSet {
    bindings.iter().map(|b| b.revision.clone()).collect()
}
