//! Deploy, enumerate, prune.

use reqwest::Method;
use tracing::{debug, info, instrument, warn};

use super::binding::{revision_set, DeploymentBinding};
use super::{ArtifactKind, DeploymentDesiredState};
use crate::client::{ApiError, ApiRequest, ApigeeClient};
use crate::error::ProviderError;
use crate::schema::Diagnostic;

/// Outcome of a [`Reconciler::reconcile`] call.
#[derive(Debug)]
pub struct ReconcileReport {
    /// The revision now deployed.
    pub revision: u32,
    /// Superseded revisions that were undeployed.
    pub pruned: Vec<u32>,
    /// Superseded revisions whose undeploy returned 404.
    pub already_absent: Vec<u32>,
    /// Undeploys that failed. The target revision is still live.
    pub prune_failures: Vec<ProviderError>,
}

impl ReconcileReport {
    /// Whether every superseded revision is gone.
    pub fn is_clean(&self) -> bool {
        self.prune_failures.is_empty()
    }

    /// One warning per failed undeploy.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.prune_failures
            .iter()
            .map(|err| {
                let diagnostic = Diagnostic::warning(err.to_string()).with_detail(format!(
                    "Revision {} is live; re-run apply to retry undeploying superseded revisions",
                    self.revision
                ));
                match err {
                    ProviderError::PruneFailed { .. } => diagnostic.with_attribute("revision"),
                    _ => diagnostic,
                }
            })
            .collect()
    }
}

/// The binding a deployment resource reports on refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDeployment {
    /// The numerically greatest deployed revision.
    pub revision: u32,
    /// Deploying identity of that revision (cloud backend only).
    pub service_account: Option<String>,
}

/// Outcome of [`Reconciler::delete_artifact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactDeletion {
    /// The artifact was removed (or was already gone).
    Deleted,
    /// The artifact is still deployed somewhere and was left in place.
    Retained {
        /// Environments holding a deployment.
        environments: Vec<String>,
    },
}

enum Undeployed {
    Removed,
    AlreadyAbsent,
}

/// Deployment orchestration over an [`ApigeeClient`].
///
/// Holds no state of its own; every call re-reads the live deployments.
#[derive(Debug, Clone, Copy)]
pub struct Reconciler<'a> {
    client: &'a ApigeeClient,
}

impl<'a> Reconciler<'a> {
    /// Orchestrate deployments through `client`.
    pub fn new(client: &'a ApigeeClient) -> Self {
        Self { client }
    }

    /// Reject revision 0 and parameters the configured backend does not accept.
    pub fn check_parameters(&self, desired: &DeploymentDesiredState) -> Result<(), ProviderError> {
        if desired.revision == 0 {
            return Err(ProviderError::Validation(format!(
                "revision of {} '{}' must be at least 1",
                desired.kind, desired.artifact
            )));
        }
        let backend = self.client.backend();
        if desired.delay.is_some() && !backend.supports_delay() {
            return Err(ProviderError::UnsupportedParameterForBackend {
                parameter: "delay",
                backend,
            });
        }
        if desired.service_account.is_some() && !backend.supports_service_account() {
            return Err(ProviderError::UnsupportedParameterForBackend {
                parameter: "service_account",
                backend,
            });
        }
        Ok(())
    }

    /// Deploy the desired revision, then undeploy every other revision of the
    /// artifact in that environment.
    ///
    /// A failed deploy aborts before anything is pruned. Failed undeploys are
    /// collected in the report; they do not undo the deploy.
    #[instrument(
        skip(self, desired),
        fields(
            kind = %desired.kind,
            artifact = %desired.artifact,
            environment = %desired.environment,
            revision = desired.revision,
        )
    )]
    pub async fn reconcile(
        &self,
        desired: &DeploymentDesiredState,
    ) -> Result<ReconcileReport, ProviderError> {
        self.check_parameters(desired)?;

        self.deploy(desired).await?;

        let bindings = self
            .list_bindings(desired.kind, &desired.artifact, &desired.environment)
            .await?;
        let mut stale = revision_set(&bindings).revisions()?;
        stale.retain(|r| *r != desired.revision);
        stale.sort_unstable();
        stale.dedup();

        let mut report = ReconcileReport {
            revision: desired.revision,
            pruned: Vec::new(),
            already_absent: Vec::new(),
            prune_failures: Vec::new(),
        };

        for revision in stale {
            match self
                .undeploy(desired.kind, &desired.artifact, &desired.environment, revision)
                .await
            {
                Ok(Undeployed::Removed) => report.pruned.push(revision),
                Ok(Undeployed::AlreadyAbsent) => report.already_absent.push(revision),
                Err(source) => {
                    warn!(revision, error = %source, "failed to undeploy superseded revision");
                    report
                        .prune_failures
                        .push(ProviderError::PruneFailed { revision, source });
                }
            }
        }

        Ok(report)
    }

    /// Undeploy every revision of the artifact from the environment.
    ///
    /// Returns the revisions that were undeployed. Bindings that disappear
    /// concurrently are not errors; any other failure is.
    #[instrument(skip(self))]
    pub async fn undeploy_all(
        &self,
        kind: ArtifactKind,
        artifact: &str,
        environment: &str,
    ) -> Result<Vec<u32>, ProviderError> {
        let bindings = self.list_bindings(kind, artifact, environment).await?;
        let mut revisions = revision_set(&bindings).revisions()?;
        revisions.sort_unstable();
        revisions.dedup();

        let mut undeployed = Vec::with_capacity(revisions.len());
        for revision in revisions {
            match self.undeploy(kind, artifact, environment, revision).await? {
                Undeployed::Removed => undeployed.push(revision),
                Undeployed::AlreadyAbsent => {}
            }
        }
        Ok(undeployed)
    }

    /// The binding a deployment resource should report.
    ///
    /// Fails with [`ProviderError::NoActiveBindingFound`] when nothing is
    /// deployed, which callers treat as the resource being gone.
    pub async fn active_binding(
        &self,
        kind: ArtifactKind,
        artifact: &str,
        environment: &str,
    ) -> Result<ActiveDeployment, ProviderError> {
        let bindings = self.list_bindings(kind, artifact, environment).await?;
        if bindings.is_empty() {
            return Err(ProviderError::NoActiveBindingFound {
                artifact: artifact.to_string(),
                environment: environment.to_string(),
            });
        }

        let revision = revision_set(&bindings).latest()?;
        let service_account = bindings
            .into_iter()
            .find(|b| b.revision.parse::<u32>().ok() == Some(revision))
            .and_then(|b| b.service_account);

        Ok(ActiveDeployment {
            revision,
            service_account,
        })
    }

    /// Everything deployed for the artifact in one environment. A 404 means
    /// nothing is deployed.
    pub async fn list_bindings(
        &self,
        kind: ArtifactKind,
        artifact: &str,
        environment: &str,
    ) -> Result<Vec<DeploymentBinding>, ProviderError> {
        let path = self.client.org_path(&[
            "environments",
            environment,
            kind.collection(),
            artifact,
            "deployments",
        ]);
        match self.client.send(ApiRequest::get(path)).await {
            Ok(body) => {
                DeploymentBinding::parse_environment(self.client.backend(), environment, &body)
            }
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Environments the artifact is deployed to, sorted.
    pub async fn deployed_environments(
        &self,
        kind: ArtifactKind,
        artifact: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let path = self
            .client
            .org_path(&[kind.collection(), artifact, "deployments"]);
        match self.client.send(ApiRequest::get(path)).await {
            Ok(body) => DeploymentBinding::deployed_environments(self.client.backend(), &body),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete the artifact unless some environment still has it deployed.
    ///
    /// A remaining deployment is assumed to belong to another configuration,
    /// which will delete the artifact once it undeploys.
    #[instrument(skip(self))]
    pub async fn delete_artifact(
        &self,
        kind: ArtifactKind,
        artifact: &str,
    ) -> Result<ArtifactDeletion, ProviderError> {
        let environments = self.deployed_environments(kind, artifact).await?;
        if !environments.is_empty() {
            warn!(?environments, "{} still deployed, leaving it in place", kind);
            return Ok(ArtifactDeletion::Retained { environments });
        }

        let path = self.client.org_path(&[kind.collection(), artifact]);
        match self.client.delete(path).await {
            Ok(()) => {
                info!("{} deleted", kind);
                Ok(ArtifactDeletion::Deleted)
            }
            Err(err) if err.is_not_found() => Ok(ArtifactDeletion::Deleted),
            Err(err) => Err(err.into()),
        }
    }

    async fn deploy(&self, desired: &DeploymentDesiredState) -> Result<(), ProviderError> {
        let mut form = vec![("override".to_string(), "true".to_string())];
        if let Some(delay) = desired.delay {
            form.push(("delay".to_string(), delay.to_string()));
        }
        if let Some(service_account) = &desired.service_account {
            form.push(("serviceAccount".to_string(), service_account.clone()));
        }

        let path = self.revision_path(
            desired.kind,
            &desired.artifact,
            &desired.environment,
            desired.revision,
        );
        self.client
            .send_form(Method::POST, path, form)
            .await
            .map_err(|source| ProviderError::DeployFailed {
                revision: desired.revision,
                source,
            })?;
        info!(revision = desired.revision, "revision deployed");
        Ok(())
    }

    async fn undeploy(
        &self,
        kind: ArtifactKind,
        artifact: &str,
        environment: &str,
        revision: u32,
    ) -> Result<Undeployed, ApiError> {
        let path = self.revision_path(kind, artifact, environment, revision);
        match self.client.delete(path).await {
            Ok(()) => {
                info!(revision, "revision undeployed");
                Ok(Undeployed::Removed)
            }
            Err(err) if err.is_not_found() => {
                debug!(revision, "revision already undeployed");
                Ok(Undeployed::AlreadyAbsent)
            }
            Err(err) => Err(err),
        }
    }

    fn revision_path(
        &self,
        kind: ArtifactKind,
        artifact: &str,
        environment: &str,
        revision: u32,
    ) -> String {
        let revision = revision.to_string();
        self.client.org_path(&[
            "environments",
            environment,
            kind.collection(),
            artifact,
            "revisions",
            &revision,
            "deployments",
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use crate::testing::MockTransport;
    use serde_json::json;
    use std::sync::Arc;

    const LIST: &str = "organizations/acme/environments/test/apis/orders-api/deployments";

    fn rev_path(revision: u32) -> String {
        format!(
            "organizations/acme/environments/test/apis/orders-api/revisions/{}/deployments",
            revision
        )
    }

    fn legacy_listing(revisions: &[&str]) -> serde_json::Value {
        json!({
            "name": "orders-api",
            "environment": "test",
            "revision": revisions.iter().map(|r| json!({"name": r})).collect::<Vec<_>>(),
        })
    }

    fn client(transport: &Arc<MockTransport>, backend: Backend) -> ApigeeClient {
        ApigeeClient::new(transport.clone(), "acme", backend)
    }

    #[tokio::test]
    async fn test_unsupported_parameters_fail_before_any_call() {
        let transport = Arc::new(MockTransport::new());

        let legacy = client(&transport, Backend::Legacy);
        let desired = DeploymentDesiredState::new(ArtifactKind::Proxy, "orders-api", "test", 3)
            .with_service_account("deployer@acme.iam.gserviceaccount.com");
        let err = Reconciler::new(&legacy).reconcile(&desired).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::UnsupportedParameterForBackend { parameter: "service_account", .. }
        ));

        let cloud = client(&transport, Backend::Cloud);
        let desired =
            DeploymentDesiredState::new(ArtifactKind::Proxy, "orders-api", "test", 3).with_delay(30);
        let err = Reconciler::new(&cloud).reconcile(&desired).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::UnsupportedParameterForBackend { parameter: "delay", .. }
        ));

        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_revision_zero_rejected_before_any_call() {
        let transport = Arc::new(MockTransport::new());
        let client = client(&transport, Backend::Legacy);

        let desired = DeploymentDesiredState::new(ArtifactKind::Proxy, "orders-api", "test", 0);
        let err = Reconciler::new(&client).reconcile(&desired).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(err.to_string().contains("at least 1"));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_prune_tolerates_already_undeployed_revision() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(Method::GET, LIST, legacy_listing(&["5", "7"]));
        transport.respond(Method::DELETE, &rev_path(5), Err(ApiError::status(404, "not deployed")));
        let client = client(&transport, Backend::Legacy);

        let desired = DeploymentDesiredState::new(ArtifactKind::Proxy, "orders-api", "test", 7);
        let report = Reconciler::new(&client).reconcile(&desired).await.unwrap();

        assert!(report.is_clean());
        assert!(report.pruned.is_empty());
        assert_eq!(report.already_absent, vec![5]);
        assert!(report.diagnostics().is_empty());
    }

    #[tokio::test]
    async fn test_undeploy_all_skips_missing_revision() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(Method::GET, LIST, legacy_listing(&["2", "3"]));
        transport.respond(Method::DELETE, &rev_path(2), Err(ApiError::status(404, "not deployed")));
        let client = client(&transport, Backend::Legacy);

        let undeployed = Reconciler::new(&client)
            .undeploy_all(ArtifactKind::Proxy, "orders-api", "test")
            .await
            .unwrap();
        assert_eq!(undeployed, vec![3]);
        assert!(transport.calls().contains(&(Method::DELETE, rev_path(3))));
    }

    #[tokio::test]
    async fn test_deploy_form_fields() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(Method::GET, LIST, legacy_listing(&["3"]));
        let client = client(&transport, Backend::Legacy);

        let desired =
            DeploymentDesiredState::new(ArtifactKind::Proxy, "orders-api", "test", 3).with_delay(15);
        Reconciler::new(&client).reconcile(&desired).await.unwrap();

        let deploy = &transport.requests()[0];
        assert_eq!(deploy.method, Method::POST);
        assert_eq!(deploy.path, rev_path(3));
        assert_eq!(deploy.form_field("override"), Some("true"));
        assert_eq!(deploy.form_field("delay"), Some("15"));
        assert_eq!(deploy.form_field("serviceAccount"), None);
    }

    #[tokio::test]
    async fn test_deploy_failure_skips_prune() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::POST, &rev_path(7), Err(ApiError::status(400, "bad revision")));
        transport.respond_json(Method::GET, LIST, legacy_listing(&["5", "6"]));
        let client = client(&transport, Backend::Legacy);

        let desired = DeploymentDesiredState::new(ArtifactKind::Proxy, "orders-api", "test", 7);
        let err = Reconciler::new(&client).reconcile(&desired).await.unwrap_err();
        match err {
            ProviderError::DeployFailed { revision, source } => {
                assert_eq!(revision, 7);
                assert_eq!(source.status_code(), Some(400));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_prune_failure_is_reported_not_fatal() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(Method::GET, LIST, legacy_listing(&["5", "6", "7"]));
        transport.respond(Method::DELETE, &rev_path(5), Err(ApiError::status(500, "boom")));
        let client = client(&transport, Backend::Legacy);

        let desired = DeploymentDesiredState::new(ArtifactKind::Proxy, "orders-api", "test", 7);
        let report = Reconciler::new(&client).reconcile(&desired).await.unwrap();

        assert!(!report.is_clean());
        assert_eq!(report.pruned, vec![6]);
        assert!(matches!(
            report.prune_failures[0],
            ProviderError::PruneFailed { revision: 5, .. }
        ));
        let diagnostics = report.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(!diagnostics[0].is_error());
    }

    #[tokio::test]
    async fn test_active_binding_picks_numeric_max() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(
            Method::GET,
            LIST,
            json!({"deployments": [
                {"environment": "test", "revision": "10", "serviceAccount": "projects/-/serviceAccounts/new@acme"},
                {"environment": "test", "revision": "9", "serviceAccount": "projects/-/serviceAccounts/old@acme"}
            ]}),
        );
        let client = client(&transport, Backend::Cloud);

        let active = Reconciler::new(&client)
            .active_binding(ArtifactKind::Proxy, "orders-api", "test")
            .await
            .unwrap();
        assert_eq!(active.revision, 10);
        assert_eq!(active.service_account.as_deref(), Some("new@acme"));
    }

    #[tokio::test]
    async fn test_active_binding_absent() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::GET, LIST, Err(ApiError::status(404, "")));
        let client = client(&transport, Backend::Legacy);

        let err = Reconciler::new(&client)
            .active_binding(ArtifactKind::Proxy, "orders-api", "test")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NoActiveBindingFound { .. }));
        assert!(err.is_absent());
    }

    #[tokio::test]
    async fn test_undeploy_all_hard_failure() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(Method::GET, LIST, legacy_listing(&["3"]));
        transport.respond(Method::DELETE, &rev_path(3), Err(ApiError::status(403, "denied")));
        let client = client(&transport, Backend::Legacy);

        let err = Reconciler::new(&client)
            .undeploy_all(ArtifactKind::Proxy, "orders-api", "test")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(403));
    }

    #[tokio::test]
    async fn test_delete_artifact_retained_when_deployed() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(
            Method::GET,
            "organizations/acme/sharedflows/common-auth/deployments",
            json!({"name": "common-auth", "environment": [{"name": "prod", "revision": [{"name": "2"}]}]}),
        );
        let client = client(&transport, Backend::Legacy);

        let outcome = Reconciler::new(&client)
            .delete_artifact(ArtifactKind::SharedFlow, "common-auth")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ArtifactDeletion::Retained {
                environments: vec!["prod".to_string()]
            }
        );
        assert!(transport.requests().iter().all(|r| r.method != Method::DELETE));
    }

    #[tokio::test]
    async fn test_delete_artifact_retained_by_environment_without_revisions() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(
            Method::GET,
            "organizations/acme/apis/orders-api/deployments",
            json!({"name": "orders-api", "environment": [{"name": "prod", "revision": []}]}),
        );
        let client = client(&transport, Backend::Legacy);

        let outcome = Reconciler::new(&client)
            .delete_artifact(ArtifactKind::Proxy, "orders-api")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ArtifactDeletion::Retained {
                environments: vec!["prod".to_string()]
            }
        );
        assert!(transport.requests().iter().all(|r| r.method != Method::DELETE));
    }

    #[tokio::test]
    async fn test_delete_artifact_when_undeployed_everywhere() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(
            Method::GET,
            "organizations/acme/sharedflows/common-auth/deployments",
            json!({"deployments": []}),
        );
        let client = client(&transport, Backend::Cloud);

        let outcome = Reconciler::new(&client)
            .delete_artifact(ArtifactKind::SharedFlow, "common-auth")
            .await
            .unwrap();
        assert_eq!(outcome, ArtifactDeletion::Deleted);
        assert_eq!(
            transport.calls().last().unwrap(),
            &(Method::DELETE, "organizations/acme/sharedflows/common-auth".to_string())
        );
    }
}
