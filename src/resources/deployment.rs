//! `apigee_proxy_deployment` and `apigee_shared_flow_deployment`.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, optional_u64, required_str, revision_attr, state_id, ResourceHandler};
use crate::client::ApigeeClient;
use crate::deployment::{ArtifactKind, DeploymentDesiredState, Reconciler};
use crate::error::ProviderError;
use crate::identity;
use crate::schema::{Attribute, Schema};
use crate::types::ApplyResult;

/// Keeps one revision of an artifact deployed to one environment.
///
/// Identity is `environment:artifact`.
#[derive(Debug, Clone, Copy)]
pub struct DeploymentHandler {
    kind: ArtifactKind,
}

impl DeploymentHandler {
    /// Handler for deployments of `kind`.
    pub fn new(kind: ArtifactKind) -> Self {
        Self { kind }
    }

    fn artifact_attr(&self) -> &'static str {
        match self.kind {
            ArtifactKind::Proxy => "proxy_name",
            ArtifactKind::SharedFlow => "shared_flow_name",
        }
    }

    fn desired(&self, state: &Value) -> Result<DeploymentDesiredState, ProviderError> {
        let mut desired = DeploymentDesiredState::new(
            self.kind,
            required_str(state, self.artifact_attr())?,
            required_str(state, "environment_name")?,
            revision_attr(state, "revision")?,
        );
        desired.delay = optional_u64(state, "delay");
        desired.service_account = optional_str(state, "service_account").map(str::to_string);
        Ok(desired)
    }

    async fn apply(&self, client: &ApigeeClient, planned: Value) -> Result<ApplyResult, ProviderError> {
        let desired = self.desired(&planned)?;
        let report = Reconciler::new(client).reconcile(&desired).await?;

        let state = json!({
            "id": identity::encode([desired.environment.as_str(), desired.artifact.as_str()]),
            self.artifact_attr(): desired.artifact,
            "environment_name": desired.environment,
            "revision": report.revision,
            "delay": desired.delay,
            "service_account": desired.service_account,
        });
        Ok(ApplyResult::new(state).with_diagnostics(report.diagnostics()))
    }
}

#[async_trait]
impl ResourceHandler for DeploymentHandler {
    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(format!("Deployment of a {} revision to an environment", self.kind))
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                self.artifact_attr(),
                Attribute::required_string().with_force_new(),
            )
            .with_attribute(
                "environment_name",
                Attribute::required_string().with_force_new(),
            )
            .with_attribute("revision", Attribute::required_int64().with_min(1))
            .with_attribute(
                "delay",
                Attribute::optional_int64()
                    .with_min(0)
                    .with_description("Seconds before undeploying the previous revision (legacy Edge only)"),
            )
            .with_attribute(
                "service_account",
                Attribute::optional_string()
                    .with_description("Identity the deployment runs as (Apigee X / hybrid only)"),
            )
    }

    async fn create(&self, client: &ApigeeClient, planned: Value) -> Result<ApplyResult, ProviderError> {
        self.apply(client, planned).await
    }

    async fn read(&self, client: &ApigeeClient, state: Value) -> Result<Option<Value>, ProviderError> {
        let key = identity::decode(state_id(&state)?, 2)?;
        let (environment, artifact) = (key.segment(0), key.segment(1));

        let active = match Reconciler::new(client)
            .active_binding(self.kind, artifact, environment)
            .await
        {
            Ok(active) => active,
            Err(err) if err.is_absent() => return Ok(None),
            Err(err) => return Err(err),
        };

        Ok(Some(json!({
            "id": key.encode(),
            self.artifact_attr(): artifact,
            "environment_name": environment,
            "revision": active.revision,
            "delay": state.get("delay").cloned().unwrap_or(Value::Null),
            "service_account": active.service_account,
        })))
    }

    async fn update(
        &self,
        client: &ApigeeClient,
        _prior: Value,
        planned: Value,
    ) -> Result<ApplyResult, ProviderError> {
        self.apply(client, planned).await
    }

    async fn delete(&self, client: &ApigeeClient, state: Value) -> Result<(), ProviderError> {
        let key = identity::decode(state_id(&state)?, 2)?;
        Reconciler::new(client)
            .undeploy_all(self.kind, key.segment(1), key.segment(0))
            .await?;
        Ok(())
    }

    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        let key = identity::decode(id, 2)?;
        Ok(json!({
            "id": key.encode(),
            "environment_name": key.segment(0),
            self.artifact_attr(): key.segment(1),
        }))
    }

    /// A drain delay only matters at the moment a revision is swapped, so a
    /// delay change without a revision change is not a diff.
    fn customize_plan(&self, prior: &Value, planned: &mut Value) {
        if prior.get("revision") != planned.get("revision") {
            return;
        }
        if let Value::Object(map) = planned {
            map.insert(
                "delay".to_string(),
                prior.get("delay").cloned().unwrap_or(Value::Null),
            );
        }
    }
}
