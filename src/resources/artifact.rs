//! `apigee_proxy` and `apigee_shared_flow`: bundle upload.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{required_str, state_id, ResourceHandler};
use crate::client::{ApiRequest, ApigeeClient, MultipartForm};
use crate::deployment::{ArtifactDeletion, ArtifactKind, Reconciler};
use crate::error::ProviderError;
use crate::identity;
use crate::revision::{latest_revision, RevisionSet};
use crate::schema::{Attribute, Schema};
use crate::types::ApplyResult;

#[derive(Debug, Deserialize)]
struct ImportedRevision {
    revision: String,
}

#[derive(Debug, Default, Deserialize)]
struct ArtifactRevisions {
    #[serde(default)]
    revision: RevisionSet,
}

/// Uploads a bundle as a new revision of a proxy or shared flow.
///
/// Identity is the artifact name. `revision` is computed: the revision the
/// last upload created, refreshed to the greatest revision on read.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactHandler {
    kind: ArtifactKind,
}

impl ArtifactHandler {
    /// Handler for artifacts of `kind`.
    pub fn new(kind: ArtifactKind) -> Self {
        Self { kind }
    }

    async fn import_bundle(
        &self,
        client: &ApigeeClient,
        name: &str,
        bundle: &str,
    ) -> Result<u32, ProviderError> {
        let form = MultipartForm::new().file_from_path("bundle", bundle).await?;
        let request = ApiRequest::post(client.org_path(&[self.kind.collection()]))
            .query("action", "import")
            .query("name", name);
        let imported: ImportedRevision = client.send_multipart(request, form).await?;
        let revision = latest_revision(&[imported.revision])?;
        info!(name, revision, "{} bundle imported", self.kind);
        Ok(revision)
    }

    async fn apply(&self, client: &ApigeeClient, planned: Value) -> Result<ApplyResult, ProviderError> {
        let name = required_str(&planned, "name")?;
        let bundle = required_str(&planned, "bundle")?;
        let revision = self.import_bundle(client, name, bundle).await?;

        Ok(ApplyResult::new(json!({
            "id": identity::encode([name]),
            "name": name,
            "bundle": bundle,
            "bundle_hash": planned.get("bundle_hash").cloned().unwrap_or(Value::Null),
            "revision": revision,
        })))
    }
}

#[async_trait]
impl ResourceHandler for ArtifactHandler {
    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(format!("An Apigee {} and its revisions", self.kind))
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute(
                "bundle",
                Attribute::required_string().with_description("Path to the bundle zip"),
            )
            .with_attribute(
                "bundle_hash",
                Attribute::required_string()
                    .with_description("Hash of the bundle; a change uploads a new revision"),
            )
            .with_attribute("revision", Attribute::computed_int64())
    }

    async fn create(&self, client: &ApigeeClient, planned: Value) -> Result<ApplyResult, ProviderError> {
        self.apply(client, planned).await
    }

    async fn read(&self, client: &ApigeeClient, state: Value) -> Result<Option<Value>, ProviderError> {
        let name = identity::decode(state_id(&state)?, 1)?.segment(0).to_string();
        let path = client.org_path(&[self.kind.collection(), &name]);

        let listing: Option<ArtifactRevisions> = match client.get_json(path).await {
            Ok(listing) => listing,
            Err(err) if err.is_absent() => return Ok(None),
            Err(err) => return Err(err),
        };
        let revisions = listing.unwrap_or_default().revision;
        if revisions.is_empty() {
            return Err(ProviderError::NoRevisionsFound(format!("{} {}", self.kind, name)));
        }

        Ok(Some(json!({
            "id": identity::encode([name.as_str()]),
            "name": name,
            "bundle": state.get("bundle").cloned().unwrap_or(Value::Null),
            "bundle_hash": state.get("bundle_hash").cloned().unwrap_or(Value::Null),
            "revision": revisions.latest()?,
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

    /// Leaves the artifact alone while any environment still deploys it.
    async fn delete(&self, client: &ApigeeClient, state: Value) -> Result<(), ProviderError> {
        let key = identity::decode(state_id(&state)?, 1)?;
        if let ArtifactDeletion::Retained { environments } = Reconciler::new(client)
            .delete_artifact(self.kind, key.segment(0))
            .await?
        {
            info!(
                name = key.segment(0),
                ?environments,
                "{} left in place for the configuration that deploys it",
                self.kind
            );
        }
        Ok(())
    }

    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        let key = identity::decode(id, 1)?;
        Ok(json!({"id": key.encode(), "name": key.segment(0)}))
    }

    /// A new bundle means a new revision, which is unknown until upload.
    fn customize_plan(&self, prior: &Value, planned: &mut Value) {
        let changed = |attr: &str| prior.get(attr) != planned.get(attr);
        if changed("bundle") || changed("bundle_hash") {
            if let Value::Object(map) = planned {
                map.insert("revision".to_string(), Value::Null);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ApiError, Part, RequestBody};
    use crate::config::Backend;
    use crate::testing::MockTransport;
    use reqwest::Method;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_uploads_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("orders-api.zip");
        std::fs::write(&bundle, b"PK\x03\x04").unwrap();

        let transport = Arc::new(MockTransport::new());
        transport.respond_json(
            Method::POST,
            "organizations/acme/apis",
            json!({"name": "orders-api", "revision": "4"}),
        );
        let client = ApigeeClient::new(transport.clone(), "acme", Backend::Legacy);

        let result = ArtifactHandler::new(ArtifactKind::Proxy)
            .create(
                &client,
                json!({
                    "name": "orders-api",
                    "bundle": bundle.to_str().unwrap(),
                    "bundle_hash": "abc123"
                }),
            )
            .await
            .unwrap();
        assert_eq!(result.state["id"], "orders-api");
        assert_eq!(result.state["revision"], 4);

        let request = &transport.requests()[0];
        assert_eq!(
            request.query,
            vec![
                ("action".to_string(), "import".to_string()),
                ("name".to_string(), "orders-api".to_string())
            ]
        );
        match &request.body {
            RequestBody::Multipart(form) => match &form.parts()[0] {
                Part::File { name, filename, .. } => {
                    assert_eq!(name, "bundle");
                    assert_eq!(filename, "orders-api.zip");
                }
                other => panic!("unexpected part: {:?}", other),
            },
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_picks_numeric_max() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(
            Method::GET,
            "organizations/acme/sharedflows/common-auth",
            json!({"name": "common-auth", "revision": ["1", "10", "2", "9"]}),
        );
        let client = ApigeeClient::new(transport, "acme", Backend::Legacy);

        let state = ArtifactHandler::new(ArtifactKind::SharedFlow)
            .read(&client, json!({"id": "common-auth", "bundle": "cf.zip"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["revision"], 10);
        assert_eq!(state["bundle"], "cf.zip");
    }

    #[tokio::test]
    async fn test_read_absent() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(
            Method::GET,
            "organizations/acme/apis/orders-api",
            Err(ApiError::status(404, "")),
        );
        let client = ApigeeClient::new(transport, "acme", Backend::Legacy);

        let state = ArtifactHandler::new(ArtifactKind::Proxy)
            .read(&client, json!({"id": "orders-api"}))
            .await
            .unwrap();
        assert!(state.is_none());
    }

    #[test]
    fn test_new_bundle_makes_revision_unknown() {
        let handler = ArtifactHandler::new(ArtifactKind::Proxy);
        let prior = json!({"bundle": "a.zip", "bundle_hash": "1", "revision": 3});

        let mut planned = json!({"bundle": "a.zip", "bundle_hash": "2", "revision": 3});
        handler.customize_plan(&prior, &mut planned);
        assert!(planned["revision"].is_null());

        let mut planned = prior.clone();
        handler.customize_plan(&prior, &mut planned);
        assert_eq!(planned["revision"], 3);
    }
}
