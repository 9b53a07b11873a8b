//! `apigee_proxy_policy`: one policy XML inside a proxy revision.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, revision_attr, state_id, ResourceHandler};
use crate::client::{ApiRequest, ApigeeClient, RequestBody, APPLICATION_XML};
use crate::error::ProviderError;
use crate::identity::{self, CompositeKey};
use crate::schema::{Attribute, Schema};
use crate::types::ApplyResult;

/// Identity is `proxy:revision:name`; every attribute forces replacement.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyPolicyHandler;

fn policies_path(client: &ApigeeClient, proxy: &str, revision: u32) -> String {
    let revision = revision.to_string();
    client.org_path(&["apis", proxy, "revisions", &revision, "policies"])
}

fn decode_id(id: &str) -> Result<(CompositeKey, u32), ProviderError> {
    let key = identity::decode(id, 3)?;
    let revision = key.numeric(1)?;
    Ok((key, revision))
}

#[async_trait]
impl ResourceHandler for ProxyPolicyHandler {
    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("proxy_name", Attribute::required_string().with_force_new())
            .with_attribute(
                "revision",
                Attribute::required_int64().with_min(1).with_force_new(),
            )
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute(
                "file",
                Attribute::required_string()
                    .with_force_new()
                    .with_description("Path to the policy XML"),
            )
            .with_attribute("file_hash", Attribute::required_string().with_force_new())
    }

    async fn create(&self, client: &ApigeeClient, planned: Value) -> Result<ApplyResult, ProviderError> {
        let proxy = required_str(&planned, "proxy_name")?;
        let revision = revision_attr(&planned, "revision")?;
        let name = required_str(&planned, "name")?;
        let file = required_str(&planned, "file")?;

        let xml = tokio::fs::read(file).await?;
        let request = ApiRequest::post(policies_path(client, proxy, revision)).body(RequestBody::Raw {
            content_type: APPLICATION_XML.to_string(),
            bytes: xml.into(),
        });
        client.send(request).await?;

        let id = identity::encode([proxy, revision.to_string().as_str(), name]);
        Ok(ApplyResult::new(super::with_attr(planned, "id", json!(id))))
    }

    /// Fetching one policy returns its XML, so presence is checked against
    /// the revision's policy list instead.
    async fn read(&self, client: &ApigeeClient, state: Value) -> Result<Option<Value>, ProviderError> {
        let (key, revision) = decode_id(state_id(&state)?)?;
        let policies: Option<Vec<String>> =
            match client.get_json(policies_path(client, key.segment(0), revision)).await {
                Ok(policies) => policies,
                Err(err) if err.is_absent() => return Ok(None),
                Err(err) => return Err(err),
            };
        if !policies.unwrap_or_default().iter().any(|p| p == key.segment(2)) {
            return Ok(None);
        }

        let mut refreshed = json!({
            "id": key.encode(),
            "proxy_name": key.segment(0),
            "revision": revision,
            "name": key.segment(2),
        });
        for attr in ["file", "file_hash"] {
            if let Some(value) = state.get(attr) {
                refreshed = super::with_attr(refreshed, attr, value.clone());
            }
        }
        Ok(Some(refreshed))
    }

    async fn delete(&self, client: &ApigeeClient, state: Value) -> Result<(), ProviderError> {
        let (key, revision) = decode_id(state_id(&state)?)?;
        let path = format!(
            "{}/{}",
            policies_path(client, key.segment(0), revision),
            urlencoding::encode(key.segment(2))
        );
        match client.delete(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        let (key, revision) = decode_id(id)?;
        Ok(json!({
            "id": key.encode(),
            "proxy_name": key.segment(0),
            "revision": revision,
            "name": key.segment(2),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use crate::testing::MockTransport;
    use reqwest::Method;
    use std::sync::Arc;

    const POLICIES: &str = "organizations/acme/apis/orders-api/revisions/3/policies";

    #[tokio::test]
    async fn test_create_uploads_xml() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("verify-key.xml");
        std::fs::write(&file, "<VerifyAPIKey name=\"verify-key\"/>").unwrap();

        let transport = Arc::new(MockTransport::new());
        let client = ApigeeClient::new(transport.clone(), "acme", Backend::Legacy);

        let result = ProxyPolicyHandler
            .create(
                &client,
                json!({
                    "proxy_name": "orders-api",
                    "revision": 3,
                    "name": "verify-key",
                    "file": file.to_str().unwrap(),
                    "file_hash": "h"
                }),
            )
            .await
            .unwrap();
        assert_eq!(result.state["id"], "orders-api:3:verify-key");

        let request = &transport.requests()[0];
        assert_eq!(request.path, POLICIES);
        assert!(matches!(
            &request.body,
            RequestBody::Raw { content_type, .. } if content_type == APPLICATION_XML
        ));
    }

    #[tokio::test]
    async fn test_read_checks_policy_list() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(Method::GET, POLICIES, json!(["spike-arrest", "verify-key"]));
        let client = ApigeeClient::new(transport, "acme", Backend::Legacy);

        let state = ProxyPolicyHandler
            .read(&client, json!({"id": "orders-api:3:verify-key", "file": "p.xml"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["revision"], 3);
        assert_eq!(state["file"], "p.xml");

        let gone = ProxyPolicyHandler
            .read(&client, json!({"id": "orders-api:3:quota"}))
            .await
            .unwrap();
        assert!(gone.is_none());
    }

    #[test]
    fn test_import_rejects_non_numeric_revision() {
        let err = ProxyPolicyHandler.import_state("orders-api:latest:verify-key").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedIdentity { .. }));
        assert!(ProxyPolicyHandler.import_state("orders-api:3").is_err());
    }
}
