//! `apigee_keystore`.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{required_str, state_id, ResourceHandler};
use crate::client::ApigeeClient;
use crate::error::ProviderError;
use crate::identity;
use crate::schema::{Attribute, Schema};
use crate::types::ApplyResult;

#[derive(Debug, Deserialize)]
struct Keystore {
    name: String,
}

/// Identity is `environment:name`; no in-place updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeystoreHandler;

fn state(environment: &str, name: &str) -> Value {
    json!({
        "id": identity::encode([environment, name]),
        "environment_name": environment,
        "name": name,
    })
}

#[async_trait]
impl ResourceHandler for KeystoreHandler {
    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("environment_name", Attribute::required_string().with_force_new())
            .with_attribute("name", Attribute::required_string().with_force_new())
    }

    async fn create(&self, client: &ApigeeClient, planned: Value) -> Result<ApplyResult, ProviderError> {
        let environment = required_str(&planned, "environment_name")?;
        let name = required_str(&planned, "name")?;
        client
            .send_json_unit(
                Method::POST,
                client.org_path(&["environments", environment, "keystores"]),
                &json!({"name": name}),
            )
            .await?;
        Ok(ApplyResult::new(state(environment, name)))
    }

    async fn read(&self, client: &ApigeeClient, state_value: Value) -> Result<Option<Value>, ProviderError> {
        let key = identity::decode(state_id(&state_value)?, 2)?;
        let path = client.org_path(&["environments", key.segment(0), "keystores", key.segment(1)]);
        match client.get_json::<Keystore>(path).await {
            Ok(keystore) => Ok(Some(state(key.segment(0), &keystore.name))),
            Err(err) if err.is_absent() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn delete(&self, client: &ApigeeClient, state_value: Value) -> Result<(), ProviderError> {
        let key = identity::decode(state_id(&state_value)?, 2)?;
        let path = client.org_path(&["environments", key.segment(0), "keystores", key.segment(1)]);
        match client.delete(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        let key = identity::decode(id, 2)?;
        Ok(state(key.segment(0), key.segment(1)))
    }
}
