//! `apigee_environment_kvm`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{state_id, ResourceHandler};
use crate::client::ApigeeClient;
use crate::error::ProviderError;
use crate::identity;
use crate::schema::{Attribute, AttributeType, AttributeFlags, Schema};
use crate::types::ApplyResult;

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct KvmConfig {
    environment_name: String,
    name: String,
    #[serde(default)]
    encrypted: Option<bool>,
    #[serde(default)]
    entry: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct KvmEntry {
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct Kvm {
    #[serde(default)]
    encrypted: bool,
    #[serde(default)]
    entry: Vec<KvmEntry>,
}

impl KvmConfig {
    fn entries(&self) -> BTreeMap<String, String> {
        self.entry.clone().unwrap_or_default()
    }

    fn state(&self) -> Value {
        json!({
            "id": identity::encode([self.environment_name.as_str(), self.name.as_str()]),
            "environment_name": self.environment_name,
            "name": self.name,
            "encrypted": self.encrypted.unwrap_or(false),
            "entry": self.entries(),
        })
    }
}

/// Identity is `environment:name`. Entries are managed one by one on update.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentKvmHandler;

fn kvm_path(client: &ApigeeClient, environment: &str, name: &str, tail: &[&str]) -> String {
    let mut segments = vec!["environments", environment, "keyvaluemaps", name];
    segments.extend_from_slice(tail);
    client.org_path(&segments)
}

#[async_trait]
impl ResourceHandler for EnvironmentKvmHandler {
    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("environment_name", Attribute::required_string().with_force_new())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute("encrypted", Attribute::optional_bool().with_force_new())
            .with_attribute(
                "entry",
                Attribute::new(AttributeType::map(AttributeType::String), AttributeFlags::optional())
                    .sensitive(),
            )
    }

    async fn create(&self, client: &ApigeeClient, planned: Value) -> Result<ApplyResult, ProviderError> {
        let config: KvmConfig = serde_json::from_value(planned)?;
        let entries: Vec<KvmEntry> = config
            .entries()
            .into_iter()
            .map(|(name, value)| KvmEntry { name, value })
            .collect();
        client
            .send_json_unit(
                Method::POST,
                client.org_path(&["environments", &config.environment_name, "keyvaluemaps"]),
                &json!({
                    "name": config.name,
                    "encrypted": config.encrypted.unwrap_or(false),
                    "entry": entries,
                }),
            )
            .await?;
        Ok(ApplyResult::new(config.state()))
    }

    /// Encrypted values come back masked, so those keep the values from state.
    async fn read(&self, client: &ApigeeClient, state: Value) -> Result<Option<Value>, ProviderError> {
        let key = identity::decode(state_id(&state)?, 2)?;
        let kvm: Option<Kvm> = match client
            .get_json(kvm_path(client, key.segment(0), key.segment(1), &[]))
            .await
        {
            Ok(kvm) => kvm,
            Err(err) if err.is_absent() => return Ok(None),
            Err(err) => return Err(err),
        };
        let kvm = kvm.unwrap_or_default();

        let known: BTreeMap<String, String> = state
            .get("entry")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let entry = kvm
            .entry
            .into_iter()
            .map(|e| {
                let value = match known.get(&e.name) {
                    Some(value) if kvm.encrypted => value.clone(),
                    _ => e.value,
                };
                (e.name, value)
            })
            .collect();

        let refreshed = KvmConfig {
            environment_name: key.segment(0).to_string(),
            name: key.segment(1).to_string(),
            encrypted: Some(kvm.encrypted),
            entry: Some(entry),
        };
        Ok(Some(refreshed.state()))
    }

    async fn update(
        &self,
        client: &ApigeeClient,
        prior: Value,
        planned: Value,
    ) -> Result<ApplyResult, ProviderError> {
        let config: KvmConfig = serde_json::from_value(planned)?;
        let old: BTreeMap<String, String> = prior
            .get("entry")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let new = config.entries();
        let (environment, name) = (config.environment_name.as_str(), config.name.as_str());

        for key in old.keys().filter(|k| !new.contains_key(*k)) {
            debug!(entry = %key, "removing KVM entry");
            match client
                .delete(kvm_path(client, environment, name, &["entries", key]))
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }

        for (key, value) in &new {
            let path = match old.get(key) {
                Some(previous) if previous == value => continue,
                Some(_) => kvm_path(client, environment, name, &["entries", key]),
                None => kvm_path(client, environment, name, &["entries"]),
            };
            debug!(entry = %key, "writing KVM entry");
            client
                .send_json_unit(
                    Method::POST,
                    path,
                    &KvmEntry {
                        name: key.clone(),
                        value: value.clone(),
                    },
                )
                .await?;
        }

        Ok(ApplyResult::new(config.state()))
    }

    async fn delete(&self, client: &ApigeeClient, state: Value) -> Result<(), ProviderError> {
        let key = identity::decode(state_id(&state)?, 2)?;
        match client
            .delete(kvm_path(client, key.segment(0), key.segment(1), &[]))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        let key = identity::decode(id, 2)?;
        Ok(json!({
            "id": key.encode(),
            "environment_name": key.segment(0),
            "name": key.segment(1),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;
    use crate::testing::MockTransport;
    use std::sync::Arc;

    const KVM: &str = "organizations/acme/environments/test/keyvaluemaps/settings";

    #[tokio::test]
    async fn test_update_touches_only_changed_entries() {
        let transport = Arc::new(MockTransport::new());
        let client = ApigeeClient::new(transport.clone(), "acme", Backend::Legacy);

        let prior = json!({
            "id": "test:settings",
            "environment_name": "test",
            "name": "settings",
            "entry": {"timeout": "30", "region": "eu", "legacy": "1"}
        });
        let planned = json!({
            "id": "test:settings",
            "environment_name": "test",
            "name": "settings",
            "entry": {"timeout": "60", "region": "eu", "tier": "gold"}
        });

        let result = EnvironmentKvmHandler.update(&client, prior, planned).await.unwrap();
        assert_eq!(result.state["entry"]["tier"], "gold");

        let calls = transport.calls();
        assert_eq!(
            calls,
            vec![
                (Method::DELETE, format!("{}/entries/legacy", KVM)),
                (Method::POST, format!("{}/entries", KVM)),
                (Method::POST, format!("{}/entries/timeout", KVM)),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_keeps_encrypted_values() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(
            Method::GET,
            KVM,
            json!({"name": "settings", "encrypted": true, "entry": [{"name": "apiKey", "value": "*****"}]}),
        );
        let client = ApigeeClient::new(transport, "acme", Backend::Legacy);

        let state = EnvironmentKvmHandler
            .read(&client, json!({"id": "test:settings", "entry": {"apiKey": "s3cret"}}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["entry"]["apiKey"], "s3cret");
        assert_eq!(state["encrypted"], true);
    }
}
