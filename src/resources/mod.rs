//! Resource handlers.
//!
//! One [`ResourceHandler`] per resource type. Handlers translate between the
//! flat attribute maps the provider exchanges and the management API calls
//! behind each entity. Every handler stores its composite key under `id`.

mod alias;
mod artifact;
mod deployment;
mod keystore;
mod kvm;
mod proxy_policy;
mod target_server;

pub use alias::AliasHandler;
pub use artifact::ArtifactHandler;
pub use deployment::DeploymentHandler;
pub use keystore::KeystoreHandler;
pub use kvm::EnvironmentKvmHandler;
pub use proxy_policy::ProxyPolicyHandler;
pub use target_server::TargetServerHandler;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::client::ApigeeClient;
use crate::deployment::ArtifactKind;
use crate::error::ProviderError;
use crate::schema::Schema;
use crate::types::ApplyResult;

/// CRUD callbacks for one resource type.
#[async_trait]
pub trait ResourceHandler: Send + Sync + 'static {
    /// Attribute schema, including the computed `id`.
    fn schema(&self) -> Schema;

    /// Create the entity described by `planned`.
    async fn create(&self, client: &ApigeeClient, planned: Value) -> Result<ApplyResult, ProviderError>;

    /// Refresh `state` from the API. `None` means the entity is gone.
    async fn read(&self, client: &ApigeeClient, state: Value) -> Result<Option<Value>, ProviderError>;

    /// Apply in-place changes. Handlers whose attributes all force
    /// replacement keep the default, which refuses.
    async fn update(
        &self,
        client: &ApigeeClient,
        prior: Value,
        planned: Value,
    ) -> Result<ApplyResult, ProviderError> {
        let _ = (client, prior, planned);
        Err(ProviderError::Validation(
            "this resource cannot be updated in place".to_string(),
        ))
    }

    /// Delete the entity.
    async fn delete(&self, client: &ApigeeClient, state: Value) -> Result<(), ProviderError>;

    /// The minimal state for `id`, completed by a subsequent read.
    fn import_state(&self, id: &str) -> Result<Value, ProviderError>;

    /// Adjust an update plan before the diff is computed.
    fn customize_plan(&self, prior: &Value, planned: &mut Value) {
        let _ = (prior, planned);
    }
}

/// Every resource type the provider serves.
pub fn handlers() -> BTreeMap<&'static str, Box<dyn ResourceHandler>> {
    let mut handlers: BTreeMap<&'static str, Box<dyn ResourceHandler>> = BTreeMap::new();
    handlers.insert("apigee_proxy", Box::new(ArtifactHandler::new(ArtifactKind::Proxy)));
    handlers.insert(
        "apigee_shared_flow",
        Box::new(ArtifactHandler::new(ArtifactKind::SharedFlow)),
    );
    handlers.insert(
        "apigee_proxy_deployment",
        Box::new(DeploymentHandler::new(ArtifactKind::Proxy)),
    );
    handlers.insert(
        "apigee_shared_flow_deployment",
        Box::new(DeploymentHandler::new(ArtifactKind::SharedFlow)),
    );
    handlers.insert("apigee_proxy_policy", Box::new(ProxyPolicyHandler));
    handlers.insert("apigee_target_server", Box::new(TargetServerHandler));
    handlers.insert("apigee_environment_kvm", Box::new(EnvironmentKvmHandler));
    handlers.insert("apigee_keystore", Box::new(KeystoreHandler));
    handlers.insert("apigee_alias", Box::new(AliasHandler));
    handlers
}

// Attribute access on flat state maps.

pub(crate) fn required_str<'v>(state: &'v Value, name: &str) -> Result<&'v str, ProviderError> {
    state
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::Validation(format!("missing required attribute '{}'", name)))
}

pub(crate) fn optional_str<'v>(state: &'v Value, name: &str) -> Option<&'v str> {
    state
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

pub(crate) fn optional_u64(state: &Value, name: &str) -> Option<u64> {
    state.get(name).and_then(Value::as_u64)
}

/// A positive integer attribute. Accepts the numeric strings older states hold.
pub(crate) fn revision_attr(state: &Value, name: &str) -> Result<u32, ProviderError> {
    let value = state
        .get(name)
        .ok_or_else(|| ProviderError::Validation(format!("missing required attribute '{}'", name)))?;
    let revision = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    };
    revision
        .filter(|r| *r >= 1)
        .ok_or_else(|| ProviderError::Validation(format!("'{}' must be an integer of at least 1", name)))
}

/// The composite key stored under `id`.
pub(crate) fn state_id(state: &Value) -> Result<&str, ProviderError> {
    required_str(state, "id")
}

/// `state` as an object, with `key` set to `value`.
pub(crate) fn with_attr(mut state: Value, key: &str, value: Value) -> Value {
    if !state.is_object() {
        state = Value::Object(Map::new());
    }
    if let Value::Object(map) = &mut state {
        map.insert(key.to_string(), value);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_covers_every_resource_type() {
        let handlers = handlers();
        let names: Vec<&str> = handlers.keys().copied().collect();
        assert_eq!(
            names,
            vec![
                "apigee_alias",
                "apigee_environment_kvm",
                "apigee_keystore",
                "apigee_proxy",
                "apigee_proxy_deployment",
                "apigee_proxy_policy",
                "apigee_shared_flow",
                "apigee_shared_flow_deployment",
                "apigee_target_server",
            ]
        );
        for (name, handler) in &handlers {
            let schema = handler.schema();
            assert!(
                schema.attributes.get("id").is_some_and(|a| a.flags.computed),
                "{} has no computed id",
                name
            );
        }
    }

    #[test]
    fn test_revision_attr() {
        assert_eq!(revision_attr(&json!({"revision": 7}), "revision").unwrap(), 7);
        assert_eq!(revision_attr(&json!({"revision": "7"}), "revision").unwrap(), 7);
        assert!(revision_attr(&json!({"revision": 0}), "revision").is_err());
        assert!(revision_attr(&json!({"revision": "v7"}), "revision").is_err());
        assert!(revision_attr(&json!({}), "revision").is_err());
    }

    #[test]
    fn test_string_attrs() {
        let state = json!({"name": "orders-api", "service_account": ""});
        assert_eq!(required_str(&state, "name").unwrap(), "orders-api");
        assert!(required_str(&state, "environment_name").is_err());
        assert_eq!(optional_str(&state, "service_account"), None);
    }

    #[test]
    fn test_with_attr() {
        let state = with_attr(json!({"name": "ks1"}), "id", json!("test:ks1"));
        assert_eq!(state, json!({"name": "ks1", "id": "test:ks1"}));
        assert_eq!(with_attr(Value::Null, "id", json!("x")), json!({"id": "x"}));
    }
}
