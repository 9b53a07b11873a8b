//! The provider surface.
//!
//! [`ProviderService`] is the set of lifecycle calls a host drives: schema,
//! configure, plan and the CRUD operations. [`ApigeeProvider`] implements it
//! by dispatching each call to the [`ResourceHandler`] registered for the
//! resource type.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::client::{ApigeeClient, HttpTransport, Transport};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::resources::{self, ResourceHandler};
use crate::schema::{Diagnostic, ProviderSchema, Schema};
use crate::types::{ApplyResult, AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
use crate::validation;

/// Lifecycle calls a provider answers.
///
/// # Example
///
/// ```ignore
/// use apigee_provider::{ApigeeProvider, ProviderService};
/// use serde_json::json;
///
/// let provider = ApigeeProvider::new();
/// provider
///     .configure(json!({"organization": "acme", "access_token": "t"}))
///     .await?;
/// let plan = provider
///     .plan("apigee_keystore", None, json!({"environment_name": "test", "name": "ks1"}), json!({}))
///     .await?;
/// ```
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Return the provider's schema including all resources.
    fn schema(&self) -> ProviderSchema;

    /// Return provider metadata. By default, this is derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: self.schema().resources.keys().cloned().collect(),
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    /// Returns diagnostics (errors and warnings).
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider with credentials and settings.
    /// Returns diagnostics (errors and warnings).
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Upgrade resource state from an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan changes for a resource. A null `proposed_state` plans a delete.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a new resource.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<ApplyResult, ProviderError>;

    /// Read the current state of a resource. `None` means it no longer exists.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Option<Value>, ProviderError>;

    /// Update an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<ApplyResult, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        _id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        Err(ProviderError::Validation(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }
}

/// The Apigee provider.
///
/// Unconfigured until [`ProviderService::configure`] succeeds; every
/// resource call before that fails with a configuration error.
pub struct ApigeeProvider {
    client: RwLock<Option<ApigeeClient>>,
    transport: Option<Arc<dyn Transport>>,
    handlers: BTreeMap<&'static str, Box<dyn ResourceHandler>>,
}

impl ApigeeProvider {
    /// A provider that connects over HTTPS at configure time.
    pub fn new() -> Self {
        Self {
            client: RwLock::new(None),
            transport: None,
            handlers: resources::handlers(),
        }
    }

    /// A provider that sends every request through `transport`.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport: Some(transport),
            ..Self::new()
        }
    }

    fn handler(&self, resource_type: &str) -> Result<&dyn ResourceHandler, ProviderError> {
        self.handlers
            .get(resource_type)
            .map(|handler| handler.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    async fn client(&self) -> Result<ApigeeClient, ProviderError> {
        self.client.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration("the provider has not been configured".to_string())
        })
    }
}

impl Default for ApigeeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ApigeeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApigeeProvider")
            .field("resources", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn present<'v>(state: Option<&'v Value>, name: &str) -> Option<&'v Value> {
    state.and_then(|s| s.get(name)).filter(|v| !v.is_null())
}

/// Resolve every schema attribute of the planned state.
///
/// Computed-only attributes keep their prior value (unknown on create).
/// Configurable attributes take the proposed value, then the default, then
/// the prior value.
fn planned_state(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> Value {
    let mut planned = Map::new();
    for (name, attr) in &schema.attributes {
        let prior_value = present(prior, name).cloned();
        let value = if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
            prior_value
        } else {
            present(Some(proposed), name)
                .cloned()
                .or_else(|| attr.default.clone())
                .or(prior_value)
        };
        planned.insert(name.clone(), value.unwrap_or(Value::Null));
    }
    Value::Object(planned)
}

fn diff(schema: &Schema, prior: Option<&Value>, planned: &Value) -> (Vec<AttributeChange>, bool) {
    let mut changes = Vec::new();
    let mut requires_replace = false;
    for (name, attr) in &schema.attributes {
        let before = present(prior, name);
        let after = present(Some(planned), name);
        let change = match (prior, before, after) {
            (None, _, Some(after)) => AttributeChange::added(name.clone(), after.clone()),
            (Some(_), Some(before), Some(after)) if before != after => {
                AttributeChange::modified(name.clone(), before.clone(), after.clone())
            }
            (Some(_), None, Some(after)) => AttributeChange::added(name.clone(), after.clone()),
            (Some(_), Some(before), None) if !attr.flags.computed => {
                AttributeChange::removed(name.clone(), before.clone())
            }
            _ => continue,
        };
        requires_replace |= prior.is_some() && attr.force_new;
        changes.push(change);
    }
    (changes, requires_replace)
}

#[async_trait::async_trait]
impl ProviderService for ApigeeProvider {
    fn schema(&self) -> ProviderSchema {
        self.handlers.iter().fold(
            ProviderSchema::new().with_provider_config(ProviderConfig::schema()),
            |schema, (name, handler)| schema.with_resource(*name, handler.schema()),
        )
    }

    #[instrument(skip(self, config), name = "provider.validate_provider_config")]
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validation::validate(&ProviderConfig::schema(), &config);
        if diagnostics.iter().any(Diagnostic::is_error) {
            return Ok(diagnostics);
        }
        let config: ProviderConfig = serde_json::from_value(config)?;
        diagnostics.extend(config.with_env_defaults().validate());
        Ok(diagnostics)
    }

    #[instrument(skip(self, config), name = "provider.configure")]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let config: ProviderConfig = serde_json::from_value(config)?;
        let config = config.with_env_defaults();
        let diagnostics = config.validate();
        if diagnostics.iter().any(Diagnostic::is_error) {
            warn!(errors = diagnostics.len(), "provider configuration rejected");
            return Ok(diagnostics);
        }

        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(HttpTransport::connect(&config).await?),
        };
        let backend = config.backend();
        let client = ApigeeClient::new(transport, config.organization(), backend);
        *self.client.write().await = Some(client);

        info!(organization = config.organization(), %backend, "provider configured");
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.client.write().await.take();
        info!("provider stopped");
        Ok(())
    }

    #[instrument(skip(self, config), name = "provider.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let handler = self.handler(resource_type)?;
        Ok(validation::validate(&handler.schema(), &config))
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: u64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let current = self.handler(resource_type)?.schema().version;
        if version > current {
            return Err(ProviderError::Validation(format!(
                "state version {} is newer than schema version {} of {}",
                version, current, resource_type
            )));
        }
        Ok(state)
    }

    #[instrument(skip(self, prior_state, proposed_state, _config), name = "provider.plan")]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let handler = self.handler(resource_type)?;
        let schema = handler.schema();
        let prior = prior_state.as_ref().filter(|p| !p.is_null());

        if proposed_state.is_null() {
            let changes = prior
                .and_then(Value::as_object)
                .map(|prior| {
                    prior
                        .iter()
                        .filter(|(_, v)| !v.is_null())
                        .map(|(name, v)| AttributeChange::removed(name.clone(), v.clone()))
                        .collect()
                })
                .unwrap_or_default();
            return Ok(PlanResult::with_changes(Value::Null, changes, false));
        }

        let mut planned = planned_state(&schema, prior, &proposed_state);
        if let Some(prior) = prior {
            handler.customize_plan(prior, &mut planned);
        }
        let (changes, requires_replace) = diff(&schema, prior, &planned);
        debug!(changes = changes.len(), requires_replace, "plan computed");

        Ok(PlanResult::with_changes(planned, changes, requires_replace))
    }

    #[instrument(skip(self, planned_state), name = "provider.create")]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<ApplyResult, ProviderError> {
        let handler = self.handler(resource_type)?;
        let client = self.client().await?;
        let result = handler.create(&client, planned_state).await?;
        info!(id = ?result.state.get("id"), "resource created");
        Ok(result)
    }

    #[instrument(skip(self, current_state), name = "provider.read")]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Option<Value>, ProviderError> {
        let handler = self.handler(resource_type)?;
        let client = self.client().await?;
        let state = handler.read(&client, current_state).await?;
        if state.is_none() {
            debug!("resource no longer exists");
        }
        Ok(state)
    }

    #[instrument(skip(self, prior_state, planned_state), name = "provider.update")]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<ApplyResult, ProviderError> {
        let handler = self.handler(resource_type)?;
        let client = self.client().await?;
        let result = handler.update(&client, prior_state, planned_state).await?;
        info!(id = ?result.state.get("id"), "resource updated");
        Ok(result)
    }

    #[instrument(skip(self, current_state), name = "provider.delete")]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let handler = self.handler(resource_type)?;
        let client = self.client().await?;
        handler.delete(&client, current_state).await?;
        info!("resource deleted");
        Ok(())
    }

    #[instrument(skip(self), name = "provider.import_resource")]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let handler = self.handler(resource_type)?;
        let client = self.client().await?;
        let seed = handler.import_state(id)?;
        let state = handler
            .read(&client, seed)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} {}", resource_type, id)))?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn configured() -> (Arc<MockTransport>, ApigeeProvider) {
        let transport = Arc::new(MockTransport::new());
        let provider = ApigeeProvider::with_transport(transport.clone());
        (transport, provider)
    }

    async fn configure(provider: &ApigeeProvider) {
        let diagnostics = provider
            .configure(json!({"organization": "acme", "access_token": "t"}))
            .await
            .unwrap();
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    }

    #[tokio::test]
    async fn test_calls_before_configure_fail() {
        let (_, provider) = configured();
        let err = tokio_test::assert_err!(
            provider
                .read("apigee_keystore", json!({"id": "test:ks1"}))
                .await
        );
        assert!(matches!(err, ProviderError::Configuration(_)));
        tokio_test::assert_ok!(provider.stop().await);
    }

    #[tokio::test]
    async fn test_configure_rejects_conflicting_credentials() {
        let (_, provider) = configured();
        let diagnostics = provider
            .configure(json!({
                "organization": "acme",
                "access_token": "t",
                "username": "u",
                "password": "p"
            }))
            .await
            .unwrap();
        assert!(diagnostics.iter().any(|d| d.summary.contains("Conflicting")));
        assert!(provider.client().await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let (_, provider) = configured();
        configure(&provider).await;
        let err = provider
            .plan("apigee_developer", None, json!({}), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_plan_create_fills_defaults_and_unknowns() {
        let (_, provider) = configured();
        let plan = provider
            .plan(
                "apigee_alias",
                None,
                json!({"environment_name": "test", "keystore_name": "ks1", "name": "a", "format": "pkcs12"}),
                json!({}),
            )
            .await
            .unwrap();
        assert_eq!(plan.planned_state["ignore_newline_validation"], true);
        assert_eq!(plan.planned_state["ignore_expiry_validation"], false);
        assert!(plan.planned_state["id"].is_null());
        assert!(!plan.requires_replace);
        assert!(plan.changes_attribute("format"));
    }

    #[tokio::test]
    async fn test_plan_update_replaces_on_force_new() {
        let (_, provider) = configured();
        let prior = json!({
            "id": "test:orders-api",
            "proxy_name": "orders-api",
            "environment_name": "test",
            "revision": 3
        });

        let plan = provider
            .plan(
                "apigee_proxy_deployment",
                Some(prior.clone()),
                json!({"proxy_name": "orders-api", "environment_name": "prod", "revision": 3}),
                json!({}),
            )
            .await
            .unwrap();
        assert!(plan.requires_replace);

        let plan = provider
            .plan(
                "apigee_proxy_deployment",
                Some(prior),
                json!({"proxy_name": "orders-api", "environment_name": "test", "revision": 4}),
                json!({}),
            )
            .await
            .unwrap();
        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["id"], "test:orders-api");
        assert_eq!(plan.changes.len(), 1);
        assert!(plan.changes_attribute("revision"));
    }

    #[tokio::test]
    async fn test_plan_delete() {
        let (_, provider) = configured();
        let plan = provider
            .plan(
                "apigee_keystore",
                Some(json!({"id": "test:ks1", "environment_name": "test", "name": "ks1"})),
                Value::Null,
                json!({}),
            )
            .await
            .unwrap();
        assert!(plan.planned_state.is_null());
        assert_eq!(plan.changes.len(), 3);
        assert!(plan.changes.iter().all(|c| c.after.is_none()));
    }

    #[tokio::test]
    async fn test_import_reads_back() {
        let (transport, provider) = configured();
        configure(&provider).await;
        transport.respond_json(
            reqwest::Method::GET,
            "organizations/acme/environments/test/keystores/ks1",
            json!({"name": "ks1"}),
        );

        let imported = provider.import_resource("apigee_keystore", "test:ks1").await.unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].state["environment_name"], "test");

        transport.respond(
            reqwest::Method::GET,
            "organizations/acme/environments/test/keystores/gone",
            Err(crate::client::ApiError::status(404, "")),
        );
        let err = provider
            .import_resource("apigee_keystore", "test:gone")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[test]
    fn test_schema_lists_every_resource() {
        let provider = ApigeeProvider::new();
        let metadata = provider.metadata();
        assert_eq!(metadata.resources.len(), 9);
        assert!(provider.schema().provider.attributes.contains_key("organization"));
    }
}
