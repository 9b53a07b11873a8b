//! `apigee_target_server`.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use super::{state_id, ResourceHandler};
use crate::client::ApigeeClient;
use crate::config::Backend;
use crate::error::ProviderError;
use crate::identity;
use crate::schema::{Attribute, Schema};
use crate::types::ApplyResult;

/// Attributes as configured. Unset flags are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TargetServerConfig {
    environment_name: String,
    name: String,
    host: String,
    port: u16,
    #[serde(default)]
    is_enabled: Option<bool>,
    #[serde(default)]
    ssl_enabled: Option<bool>,
    #[serde(default)]
    ssl_keystore: Option<String>,
    #[serde(default)]
    ssl_keyalias: Option<String>,
    #[serde(default)]
    ssl_truststore: Option<String>,
    #[serde(default)]
    ssl_client_auth_enabled: Option<bool>,
    #[serde(default)]
    ssl_ignore_validation_errors: Option<bool>,
}

fn enabled_by_default() -> bool {
    true
}

/// Wire shape. Legacy Edge encodes the SSL flags as `"true"`/`"false"`,
/// Apigee X as booleans; both are accepted on the way in.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetServer {
    host: String,
    port: u16,
    #[serde(default = "enabled_by_default")]
    is_enabled: bool,
    #[serde(rename = "sSLInfo", default)]
    ssl_info: Option<SslInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SslInfo {
    #[serde(default, deserialize_with = "flexible_bool")]
    enabled: bool,
    #[serde(default)]
    key_store: Option<String>,
    #[serde(default)]
    key_alias: Option<String>,
    #[serde(default)]
    trust_store: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    client_auth_enabled: bool,
    #[serde(default)]
    ignore_validation_errors: bool,
}

fn flexible_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::String(s) => Ok(s.eq_ignore_ascii_case("true")),
        _ => Ok(false),
    }
}

impl TargetServerConfig {
    fn id(&self) -> String {
        identity::encode([self.environment_name.as_str(), self.name.as_str()])
    }

    fn body(&self, backend: Backend) -> Value {
        let flag = |b: bool| match backend {
            Backend::Legacy => json!(b.to_string()),
            Backend::Cloud => json!(b),
        };
        let mut ssl = json!({
            "enabled": flag(self.ssl_enabled.unwrap_or(false)),
            "clientAuthEnabled": flag(self.ssl_client_auth_enabled.unwrap_or(false)),
            "ignoreValidationErrors": self.ssl_ignore_validation_errors.unwrap_or(false),
        });
        for (key, value) in [
            ("keyStore", &self.ssl_keystore),
            ("keyAlias", &self.ssl_keyalias),
            ("trustStore", &self.ssl_truststore),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                ssl = super::with_attr(ssl, key, json!(value));
            }
        }
        json!({
            "name": self.name,
            "host": self.host,
            "port": self.port,
            "isEnabled": self.is_enabled.unwrap_or(true),
            "sSLInfo": ssl,
        })
    }

    fn state(&self) -> Result<Value, ProviderError> {
        Ok(super::with_attr(serde_json::to_value(self)?, "id", json!(self.id())))
    }
}

/// Identity is `environment:name`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetServerHandler;

fn server_path(client: &ApigeeClient, environment: &str, name: &str) -> String {
    client.org_path(&["environments", environment, "targetservers", name])
}

#[async_trait]
impl ResourceHandler for TargetServerHandler {
    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("environment_name", Attribute::required_string().with_force_new())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute("host", Attribute::required_string())
            .with_attribute("port", Attribute::required_int64().with_range(0, 65535))
            .with_attribute(
                "is_enabled",
                Attribute::optional_bool().with_default(json!(true)),
            )
            .with_attribute("ssl_enabled", Attribute::optional_bool())
            .with_attribute("ssl_keystore", Attribute::optional_string())
            .with_attribute("ssl_keyalias", Attribute::optional_string())
            .with_attribute("ssl_truststore", Attribute::optional_string())
            .with_attribute("ssl_client_auth_enabled", Attribute::optional_bool())
            .with_attribute("ssl_ignore_validation_errors", Attribute::optional_bool())
    }

    async fn create(&self, client: &ApigeeClient, planned: Value) -> Result<ApplyResult, ProviderError> {
        let config: TargetServerConfig = serde_json::from_value(planned)?;
        client
            .send_json_unit(
                Method::POST,
                client.org_path(&["environments", &config.environment_name, "targetservers"]),
                &config.body(client.backend()),
            )
            .await?;
        Ok(ApplyResult::new(config.state()?))
    }

    async fn read(&self, client: &ApigeeClient, state: Value) -> Result<Option<Value>, ProviderError> {
        let key = identity::decode(state_id(&state)?, 2)?;
        let path = server_path(client, key.segment(0), key.segment(1));
        let server: TargetServer = match client.get_json(path).await {
            Ok(server) => server,
            Err(err) if err.is_absent() => return Ok(None),
            Err(err) => return Err(err),
        };

        let ssl = server.ssl_info.unwrap_or_default();
        let refreshed = TargetServerConfig {
            environment_name: key.segment(0).to_string(),
            name: key.segment(1).to_string(),
            host: server.host,
            port: server.port,
            is_enabled: Some(server.is_enabled),
            ssl_enabled: Some(ssl.enabled),
            ssl_keystore: ssl.key_store,
            ssl_keyalias: ssl.key_alias,
            ssl_truststore: ssl.trust_store,
            ssl_client_auth_enabled: Some(ssl.client_auth_enabled),
            ssl_ignore_validation_errors: Some(ssl.ignore_validation_errors),
        };
        refreshed.state().map(Some)
    }

    async fn update(
        &self,
        client: &ApigeeClient,
        _prior: Value,
        planned: Value,
    ) -> Result<ApplyResult, ProviderError> {
        let config: TargetServerConfig = serde_json::from_value(planned)?;
        client
            .send_json_unit(
                Method::PUT,
                server_path(client, &config.environment_name, &config.name),
                &config.body(client.backend()),
            )
            .await?;
        Ok(ApplyResult::new(config.state()?))
    }

    async fn delete(&self, client: &ApigeeClient, state: Value) -> Result<(), ProviderError> {
        let key = identity::decode(state_id(&state)?, 2)?;
        match client.delete(server_path(client, key.segment(0), key.segment(1))).await {
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
    use crate::client::RequestBody;
    use crate::testing::MockTransport;
    use std::sync::Arc;

    fn config() -> Value {
        json!({
            "environment_name": "test",
            "name": "orders-backend",
            "host": "orders.internal",
            "port": 8443,
            "ssl_enabled": true,
            "ssl_truststore": "ts1"
        })
    }

    #[tokio::test]
    async fn test_legacy_body_uses_string_flags() {
        let transport = Arc::new(MockTransport::new());
        let client = ApigeeClient::new(transport.clone(), "acme", Backend::Legacy);

        let result = TargetServerHandler.create(&client, config()).await.unwrap();
        assert_eq!(result.state["id"], "test:orders-backend");

        match &transport.requests()[0].body {
            RequestBody::Json(body) => {
                assert_eq!(body["isEnabled"], true);
                assert_eq!(body["sSLInfo"]["enabled"], "true");
                assert_eq!(body["sSLInfo"]["trustStore"], "ts1");
                assert!(body["sSLInfo"].get("keyStore").is_none());
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cloud_body_uses_bool_flags() {
        let transport = Arc::new(MockTransport::new());
        let client = ApigeeClient::new(transport.clone(), "acme", Backend::Cloud);

        TargetServerHandler.create(&client, config()).await.unwrap();
        match &transport.requests()[0].body {
            RequestBody::Json(body) => assert_eq!(body["sSLInfo"]["enabled"], true),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_either_flag_encoding() {
        let transport = Arc::new(MockTransport::new());
        transport.respond_json(
            Method::GET,
            "organizations/acme/environments/test/targetservers/orders-backend",
            json!({
                "name": "orders-backend",
                "host": "orders.internal",
                "port": 8443,
                "isEnabled": false,
                "sSLInfo": {"enabled": "true", "clientAuthEnabled": false}
            }),
        );
        let client = ApigeeClient::new(transport, "acme", Backend::Legacy);

        let state = TargetServerHandler
            .read(&client, json!({"id": "test:orders-backend"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state["ssl_enabled"], true);
        assert_eq!(state["ssl_client_auth_enabled"], false);
        assert_eq!(state["is_enabled"], false);
        assert_eq!(state["port"], 8443);
    }
}
