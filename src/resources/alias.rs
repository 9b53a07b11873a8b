//! `apigee_alias`: a key/certificate pair inside a keystore.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{optional_str, required_str, state_id, ResourceHandler};
use crate::client::{ApiRequest, ApigeeClient, MultipartForm};
use crate::error::ProviderError;
use crate::identity;
use crate::schema::{Attribute, Schema};
use crate::types::ApplyResult;

#[derive(Debug, Deserialize)]
struct Alias {
    alias: String,
}

/// Identity is `environment:keystore:alias`. Only the certificate can be
/// replaced in place; everything else forces a new alias.
#[derive(Debug, Clone, Copy, Default)]
pub struct AliasHandler;

fn aliases_path(client: &ApigeeClient, environment: &str, keystore: &str, tail: &[&str]) -> String {
    let mut segments = vec!["environments", environment, "keystores", keystore, "aliases"];
    segments.extend_from_slice(tail);
    client.org_path(&segments)
}

fn flag(planned: &Value, attr: &str, default: bool) -> String {
    planned
        .get(attr)
        .and_then(Value::as_bool)
        .unwrap_or(default)
        .to_string()
}

/// The password comes from the configuration, or failing that from the
/// environment variable it names.
fn password(planned: &Value) -> Option<String> {
    optional_str(planned, "password").map(str::to_string).or_else(|| {
        optional_str(planned, "password_env_var_name").and_then(|var| std::env::var(var).ok())
    })
}

fn alias_state(planned: Value, environment: &str, keystore: &str, name: &str) -> Value {
    super::with_attr(planned, "id", json!(identity::encode([environment, keystore, name])))
}

#[async_trait]
impl ResourceHandler for AliasHandler {
    fn schema(&self) -> Schema {
        let force_new_path = |description: &str| {
            Attribute::optional_string()
                .with_force_new()
                .with_description(description)
        };
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("environment_name", Attribute::required_string().with_force_new())
            .with_attribute("keystore_name", Attribute::required_string().with_force_new())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute(
                "format",
                Attribute::required_string()
                    .with_force_new()
                    .with_one_of(["keycertfile", "keycertjar", "pkcs12"]),
            )
            .with_attribute("cert_file", force_new_path("Path to the PEM certificate"))
            .with_attribute("key_file", force_new_path("Path to the PEM private key"))
            .with_attribute("file", force_new_path("Path to the jar or PKCS#12 file"))
            .with_attribute(
                "password",
                Attribute::optional_string().with_force_new().sensitive(),
            )
            .with_attribute(
                "password_env_var_name",
                Attribute::optional_string().with_force_new(),
            )
            .with_attribute(
                "ignore_expiry_validation",
                Attribute::optional_bool().with_default(json!(false)),
            )
            .with_attribute(
                "ignore_newline_validation",
                Attribute::optional_bool().with_default(json!(true)),
            )
    }

    async fn create(&self, client: &ApigeeClient, planned: Value) -> Result<ApplyResult, ProviderError> {
        let environment = required_str(&planned, "environment_name")?;
        let keystore = required_str(&planned, "keystore_name")?;
        let name = required_str(&planned, "name")?;
        let format = required_str(&planned, "format")?;

        let mut form = MultipartForm::new();
        for (part, attr) in [("certFile", "cert_file"), ("keyFile", "key_file"), ("file", "file")] {
            if let Some(path) = optional_str(&planned, attr) {
                form = form.file_from_path(part, path).await?;
            }
        }
        if let Some(password) = password(&planned) {
            form = form.text("password", password);
        }

        let request = ApiRequest::post(aliases_path(client, environment, keystore, &[]))
            .query("alias", name)
            .query("format", format)
            .query("ignoreExpiryValidation", flag(&planned, "ignore_expiry_validation", false))
            .query("ignoreNewlineValidation", flag(&planned, "ignore_newline_validation", true));
        let _: Value = client.send_multipart(request, form).await?;

        let (environment, keystore, name) = (environment.to_string(), keystore.to_string(), name.to_string());
        Ok(ApplyResult::new(alias_state(planned, &environment, &keystore, &name)))
    }

    async fn read(&self, client: &ApigeeClient, state: Value) -> Result<Option<Value>, ProviderError> {
        let key = identity::decode(state_id(&state)?, 3)?;
        let path = aliases_path(client, key.segment(0), key.segment(1), &[key.segment(2)]);
        let alias: Alias = match client.get_json(path).await {
            Ok(alias) => alias,
            Err(err) if err.is_absent() => return Ok(None),
            Err(err) => return Err(err),
        };

        let mut refreshed = state;
        for (attr, value) in [
            ("environment_name", key.segment(0)),
            ("keystore_name", key.segment(1)),
            ("name", alias.alias.as_str()),
        ] {
            refreshed = super::with_attr(refreshed, attr, json!(value));
        }
        Ok(Some(alias_state(refreshed, key.segment(0), key.segment(1), &alias.alias)))
    }

    /// Uploads the certificate again; the key stays as it is on the server.
    async fn update(
        &self,
        client: &ApigeeClient,
        _prior: Value,
        planned: Value,
    ) -> Result<ApplyResult, ProviderError> {
        let key = identity::decode(state_id(&planned)?, 3)?;
        if let Some(cert) = optional_str(&planned, "cert_file") {
            debug!(alias = key.segment(2), "replacing alias certificate");
            let form = MultipartForm::new().file_from_path("certFile", cert).await?;
            let request = ApiRequest::post(aliases_path(
                client,
                key.segment(0),
                key.segment(1),
                &[key.segment(2)],
            ))
            .query("ignoreExpiryValidation", flag(&planned, "ignore_expiry_validation", false));
            let _: Value = client.send_multipart(request, form).await?;
        }
        Ok(ApplyResult::new(planned))
    }

    async fn delete(&self, client: &ApigeeClient, state: Value) -> Result<(), ProviderError> {
        let key = identity::decode(state_id(&state)?, 3)?;
        let path = aliases_path(client, key.segment(0), key.segment(1), &[key.segment(2)]);
        match client.delete(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn import_state(&self, id: &str) -> Result<Value, ProviderError> {
        let key = identity::decode(id, 3)?;
        Ok(json!({
            "id": key.encode(),
            "environment_name": key.segment(0),
            "keystore_name": key.segment(1),
            "name": key.segment(2),
        }))
    }
}
