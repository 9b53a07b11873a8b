//! Provider configuration.
//!
//! The provider block is deserialized into [`ProviderConfig`]. Any field left
//! unset falls back to its `APIGEE_*` environment variable, then to the
//! built-in default.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::{Attribute, Diagnostic, Schema};

/// Host of the Apigee Edge public cloud management API.
pub const PUBLIC_APIGEE_SERVER: &str = "api.enterprise.apigee.com";

/// Host of the Google Cloud (Apigee X / hybrid) management API.
pub const GOOGLE_APIGEE_SERVER: &str = "apigee.googleapis.com";

/// Default path prefix on the management server.
pub const DEFAULT_SERVER_PATH: &str = "v1";

/// Default HTTPS port.
pub const DEFAULT_PORT: u16 = 443;

/// Which management API flavor the provider talks to.
///
/// Chosen from configuration, never from the shape of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Apigee Edge (public cloud or private install).
    Legacy,
    /// Apigee on Google Cloud.
    Cloud,
}

impl Backend {
    /// Detect the backend from the configured management server.
    pub fn from_server(server: &str) -> Self {
        if server == GOOGLE_APIGEE_SERVER {
            Self::Cloud
        } else {
            Self::Legacy
        }
    }

    /// Whether deployments accept a `delay` drain period.
    pub fn supports_delay(self) -> bool {
        self == Self::Legacy
    }

    /// Whether deployments accept a `serviceAccount` identity.
    pub fn supports_service_account(self) -> bool {
        self == Self::Cloud
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => f.write_str("legacy"),
            Self::Cloud => f.write_str("cloud"),
        }
    }
}

/// Credentials attached to every management API request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// HTTP basic authentication.
    Basic {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
    /// A pre-issued OAuth bearer token.
    Bearer(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}

/// The provider block.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Basic-auth user, also used for the OAuth password grant.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
    /// Pre-issued bearer token. Conflicts with `username`/`password`.
    pub access_token: Option<String>,
    /// Management server host.
    pub server: Option<String>,
    /// Path prefix on the management server.
    pub server_path: Option<String>,
    /// Management server port.
    pub port: Option<u32>,
    /// Use `https` (default) or plain `http`.
    pub use_ssl: Option<bool>,
    /// OAuth server host. When set, a token is obtained at configure time.
    pub oauth_server: Option<String>,
    /// Path prefix on the OAuth server.
    pub oauth_server_path: Option<String>,
    /// OAuth server port.
    pub oauth_port: Option<u32>,
    /// Apigee organization all resources belong to.
    pub organization: Option<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("server", &self.server)
            .field("server_path", &self.server_path)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("oauth_server", &self.oauth_server)
            .field("oauth_server_path", &self.oauth_server_path)
            .field("oauth_port", &self.oauth_port)
            .field("organization", &self.organization)
            .finish()
    }
}

impl ProviderConfig {
    /// Fill unset fields from `APIGEE_*` environment variables.
    pub fn with_env_defaults(self) -> Self {
        self.with_defaults_from(|name| std::env::var(name).ok())
    }

    /// Fill unset fields from an arbitrary variable lookup.
    pub fn with_defaults_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |current: Option<String>, name: &str| {
            current.or_else(|| lookup(name).filter(|v| !v.is_empty()))
        };
        self.username = text(self.username, "APIGEE_USERNAME");
        self.password = text(self.password, "APIGEE_PASSWORD");
        self.access_token = text(self.access_token, "APIGEE_ACCESS_TOKEN");
        self.server = text(self.server, "APIGEE_SERVER");
        self.server_path = text(self.server_path, "APIGEE_SERVER_PATH");
        self.oauth_server = text(self.oauth_server, "APIGEE_OAUTH_SERVER");
        self.oauth_server_path = text(self.oauth_server_path, "APIGEE_OAUTH_SERVER_PATH");
        self.organization = text(self.organization, "APIGEE_ORGANIZATION");
        if self.port.is_none() {
            self.port = lookup("APIGEE_PORT").and_then(|v| v.parse().ok());
        }
        if self.oauth_port.is_none() {
            self.oauth_port = lookup("APIGEE_OAUTH_PORT").and_then(|v| v.parse().ok());
        }
        if self.use_ssl.is_none() {
            self.use_ssl = lookup("APIGEE_USE_SSL").and_then(|v| v.parse().ok());
        }
        self
    }

    /// Check the configuration, returning one diagnostic per problem.
    pub fn validate(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());

        if !set(&self.organization) {
            diagnostics.push(
                Diagnostic::error("Missing required attribute 'organization'")
                    .with_detail("Set it in the provider block or via APIGEE_ORGANIZATION")
                    .with_attribute("organization"),
            );
        }

        let has_basic = set(&self.username) || set(&self.password);
        let has_token = set(&self.access_token);
        if has_basic && has_token {
            diagnostics.push(
                Diagnostic::error("Conflicting credentials")
                    .with_detail("access_token cannot be combined with username/password")
                    .with_attribute("access_token"),
            );
        } else if !has_basic && !has_token {
            diagnostics.push(Diagnostic::error(
                "You must specify either username/password for Basic Authentication or access_token",
            ));
        } else if has_basic && !(set(&self.username) && set(&self.password)) {
            diagnostics.push(
                Diagnostic::error("username and password must be set together")
                    .with_attribute(if set(&self.username) { "password" } else { "username" }),
            );
        }

        for (name, port) in [("port", self.port), ("oauth_port", self.oauth_port)] {
            if let Some(port) = port {
                if port > u32::from(u16::MAX) {
                    diagnostics.push(
                        Diagnostic::error(format!("{} must be between 0 and 65535", name))
                            .with_attribute(name),
                    );
                }
            }
        }

        if set(&self.oauth_server) && !has_basic {
            diagnostics.push(
                Diagnostic::error("oauth_server requires username and password")
                    .with_attribute("oauth_server"),
            );
        }

        diagnostics
    }

    /// The organization name, or an empty string if unset.
    pub fn organization(&self) -> &str {
        self.organization.as_deref().unwrap_or_default()
    }

    /// The management server host.
    pub fn server(&self) -> &str {
        self.server.as_deref().unwrap_or(PUBLIC_APIGEE_SERVER)
    }

    /// The management server path prefix.
    pub fn server_path(&self) -> &str {
        self.server_path.as_deref().unwrap_or(DEFAULT_SERVER_PATH)
    }

    /// The management server port.
    pub fn port(&self) -> u16 {
        self.port
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// The OAuth server port.
    pub fn oauth_port(&self) -> u16 {
        self.oauth_port
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// `https` unless `use_ssl` is explicitly false.
    pub fn scheme(&self) -> &'static str {
        if self.use_ssl.unwrap_or(true) {
            "https"
        } else {
            "http"
        }
    }

    /// The backend selected by the configured server.
    pub fn backend(&self) -> Backend {
        Backend::from_server(self.server())
    }

    /// The credentials to attach before any OAuth exchange.
    pub fn credentials(&self) -> Option<Credentials> {
        if let Some(token) = self.access_token.as_deref().filter(|t| !t.is_empty()) {
            return Some(Credentials::Bearer(token.to_string()));
        }
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(username), Some(password)) if !username.is_empty() => Some(Credentials::Basic {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => None,
        }
    }

    /// Schema of the provider block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "username",
                Attribute::optional_string().with_description("Basic-auth user (APIGEE_USERNAME)"),
            )
            .with_attribute(
                "password",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("Basic-auth password (APIGEE_PASSWORD)"),
            )
            .with_attribute(
                "access_token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("Bearer token (APIGEE_ACCESS_TOKEN)"),
            )
            .with_attribute(
                "server",
                Attribute::optional_string()
                    .with_default(serde_json::json!(PUBLIC_APIGEE_SERVER)),
            )
            .with_attribute(
                "server_path",
                Attribute::optional_string().with_default(serde_json::json!(DEFAULT_SERVER_PATH)),
            )
            .with_attribute(
                "port",
                Attribute::optional_int64()
                    .with_range(0, i64::from(u16::MAX))
                    .with_default(serde_json::json!(DEFAULT_PORT)),
            )
            .with_attribute("use_ssl", Attribute::optional_bool())
            .with_attribute("oauth_server", Attribute::optional_string())
            .with_attribute("oauth_server_path", Attribute::optional_string())
            .with_attribute(
                "oauth_port",
                Attribute::optional_int64().with_range(0, i64::from(u16::MAX)),
            )
            .with_attribute(
                "organization",
                Attribute::optional_string()
                    .with_description("Apigee organization (APIGEE_ORGANIZATION)"),
            )
    }
}
