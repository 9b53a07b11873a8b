//! reqwest-backed [`Transport`].

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, info};

use super::{ApiError, ApiRequest, Part, RequestBody, Transport, FORM_ENCODED};
use crate::config::{Credentials, ProviderConfig};
use crate::error::ProviderError;

/// Path of the password-grant token endpoint on the OAuth server.
pub const OAUTH_TOKEN_PATH: &str = "oauth/token";

/// Client credentials of the Apigee CLI (`edgecli:edgeclisecret`), used for
/// the password grant.
const SSO_CLIENT_CREDENTIALS: &str = "ZWRnZWNsaTplZGdlY2xpc2VjcmV0";

#[derive(Debug, Deserialize)]
struct OauthToken {
    access_token: String,
}

/// Sends [`ApiRequest`]s over HTTPS with the configured credentials.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpTransport {
    /// Build a transport from a validated configuration.
    ///
    /// When `oauth_server` is set, a bearer token is obtained first with the
    /// configured username and password.
    pub async fn connect(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let credentials = config.credentials().ok_or_else(|| {
            ProviderError::Configuration(
                "You must specify either username/password for Basic Authentication or access_token"
                    .to_string(),
            )
        })?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        let credentials = match (config.oauth_server.as_deref(), credentials) {
            (Some(oauth_server), Credentials::Basic { username, password }) => {
                let token = fetch_token(&http, config, oauth_server, &username, &password).await?;
                Credentials::Bearer(token)
            }
            (_, credentials) => credentials,
        };

        Ok(Self::with_client(http, base_url(config), credentials))
    }

    /// Build a transport around an existing client and base URL.
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>, credentials: Credentials) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            http,
            base_url,
            credentials,
        }
    }

    /// The base URL requests are resolved against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build(&self, request: ApiRequest) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, request.path.trim_start_matches('/'));
        let mut builder = self.http.request(request.method, url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        builder = match &self.credentials {
            Credentials::Bearer(token) => builder.bearer_auth(token),
            Credentials::Basic { username, password } => builder.basic_auth(username, Some(password)),
        };

        match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Multipart(form) => {
                let mut multipart = reqwest::multipart::Form::new();
                for part in form.parts().iter().cloned() {
                    multipart = match part {
                        Part::Text { name, value } => multipart.text(name, value),
                        Part::File {
                            name,
                            filename,
                            bytes,
                        } => multipart.part(
                            name,
                            reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(filename),
                        ),
                    };
                }
                builder.multipart(multipart)
            }
            RequestBody::Raw {
                content_type,
                bytes,
            } => builder.header(CONTENT_TYPE, content_type).body(bytes),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<Bytes, ApiError> {
        let method = request.method.clone();
        let path = request.path.clone();
        debug!(%method, path = %path, query = ?request.query, "Apigee Management API request");

        let response = self.build(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!(%method, path = %path, status = status.as_u16(), "Apigee Management API response");

        if !status.is_success() {
            return Err(ApiError::status(
                status.as_u16(),
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }
        Ok(body)
    }
}

fn base_url(config: &ProviderConfig) -> String {
    let root = format!("{}://{}:{}/", config.scheme(), config.server(), config.port());
    match config.server_path().trim_matches('/') {
        "" => root,
        path => format!("{}{}/", root, path),
    }
}

fn token_url(config: &ProviderConfig, oauth_server: &str) -> String {
    match config.oauth_server_path.as_deref().filter(|p| !p.is_empty()) {
        Some(path) => format!(
            "{}://{}:{}/{}/{}",
            config.scheme(),
            oauth_server,
            config.oauth_port(),
            path.trim_matches('/'),
            OAUTH_TOKEN_PATH
        ),
        None => format!(
            "{}://{}:{}/{}",
            config.scheme(),
            oauth_server,
            config.oauth_port(),
            OAUTH_TOKEN_PATH
        ),
    }
}

async fn fetch_token(
    http: &reqwest::Client,
    config: &ProviderConfig,
    oauth_server: &str,
    username: &str,
    password: &str,
) -> Result<String, ProviderError> {
    info!(oauth_server, "Apigee Management API: obtaining access token");
    let form = [
        ("grant_type", "password"),
        ("username", username),
        ("password", password),
    ];
    let response = http
        .post(token_url(config, oauth_server))
        .header(AUTHORIZATION, format!("Basic {}", SSO_CLIENT_CREDENTIALS))
        .header(CONTENT_TYPE, FORM_ENCODED)
        .form(&form)
        .send()
        .await
        .map_err(ApiError::from)?;

    let status = response.status();
    let body = response.bytes().await.map_err(ApiError::from)?;
    if !status.is_success() {
        return Err(ApiError::status(status.as_u16(), String::from_utf8_lossy(&body).into_owned()).into());
    }

    let token: OauthToken = serde_json::from_slice(&body)?;
    debug!("Apigee Management API: received access token");
    Ok(token.access_token)
}
