//! `HttpTransport` against a local HTTP server.

use apigee_provider::client::{ApiRequest, ApigeeClient, HttpTransport, Transport};
use apigee_provider::config::{Backend, Credentials, ProviderConfig};
use apigee_provider::deployment::{ArtifactKind, DeploymentDesiredState, Reconciler};
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn local_config(server: &MockServer) -> ProviderConfig {
    ProviderConfig {
        organization: Some("acme".to_string()),
        server: Some("127.0.0.1".to_string()),
        port: Some(u32::from(server.address().port())),
        use_ssl: Some(false),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_bearer_token_and_status_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/organizations/acme/environments/test/keystores/ks1"))
        .and(header("authorization", "Bearer t0ken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "ks1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/organizations/acme/environments/test/keystores/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("{\"code\": \"notFound\"}"))
        .mount(&server)
        .await;

    let transport = HttpTransport::with_client(
        reqwest::Client::new(),
        format!("{}/v1", server.uri()),
        Credentials::Bearer("t0ken".to_string()),
    );

    let body = transport
        .send(ApiRequest::get("organizations/acme/environments/test/keystores/ks1"))
        .await
        .unwrap();
    assert_eq!(&body[..], br#"{"name":"ks1"}"#);

    let err = transport
        .send(ApiRequest::get("organizations/acme/environments/test/keystores/gone"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("notFound"));
}

#[tokio::test]
async fn test_oauth_exchange_at_connect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=deployer"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "issued"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/organizations/acme/environments/test/keystores/ks1"))
        .and(header("authorization", "Bearer issued"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = ProviderConfig {
        username: Some("deployer".to_string()),
        password: Some("secret".to_string()),
        oauth_server: Some("127.0.0.1".to_string()),
        oauth_port: Some(u32::from(server.address().port())),
        ..local_config(&server)
    };
    let transport = HttpTransport::connect(&config).await.unwrap();
    transport
        .send(ApiRequest::delete("organizations/acme/environments/test/keystores/ks1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_oauth_rejection_fails_connect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let config = ProviderConfig {
        username: Some("deployer".to_string()),
        password: Some("wrong".to_string()),
        oauth_server: Some("127.0.0.1".to_string()),
        oauth_port: Some(u32::from(server.address().port())),
        ..local_config(&server)
    };
    let err = HttpTransport::connect(&config).await.unwrap_err();
    assert_eq!(err.status_code(), Some(401));
}

#[tokio::test]
async fn test_deploy_is_form_encoded_with_override() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(
            "/v1/organizations/acme/environments/test/apis/orders-api/revisions/7/deployments",
        ))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("override=true"))
        .and(body_string_contains("delay=15"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/organizations/acme/environments/test/apis/orders-api/deployments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "environment": "test",
            "name": "orders-api",
            "revision": [{"name": "7", "state": "deployed"}]
        })))
        .mount(&server)
        .await;

    let config = ProviderConfig {
        access_token: Some("t".to_string()),
        ..local_config(&server)
    };
    let transport = HttpTransport::connect(&config).await.unwrap();
    let client = ApigeeClient::new(Arc::new(transport), "acme", Backend::Legacy);

    let desired =
        DeploymentDesiredState::new(ArtifactKind::Proxy, "orders-api", "test", 7).with_delay(15);
    let report = Reconciler::new(&client).reconcile(&desired).await.unwrap();
    assert!(report.pruned.is_empty());
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_query_parameters_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/organizations/acme/apis"))
        .and(query_param("action", "import"))
        .and(query_param("name", "orders-api"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"revision": "1"})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::with_client(
        reqwest::Client::new(),
        format!("{}/v1/", server.uri()),
        Credentials::Basic {
            username: "u".to_string(),
            password: "p".to_string(),
        },
    );
    transport
        .send(
            ApiRequest::post("organizations/acme/apis")
                .query("action", "import")
                .query("name", "orders-api"),
        )
        .await
        .unwrap();
}
