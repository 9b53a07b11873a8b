//! Testing utilities.
//!
//! [`MockTransport`] stands in for the management API: responses are scripted
//! per `(method, path)` and every request is recorded so tests can assert on
//! call order. [`ProviderTester`] drives a [`ProviderService`] through plan and
//! apply without any plugin protocol in between.
//!
//! # Example
//!
//! ```ignore
//! use apigee_provider::testing::{MockTransport, ProviderTester};
//! use apigee_provider::ApigeeProvider;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_keystore() {
//!     let transport = Arc::new(MockTransport::new());
//!     let tester = ProviderTester::new(ApigeeProvider::with_transport(transport.clone()));
//!     tester.configure(json!({"organization": "acme", "access_token": "t"})).await.unwrap();
//!
//!     let state = tester
//!         .create("apigee_keystore", json!({"environment_name": "test", "name": "ks1"}))
//!         .await
//!         .unwrap();
//!     assert_eq!(state["id"], "test:ks1");
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde_json::Value;

use crate::client::{ApiError, ApiRequest, Transport};
use crate::error::ProviderError;
use crate::provider::ProviderService;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::types::{ApplyResult, ImportedResource, PlanResult};

type Response = Result<Bytes, ApiError>;

/// A scripted [`Transport`].
///
/// Responses queue up per `(method, path)`. Each request pops the next one;
/// the last response for a key is sticky and answers every later request.
/// Requests without a script get an empty 200.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<(Method, String), VecDeque<Response>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    /// A transport that answers everything with an empty 200.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `method path`.
    pub fn respond(&self, method: Method, path: &str, response: Result<Bytes, ApiError>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
    }

    /// Queue a JSON response for `method path`.
    pub fn respond_json(&self, method: Method, path: &str, body: Value) {
        self.respond(method, path, Ok(Bytes::from(body.to_string())));
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// `(method, path)` of every request received so far.
    pub fn calls(&self) -> Vec<(Method, String)> {
        self.requests()
            .into_iter()
            .map(|r| (r.method, r.path))
            .collect()
    }

    /// Forget recorded requests, keeping the scripted responses.
    pub fn clear_requests(&self) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<Bytes, ApiError> {
        let key = (request.method.clone(), request.path.clone());
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        match responses.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Ok(Bytes::new())),
            Some(queue) => queue.front().cloned().unwrap_or(Ok(Bytes::new())),
            None => Ok(Bytes::new()),
        }
    }
}

/// A test harness for provider implementations.
///
/// Wraps a [`ProviderService`] and turns diagnostics into errors so tests can
/// use `?`/`unwrap()` throughout.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Create a resource, returning the new state.
    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        Ok(self.create_with_diagnostics(resource_type, planned_state).await?.state)
    }

    /// Create a resource, keeping any warnings.
    pub async fn create_with_diagnostics(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<ApplyResult, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource. `None` means it is gone.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update a resource, returning the new state.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        Ok(self
            .update_with_diagnostics(resource_type, prior_state, planned_state)
            .await?
            .state)
    }

    /// Update a resource, keeping any warnings.
    pub async fn update_with_diagnostics(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<ApplyResult, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run plan → create → read. Fails if the resource reads back as absent.
    pub async fn lifecycle_create(&self, resource_type: &str, config: Value) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read_existing(resource_type, created).await
    }

    /// Run plan → update → read. Fails if the resource reads back as absent.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read_existing(resource_type, updated).await
    }

    async fn read_existing(&self, resource_type: &str, state: Value) -> Result<Value, ProviderError> {
        let id = state
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.read(resource_type, state)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} {}", resource_type, id)))
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            }
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan has no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan does not require resource replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan changes a specific attribute.
///
/// # Panics
///
/// Panics if the plan does not change `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes_attribute(path),
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();
    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| d.severity == DiagnosticSeverity::Error && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_defaults_to_empty_ok() {
        let transport = MockTransport::new();
        let body = transport
            .send(ApiRequest::get("organizations/acme"))
            .await
            .unwrap();
        assert!(body.is_empty());
        assert_eq!(transport.calls(), vec![(Method::GET, "organizations/acme".to_string())]);
    }

    #[tokio::test]
    async fn test_mock_transport_queue_then_sticky() {
        let transport = MockTransport::new();
        transport.respond(Method::DELETE, "p", Err(ApiError::status(500, "")));
        transport.respond(Method::DELETE, "p", Ok(Bytes::new()));

        assert!(transport.send(ApiRequest::delete("p")).await.is_err());
        assert!(transport.send(ApiRequest::delete("p")).await.is_ok());
        assert!(transport.send(ApiRequest::delete("p")).await.is_ok());
        assert_eq!(transport.requests().len(), 3);

        transport.clear_requests();
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_assert_no_errors() {
        assert_no_errors(&[Diagnostic::warning("Just a warning")]);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("An error")]);
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![Diagnostic::error("Conflicting credentials")];
        assert_error_contains(&diagnostics, "Conflicting");
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("organization"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("First error"));
        assert!(display.contains("Second error"));
        assert!(display.contains("organization"));
        assert!(display.contains("More info"));
    }
}
