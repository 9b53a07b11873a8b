//! Apigee provider
//!
//! Manages Apigee entities (API proxies, shared flows, their deployments,
//! policies, target servers, key value maps, keystores and aliases) as
//! declarative resources with create/read/update/delete callbacks.
//!
//! # Overview
//!
//! - **Identity codec** ([`identity`]): one opaque string ID per resource,
//!   reversibly encoding the entity's compound path.
//! - **Revision selector** ([`revision`]): the numerically greatest revision
//!   of a listing.
//! - **Deployment reconciler** ([`deployment`]): deploys the target revision,
//!   then undeploys every other revision of the artifact in the environment.
//! - **Resource handlers** ([`resources`]): one per resource type.
//! - **Provider service** ([`ProviderService`], [`ApigeeProvider`]): schema,
//!   configure, plan and CRUD dispatch.
//!
//! # Quick Start
//!
//! ```ignore
//! use apigee_provider::{ApigeeProvider, ProviderService};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     apigee_provider::init_logging();
//!
//!     let provider = ApigeeProvider::new();
//!     provider
//!         .configure(json!({"organization": "acme", "access_token": "..."}))
//!         .await?;
//!
//!     let plan = provider
//!         .plan(
//!             "apigee_proxy_deployment",
//!             None,
//!             json!({"proxy_name": "orders-api", "environment_name": "test", "revision": 7}),
//!             json!({}),
//!         )
//!         .await?;
//!     let applied = provider.create("apigee_proxy_deployment", plan.planned_state).await?;
//!     for warning in &applied.diagnostics {
//!         tracing::warn!("{}", warning.summary);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! The management API flavor is fixed by configuration: the Google Cloud
//! server selects [`config::Backend::Cloud`], anything else
//! [`config::Backend::Legacy`]. Deployment `delay` is legacy-only and
//! `service_account` is cloud-only.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod deployment;
pub mod error;
pub mod identity;
pub mod logging;
pub mod provider;
pub mod resources;
pub mod revision;
pub mod schema;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{ApigeeProvider, ProviderService};
pub use schema::ProviderSchema;
pub use types::{ApplyResult, AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
