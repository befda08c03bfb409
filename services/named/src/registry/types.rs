//! Fasit resource types
//!
//! Only the fields the provisioning workflow reads or writes are modelled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of a Fasit resource, parsed once at the boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceType {
    BaseUrl,
    Credential,
    OpenAm,
    OpenIdConnect,
    LoadBalancerConfig,
    /// Any type this service does not act on
    Other(String),
}

impl ResourceType {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceType::BaseUrl => "BaseUrl",
            ResourceType::Credential => "Credential",
            ResourceType::OpenAm => "OpenAM",
            ResourceType::OpenIdConnect => "OpenIdConnect",
            ResourceType::LoadBalancerConfig => "LoadBalancerConfig",
            ResourceType::Other(name) => name,
        }
    }
}

impl From<String> for ResourceType {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "baseurl" => ResourceType::BaseUrl,
            "credential" => ResourceType::Credential,
            "openam" => ResourceType::OpenAm,
            "openidconnect" => ResourceType::OpenIdConnect,
            "loadbalancerconfig" => ResourceType::LoadBalancerConfig,
            _ => ResourceType::Other(value),
        }
    }
}

impl From<ResourceType> for String {
    fn from(value: ResourceType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alias and type identifying a resource within a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub alias: String,
    pub resource_type: ResourceType,
}

impl ResourceRequest {
    pub fn new(alias: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            alias: alias.into(),
            resource_type,
        }
    }
}

/// Where a resource applies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(rename = "environmentclass")]
    pub environment_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
}

/// Pointer to a secret stored in Fasit. The value itself is only available
/// through a second, authenticated request to `reference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    #[serde(rename = "ref")]
    pub reference: String,
}

/// A resource as returned by `GET /api/v2/scopedresource`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopedResource {
    #[serde(default)]
    pub id: Option<i64>,
    pub alias: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretRef>,
}

impl ScopedResource {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Plaintext secret in a resource written to Fasit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretValue {
    pub value: String,
}

/// Body of `POST /api/v2/resources` and `PUT /api/v2/resources/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub alias: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub scope: Scope,
    pub properties: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, SecretValue>,
}

/// Whether a publish creates a new resource or replaces an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    Create,
    Update(i64),
}

/// `GET /api/v2/environments/{name}` response
#[derive(Debug, Deserialize)]
pub(crate) struct FasitEnvironment {
    #[serde(rename = "environmentclass")]
    pub environment_class: String,
}

/// AM host credentials used by the sbs policy strategy
#[derive(Debug, Clone)]
pub struct OpenAmResource {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

/// OIDC provider endpoints and credentials used by the fss agent strategy
#[derive(Debug, Clone)]
pub struct IssoResource {
    pub oidc_url: String,
    pub oidc_username: String,
    pub oidc_password: String,
    pub oidc_agent_password: String,
    pub issuer_url: String,
    pub jwks_url: String,
    /// Load balancer host, when the application has one registered
    pub loadbalancer_host: Option<String>,
}
