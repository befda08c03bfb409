//! Policy and resource type operations
//!
//! Read-only reporting plus bulk policy import. None of this is on the
//! provisioning path.

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{info, warn};

use super::client::AmSession;
use crate::error::{ProvisionError, ProvisionResult};

/// Kind tag of a policy set document
pub const POLICY_KIND: &str = "am.policy";

/// Kind of the objects in a [`PolicySet`], parsed when the document is read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ObjectKind {
    Policy,
    Unknown(String),
}

impl From<String> for ObjectKind {
    fn from(value: String) -> Self {
        if value == POLICY_KIND {
            ObjectKind::Policy
        } else {
            ObjectKind::Unknown(value)
        }
    }
}

impl From<ObjectKind> for String {
    fn from(value: ObjectKind) -> Self {
        match value {
            ObjectKind::Policy => POLICY_KIND.to_string(),
            ObjectKind::Unknown(kind) => kind,
        }
    }
}

/// Exported or importable set of OpenAM objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    pub kind: ObjectKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub items: Vec<Value>,
}

impl PolicySet {
    pub fn realm(&self) -> &str {
        self.metadata.get("realm").map(String::as_str).unwrap_or("")
    }

    pub fn render(&self, format: ExportFormat) -> ProvisionResult<String> {
        match format {
            ExportFormat::Json => serde_json::to_string_pretty(self).map_err(|e| {
                ProvisionError::upstream("Could not render policy set as json").with_cause(e)
            }),
            ExportFormat::Yaml => serde_yaml::to_string(self).map_err(|e| {
                ProvisionError::upstream("Could not render policy set as yaml").with_cause(e)
            }),
        }
    }

    pub fn parse(content: &str, format: ExportFormat) -> ProvisionResult<Self> {
        match format {
            ExportFormat::Json => serde_json::from_str(content).map_err(|e| {
                ProvisionError::validation("Policy set is not valid json").with_cause(e)
            }),
            ExportFormat::Yaml => serde_yaml::from_str(content).map_err(|e| {
                ProvisionError::validation("Policy set is not valid yaml").with_cause(e)
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Yaml,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            other => Err(format!("unsupported format {}, use json or yaml", other)),
        }
    }
}

/// OpenAM resource type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmResourceType {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub actions: Value,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub creation_date: Option<i64>,
}

/// Envelope of OpenAM query responses
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrestResult<T> {
    #[serde(default = "Vec::new")]
    result: Vec<T>,
    #[serde(default)]
    result_count: i64,
}

fn realm_path(realm: &str) -> String {
    match realm.trim_matches('/') {
        "" => String::new(),
        trimmed => format!("/{}", trimmed),
    }
}

impl AmSession {
    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        what: &str,
    ) -> ProvisionResult<CrestResult<T>> {
        let url = self.request_url(path);
        let response = self.request(Method::GET, path).send().await.map_err(|e| {
            ProvisionError::upstream(format!("Could not list {}", what))
                .with_endpoint(&url)
                .with_cause(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::upstream(format!(
                "Could not list {}: {}",
                what, status
            ))
            .with_endpoint(&url));
        }

        response.json().await.map_err(|e| {
            ProvisionError::upstream(format!("Could not read {}", what))
                .with_endpoint(&url)
                .with_cause(e)
        })
    }

    pub async fn list_resource_types(&self) -> ProvisionResult<Vec<AmResourceType>> {
        let result: CrestResult<AmResourceType> = self
            .query("/json/resourcetypes?_queryFilter=true", "resource types")
            .await?;
        info!(count = result.result_count, "Listed resource types");
        Ok(result.result)
    }

    /// Every policy in a realm as a [`PolicySet`]
    pub async fn fetch_policies(&self, realm: &str) -> ProvisionResult<PolicySet> {
        let path = format!("/json/policies?realm={}&_queryFilter=true", realm);
        let result: CrestResult<Value> = self.query(&path, "policies").await?;

        let mut metadata = BTreeMap::new();
        if !realm.is_empty() {
            metadata.insert("realm".to_string(), realm.to_string());
        }

        Ok(PolicySet {
            kind: ObjectKind::Policy,
            metadata,
            items: result.result,
        })
    }

    /// Export all policies of a realm rendered as json or yaml
    pub async fn export_policies(&self, format: ExportFormat, realm: &str) -> ProvisionResult<String> {
        self.fetch_policies(realm).await?.render(format)
    }

    /// Create every object in the set.
    ///
    /// With `continue_on_error` the remaining items are still attempted and
    /// the last failure is returned.
    pub async fn import_policies(
        &self,
        set: &PolicySet,
        overwrite: bool,
        continue_on_error: bool,
    ) -> ProvisionResult<()> {
        match &set.kind {
            ObjectKind::Policy => {
                let mut last_error = None;
                for policy in &set.items {
                    if let Err(e) = self.create_policy(policy, overwrite, set.realm()).await {
                        if !continue_on_error {
                            return Err(e);
                        }
                        warn!("Policy import failed, continuing: {}", e);
                        last_error = Some(e);
                    }
                }
                last_error.map_or(Ok(()), Err)
            }
            ObjectKind::Unknown(kind) => Err(ProvisionError::validation(format!(
                "Unknown object type {}",
                kind
            ))),
        }
    }

    /// Create a single policy, deleting any existing one first when `overwrite`
    pub async fn create_policy(&self, policy: &Value, overwrite: bool, realm: &str) -> ProvisionResult<()> {
        let name = policy
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ProvisionError::validation("Policy has no name"))?;

        if overwrite {
            if let Err(e) = self.delete_policy(name, realm).await {
                warn!(policy = %name, "Could not delete policy: {}", e);
            }
        }

        let path = format!("{}/policies?_action=create", self.policies_base(realm));
        let url = self.request_url(&path);
        let response = self
            .request(Method::POST, &path)
            .json(policy)
            .send()
            .await
            .map_err(|e| {
                ProvisionError::upstream(format!("Could not create policy {}", name))
                    .with_endpoint(&url)
                    .with_cause(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::upstream(format!(
                "Policy {} could not be created: {} {}",
                name, status, body
            ))
            .with_endpoint(&url));
        }

        info!(policy = %name, realm = %realm, "Policy created");
        Ok(())
    }

    /// Delete a policy. A policy that does not exist is not an error.
    pub async fn delete_policy(&self, name: &str, realm: &str) -> ProvisionResult<()> {
        let path = format!("{}/policies/{}", self.policies_base(realm), name);
        let url = self.request_url(&path);
        let response = self
            .request(Method::DELETE, &path)
            .send()
            .await
            .map_err(|e| {
                ProvisionError::upstream(format!("Could not delete policy {}", name))
                    .with_endpoint(&url)
                    .with_cause(e)
            })?;

        match response.status() {
            StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            status => Err(ProvisionError::upstream(format!(
                "Error deleting policy {}: {}",
                name, status
            ))
            .with_endpoint(&url)),
        }
    }

    fn policies_base(&self, realm: &str) -> String {
        format!("/json{}", realm_path(realm))
    }
}
