//! Configuration requests and zones

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ProvisionError;

/// Network zone the application lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    /// Inner zone (fss), applications get an OIDC agent
    Fss,
    /// Outer zone (sbs), applications get AM policy files
    Sbs,
}

impl Zone {
    /// Zone served by a NAIS cluster, taken from the cluster name suffix
    /// (`preprod-fss`, `prod-sbs`, ...).
    pub fn from_cluster(cluster_name: &str) -> Option<Zone> {
        let suffix = cluster_name.rsplit('-').next()?;
        suffix.parse().ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Fss => "fss",
            Zone::Sbs => "sbs",
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Zone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fss" | "secure" => Ok(Zone::Fss),
            "sbs" | "outer" => Ok(Zone::Sbs),
            other => Err(format!("unknown zone {}", other)),
        }
    }
}

/// Inbound payload of `POST /configure`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigurationRequest {
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, rename = "contextroots")]
    pub context_roots: Vec<String>,
}

/// A request that passed validation. Fields are immutable from here on.
#[derive(Debug, Clone)]
pub struct ValidRequest {
    application: String,
    version: String,
    environment: String,
    zone: Zone,
    username: String,
    password: String,
    context_roots: Vec<String>,
}

impl ValidRequest {
    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn context_roots(&self) -> &[String] {
        &self.context_roots
    }

    /// Name of the OIDC agent for this application, `<application>-<environment>`
    pub fn agent_name(&self) -> String {
        format!("{}-{}", self.application, self.environment)
    }
}

/// Whether `value` can be used as one segment of a file path or URL path.
///
/// Application, version and environment end up in staging directories, in
/// the remote directory the policy script reads and in registry URLs.
pub fn is_path_segment(value: &str) -> bool {
    !value.contains(['/', '\\'])
        && !value.contains("..")
        && !value.chars().any(char::is_control)
}

impl ConfigurationRequest {
    /// Check every field and report all problems, not just the first one.
    pub fn validation_errors(&self) -> Vec<String> {
        let required: [(&str, &str); 6] = [
            ("Application", self.application.as_str()),
            ("Version", self.version.as_str()),
            ("Environment", self.environment.as_str()),
            ("Zone", self.zone.as_str()),
            ("Username", self.username.as_str()),
            ("Password", self.password.as_str()),
        ];

        let mut errors: Vec<String> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| format!("{} is required and is empty", field))
            .collect();

        let segments: [(&str, &str); 3] = [
            ("Application", self.application.as_str()),
            ("Version", self.version.as_str()),
            ("Environment", self.environment.as_str()),
        ];
        errors.extend(
            segments
                .iter()
                .filter(|(_, value)| !value.is_empty() && !is_path_segment(value))
                .map(|(field, _)| {
                    format!("{} must not contain '/', '\\', '..' or control characters", field)
                }),
        );

        match self.zone.parse::<Zone>() {
            Ok(Zone::Fss) => {
                if self.context_roots.iter().all(|root| root.trim().is_empty()) {
                    errors.push("Contextroots is required for zone fss".to_string());
                }
            }
            Ok(Zone::Sbs) => {}
            Err(_) => errors.push("Zone can only be fss or sbs".to_string()),
        }

        errors
    }

    /// Turn the raw payload into a [`ValidRequest`], or a Validation error
    /// listing every problem.
    pub fn validate(self) -> Result<ValidRequest, ProvisionError> {
        let errors = self.validation_errors();
        if !errors.is_empty() {
            return Err(ProvisionError::validation(format!(
                "Invalid configuration request: {}",
                errors.join("; ")
            )));
        }

        let zone = self
            .zone
            .parse::<Zone>()
            .map_err(ProvisionError::validation)?;

        Ok(ValidRequest {
            application: self.application,
            version: self.version,
            environment: self.environment,
            zone,
            username: self.username,
            password: self.password,
            context_roots: self
                .context_roots
                .into_iter()
                .filter(|root| !root.trim().is_empty())
                .collect(),
        })
    }
}
