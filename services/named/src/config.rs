//! Server configuration from flags and environment

use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;

use crate::provisioner::{ProvisionerConfig, DEFAULT_POLICY_REPO_URL};
use crate::request::Zone;
use crate::transfer::HostKeyPolicy;

/// named - provisions OIDC agents and AM policies
#[derive(Parser, Debug, Clone)]
#[command(name = "named", version, about)]
pub struct Config {
    /// Fasit base URL
    #[arg(long, env = "FASIT_URL")]
    pub fasit_url: String,

    /// NAIS cluster this instance runs in, the suffix selects the zone
    #[arg(long, default_value = DEFAULT_CLUSTER, env = "CLUSTER_NAME")]
    pub cluster_name: String,

    /// Zone to serve (fss or sbs), overrides the cluster suffix
    #[arg(long, env = "NAMED_ZONE")]
    pub zone: Option<Zone>,

    /// Port to listen on
    #[arg(long, default_value = "8081", env = "PORT")]
    pub port: u16,

    /// Repository the AM policy files are downloaded from
    #[arg(long, default_value = DEFAULT_POLICY_REPO_URL, env = "POLICY_REPO_URL")]
    pub policy_repo_url: String,

    /// Local directory for staging policy files
    #[arg(long, default_value = "/tmp", env = "STAGING_DIR")]
    pub staging_dir: PathBuf,

    /// Accept any SSH host key instead of checking known_hosts
    #[arg(long, default_value = "false", env = "SSH_SKIP_HOST_KEY_VERIFICATION")]
    pub skip_host_key_verification: bool,
}

impl Config {
    /// Zone from `--zone`, or else from the cluster name
    pub fn zone(&self) -> Result<Zone> {
        match self.zone {
            Some(zone) => Ok(zone),
            None => Zone::from_cluster(&self.cluster_name).with_context(|| {
                format!(
                    "Cannot derive zone from cluster {}, set --zone to fss or sbs",
                    self.cluster_name
                )
            }),
        }
    }

    pub fn host_key_policy(&self) -> HostKeyPolicy {
        HostKeyPolicy::from_skip_flag(self.skip_host_key_verification)
    }

    pub fn provisioner_config(&self) -> Result<ProvisionerConfig> {
        Ok(ProvisionerConfig::new(&self.fasit_url, self.zone()?)
            .with_policy_repo_url(&self.policy_repo_url)
            .with_staging_dir(&self.staging_dir))
    }
}

pub const DEFAULT_CLUSTER: &str = "preprod-fss";

/// NAIS clusters and the domain named is reachable under in each
pub const CLUSTERS: [(&str, &str); 7] = [
    ("nais-dev", "nais.devillo.no"),
    ("dev-fss", "nais.preprod.local"),
    ("prod-fss", "nais.adeo.no"),
    ("preprod-iapp", "nais-iapp.preprod.local"),
    ("prod-iapp", "nais-iapp.adeo.no"),
    ("dev-sbs", "nais.oera-q.local"),
    ("prod-sbs", "nais.oera.no"),
];

/// Base URL of the named instance in a cluster, `https://named.<domain>`
pub fn named_url(cluster: &str) -> Result<String> {
    let cluster = if cluster.is_empty() { DEFAULT_CLUSTER } else { cluster };
    CLUSTERS
        .iter()
        .find(|(name, _)| *name == cluster)
        .map(|(_, domain)| format!("https://named.{}", domain))
        .with_context(|| {
            let names: Vec<&str> = CLUSTERS.iter().map(|(name, _)| *name).collect();
            format!(
                "Cluster {} is not valid, please choose one of: {}",
                cluster,
                names.join(", ")
            )
        })
}

/// Shared outbound HTTP client
pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")
}
