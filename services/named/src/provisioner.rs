//! Zone provisioning
//!
//! A configuration request is validated, checked against the zone this
//! instance serves, verified in Fasit and then handed to exactly one of two
//! strategies:
//!
//! - **fss**: create (or replace) an OIDC agent in OpenAM and publish its
//!   connection details back to Fasit.
//! - **sbs**: download the application's AM policy files, copy them to the
//!   OpenAM host and run the policy script there.
//!
//! Steps run strictly in order and the first failure aborts the request.
//! Nothing is rolled back: an agent created before a failed publish stays.
//!
//! Agent replacement is delete-then-create. Two concurrent requests for the
//! same agent can interleave, OpenAM offers no conditional write to prevent it.

use reqwest::Client;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, ProvisionError, ProvisionResult};
use crate::identity::AmClient;
use crate::metrics::Metrics;
use crate::policy_files::{domain_for, PolicyFileSet};
use crate::registry::{
    FasitClient, IssoResource, PublishMode, ResourcePayload, ResourceRequest, ResourceType, Scope,
    SecretValue,
};
use crate::request::{ConfigurationRequest, ValidRequest, Zone};
use crate::transfer::{RemoteTransfer, TransferSession, TransferTarget};
use crate::urls::{build_urls, ingress_hosts};

pub const DEFAULT_POLICY_REPO_URL: &str = "https://repo.adeo.no/repositories/raw/nais";
pub const AM_POLICY_SCRIPT: &str = "sudo python /opt/openam/scripts/openam_policy.py";

/// Settings fixed for the lifetime of the service
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Fasit base URL
    pub fasit_url: String,
    /// Zone this instance provisions for
    pub zone: Zone,
    pub policy_repo_url: String,
    /// Local directory policy files are staged in
    pub staging_dir: PathBuf,
}

impl ProvisionerConfig {
    pub fn new(fasit_url: impl Into<String>, zone: Zone) -> Self {
        Self {
            fasit_url: fasit_url.into(),
            zone,
            policy_repo_url: DEFAULT_POLICY_REPO_URL.to_string(),
            staging_dir: std::env::temp_dir(),
        }
    }

    pub fn with_policy_repo_url(mut self, url: impl Into<String>) -> Self {
        self.policy_repo_url = url.into();
        self
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }
}

/// Drives one configuration request to completion
pub struct Provisioner {
    http_client: Client,
    config: ProvisionerConfig,
    metrics: Arc<Metrics>,
    transfer: Arc<dyn RemoteTransfer>,
}

impl Provisioner {
    pub fn new(
        http_client: Client,
        config: ProvisionerConfig,
        metrics: Arc<Metrics>,
        transfer: Arc<dyn RemoteTransfer>,
    ) -> Self {
        Self {
            http_client,
            config,
            metrics,
            transfer,
        }
    }

    pub fn zone(&self) -> Zone {
        self.config.zone
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Provision identity configuration for one application.
    ///
    /// Returns a confirmation message, or the first error encountered.
    pub async fn provision(&self, request: ConfigurationRequest) -> ProvisionResult<String> {
        let request = request.validate()?;
        let application = request.application();
        let environment = request.environment();

        if request.zone() != self.config.zone {
            return Err(ProvisionError::validation(format!(
                "Zone {} does not match zone {} served by this instance",
                request.zone(),
                self.config.zone
            )));
        }

        info!(
            application = %application,
            environment = %environment,
            zone = %request.zone(),
            version = %request.version(),
            "Starting configuration"
        );

        let fasit = FasitClient::new(
            self.http_client.clone(),
            &self.config.fasit_url,
            request.username(),
            request.password(),
            Arc::clone(&self.metrics),
        );

        let environment_class = fasit
            .get_environment_class(environment)
            .await
            .map_err(|e| e.context(format!("Could not find environment {} in Fasit", environment)))?;
        fasit
            .application_exists(application)
            .await
            .map_err(|e| e.context(format!("Could not find application {} in Fasit", application)))?;

        debug!(environment = %environment, class = %environment_class, "Prerequisites verified");

        let result = match request.zone() {
            Zone::Sbs => self.configure_policies(&fasit, &request, &environment_class).await?,
            Zone::Fss => self.configure_agent(&fasit, &request, &environment_class).await?,
        };

        self.metrics.configuration_done(application);
        info!(application = %application, environment = %environment, "{}", result);
        Ok(result)
    }

    /// sbs: stage, check and rewrite the policy files, copy them to the AM
    /// host and run the policy script.
    async fn configure_policies(
        &self,
        fasit: &FasitClient,
        request: &ValidRequest,
        environment_class: &str,
    ) -> ProvisionResult<String> {
        let application = request.application();
        let environment = request.environment();

        let openam = fasit
            .get_openam_resource(environment, application, request.zone())
            .await
            .map_err(|e| e.context("Fasit OpenAM resource unavailable"))?;

        let files = PolicyFileSet::download(
            &self.http_client,
            &self.config.policy_repo_url,
            &self.config.staging_dir,
            application,
            request.version(),
        )
        .await?;
        files.validate()?;
        files
            .rewrite_domain(&domain_for(environment_class, environment))
            .await?;

        let target = TransferTarget::new(openam.hostname, openam.username, openam.password);
        let mut session = self.transfer.open(&target).await?;

        let remote_dir = format!("/tmp/{}", application);
        let command = format!("{} {} {}", AM_POLICY_SCRIPT, application, application);
        let outcome = transfer_and_run(session.as_mut(), files.paths(), &remote_dir, &command).await;

        if let Err(e) = session.close().await {
            warn!(host = %target.host, "Could not close session: {}", e);
        }
        let output = outcome?;
        debug!(application = %application, output = %output.trim(), "Policy script output");

        Ok(format!("AM policy configured for {} in {}", application, environment))
    }

    /// fss: replace the application's OIDC agent and publish it to Fasit.
    async fn configure_agent(
        &self,
        fasit: &FasitClient,
        request: &ValidRequest,
        environment_class: &str,
    ) -> ProvisionResult<String> {
        let application = request.application();
        let environment = request.environment();
        let zone = request.zone();

        let isso = fasit
            .get_isso_resource(environment, application, zone)
            .await
            .map_err(|e| e.context("Fasit OIDC resource unavailable"))?;

        let ingress = ingress_hosts(environment_class, zone, application, environment);
        let redirection_uris = build_urls(
            environment,
            isso.loadbalancer_host.as_deref(),
            &ingress,
            request.context_roots(),
        );

        let session = AmClient::new(self.http_client.clone(), &isso.oidc_url)
            .authenticate(&isso.oidc_username, &isso.oidc_password)
            .await?;

        let agent_name = request.agent_name();
        if session.agent_exists(&agent_name).await {
            if let Err(e) = session.delete_agent(&agent_name).await {
                warn!(agent = %agent_name, "Could not delete existing agent: {}", e);
            }
        }
        session
            .create_agent(&agent_name, &redirection_uris, &isso.oidc_agent_password)
            .await?;

        self.publish_agent(fasit, request, environment_class, &agent_name, &isso)
            .await?;

        Ok(format!(
            "OIDC agent {} configured for {} in {} with redirection URIs: {}",
            agent_name,
            application,
            environment,
            redirection_uris.join(", ")
        ))
    }

    /// Write an `OpenIdConnect` resource describing the agent, replacing the
    /// one from an earlier run if Fasit has it.
    async fn publish_agent(
        &self,
        fasit: &FasitClient,
        request: &ValidRequest,
        environment_class: &str,
        agent_name: &str,
        isso: &IssoResource,
    ) -> ProvisionResult<()> {
        let application = request.application();
        let environment = request.environment();
        let alias = format!("{}-oidc", application);

        let existing = fasit
            .get_scoped_resource(
                &ResourceRequest::new(&alias, ResourceType::OpenIdConnect),
                environment,
                application,
                request.zone(),
            )
            .await;
        let mode = match existing {
            Ok(resource) => match resource.id {
                Some(id) => PublishMode::Update(id),
                None => PublishMode::Create,
            },
            Err(e) if e.kind() == ErrorKind::NotFound => PublishMode::Create,
            Err(e) => return Err(e),
        };

        let properties = BTreeMap::from([
            ("agentName".to_string(), agent_name.to_string()),
            ("hostUrl".to_string(), isso.oidc_url.clone()),
            ("issuerUrl".to_string(), isso.issuer_url.clone()),
            ("jwksUrl".to_string(), isso.jwks_url.clone()),
        ]);
        let secrets = BTreeMap::from([(
            "password".to_string(),
            SecretValue {
                value: isso.oidc_agent_password.clone(),
            },
        )]);

        let payload = ResourcePayload {
            id: match mode {
                PublishMode::Update(id) => Some(id),
                PublishMode::Create => None,
            },
            alias,
            resource_type: ResourceType::OpenIdConnect,
            scope: Scope {
                environment_class: environment_class.to_string(),
                environment: Some(environment.to_string()),
                zone: Some(request.zone().to_string()),
                application: Some(application.to_string()),
            },
            properties,
            secrets,
        };

        fasit
            .publish_resource(&payload, mode)
            .await
            .map_err(|e| e.context(format!("Could not publish OIDC agent {} to Fasit", agent_name)))
    }
}

async fn transfer_and_run(
    session: &mut dyn TransferSession,
    files: &[PathBuf],
    remote_dir: &str,
    command: &str,
) -> ProvisionResult<String> {
    session
        .copy_files(files, remote_dir)
        .await
        .map_err(|e| e.context("AM policy files transfer failed"))?;
    session
        .run_script(command)
        .await
        .map_err(|e| e.context("AM policy script failed"))
}
