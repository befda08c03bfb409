//! Fasit REST client
//!
//! Every call is one synchronous round trip. A 404 becomes a NotFound error,
//! any other non-2xx an Upstream error carrying the URL that failed.

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{
    FasitEnvironment, IssoResource, OpenAmResource, PublishMode, ResourcePayload,
    ResourceRequest, ResourceType, ScopedResource, SecretRef,
};
use crate::error::{ProvisionError, ProvisionResult};
use crate::metrics::Metrics;
use crate::request::Zone;

pub const OPENAM_ALIAS: &str = "OpenAM";
pub const OPENIDCONNECT_ALIAS: &str = "OpenIdConnect";
pub const OPENIDCONNECT_AGENT_ALIAS: &str = "OpenIdConnectAgent";

/// Fasit client acting on behalf of the caller of a configuration request
pub struct FasitClient {
    http_client: Client,
    base_url: String,
    username: String,
    password: String,
    metrics: Arc<Metrics>,
}

impl FasitClient {
    pub fn new(
        http_client: Client,
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            metrics,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and return the body of a 2xx response.
    async fn send(&self, method: Method, url: &str, request: RequestBuilder) -> ProvisionResult<String> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.metrics.registry_error("contact_fasit");
                return Err(ProvisionError::upstream("Error contacting Fasit")
                    .with_status(500)
                    .with_endpoint(url)
                    .with_cause(e));
            }
        };

        let status = response.status();
        self.metrics.registry_response(status.as_u16(), method.as_str());

        if status == StatusCode::NOT_FOUND {
            self.metrics.registry_error("error_fasit");
            return Err(ProvisionError::not_found("Item not found in Fasit").with_endpoint(url));
        }

        if !status.is_success() {
            self.metrics.registry_error("error_fasit");
            return Err(
                ProvisionError::upstream(format!("Fasit responded with {}", status))
                    .with_endpoint(url),
            );
        }

        response.text().await.map_err(|e| {
            self.metrics.registry_error("read_body");
            ProvisionError::upstream("Could not read body from Fasit")
                .with_status(500)
                .with_endpoint(url)
                .with_cause(e)
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> ProvisionResult<T> {
        let request = self.http_client.get(url).query(query);
        let body = self.send(Method::GET, url, request).await?;

        serde_json::from_str(&body).map_err(|e| {
            self.metrics.registry_error("unmarshal_body");
            ProvisionError::upstream("Could not unmarshal body from Fasit")
                .with_status(500)
                .with_endpoint(url)
                .with_cause(e)
        })
    }

    /// Look up one resource by alias and type in the given scope.
    pub async fn get_scoped_resource(
        &self,
        request: &ResourceRequest,
        environment: &str,
        application: &str,
        zone: Zone,
    ) -> ProvisionResult<ScopedResource> {
        debug!(
            alias = %request.alias,
            resource_type = %request.resource_type,
            environment = %environment,
            application = %application,
            "Fetching scoped resource from Fasit"
        );

        let url = self.url("/api/v2/scopedresource");
        self.get_json(
            &url,
            &[
                ("alias", request.alias.as_str()),
                ("type", request.resource_type.as_str()),
                ("environment", environment),
                ("application", application),
                ("zone", zone.as_str()),
            ],
        )
        .await
    }

    /// Environment class (`u`, `t`, `q`, `p`) of a Fasit environment.
    pub async fn get_environment_class(&self, environment: &str) -> ProvisionResult<String> {
        let url = self.url(&format!("/api/v2/environments/{}", environment));
        let fasit_environment: FasitEnvironment = self.get_json(&url, &[]).await?;
        Ok(fasit_environment.environment_class)
    }

    /// Succeeds when the application is registered in Fasit.
    pub async fn application_exists(&self, application: &str) -> ProvisionResult<()> {
        let url = self.url(&format!("/api/v2/applications/{}", application));
        let request = self.http_client.get(&url);
        self.send(Method::GET, &url, request).await?;
        Ok(())
    }

    /// Dereference a secret map by fetching the first reference with the
    /// caller's credentials. Keys are ordered, so "first" is deterministic.
    pub async fn resolve_secret(
        &self,
        secrets: &BTreeMap<String, SecretRef>,
    ) -> ProvisionResult<String> {
        let (name, secret) = secrets
            .iter()
            .next()
            .ok_or_else(|| ProvisionError::not_found("Resource has no secrets to resolve"))?;

        debug!(secret = %name, "Resolving secret from Fasit");

        let url = secret.reference.as_str();
        let response = self
            .http_client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| {
                self.metrics.registry_error("contact_fasit");
                ProvisionError::upstream("Error contacting Fasit when resolving secret")
                    .with_status(500)
                    .with_endpoint(url)
                    .with_cause(e)
            })?;

        let status = response.status();
        self.metrics.registry_response(status.as_u16(), "GET");

        if !status.is_success() {
            self.metrics.registry_error("resolve_secret");
            let error = match status {
                StatusCode::UNAUTHORIZED => ProvisionError::unauthorized(format!(
                    "Fasit rejected the credentials of {} when resolving secret",
                    self.username
                )),
                StatusCode::NOT_FOUND => ProvisionError::not_found("Secret not found in Fasit"),
                _ => ProvisionError::upstream(format!(
                    "Fasit gave error message when resolving secret: {}",
                    status
                )),
            };
            return Err(error.with_endpoint(url));
        }

        response.text().await.map_err(|e| {
            self.metrics.registry_error("read_body");
            ProvisionError::upstream("Could not read secret from Fasit")
                .with_status(500)
                .with_endpoint(url)
                .with_cause(e)
        })
    }

    /// Resolve the password of a resource, or `None` when it has no secrets.
    pub async fn resolve_password(&self, resource: &ScopedResource) -> ProvisionResult<Option<String>> {
        if resource.secrets.is_empty() {
            return Ok(None);
        }
        self.resolve_secret(&resource.secrets).await.map(Some)
    }

    /// Create or replace a resource in Fasit.
    pub async fn publish_resource(
        &self,
        resource: &ResourcePayload,
        mode: PublishMode,
    ) -> ProvisionResult<()> {
        let (method, url) = match mode {
            PublishMode::Create => (Method::POST, self.url("/api/v2/resources")),
            PublishMode::Update(id) => (Method::PUT, self.url(&format!("/api/v2/resources/{}", id))),
        };

        info!(
            alias = %resource.alias,
            resource_type = %resource.resource_type,
            method = %method,
            "Publishing resource to Fasit"
        );

        let request = self
            .http_client
            .request(method.clone(), &url)
            .basic_auth(&self.username, Some(&self.password))
            .json(resource);

        self.send(method, &url, request).await?;
        Ok(())
    }

    /// Host and credentials of the AM server for an sbs application.
    pub async fn get_openam_resource(
        &self,
        environment: &str,
        application: &str,
        zone: Zone,
    ) -> ProvisionResult<OpenAmResource> {
        let request = ResourceRequest::new(OPENAM_ALIAS, ResourceType::OpenAm);
        let resource = self
            .get_scoped_resource(&request, environment, application, zone)
            .await?;

        let hostname = resource
            .property("hostname")
            .ok_or_else(|| {
                ProvisionError::not_found("Fasit OpenAM resource has no hostname property")
            })?
            .to_string();
        let username = resource.property("username").unwrap_or_default().to_string();
        let password = self.resolve_password(&resource).await?.unwrap_or_default();

        Ok(OpenAmResource {
            hostname,
            username,
            password,
        })
    }

    /// Endpoints and credentials of the OIDC provider for an fss application.
    ///
    /// The load balancer resource is optional: when Fasit has none registered
    /// for the application the lookup is logged and skipped.
    pub async fn get_isso_resource(
        &self,
        environment: &str,
        application: &str,
        zone: Zone,
    ) -> ProvisionResult<IssoResource> {
        let url_resource = self
            .get_scoped_resource(
                &ResourceRequest::new(OPENIDCONNECT_ALIAS, ResourceType::BaseUrl),
                environment,
                application,
                zone,
            )
            .await?;

        let user_resource = self
            .get_scoped_resource(
                &ResourceRequest::new(OPENIDCONNECT_ALIAS, ResourceType::Credential),
                environment,
                application,
                zone,
            )
            .await?;

        let agent_resource = self
            .get_scoped_resource(
                &ResourceRequest::new(OPENIDCONNECT_AGENT_ALIAS, ResourceType::Credential),
                environment,
                application,
                zone,
            )
            .await?;

        let loadbalancer_request = ResourceRequest::new(
            format!("loadbalancer:{}", application),
            ResourceType::LoadBalancerConfig,
        );
        let loadbalancer_host = match self
            .get_scoped_resource(&loadbalancer_request, environment, application, zone)
            .await
        {
            Ok(resource) => resource.property("url").map(strip_scheme),
            Err(e) if e.kind() == crate::error::ErrorKind::NotFound => {
                warn!(
                    application = %application,
                    environment = %environment,
                    "No load balancer registered in Fasit, using default host"
                );
                None
            }
            Err(e) => return Err(e),
        };

        let oidc_url = url_resource
            .property("url")
            .ok_or_else(|| ProvisionError::not_found("Fasit OpenIdConnect resource has no url property"))?
            .trim_end_matches('/')
            .to_string();

        let issuer_url = match insert_port_number(&format!("{}/oauth2", oidc_url), 443) {
            Ok(url) => url,
            Err(e) => {
                warn!("Could not parse OIDC url {}: {}", oidc_url, e);
                format!("{}/oauth2", oidc_url)
            }
        };

        let oidc_password = self.resolve_password(&user_resource).await?.unwrap_or_default();
        let oidc_agent_password = self.resolve_password(&agent_resource).await?.unwrap_or_default();

        Ok(IssoResource {
            jwks_url: format!("{}/oauth2/connect/jwk_uri", oidc_url),
            issuer_url,
            oidc_username: user_resource.property("username").unwrap_or_default().to_string(),
            oidc_url,
            oidc_password,
            oidc_agent_password,
            loadbalancer_host,
        })
    }
}

/// `https://host/path` with an explicit port, `https://host:443/path`.
/// Default ports are kept in the output, unlike `Url::set_port`.
pub fn insert_port_number(url_without_port: &str, port: u16) -> Result<String, url::ParseError> {
    let url = url::Url::parse(url_without_port)?;
    let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;
    Ok(format!("{}://{}:{}{}", url.scheme(), host, port, url.path()))
}

fn strip_scheme(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    without_scheme.trim_end_matches('/').to_string()
}
