//! OpenAM REST client
//!
//! Authentication yields an [`AmSession`]; every other call goes through the
//! session so the token is always attached. Tokens are never refreshed: an
//! expired one surfaces as an error on the next call.

use base64::Engine;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{ProvisionError, ProvisionResult};

/// Header carrying the session token on agent calls
pub const SESSION_HEADER: &str = "nav-isso";
/// Cookie carrying the session token on policy calls
pub const SESSION_COOKIE: &str = "iPlanetDirectoryPro";

const AUTHENTICATE_PATH: &str =
    "/json/authenticate?authIndexType=service&authIndexValue=adminconsoleservice";

/// `POST /json/authenticate` response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthNResponse {
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub success_url: String,
}

/// Body of `POST /json/agents/?_action=create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPayload {
    pub username: String,
    #[serde(rename = "userpassword")]
    pub password: String,
    #[serde(rename = "agenttype")]
    pub agent_type: String,
    #[serde(rename = "com.forgerock.openam.oauth2provider.idTokenSignedResponseAlg")]
    pub algorithm: String,
    #[serde(rename = "com.forgerock.openam.oauth2provider.redirectionURIs")]
    pub redirection_uris: Vec<String>,
    #[serde(rename = "com.forgerock.openam.oauth2provider.scopes")]
    pub scope: String,
    #[serde(rename = "isConsentImplied")]
    pub consent_implied: String,
}

impl AgentPayload {
    /// OAuth2 client agent with the fixed algorithm, scope and consent flags.
    /// Redirection URIs are written in OpenAM's indexed list syntax.
    pub fn oauth2_client(agent_name: &str, password: &str, redirection_uris: &[String]) -> Self {
        Self {
            username: agent_name.to_string(),
            password: password.to_string(),
            agent_type: "OAuth2Client".to_string(),
            algorithm: "RS256".to_string(),
            redirection_uris: redirection_uris
                .iter()
                .enumerate()
                .map(|(i, uri)| format!("[{}]={}", i, uri))
                .collect(),
            scope: "[0]=openid".to_string(),
            consent_implied: "true".to_string(),
        }
    }
}

/// Encode a header value for OpenAM (RFC 2047)
pub fn format_am_header_string(value: &str) -> String {
    format!(
        "=?UTF-8?B?{}?=",
        base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
    )
}

/// Unauthenticated entry point to an OpenAM server
pub struct AmClient {
    http_client: Client,
    base_url: String,
}

impl AmClient {
    pub fn new(http_client: Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Log in with an admin user and open a session.
    pub async fn authenticate(&self, username: &str, password: &str) -> ProvisionResult<AmSession> {
        let url = format!("{}{}", self.base_url, AUTHENTICATE_PATH);
        debug!(url = %url, user = %username, "Authenticating to OpenAM");

        let response = self
            .http_client
            .post(&url)
            .header("X-OpenAM-Username", format_am_header_string(username))
            .header("X-OpenAM-Password", format_am_header_string(password))
            .header("Cache-Control", "no-cache")
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| {
                ProvisionError::upstream("AM server connection failed")
                    .with_status(503)
                    .with_endpoint(&url)
                    .with_cause(e)
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(
                ProvisionError::upstream(format!("Failed to authenticate to AM: {}", status))
                    .with_status(503)
                    .with_endpoint(&url),
            );
        }

        let authn: AuthNResponse = response.json().await.map_err(|e| {
            ProvisionError::upstream("Could not read AM authentication response")
                .with_status(503)
                .with_endpoint(&url)
                .with_cause(e)
        })?;

        info!(url = %self.base_url, user = %username, "Authenticated to OpenAM");

        Ok(AmSession {
            http_client: self.http_client.clone(),
            base_url: self.base_url.clone(),
            token_id: authn.token_id,
        })
    }
}

/// Authenticated OpenAM session
pub struct AmSession {
    http_client: Client,
    base_url: String,
    token_id: String,
}

impl AmSession {
    /// Session with a token obtained elsewhere
    pub fn with_token(
        http_client: Client,
        base_url: impl Into<String>,
        token_id: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token_id: token_id.into(),
        }
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub(crate) fn request_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Request with the session token attached as header and cookie
    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client
            .request(method, self.request_url(path))
            .header(SESSION_HEADER, &self.token_id)
            .header(
                reqwest::header::COOKIE,
                format!("{}={}", SESSION_COOKIE, self.token_id),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json")
    }

    /// Whether an agent with this name exists.
    ///
    /// Only a 200 counts as existing. Transport failures are logged and
    /// reported as `false`, the answer only decides whether to delete first.
    pub async fn agent_exists(&self, agent_name: &str) -> bool {
        let path = format!("/json/agents/{}", agent_name);

        match self.request(Method::GET, &path).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                info!(agent = %agent_name, "Agent already exists");
                true
            }
            Ok(response) => {
                debug!(agent = %agent_name, status = %response.status(), "Agent not found");
                false
            }
            Err(e) => {
                error!(agent = %agent_name, "Could not check agent: {}", e);
                false
            }
        }
    }

    /// Create an OAuth2 client agent. 200 and 201 are both success.
    pub async fn create_agent(
        &self,
        agent_name: &str,
        redirection_uris: &[String],
        agent_password: &str,
    ) -> ProvisionResult<()> {
        let path = "/json/agents/?_action=create";
        let url = self.request_url(path);
        let payload = AgentPayload::oauth2_client(agent_name, agent_password, redirection_uris);

        let response = self
            .request(Method::POST, path)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                ProvisionError::upstream(format!("Could not create agent {}", agent_name))
                    .with_endpoint(&url)
                    .with_cause(e)
            })?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::upstream(format!(
                "{} Agent {} could not be created: {}",
                status.as_u16(),
                agent_name,
                body
            ))
            .with_endpoint(&url));
        }

        info!(agent = %agent_name, uris = redirection_uris.len(), "Agent created");
        Ok(())
    }

    /// Delete an agent. Anything but 200 is an error, 404 as NotFound.
    pub async fn delete_agent(&self, agent_name: &str) -> ProvisionResult<()> {
        let path = format!("/json/agents/{}", agent_name);
        let url = self.request_url(&path);

        let response = self
            .request(Method::DELETE, &path)
            .send()
            .await
            .map_err(|e| {
                ProvisionError::upstream(format!("Could not delete agent {}", agent_name))
                    .with_endpoint(&url)
                    .with_cause(e)
            })?;

        match response.status() {
            StatusCode::OK => {
                info!(agent = %agent_name, "Agent deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(ProvisionError::not_found(format!(
                "Agent {} could not be deleted, it does not exist",
                agent_name
            ))
            .with_endpoint(&url)),
            status => Err(ProvisionError::upstream(format!(
                "Agent {} could not be deleted: {}",
                agent_name, status
            ))
            .with_endpoint(&url)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use httpmock::prelude::*;
    use serde_json::json;

    const TOKEN: &str = "AQIC5wM2LY4Sfcw";

    fn session(server: &MockServer) -> AmSession {
        AmSession::with_token(Client::new(), server.base_url(), TOKEN)
    }

    #[test]
    fn test_format_am_header_string() {
        assert_eq!(format_am_header_string("user"), "=?UTF-8?B?dXNlcg==?=");
    }

    #[test]
    fn test_agent_payload_indexes_uris() {
        let payload = AgentPayload::oauth2_client(
            "app-t1",
            "pw",
            &["https://a/app".to_string(), "https://b/app".to_string()],
        );
        assert_eq!(payload.redirection_uris, vec!["[0]=https://a/app", "[1]=https://b/app"]);

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["agenttype"], "OAuth2Client");
        assert_eq!(value["userpassword"], "pw");
        assert_eq!(value["com.forgerock.openam.oauth2provider.idTokenSignedResponseAlg"], "RS256");
        assert_eq!(value["com.forgerock.openam.oauth2provider.scopes"], "[0]=openid");
        assert_eq!(value["isConsentImplied"], "true");
    }

    #[tokio::test]
    async fn test_authenticate() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/json/authenticate")
                    .query_param("authIndexType", "service")
                    .query_param("authIndexValue", "adminconsoleservice")
                    .header("X-OpenAM-Username", format_am_header_string("user"))
                    .header("X-OpenAM-Password", format_am_header_string("pass"))
                    .header("Cache-Control", "no-cache");
                then.status(200)
                    .json_body(json!({"tokenId": TOKEN, "successUrl": "/openam/console"}));
            })
            .await;

        let session = AmClient::new(Client::new(), server.base_url())
            .authenticate("user", "pass")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(session.token_id(), TOKEN);
    }

    #[tokio::test]
    async fn test_authenticate_failure_is_upstream() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/json/authenticate");
                then.status(401).json_body(json!({"code": 401, "reason": "Unauthorized"}));
            })
            .await;

        let err = AmClient::new(Client::new(), server.base_url())
            .authenticate("user", "wrong")
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.status_code, 503);
    }

    #[tokio::test]
    async fn test_agent_exists() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/json/agents/testAgent")
                    .header(SESSION_HEADER, TOKEN);
                then.status(200).body("not even json");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/json/agents/noTestAgent")
                    .header(SESSION_HEADER, TOKEN);
                then.status(404).json_body(json!({"username": "noTestAgent"}));
            })
            .await;

        let session = session(&server);
        assert!(session.agent_exists("testAgent").await);
        assert!(!session.agent_exists("noTestAgent").await);
    }

    #[tokio::test]
    async fn test_agent_exists_is_false_when_unreachable() {
        let session = AmSession::with_token(Client::new(), "http://127.0.0.1:1", TOKEN);
        assert!(!session.agent_exists("testAgent").await);
    }

    #[tokio::test]
    async fn test_create_agent() {
        let server = MockServer::start_async().await;
        let expected =
            serde_json::to_value(AgentPayload::oauth2_client("testAgent", "pw", &[])).unwrap();

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/json/agents/")
                    .query_param("_action", "create")
                    .header(SESSION_HEADER, TOKEN)
                    .json_body(expected);
                then.status(201);
            })
            .await;

        session(&server).create_agent("testAgent", &[], "pw").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_agent_conflict_is_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/json/agents/");
                then.status(409).body("Resource already exists");
            })
            .await;

        let err = session(&server)
            .create_agent("testAgent", &[], "pw")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(err.message.contains("409 Agent testAgent could not be created"));
    }

    #[tokio::test]
    async fn test_delete_agent() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/json/agents/testAgent")
                    .header(SESSION_HEADER, TOKEN);
                then.status(200);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/json/agents/noTestAgent");
                then.status(404);
            })
            .await;

        let session = session(&server);
        assert!(session.delete_agent("testAgent").await.is_ok());

        let err = session.delete_agent("noTestAgent").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
