//! AM policy files for the sbs strategy
//!
//! Each application publishes `app-policies.xml` and `not-enforced-urls.txt`
//! to the package repository next to its other artifacts. They are staged
//! locally, checked, have the `${domain}` placeholder filled in and are then
//! copied to the OpenAM host.

use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, ProvisionResult};
use crate::request::is_path_segment;
use crate::urls::PRODUCTION_CLASS;

pub const POLICY_FILE_NAMES: [&str; 2] = ["app-policies.xml", "not-enforced-urls.txt"];
pub const DOMAIN_PLACEHOLDER: &str = "${domain}";

/// Repository URLs of the policy files for one application version
pub fn policy_file_urls(repo_url: &str, application: &str, version: &str) -> Vec<String> {
    let repo_url = repo_url.trim_end_matches('/');
    POLICY_FILE_NAMES
        .iter()
        .map(|name| format!("{}/{}/{}/am/{}", repo_url, application, version, name))
        .collect()
}

/// Public service domain of an environment
pub fn domain_for(environment_class: &str, environment: &str) -> String {
    if environment_class.eq_ignore_ascii_case(PRODUCTION_CLASS) {
        "tjenester.nav.no".to_string()
    } else {
        format!("tjenester-{}.nav.no", environment)
    }
}

/// Sniff a policy file. XML (`<?` prefix) and plain UTF-8 text pass.
pub fn validate_content(content: &[u8]) -> Result<(), &'static str> {
    let content = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);

    if content.is_empty() {
        return Err("Empty file");
    }
    if content.starts_with(b"<?") {
        return Ok(());
    }

    match std::str::from_utf8(content) {
        Ok(text) if !text.chars().any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t')) => {
            Ok(())
        }
        _ => Err("Unknown file type"),
    }
}

/// Validate files on disk, reporting every failing file
pub fn validate_files<P: AsRef<Path>>(paths: &[P]) -> ProvisionResult<()> {
    let mut failures = Vec::new();

    for path in paths {
        let path = path.as_ref();
        let problem = match std::fs::read(path) {
            Ok(content) => validate_content(&content).err().map(str::to_string),
            Err(e) => Some(format!("Could not read file: {}", e)),
        };
        if let Some(problem) = problem {
            failures.push(format!("{} - File: {}", problem, path.display()));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ProvisionError::validation(format!(
            "Policy file validation failed: {}",
            failures.join("; ")
        )))
    }
}

/// Locally staged policy files, removed again when dropped
#[derive(Debug)]
pub struct PolicyFileSet {
    directory: PathBuf,
    files: Vec<PathBuf>,
}

impl PolicyFileSet {
    /// Download both files into `<staging_dir>/<application>/`.
    ///
    /// Files already written are cleaned up if a later download fails.
    pub async fn download(
        client: &Client,
        repo_url: &str,
        staging_dir: &Path,
        application: &str,
        version: &str,
    ) -> ProvisionResult<Self> {
        if !is_path_segment(application) || !is_path_segment(version) {
            return Err(ProvisionError::validation(format!(
                "Application {} or version {} is not a single path segment",
                application, version
            )));
        }
        let directory = staging_dir.join(application);
        tokio::fs::create_dir_all(&directory).await.map_err(|e| {
            ProvisionError::upstream(format!(
                "Could not create staging directory {}",
                directory.display()
            ))
            .with_status(500)
            .with_cause(e)
        })?;

        let mut set = PolicyFileSet {
            directory,
            files: Vec::new(),
        };

        for url in policy_file_urls(repo_url, application, version) {
            let content = fetch(client, &url).await?;
            let file_name = url.rsplit('/').next().unwrap_or_default();
            let path = set.directory.join(file_name);

            tokio::fs::write(&path, &content).await.map_err(|e| {
                ProvisionError::upstream(format!("Could not write to {}", path.display()))
                    .with_status(500)
                    .with_cause(e)
            })?;
            debug!(url = %url, path = %path.display(), bytes = content.len(), "Staged policy file");
            set.files.push(path);
        }

        info!(application = %application, version = %version, "Downloaded policy files");
        Ok(set)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn validate(&self) -> ProvisionResult<()> {
        validate_files(&self.files)
    }

    /// Replace the domain placeholder in every file
    pub async fn rewrite_domain(&self, domain: &str) -> ProvisionResult<()> {
        for path in &self.files {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                ProvisionError::validation(format!("Could not read {}", path.display())).with_cause(e)
            })?;
            if !content.contains(DOMAIN_PLACEHOLDER) {
                continue;
            }
            tokio::fs::write(path, content.replace(DOMAIN_PLACEHOLDER, domain))
                .await
                .map_err(|e| {
                    ProvisionError::upstream(format!("Could not write {}", path.display()))
                        .with_status(500)
                        .with_cause(e)
                })?;
        }
        debug!(domain = %domain, "Rewrote domain placeholder");
        Ok(())
    }
}

impl Drop for PolicyFileSet {
    fn drop(&mut self) {
        for path in &self.files {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), "Could not remove staged policy file: {}", e);
            }
        }
        // Only succeeds when empty
        let _ = std::fs::remove_dir(&self.directory);
    }
}

async fn fetch(client: &Client, url: &str) -> ProvisionResult<Vec<u8>> {
    info!(url = %url, "Fetching policy file");

    let response = client.get(url).send().await.map_err(|e| {
        ProvisionError::upstream(format!("HTTP GET failed for url {}", url))
            .with_endpoint(url)
            .with_cause(e)
    })?;

    match response.status() {
        status if status.is_success() => {}
        StatusCode::NOT_FOUND => {
            return Err(ProvisionError::not_found(format!("Policy file not found: {}", url))
                .with_endpoint(url))
        }
        status => {
            return Err(ProvisionError::upstream(format!(
                "Got HTTP status code {} fetching policy file",
                status.as_u16()
            ))
            .with_endpoint(url))
        }
    }

    let bytes = response.bytes().await.map_err(|e| {
        ProvisionError::upstream(format!("Could not read policy file {}", url))
            .with_endpoint(url)
            .with_cause(e)
    })?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use httpmock::prelude::*;

    const POLICIES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<policies>
  <policy name="testapp">
    <resource>https://${domain}/testapp/*</resource>
  </policy>
</policies>
"#;
    const NOT_ENFORCED: &str = "/testapp/internal/isAlive\n/testapp/internal/metrics\n";

    #[test]
    fn test_policy_file_urls() {
        let urls = policy_file_urls("https://repo.adeo.no/repositories/raw/nais/", "testapp", "2.0");
        assert_eq!(
            urls,
            vec![
                "https://repo.adeo.no/repositories/raw/nais/testapp/2.0/am/app-policies.xml",
                "https://repo.adeo.no/repositories/raw/nais/testapp/2.0/am/not-enforced-urls.txt",
            ]
        );
    }

    #[test]
    fn test_domain_for() {
        assert_eq!(domain_for("p", "p"), "tjenester.nav.no");
        assert_eq!(domain_for("t", "u653"), "tjenester-u653.nav.no");
    }

    #[test]
    fn test_validate_content() {
        assert!(validate_content(POLICIES.as_bytes()).is_ok());
        assert!(validate_content(NOT_ENFORCED.as_bytes()).is_ok());
        assert_eq!(validate_content(b""), Err("Empty file"));
        assert_eq!(validate_content(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a]), Err("Unknown file type"));
        assert_eq!(validate_content(&[0xff, 0xfe, 0x00]), Err("Unknown file type"));
    }

    #[test]
    fn test_validate_files_names_every_failure() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("not-enforced-urls.txt");
        let bad = dir.path().join("app-policies.xml");
        let missing = dir.path().join("missing.txt");
        std::fs::write(&good, NOT_ENFORCED).unwrap();
        std::fs::write(&bad, [0u8, 1, 2, 3]).unwrap();

        let err = validate_files(&[good, bad.clone(), missing.clone()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message.contains(&format!("Unknown file type - File: {}", bad.display())));
        assert!(err.message.contains(&missing.display().to_string()));
    }

    #[tokio::test]
    async fn test_download_rewrite_and_cleanup() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/nais/testapp/2.0/am/app-policies.xml");
                then.status(200).body(POLICIES);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/nais/testapp/2.0/am/not-enforced-urls.txt");
                then.status(200).body(NOT_ENFORCED);
            })
            .await;

        let staging = tempfile::tempdir().unwrap();
        let set = PolicyFileSet::download(
            &Client::new(),
            &server.url("/nais"),
            staging.path(),
            "testapp",
            "2.0",
        )
        .await
        .unwrap();

        let paths = set.paths().to_vec();
        assert_eq!(paths[0], staging.path().join("testapp").join("app-policies.xml"));
        assert_eq!(paths[1], staging.path().join("testapp").join("not-enforced-urls.txt"));

        set.validate().unwrap();
        set.rewrite_domain("tjenester-u653.nav.no").await.unwrap();
        let rewritten = std::fs::read_to_string(&paths[0]).unwrap();
        assert!(rewritten.contains("https://tjenester-u653.nav.no/testapp/*"));
        assert!(!rewritten.contains(DOMAIN_PLACEHOLDER));

        drop(set);
        assert!(!paths[0].exists());
        assert!(!paths[1].exists());
        assert!(!staging.path().join("testapp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found_and_cleans_up() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/nais/testapp/2.0/am/app-policies.xml");
                then.status(200).body(POLICIES);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/nais/testapp/2.0/am/not-enforced-urls.txt");
                then.status(404);
            })
            .await;

        let staging = tempfile::tempdir().unwrap();
        let err = PolicyFileSet::download(
            &Client::new(),
            &server.url("/nais"),
            staging.path(),
            "testapp",
            "2.0",
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!staging.path().join("testapp").join("app-policies.xml").exists());
    }

    #[tokio::test]
    async fn test_application_cannot_leave_staging_dir() {
        let server = MockServer::start_async().await;
        let any = server
            .mock_async(|when, then| {
                when.any_request();
                then.status(200).body(POLICIES);
            })
            .await;

        let root = tempfile::tempdir().unwrap();
        let staging = root.path().join("staging");
        for application in ["../escaped", "/escaped", "a/b"] {
            let err = PolicyFileSet::download(&Client::new(), &server.base_url(), &staging, application, "1")
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        any.assert_hits_async(0).await;
        assert!(!root.path().join("escaped").exists());
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_server_error_is_upstream() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(500);
            })
            .await;

        let staging = tempfile::tempdir().unwrap();
        let err = PolicyFileSet::download(&Client::new(), &server.base_url(), staging.path(), "app", "1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(err.message.contains("500"));
    }
}
