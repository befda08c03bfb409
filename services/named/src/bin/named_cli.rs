//! named-cli
//!
//! Client for the named service plus local helpers for AM policy files.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use named::config::{http_client, named_url};
use named::identity::{AmClient, ExportFormat, PolicySet};
use named::policy_files::validate_files;
use named::{ConfigurationRequest, Zone};

#[derive(Parser, Debug)]
#[command(name = "named-cli", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Configure your application in AM
    Configure {
        /// Name of your app
        #[arg(short, long)]
        app: String,

        /// Version you want to configure for
        #[arg(short = 'v', long = "version")]
        app_version: String,

        /// Environment you want to use
        #[arg(short, long)]
        env: String,

        /// The cluster you want to deploy to
        #[arg(short, long, default_value = "")]
        cluster: String,

        /// Zone of the application, derived from the cluster when omitted
        #[arg(short, long)]
        zone: Option<Zone>,

        /// Context roots to configure in ISSO (fss only, repeatable)
        #[arg(short = 'r', long = "context-root")]
        context_roots: Vec<String>,

        #[arg(short, long, env = "NAIS_USERNAME")]
        username: String,

        #[arg(short, long, env = "NAIS_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Validate policy files
    Validate {
        /// Path to file
        #[arg(short, long, default_value = "app-policies.xml")]
        file: Vec<PathBuf>,
    },

    /// Export the policies of an AM realm
    ExportPolicies {
        #[arg(long, env = "AM_URL")]
        am_url: String,

        #[arg(short, long, env = "AM_USERNAME")]
        username: String,

        #[arg(short, long, env = "AM_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long, default_value = "")]
        realm: String,

        /// json or yaml
        #[arg(long, default_value = "json")]
        format: ExportFormat,
    },

    /// Create the policies of an exported policy set in AM
    ImportPolicies {
        #[arg(long, env = "AM_URL")]
        am_url: String,

        #[arg(short, long, env = "AM_USERNAME")]
        username: String,

        #[arg(short, long, env = "AM_PASSWORD", hide_env_values = true)]
        password: String,

        /// Policy set file, json or yaml by extension
        #[arg(short, long)]
        file: PathBuf,

        /// Delete existing policies before creating them
        #[arg(long, default_value = "false")]
        overwrite: bool,

        /// Keep going when a single policy fails
        #[arg(long, default_value = "false")]
        continue_on_error: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Configure {
            app,
            app_version,
            env,
            cluster,
            zone,
            context_roots,
            username,
            password,
        } => {
            let cluster_name = if cluster.is_empty() {
                named::config::DEFAULT_CLUSTER.to_string()
            } else {
                cluster
            };
            let zone = match zone.or_else(|| Zone::from_cluster(&cluster_name)) {
                Some(zone) => zone,
                None => bail!("Cannot derive zone from cluster {}, use --zone", cluster_name),
            };

            let request = ConfigurationRequest {
                application: app,
                version: app_version,
                environment: env,
                zone: zone.to_string(),
                username,
                password,
                context_roots,
            };
            configure(request, &cluster_name).await
        }
        Command::Validate { file } => {
            match validate_files(file.as_slice()) {
                Ok(()) => {
                    println!("Policy files are valid");
                    Ok(())
                }
                Err(e) => {
                    println!("Found errors while validating policy files");
                    bail!("{}", e)
                }
            }
        }
        Command::ExportPolicies {
            am_url,
            username,
            password,
            realm,
            format,
        } => {
            let session = AmClient::new(http_client()?, am_url)
                .authenticate(&username, &password)
                .await?;
            println!("{}", session.export_policies(format, &realm).await?);
            Ok(())
        }
        Command::ImportPolicies {
            am_url,
            username,
            password,
            file,
            overwrite,
            continue_on_error,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Could not read {}", file.display()))?;
            let format = match file.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => ExportFormat::Yaml,
                _ => ExportFormat::Json,
            };
            let set = PolicySet::parse(&content, format)?;

            let session = AmClient::new(http_client()?, am_url)
                .authenticate(&username, &password)
                .await?;
            session
                .import_policies(&set, overwrite, continue_on_error)
                .await?;
            println!("Imported {} policies", set.items.len());
            Ok(())
        }
    }
}

async fn configure(request: ConfigurationRequest, cluster: &str) -> Result<()> {
    let errors = request.validation_errors();
    if !errors.is_empty() {
        bail!("Configuration request is not valid: {}", errors.join("; "));
    }

    let url = format!("{}/configure", named_url(cluster)?);
    let start = Instant::now();

    let response = http_client()?
        .post(&url)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("Error while POSTing to {}", url))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    println!("response Status: {}", status);
    println!("response Body: {}", body);

    if !status.is_success() {
        bail!("Configuration failed with {}", status);
    }

    println!("Configuration successful, took {:?}", start.elapsed());
    Ok(())
}
