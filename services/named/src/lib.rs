//! named
//!
//! Provisions identity configuration for NAIS applications. In the fss zone
//! an application gets an OIDC agent in OpenAM, in the sbs zone its AM
//! policy files are installed on the OpenAM host. Fasit is the source of
//! truth for hosts, credentials and environments.

pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod policy_files;
pub mod provisioner;
pub mod registry;
pub mod request;
pub mod server;
pub mod transfer;
pub mod urls;

pub use error::{ErrorKind, ProvisionError, ProvisionResult};
pub use metrics::Metrics;
pub use provisioner::{Provisioner, ProvisionerConfig};
pub use request::{ConfigurationRequest, ValidRequest, Zone};
