//! Fasit Resource Registry
//!
//! Fasit is the source of truth for credentials, hostnames and environment
//! metadata. Secrets are never part of a resource, only references to them,
//! so every secret costs a second authenticated request.

mod client;
mod types;

pub use client::{
    insert_port_number, FasitClient, OPENAM_ALIAS, OPENIDCONNECT_AGENT_ALIAS, OPENIDCONNECT_ALIAS,
};
pub use types::{
    IssoResource, OpenAmResource, PublishMode, ResourcePayload, ResourceRequest, ResourceType,
    Scope, ScopedResource, SecretRef, SecretValue,
};
