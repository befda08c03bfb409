//! OpenAM identity server client
//!
//! Agent lifecycle for the fss strategy, plus policy reporting and import
//! used by `named-cli`.

mod client;
mod policies;

pub use client::{
    format_am_header_string, AgentPayload, AmClient, AmSession, AuthNResponse, SESSION_COOKIE,
    SESSION_HEADER,
};
pub use policies::{AmResourceType, ExportFormat, ObjectKind, PolicySet, POLICY_KIND};
