//! Prometheus metrics
//!
//! A process-wide counter table, created once at startup and handed to the
//! provisioner and the HTTP layer behind an `Arc`. All counters are atomic, so
//! concurrent configuration requests can share one instance.
//!
//! | Metric | Labels |
//! |--------|--------|
//! | `named_requests_total` | `path` |
//! | `named_configurations_total` | `application` |
//! | `named_registry_http_requests_total` | `code`, `method` |
//! | `named_registry_errors_total` | `type` |

use prometheus::{CounterVec, Encoder, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Maximum length for label values, application names come from callers.
pub const MAX_LABEL_VALUE_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Counter table for the named service
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests_total: CounterVec,
    configurations_total: CounterVec,
    registry_http_requests_total: CounterVec,
    registry_errors_total: CounterVec,
}

impl Metrics {
    /// Create the counters and register them with a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("named_requests_total", "Requests per path"),
            &["path"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let configurations_total = CounterVec::new(
            Opts::new(
                "named_configurations_total",
                "Configurations done by named, per application",
            ),
            &["application"],
        )?;
        registry.register(Box::new(configurations_total.clone()))?;

        let registry_http_requests_total = CounterVec::new(
            Opts::new(
                "named_registry_http_requests_total",
                "HTTP requests to Fasit, partitioned by status code and method",
            ),
            &["code", "method"],
        )?;
        registry.register(Box::new(registry_http_requests_total.clone()))?;

        let registry_errors_total = CounterVec::new(
            Opts::new("named_registry_errors_total", "Errors talking to Fasit"),
            &["type"],
        )?;
        registry.register(Box::new(registry_errors_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            configurations_total,
            registry_http_requests_total,
            registry_errors_total,
        })
    }

    pub fn request(&self, path: &str) {
        self.requests_total
            .with_label_values(&[truncate_label(path)])
            .inc();
    }

    /// Count one completed provisioning for an application.
    pub fn configuration_done(&self, application: &str) {
        self.configurations_total
            .with_label_values(&[truncate_label(application)])
            .inc();
    }

    pub fn configurations(&self, application: &str) -> f64 {
        self.configurations_total
            .with_label_values(&[truncate_label(application)])
            .get()
    }

    pub fn registry_response(&self, code: u16, method: &str) {
        let code = code.to_string();
        self.registry_http_requests_total
            .with_label_values(&[code.as_str(), method])
            .inc();
    }

    pub fn registry_error(&self, error_type: &str) {
        self.registry_errors_total
            .with_label_values(&[error_type])
            .inc();
    }

    pub fn registry_errors(&self, error_type: &str) -> f64 {
        self.registry_errors_total
            .with_label_values(&[error_type])
            .get()
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}

fn truncate_label(value: &str) -> &str {
    if value.len() <= MAX_LABEL_VALUE_LEN {
        return value;
    }
    let mut end = MAX_LABEL_VALUE_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
