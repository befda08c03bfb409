//! Redirection URIs for OIDC agents
//!
//! Hostnames follow the NAIS naming conventions: ingresses live under the
//! cluster domain of the zone, and applications without a registered load
//! balancer fall back to `app-<environment>` in the default service domain.

use crate::request::Zone;

/// Environment class of production environments
pub const PRODUCTION_CLASS: &str = "p";

fn is_production(environment_class: &str) -> bool {
    environment_class.eq_ignore_ascii_case(PRODUCTION_CLASS)
}

/// Cluster ingress domain for a zone and environment class
pub fn ingress_domain(environment_class: &str, zone: Zone) -> &'static str {
    match (zone, is_production(environment_class)) {
        (Zone::Fss, true) => "nais.adeo.no",
        (Zone::Fss, false) => "nais.preprod.local",
        (Zone::Sbs, true) => "nais.oera.no",
        (Zone::Sbs, false) => "nais.oera-q.local",
    }
}

/// Service domain of the fallback host used when no load balancer is registered
pub const DEFAULT_SERVICE_DOMAIN: &str = "adeo.no";

/// Ingress hosts an application is reachable on.
///
/// Production gets a single host, every other class also gets one qualified
/// with the environment name.
pub fn ingress_hosts(environment_class: &str, zone: Zone, application: &str, environment: &str) -> Vec<String> {
    let domain = ingress_domain(environment_class, zone);
    if is_production(environment_class) {
        vec![format!("{}.{}", application, domain)]
    } else {
        vec![
            format!("{}.{}", application, domain),
            format!("{}-{}.{}", application, environment, domain),
        ]
    }
}

fn normalize_context_root(root: &str) -> String {
    if root.starts_with('/') {
        root.to_string()
    } else {
        format!("/{}", root)
    }
}

/// Build the ordered redirection URI list.
///
/// For each context root: every ingress host, then the load balancer host or,
/// without one, `app-<environment>.adeo.no`.
pub fn build_urls(
    environment: &str,
    loadbalancer_host: Option<&str>,
    ingress_hosts: &[String],
    context_roots: &[String],
) -> Vec<String> {
    let fallback_host = match loadbalancer_host.filter(|host| !host.is_empty()) {
        Some(host) => host.to_string(),
        None => format!("app-{}.{}", environment, DEFAULT_SERVICE_DOMAIN),
    };

    context_roots
        .iter()
        .map(|root| normalize_context_root(root))
        .flat_map(|root| {
            ingress_hosts
                .iter()
                .chain(std::iter::once(&fallback_host))
                .map(move |host| format!("https://{}{}", host, root))
                .collect::<Vec<_>>()
        })
        .collect()
}
