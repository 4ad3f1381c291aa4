//! Hostname-to-address resolution with the fleet's DNS search list,
//! grounded on `original_source/.../celery.py`'s `get_hostname`, which
//! tries `{"", "win"} x {"mdc1", "mdc2", "scl3"}` suffixes in order
//! before giving up.

use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::config::{LookupIpStrategy, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::Resolver;
use thiserror::Error;

const OS_PREFIXES: [&str; 2] = ["", "win"];
const DATACENTERS: [&str; 3] = ["mdc1", "mdc2", "scl3"];

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no candidate hostname for {0} resolved in any datacenter")]
    NotFound(String),
}

#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve `worker_id` to an address, trying every
    /// `{os_prefix}test.releng.{dc}.mozilla.com` candidate in order and
    /// returning the first that resolves.
    async fn resolve(&self, worker_id: &str) -> Result<(String, IpAddr), ResolveError>;
}

pub struct HickoryHostResolver {
    resolver: Resolver<TokioConnectionProvider>,
}

impl HickoryHostResolver {
    pub fn new() -> Result<Self, hickory_resolver::ResolveError> {
        let mut builder =
            Resolver::builder_with_config(ResolverConfig::default(), TokioConnectionProvider::default());
        builder.options_mut().ip_strategy = LookupIpStrategy::Ipv4thenIpv6;
        let resolver = builder.build();
        Ok(HickoryHostResolver { resolver })
    }

    /// All candidate FQDNs for a worker id, in lookup order.
    pub fn candidates(worker_id: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(OS_PREFIXES.len() * DATACENTERS.len());
        for dc in DATACENTERS {
            for prefix in OS_PREFIXES {
                out.push(format!("{prefix}test.releng.{dc}.mozilla.com", prefix = prefix, dc = dc));
            }
        }
        let _ = worker_id;
        out
    }
}

#[async_trait]
impl HostResolver for HickoryHostResolver {
    async fn resolve(&self, worker_id: &str) -> Result<(String, IpAddr), ResolveError> {
        for fqdn in Self::candidates(worker_id) {
            let host = format!("{worker_id}.{fqdn}");
            if let Ok(lookup) = self.resolver.lookup_ip(host.as_str()).await {
                if let Some(ip) = lookup.iter().next() {
                    return Ok((host, ip));
                }
            }
        }

        // "plus the empty suffix" (spec.md §4.3): try the bare worker id
        // with no datacenter suffix appended, as a last resort.
        if let Ok(lookup) = self.resolver.lookup_ip(worker_id).await {
            if let Some(ip) = lookup.iter().next() {
                return Ok((worker_id.to_string(), ip));
            }
        }

        Err(ResolveError::NotFound(worker_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_order_matches_search_list() {
        let candidates = HickoryHostResolver::candidates("t-w1064-ms-001");
        assert_eq!(
            candidates,
            vec![
                "test.releng.mdc1.mozilla.com",
                "wintest.releng.mdc1.mozilla.com",
                "test.releng.mdc2.mozilla.com",
                "wintest.releng.mdc2.mozilla.com",
                "test.releng.scl3.mozilla.com",
                "wintest.releng.scl3.mozilla.com",
            ]
        );
    }
}
