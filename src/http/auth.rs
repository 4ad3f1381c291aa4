//! HAWK authentication against the external Taskcluster-style auth
//! verifier, and capability (scope) authorization. Grounded on
//! `original_source/.../authentication.py` (canonical-tuple construction,
//! the `X-Forwarded-Proto: https` → port 443 rewrite) and
//! `permissions.py`/`models.py`'s `any(all(scope in granted))` scope-set
//! match. Modeled on the teacher's `channels/web/auth.rs` middleware
//! shape: a small state struct plus a pure check function, here split
//! into an externally-verified trait so tests can substitute a canned
//! responder (the same trait-with-one-live-one-test-impl pattern as
//! `db/mod.rs`'s `Database`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("auth verifier request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// The canonical request tuple HAWK MACs are computed over (spec.md
/// §4.1 step 2).
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub resource: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub authorization: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    pub status: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct VerifyRequest<'a> {
    method: &'a str,
    resource: &'a str,
    host: &'a str,
    port: u16,
    authorization: &'a str,
}

#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, req: &CanonicalRequest<'_>) -> Result<VerifyResponse, AuthError>;
}

pub struct ReqwestAuthVerifier {
    client: reqwest::Client,
    verifier_url: String,
}

impl ReqwestAuthVerifier {
    pub fn new(verifier_url: String) -> Self {
        ReqwestAuthVerifier { client: reqwest::Client::new(), verifier_url }
    }
}

#[async_trait]
impl AuthVerifier for ReqwestAuthVerifier {
    async fn verify(&self, req: &CanonicalRequest<'_>) -> Result<VerifyResponse, AuthError> {
        let body = VerifyRequest {
            method: req.method,
            resource: req.resource,
            host: req.host,
            port: req.port,
            authorization: req.authorization,
        };
        let resp = self.client.post(&self.verifier_url).json(&body).send().await?;
        let parsed: VerifyResponse = resp.json().await?;
        Ok(parsed)
    }
}

/// The outcome of applying an HTTP request to the canonical tuple: method
/// lowercased, port forced to 443 under a forwarded-https proto header
/// (spec.md §4.1 step 2's explicit call-out, tested below).
pub fn canonicalize<'a>(
    method: &'a str,
    resource: &'a str,
    host: &'a str,
    default_port: u16,
    authorization: &'a str,
    forwarded_proto: Option<&str>,
) -> CanonicalRequest<'a> {
    let port = if forwarded_proto.map(|p| p.eq_ignore_ascii_case("https")).unwrap_or(false) {
        443
    } else {
        default_port
    };
    CanonicalRequest { method, resource, host, port, authorization }
}

pub const CAPABILITY_DENIED_MESSAGE: &str = "You do not have permission to perform this action.";

/// `required` is a disjunction of conjunctions: the caller is authorized
/// if it satisfies every scope in at least one inner `Vec`. A scope
/// ending in `*` matches any granted scope sharing its prefix (spec.md
/// §6's "prefix `*` wildcard"). Comparison is constant-time per scope to
/// avoid timing side-channels on capability strings, mirroring the
/// teacher's use of `subtle` for comparisons at the HTTP edge.
pub fn satisfies(required: &[Vec<String>], granted: &[String]) -> bool {
    required.iter().any(|conjunction| conjunction.iter().all(|req| granted.iter().any(|g| scope_matches(req, g))))
}

fn scope_matches(required: &str, granted: &str) -> bool {
    if let Some(prefix) = granted.strip_suffix('*') {
        required.as_bytes().len() >= prefix.as_bytes().len() && required.as_bytes()[..prefix.len()].ct_eq(prefix.as_bytes()).into()
    } else {
        required.as_bytes().ct_eq(granted.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_https_forces_port_443() {
        let canonical = canonicalize("POST", "/workers/w1/jobs", "hwrecovery.example", 8080, "Hawk ...", Some("https"));
        assert_eq!(canonical.port, 443);
    }

    #[test]
    fn absent_forwarded_proto_keeps_default_port() {
        let canonical = canonicalize("POST", "/workers/w1/jobs", "hwrecovery.example", 8080, "Hawk ...", None);
        assert_eq!(canonical.port, 8080);
    }

    #[test]
    fn http_forwarded_proto_keeps_default_port() {
        let canonical = canonicalize("POST", "/workers/w1/jobs", "hwrecovery.example", 8080, "Hawk ...", Some("http"));
        assert_eq!(canonical.port, 8080);
    }

    #[test]
    fn exact_scope_satisfies_matching_requirement() {
        let required = vec![vec!["project:releng:hardware:reboot".to_string()]];
        assert!(satisfies(&required, &["project:releng:hardware:reboot".to_string()]));
    }

    #[test]
    fn wildcard_scope_matches_shared_prefix() {
        let required = vec![vec!["project:releng:hardware:reboot".to_string()]];
        assert!(satisfies(&required, &["project:releng:hardware:*".to_string()]));
    }

    #[test]
    fn conjunction_requires_every_scope() {
        let required = vec![vec!["a:b".to_string(), "c:d".to_string()]];
        assert!(!satisfies(&required, &["a:b".to_string()]));
        assert!(satisfies(&required, &["a:b".to_string(), "c:d".to_string()]));
    }

    #[test]
    fn disjunction_is_satisfied_by_any_conjunction() {
        let required = vec![vec!["a:b".to_string()], vec!["c:d".to_string()]];
        assert!(satisfies(&required, &["c:d".to_string()]));
    }

    #[test]
    fn empty_granted_scopes_satisfy_nothing() {
        let required = vec![vec!["project:releng:hardware:reboot".to_string()]];
        assert!(!satisfies(&required, &[]));
    }
}
