//! Action registrar: one-shot publication of the controller's supported
//! task names to the external orchestrator's action catalog. Grounded on
//! `original_source/.../register_tc_actions.py` (base-URL/provisioner-id
//! validation, per-task-name catalog entry construction, the
//! `declareProvisioner` POST).

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid provisioner id: {0}")]
    InvalidProvisionerId(String),

    #[error("catalog registration request failed: {0}")]
    Request(#[from] reqwest::Error),
}

fn valid_provisioner_id(id: &str) -> bool {
    (1..=256).contains(&id.len()) && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// `base_url` must be http(s) and must not itself contain either
/// placeholder token — those are substituted per-action below, and a
/// base URL that already contains them would produce a mangled catalog
/// entry (recovered from `register_tc_actions.py`'s
/// `assert 'workerId' not in provisioner_id` style guard).
fn validate_base_url(base_url: &str) -> Result<&str, RegistrarError> {
    let scheme_ok = base_url.starts_with("http://") || base_url.starts_with("https://");
    if !scheme_ok {
        return Err(RegistrarError::InvalidBaseUrl(format!("unsupported scheme in {base_url}")));
    }
    if base_url.contains("workerId") || base_url.contains("workerGroup") {
        return Err(RegistrarError::InvalidBaseUrl(
            "base url must not contain workerId or workerGroup placeholders".to_string(),
        ));
    }
    Ok(base_url)
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogAction {
    pub name: String,
    pub title: String,
    pub context: &'static str,
    pub method: &'static str,
    pub url: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
struct DeclareProvisionerBody {
    actions: Vec<CatalogAction>,
}

/// One catalog entry per configured task name, using the teacher's
/// `<workerId>`/`<workerGroup>` path placeholders (substituted by the
/// orchestrator at dispatch time, not here) plus a literal `task_name`
/// query parameter.
pub fn build_catalog(base_url: &str, task_names: &[String]) -> Result<Vec<CatalogAction>, RegistrarError> {
    let base = validate_base_url(base_url)?;
    let base = base.strip_suffix('/').unwrap_or(base);

    Ok(task_names
        .iter()
        .map(|name| {
            let url = format!(
                "{base}/workers/<workerId>/jobs?task_name={}",
                urlencoding::encode(name)
            );
            CatalogAction {
                name: name.clone(),
                title: format!("Recover worker ({name})"),
                context: "worker-type",
                method: "POST",
                url,
                description: format!("Attempt hardware recovery via the `{name}` task on the targeted worker."),
            }
        })
        .collect())
}

pub struct Registrar {
    client: reqwest::Client,
    declare_provisioner_url: String,
}

impl Registrar {
    pub fn new(declare_provisioner_url: String) -> Self {
        Registrar { client: reqwest::Client::new(), declare_provisioner_url }
    }

    /// Validates `provisioner_id` and posts the catalog for the
    /// configured task names. The scope required by the caller's own
    /// credentials is `queue:declare-provisioner:<id>#actions` (asserted
    /// by the orchestrator side, not checked here).
    pub async fn register(&self, base_url: &str, provisioner_id: &str, task_names: &[String]) -> Result<(), RegistrarError> {
        if !valid_provisioner_id(provisioner_id) {
            return Err(RegistrarError::InvalidProvisionerId(provisioner_id.to_string()));
        }
        let actions = build_catalog(base_url, task_names)?;

        self.client
            .post(&self.declare_provisioner_url)
            .json(&DeclareProvisionerBody { actions })
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_base_url_with_bad_scheme() {
        assert!(validate_base_url("ftp://hwrecovery.example/").is_err());
    }

    #[test]
    fn rejects_base_url_containing_placeholder_tokens() {
        assert!(validate_base_url("https://hwrecovery.example/workerId/").is_err());
    }

    #[test]
    fn accepts_plain_https_base_url() {
        assert!(validate_base_url("https://hwrecovery.example/").is_ok());
    }

    #[test]
    fn rejects_empty_and_oversized_provisioner_ids() {
        assert!(!valid_provisioner_id(""));
        assert!(!valid_provisioner_id(&"a".repeat(257)));
    }

    #[test]
    fn accepts_dash_and_underscore_in_provisioner_id() {
        assert!(valid_provisioner_id("releng-hardware_recovery"));
    }

    #[test]
    fn builds_one_catalog_entry_per_task_name_with_query_string() {
        let actions = build_catalog("https://hwrecovery.example/", &["reboot".to_string(), "ping".to_string()]).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].name, "reboot");
        assert!(actions[0].url.contains("task_name=reboot"));
        assert_eq!(actions[0].method, "POST");
        assert_eq!(actions[0].context, "worker-type");
    }
}
