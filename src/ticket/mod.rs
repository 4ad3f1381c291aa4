//! Ticket filing: when every reboot mechanism has been exhausted, open
//! (or reopen) a tracker bug for the worker and a child bug for this
//! reboot attempt. Grounded on
//! `original_source/.../file_bugzilla_bug.py`: a parent "tracker" bug per
//! worker, found by alias and reopened if resolved, plus a deduplicated
//! child bug per failure summary, linked into the parent's `blocks` set.

pub mod template;

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("bugzilla is not configured (BUGZILLA_URL/BUGZILLA_API_KEY unset)")]
    NotConfigured,

    #[error("bugzilla request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("bugzilla returned an unexpected response: {0}")]
    UnexpectedResponse(String),
}

pub struct TicketContext<'a> {
    pub worker_id: &'a str,
    pub last_mechanism: &'a str,
    pub failure_summary: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketOutcome {
    pub parent_bug_id: u64,
    pub child_bug_id: u64,
    pub url: String,
    pub child_was_new: bool,
}

#[async_trait]
pub trait TicketFiler: Send + Sync {
    async fn file(&self, ctx: &TicketContext<'_>) -> Result<TicketOutcome, TicketError>;
}

#[derive(Debug, Deserialize)]
struct BugSearchResponse {
    bugs: Vec<BugSummary>,
}

#[derive(Debug, Deserialize)]
struct BugSummary {
    id: u64,
    #[serde(default)]
    resolution: String,
}

#[derive(Debug, Deserialize)]
struct CreateBugResponse {
    id: u64,
}

pub struct ReqwestTicketFiler {
    client: Client,
    config: Config,
}

impl ReqwestTicketFiler {
    pub fn new(config: Config) -> Self {
        ReqwestTicketFiler {
            client: Client::new(),
            config,
        }
    }

    fn base_url(&self) -> Result<&str, TicketError> {
        self.config.bugzilla_url.as_deref().ok_or(TicketError::NotConfigured)
    }

    fn api_key(&self) -> Result<&str, TicketError> {
        self.config
            .bugzilla_api_key
            .as_ref()
            .map(|s| s.expose_secret())
            .ok_or(TicketError::NotConfigured)
    }

    /// Find a bug by alias. `Ok(None)` distinguishes "genuinely not
    /// found" (HTTP 404, or an empty result set) from a transient network
    /// or server error, which propagates as `Err` instead of silently
    /// falling through to bug creation and risking a duplicate.
    async fn find_by_alias(&self, alias: &str) -> Result<Option<BugSummary>, TicketError> {
        let url = format!("{}/rest/bug", self.base_url()?);
        let resp = self
            .client
            .get(&url)
            .query(&[("alias", alias), ("api_key", self.api_key()?)])
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        let parsed: BugSearchResponse = resp.json().await?;
        Ok(parsed.bugs.into_iter().next())
    }

    async fn find_open_duplicate(&self, summary: &str, product: &str, component: &str) -> Result<Option<BugSummary>, TicketError> {
        let url = format!("{}/rest/bug", self.base_url()?);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("summary", summary),
                ("product", product),
                ("component", component),
                ("resolution", "---"),
                ("api_key", self.api_key()?),
            ])
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        let parsed: BugSearchResponse = resp.json().await?;
        Ok(parsed.bugs.into_iter().find(|b| b.resolution.is_empty() || b.resolution == "---"))
    }

    async fn reopen(&self, bug_id: u64) -> Result<(), TicketError> {
        let url = format!("{}/rest/bug/{bug_id}", self.base_url()?);
        self.client
            .put(&url)
            .query(&[("api_key", self.api_key()?)])
            .json(&json!({ "status": self.config.bugzilla_reopen_state }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn create_bug(&self, product: &str, component: &str, summary: &str, description: &str, alias: Option<&str>) -> Result<u64, TicketError> {
        let url = format!("{}/rest/bug", self.base_url()?);
        let mut body = json!({
            "product": product,
            "component": component,
            "summary": summary,
            "description": description,
            "version": "unspecified",
            "op_sys": "All",
            "platform": "All",
        });
        if let Some(alias) = alias {
            body["alias"] = json!(alias);
        }

        let resp = self
            .client
            .post(&url)
            .query(&[("api_key", self.api_key()?)])
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: CreateBugResponse = resp.json().await?;
        Ok(parsed.id)
    }

    async fn add_comment(&self, bug_id: u64, comment: &str) -> Result<(), TicketError> {
        let url = format!("{}/rest/bug/{bug_id}/comment", self.base_url()?);
        self.client
            .post(&url)
            .query(&[("api_key", self.api_key()?)])
            .json(&json!({ "comment": comment }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// PUT on the child bug, adding the parent to its `blocks` set — the
    /// child blocks the parent tracker (spec.md §4.7: "Then PUT
    /// `{blocks: {add: [parent_id]}}` on the child").
    async fn link_child_to_parent(&self, parent_id: u64, child_id: u64) -> Result<(), TicketError> {
        let url = format!("{}/rest/bug/{child_id}", self.base_url()?);
        self.client
            .put(&url)
            .query(&[("api_key", self.api_key()?)])
            .json(&json!({ "blocks": { "add": [parent_id] } }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    fn substitute(&self, tmpl: &str, vars: &HashMap<String, String>) -> String {
        template::safe_substitute(tmpl, vars)
    }
}

const TRACKER_PRODUCT: &str = "Infrastructure & Operations";
const TRACKER_COMPONENT: &str = "RelOps: General";

#[async_trait]
impl TicketFiler for ReqwestTicketFiler {
    async fn file(&self, ctx: &TicketContext<'_>) -> Result<TicketOutcome, TicketError> {
        let tracker_alias = format!("{}-tracker", ctx.worker_id);

        let mut vars = HashMap::new();
        vars.insert("worker_id".to_string(), ctx.worker_id.to_string());
        vars.insert("mechanism".to_string(), ctx.last_mechanism.to_string());
        vars.insert("summary".to_string(), ctx.failure_summary.to_string());

        let parent_id = match self.find_by_alias(&tracker_alias).await? {
            Some(bug) if bug.resolution.is_empty() || bug.resolution == "---" => bug.id,
            Some(bug) => {
                self.reopen(bug.id).await?;
                bug.id
            }
            None => {
                let tracker_template = self
                    .config
                    .bugzilla_worker_tracker_template
                    .as_deref()
                    .unwrap_or("Hardware recovery tracker for $worker_id");
                let summary = self.substitute(tracker_template, &vars);
                self.create_bug(TRACKER_PRODUCT, TRACKER_COMPONENT, &summary, &summary, Some(&tracker_alias))
                    .await?
            }
        };

        let reboot_template = self
            .config
            .bugzilla_reboot_template
            .as_deref()
            .unwrap_or("$worker_id: automatic reboot failed after exhausting $mechanism");
        let child_summary = self.substitute(reboot_template, &vars);

        if let Some(existing) = self.find_open_duplicate(&child_summary, TRACKER_PRODUCT, TRACKER_COMPONENT).await? {
            let description = format!("{}\n\n{}", child_summary, ctx.failure_summary);
            self.add_comment(existing.id, &description).await?;
            self.link_child_to_parent(parent_id, existing.id).await?;
            return Ok(TicketOutcome {
                parent_bug_id: parent_id,
                child_bug_id: existing.id,
                url: format!("{}/show_bug.cgi?id={}", self.base_url()?, existing.id),
                child_was_new: false,
            });
        }

        let description = format!("{}\n\n{}", child_summary, ctx.failure_summary);
        let child_id = self
            .create_bug(TRACKER_PRODUCT, TRACKER_COMPONENT, &child_summary, &description, None)
            .await?;
        self.link_child_to_parent(parent_id, child_id).await?;

        Ok(TicketOutcome {
            parent_bug_id: parent_id,
            child_bug_id: child_id,
            url: format!("{}/show_bug.cgi?id={}", self.base_url()?, child_id),
            child_was_new: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bug_search_response_parses_resolution_default() {
        let parsed: BugSearchResponse = serde_json::from_str(r#"{"bugs":[{"id":42}]}"#).unwrap();
        assert_eq!(parsed.bugs[0].resolution, "");
    }
}
