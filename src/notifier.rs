//! Outbound completion notifications (email + IRC), grounded on
//! `original_source/.../celery.py`'s `notify.email`/`notify.irc` task
//! calls: same payload shape, same Taskcluster-client-id-to-username
//! parse, same IRC message chunking (spec.md's 510-byte limit).

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use std::sync::LazyLock;
use thiserror::Error;

/// Extracts the LDAP username from either client id shape the fleet's
/// Taskcluster deployment issues: the Auth0-brokered
/// `mozilla-auth0/ad|Mozilla-LDAP|jdoe` form, or the direct
/// `mozilla-ldap/jdoe` form, each optionally suffixed `@mozilla.com`.
static LDAP_CLIENT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:mozilla-auth0/ad\|Mozilla-LDAP\||mozilla-ldap/)([^|@]+)(?:@mozilla\.com)?$")
        .expect("static regex")
});

const IRC_CHUNK_BYTES: usize = 510;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),
}

pub struct NotifyContext<'a> {
    pub requester_client_id: &'a str,
    pub subject: &'a str,
    pub content: &'a str,
    pub link: Option<&'a str>,
}

#[async_trait]
pub trait NotifyClient: Send + Sync {
    /// Email + chat, used for job completion notices.
    async fn notify(&self, ctx: &NotifyContext<'_>) -> Result<(), NotifyError>;

    /// Chat only, used for the `reboot` initiation notice (spec.md §4.2
    /// step 3: "no email").
    async fn notify_chat_only(&self, ctx: &NotifyContext<'_>) -> Result<(), NotifyError>;
}

/// Extract the LDAP username from a Taskcluster client id, if the client
/// id matches the `mozilla-ldap/...@mozilla.com` shape; otherwise `None`.
pub fn ldap_username(client_id: &str) -> Option<&str> {
    LDAP_CLIENT_ID.captures(client_id).map(|c| c.get(1).unwrap().as_str())
}

/// Split `text` into chunks no larger than [`IRC_CHUNK_BYTES`] bytes,
/// breaking on UTF-8 boundaries only.
pub fn chunk_for_irc(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;

    while start < bytes.len() {
        let mut end = (start + IRC_CHUNK_BYTES).min(bytes.len());
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        chunks.push(text[start..end].to_string());
        start = end;
    }

    chunks
}

#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    address: &'a str,
    subject: &'a str,
    content: &'a str,
    link: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct IrcPayload<'a> {
    channel: &'a str,
    message: &'a str,
}

pub struct ReqwestNotifyClient {
    client: Client,
    base_url: String,
    email_address: Option<String>,
    irc_channel: Option<String>,
}

impl ReqwestNotifyClient {
    pub fn new(base_url: String) -> Self {
        ReqwestNotifyClient {
            client: Client::new(),
            base_url,
            email_address: None,
            irc_channel: None,
        }
    }

    pub fn with_defaults(mut self, email_address: Option<String>, irc_channel: Option<String>) -> Self {
        self.email_address = email_address;
        self.irc_channel = irc_channel;
        self
    }

    /// Sends one message to the configured operations address and one to
    /// the caller's parsed username (spec.md §4.8): two independent
    /// addresses, not a fallback chain.
    async fn send_email(&self, ctx: &NotifyContext<'_>) -> Result<(), NotifyError> {
        for address in self.email_recipients(ctx) {
            let payload = EmailPayload { address: &address, subject: ctx.subject, content: ctx.content, link: ctx.link };
            self.client
                .post(format!("{}/email", self.base_url))
                .json(&payload)
                .send()
                .await?
                .error_for_status()?;
        }
        Ok(())
    }

    async fn send_irc(&self, ctx: &NotifyContext<'_>) -> Result<(), NotifyError> {
        let Some(channel) = &self.irc_channel else { return Ok(()) };
        let combined = format!("{}: {}", ctx.subject, ctx.content);
        for chunk in chunk_for_irc(&combined) {
            let payload = IrcPayload { channel, message: &chunk };
            self.client
                .post(format!("{}/irc", self.base_url))
                .json(&payload)
                .send()
                .await?
                .error_for_status()?;
        }
        Ok(())
    }

    fn email_recipients(&self, ctx: &NotifyContext<'_>) -> Vec<String> {
        let mut recipients = Vec::new();
        if let Some(address) = &self.email_address {
            recipients.push(address.clone());
        }
        if let Some(username) = ldap_username(ctx.requester_client_id) {
            recipients.push(format!("{username}@mozilla.com"));
        }
        recipients
    }
}

#[async_trait]
impl NotifyClient for ReqwestNotifyClient {
    async fn notify(&self, ctx: &NotifyContext<'_>) -> Result<(), NotifyError> {
        self.send_email(ctx).await?;
        self.send_irc(ctx).await?;
        Ok(())
    }

    async fn notify_chat_only(&self, ctx: &NotifyContext<'_>) -> Result<(), NotifyError> {
        self.send_irc(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ldap_username_from_client_id() {
        assert_eq!(ldap_username("mozilla-ldap/jdoe@mozilla.com"), Some("jdoe"));
        assert_eq!(ldap_username("mozilla-ldap/jdoe"), Some("jdoe"));
        assert_eq!(ldap_username("project:releng:hardware/reboot-worker"), None);
    }

    #[test]
    fn extracts_ldap_username_from_auth0_brokered_client_id() {
        assert_eq!(ldap_username("mozilla-auth0/ad|Mozilla-LDAP|jdoe"), Some("jdoe"));
        assert_eq!(ldap_username("mozilla-auth0/ad|Mozilla-LDAP|jdoe@mozilla.com"), Some("jdoe"));
    }

    #[test]
    fn chunks_long_content_on_byte_boundary() {
        let text = "x".repeat(1200);
        let chunks = chunk_for_irc(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 510);
        assert_eq!(chunks[1].len(), 510);
        assert_eq!(chunks[2].len(), 180);
    }

    #[test]
    fn empty_content_produces_no_chunks() {
        assert!(chunk_for_irc("").is_empty());
    }
}
