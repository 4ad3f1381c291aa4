//! `xenapi_reboot`: reboot a guest VM via its XenServer host's XenAPI.
//! Grounded on `original_source/.../xenapi_reboot.py`'s `xen_session`
//! context manager (clean shutdown, falling back to a hard shutdown, then
//! `VM.start`). No maintained Rust XenAPI binding exists in the corpus,
//! so this driver speaks the XML-RPC session protocol directly over
//! `reqwest`, already the teacher's HTTP client.
//!
//! The context manager becomes a guard struct (`XenSession`) whose `Drop`
//! spawns a best-effort logout if the caller never reached the explicit
//! `close()` call — spec.md §9's "scoped acquisition maps to a
//! function-level owned handle with guaranteed release."

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tokio::time::sleep;

use super::{Mechanism, MechanismContext, MechanismError};

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn call(method: &str, params_xml: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?><methodCall><methodName>{method}</methodName><params>{params_xml}</params></methodCall>"
    )
}

fn string_param(value: &str) -> String {
    format!("<param><value><string>{}</string></value></param>", xml_escape(value))
}

/// Extract the `Value` member's `<string>` payload from an XML-RPC
/// response shaped `{Status: "Success", Value: "..."}` — the standard
/// XenAPI response envelope. Looking for the first `<string>` tag in the
/// whole document would instead grab `Status`'s "Success"; a full
/// XML-RPC parser is not grounded in the corpus and would be overkill
/// for the single-scalar responses this driver needs.
fn extract_value_string(body: &str) -> Option<String> {
    let value_marker = "<name>Value</name>";
    let after_name = body.find(value_marker)? + value_marker.len();
    let rest = &body[after_name..];
    let start_tag = "<string>";
    let end_tag = "</string>";
    let start = rest.find(start_tag)? + start_tag.len();
    let end = rest[start..].find(end_tag)? + start;
    Some(rest[start..end].to_string())
}

fn response_is_failure(body: &str) -> bool {
    body.contains("<string>Failure</string>") || body.contains(">Failure<")
}

struct XenSession {
    client: Client,
    url: String,
    session_ref: Option<String>,
}

impl XenSession {
    async fn login(url: &str, username: &str, password: &SecretString) -> Result<Self, MechanismError> {
        let client = Client::new();
        let body = call(
            "session.login_with_password",
            &format!("{}{}", string_param(username), string_param(password.expose_secret())),
        );

        let resp = client
            .post(url)
            .header("Content-Type", "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| MechanismError::Other(e.to_string()))?
            .text()
            .await
            .map_err(|e| MechanismError::Other(e.to_string()))?;

        if response_is_failure(&resp) {
            return Err(MechanismError::Other(format!("XenAPI login failed: {resp}")));
        }

        let session_ref = extract_value_string(&resp).ok_or_else(|| MechanismError::Other("no session ref in login response".to_string()))?;

        Ok(XenSession {
            client,
            url: url.to_string(),
            session_ref: Some(session_ref),
        })
    }

    async fn call_method(&self, method: &str, extra_params_xml: &str) -> Result<String, MechanismError> {
        let session_ref = self
            .session_ref
            .as_ref()
            .ok_or_else(|| MechanismError::Other("session already closed".to_string()))?;

        let body = call(method, &format!("{}{}", string_param(session_ref), extra_params_xml));

        let resp = self
            .client
            .post(&self.url)
            .header("Content-Type", "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| MechanismError::Other(e.to_string()))?
            .text()
            .await
            .map_err(|e| MechanismError::Other(e.to_string()))?;

        if response_is_failure(&resp) {
            return Err(MechanismError::Other(format!("XenAPI call {method} failed: {resp}")));
        }
        Ok(resp)
    }

    async fn clean_shutdown(&self, vm_ref: &str) -> Result<(), MechanismError> {
        self.call_method("VM.clean_shutdown", &string_param(vm_ref)).await.map(|_| ())
    }

    async fn hard_shutdown(&self, vm_ref: &str) -> Result<(), MechanismError> {
        self.call_method("VM.hard_shutdown", &string_param(vm_ref)).await.map(|_| ())
    }

    async fn start(&self, vm_ref: &str) -> Result<(), MechanismError> {
        let params = format!(
            "{}<param><value><boolean>0</boolean></value></param><param><value><boolean>0</boolean></value></param>",
            string_param(vm_ref)
        );
        self.call_method("VM.start", &params).await.map(|_| ())
    }

    /// Explicit, awaited logout. Consumes the ref so `Drop` knows not to
    /// spawn a redundant cleanup task.
    async fn close(mut self) {
        if let Some(session_ref) = self.session_ref.take() {
            let _ = self
                .call_with_taken_ref("session.logout", &string_param(&session_ref))
                .await;
        }
    }

    async fn call_with_taken_ref(&self, method: &str, session_param_xml: &str) -> Result<String, MechanismError> {
        let body = call(method, session_param_xml);
        self.client
            .post(&self.url)
            .header("Content-Type", "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| MechanismError::Other(e.to_string()))?
            .text()
            .await
            .map_err(|e| MechanismError::Other(e.to_string()))
    }
}

impl Drop for XenSession {
    fn drop(&mut self) {
        if let Some(session_ref) = self.session_ref.take() {
            let client = self.client.clone();
            let url = self.url.clone();
            tokio::spawn(async move {
                let body = call("session.logout", &string_param(&session_ref));
                let _ = client.post(&url).header("Content-Type", "text/xml").body(body).send().await;
            });
        }
    }
}

pub struct XenapiReboot {
    pub xen_url: String,
    pub username: String,
    pub password: SecretString,
    pub vm_ref: String,
    pub shutdown_delay: Duration,
}

#[async_trait]
impl Mechanism for XenapiReboot {
    async fn run(&self, ctx: &MechanismContext<'_>) -> Result<String, MechanismError> {
        super::validate_host(ctx.fqdn)?;

        let session = tokio::time::timeout(
            ctx.timeout,
            XenSession::login(&self.xen_url, &self.username, &self.password),
        )
        .await
        .map_err(|_| MechanismError::Timeout)??;

        if session.clean_shutdown(&self.vm_ref).await.is_err() {
            session.hard_shutdown(&self.vm_ref).await?;
        }

        sleep(self.shutdown_delay).await;

        let result = session.start(&self.vm_ref).await;
        session.close().await;
        result.map(|_| "VM restarted".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_the_value_member_not_the_status() {
        let body = "<methodResponse><params><param><value><struct><member><name>Status</name><value><string>Success</string></value></member><member><name>Value</name><value><string>OpaqueRef:abc123</string></value></member></struct></value></param></params></methodResponse>";
        assert_eq!(extract_value_string(body).as_deref(), Some("OpaqueRef:abc123"));
    }

    #[test]
    fn detects_failure_responses() {
        let body = "<struct><member><name>Status</name><value><string>Failure</string></value></member></struct>";
        assert!(response_is_failure(body));
    }

    #[test]
    fn escapes_xml_special_characters() {
        assert_eq!(xml_escape("a&b<c>"), "a&amp;b&lt;c&gt;");
    }
}
