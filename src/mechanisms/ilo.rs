//! `ilo_reboot`: power-cycle a host via its HP iLO management processor.
//! Grounded on `original_source/.../ilo_reboot.py`'s
//! `get_host_power_status` / `reset_server` (falling back to
//! `set_host_power(False)`, a sleep, then `set_host_power(True)`). Speaks
//! iLO's RIBCL-over-HTTPS protocol directly over `reqwest`, since no
//! maintained Rust `hpilo` binding exists in the corpus.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tokio::time::sleep;

use super::{Mechanism, MechanismContext, MechanismError};

fn ribcl_envelope(login: &str, password: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<RIBCL VERSION=\"2.0\">\n<LOGIN USER_LOGIN=\"{login}\" PASSWORD=\"{password}\">\n{body}\n</LOGIN>\n</RIBCL>"
    )
}

fn power_status_request() -> String {
    "<SERVER_INFO MODE=\"read\"><GET_HOST_POWER_STATUS/></SERVER_INFO>".to_string()
}

fn set_power_request(on: bool) -> String {
    let state = if on { "Yes" } else { "No" };
    format!("<SERVER_INFO MODE=\"write\"><SET_HOST_POWER HOST_POWER=\"{state}\"/></SERVER_INFO>")
}

fn reset_server_request() -> String {
    "<SERVER_INFO MODE=\"write\"><RESET_SERVER/></SERVER_INFO>".to_string()
}

fn parse_power_status(body: &str) -> Option<String> {
    let key = "HOST_POWER=\"";
    let start = body.find(key)? + key.len();
    let end = body[start..].find('"')? + start;
    Some(body[start..end].to_string())
}

pub struct IloReboot {
    pub host: String,
    pub login: String,
    pub password: SecretString,
    pub power_off_delay: Duration,
}

impl IloReboot {
    async fn post(&self, client: &Client, body: &str, timeout: Duration) -> Result<String, MechanismError> {
        let envelope = ribcl_envelope(&self.login, self.password.expose_secret(), body);
        let resp = tokio::time::timeout(
            timeout,
            client
                .post(format!("https://{}/ribcl", self.host))
                .header("Content-Type", "text/xml")
                .body(envelope)
                .send(),
        )
        .await
        .map_err(|_| MechanismError::Timeout)?
        .map_err(|e| MechanismError::Other(e.to_string()))?;

        resp.text().await.map_err(|e| MechanismError::Other(e.to_string()))
    }

    async fn get_host_power_status(&self, client: &Client, timeout: Duration) -> Result<String, MechanismError> {
        let body = self.post(client, &power_status_request(), timeout).await?;
        parse_power_status(&body).ok_or_else(|| MechanismError::Other("no HOST_POWER in iLO response".to_string()))
    }

    async fn set_host_power(&self, client: &Client, on: bool, timeout: Duration) -> Result<(), MechanismError> {
        self.post(client, &set_power_request(on), timeout).await.map(|_| ())
    }

    async fn reset_server(&self, client: &Client, timeout: Duration) -> Result<(), MechanismError> {
        self.post(client, &reset_server_request(), timeout).await.map(|_| ())
    }
}

#[async_trait]
impl Mechanism for IloReboot {
    async fn run(&self, ctx: &MechanismContext<'_>) -> Result<String, MechanismError> {
        super::validate_host(ctx.fqdn)?;

        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| MechanismError::Other(e.to_string()))?;

        if self.reset_server(&client, ctx.timeout).await.is_err() {
            self.set_host_power(&client, false, ctx.timeout).await?;
            sleep(self.power_off_delay).await;
            self.set_host_power(&client, true, ctx.timeout).await?;
        }

        let status = self.get_host_power_status(&client, ctx.timeout).await.unwrap_or_default();
        Ok(format!("power status: {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_power_status() {
        let body = "<RIBCL VERSION=\"2.21\"><RESPONSE STATUS=\"0x0000\"/><GET_HOST_POWER_STATUS HOST_POWER=\"ON\"/></RIBCL>";
        assert_eq!(parse_power_status(body).as_deref(), Some("ON"));
    }

    #[test]
    fn builds_set_power_request_with_expected_state() {
        assert!(set_power_request(true).contains("HOST_POWER=\"Yes\""));
        assert!(set_power_request(false).contains("HOST_POWER=\"No\""));
    }
}
