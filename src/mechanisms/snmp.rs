//! `snmp_reboot`: power-cycle a host through its network PDU outlet.
//! Grounded on `original_source/.../snmp_reboot.py`'s OID arithmetic,
//! tower/infeed/outlet port parsing, and the off/sleep/on vs.
//! single-reboot branch on a configured delay.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tokio::time::{sleep, timeout};

use super::{Mechanism, MechanismContext, MechanismError};

const BASE_OID: &str = "1.3.6.1.4.1.1718.3.2.3.1.11";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PduAction {
    On = 1,
    Off = 2,
    Reboot = 3,
}

/// A PDU port spec is `<tower letter><infeed digit><outlet digits>`,
/// e.g. `A1.3` addresses tower A, infeed 1, outlet 3.
struct PduPort {
    tower: u8,
    infeed: u8,
    outlet: String,
}

fn tower_number(letter: char) -> Result<u8, MechanismError> {
    match letter.to_ascii_lowercase() {
        'a' => Ok(1),
        'b' => Ok(2),
        'c' => Ok(3),
        other => Err(MechanismError::Other(format!("unknown PDU tower letter: {other}"))),
    }
}

fn parse_port(port: &str) -> Result<PduPort, MechanismError> {
    let mut chars = port.chars();
    let tower_letter = chars
        .next()
        .ok_or_else(|| MechanismError::Other("empty PDU port spec".to_string()))?;
    let infeed_char = chars
        .next()
        .ok_or_else(|| MechanismError::Other(format!("PDU port spec too short: {port}")))?;
    let infeed = infeed_char
        .to_digit(10)
        .ok_or_else(|| MechanismError::Other(format!("non-numeric PDU infeed in: {port}")))? as u8;
    let outlet: String = chars.collect();
    let outlet = outlet.trim_start_matches('.').to_string();
    if outlet.is_empty() {
        return Err(MechanismError::Other(format!("missing PDU outlet in: {port}")));
    }

    Ok(PduPort {
        tower: tower_number(tower_letter)?,
        infeed,
        outlet,
    })
}

impl PduPort {
    fn oid(&self) -> String {
        format!("{BASE_OID}.{}.{}.{}", self.tower, self.infeed, self.outlet)
    }
}

pub struct SnmpReboot {
    /// `host:port` from the server's `pdu` field.
    pub pdu_spec: String,
    pub community: SecretString,
    /// Seconds to wait between off and on; 0 means a single `reboot`
    /// action code instead of an off/sleep/on sequence.
    pub delay: Duration,
}

impl SnmpReboot {
    fn split_spec(&self) -> Result<(&str, &str), MechanismError> {
        self.pdu_spec
            .split_once(':')
            .ok_or_else(|| MechanismError::MissingConfig("pdu".to_string()))
    }

    async fn snmpset(&self, fqdn: &str, oid: &str, action: PduAction, timeout_dur: Duration) -> Result<String, MechanismError> {
        let output = timeout(
            timeout_dur,
            Command::new("snmpset")
                .arg("-v")
                .arg("2c")
                .arg("-c")
                .arg(self.community.expose_secret())
                .arg(fqdn)
                .arg(oid)
                .arg("i")
                .arg((action as i32).to_string())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| MechanismError::Timeout)??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            Ok(stdout)
        } else {
            Err(MechanismError::NonZeroExit(output.status.code().unwrap_or(-1), stderr))
        }
    }
}

#[async_trait]
impl Mechanism for SnmpReboot {
    async fn run(&self, ctx: &MechanismContext<'_>) -> Result<String, MechanismError> {
        super::validate_host(ctx.fqdn)?;

        let (pdu_host, port) = self.split_spec()?;
        super::validate_host(pdu_host)?;
        let port = parse_port(port)?;
        let oid = port.oid();

        if self.delay.is_zero() {
            self.snmpset(pdu_host, &oid, PduAction::Reboot, ctx.timeout).await
        } else {
            let off_output = self.snmpset(pdu_host, &oid, PduAction::Off, ctx.timeout).await?;
            sleep(self.delay).await;
            let on_output = self.snmpset(pdu_host, &oid, PduAction::On, ctx.timeout).await?;
            Ok(format!("{off_output}{on_output}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tower_infeed_outlet() {
        let port = parse_port("A1.3").unwrap();
        assert_eq!(port.tower, 1);
        assert_eq!(port.infeed, 1);
        assert_eq!(port.outlet, "3");
        assert_eq!(port.oid(), "1.3.6.1.4.1.1718.3.2.3.1.11.1.1.3");
    }

    #[test]
    fn rejects_unknown_tower_letter() {
        assert!(parse_port("Z1.3").is_err());
    }

    #[test]
    fn rejects_missing_outlet() {
        assert!(parse_port("A1").is_err());
    }
}
