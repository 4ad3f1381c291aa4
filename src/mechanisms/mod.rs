//! Mechanism drivers: one pure-ish async function per recovery mechanism,
//! each a `(target, credentials, options) -> Result<stdout, MechanismError>`
//! as spec'd. Modeled on the teacher's `Tool` trait (`tools/tool.rs`): a
//! small async trait with one entry point and a typed error enum at the
//! same granularity as `ToolError`.

pub mod ilo;
pub mod ipmi;
pub mod snmp;
pub mod ssh;
pub mod xen;

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ServerConfig;

/// Closed set of recovery mechanisms. No dynamic command-class loading:
/// dispatch is a `match` over this enum (spec.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismKind {
    SshReboot,
    IpmiReset,
    IpmiCycle,
    SnmpReboot,
    XenapiReboot,
    IloReboot,
    FileBugzillaBug,
}

impl MechanismKind {
    /// Name used in attempt-log lines and completion summaries.
    pub fn name(&self) -> &'static str {
        match self {
            MechanismKind::SshReboot => "ssh_reboot",
            MechanismKind::IpmiReset => "ipmi_reset",
            MechanismKind::IpmiCycle => "ipmi_cycle",
            MechanismKind::SnmpReboot => "snmp_reboot",
            MechanismKind::XenapiReboot => "xenapi_reboot",
            MechanismKind::IloReboot => "ilo_reboot",
            MechanismKind::FileBugzillaBug => "file_bugzilla_bug",
        }
    }

    /// The default canonical order from spec.md §4.4.
    pub fn default_order() -> Vec<MechanismKind> {
        vec![
            MechanismKind::SshReboot,
            MechanismKind::IpmiReset,
            MechanismKind::IpmiCycle,
            MechanismKind::SnmpReboot,
            MechanismKind::XenapiReboot,
            MechanismKind::IloReboot,
            MechanismKind::FileBugzillaBug,
        ]
    }
}

impl FromStr for MechanismKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ssh_reboot" => Ok(MechanismKind::SshReboot),
            "ipmi_reset" => Ok(MechanismKind::IpmiReset),
            "ipmi_cycle" => Ok(MechanismKind::IpmiCycle),
            "snmp_reboot" => Ok(MechanismKind::SnmpReboot),
            "xenapi_reboot" => Ok(MechanismKind::XenapiReboot),
            "ilo_reboot" => Ok(MechanismKind::IloReboot),
            "file_bugzilla_bug" => Ok(MechanismKind::FileBugzillaBug),
            other => Err(format!("unknown reboot method: {other}")),
        }
    }
}

/// Errors a mechanism driver can raise. Exactly spec.md §9's `ErrorKind`.
#[derive(Debug, Error)]
pub enum MechanismError {
    #[error("timed out")]
    Timeout,

    #[error("command exited with status {0}: {1:?}")]
    NonZeroExit(i32, String),

    #[error("Key error: {0}")]
    MissingConfig(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for MechanismError {
    fn from(err: std::io::Error) -> Self {
        MechanismError::Other(err.to_string())
    }
}

/// Everything a driver needs to build its arguments and run.
pub struct MechanismContext<'a> {
    pub fqdn: &'a str,
    pub ip: Option<IpAddr>,
    pub server: Option<&'a ServerConfig>,
    pub timeout: Duration,
}

#[async_trait]
pub trait Mechanism: Send + Sync {
    async fn run(&self, ctx: &MechanismContext<'_>) -> Result<String, MechanismError>;
}

/// Validate a target host: lowercase alphanumerics/dot/dash/underscore, or
/// a valid IPv4/IPv6 literal. Shared by every driver per spec.md §4.6.
pub fn validate_host(host: &str) -> Result<(), MechanismError> {
    let hostname_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'));

    if hostname_ok || host.parse::<IpAddr>().is_ok() {
        Ok(())
    } else {
        Err(MechanismError::Other(format!("invalid host: {host}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_plain_hostnames_and_ips() {
        assert!(validate_host("tc-worker-1.test.releng.mdc1.mozilla.com").is_ok());
        assert!(validate_host("10.26.9.45").is_ok());
        assert!(validate_host("::1").is_ok());
        assert!(validate_host("Uppercase-Not-Allowed").is_err());
        assert!(validate_host("has spaces").is_err());
        assert!(validate_host("").is_err());
    }

    #[test]
    fn mechanism_kind_round_trips_through_name() {
        for kind in MechanismKind::default_order() {
            assert_eq!(kind.name().parse::<MechanismKind>().unwrap(), kind);
        }
    }

    #[test]
    fn default_order_matches_spec() {
        let order: Vec<&str> = MechanismKind::default_order().iter().map(|k| k.name()).collect();
        assert_eq!(
            order,
            vec![
                "ssh_reboot",
                "ipmi_reset",
                "ipmi_cycle",
                "snmp_reboot",
                "xenapi_reboot",
                "ilo_reboot",
                "file_bugzilla_bug",
            ]
        );
    }
}
