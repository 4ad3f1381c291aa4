//! The recovery loop: try each configured mechanism against a worker, in
//! order, until one proves the host came back up, falling back to filing
//! a ticket when every mechanism is exhausted or inapplicable. Grounded
//! on `original_source/.../reboot.py`'s `Command.handle()` — the same
//! iterate-skip-verify-continue shape, replacing its bare `except` blocks
//! with explicit `Result` matching (spec.md §9).

pub mod attempt_log;

use std::net::IpAddr;
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;

use crate::config::Config;
use crate::liveness;
use crate::mechanisms::ilo::IloReboot;
use crate::mechanisms::ipmi::{IpmiMode, IpmiReboot};
use crate::mechanisms::snmp::SnmpReboot;
use crate::mechanisms::ssh::SshReboot;
use crate::mechanisms::xen::XenapiReboot;
use crate::mechanisms::{Mechanism, MechanismContext, MechanismError, MechanismKind};
use crate::registry::Registry;
use crate::secrets::Redactor;
use crate::ticket::{TicketContext, TicketFiler, TicketOutcome};

use attempt_log::{AttemptLog, AttemptLogEntry, AttemptOutcome};

pub struct RecoveryOutcome {
    pub succeeded: bool,
    pub attempt_log: AttemptLog,
    pub ticket: Option<TicketOutcome>,
}

pub struct Orchestrator<'a> {
    pub config: &'a Config,
    pub registry: &'a Registry,
    pub ticket_filer: &'a dyn TicketFiler,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a Config, registry: &'a Registry, ticket_filer: &'a dyn TicketFiler) -> Self {
        Orchestrator { config, registry, ticket_filer }
    }

    fn build_mechanism(&self, kind: MechanismKind, fqdn: &str) -> Result<Box<dyn Mechanism + 'a>, MechanismError> {
        let server = self
            .registry
            .lookup(fqdn)
            .ok_or_else(|| MechanismError::MissingConfig("server".to_string()))?;

        match kind {
            MechanismKind::SshReboot => {
                let creds = server
                    .ssh
                    .clone()
                    .ok_or_else(|| MechanismError::MissingConfig("ssh".to_string()))?;
                Ok(Box::new(SshReboot::new(creds, 22)))
            }
            MechanismKind::IpmiReset | MechanismKind::IpmiCycle => {
                let has_ipmi = server.ipmi.is_some() || self.registry.parent_of(server).map(|p| p.ipmi.is_some()).unwrap_or(false);
                if !has_ipmi {
                    return Err(MechanismError::MissingConfig("ipmi".to_string()));
                }
                let mode = if kind == MechanismKind::IpmiCycle { IpmiMode::Cycle } else { IpmiMode::Reset };
                Ok(Box::new(IpmiReboot {
                    mode,
                    registry: self.registry,
                    privlvl: "OPERATOR",
                    power_status_wait: self.config.power_status_wait,
                    power_status_wait_interval: self.config.power_status_wait_interval,
                }))
            }
            MechanismKind::SnmpReboot => {
                let pdu_spec = server.pdu.clone().ok_or_else(|| MechanismError::MissingConfig("pdu".to_string()))?;
                let community = self
                    .registry
                    .snmp_community_string()
                    .cloned()
                    .ok_or_else(|| MechanismError::MissingConfig("snmp_community_string".to_string()))?;
                Ok(Box::new(SnmpReboot {
                    pdu_spec,
                    community,
                    delay: Duration::from_secs(10),
                }))
            }
            MechanismKind::XenapiReboot => {
                let xen = server.xen.clone().ok_or_else(|| MechanismError::MissingConfig("xen".to_string()))?;
                let xen_url = self.config.xen_url.clone().ok_or_else(|| MechanismError::MissingConfig("xen_url".to_string()))?;
                let username = self.config.xen_username.clone().ok_or_else(|| MechanismError::MissingConfig("xen_username".to_string()))?;
                let password = self.config.xen_password.clone().ok_or_else(|| MechanismError::MissingConfig("xen_password".to_string()))?;
                Ok(Box::new(XenapiReboot {
                    xen_url,
                    username,
                    password,
                    vm_ref: xen.xen_uuid,
                    shutdown_delay: Duration::from_secs(10),
                }))
            }
            MechanismKind::IloReboot => {
                let ilo = server.ilo.clone().ok_or_else(|| MechanismError::MissingConfig("ilo".to_string()))?;
                let login = ilo
                    .login
                    .or_else(|| self.config.ilo_username.clone())
                    .ok_or_else(|| MechanismError::MissingConfig("ilo_username".to_string()))?;
                let password: SecretString = ilo
                    .password
                    .or_else(|| self.config.ilo_password.clone())
                    .ok_or_else(|| MechanismError::MissingConfig("ilo_password".to_string()))?;
                Ok(Box::new(IloReboot {
                    host: ilo.host,
                    login,
                    password,
                    power_off_delay: Duration::from_secs(10),
                }))
            }
            MechanismKind::FileBugzillaBug => unreachable!("handled directly in run()"),
        }
    }

    fn secrets_for(&self, fqdn: &str) -> Vec<SecretString> {
        let mut out = Vec::new();
        if let Some(server) = self.registry.lookup(fqdn) {
            if let Some(ipmi) = &server.ipmi {
                out.push(ipmi.password.clone());
            }
            if let Some(ilo) = &server.ilo {
                if let Some(password) = &ilo.password {
                    out.push(password.clone());
                }
            }
            if let Some(parent) = self.registry.parent_of(server) {
                if let Some(ipmi) = &parent.ipmi {
                    out.push(ipmi.password.clone());
                }
            }
        }
        if let Some(community) = self.registry.snmp_community_string() {
            out.push(community.clone());
        }
        if let Some(password) = &self.config.xen_password {
            out.push(password.clone());
        }
        if let Some(password) = &self.config.ilo_password {
            out.push(password.clone());
        }
        if let Some(api_key) = &self.config.bugzilla_api_key {
            out.push(api_key.clone());
        }
        if let Some(token) = &self.config.taskcluster_access_token {
            out.push(token.clone());
        }
        out
    }

    pub async fn run(&self, worker_id: &str, fqdn: &str, ip: Option<IpAddr>, per_attempt_timeout: Duration) -> RecoveryOutcome {
        let secrets = self.secrets_for(fqdn);
        let secret_refs: Vec<&SecretString> = secrets.iter().collect();
        let redactor = Redactor::new(&secret_refs);

        let mut attempt_log = AttemptLog::new();

        for kind in &self.config.reboot_methods {
            if *kind == MechanismKind::FileBugzillaBug {
                break;
            }

            let started_at = Utc::now();
            let mechanism = match self.build_mechanism(*kind, fqdn) {
                Ok(m) => m,
                Err(MechanismError::MissingConfig(field)) => {
                    attempt_log.push(AttemptLogEntry {
                        mechanism: *kind,
                        started_at,
                        finished_at: Utc::now(),
                        outcome: AttemptOutcome::Skipped,
                        detail: format!("missing config: {field}"),
                    });
                    continue;
                }
                Err(err) => {
                    attempt_log.push(AttemptLogEntry {
                        mechanism: *kind,
                        started_at,
                        finished_at: Utc::now(),
                        outcome: AttemptOutcome::Failed,
                        detail: redactor.redact(&err.to_string()),
                    });
                    continue;
                }
            };

            let ctx = MechanismContext { fqdn, ip, server: self.registry.lookup(fqdn), timeout: per_attempt_timeout };

            let run_result = mechanism.run(&ctx).await;
            let ran_ok = run_result.is_ok();
            let detail = match &run_result {
                Ok(stdout) => redactor.redact(stdout),
                Err(err) => redactor.redact(&err.to_string()),
            };

            if !ran_ok {
                attempt_log.push(AttemptLogEntry {
                    mechanism: *kind,
                    started_at,
                    finished_at: Utc::now(),
                    outcome: AttemptOutcome::Failed,
                    detail,
                });
                continue;
            }

            let verified = liveness::reboot_succeeded(fqdn, self.config.down_timeout, self.config.up_timeout).await;

            attempt_log.push(AttemptLogEntry {
                mechanism: *kind,
                started_at,
                finished_at: Utc::now(),
                outcome: if verified { AttemptOutcome::Succeeded } else { AttemptOutcome::Failed },
                detail,
            });

            if verified {
                return RecoveryOutcome { succeeded: true, attempt_log, ticket: None };
            }
        }

        let failure_summary = attempt_log.summary_line();
        let last_mechanism = attempt_log.last_mechanism().map(|k| k.name()).unwrap_or("none");

        let ticket_ctx = TicketContext { worker_id, last_mechanism, failure_summary: &failure_summary };
        let ticket = self.ticket_filer.file(&ticket_ctx).await.ok();

        RecoveryOutcome { succeeded: false, attempt_log, ticket }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_every_mechanism_with_no_server_entry_and_falls_through_to_ticket() {
        struct NullTicketFiler;

        #[async_trait::async_trait]
        impl TicketFiler for NullTicketFiler {
            async fn file(&self, ctx: &TicketContext<'_>) -> Result<TicketOutcome, crate::ticket::TicketError> {
                Ok(TicketOutcome {
                    parent_bug_id: 1,
                    child_bug_id: 2,
                    url: format!("https://bugzilla.example/show_bug.cgi?id=2 for {}", ctx.worker_id),
                    child_was_new: true,
                })
            }
        }

        let config = {
            let mut c = test_config();
            c.reboot_methods = vec![MechanismKind::SshReboot, MechanismKind::FileBugzillaBug];
            c
        };
        let registry = Registry::empty();
        let ticket_filer = NullTicketFiler;
        let orchestrator = Orchestrator::new(&config, &registry, &ticket_filer);

        let outcome = orchestrator.run("t-w1064-ms-001", "t-w1064-ms-001.test.releng.mdc1.mozilla.com", None, Duration::from_millis(10)).await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempt_log.entries().len(), 1);
        assert_eq!(outcome.attempt_log.entries()[0].outcome, AttemptOutcome::Skipped);
        assert!(outcome.ticket.is_some());
    }

    fn test_config() -> Config {
        std::env::set_var("AUTH_VERIFIER_URL", "https://auth.example/verify");
        std::env::set_var("NOTIFY_BASE_URL", "https://notify.example");
        Config::from_env().expect("minimal env is sufficient for Config::from_env")
    }
}
