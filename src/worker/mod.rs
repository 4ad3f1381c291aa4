//! Asynchronous job dispatch: pulls a `Job` descriptor off the queue,
//! resolves the target host, dispatches to the right mechanism family,
//! notifies, and persists a result. Grounded on
//! `original_source/.../celery.py`'s `celery_call_command` task body
//! (resolve, dispatch-by-task-name, classify, notify, persist) and the
//! teacher's fixed-pool-of-tokio-tasks shape for async job processing.

pub mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::liveness;
use crate::mechanisms::ipmi::{IpmiMode, IpmiReboot};
use crate::mechanisms::{Mechanism, MechanismContext, MechanismError};
use crate::notifier::{NotifyClient, NotifyContext};
use crate::orchestrator::attempt_log::AttemptLog;
use crate::orchestrator::Orchestrator;
use crate::registry::Registry;
use crate::resolver::HostResolver;
use crate::ticket::{TicketContext, TicketFiler};

use store::JobStore;

/// The authenticated caller that requested a job, carried through for
/// notification addressing (spec.md §3's `Caller`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caller {
    pub client_id: String,
    pub scopes: Vec<String>,
}

/// A unit of work enqueued by the HTTP front and drained by a worker
/// slot. Spec.md §3's `Job` entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub worker_id: String,
    pub task_name: String,
    pub requested_by: Caller,
    pub created_at: DateTime<Utc>,
}

/// The single persisted outcome of a job. Written exactly once per job
/// (spec.md §3's invariant: on crash mid-job, the result is simply
/// absent — no false "success" is ever visible).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobResult {
    pub id: Uuid,
    pub worker_id: String,
    pub succeeded: bool,
    pub summary: String,
    pub attempt_log: Vec<crate::orchestrator::attempt_log::AttemptLogEntry>,
    pub ticket_url: Option<String>,
    pub completed_at: DateTime<Utc>,
}

pub struct Worker {
    config: Config,
    registry: Arc<Registry>,
    resolver: Arc<dyn HostResolver>,
    notifier: Arc<dyn NotifyClient>,
    ticket_filer: Arc<dyn TicketFiler>,
    job_store: Arc<dyn JobStore>,
}

impl Worker {
    pub fn new(
        config: Config,
        registry: Arc<Registry>,
        resolver: Arc<dyn HostResolver>,
        notifier: Arc<dyn NotifyClient>,
        ticket_filer: Arc<dyn TicketFiler>,
        job_store: Arc<dyn JobStore>,
    ) -> Self {
        Worker { config, registry, resolver, notifier, ticket_filer, job_store }
    }

    /// Spawn `concurrency` worker tasks draining `job_rx`. Each task owns
    /// one job at a time; mechanism order within a job stays strictly
    /// sequential (spec.md §5) but distinct jobs race independently
    /// across the pool.
    pub fn spawn_pool(&self, job_rx: mpsc::Receiver<Job>, concurrency: usize) {
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        for slot in 0..concurrency {
            let job_rx = job_rx.clone();
            let worker = self.clone_shared();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = job_rx.lock().await;
                        rx.recv().await
                    };
                    match job {
                        Some(job) => worker.handle_job(job).await,
                        None => {
                            tracing::info!(slot, "job queue closed, worker slot exiting");
                            break;
                        }
                    }
                }
            });
        }
    }

    fn clone_shared(&self) -> Worker {
        Worker {
            config: self.config.clone(),
            registry: self.registry.clone(),
            resolver: self.resolver.clone(),
            notifier: self.notifier.clone(),
            ticket_filer: self.ticket_filer.clone(),
            job_store: self.job_store.clone(),
        }
    }

    async fn handle_job(&self, job: Job) {
        if let Err(err) = self.job_store.insert_job(&job).await {
            tracing::error!(job_id = %job.id, error = %err, "failed to record job before execution");
        }

        let (fqdn, ip) = match self.resolver.resolve(&job.worker_id).await {
            Ok((fqdn, ip)) => (fqdn, Some(ip)),
            Err(err) => {
                tracing::warn!(worker_id = %job.worker_id, error = %err, "host resolution failed, continuing with raw worker id");
                (job.worker_id.clone(), None)
            }
        };

        if job.task_name == "reboot" {
            let subject = format!("{}[{}] {}", job.worker_id, ip.map(|a| a.to_string()).unwrap_or_default(), job.task_name);
            let ctx = NotifyContext {
                requester_client_id: &job.requested_by.client_id,
                subject: &subject,
                content: &format!("{} requested by {}", subject, job.requested_by.client_id),
                link: None,
            };
            if let Err(err) = self.notifier.notify_chat_only(&ctx).await {
                tracing::warn!(job_id = %job.id, error = %err, "initiation notice failed");
            }
        }

        let (succeeded, summary, attempt_log, ticket_url) = self.dispatch(&job, &fqdn, ip).await;

        let subject = format!("{}[{}] {}", job.worker_id, ip.map(|a| a.to_string()).unwrap_or_default(), job.task_name);
        let ctx = NotifyContext {
            requester_client_id: &job.requested_by.client_id,
            subject: &subject,
            content: &summary,
            link: ticket_url.as_deref(),
        };
        if let Err(err) = self.notifier.notify(&ctx).await {
            tracing::warn!(job_id = %job.id, error = %err, "completion notice failed");
        }

        let result = JobResult {
            id: job.id,
            worker_id: job.worker_id.clone(),
            succeeded,
            summary,
            attempt_log: attempt_log.entries().to_vec(),
            ticket_url,
            completed_at: Utc::now(),
        };

        if let Err(err) = self.job_store.record_result(&result).await {
            tracing::error!(job_id = %job.id, error = %err, "failed to persist job result");
        }
    }

    /// Classify and run one job to completion, per spec.md §4.2 step 2/4.
    async fn dispatch(&self, job: &Job, fqdn: &str, ip: Option<std::net::IpAddr>) -> (bool, String, AttemptLog, Option<String>) {
        if let Some(subcommand) = job.task_name.strip_prefix("ipmi_") {
            return self.dispatch_ipmi(subcommand, fqdn, ip).await;
        }

        match job.task_name.as_str() {
            "reboot" => {
                let orchestrator = Orchestrator::new(&self.config, &self.registry, self.ticket_filer.as_ref());
                let outcome = orchestrator.run(&job.worker_id, fqdn, ip, Duration::from_secs(60)).await;
                let summary = outcome.attempt_log.summary_line();
                let summary = if outcome.succeeded {
                    summary
                } else if let Some(ticket) = &outcome.ticket {
                    format!("failed. bug {}", ticket.child_bug_id)
                } else {
                    format!("all mechanisms failed. {summary}")
                };
                (outcome.succeeded, summary, outcome.attempt_log, outcome.ticket.map(|t| t.url))
            }
            "ping" => {
                let up = liveness::can_ping(fqdn).await;
                (up, if up { "host is up".to_string() } else { "host is down".to_string() }, AttemptLog::new(), None)
            }
            "file_bugzilla_bug" => {
                let ctx = TicketContext { worker_id: &job.worker_id, last_mechanism: "manual", failure_summary: "manually requested ticket" };
                match self.ticket_filer.file(&ctx).await {
                    Ok(outcome) => (true, format!("filed bug {}", outcome.child_bug_id), AttemptLog::new(), Some(outcome.url)),
                    Err(err) => (false, err.to_string(), AttemptLog::new(), None),
                }
            }
            "reimage" => {
                // Stub-grade per spec.md §1's Non-goals; kept as a named
                // task so the catalog entry exists without claiming the
                // feature works.
                (false, MechanismError::Other("reimage is not implemented".to_string()).to_string(), AttemptLog::new(), None)
            }
            other => (false, format!("Key error: unknown task_name {other}"), AttemptLog::new(), None),
        }
    }

    async fn dispatch_ipmi(&self, subcommand: &str, fqdn: &str, ip: Option<std::net::IpAddr>) -> (bool, String, AttemptLog, Option<String>) {
        let ctx = MechanismContext { fqdn, ip, server: self.registry.lookup(fqdn), timeout: Duration::from_secs(60) };
        let mechanism = IpmiReboot {
            mode: IpmiMode::Cycle,
            registry: &self.registry,
            privlvl: "OPERATOR",
            power_status_wait: self.config.power_status_wait,
            power_status_wait_interval: self.config.power_status_wait_interval,
        };

        // `ipmi_reset`/`ipmi_cycle` run the full orchestrated sequences;
        // everything else is a literal `power <words>` passthrough.
        let result = match subcommand {
            "reset" => {
                let mechanism = IpmiReboot { mode: IpmiMode::Reset, ..mechanism };
                mechanism.run(&ctx).await
            }
            "cycle" => mechanism.run(&ctx).await,
            "on" => mechanism.run_passthrough(&ctx, &["power", "on"]).await,
            "off" => mechanism.run_passthrough(&ctx, &["power", "off"]).await,
            "status" => mechanism.run_passthrough(&ctx, &["power", "status"]).await,
            other => mechanism.run_passthrough(&ctx, &["power", other]).await,
        };

        match result {
            Ok(out) => (true, out, AttemptLog::new(), None),
            Err(err) => (false, classify_error(&err), AttemptLog::new(), None),
        }
    }
}

/// Spec.md §4.2 step 4's terminal-condition classification.
fn classify_error(err: &MechanismError) -> String {
    match err {
        MechanismError::Timeout => "timed out".to_string(),
        MechanismError::NonZeroExit(_, output) => output.clone(),
        MechanismError::MissingConfig(key) => format!("Key error: {key}"),
        MechanismError::Other(message) => message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_missing_config_as_key_error() {
        let err = MechanismError::MissingConfig("ipmi".to_string());
        assert_eq!(classify_error(&err), "Key error: ipmi");
    }

    #[test]
    fn classifies_timeout_with_fixed_message() {
        assert_eq!(classify_error(&MechanismError::Timeout), "timed out");
    }

    #[test]
    fn classifies_non_zero_exit_as_captured_output() {
        let err = MechanismError::NonZeroExit(1, "device busy".to_string());
        assert_eq!(classify_error(&err), "device busy");
    }
}
