//! Process configuration, assembled once in `main` and threaded through
//! explicitly (no ambient global state), matching the teacher's
//! `cli/config.rs` `Settings::load()` pattern. Option names and defaults
//! are taken from `original_source/.../settings.py`'s `Base` class
//! (spec.md §6).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use crate::mechanisms::MechanismKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {source}")]
    InvalidAddr {
        name: &'static str,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("invalid value for {name}: {source}")]
    InvalidInt {
        name: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("invalid reboot method in REBOOT_METHODS: {0}")]
    InvalidMechanism(String),

    #[error("invalid JSON in {name}: {source}")]
    InvalidJson {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything the controller needs to run, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub worker_config_path: PathBuf,

    pub database_url: Option<String>,
    pub job_queue_capacity: usize,
    pub worker_concurrency: usize,

    pub auth_verifier_url: String,
    pub taskcluster_client_id: Option<String>,
    pub taskcluster_access_token: Option<SecretString>,

    pub cors_origin: String,
    pub allowed_hosts: Vec<String>,
    pub use_x_forwarded_host: bool,

    pub task_names: Vec<String>,
    pub required_scope_sets: HashMap<String, Vec<Vec<String>>>,
    pub valid_worker_id_regex: String,
    pub enforce_worker_known: bool,

    pub reboot_methods: Vec<MechanismKind>,
    pub down_timeout: Duration,
    pub up_timeout: Duration,
    pub power_status_wait: Duration,
    pub power_status_wait_interval: Duration,

    pub notify_base_url: String,
    pub notify_email: Option<String>,
    pub notify_irc_channel: Option<String>,

    pub bugzilla_url: Option<String>,
    pub bugzilla_api_key: Option<SecretString>,
    pub bugzilla_reopen_state: String,
    pub bugzilla_reboot_template: Option<String>,
    pub bugzilla_worker_tracker_template: Option<String>,

    pub xen_url: Option<String>,
    pub xen_username: Option<String>,
    pub xen_password: Option<SecretString>,

    pub ilo_username: Option<String>,
    pub ilo_password: Option<SecretString>,

    pub orchestrator_base_url: String,
}

fn env_opt(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_or(name: &'static str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_required(name: &'static str) -> Result<String, ConfigError> {
    env_opt(name).ok_or(ConfigError::Missing(name))
}

fn env_bool(name: &'static str, default: bool) -> bool {
    match env_opt(name) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env_opt(name) {
        Some(v) => v
            .parse()
            .map_err(|source| ConfigError::InvalidInt { name, source }),
        None => Ok(default),
    }
}

fn env_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env_opt(name) {
        Some(v) => v
            .parse()
            .map_err(|source| ConfigError::InvalidInt { name, source }),
        None => Ok(default),
    }
}

fn env_list(name: &'static str, default: &[&str]) -> Vec<String> {
    match env_opt(name) {
        Some(v) => v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = env_or("BIND_ADDR", "0.0.0.0:8080");
        let bind_addr = bind_addr_raw
            .parse()
            .map_err(|source| ConfigError::InvalidAddr { name: "BIND_ADDR", source })?;

        let reboot_methods = env_list(
            "REBOOT_METHODS",
            &[
                "ssh_reboot",
                "ipmi_reset",
                "ipmi_cycle",
                "snmp_reboot",
                "xenapi_reboot",
                "ilo_reboot",
                "file_bugzilla_bug",
            ],
        )
        .into_iter()
        .map(|s| s.parse::<MechanismKind>().map_err(ConfigError::InvalidMechanism))
        .collect::<Result<Vec<_>, _>>()?;

        let required_scope_sets = match env_opt("REQUIRED_TASKCLUSTER_SCOPE_SETS") {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|source| ConfigError::InvalidJson { name: "REQUIRED_TASKCLUSTER_SCOPE_SETS", source })?,
            None => {
                let mut defaults = HashMap::new();
                defaults.insert(
                    "reboot".to_string(),
                    vec![vec!["project:releng:hardware:reboot".to_string()]],
                );
                defaults
            }
        };

        Ok(Config {
            bind_addr,
            worker_config_path: PathBuf::from(env_or("WORKER_CONFIG", "/etc/hwrecovery/workers.json")),

            database_url: env_opt("DATABASE_URL"),
            job_queue_capacity: env_usize("JOB_QUEUE_CAPACITY", 256)?,
            worker_concurrency: env_usize("WORKER_CONCURRENCY", 8)?,

            auth_verifier_url: env_required("AUTH_VERIFIER_URL")?,
            taskcluster_client_id: env_opt("TASKCLUSTER_CLIENT_ID"),
            taskcluster_access_token: env_opt("TASKCLUSTER_ACCESS_TOKEN").map(SecretString::from),

            cors_origin: env_or("CORS_ORIGIN", "*"),
            allowed_hosts: env_list("ALLOWED_HOSTS", &["*"]),
            use_x_forwarded_host: env_bool("USE_X_FORWARDED_HOST", false),

            task_names: env_list("TASK_NAMES", &["reboot", "ipmi", "ping", "file_bugzilla_bug"]),
            required_scope_sets,
            valid_worker_id_regex: env_or("VALID_WORKER_ID_REGEX", r"^[a-z0-9][a-z0-9._-]{0,63}$"),
            enforce_worker_known: env_bool("ENFORCE_WORKER_KNOWN", false),

            reboot_methods,
            down_timeout: Duration::from_secs(env_u64("DOWN_TIMEOUT", 60)?),
            up_timeout: Duration::from_secs(env_u64("UP_TIMEOUT", 300)?),
            power_status_wait: Duration::from_secs(env_u64("POWER_STATUS_WAIT", 120)?),
            power_status_wait_interval: Duration::from_secs(env_u64("POWER_STATUS_WAIT_INTERVAL", 5)?),

            notify_base_url: env_required("NOTIFY_BASE_URL")?,
            notify_email: env_opt("NOTIFY_EMAIL"),
            notify_irc_channel: env_opt("NOTIFY_IRC_CHANNEL"),

            bugzilla_url: env_opt("BUGZILLA_URL"),
            bugzilla_api_key: env_opt("BUGZILLA_API_KEY").map(SecretString::from),
            bugzilla_reopen_state: env_or("BUGZILLA_REOPEN_STATE", "REOPENED"),
            bugzilla_reboot_template: env_opt("BUGZILLA_REBOOT_TEMPLATE"),
            bugzilla_worker_tracker_template: env_opt("BUGZILLA_WORKER_TRACKER_TEMPLATE"),

            xen_url: env_opt("XEN_URL"),
            xen_username: env_opt("XEN_USERNAME"),
            xen_password: env_opt("XEN_PASSWORD").map(SecretString::from),

            ilo_username: env_opt("ILO_USERNAME"),
            ilo_password: env_opt("ILO_PASSWORD").map(SecretString::from),

            orchestrator_base_url: env_or("ORCHESTRATOR_BASE_URL", "http://localhost:8080"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_list_splits_and_trims() {
        assert_eq!(
            env_list("HWRECOVERY_TEST_UNSET_LIST", &["a", "b"]),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn env_bool_accepts_common_truthy_strings() {
        std::env::set_var("HWRECOVERY_TEST_BOOL", "true");
        assert!(env_bool("HWRECOVERY_TEST_BOOL", false));
        std::env::set_var("HWRECOVERY_TEST_BOOL", "0");
        assert!(!env_bool("HWRECOVERY_TEST_BOOL", true));
        std::env::remove_var("HWRECOVERY_TEST_BOOL");
    }
}
