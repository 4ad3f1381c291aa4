//! Host liveness polling: down/up detection and the combined
//! "did the reboot actually take" check. Grounded on
//! `original_source/.../reboot.py`'s `can_ping`, `wait_for_state`, and
//! `reboot_succeeded`. Shells out to the system `ping` binary via
//! `tokio::process::Command`, the same external-process idiom as the
//! teacher's `tools/builtin/shell.rs` — the corpus has no raw-socket ICMP
//! crate, and the Python original itself shells out to `ping`.

use std::time::Duration;

use tokio::process::Command;
use tokio::time::{sleep, Instant};

/// Single best-effort ping. Never returns an error: an unreachable host
/// and a missing `ping` binary are both "not up" to the caller.
pub async fn can_ping(host: &str) -> bool {
    Command::new("ping")
        .arg("-c")
        .arg("1")
        .arg("-W")
        .arg("2")
        .arg(host)
        .kill_on_drop(true)
        .output()
        .await
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Poll `predicate` every `interval` until it returns `true` or `timeout`
/// elapses. Mirrors `reboot.py`'s `wait_for_state(fn, timeout, interval)`.
pub async fn wait_for_state<F, Fut>(mut predicate: F, timeout: Duration, interval: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(interval).await;
    }
}

pub async fn is_down(host: &str, timeout: Duration, interval: Duration) -> bool {
    let host = host.to_string();
    wait_for_state(|| { let host = host.clone(); async move { !can_ping(&host).await } }, timeout, interval).await
}

pub async fn is_up(host: &str, timeout: Duration, interval: Duration) -> bool {
    let host = host.to_string();
    wait_for_state(|| { let host = host.clone(); async move { can_ping(&host).await } }, timeout, interval).await
}

/// The down-phase poll interval fixed by spec.md §4.5.
const DOWN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// The up-phase poll interval fixed by spec.md §4.5.
const UP_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// A reboot "succeeded" if the host goes down and then comes back up
/// within the configured windows. Mirrors `reboot_succeeded(fqdn)`: the
/// down-phase and up-phase each poll at their own fixed interval (1s,
/// 5s), independent of any per-mechanism timeout.
pub async fn reboot_succeeded(host: &str, down_timeout: Duration, up_timeout: Duration) -> bool {
    if !is_down(host, down_timeout, DOWN_POLL_INTERVAL).await {
        return false;
    }
    is_up(host, up_timeout, UP_POLL_INTERVAL).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_state_returns_true_immediately_when_already_satisfied() {
        let satisfied = wait_for_state(|| async { true }, Duration::from_millis(50), Duration::from_millis(10)).await;
        assert!(satisfied);
    }

    #[tokio::test]
    async fn wait_for_state_times_out_when_never_satisfied() {
        let satisfied = wait_for_state(|| async { false }, Duration::from_millis(30), Duration::from_millis(10)).await;
        assert!(!satisfied);
    }
}
