//! `ssh_reboot`: connect over SSH and issue a reboot command. Grounded on
//! `original_source/.../ssh_reboot.py`, which hardens the connection
//! against unknown-host prompts (this tool runs unattended) and tries a
//! list of reboot commands in order since not every target has the same
//! shell.

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use super::{Mechanism, MechanismContext, MechanismError};
use crate::registry::SshCreds;

/// Commands tried in order until one exits zero, exactly
/// `ssh_reboot.py`'s `['reboot', 'shutdown -f -t 3 -r']`.
const REBOOT_COMMANDS: [&str; 2] = ["reboot", "shutdown -f -t 3 -r"];

pub struct SshReboot {
    pub creds: SshCreds,
    pub port: u16,
}

impl SshReboot {
    pub fn new(creds: SshCreds, port: u16) -> Self {
        SshReboot { creds, port }
    }

    async fn run_one(&self, host: &str, remote_command: &str, timeout_dur: std::time::Duration) -> Result<String, MechanismError> {
        let output = timeout(
            timeout_dur,
            Command::new("ssh")
                .arg("-o")
                .arg("PasswordAuthentication=no")
                .arg("-o")
                .arg("StrictHostKeyChecking=no")
                .arg("-o")
                .arg("UserKnownHostsFile=/dev/null")
                .arg("-i")
                .arg(&self.creds.key_file)
                .arg("-l")
                .arg(&self.creds.user)
                .arg("-p")
                .arg(self.port.to_string())
                .arg(host)
                .arg(remote_command)
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
impl Mechanism for SshReboot {
    async fn run(&self, ctx: &MechanismContext<'_>) -> Result<String, MechanismError> {
        super::validate_host(ctx.fqdn)?;

        let mut last_err = None;
        for command in REBOOT_COMMANDS {
            match self.run_one(ctx.fqdn, command, ctx.timeout).await {
                Ok(out) => return Ok(out),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or(MechanismError::Other("no reboot command attempted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reboot_commands_match_the_original_fallback_order() {
        assert_eq!(REBOOT_COMMANDS, ["reboot", "shutdown -f -t 3 -r"]);
    }
}
