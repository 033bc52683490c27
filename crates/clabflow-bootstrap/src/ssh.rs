//! OpenSSH client wrapper
//!
//! Runs the system `ssh` binary (through `sshpass -e` for password logins).
//! Every command is its own ssh invocation, so a session only remembers
//! where and as whom to connect.

use crate::error::{BootstrapError, Result};
use crate::shell::{CommandOutput, Login, RemoteShell, ShellSession, ShellTarget};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Exit status ssh uses for its own errors
const SSH_ERROR_STATUS: i32 = 255;
/// sshpass: wrong password
const SSHPASS_BAD_PASSWORD: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshOptions {
    /// Seconds
    pub connect_timeout: u64,
    pub identity_file: Option<PathBuf>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: 10,
            identity_file: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenSsh {
    options: SshOptions,
}

impl OpenSsh {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl RemoteShell for OpenSsh {
    async fn connect(&self, target: &ShellTarget, login: &Login) -> Result<Box<dyn ShellSession>> {
        let session = OpenSshSession {
            options: self.options.clone(),
            target: target.clone(),
            login: login.clone(),
        };
        // network OS CLIs accept `show version`, plain hosts run `true`
        let probe = match &target.posix_prefix {
            Some(_) => "show version",
            None => "true",
        };
        session.run(probe, None).await?;
        tracing::debug!(target = %target, user = %login.username, "ssh login accepted");
        Ok(Box::new(session))
    }
}

#[derive(Debug, Clone)]
struct OpenSshSession {
    options: SshOptions,
    target: ShellTarget,
    login: Login,
}

impl OpenSshSession {
    fn command(&self, remote: &str) -> Command {
        let mut cmd = match &self.login.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh").env("SSHPASS", password);
                cmd.args(["-o", "BatchMode=no", "-o", "NumberOfPasswordPrompts=1"]);
                cmd.args(["-o", "PubkeyAuthentication=no"]);
                cmd
            }
            None => {
                let mut cmd = Command::new("ssh");
                cmd.args(["-o", "BatchMode=yes"]);
                if let Some(identity) = &self.options.identity_file {
                    cmd.arg("-i").arg(identity);
                }
                cmd
            }
        };
        cmd.args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", "LogLevel=ERROR"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.options.connect_timeout))
            .arg("-p")
            .arg(self.target.port.to_string())
            .arg(format!("{}@{}", self.login.username, self.target.address))
            .arg(remote);
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, remote: &str, stdin: Option<&[u8]>) -> Result<CommandOutput> {
        tracing::debug!(target = %self.target, "Running: ssh {}", remote);

        let mut cmd = self.command(remote);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        let mut child = cmd
            .spawn()
            .map_err(|e| BootstrapError::Shell(format!("failed to start ssh: {}", e)))?;

        if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(bytes)
                .await
                .map_err(|e| BootstrapError::Shell(format!("failed to write stdin: {}", e)))?;
            // closing stdin ends `cat`
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BootstrapError::Shell(format!("ssh did not finish: {}", e)))?;

        let output = CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        match classify(&self.target, self.login.password.is_some(), &output) {
            Some(error) => Err(error),
            None => Ok(output),
        }
    }
}

#[async_trait]
impl ShellSession for OpenSshSession {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        self.run(command, None).await
    }

    async fn write_file(&self, path: &str, contents: &[u8], mode: u32) -> Result<()> {
        let quoted = shell_quote(path);
        let script = format!(
            "mkdir -p \"$(dirname {p})\" && cat > {p} && chmod {mode:o} {p}",
            p = quoted
        );
        let remote = match &self.target.posix_prefix {
            Some(prefix) => format!("{}sh -c {}", prefix, shell_quote(&script)),
            None => script,
        };
        let output = self.run(&remote, Some(contents)).await?;
        if !output.success() {
            return Err(BootstrapError::CommandFailed {
                node: self.target.node.clone(),
                command: format!("write {}", path),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Map ssh/sshpass failures to bootstrap errors. `None` means the remote
/// command itself ran, whatever its exit status.
fn classify(target: &ShellTarget, with_password: bool, output: &CommandOutput) -> Option<BootstrapError> {
    let stderr = output.stderr.trim();
    if with_password && output.status == SSHPASS_BAD_PASSWORD {
        return Some(BootstrapError::AuthFailure {
            target: target.to_string(),
            reason: "password rejected".to_string(),
        });
    }
    if output.status != SSH_ERROR_STATUS {
        return None;
    }
    let reason = stderr.lines().last().unwrap_or("ssh failed").to_string();
    if stderr.contains("Permission denied") || stderr.contains("Too many authentication failures") {
        Some(BootstrapError::AuthFailure {
            target: target.to_string(),
            reason,
        })
    } else if ["timed out", "No route", "refused", "Could not resolve", "unreachable"]
        .iter()
        .any(|needle| stderr.contains(needle))
    {
        Some(BootstrapError::Timeout {
            target: target.to_string(),
            reason,
        })
    } else {
        Some(BootstrapError::Shell(format!("{}: {}", target, reason)))
    }
}

/// Single-quote for a POSIX shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ShellTarget {
        ShellTarget {
            node: "leaf1".to_string(),
            address: "172.20.20.3".to_string(),
            port: 22,
            posix_prefix: None,
        }
    }

    fn output(status: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            status,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_classify_auth_failure() {
        let error = classify(
            &target(),
            false,
            &output(255, "admin@172.20.20.3: Permission denied (publickey,password)."),
        );
        assert!(matches!(error, Some(BootstrapError::AuthFailure { .. })));

        let error = classify(&target(), true, &output(5, ""));
        assert!(matches!(error, Some(BootstrapError::AuthFailure { .. })));
    }

    #[test]
    fn test_classify_unreachable() {
        for stderr in [
            "ssh: connect to host 172.20.20.3 port 22: Connection timed out",
            "ssh: connect to host 172.20.20.3 port 22: No route to host",
            "ssh: connect to host 172.20.20.3 port 22: Connection refused",
        ] {
            let error = classify(&target(), false, &output(255, stderr));
            assert!(
                matches!(error, Some(BootstrapError::Timeout { .. })),
                "{}",
                stderr
            );
        }
    }

    #[test]
    fn test_remote_exit_status_is_not_an_error() {
        assert_eq!(classify(&target(), false, &output(0, "")), None);
        assert_eq!(classify(&target(), false, &output(1, "no such file")), None);
        // exit 5 only means a bad password under sshpass
        assert_eq!(classify(&target(), false, &output(5, "")), None);
    }

    #[test]
    fn test_command_connects_to_target_port() {
        let session = OpenSshSession {
            options: SshOptions::default(),
            target: ShellTarget {
                port: 2222,
                ..target()
            },
            login: Login::new("admin").with_password("NokiaSrl1!"),
        };
        let cmd = session.command("show version");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let port = args.iter().position(|a| a == "-p").map(|i| args[i + 1].as_str());
        assert_eq!(port, Some("2222"));
        assert!(args.contains(&"admin@172.20.20.3".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("show version"));
        assert_eq!(cmd.as_std().get_program(), "sshpass");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/mnt/flash/edaboot.crt"), "'/mnt/flash/edaboot.crt'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
