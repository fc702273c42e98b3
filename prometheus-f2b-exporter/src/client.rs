//! Read-only access to the Fail2ban control channel.
//!
//! [`Fail2banClient`] shells out to `fail2ban-client` and parses its
//! human-readable status output. Every invocation runs under a timeout and the
//! child process is killed if the timeout fires, so a hung daemon can delay a
//! poll cycle by at most one timeout per call.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::Fail2banConfig;
use crate::error::{ClientError, ErrorKind, JailQueryError};
use crate::snapshot::JailRecord;

/// Queries against the Fail2ban control channel.
#[async_trait]
pub trait JailClient: Send + Sync {
    /// List the names of all active jails.
    async fn list_jails(&self) -> Result<Vec<String>, ClientError>;

    /// Fetch the current counters of one jail.
    async fn query_jail(&self, name: &str) -> Result<JailRecord, JailQueryError>;
}

/// Failure of a single `fail2ban-client` invocation.
#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("no response after {0:?}")]
    Timeout(Duration),
    #[error("exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// [`JailClient`] backed by the `fail2ban-client` executable.
#[derive(Debug, Clone)]
pub struct Fail2banClient {
    program: String,
    socket: Option<String>,
    timeout: Duration,
}

impl Fail2banClient {
    /// Create a client from configuration.
    pub fn new(config: &Fail2banConfig) -> Self {
        Self {
            program: config.client_path.clone(),
            socket: config.socket.clone(),
            timeout: config.timeout(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, CommandError> {
        let mut cmd = Command::new(&self.program);
        if let Some(socket) = &self.socket {
            cmd.arg("-s").arg(socket);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        trace!(program = %self.program, ?args, "Running fail2ban-client");

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| CommandError::Timeout(self.timeout))?
            .map_err(|source| CommandError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl JailClient for Fail2banClient {
    async fn list_jails(&self) -> Result<Vec<String>, ClientError> {
        let output = self
            .run(&["status"])
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?;

        let jails = parse_jail_list(&output).map_err(ClientError::Malformed)?;
        debug!(count = jails.len(), "Listed jails");
        Ok(jails)
    }

    async fn query_jail(&self, name: &str) -> Result<JailRecord, JailQueryError> {
        let output = self.run(&["status", name]).await.map_err(|e| {
            let kind = match &e {
                CommandError::Spawn { .. } => ErrorKind::Unreachable,
                CommandError::Timeout(_) => ErrorKind::Timeout,
                CommandError::Failed { .. } => ErrorKind::CommandFailed,
            };
            JailQueryError::new(name, kind, e.to_string())
        })?;

        parse_jail_status(name, &output)
            .map_err(|message| JailQueryError::new(name, ErrorKind::Malformed, message))
    }
}

/// Split a status line such as `` |  `- Total banned:	10`` into key and value.
fn split_field(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_start_matches(|c: char| c == '|' || c == '`' || c == '-' || c.is_whitespace());
    let (key, value) = line.split_once(':')?;
    Some((key.trim(), value.trim()))
}

/// Parse the output of `fail2ban-client status`.
///
/// ```text
/// Status
/// |- Number of jail:	2
/// `- Jail list:	sshd, nginx-404
/// ```
pub fn parse_jail_list(output: &str) -> Result<Vec<String>, String> {
    let list = output
        .lines()
        .filter_map(split_field)
        .find(|(key, _)| key.eq_ignore_ascii_case("Jail list"))
        .map(|(_, value)| value)
        .ok_or_else(|| "missing 'Jail list' field".to_string())?;

    Ok(list
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect())
}

/// Parse the output of `fail2ban-client status <jail>`.
///
/// ```text
/// Status for the jail: sshd
/// |- Filter
/// |  |- Currently failed:	1
/// |  |- Total failed:	42
/// |  `- File list:	/var/log/auth.log
/// `- Actions
///    |- Currently banned:	3
///    |- Total banned:	10
///    `- Banned IP list:	192.0.2.1 192.0.2.2 2001:db8::1
/// ```
pub fn parse_jail_status(name: &str, output: &str) -> Result<JailRecord, String> {
    let mut currently_failed = None;
    let mut failed_attempts = None;
    let mut currently_banned = None;
    let mut total_banned = None;
    let mut banned_ips = Vec::new();

    for (key, value) in output.lines().filter_map(split_field) {
        let slot = match key {
            "Currently failed" => &mut currently_failed,
            "Total failed" => &mut failed_attempts,
            "Currently banned" => &mut currently_banned,
            "Total banned" => &mut total_banned,
            "Banned IP list" => {
                banned_ips = value.split_whitespace().map(str::to_string).collect();
                continue;
            }
            _ => continue,
        };
        let parsed = value
            .parse::<u64>()
            .map_err(|e| format!("invalid value for '{}': {:?} ({})", key, value, e))?;
        *slot = Some(parsed);
    }

    let require = |field: Option<u64>, key: &str| {
        field.ok_or_else(|| format!("missing '{}' field", key))
    };

    Ok(JailRecord {
        name: name.to_string(),
        currently_banned: require(currently_banned, "Currently banned")?,
        total_banned: require(total_banned, "Total banned")?,
        failed_attempts: require(failed_attempts, "Total failed")?,
        currently_failed: require(currently_failed, "Currently failed")?,
        banned_ips,
    })
}
