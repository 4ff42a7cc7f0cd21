//! SSH local port forwarding through the system `ssh` client.
//!
//! [`SshTunnel::open`] picks a free local port, spawns
//! `ssh -N -L 127.0.0.1:<local>:<remote_host>:<remote_port> user@host`, and
//! waits until the local port accepts connections. The child process is killed
//! on [`SshTunnel::close`] and, as a backstop, when the tunnel is dropped.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Errors raised while establishing the tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// No local port could be reserved.
    #[error("no free local port: {0}")]
    NoFreePort(#[source] std::io::Error),

    /// The ssh client could not be started.
    #[error("cannot start {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The ssh client exited before the forward became ready.
    #[error("ssh exited with {status}: {stderr}")]
    Exited {
        /// Exit status rendering.
        status: String,
        /// Captured standard error (authentication failures appear here).
        stderr: String,
    },

    /// The local port did not accept connections in time.
    #[error("tunnel on 127.0.0.1:{port} not ready after {after:?}")]
    Timeout {
        /// Local port that was polled.
        port: u16,
        /// Time waited.
        after: Duration,
    },
}

/// How the ssh client authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum TunnelAuth {
    /// Private key file passed with `-i`.
    KeyFile(PathBuf),
    /// Password supplied to `sshpass` through the `SSHPASS` variable.
    Password(String),
    /// Whatever the ssh agent / default identities provide.
    Agent,
}

impl TunnelAuth {
    /// Prefers an existing key file, then a password, then the agent.
    ///
    /// A configured key path that does not exist on disk is ignored.
    pub fn choose(key_path: Option<PathBuf>, password: Option<String>) -> Self {
        match (key_path, password) {
            (Some(key), _) if key.is_file() => TunnelAuth::KeyFile(key),
            (key, Some(password)) => {
                if let Some(key) = key {
                    tracing::warn!(path = %key.display(), "ssh key file not found; using password");
                }
                TunnelAuth::Password(password)
            }
            (Some(key), None) => {
                tracing::warn!(path = %key.display(), "ssh key file not found; using ssh agent");
                TunnelAuth::Agent
            }
            (None, None) => TunnelAuth::Agent,
        }
    }
}

impl std::fmt::Debug for TunnelAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelAuth::KeyFile(p) => f.debug_tuple("KeyFile").field(p).finish(),
            TunnelAuth::Password(_) => f.write_str("Password(<redacted>)"),
            TunnelAuth::Agent => f.write_str("Agent"),
        }
    }
}

/// Settings of an [`SshTunnel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// SSH server host.
    pub ssh_host: String,
    /// SSH server port.
    pub ssh_port: u16,
    /// SSH login user.
    pub ssh_user: String,
    /// Authentication method.
    pub auth: TunnelAuth,
    /// Database host as seen from the SSH server.
    pub remote_host: String,
    /// Database port as seen from the SSH server.
    pub remote_port: u16,
    /// How long to wait for the forward to accept connections.
    pub ready_timeout: Duration,
    /// ssh client binary.
    pub ssh_program: String,
}

impl TunnelConfig {
    /// Port 22, 15 s readiness timeout, `ssh` from `PATH`.
    pub fn new(
        ssh_host: impl Into<String>,
        ssh_user: impl Into<String>,
        auth: TunnelAuth,
        remote_host: impl Into<String>,
        remote_port: u16,
    ) -> Self {
        Self {
            ssh_host: ssh_host.into(),
            ssh_port: 22,
            ssh_user: ssh_user.into(),
            auth,
            remote_host: remote_host.into(),
            remote_port,
            ready_timeout: Duration::from_secs(15),
            ssh_program: "ssh".to_string(),
        }
    }
}

/// A running port forward. Lives as long as the run that opened it.
#[derive(Debug)]
pub struct SshTunnel {
    child: Option<Child>,
    local_port: u16,
}

impl SshTunnel {
    /// Spawns the ssh client and waits for the forward.
    #[tracing::instrument(level = "info", skip_all, fields(host = %config.ssh_host, port = config.ssh_port))]
    pub async fn open(config: &TunnelConfig) -> Result<Self, TunnelError> {
        let local_port = free_local_port()?;
        let mut command = ssh_command(config, local_port);
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        let mut child = command
            .spawn()
            .map_err(|source| TunnelError::Spawn { program, source })?;

        if let Err(e) = wait_ready(&mut child, local_port, config.ready_timeout).await {
            let _ = child.kill().await;
            return Err(e);
        }

        tracing::info!(local_port, "ssh tunnel established");
        Ok(Self {
            child: Some(child),
            local_port,
        })
    }

    /// Local port forwarding to the remote database.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Stops the ssh client. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.kill().await {
                Ok(()) => tracing::info!(local_port = self.local_port, "ssh tunnel closed"),
                Err(e) => tracing::warn!(error = %e, "ssh tunnel did not stop cleanly"),
            }
        }
    }
}

fn free_local_port() -> Result<u16, TunnelError> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).map_err(TunnelError::NoFreePort)?;
    let port = listener
        .local_addr()
        .map_err(TunnelError::NoFreePort)?
        .port();
    Ok(port)
}

/// Builds the ssh invocation for `config` forwarding from `local_port`.
pub(crate) fn ssh_command(config: &TunnelConfig, local_port: u16) -> Command {
    let mut command = match &config.auth {
        TunnelAuth::Password(password) => {
            let mut c = Command::new("sshpass");
            c.arg("-e").arg(&config.ssh_program).env("SSHPASS", password);
            c
        }
        _ => Command::new(&config.ssh_program),
    };

    command
        .arg("-N")
        .arg("-q")
        .args(["-o", "ExitOnForwardFailure=yes"])
        .args(["-o", "ServerAliveInterval=30"])
        .args(["-o", "StrictHostKeyChecking=accept-new"])
        .arg("-L")
        .arg(format!(
            "127.0.0.1:{local_port}:{}:{}",
            config.remote_host, config.remote_port
        ))
        .arg("-p")
        .arg(config.ssh_port.to_string());

    match &config.auth {
        TunnelAuth::KeyFile(key) => {
            command
                .arg("-i")
                .arg(key)
                .args(["-o", "IdentitiesOnly=yes", "-o", "BatchMode=yes"]);
        }
        TunnelAuth::Agent => {
            command.args(["-o", "BatchMode=yes"]);
        }
        TunnelAuth::Password(_) => {
            command.args(["-o", "PubkeyAuthentication=no"]);
        }
    }

    command
        .arg(format!("{}@{}", config.ssh_user, config.ssh_host))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

async fn wait_ready(child: &mut Child, port: u16, timeout: Duration) -> Result<(), TunnelError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            return Err(TunnelError::Exited {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return Ok(());
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(TunnelError::Timeout {
                port,
                after: timeout,
            });
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}
