use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use kestrel_types::RuntimeKind;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::config::HostCommand;
use crate::{Error, Result};

/// Byte streams to a freshly launched host, plus the child to kill on teardown
pub struct HostConnection {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub child: Option<Child>,
}

impl HostConnection {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }

    #[must_use]
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }
}

impl std::fmt::Debug for HostConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConnection")
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

/// Starts host processes. Called again for every restart.
#[async_trait]
pub trait HostLauncher: Send + Sync {
    async fn launch(&self, runtime: RuntimeKind) -> Result<HostConnection>;
}

/// Launches hosts as child processes speaking JSON-RPC over stdio
#[derive(Debug, Clone, Default)]
pub struct CommandLauncher {
    commands: HashMap<RuntimeKind, HostCommand>,
}

impl CommandLauncher {
    #[must_use]
    pub fn new(commands: HashMap<RuntimeKind, HostCommand>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl HostLauncher for CommandLauncher {
    async fn launch(&self, runtime: RuntimeKind) -> Result<HostConnection> {
        let host = self.commands.get(&runtime).ok_or_else(|| Error::HostStartup {
            runtime: runtime.to_string(),
            reason: "no host command configured".to_string(),
        })?;

        let mut command = Command::new(&host.command);
        command
            .args(&host.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &host.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| Error::HostStartup {
            runtime: runtime.to_string(),
            reason: format!("failed to spawn '{}': {}", host.command, e),
        })?;

        let missing = |stream: &str| Error::HostStartup {
            runtime: runtime.to_string(),
            reason: format!("failed to get {stream} handle"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(runtime, stderr);
        }

        info!(
            "[{}] Spawned host '{}' (pid {:?})",
            runtime,
            host.command,
            child.id()
        );
        Ok(HostConnection::new(stdout, stdin).with_child(child))
    }
}

/// Forward the host's stderr to the log, line by line
fn spawn_stderr_logger<R>(runtime: RuntimeKind, stderr: R)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("[{}] stderr: {}", runtime, line);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_runtime_fails_startup() {
        let launcher = CommandLauncher::default();
        let err = launcher.launch(RuntimeKind::Python).await.unwrap_err();
        assert!(matches!(err, Error::HostStartup { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_startup() {
        let launcher = CommandLauncher::new(HashMap::from([(
            RuntimeKind::Nodejs,
            HostCommand {
                command: "kestrel-definitely-not-installed".to_string(),
                args: Vec::new(),
                working_dir: None,
            },
        )]));
        let err = launcher.launch(RuntimeKind::Nodejs).await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
