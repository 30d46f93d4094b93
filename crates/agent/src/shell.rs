//! Command execution through the host shell

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Exit code reported when the process never produced one
pub const NO_EXIT_CODE: i32 = -1;

/// Captured result of one command. A non-zero exit is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            timed_out: false,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Observation log entry for this result
    pub fn log_entry(&self, command: &str) -> String {
        format!(
            "[EXIT {}] {}\nSTDOUT:\n{}\nSTDERR:\n{}",
            self.exit_code, command, self.stdout, self.stderr
        )
    }
}

/// Runs one command string to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, command: &str) -> CommandOutput;
}

/// Host shell executor rooted at the workspace
pub struct ShellExecutor {
    program: String,
    args: Vec<String>,
    workspace: PathBuf,
    timeout: Option<Duration>,
}

impl ShellExecutor {
    /// `sh -c` on Unix, `powershell -NoProfile -Command` on Windows
    pub fn new(workspace: PathBuf, timeout: Option<Duration>) -> Self {
        let (program, args) = host_shell();
        Self {
            program,
            args,
            workspace,
            timeout,
        }
    }

    /// Explicit shell, e.g. `["bash", "-lc"]`. An empty list falls back to the host shell.
    pub fn with_shell(shell: &[String], workspace: PathBuf, timeout: Option<Duration>) -> Self {
        match shell.split_first() {
            Some((program, args)) => Self {
                program: program.clone(),
                args: args.to_vec(),
                workspace,
                timeout,
            },
            None => Self::new(workspace, timeout),
        }
    }

    pub fn from_config(config: &autoloop_config::Config) -> Self {
        let workspace = config.workspace_root();
        let timeout = config.run.command_timeout();
        match &config.run.shell {
            Some(shell) => Self::with_shell(shell, workspace, timeout),
            None => Self::new(workspace, timeout),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_failure(&self, e: std::io::Error) -> CommandOutput {
        warn!("◆ EXECUTION FAILED: {}", e);
        CommandOutput::new(
            NO_EXIT_CODE,
            "",
            format!("EXECUTION FAILED: {} ({})", e, self.program),
        )
    }
}

fn host_shell() -> (String, Vec<String>) {
    if cfg!(windows) {
        (
            "powershell".to_string(),
            vec!["-NoProfile".to_string(), "-Command".to_string()],
        )
    } else {
        ("sh".to_string(), vec!["-c".to_string()])
    }
}

#[async_trait]
impl CommandRunner for ShellExecutor {
    async fn execute(&self, command: &str) -> CommandOutput {
        debug!("◆ EXECUTING: {}", command);
        let mut cmd = self.command(command);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return self.spawn_failure(e),
        };
        let pid = child.id();
        let output = child.wait_with_output();

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, output).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("◆ TIMEOUT AFTER {} SECONDS: {}", limit.as_secs(), command);
                    kill_process_group(pid);
                    return CommandOutput {
                        exit_code: NO_EXIT_CODE,
                        stdout: String::new(),
                        stderr: format!("TIMEOUT AFTER {} SECONDS; process killed", limit.as_secs()),
                        timed_out: true,
                    };
                }
            },
            None => output.await,
        };

        match result {
            Ok(output) => CommandOutput::new(
                output.status.code().unwrap_or(NO_EXIT_CODE),
                String::from_utf8_lossy(&output.stdout).trim(),
                String::from_utf8_lossy(&output.stderr).trim(),
            ),
            Err(e) => self.spawn_failure(e),
        }
    }
}

/// Kill everything the command started. The shell leads its own group.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("◆ KILLPG {} FAILED: {}", pid, e);
    }
}

// Only the shell itself is killed (on drop)
#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
