//! Remote execution channel.
//!
//! Commands are assembled from separate arguments with [`RemoteCommand`] and
//! rendered through [`shell_quote`], the one place values are escaped for the
//! remote shell. Nothing in the crate builds a command line by interpolating
//! raw strings.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TransportError;

const SERVICE: &str = "remote";
const POLL_INTERVAL: Duration = Duration::from_millis(25);

// ============================================================================
// Command construction
// ============================================================================

/// Quotes one value for a POSIX shell.
///
/// Values made only of characters that are never special are passed through;
/// everything else is wrapped in single quotes, with embedded single quotes
/// closed, escaped and reopened (`'\''`).
pub fn shell_quote(value: &str) -> String {
    let is_plain = !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"_@%+=:,./-".contains(&b));
    if is_plain {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// A single remote command: program, arguments and an optional stdout target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
    stdout_to: Option<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdout_to: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Redirects standard output to `path` (truncating).
    pub fn stdout_to(mut self, path: impl Into<String>) -> Self {
        self.stdout_to = Some(path.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }

    pub fn stdout_target(&self) -> Option<&str> {
        self.stdout_to.as_deref()
    }

    /// The command line handed to the remote shell.
    pub fn render(&self) -> String {
        let mut line = shell_quote(&self.program);
        for arg in &self.args {
            line.push(' ');
            line.push_str(&shell_quote(arg));
        }
        if let Some(path) = &self.stdout_to {
            line.push_str(" > ");
            line.push_str(&shell_quote(path));
        }
        line
    }
}

// ============================================================================
// Executors
// ============================================================================

/// Exit status and captured output of a remote command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Converts a non-zero exit into [`TransportError::RemoteExit`].
    pub fn checked(self) -> Result<Self, TransportError> {
        if self.success {
            Ok(self)
        } else {
            Err(TransportError::RemoteExit {
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs commands on one fixed host. No retries; callers decide.
pub trait RemoteExecutor {
    /// Runs `command` and captures its output. Spawn failures and timeouts
    /// are errors; a non-zero exit is reported through `success`.
    fn run(&self, command: &RemoteCommand, timeout: Duration)
        -> Result<CommandOutput, TransportError>;

    /// Copies a local file to `remote_path`, replacing any existing file.
    fn copy_file(
        &self,
        local: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<(), TransportError>;
}

/// How commands reach the host holding the media files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Over `ssh` to `remote_host`.
    #[default]
    Ssh,
    /// Through the local `sh`, for media on this machine.
    Local,
}

/// Executes over the system `ssh` client.
pub struct SshExecutor {
    program: String,
    options: Vec<String>,
    host: String,
}

impl SshExecutor {
    pub fn new(program: impl Into<String>, options: Vec<String>, host: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            options,
            host: host.into(),
        }
    }

    fn command(&self, remote: &RemoteCommand) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.options).arg("--").arg(&self.host).arg(remote.render());
        own_process_group(&mut cmd);
        cmd
    }
}

impl RemoteExecutor for SshExecutor {
    fn run(
        &self,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        debug!(host = %self.host, command = %command.render(), "ssh");
        let child = self
            .command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        wait_with_deadline(child, timeout)
    }

    fn copy_file(
        &self,
        local: &Path,
        remote_path: &str,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        // The file body travels on stdin; only the quoted path is in the command.
        let upload = RemoteCommand::new("cat").stdout_to(remote_path);
        debug!(host = %self.host, local = %local.display(), remote = remote_path, "ssh upload");
        let child = self
            .command(&upload)
            .stdin(Stdio::from(File::open(local)?))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        wait_with_deadline(child, timeout)?.checked().map(|_| ())
    }
}

/// Executes through the local shell.
#[derive(Debug, Default)]
pub struct LocalShellExecutor;

impl RemoteExecutor for LocalShellExecutor {
    fn run(
        &self,
        command: &RemoteCommand,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command.render());
        let child = own_process_group(&mut cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        wait_with_deadline(child, timeout)
    }

    fn copy_file(
        &self,
        local: &Path,
        remote_path: &str,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        fs::copy(local, remote_path)?;
        Ok(())
    }
}

/// Puts the child in a process group of its own. A terminal interrupt then
/// only reaches this process, and an in-flight command runs to completion
/// or to its deadline.
fn own_process_group(cmd: &mut Command) -> &mut Command {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

/// Waits for `child`, killing it once `timeout` has passed.
fn wait_with_deadline(mut child: Child, timeout: Duration) -> Result<CommandOutput, TransportError> {
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);
    let deadline = Instant::now() + timeout;

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(TransportError::Timeout {
                service: SERVICE,
                timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(CommandOutput {
        success: status.success(),
        code: status.code(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}
