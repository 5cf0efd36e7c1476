//! External tool execution.
//!
//! Every call out to `nix`, `nix-store`, `rpmbuild`, `pkgbuild`, `tar` and
//! friends goes through the [`Runner`] trait. It has three capabilities:
//!
//! - **query**: run a read-only command and capture its output
//! - **build**: run a long build with output streamed to the terminal
//! - **assemble**: run a packaging command, capturing output for diagnostics
//!
//! [`SystemRunner`] is the real implementation. Tests substitute a scripted
//! runner so the pipeline can be exercised without Nix or Apple tooling.

use crate::environment::NixEnvironment;
use crate::error::Result;
use anyhow::{Context, anyhow};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Description of one external invocation
#[derive(Debug, Clone, Default)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    env: Option<NixEnvironment>,
    stdin: Option<PathBuf>,
    current_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_string_lossy().into_owned(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Attach an environment overlay for this invocation only
    pub fn env(mut self, env: &NixEnvironment) -> Self {
        self.env = Some(env.clone());
        self
    }

    /// Feed a file to the child's stdin
    pub fn stdin_file(mut self, path: &Path) -> Self {
        self.stdin = Some(path.to_path_buf());
        self
    }

    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Kill the child if it runs longer than `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Final path component of the program, e.g. `nix-store`
    pub fn program_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self) -> Option<&NixEnvironment> {
        self.env.as_ref()
    }

    pub fn get_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Space-joined command line, for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn to_command(&self) -> Result<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(env) = &self.env {
            cmd.envs(env.iter());
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        match &self.stdin {
            Some(path) => {
                let file = fs::File::open(path)
                    .with_context(|| format!("Failed to open stdin file: {}", path.display()))?;
                cmd.stdin(file);
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }
        Ok(cmd)
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when killed by a signal or timeout
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Whitespace-separated stdout tokens (Nix prints one path per line)
    pub fn words(&self) -> Vec<String> {
        self.stdout.split_whitespace().map(str::to_string).collect()
    }
}

/// Capability interface over external tools
pub trait Runner {
    /// Run a read-only query and capture stdout/stderr
    fn query(&self, cmd: &ToolCommand) -> Result<ToolOutput>;

    /// Run a build step with inherited stdio; returns whether it succeeded
    fn build(&self, cmd: &ToolCommand) -> Result<bool>;

    /// Run a package assembly step, capturing output for error reports
    fn assemble(&self, cmd: &ToolCommand) -> Result<ToolOutput>;
}

/// Runs commands on the host with `std::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn capture(&self, tool: &ToolCommand) -> Result<ToolOutput> {
        debug!("Running: {}", tool.command_line());
        let mut cmd = tool.to_command()?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let Some(timeout) = tool.timeout else {
            let output = cmd.output().with_context(|| spawn_error(tool))?;
            return Ok(ToolOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        };

        let mut child = cmd.spawn().with_context(|| spawn_error(tool))?;
        // A child blocked on a full pipe never exits, so read while waiting
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match child.wait_timeout(timeout)? {
            Some(status) => status,
            None => {
                warn!(
                    "{} timed out after {}s, killing",
                    tool.program_name(),
                    timeout.as_secs()
                );
                let _ = child.kill();
                child.wait()?;
                return Err(anyhow!(
                    "{} timed out after {}s",
                    tool.program_name(),
                    timeout.as_secs()
                )
                .into());
            }
        };

        Ok(ToolOutput {
            code: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }
}

/// Read `pipe` to the end on its own thread
fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!("Failed to read child output: {}", e);
        }
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

impl Runner for SystemRunner {
    fn query(&self, cmd: &ToolCommand) -> Result<ToolOutput> {
        self.capture(cmd)
    }

    fn build(&self, tool: &ToolCommand) -> Result<bool> {
        debug!("Running: {}", tool.command_line());
        let mut cmd = tool.to_command()?;
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        let status: ExitStatus = cmd.status().with_context(|| spawn_error(tool))?;
        if !status.success() {
            warn!(
                "{} exited with code {}",
                tool.program_name(),
                status.code().unwrap_or(-1)
            );
        }
        Ok(status.success())
    }

    fn assemble(&self, cmd: &ToolCommand) -> Result<ToolOutput> {
        let output = self.capture(cmd)?;
        if !output.success() {
            warn!(
                "{} exited with code {}",
                cmd.program_name(),
                output.code.unwrap_or(-1)
            );
        }
        Ok(output)
    }
}

fn spawn_error(tool: &ToolCommand) -> String {
    format!("Failed to execute '{}'. Is it installed?", tool.program())
}
