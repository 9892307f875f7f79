// src/process.rs

//! External process execution
//!
//! Every tool invocation gets its working directory and its complete
//! environment passed in explicitly through [`RunParams`]; nothing is
//! inherited from the calling process. Network-dependent commands go through
//! [`run_with_retry`], an explicit attempt loop with an injected [`Sleep`].

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Working directory and environment for a single command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunParams {
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl RunParams {
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: Some(cwd.as_ref().to_path_buf()),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in vars {
            self.env.insert(name.into(), value.into());
        }
        self
    }

    /// Same parameters with a different working directory
    pub fn in_dir(&self, cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: Some(cwd.as_ref().to_path_buf()),
            env: self.env.clone(),
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, -1 when the process was killed by a signal
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Something that can execute external programs
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`; a non-zero exit is reported through
    /// [`CommandOutput::status`], not as an error
    fn run(&self, program: &str, args: &[String], params: &RunParams) -> Result<CommandOutput>;
}

/// Runs commands on the host with a timeout
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Runner using the configured subprocess timeout
    pub fn from_config() -> Self {
        Self::new(crate::config::get_config().subprocess_timeout())
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String], params: &RunParams) -> Result<CommandOutput> {
        let rendered = render_command(program, args);
        debug!("Executing: {}", rendered);

        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .envs(&params.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &params.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::CommandFailed(format!("Failed to spawn `{}`: {}", rendered, e)))?;

        // Drain both pipes while waiting so large outputs cannot block the child
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::CommandFailed(format!(
                    "`{}` timed out after {} seconds",
                    rendered,
                    self.timeout.as_secs()
                )));
            }
        };

        let stdout = stdout_reader.map(join_reader).unwrap_or_default();
        let stderr = stderr_reader.map(join_reader).unwrap_or_default();

        Ok(CommandOutput {
            status: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn join_reader(handle: std::thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Pause between attempts; swapped out in tests
pub trait Sleep: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Retry budget for network-dependent commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_tries: u32,
    /// The n-th retry waits `n * delay`
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config() -> Self {
        let config = crate::config::get_config();
        Self {
            max_tries: config.process.max_tries,
            delay: config.retry_delay(),
        }
    }
}

/// Format a command the way it is shown in errors
pub fn render_command(program: &str, args: &[String]) -> String {
    let name = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string());
    if args.is_empty() {
        name
    } else {
        format!("{} {}", name, args.join(" "))
    }
}

/// Run a command once and return its stdout, failing on a non-zero exit
pub fn run_cmd(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
    params: &RunParams,
) -> Result<String> {
    let output = runner.run(program, args, params)?;
    if output.status != 0 {
        return Err(Error::CommandFailed(format!(
            "`{}` failed with rc={}: {}",
            render_command(program, args),
            output.status,
            output.stderr.trim()
        )));
    }
    Ok(output.stdout)
}

/// Run a command until it succeeds or the retry budget is exhausted
///
/// The final error names the command together with the exit status and
/// stderr of the last attempt.
pub fn run_with_retry(
    runner: &dyn CommandRunner,
    sleeper: &dyn Sleep,
    policy: RetryPolicy,
    program: &str,
    args: &[String],
    params: &RunParams,
) -> Result<String> {
    let rendered = render_command(program, args);
    let max_tries = policy.max_tries.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let failure = match runner.run(program, args, params) {
            Ok(output) if output.status == 0 => return Ok(output.stdout),
            Ok(output) => format!("rc={}: {}", output.status, output.stderr.trim()),
            Err(e) => e.to_string(),
        };

        if attempt >= max_tries {
            warn!("`{}` failed on the last attempt: {}", rendered, failure);
            return Err(Error::FetchError(format!(
                "depfetch re-tried running `{}` command {} times, last attempt failed with {}",
                rendered, max_tries, failure
            )));
        }
        warn!(
            "Attempt {} of {} for `{}` failed with {}, retrying...",
            attempt, max_tries, rendered, failure
        );
        sleeper.sleep(policy.delay * attempt);
    }
}
