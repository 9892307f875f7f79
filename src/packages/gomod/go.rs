// src/packages/gomod/go.rs

//! The go tool and its environment
//!
//! Every invocation gets the same explicit environment: module caches in a
//! scratch directory, modules forced on, toolchain switching disabled and
//! the configured proxy. Only `PATH` and `HOME` are taken over from the
//! calling process.

use crate::error::{Error, Result};
use crate::process::{run_cmd, run_with_retry, CommandRunner, RetryPolicy, RunParams, Sleep};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

const VERSION_PATTERN: &str = r"(\d+)\.(\d+)(?:\.(\d+))?((?:rc|beta)\d+)?";

static GO_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^\s*go\s+({})\s*(?://.*)?$", VERSION_PATTERN)).unwrap()
});

static TOOLCHAIN_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^\s*toolchain\s+go({})\s*(?://.*)?$", VERSION_PATTERN)).unwrap()
});

static BARE_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{}$", VERSION_PATTERN)).unwrap());

static RELEASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^go({})$", VERSION_PATTERN)).unwrap());

// =============================================================================
// Versions
// =============================================================================

/// A Go language or toolchain version (`1.21`, `1.21.4`, `1.21rc2`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: Option<u64>,
    /// `rc2`, `beta1`
    pub pre: Option<String>,
}

impl GoVersion {
    /// Parse a bare version such as `1.21.0rc4`
    pub fn parse(version: &str) -> Option<Self> {
        let caps = BARE_VERSION.captures(version.trim())?;
        Some(Self {
            major: caps.get(1)?.as_str().parse().ok()?,
            minor: caps.get(2)?.as_str().parse().ok()?,
            patch: caps.get(3).and_then(|m| m.as_str().parse().ok()),
            pre: caps.get(4).map(|m| m.as_str().to_string()),
        })
    }
}

impl Ord for GoVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch.unwrap_or(0))
            .cmp(&(other.major, other.minor, other.patch.unwrap_or(0)))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                // A release sorts after its pre-releases
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for GoVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for GoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(patch) = self.patch {
            write!(f, ".{}", patch)?;
        }
        if let Some(pre) = &self.pre {
            write!(f, "{}", pre)?;
        }
        Ok(())
    }
}

/// The `go` and `toolchain` directives of a go.mod file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoDirectives {
    pub go: Option<GoVersion>,
    pub toolchain: Option<GoVersion>,
}

impl GoDirectives {
    /// Extract the directives; lines that do not match exactly are ignored
    pub fn parse(go_mod: &str) -> Self {
        let mut directives = Self::default();
        for line in go_mod.lines() {
            if let Some(caps) = GO_DIRECTIVE.captures(line) {
                directives.go = caps.get(1).and_then(|m| GoVersion::parse(m.as_str()));
            } else if let Some(caps) = TOOLCHAIN_DIRECTIVE.captures(line) {
                directives.toolchain = caps.get(1).and_then(|m| GoVersion::parse(m.as_str()));
            }
        }
        directives
    }

    pub fn read(go_mod: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(go_mod)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", go_mod.display(), e)))?;
        Ok(Self::parse(&content))
    }

    /// The toolchain the module asks for: `toolchain` when present, else `go`
    pub fn required(&self) -> Option<&GoVersion> {
        self.toolchain.as_ref().or(self.go.as_ref())
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Environment for go invocations with caches under `scratch`
pub fn go_env(scratch: &Path, proxy_url: &str, cgo_disable: bool) -> RunParams {
    let scratch_str = scratch.to_string_lossy().into_owned();
    let mut params = RunParams::default()
        .with_env("GOPATH", scratch_str.clone())
        .with_env("GOCACHE", scratch_str)
        .with_env("GOMODCACHE", scratch.join("pkg/mod").to_string_lossy().into_owned())
        .with_env("GO111MODULE", "on")
        .with_env("GOTOOLCHAIN", "local")
        .with_env("GOPROXY", proxy_url);
    for name in ["PATH", "HOME"] {
        if let Ok(value) = std::env::var(name) {
            params = params.with_env(name, value);
        }
    }
    if cgo_disable {
        params = params.with_env("CGO_ENABLED", "0");
    }
    params
}

// =============================================================================
// Tool
// =============================================================================

/// A located go binary
pub struct GoTool {
    binary: PathBuf,
    runner: Arc<dyn CommandRunner>,
    sleeper: Arc<dyn Sleep>,
    policy: RetryPolicy,
}

impl GoTool {
    pub fn new(
        binary: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        sleeper: Arc<dyn Sleep>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            binary: binary.into(),
            runner,
            sleeper,
            policy,
        }
    }

    /// Find `go` on `PATH`
    pub fn locate(
        runner: Arc<dyn CommandRunner>,
        sleeper: Arc<dyn Sleep>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let binary = which::which("go").map_err(|_| {
            Error::rejected_with(
                "The go binary was not found on PATH",
                "Please install a Go toolchain to process gomod packages.",
            )
        })?;
        debug!("Using go binary {}", binary.display());
        Ok(Self::new(binary, runner, sleeper, policy))
    }

    #[inline]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run a subcommand once
    pub fn run(&self, args: &[&str], params: &RunParams) -> Result<String> {
        run_cmd(self.runner.as_ref(), &self.program(), &strings(args), params)
    }

    /// Run a network-dependent subcommand with retries
    pub fn run_with_retry(&self, args: &[&str], params: &RunParams) -> Result<String> {
        run_with_retry(
            self.runner.as_ref(),
            self.sleeper.as_ref(),
            self.policy,
            &self.program(),
            &strings(args),
            params,
        )
    }

    /// The toolchain release, from `go version`
    pub fn release(&self, params: &RunParams) -> Result<GoVersion> {
        let output = self.run(&["version"], params)?;
        output
            .split_whitespace()
            .nth(2)
            .and_then(|token| RELEASE.captures(token))
            .and_then(|caps| caps.get(1))
            .and_then(|m| GoVersion::parse(m.as_str()))
            .ok_or_else(|| {
                Error::UnexpectedFormat(format!(
                    "Could not determine the Go release from '{}'",
                    output.trim()
                ))
            })
    }

    /// Turn off telemetry when the toolchain has it enabled
    pub fn disable_telemetry(&self, params: &RunParams) -> Result<()> {
        let telemetry = self.run(&["env", "GOTELEMETRY"], params)?;
        match telemetry.trim() {
            "local" | "on" => {
                debug!("Disabling Go telemetry");
                self.run(&["telemetry", "off"], params)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Warn when go.mod asks for a newer toolchain than the local one
    pub fn check_required(&self, directives: &GoDirectives, params: &RunParams) -> Result<()> {
        let Some(required) = directives.required() else {
            return Ok(());
        };
        let release = self.release(params)?;
        if *required > release {
            warn!(
                "go.mod requires Go {} but the local toolchain is {}; the go tool may refuse to run",
                required, release
            );
        } else {
            info!("Using Go {} for a module that requires {}", release, required);
        }
        Ok(())
    }

    fn program(&self) -> String {
        self.binary.to_string_lossy().into_owned()
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
