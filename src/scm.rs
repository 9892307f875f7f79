// src/scm.rs

//! Git repository access
//!
//! All git operations run the `git` binary through a [`CommandRunner`] with
//! an explicit, minimal environment. The helpers here cover what resolution
//! needs:
//! - repository identity (origin URL + HEAD commit) for package URLs
//! - tag and commit queries for version resolution
//! - parsing `git+` requirement URLs
//! - snapshotting a single commit as a gzip tarball

use crate::error::{Error, Result};
use crate::process::{run_cmd, run_with_retry, CommandRunner, RetryPolicy, RunParams, Sleep};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Environment shared by every git invocation
pub fn git_env() -> RunParams {
    let mut params = RunParams::default()
        .with_env("GIT_TERMINAL_PROMPT", "0")
        .with_env("LC_ALL", "C");
    if let Ok(path) = std::env::var("PATH") {
        params = params.with_env("PATH", path);
    }
    if let Ok(home) = std::env::var("HOME") {
        params = params.with_env("HOME", home);
    }
    params
}

/// A git checkout
#[derive(Clone)]
pub struct GitRepo {
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    params: RunParams,
}

impl std::fmt::Debug for GitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepo").field("root", &self.root).finish()
    }
}

impl GitRepo {
    /// Open the repository containing `path`
    pub fn open(path: &Path, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let params = git_env().in_dir(path);
        let toplevel = run_cmd(
            runner.as_ref(),
            "git",
            &strings(&["rev-parse", "--show-toplevel"]),
            &params,
        )
        .map_err(|e| {
            Error::rejected_with(
                format!("{} is not inside a git repository: {}", path.display(), e),
                "Please provide a directory that is a git checkout.",
            )
        })?;
        let root = PathBuf::from(toplevel.trim());
        Ok(Self {
            params: params.in_dir(&root),
            root,
            runner,
        })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run a git subcommand at the repository root and return stdout
    pub fn git(&self, args: &[&str]) -> Result<String> {
        run_cmd(self.runner.as_ref(), "git", &strings(args), &self.params)
    }

    /// Run a network-dependent git subcommand with retries
    pub fn git_with_retry(&self, sleeper: &dyn Sleep, policy: RetryPolicy, args: &[&str]) -> Result<String> {
        run_with_retry(
            self.runner.as_ref(),
            sleeper,
            policy,
            "git",
            &strings(args),
            &self.params,
        )
    }

    pub fn head_commit(&self) -> Result<String> {
        Ok(self.git(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    /// Committer timestamp of a commit, seconds since the epoch
    pub fn commit_timestamp(&self, commit: &str) -> Result<i64> {
        let out = self.git(&["show", "-s", "--format=%ct", commit])?;
        out.trim().parse().map_err(|_| {
            Error::UnexpectedFormat(format!(
                "git show returned an invalid commit timestamp for {}: '{}'",
                commit,
                out.trim()
            ))
        })
    }

    /// Names of the configured remotes
    pub fn remotes(&self) -> Result<Vec<String>> {
        Ok(self
            .git(&["remote"])?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    /// The repository identity used in package URLs
    pub fn repo_id(&self) -> Result<RepoId> {
        let origin = self.git(&["remote", "get-url", "origin"]).map_err(|_| {
            Error::unsupported_with(
                format!("Unable to get remote 'origin' URL of {}", self.root.display()),
                "Please make sure the repository has a remote named 'origin'.",
            )
        })?;
        Ok(RepoId {
            origin_url: normalize_remote_url(origin.trim()),
            commit_id: self.head_commit()?,
        })
    }

    /// Path of the .git directory
    pub fn git_dir(&self) -> Result<PathBuf> {
        let dir = PathBuf::from(self.git(&["rev-parse", "--git-dir"])?.trim());
        Ok(if dir.is_absolute() { dir } else { self.root.join(dir) })
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Repository identity
// =============================================================================

/// Origin URL and commit of a checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    pub origin_url: String,
    pub commit_id: String,
}

impl RepoId {
    pub fn new(origin_url: impl AsRef<str>, commit_id: impl Into<String>) -> Self {
        Self {
            origin_url: normalize_remote_url(origin_url.as_ref()),
            commit_id: commit_id.into(),
        }
    }

    /// `git+<origin>@<commit>`, the value of a purl `vcs_url` qualifier
    pub fn as_vcs_url_qualifier(&self) -> String {
        format!("git+{}@{}", self.origin_url, self.commit_id)
    }

    /// `host/org/repo` with scheme, user, `.git` and trailing slashes removed
    pub fn repository_name(&self) -> Result<String> {
        let url = Url::parse(&self.origin_url).map_err(|e| {
            Error::UnexpectedFormat(format!("Invalid repository URL '{}': {}", self.origin_url, e))
        })?;
        let host = url.host_str().unwrap_or_default();
        let path = url.path().trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        Ok(format!("{}{}", host, path))
    }
}

/// Rewrite scp-like remotes (`git@host:org/repo`) as `ssh://` URLs
pub fn normalize_remote_url(url: &str) -> String {
    if url.contains("://") {
        return url.to_string();
    }
    match url.split_once(':') {
        Some((user_host, path)) if !user_host.contains('/') => {
            format!("ssh://{}/{}", user_host, path.trim_start_matches('/'))
        }
        _ => url.to_string(),
    }
}

// =============================================================================
// VCS requirement URLs
// =============================================================================

/// Parts of a `git+<url>@<ref>` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInfo {
    /// Clone URL without the `git+` prefix and ref
    pub url: String,
    pub git_ref: String,
    pub host: String,
    /// Path segments between the host and the repository name
    pub namespace: String,
    /// Repository name without a `.git` suffix
    pub repo: String,
}

/// Split a VCS requirement URL into its parts
pub fn extract_git_info(vcs_url: &str) -> Result<GitInfo> {
    let invalid = |reason: &str| {
        Error::UnexpectedFormat(format!("Invalid git URL '{}': {}", vcs_url, reason))
    };

    let without_prefix = vcs_url.strip_prefix("git+").unwrap_or(vcs_url);
    let without_fragment = without_prefix.split('#').next().unwrap_or(without_prefix);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);

    let (clone_url, git_ref) = without_query
        .rsplit_once('@')
        .filter(|(_, r)| !r.contains('/'))
        .ok_or_else(|| invalid("missing @<ref>"))?;

    let parsed = Url::parse(clone_url).map_err(|e| invalid(&e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| invalid("missing host"))?
        .to_string();

    let segments: Vec<&str> = parsed
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let (repo, namespace) = segments
        .split_last()
        .ok_or_else(|| invalid("missing repository path"))?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);

    Ok(GitInfo {
        url: clone_url.to_string(),
        git_ref: git_ref.to_string(),
        host,
        namespace: namespace.join("/"),
        repo: repo.to_string(),
    })
}

// =============================================================================
// Snapshots
// =============================================================================

/// Fetch a single commit of a remote repository and store it as `dest` (.tar.gz)
///
/// Files are placed under an `app/` prefix inside the archive.
pub fn clone_as_tarball(
    runner: Arc<dyn CommandRunner>,
    sleeper: &dyn Sleep,
    policy: RetryPolicy,
    url: &str,
    git_ref: &str,
    dest: &Path,
) -> Result<()> {
    let workdir = tempfile::tempdir()
        .map_err(|e| Error::IoError(format!("Failed to create temp dir: {e}")))?;
    let params = git_env().in_dir(workdir.path());
    let git = |args: &[&str]| run_cmd(runner.as_ref(), "git", &strings(args), &params);

    info!("Fetching {} at {}", url, git_ref);
    git(&["init", "-q"])?;
    let shallow = run_with_retry(
        runner.as_ref(),
        sleeper,
        policy,
        "git",
        &strings(&["fetch", "-q", "--depth", "1", url, git_ref]),
        &params,
    );
    let archived_ref = match shallow {
        Ok(_) => "FETCH_HEAD",
        Err(e) => {
            debug!("Shallow fetch of {} failed ({}), fetching full history", git_ref, e);
            run_with_retry(
                runner.as_ref(),
                sleeper,
                policy,
                "git",
                &strings(&["fetch", "-q", url]),
                &params,
            )?;
            git_ref
        }
    };

    let tar_path = workdir.path().join("snapshot.tar");
    let tar_arg = tar_path.to_string_lossy().into_owned();
    git(&["archive", "--format=tar", "--prefix=app/", "-o", &tar_arg, archived_ref])?;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut input = std::fs::File::open(&tar_path)?;
    let output = std::fs::File::create(dest)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;

    debug!("Wrote {}", dest.display());
    Ok(())
}
