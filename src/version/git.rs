// src/version/git.rs

//! Repository history backed by the git binary

use super::{CommitInfo, RepoHistory};
use crate::error::{Error, Result};
use crate::process::{RetryPolicy, Sleep, SystemRunner, ThreadSleep};
use crate::scm::GitRepo;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// [`RepoHistory`] over a local git checkout
pub struct GitHistory {
    repo: GitRepo,
    sleeper: Arc<dyn Sleep>,
    policy: RetryPolicy,
}

impl GitHistory {
    /// Open the checkout containing `path` with the host git and default retries
    pub fn open(path: &Path) -> Result<Self> {
        let repo = GitRepo::open(path, Arc::new(SystemRunner::from_config()))?;
        Ok(Self::new(repo, Arc::new(ThreadSleep), RetryPolicy::from_config()))
    }

    pub fn new(repo: GitRepo, sleeper: Arc<dyn Sleep>, policy: RetryPolicy) -> Self {
        Self {
            repo,
            sleeper,
            policy,
        }
    }
}

fn tag_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

impl RepoHistory for GitHistory {
    fn fetch_tags(&self) -> Result<()> {
        let remotes = self.repo.remotes()?;
        let remote = if remotes.iter().any(|r| r == "origin") {
            "origin".to_string()
        } else {
            remotes.into_iter().next().ok_or_else(|| {
                Error::ResolutionError("the repository has no remote configured".to_string())
            })?
        };

        info!("Fetching tags from {} for {}", remote, self.repo.root().display());
        self.repo.git_with_retry(
            self.sleeper.as_ref(),
            self.policy,
            &["fetch", "--force", "--tags", &remote],
        )?;
        Ok(())
    }

    fn head(&self) -> Result<CommitInfo> {
        let hash = self.repo.head_commit()?;
        let timestamp = self.repo.commit_timestamp(&hash)?;
        Ok(CommitInfo { hash, timestamp })
    }

    fn tags_pointing_at(&self, commit: &str) -> Result<Vec<String>> {
        Ok(tag_lines(&self.repo.git(&["tag", "--points-at", commit])?))
    }

    fn tags_merged(&self, commit: &str) -> Result<Vec<String>> {
        Ok(tag_lines(&self.repo.git(&["tag", "--merged", commit])?))
    }

    fn describe(&self) -> String {
        self.repo.root().display().to_string()
    }
}
