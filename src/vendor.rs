// src/vendor.rs

//! Vendor directory drift detection
//!
//! After dependencies are re-vendored, the committed `vendor/` tree must be
//! unchanged. The check marks the tree with `git add --intent-to-add`, diffs
//! the working tree against the index and resets the marks again, so the
//! index is left exactly as it was regardless of the outcome. The sequence
//! runs under a process-wide lock because the index is shared state.

use crate::error::{Error, Result};
use crate::filesystem::RootedPath;
use crate::request::Mode;
use crate::scm::GitRepo;
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, warn};

/// Serializes the add/diff/reset sequence
static INDEX_LOCK: Mutex<()> = Mutex::new(());

/// How the vendor directory differs from the committed one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorChange {
    None,
    /// Only new files appeared
    Addition(String),
    /// Existing files changed or were deleted
    Modification(String),
}

impl VendorChange {
    #[inline]
    pub fn is_changed(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Classifies changes to a committed vendor directory
pub struct VendorConsistencyChecker<'a> {
    repo: &'a GitRepo,
}

impl<'a> VendorConsistencyChecker<'a> {
    pub fn new(repo: &'a GitRepo) -> Self {
        Self { repo }
    }

    /// Compare `<app_dir>/vendor` in the working tree with the index
    pub fn check(&self, app_dir: &RootedPath) -> Result<VendorChange> {
        let vendor = app_dir.path().join("vendor");
        let vendor_rel = self.repo_relative(&vendor)?;
        let modules_txt_rel = format!("{}/modules.txt", vendor_rel);

        let _guard = INDEX_LOCK
            .lock()
            .map_err(|_| Error::InitError("vendor check lock is poisoned".to_string()))?;

        if !vendor.exists() {
            return Ok(VendorChange::None);
        }

        self.repo
            .git(&["add", "--force", "--intent-to-add", "--", &vendor_rel])?;
        let outcome = self.classify(&vendor_rel, &modules_txt_rel);
        let reset = self.repo.git(&["reset", "-q", "--", &vendor_rel]);

        let change = outcome?;
        reset?;
        Ok(change)
    }

    fn classify(&self, vendor_rel: &str, modules_txt_rel: &str) -> Result<VendorChange> {
        let modules_txt_diff = self.repo.git(&["diff", "--", modules_txt_rel])?;
        if !modules_txt_diff.trim().is_empty() {
            error!("{} changed after vendoring:\n{}", modules_txt_rel, modules_txt_diff);
            return Ok(if modules_txt_diff.contains("--- /dev/null") {
                VendorChange::Addition(modules_txt_diff)
            } else {
                VendorChange::Modification(modules_txt_diff)
            });
        }

        let name_status = self.repo.git(&["diff", "--name-status", "--", vendor_rel])?;
        if name_status.trim().is_empty() {
            return Ok(VendorChange::None);
        }

        error!("{} directory changed after vendoring:\n{}", vendor_rel, name_status);
        let only_added = name_status
            .lines()
            .filter(|line| !line.trim().is_empty())
            .all(|line| line.starts_with('A'));
        Ok(if only_added {
            VendorChange::Addition(name_status)
        } else {
            VendorChange::Modification(name_status)
        })
    }

    fn repo_relative(&self, path: &Path) -> Result<String> {
        let root = self.repo.root().canonicalize().unwrap_or_else(|_| self.repo.root().to_path_buf());
        let rel = path.strip_prefix(&root).map_err(|_| Error::PathOutsideRoot {
            path: path.to_path_buf(),
            root: root.clone(),
        })?;
        Ok(if rel.as_os_str().is_empty() {
            ".".to_string()
        } else {
            rel.to_string_lossy().into_owned()
        })
    }
}

/// Apply the request mode to a detected change
///
/// Strict mode rejects any change; permissive mode logs it and continues.
pub fn enforce(change: &VendorChange, mode: Mode, vendor_hint: &str) -> Result<()> {
    if !change.is_changed() {
        return Ok(());
    }

    match mode {
        Mode::Strict => Err(Error::rejected_with(
            "The content of the vendor directory is not consistent with go.mod.",
            format!(
                "Please try running `{}` and committing the changes.\n\
                 Note that you may need to `git add --force` ignored files in the vendor/ dir.",
                vendor_hint
            ),
        )),
        Mode::Permissive => {
            warn!(
                "The content of the vendor directory is not consistent with go.mod. \
                 Continuing because the request is in permissive mode."
            );
            Ok(())
        }
    }
}
