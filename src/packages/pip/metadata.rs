// src/packages/pip/metadata.rs

//! Name and version of the package being built
//!
//! Read from `pyproject.toml` (`[project]`), then `setup.cfg`
//! (`[metadata]`). When neither names the package, the name is derived from
//! the repository's origin URL and the package subpath.

use crate::error::{Error, Result};
use crate::filesystem::RootedPath;
use crate::purl::canonicalize_pypi_name;
use crate::scm::RepoId;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Name and optional version of a Python project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    pub name: String,
    pub version: Option<String>,
}

/// Resolve metadata for the package in `package_dir`
pub fn get_pip_metadata(package_dir: &RootedPath, repo_id: &RepoId) -> Result<PackageMetadata> {
    let (name, version) = match from_config_files(package_dir) {
        (Some(name), version) => (name, version),
        (None, _) => (infer_name_from_origin_url(package_dir, repo_id)?, None),
    };

    info!("Resolved name {} for package at {}", name, package_dir.path().display());
    match &version {
        Some(version) => info!(
            "Resolved version {} for package at {}",
            version,
            package_dir.path().display()
        ),
        None => warn!(
            "Could not resolve version for package at {}",
            package_dir.path().display()
        ),
    }
    Ok(PackageMetadata { name, version })
}

fn from_config_files(package_dir: &RootedPath) -> (Option<String>, Option<String>) {
    let pyproject = package_dir.path().join("pyproject.toml");
    if pyproject.is_file() {
        debug!("Checking pyproject.toml for metadata");
        let (name, version) = pyproject_metadata(&pyproject);
        if name.is_some() {
            return (name, version);
        }
    }

    let setup_cfg = package_dir.path().join("setup.cfg");
    if setup_cfg.is_file() {
        debug!("Checking setup.cfg for metadata");
        let (name, version) = SetupCfg::read(&setup_cfg)
            .map(|cfg| (cfg.name(), cfg.version(package_dir)))
            .unwrap_or((None, None));
        if name.is_some() {
            return (name, version);
        }
    }

    (None, None)
}

/// `project.name` and `project.version` from pyproject.toml
pub fn pyproject_metadata(path: &Path) -> (Option<String>, Option<String>) {
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|content| content.parse::<toml::Table>().map_err(|e| e.to_string()));
    let table = match parsed {
        Ok(table) => table,
        Err(e) => {
            error!("Failed to parse pyproject.toml: {}", e);
            return (None, None);
        }
    };

    let project = table.get("project");
    let field = |key: &str| {
        let value = project
            .and_then(|p| p.get(key))
            .and_then(|v| v.as_str())
            .map(String::from);
        if value.is_none() {
            warn!("No project.{} in pyproject.toml", key);
        }
        value
    };
    (field("name"), field("version"))
}

/// Derive a name like `repo-subdir` from the origin remote
fn infer_name_from_origin_url(package_dir: &RootedPath, repo_id: &RepoId) -> Result<String> {
    let repository = repo_id.repository_name().map_err(|_| {
        Error::rejected_with(
            "Unable to infer package name from origin URL",
            "Provide valid metadata in the package files or ensure \
             the git repository has an 'origin' remote with a valid URL.",
        )
    })?;
    let repo_name = repository.rsplit('/').next().unwrap_or(&repository);

    let subpath = package_dir.subpath_from_root();
    let resolved = if subpath == Path::new(".") {
        repo_name.to_string()
    } else {
        format!("{}/{}", repo_name, subpath.to_string_lossy())
    };

    Ok(canonicalize_pypi_name(&resolved.replace('/', "-"))
        .trim_matches(|c| c == '-' || c == '.')
        .to_string())
}

// =============================================================================
// setup.cfg
// =============================================================================

/// The sections of an INI-style setup.cfg
struct SetupCfg {
    sections: HashMap<String, HashMap<String, String>>,
}

impl SetupCfg {
    fn read(path: &Path) -> Option<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Some(Self::parse(&content)),
            Err(e) => {
                error!("Failed to read setup.cfg: {}", e);
                None
            }
        }
    }

    /// `[section]` headers, `key = value` or `key: value`, indented continuations
    fn parse(content: &str) -> Self {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut section = None;
        let mut last_key: Option<String> = None;

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            if let Some(name) = trimmed.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                section = Some(name.trim().to_string());
                last_key = None;
                continue;
            }
            let Some(current) = &section else {
                continue;
            };
            let options = sections.entry(current.clone()).or_default();

            if line.starts_with(char::is_whitespace) {
                if let Some(value) = last_key.as_ref().and_then(|key| options.get_mut(key)) {
                    value.push('\n');
                    value.push_str(trimmed);
                }
                continue;
            }

            if let Some(pos) = trimmed.find(['=', ':']) {
                let key = trimmed[..pos].trim().to_lowercase();
                let value = trimmed[pos + 1..].trim().to_string();
                options.insert(key.clone(), value);
                last_key = Some(key);
            }
        }

        Self { sections }
    }

    fn get(&self, section: &str, option: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(option))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn name(&self) -> Option<String> {
        match self.get("metadata", "name") {
            Some(name) => {
                info!("Found metadata.name in setup.cfg: '{}'", name);
                Some(name.to_string())
            }
            None => {
                info!("No metadata.name in setup.cfg");
                None
            }
        }
    }

    /// `metadata.version`, resolving `file:` and literal `attr:` references
    fn version(&self, package_dir: &RootedPath) -> Option<String> {
        let Some(raw) = self.get("metadata", "version") else {
            info!("No metadata.version in setup.cfg");
            return None;
        };

        debug!("Resolving metadata.version in setup.cfg from '{}'", raw);
        let resolved = if let Some(file) = raw.strip_prefix("file:") {
            version_from_file(package_dir, file.trim())
        } else if let Some(attr) = raw.strip_prefix("attr:") {
            version_from_attr(package_dir, attr.trim())
        } else {
            Some(raw.to_string())
        };

        match resolved.filter(|v| !v.is_empty()) {
            Some(version) => {
                info!("Found metadata.version in setup.cfg: '{}'", version);
                Some(version)
            }
            None => {
                info!("Failed to resolve metadata.version in setup.cfg");
                None
            }
        }
    }
}

fn version_from_file(package_dir: &RootedPath, file: &str) -> Option<String> {
    let path = match package_dir.join_within_root(file) {
        Ok(path) => path,
        Err(e) => {
            error!("Version file '{}' is not usable: {}", file, e);
            return None;
        }
    };
    match std::fs::read_to_string(path.path()) {
        Ok(content) => Some(content.trim().to_string()),
        Err(_) => {
            error!("Version file '{}' does not exist or is not a file", file);
            None
        }
    }
}

/// `attr: pkg.module.NAME` where `NAME` is assigned a string literal
fn version_from_attr(package_dir: &RootedPath, spec: &str) -> Option<String> {
    let (module, attr) = match spec.rsplit_once('.') {
        Some((module, attr)) => (module, attr),
        None => ("__init__", spec),
    };
    let module_path = module.replace('.', "/");

    let candidates = [
        format!("{}.py", module_path),
        format!("{}/__init__.py", module_path),
        format!("src/{}.py", module_path),
        format!("src/{}/__init__.py", module_path),
    ];
    let source = candidates.iter().find_map(|candidate| {
        let path = package_dir.join_within_root(candidate).ok()?;
        std::fs::read_to_string(path.path()).ok()
    });
    let Some(source) = source else {
        error!("Module '{}' not found", module);
        return None;
    };

    let pattern = format!(r#"(?m)^{}\s*=\s*['"]([^'"]+)['"]"#, regex::escape(attr));
    let found = Regex::new(&pattern)
        .ok()
        .and_then(|re| re.captures(&source))
        .map(|caps| caps[1].to_string());
    if found.is_none() {
        error!("Attribute '{}' is not a string literal in module '{}'", attr, module);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(files: &[(&str, &str)]) -> (tempfile::TempDir, RootedPath) {
        let temp = tempfile::tempdir().unwrap();
        for (path, content) in files {
            let full = temp.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        let root = RootedPath::new(temp.path()).unwrap();
        (temp, root)
    }

    fn repo_id() -> RepoId {
        RepoId::new("https://github.com/org/My_Repo.git", "f".repeat(40))
    }

    #[test]
    fn test_pyproject_metadata() {
        let (_temp, root) = project(&[(
            "pyproject.toml",
            "[project]\nname = \"my-app\"\nversion = \"1.2.3\"\n",
        )]);
        let metadata = get_pip_metadata(&root, &repo_id()).unwrap();
        assert_eq!(metadata.name, "my-app");
        assert_eq!(metadata.version.as_deref(), Some("1.2.3"));
    }

    #[test]
    fn test_pyproject_without_name_falls_back_to_setup_cfg() {
        let (_temp, root) = project(&[
            ("pyproject.toml", "[build-system]\nrequires = []\n"),
            ("setup.cfg", "[metadata]\nname = from-cfg\nversion = file: VERSION\n"),
            ("VERSION", "2.0.0\n"),
        ]);
        let metadata = get_pip_metadata(&root, &repo_id()).unwrap();
        assert_eq!(metadata.name, "from-cfg");
        assert_eq!(metadata.version.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn test_setup_cfg_attr_version() {
        let (_temp, root) = project(&[
            ("setup.cfg", "[metadata]\nname: pkg\nversion: attr: pkg.__version__\n"),
            ("src/pkg/__init__.py", "__version__ = '0.4.1'\n"),
        ]);
        let metadata = get_pip_metadata(&root, &repo_id()).unwrap();
        assert_eq!(metadata.version.as_deref(), Some("0.4.1"));
    }

    #[test]
    fn test_name_from_origin_url() {
        let (_temp, root) = project(&[("sub/dir/requirements.txt", "")]);
        let metadata = get_pip_metadata(&root, &repo_id()).unwrap();
        assert_eq!(metadata.name, "my-repo");
        assert_eq!(metadata.version, None);

        let nested = root.join_within_root("sub/dir").unwrap();
        let metadata = get_pip_metadata(&nested, &repo_id()).unwrap();
        assert_eq!(metadata.name, "my-repo-sub-dir");
    }

    #[test]
    fn test_setup_cfg_continuation_lines() {
        let cfg = SetupCfg::parse("[metadata]\nname = pkg\nclassifiers =\n    A\n    B\n");
        assert_eq!(cfg.get("metadata", "classifiers"), Some("A\nB"));
        assert_eq!(cfg.get("metadata", "missing"), None);
    }
}
