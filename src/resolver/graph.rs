// src/resolver/graph.rs

//! Graph construction from parsed records
//!
//! Turns the raw module/package stream reported by the tooling into the
//! resolved graph:
//! - duplicate modules across reporting sources collapse to one record
//! - replace directives are applied (version targets swap name and version,
//!   local targets swap the source path and inherit the main version)
//! - modules missing from the checksum manifest are flagged
//! - packages are attached to the module that owns them
//!
//! Output order is the first-occurrence order of the input.

use super::model::{Module, Package, ParsedModule, ParsedPackage, Replacement, ResolvedPackage, StandardPackage};
use crate::error::{Error, Result};
use crate::filesystem::RootedPath;
use crate::version::ModuleVersionResolver;
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// `(name, version)` pairs listed by a checksum manifest, and the manifest
/// that is expected to list every module
#[derive(Debug, Clone)]
pub struct ChecksumManifest {
    /// Path relative to the project root, reported for missing entries
    pub file: PathBuf,
    pub entries: HashSet<(String, String)>,
}

/// Workspace members taking part in the build
#[derive(Debug, Clone, Default)]
pub struct WorkspaceContext {
    pub members: Vec<RootedPath>,
}

/// Builds the resolved module and package graph for one main module
pub struct GraphBuilder<'a> {
    main_module: &'a Module,
    main_module_dir: &'a RootedPath,
    version_resolver: &'a ModuleVersionResolver,
    workspace: Option<&'a WorkspaceContext>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(
        main_module: &'a Module,
        main_module_dir: &'a RootedPath,
        version_resolver: &'a ModuleVersionResolver,
        workspace: Option<&'a WorkspaceContext>,
    ) -> Self {
        Self {
            main_module,
            main_module_dir,
            version_resolver,
            workspace,
        }
    }

    /// Merge the import-graph modules with the downloaded modules
    ///
    /// Records are keyed by [`ParsedModule::identity`]; the first occurrence
    /// wins, so import-graph records take precedence over download records.
    /// Once a module path has been replaced, later records for that path are
    /// dropped even when they name a different replacement target.
    pub fn dedup(import_graph: Vec<ParsedModule>, downloaded: Vec<ParsedModule>) -> Vec<ParsedModule> {
        let mut seen = HashSet::new();
        let mut replaced = HashSet::new();
        let mut modules = Vec::new();

        for module in import_graph.into_iter().chain(downloaded) {
            if replaced.contains(&module.path) || !seen.insert(module.identity()) {
                debug!("Dropping duplicate module record {}", module.path);
                continue;
            }
            if module.replace.is_some() {
                replaced.insert(module.path.clone());
            }
            modules.push(module);
        }

        modules
    }

    /// Resolve parsed modules into modules
    ///
    /// Every local replacement is checked for containment before anything is
    /// built, so an escaping path produces an error and no partial graph.
    pub fn build(&self, candidates: &[ParsedModule], checksums: &ChecksumManifest) -> Result<Vec<Module>> {
        self.validate_local_replacements(candidates)?;

        let mut seen = HashSet::new();
        let mut modules = Vec::new();
        for parsed in candidates {
            // The main module itself is prepended by the caller
            if (parsed.main && parsed.replace.is_none()) || !seen.insert(parsed.identity()) {
                continue;
            }
            modules.push(self.create_module(parsed, checksums)?);
        }
        Ok(modules)
    }

    fn validate_local_replacements(&self, candidates: &[ParsedModule]) -> Result<()> {
        for parsed in candidates {
            if let Some(Replacement::Local { path }) = &parsed.replace {
                self.main_module_dir.join_within_root(path)?;
            }
        }
        Ok(())
    }

    fn create_module(&self, parsed: &ParsedModule, checksums: &ChecksumManifest) -> Result<Module> {
        match &parsed.replace {
            Some(Replacement::Local { path }) => self.create_local_module(parsed, path),
            Some(Replacement::Version { path, version }) => Ok(Module {
                name: path.clone(),
                original_name: parsed.path.clone(),
                real_path: path.clone(),
                version: version.clone(),
                main: false,
                missing_hash_in_file: missing_hash(path, version, checksums),
            }),
            None => {
                let version = parsed.version.clone().ok_or_else(|| {
                    Error::UnexpectedFormat(format!("Module {} has no version", parsed.path))
                })?;
                Ok(Module {
                    name: parsed.path.clone(),
                    original_name: parsed.path.clone(),
                    real_path: parsed.path.clone(),
                    missing_hash_in_file: missing_hash(&parsed.path, &version, checksums),
                    version,
                    main: false,
                })
            }
        }
    }

    fn create_local_module(&self, parsed: &ParsedModule, rel: &str) -> Result<Module> {
        let target = self.main_module_dir.join_within_root(rel)?;
        let real_path = join_module_path(&self.main_module.real_path, rel);

        let member = self
            .workspace
            .map(|ws| ws.members.iter().any(|m| m.path() == target.path()))
            .unwrap_or(false);

        let version = if member {
            self.version_resolver.get_golang_version(&parsed.path, &target)?
        } else {
            self.main_module.version.clone()
        };

        Ok(Module {
            name: parsed.path.clone(),
            original_name: parsed.path.clone(),
            real_path,
            version,
            main: member,
            missing_hash_in_file: None,
        })
    }

    /// Attach parsed packages to their modules
    ///
    /// Packages are deduplicated by import path. A package names its module
    /// explicitly; when it does not, the module with the longest name that
    /// prefixes the import path is used.
    pub fn create_packages(modules: &[Module], parsed: Vec<ParsedPackage>) -> Result<Vec<ResolvedPackage>> {
        let by_original: HashMap<&str, &Module> = modules
            .iter()
            .map(|m| (m.original_name.as_str(), m))
            .collect();

        let mut seen = HashSet::new();
        let mut packages = Vec::new();

        for package in parsed {
            if !seen.insert(package.import_path.clone()) {
                continue;
            }

            if package.standard {
                packages.push(ResolvedPackage::Standard(StandardPackage {
                    name: package.import_path,
                }));
                continue;
            }

            let module = match &package.module {
                Some(parsed_module) => by_original.get(parsed_module.path.as_str()).copied(),
                None => longest_prefix_module(modules, &package.import_path),
            }
            .ok_or_else(|| {
                Error::ResolutionError(format!(
                    "Could not find a Go module for package: {}",
                    package.import_path
                ))
            })?;

            let relative_path = package
                .import_path
                .strip_prefix(&module.original_name)
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string();

            packages.push(ResolvedPackage::Module(Package {
                relative_path,
                module: module.clone(),
            }));
        }

        Ok(packages)
    }
}

fn missing_hash(name: &str, version: &str, checksums: &ChecksumManifest) -> Option<PathBuf> {
    if checksums
        .entries
        .contains(&(name.to_string(), version.to_string()))
    {
        return None;
    }
    warn!(
        "checksum not found in {}: {}@{}",
        checksums.file.display(),
        name,
        version
    );
    Some(checksums.file.clone())
}

fn longest_prefix_module<'m>(modules: &'m [Module], import_path: &str) -> Option<&'m Module> {
    modules
        .iter()
        .filter(|m| {
            import_path == m.original_name
                || import_path
                    .strip_prefix(&m.original_name)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
        .max_by_key(|m| m.original_name.len())
}

/// Apply a relative path to a module path, resolving `..` segments
fn join_module_path(base: &str, rel: &str) -> String {
    let mut segments: Vec<String> = base.split('/').map(String::from).collect();
    for component in Path::new(rel).components() {
        match component {
            Component::ParentDir => {
                segments.pop();
            }
            Component::Normal(name) => segments.push(name.to_string_lossy().into_owned()),
            _ => {}
        }
    }
    segments.join("/")
}
