// src/resolver/model.rs

//! Parsed and resolved dependency records
//!
//! Parsers report [`ParsedModule`]/[`ParsedPackage`] records verbatim from
//! the ecosystem tooling. The graph builder turns them into [`Module`] and
//! [`Package`] values, which are what components are emitted for.

use crate::purl::PackageUrl;
use crate::sbom::{Component, PropertySet, ToComponent};
use std::path::PathBuf;

/// Substitute declared by a replace directive
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Replacement {
    /// Another module at a pinned version
    Version { path: String, version: String },
    /// A directory relative to the declaring manifest
    Local { path: String },
}

impl Replacement {
    /// Classify a replace target the way the go tool does: local paths
    /// start with `./`, `../` or `/`
    pub fn new(path: impl Into<String>, version: Option<String>) -> Self {
        let path = path.into();
        match version {
            Some(version) if !is_local_path(&path) => Self::Version { path, version },
            _ => Self::Local { path },
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Version { path, .. } | Self::Local { path } => path,
        }
    }

    #[inline]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

fn is_local_path(path: &str) -> bool {
    path.starts_with("./") || path.starts_with("../") || path.starts_with('/') || path == "." || path == ".."
}

/// A dependency unit as reported by a tool
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedModule {
    pub path: String,
    pub version: Option<String>,
    pub main: bool,
    pub replace: Option<Replacement>,
}

impl ParsedModule {
    pub fn new(path: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            path: path.into(),
            version: version.map(String::from),
            main: false,
            replace: None,
        }
    }

    pub fn with_replace(mut self, replace: Replacement) -> Self {
        self.replace = Some(replace);
        self
    }

    /// Identity used for deduplication: the version-replacement target when
    /// there is one, the module itself otherwise
    pub fn identity(&self) -> (String, String) {
        match &self.replace {
            Some(Replacement::Version { path, version }) => (path.clone(), version.clone()),
            _ => (self.path.clone(), self.version.clone().unwrap_or_default()),
        }
    }
}

/// An importable unit reported by a tool
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedPackage {
    pub import_path: String,
    pub module: Option<ParsedModule>,
    pub standard: bool,
}

/// A resolved module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Name after replacement
    pub name: String,
    /// Name before replacement
    pub original_name: String,
    /// Where the source actually comes from; differs from `name` for local replacements
    pub real_path: String,
    pub version: String,
    pub main: bool,
    /// Checksum manifest that should have listed this module but did not
    pub missing_hash_in_file: Option<PathBuf>,
}

impl Module {
    pub fn purl(&self) -> PackageUrl {
        PackageUrl::new("golang", &self.real_path)
            .with_version(&self.version)
            .with_qualifier("type", "module")
    }
}

impl ToComponent for Module {
    fn to_component(&self) -> Component {
        let mut properties = PropertySet::default();
        if let Some(file) = &self.missing_hash_in_file {
            properties
                .missing_hash_in_file
                .insert(file.to_string_lossy().into_owned());
        }
        Component::new(&self.name, Some(&self.version), self.purl().to_string())
            .with_properties(properties)
    }
}

/// A package that belongs to a resolved module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Path relative to the module root, empty for the root package
    pub relative_path: String,
    pub module: Module,
}

impl Package {
    pub fn name(&self) -> String {
        join_import_path(&self.module.name, &self.relative_path)
    }

    pub fn real_path(&self) -> String {
        join_import_path(&self.module.real_path, &self.relative_path)
    }

    pub fn purl(&self) -> PackageUrl {
        PackageUrl::new("golang", &self.real_path())
            .with_version(&self.module.version)
            .with_qualifier("type", "package")
    }
}

impl ToComponent for Package {
    fn to_component(&self) -> Component {
        Component::new(&self.name(), Some(&self.module.version), self.purl().to_string())
    }
}

/// A package from the language's standard library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardPackage {
    pub name: String,
}

impl StandardPackage {
    pub fn purl(&self) -> PackageUrl {
        PackageUrl::new("golang", &self.name).with_qualifier("type", "package")
    }
}

impl ToComponent for StandardPackage {
    fn to_component(&self) -> Component {
        Component::new(&self.name, None, self.purl().to_string())
    }
}

/// Either kind of resolved package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedPackage {
    Module(Package),
    Standard(StandardPackage),
}

impl ToComponent for ResolvedPackage {
    fn to_component(&self) -> Component {
        match self {
            Self::Module(package) => package.to_component(),
            Self::Standard(package) => package.to_component(),
        }
    }
}

fn join_import_path(base: &str, rel: &str) -> String {
    if rel.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, rel)
    }
}
