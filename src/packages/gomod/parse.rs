// src/packages/gomod/parse.rs

//! Readers for go tool output and Go module files
//!
//! `go list -json` and `go mod download -json` print a stream of
//! concatenated JSON objects rather than an array; [`load_json_stream`]
//! decodes them one value at a time.

use crate::error::{Error, Result};
use crate::filesystem::RootedPath;
use crate::resolver::{ParsedModule, ParsedPackage, Replacement};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::warn;

/// A module as printed by `go list -m -json` and `go mod download -json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GoModuleJson {
    pub path: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub main: bool,
    #[serde(default)]
    pub replace: Option<Box<GoModuleJson>>,
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub go_mod: Option<PathBuf>,
}

impl GoModuleJson {
    pub fn into_parsed(self) -> ParsedModule {
        let mut parsed = ParsedModule::new(self.path, self.version.as_deref());
        parsed.main = self.main;
        parsed.replace = self
            .replace
            .map(|replace| Replacement::new(replace.path, replace.version));
        parsed
    }
}

/// A package as printed by `go list -deps -json`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GoPackageJson {
    pub import_path: String,
    #[serde(default)]
    pub module: Option<GoModuleJson>,
    #[serde(default)]
    pub standard: bool,
}

impl GoPackageJson {
    pub fn into_parsed(self) -> ParsedPackage {
        ParsedPackage {
            import_path: self.import_path,
            module: self.module.map(GoModuleJson::into_parsed),
            standard: self.standard,
        }
    }
}

/// Decode a whitespace-separated stream of JSON values
pub fn load_json_stream<T: DeserializeOwned>(stream: &str) -> Result<Vec<T>> {
    serde_json::Deserializer::from_str(stream)
        .into_iter::<T>()
        .map(|item| {
            item.map_err(|e| Error::UnexpectedFormat(format!("Invalid go tool JSON output: {}", e)))
        })
        .collect()
}

pub fn parse_module_stream(stream: &str) -> Result<Vec<ParsedModule>> {
    Ok(load_json_stream::<GoModuleJson>(stream)?
        .into_iter()
        .map(GoModuleJson::into_parsed)
        .collect())
}

pub fn parse_package_stream(stream: &str) -> Result<Vec<ParsedPackage>> {
    Ok(load_json_stream::<GoPackageJson>(stream)?
        .into_iter()
        .map(GoPackageJson::into_parsed)
        .collect())
}

// =============================================================================
// go.sum
// =============================================================================

/// `(module, version)` pairs that have a content checksum in a go.sum file
///
/// `/go.mod`-only entries do not count. A missing file yields an empty set;
/// parsing stops at the first malformed line.
pub fn parse_go_sum(go_sum: &RootedPath) -> HashSet<(String, String)> {
    let mut modules = HashSet::new();
    let Ok(content) = std::fs::read_to_string(go_sum.path()) else {
        return modules;
    };

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let &[name, version, _hash] = fields.as_slice() else {
            warn!(
                "{}:{}: malformed line, skipping the rest of the file: '{}'",
                go_sum.subpath_from_root().display(),
                index + 1,
                line
            );
            break;
        };

        if version.ends_with("/go.mod") {
            continue;
        }
        modules.insert((name.to_string(), version.to_string()));
    }

    modules
}

// =============================================================================
// vendor/modules.txt
// =============================================================================

fn vendor_error(message: String) -> Error {
    Error::UnexpectedFormat(format!("vendor/modules.txt: {}", message))
}

fn parse_module_line(line: &str) -> Result<ParsedModule> {
    let parts: Vec<&str> = line["# ".len()..].split_whitespace().collect();
    let module = match parts.as_slice() {
        &[path, version] => ParsedModule::new(path, Some(version)),
        &[path, "=>", replace_path] => {
            ParsedModule::new(path, None).with_replace(Replacement::new(replace_path, None))
        }
        &[path, "=>", replace_path, replace_version] => ParsedModule::new(path, None)
            .with_replace(Replacement::new(replace_path, Some(replace_version.to_string()))),
        &[path, version, "=>", replace_path] => ParsedModule::new(path, Some(version))
            .with_replace(Replacement::new(replace_path, None)),
        &[path, version, "=>", replace_path, replace_version] => {
            ParsedModule::new(path, Some(version)).with_replace(Replacement::new(
                replace_path,
                Some(replace_version.to_string()),
            ))
        }
        _ => {
            return Err(vendor_error(format!(
                "unexpected module line format: '{}'",
                line
            )));
        }
    };
    Ok(module)
}

/// Modules listed in `<app_dir>/vendor/modules.txt` that provide at least
/// one vendored package
pub fn parse_vendor_modules(app_dir: &RootedPath) -> Result<Vec<ParsedModule>> {
    let modules_txt = app_dir.join_within_root("vendor/modules.txt")?;
    let content = std::fs::read_to_string(modules_txt.path()).map_err(|e| {
        Error::IoError(format!("Failed to read {}: {}", modules_txt.path().display(), e))
    })?;

    let mut modules: Vec<(ParsedModule, bool)> = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() || line.starts_with("## ") {
            // `## explicit` markers
            continue;
        }
        if line.starts_with("# ") {
            modules.push((parse_module_line(line)?, false));
        } else if line.starts_with('#') {
            return Err(vendor_error(format!("unexpected format: '{}'", line)));
        } else {
            let (_, has_packages) = modules.last_mut().ok_or_else(|| {
                vendor_error(format!("package has no parent module: {}", line.trim()))
            })?;
            *has_packages = true;
        }
    }

    Ok(modules
        .into_iter()
        .filter(|(_, has_packages)| *has_packages)
        .map(|(module, _)| module)
        .collect())
}
