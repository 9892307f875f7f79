// src/packages/pip/requirements.rs

//! pip requirements files
//!
//! Reads the subset of the requirements file format that a fully pinned
//! dependency list uses: one requirement per logical line, `\` line
//! continuations, `#` comments, global options and the per-requirement
//! `--hash`/`--editable` options. Requirements come in three kinds:
//!
//! - **pypi**: `name==version`, resolved against a package index
//! - **url**: `name @ https://host/file.tar.gz`, fetched directly
//! - **vcs**: `name @ git+https://host/org/repo@<commit>`, cloned

use crate::error::{Error, Result};
use crate::filesystem::RootedPath;
use crate::hash::ChecksumInfo;
use crate::purl::canonicalize_pypi_name;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;
use strum_macros::Display;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_REQUIREMENTS_FILE: &str = "requirements.txt";
pub const DEFAULT_BUILD_REQUIREMENTS_FILE: &str = "requirements-build.txt";

pub const SDIST_FILE_EXTENSIONS: &[&str] =
    &[".zip", ".tar.gz", ".tar.bz2", ".tar.xz", ".tar.Z", ".tar"];
pub const WHEEL_FILE_EXTENSION: &str = ".whl";

static LINE_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(^|\s)#.*$").unwrap());
static NAME_IN_DIRECT_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@.+://").unwrap());
static GIT_REF_IN_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@[a-fA-F0-9]{40}$").unwrap());
static REQUIREMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<rest>.*)$")
        .unwrap()
});
static VERSION_SPEC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<op>===|==|!=|<=|>=|~=|<|>)\s*(?P<version>[A-Za-z0-9_.*+!-]+)\s*$").unwrap()
});

/// Options a requirements file may use, and whether each takes a value
const OPTIONS: &[(&str, bool)] = &[
    ("--constraint", true),
    // -e/--editable take the requirement itself as their value
    ("--editable", false),
    ("--extra-index-url", true),
    ("--find-links", true),
    ("--index-url", true),
    ("--no-binary", true),
    ("--no-index", false),
    ("--only-binary", true),
    ("--pre", false),
    ("--prefer-binary", false),
    ("--require-hashes", false),
    ("--requirement", true),
    ("--trusted-host", true),
    ("--use-feature", true),
    ("-c", true),
    ("-e", false),
    ("-f", true),
    ("--hash", true),
    ("-i", true),
    ("-r", true),
];

/// Options bound to the requirement on the same line; all others are global
const REQUIREMENT_OPTIONS: &[&str] = &["-e", "--editable", "--hash"];

/// Global options that need more than one index, or binaries only
const REJECTED_OPTIONS: &[&str] = &[
    "--extra-index-url",
    "--no-index",
    "-f",
    "--find-links",
    "--only-binary",
];

const URL_SCHEMES: &[&str] = &["http", "https", "ftp"];
const VCS_SCHEMES: &[&str] = &[
    "bzr", "bzr+ftp", "bzr+http", "bzr+https", "git", "git+ftp", "git+http", "git+https", "hg",
    "hg+ftp", "hg+http", "hg+https", "svn", "svn+ftp", "svn+http", "svn+https",
];

fn option_takes_value(option: &str) -> Option<bool> {
    OPTIONS
        .iter()
        .find(|(name, _)| *name == option)
        .map(|(_, takes_value)| *takes_value)
}

// =============================================================================
// Requirements
// =============================================================================

/// Where a requirement's artifacts come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RequirementKind {
    Pypi,
    Url,
    Vcs,
}

/// One requirement line with its options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Canonical project name
    pub package: String,
    /// Project name as written
    pub raw_package: String,
    pub extras: BTreeSet<String>,
    /// `(operator, version)` pairs
    pub version_specs: Vec<(String, String)>,
    pub environment_marker: Option<String>,
    /// `--hash` values, `algorithm:digest`
    pub hashes: Vec<String>,
    /// `key=value` pairs from the URL fragment, in order
    pub qualifiers: Vec<(String, String)>,
    pub kind: RequirementKind,
    /// The requirement without options, normalized for direct references
    pub download_line: String,
    /// Per-requirement options other than `--hash`
    pub options: Vec<String>,
}

struct Pep508 {
    name: String,
    extras: BTreeSet<String>,
    version_specs: Vec<(String, String)>,
    marker: Option<String>,
}

impl Requirement {
    /// Parse a requirement line whose options were already split off
    pub fn from_line(line: &str, options: &[String]) -> Result<Self> {
        let (kind, to_parse, qualifiers) = match direct_access_kind(line)? {
            None => (RequirementKind::Pypi, line.to_string(), Vec::new()),
            Some(kind) => {
                let (adjusted, qualifiers) = adjust_direct_access(line)?;
                (kind, adjusted, qualifiers)
            }
        };

        let parsed = parse_pep508(&to_parse).map_err(|reason| {
            Error::UnexpectedFormat(format!(
                "Unable to parse the requirement '{}': {}",
                to_parse, reason
            ))
        })?;
        let (hashes, options) = split_hashes(options);

        Ok(Self {
            package: canonicalize_pypi_name(&parsed.name),
            raw_package: parsed.name,
            extras: parsed.extras,
            version_specs: parsed.version_specs,
            environment_marker: parsed.marker,
            hashes,
            qualifiers,
            kind,
            download_line: to_parse,
            options,
        })
    }

    /// The URL of a direct reference (`name @ <url> [; marker]`)
    pub fn url(&self) -> Result<&str> {
        if self.kind == RequirementKind::Pypi {
            return Err(Error::UnexpectedFormat(format!(
                "Cannot extract URL from pypi requirement '{}'",
                self.download_line
            )));
        }
        self.download_line.split_whitespace().nth(2).ok_or_else(|| {
            Error::UnexpectedFormat(format!("No URL in requirement '{}'", self.download_line))
        })
    }

    pub fn qualifier(&self, key: &str) -> Option<&str> {
        self.qualifiers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The version of an `==`/`===` pinned requirement
    pub fn pinned_version(&self) -> Result<&str> {
        match self.version_specs.as_slice() {
            [(op, version)] if op == "==" || op == "===" => Ok(version),
            _ => Err(unpinned(self)),
        }
    }

    /// Hashes the requirement declares, including a `#cachito_hash=` fragment on URLs
    pub fn declared_hashes(&self) -> Vec<String> {
        if !self.hashes.is_empty() || self.kind != RequirementKind::Url {
            return self.hashes.clone();
        }
        self.qualifier("cachito_hash")
            .filter(|hash| !hash.is_empty())
            .map(|hash| vec![hash.to_string()])
            .unwrap_or_default()
    }

    /// A copy pointing at `url`, always of the url kind
    ///
    /// Version specifiers and extras do not apply to direct references and
    /// are dropped, as are editable options.
    pub fn with_url(&self, url: &str) -> Self {
        let mut parts = vec![self.raw_package.clone(), "@".to_string()];
        let fragment = self
            .qualifiers
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        if fragment.is_empty() {
            parts.push(url.to_string());
        } else {
            parts.push(format!("{}#{}", url, fragment));
        }
        if let Some(marker) = &self.environment_marker {
            parts.push(";".to_string());
            parts.push(marker.clone());
        }

        let options: Vec<String> = self
            .options
            .iter()
            .filter(|option| *option != "-e" && *option != "--editable")
            .cloned()
            .collect();
        if options.len() != self.options.len() {
            warn!(
                "Removed editable option when copying the requirement '{}'",
                self.raw_package
            );
        }

        Self {
            package: self.package.clone(),
            raw_package: self.raw_package.clone(),
            extras: BTreeSet::new(),
            version_specs: Vec::new(),
            environment_marker: self.environment_marker.clone(),
            hashes: self.hashes.clone(),
            qualifiers: self.qualifiers.clone(),
            kind: RequirementKind::Url,
            download_line: parts.join(" "),
            options,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.options.clone();
        parts.push(self.download_line.clone());
        parts.extend(self.hashes.iter().map(|hash| format!("--hash={}", hash)));
        write!(f, "{}", parts.join(" "))
    }
}

/// The kind of direct reference on the line, `None` for index requirements
fn direct_access_kind(line: &str) -> Result<Option<RequirementKind>> {
    let Some((before_colon, _)) = line.split_once(':') else {
        return Ok(None);
    };
    let scheme_parts: Vec<&str> = before_colon.split('@').collect();
    if scheme_parts.len() > 2 {
        return Err(Error::UnexpectedFormat(format!(
            "Unable to extract scheme from direct access requirement '{}'",
            line
        )));
    }
    let scheme = scheme_parts
        .last()
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();

    if URL_SCHEMES.contains(&scheme.as_str()) {
        Ok(Some(RequirementKind::Url))
    } else if VCS_SCHEMES.contains(&scheme.as_str()) {
        Ok(Some(RequirementKind::Vcs))
    } else {
        Err(Error::unsupported(format!(
            "Direct references with '{}' scheme are not supported, '{}'",
            scheme, line
        )))
    }
}

/// Normalize a direct reference to `name @ url [; marker]` and collect its fragment
///
/// An `egg=` fragment names the package even when `name @` is present.
fn adjust_direct_access(line: &str) -> Result<(String, Vec<(String, String)>)> {
    let mut package_name = None;
    let mut url = line;
    if NAME_IN_DIRECT_REFERENCE.is_match(line) {
        if let Some((name, rest)) = line.split_once('@') {
            package_name = Some(name.trim().to_string());
            url = rest;
        }
    }

    let (url, marker) = match url.split_once("; ") {
        Some((url, marker)) => (url.trim(), Some(marker.trim())),
        None => (url.trim(), None),
    };

    let mut qualifiers: Vec<(String, String)> = Vec::new();
    if let Some((_, fragment)) = url.split_once('#') {
        for section in fragment.split('&') {
            let Some((attr, value)) = section.split_once('=') else {
                continue;
            };
            let (attr, value) = (attr.trim(), value.trim());
            let value = urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());
            if attr == "egg" {
                package_name = Some(value.clone());
            }
            match qualifiers.iter_mut().find(|(k, _)| k == attr) {
                Some(existing) => existing.1 = value,
                None => qualifiers.push((attr.to_string(), value)),
            }
        }
    }

    let name = package_name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| {
            Error::unsupported_with(
                format!(
                    "Dependency name could not be determined from the requirement '{}' \
                     (the name needs to be explicitly declared)",
                    line
                ),
                "Please specify the name of the dependency: <name> @ <url>",
            )
        })?;

    let mut parts = vec![name.trim().to_string(), "@".to_string(), url.trim().to_string()];
    if let Some(marker) = marker {
        parts.push(";".to_string());
        parts.push(marker.trim().to_string());
    }
    Ok((parts.join(" "), qualifiers))
}

/// Minimal PEP 508 reader: name, extras, either specifiers or `@ url`, marker
fn parse_pep508(requirement: &str) -> std::result::Result<Pep508, String> {
    let (spec, marker) = match requirement.split_once(';') {
        Some((spec, marker)) => {
            let marker = marker.trim();
            if marker.is_empty() {
                return Err("empty environment marker".to_string());
            }
            (spec.trim(), Some(marker.to_string()))
        }
        None => (requirement.trim(), None),
    };

    let caps = REQUIREMENT
        .captures(spec)
        .ok_or_else(|| "expected a package name".to_string())?;
    let name = caps["name"].to_string();
    let extras = caps
        .name("extras")
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let rest = caps["rest"].trim();
    let mut version_specs = Vec::new();
    if let Some(url) = rest.strip_prefix('@') {
        if url.trim().is_empty() {
            return Err("expected a URL after '@'".to_string());
        }
    } else if !rest.is_empty() {
        let rest = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .unwrap_or(rest);
        for clause in rest.split(',') {
            let spec = VERSION_SPEC
                .captures(clause)
                .ok_or_else(|| format!("invalid version specifier '{}'", clause.trim()))?;
            version_specs.push((spec["op"].to_string(), spec["version"].to_string()));
        }
    }

    Ok(Pep508 {
        name,
        extras,
        version_specs,
        marker,
    })
}

fn split_hashes(options: &[String]) -> (Vec<String>, Vec<String>) {
    let mut hashes = Vec::new();
    let mut reduced = Vec::new();
    let mut is_hash = false;

    for item in options {
        if is_hash {
            hashes.push(item.clone());
            is_hash = false;
            continue;
        }
        is_hash = item == "--hash";
        if !is_hash {
            reduced.push(item.clone());
        }
    }
    (hashes, reduced)
}

// =============================================================================
// Files
// =============================================================================

/// A parsed requirements file
#[derive(Debug, Clone)]
pub struct RequirementsFile {
    pub path: RootedPath,
    pub requirements: Vec<Requirement>,
    /// Global options in file order, values following their option
    pub options: Vec<String>,
}

impl RequirementsFile {
    pub fn read(path: &RootedPath) -> Result<Self> {
        let content = std::fs::read_to_string(path.path()).map_err(|e| {
            Error::IoError(format!("Failed to read {}: {}", path.path().display(), e))
        })?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &RootedPath, content: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        let mut options = Vec::new();

        for line in logical_lines(content) {
            let (global, requirement_options, requirement) = split_options(&line)?;
            options.extend(global);
            if !requirement.is_empty() {
                requirements.push(Requirement::from_line(&requirement, &requirement_options)?);
            }
        }

        Ok(Self {
            path: path.clone(),
            requirements,
            options,
        })
    }

    pub fn from_parts(path: &RootedPath, requirements: Vec<Requirement>, options: Vec<String>) -> Self {
        Self {
            path: path.clone(),
            requirements,
            options,
        }
    }

    /// Options on the first line, then one requirement per line
    pub fn generate_file_content(&self) -> String {
        let mut content = String::new();
        if !self.options.is_empty() {
            content.push_str(&self.options.join(" "));
            content.push('\n');
        }
        for requirement in &self.requirements {
            content.push_str(&requirement.to_string());
            content.push('\n');
        }
        content
    }
}

/// Join continuations and drop comments and blank lines
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut buffered = String::new();

    for line in content.lines() {
        if let Some(continued) = line.strip_suffix('\\') {
            buffered.push_str(continued);
            continue;
        }
        buffered.push_str(line);
        let stripped = LINE_COMMENT.replace(&buffered, "");
        let stripped = stripped.trim();
        if !stripped.is_empty() {
            lines.push(stripped.to_string());
        }
        buffered.clear();
    }

    // Last line ends in "\"
    let trailing = buffered.trim();
    if !trailing.is_empty() {
        lines.push(trailing.to_string());
    }
    lines
}

/// Split a line into global options, requirement options and the requirement
fn split_options(line: &str) -> Result<(Vec<String>, Vec<String>, String)> {
    let mut global = Vec::new();
    let mut for_requirement = Vec::new();
    let mut requirement = Vec::new();

    let mut require_value = false;
    let mut in_requirement_context = false;

    for part in line.split_whitespace() {
        if require_value {
            let context = if in_requirement_context { &mut for_requirement } else { &mut global };
            context.push(part.to_string());
            require_value = false;
        } else if part.starts_with('-') {
            let (option, value) = match part.split_once('=') {
                Some((option, value)) => (option, Some(value)),
                None => (part, None),
            };

            let takes_value = option_takes_value(option).ok_or_else(|| {
                Error::UnexpectedFormat(format!("Unknown requirements file option '{}'", part))
            })?;
            if value.is_some_and(|v| !v.is_empty()) && !takes_value {
                return Err(Error::UnexpectedFormat(format!(
                    "Unexpected value for requirements file option '{}'",
                    part
                )));
            }

            in_requirement_context = REQUIREMENT_OPTIONS.contains(&option);
            let context = if in_requirement_context { &mut for_requirement } else { &mut global };
            context.push(option.to_string());
            match value.filter(|v| !v.is_empty()) {
                Some(value) => context.push(value.to_string()),
                None => require_value = takes_value,
            }
        } else {
            requirement.push(part);
        }
    }

    if require_value {
        let context = if in_requirement_context { &for_requirement } else { &global };
        let option = context.last().map(String::as_str).unwrap_or_default();
        return Err(Error::UnexpectedFormat(format!(
            "Requirements file option '{}' requires a value",
            option
        )));
    }

    if !for_requirement.is_empty() && requirement.is_empty() {
        return Err(Error::UnexpectedFormat(format!(
            "Requirements file option(s) {:?} can only be applied to a requirement",
            for_requirement
        )));
    }

    Ok((global, for_requirement, requirement.join(" ")))
}

// =============================================================================
// Validation
// =============================================================================

/// Global options that affect fetching
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
    pub require_hashes: bool,
    pub trusted_hosts: BTreeSet<String>,
    pub index_url: Option<String>,
}

/// Interpret the global options of a requirements file
///
/// Options that need more than one index or binary-only installs are
/// rejected; options that only matter at install time are ignored.
pub fn process_options(options: &[String]) -> Result<GlobalOptions> {
    let mut processed = GlobalOptions::default();
    let mut ignored = Vec::new();
    let mut rejected = Vec::new();

    let mut i = 0;
    while i < options.len() {
        let option = options[i].as_str();
        match option {
            "--require-hashes" => processed.require_hashes = true,
            "--trusted-host" => {
                if let Some(host) = options.get(i + 1) {
                    processed.trusted_hosts.insert(host.clone());
                }
                i += 1;
            }
            "-i" | "--index-url" => {
                processed.index_url = options.get(i + 1).cloned();
                i += 1;
            }
            _ if REJECTED_OPTIONS.contains(&option) => rejected.push(option),
            _ if option.starts_with('-') => ignored.push(option),
            _ => {}
        }
        i += 1;
    }

    if !ignored.is_empty() {
        info!("depfetch will ignore the following options: {}", ignored.join(", "));
    }
    if !rejected.is_empty() {
        return Err(Error::unsupported(format!(
            "depfetch does not support the following options: {}",
            rejected.join(", ")
        )));
    }
    Ok(processed)
}

/// Whether every requirement of a file must carry a hash
pub fn hashes_required(options: &GlobalOptions, requirements: &[Requirement]) -> bool {
    if options.require_hashes {
        info!("Global --require-hashes option used, will require hashes");
        true
    } else if requirements.iter().any(|req| !req.hashes.is_empty()) {
        info!("At least one dependency uses the --hash option, will require hashes");
        true
    } else {
        info!("No hash options used, will not require hashes unless HTTP(S) dependencies are present.");
        false
    }
}

fn unpinned(req: &Requirement) -> Error {
    Error::rejected_with(
        format!(
            "Requirement must be pinned to an exact version: {}",
            req.download_line
        ),
        "Please pin all packages as <name>==<version>\n\
         You may wish to use a tool such as pip-compile to pin automatically.",
    )
}

/// Check pinning, VCS refs and URL hashes/extensions
pub fn validate_requirements(requirements: &[Requirement], allow_binary: bool) -> Result<()> {
    for req in requirements {
        match req.kind {
            RequirementKind::Pypi => {
                req.pinned_version()?;
            }
            RequirementKind::Vcs => {
                let url = parse_url(req.url()?)?;
                if !url.scheme().starts_with("git") {
                    return Err(Error::unsupported(format!(
                        "Unsupported VCS for {}: {} (only git is supported)",
                        req.download_line,
                        url.scheme()
                    )));
                }
                if !GIT_REF_IN_PATH.is_match(url.path()) {
                    return Err(Error::rejected_with(
                        format!(
                            "No git ref in {} (expected 40 hexadecimal characters)",
                            req.download_line
                        ),
                        "Please specify the full commit hash for git URLs or switch to https URLs.",
                    ));
                }
            }
            RequirementKind::Url => {
                let n_hashes = req.hashes.len()
                    + usize::from(req.qualifier("cachito_hash").is_some_and(|h| !h.is_empty()));
                if n_hashes != 1 {
                    return Err(Error::rejected_with(
                        format!(
                            "URL requirement must specify exactly one hash, but specifies {}: {}.",
                            n_hashes, req.download_line
                        ),
                        "Please specify the expected hashes for all plain URLs using \
                         --hash options (one --hash for each)",
                    ));
                }

                let allowed = allowed_extensions(allow_binary);
                let url = parse_url(req.url()?)?;
                if !allowed.iter().any(|ext| url.path().ends_with(ext)) {
                    return Err(Error::rejected(format!(
                        "URL for requirement does not contain any recognized file extension: \
                         {} (expected one of {})",
                        req.download_line,
                        allowed.join(", ")
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Check that hashes are present where required and well-formed everywhere
pub fn validate_provided_hashes(requirements: &[Requirement], require_hashes: bool) -> Result<()> {
    for req in requirements {
        let hashes = req.declared_hashes();
        if require_hashes && hashes.is_empty() {
            return Err(Error::rejected_with(
                format!(
                    "Hash is required, dependency does not specify any: {}",
                    req.download_line
                ),
                "Please specify the expected hashes for all dependencies",
            ));
        }
        for hash in &hashes {
            parse_hash_spec(hash)?;
        }
    }
    Ok(())
}

/// `algorithm:digest` as a checksum
pub fn parse_hash_spec(spec: &str) -> Result<ChecksumInfo> {
    ChecksumInfo::parse(spec).map_err(|_| {
        Error::rejected(format!(
            "Not a valid hash specifier: '{}' (expected 'algorithm:digest')",
            spec
        ))
    })
}

pub fn allowed_extensions(allow_binary: bool) -> Vec<&'static str> {
    let mut allowed = SDIST_FILE_EXTENSIONS.to_vec();
    if allow_binary {
        allowed.push(WHEEL_FILE_EXTENSION);
    }
    allowed
}

pub(crate) fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::UnexpectedFormat(format!("Invalid URL '{}': {}", url, e)))
}
