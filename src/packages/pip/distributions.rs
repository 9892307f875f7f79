// src/packages/pip/distributions.rs

//! Package index distributions
//!
//! Lists a project's files through the JSON simple API (PEP 691), keeps the
//! ones matching a pinned requirement and picks what to download: the best
//! sdist, plus every wheel when binaries are allowed.

use super::requirements::{parse_hash_spec, Requirement, SDIST_FILE_EXTENSIONS, WHEEL_FILE_EXTENSION};
use crate::config;
use crate::error::{Error, Result};
use crate::filesystem::path::sanitize_filename;
use crate::filesystem::RootedPath;
use crate::hash::ChecksumInfo;
use crate::purl::canonicalize_pypi_name;
use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::Display;
use tar::Archive;
use tracing::{debug, info, warn};
use url::Url;
use xz2::read::XzDecoder;

const SIMPLE_JSON_CONTENT_TYPE: &str = "application/vnd.pypi.simple.v1+json";

/// sdist or wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DistributionKind {
    Sdist,
    Wheel,
}

// =============================================================================
// Index
// =============================================================================

/// One file listed on an index project page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFile {
    pub filename: String,
    /// Absolute download URL
    pub url: String,
    /// Algorithm name to hex digest
    pub hashes: BTreeMap<String, String>,
    pub yanked: bool,
}

impl IndexFile {
    pub fn kind(&self) -> Option<DistributionKind> {
        if self.filename.ends_with(WHEEL_FILE_EXTENSION) {
            Some(DistributionKind::Wheel)
        } else if SDIST_FILE_EXTENSIONS
            .iter()
            .any(|ext| self.filename.ends_with(ext))
        {
            Some(DistributionKind::Sdist)
        } else {
            None
        }
    }

    /// Version encoded in the file name
    ///
    /// Wheels are `name-version-tags.whl`. sdists are `name-version.ext`,
    /// where the name part may itself contain dashes.
    pub fn version(&self, project: &str) -> Option<String> {
        match self.kind()? {
            DistributionKind::Wheel => self.filename.split('-').nth(1).map(String::from),
            DistributionKind::Sdist => {
                let ext = SDIST_FILE_EXTENSIONS
                    .iter()
                    .find(|ext| self.filename.ends_with(*ext))?;
                let stem = &self.filename[..self.filename.len() - ext.len()];
                let project = canonicalize_pypi_name(project);

                stem.match_indices('-')
                    .find(|(pos, _)| canonicalize_pypi_name(&stem[..*pos]) == project)
                    .or_else(|| stem.rmatch_indices('-').next())
                    .map(|(pos, _)| stem[pos + 1..].to_string())
                    .filter(|version| !version.is_empty())
            }
        }
    }

    fn checksums(&self) -> BTreeSet<ChecksumInfo> {
        self.hashes
            .iter()
            .map(|(algorithm, digest)| ChecksumInfo::new(algorithm, digest))
            .collect()
    }
}

/// Lists the files of a project on a package index
pub trait IndexClient: Send + Sync {
    fn project_files(&self, index_url: &str, project: &str) -> Result<Vec<IndexFile>>;
}

#[derive(Deserialize)]
struct ProjectPage {
    files: Vec<ProjectPageFile>,
}

#[derive(Deserialize)]
struct ProjectPageFile {
    filename: String,
    url: String,
    #[serde(default)]
    hashes: BTreeMap<String, String>,
    #[serde(default)]
    yanked: Yanked,
}

/// `yanked` is either a flag or the reason the file was yanked
#[derive(Deserialize)]
#[serde(untagged)]
enum Yanked {
    Flag(bool),
    Reason(String),
}

impl Default for Yanked {
    fn default() -> Self {
        Yanked::Flag(false)
    }
}

impl Yanked {
    fn is_yanked(&self) -> bool {
        match self {
            Yanked::Flag(flag) => *flag,
            Yanked::Reason(_) => true,
        }
    }
}

/// Project page URL for `project` on `index_url`
pub fn project_page_url(index_url: &str, project: &str) -> String {
    format!(
        "{}/{}/",
        index_url.trim_end_matches('/'),
        canonicalize_pypi_name(project)
    )
}

/// Parse a PEP 691 project page, resolving file URLs against the page URL
pub fn parse_project_page(page_url: &str, json: &str) -> Result<Vec<IndexFile>> {
    let page: ProjectPage = serde_json::from_str(json).map_err(|e| {
        Error::UnexpectedFormat(format!("Invalid project page {}: {}", page_url, e))
    })?;
    let base = Url::parse(page_url)
        .map_err(|e| Error::UnexpectedFormat(format!("Invalid index URL '{}': {}", page_url, e)))?;

    page.files
        .into_iter()
        .map(|file| {
            let url = base.join(&file.url).map_err(|e| {
                Error::UnexpectedFormat(format!("Invalid file URL '{}': {}", file.url, e))
            })?;
            Ok(IndexFile {
                filename: file.filename,
                url: url.to_string(),
                hashes: file.hashes,
                yanked: file.yanked.is_yanked(),
            })
        })
        .collect()
}

/// [`IndexClient`] for the JSON simple API over HTTP
pub struct SimpleIndexClient {
    client: Client,
    max_tries: u32,
    retry_delay: Duration,
}

impl SimpleIndexClient {
    pub fn new(timeout: Duration, max_tries: u32, retry_delay: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            max_tries: max_tries.max(1),
            retry_delay,
        })
    }

    pub fn from_config() -> Result<Self> {
        let config = config::get_config();
        Self::new(
            config.requests_timeout(),
            config.process.max_tries,
            config.retry_delay(),
        )
    }

    fn attempt(&self, page_url: &str) -> std::result::Result<String, (Error, bool)> {
        let response = self
            .client
            .get(page_url)
            .header(reqwest::header::ACCEPT, SIMPLE_JSON_CONTENT_TYPE)
            .send()
            .map_err(|e| (Error::FetchError(format!("PyPI query failed: {}", e)), true))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err((
                Error::FetchError(format!("PyPI query failed: no such project at {}", page_url)),
                false,
            ));
        }
        if !status.is_success() {
            let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
            return Err((
                Error::FetchError(format!("PyPI query failed: HTTP {} from {}", status, page_url)),
                retryable,
            ));
        }

        response
            .text()
            .map_err(|e| (Error::FetchError(format!("PyPI query failed: {}", e)), true))
    }
}

impl IndexClient for SimpleIndexClient {
    fn project_files(&self, index_url: &str, project: &str) -> Result<Vec<IndexFile>> {
        let page_url = project_page_url(index_url, project);
        debug!("Querying {}", page_url);

        let mut attempt = 1;
        loop {
            match self.attempt(&page_url) {
                Ok(body) => return parse_project_page(&page_url, &body),
                Err((e, retryable)) if retryable && attempt < self.max_tries => {
                    warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt, self.max_tries, page_url, e
                    );
                    std::thread::sleep(self.retry_delay * attempt);
                    attempt += 1;
                }
                Err((e, _)) => return Err(e),
            }
        }
    }
}

// =============================================================================
// Selection
// =============================================================================

/// A candidate file for a pinned requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionArtifact {
    pub name: String,
    pub version: String,
    pub kind: DistributionKind,
    /// Download destination
    pub path: PathBuf,
    pub url: String,
    pub index_url: String,
    pub yanked: bool,
    /// Checksums reported by the index
    pub index_checksums: BTreeSet<ChecksumInfo>,
    /// Checksums from the requirements file
    pub declared_checksums: BTreeSet<ChecksumInfo>,
    checksums_to_match: BTreeSet<ChecksumInfo>,
}

impl DistributionArtifact {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        version: &str,
        kind: DistributionKind,
        path: PathBuf,
        url: &str,
        index_url: &str,
        yanked: bool,
        index_checksums: BTreeSet<ChecksumInfo>,
        declared_checksums: BTreeSet<ChecksumInfo>,
    ) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let checksums_to_match = match (index_checksums.is_empty(), declared_checksums.is_empty()) {
            (false, false) => {
                debug!("{}: using intersection of requirements-file and index checksums", filename);
                index_checksums
                    .intersection(&declared_checksums)
                    .cloned()
                    .collect()
            }
            (false, true) => {
                debug!("{}: using index-reported checksums", filename);
                index_checksums.clone()
            }
            (true, false) => {
                debug!("{}: using requirements-file checksums", filename);
                declared_checksums.clone()
            }
            (true, true) => {
                debug!("{}: no checksums reported by the index or the requirements file", filename);
                BTreeSet::new()
            }
        };

        Self {
            name: name.to_string(),
            version: version.to_string(),
            kind,
            path,
            url: url.to_string(),
            index_url: index_url.to_string(),
            yanked,
            index_checksums,
            declared_checksums,
            checksums_to_match,
        }
    }

    /// What the downloaded file must match (any one entry)
    pub fn checksums_to_match(&self) -> &BTreeSet<ChecksumInfo> {
        &self.checksums_to_match
    }

    /// False only when both sides have checksums and none agree
    pub fn should_download(&self) -> bool {
        !self.checksums_to_match.is_empty()
            || self.index_checksums.is_empty()
            || self.declared_checksums.is_empty()
    }

    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Higher sorts first: declared checksum match, then format, then not yanked
    fn sdist_preference(&self) -> (u8, u8, u8) {
        let checksum_match = u8::from(
            !self.index_checksums.is_empty()
                && !self.declared_checksums.is_empty()
                && !self.checksums_to_match.is_empty(),
        );
        let filename = self.filename();
        let format = if filename.ends_with(".tar.gz") {
            2
        } else if filename.ends_with(".zip") {
            1
        } else {
            0
        };
        (checksum_match, format, u8::from(!self.yanked))
    }
}

/// The most preferred sdist, the first one on ties
fn best_sdist(sdists: Vec<DistributionArtifact>) -> Option<DistributionArtifact> {
    sdists.into_iter().fold(None, |best, candidate| match best {
        Some(best) if best.sdist_preference() >= candidate.sdist_preference() => Some(best),
        _ => Some(candidate),
    })
}

/// Pick the artifacts to download for a pinned requirement
///
/// Files whose version differs, wheels when binaries are not allowed and
/// files whose index checksums disagree with the requirement's are dropped.
/// Of the remaining sdists only the best is kept; wheels are all kept.
pub fn select_distributions(
    requirement: &Requirement,
    files: Vec<IndexFile>,
    pip_deps_dir: &RootedPath,
    allow_binary: bool,
    index_url: &str,
) -> Result<Vec<DistributionArtifact>> {
    let name = requirement.package.as_str();
    let version = requirement.pinned_version()?;
    let normalized = canonicalize_version(version);
    let declared = requirement
        .hashes
        .iter()
        .map(|hash| parse_hash_spec(hash))
        .collect::<Result<BTreeSet<_>>>()?;

    let mut sdists = Vec::new();
    let mut wheels = Vec::new();

    for file in files {
        let Some(kind) = file.kind() else {
            continue;
        };
        if kind == DistributionKind::Wheel && !allow_binary {
            continue;
        }
        match file.version(name) {
            Some(file_version) if canonicalize_version(&file_version) == normalized => {}
            _ => continue,
        }

        let path = pip_deps_dir
            .join_within_root(sanitize_filename(&file.filename)?)?
            .path()
            .to_path_buf();
        let artifact = DistributionArtifact::new(
            name,
            version,
            kind,
            path,
            &file.url,
            index_url,
            file.yanked,
            file.checksums(),
            declared.clone(),
        );

        if !artifact.should_download() {
            info!("Filtering out {} due to checksum mismatch", file.filename);
            continue;
        }
        match kind {
            DistributionKind::Sdist => sdists.push(artifact),
            DistributionKind::Wheel => wheels.push(artifact),
        }
    }

    let mut selected = Vec::new();
    match best_sdist(sdists) {
        Some(best) => {
            if best.yanked {
                warn!(
                    "The version {} of package {} is yanked, use a different version",
                    version, name
                );
            }
            selected.push(best);
        }
        None => {
            warn!("No sdist found for package {}=={}", name, version);
            if wheels.is_empty() {
                let solution = if allow_binary {
                    "Please check that the package exists on PyPI or that the name \
                     and version are correct."
                } else {
                    "It seems that this version does not exist or isn't published as an sdist.\n\
                     Try to specify the dependency directly via a URL instead, for example, \
                     the tarball for a GitHub release.\n\
                     Alternatively, allow the use of wheels."
                };
                return Err(Error::rejected_with(
                    format!("No distributions found for package {}=={}", name, version),
                    solution,
                ));
            }
        }
    }
    selected.extend(wheels);
    Ok(selected)
}

/// Normalize a version for comparison
///
/// Lowercases, drops a leading `v`, strips leading zeros from release
/// segments and trailing `.0` segments, so `1.0.0` equals `1` and `v01.2`.
pub fn canonicalize_version(version: &str) -> String {
    let version = version.trim().to_lowercase();
    let version = version.strip_prefix('v').unwrap_or(&version);

    let release_end = version
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(version.len());
    let (release, suffix) = version.split_at(release_end);
    let suffix_starts_with_dot = release.ends_with('.');

    let mut segments: Vec<String> = release
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_start_matches('0'))
        .map(|s| if s.is_empty() { "0".to_string() } else { s.to_string() })
        .collect();
    while segments.len() > 1 && segments.last().is_some_and(|s| s == "0") {
        segments.pop();
    }

    let mut normalized = segments.join(".");
    if suffix_starts_with_dot {
        normalized.push('.');
    }
    normalized.push_str(suffix);
    normalized
}

// =============================================================================
// sdist metadata
// =============================================================================

/// Reject an sdist that has no `PKG-INFO`
///
/// tar, tar.gz and tar.xz archives are inspected; other formats are
/// skipped with a warning.
pub fn check_metadata_in_sdist(sdist: &Path) -> Result<()> {
    let name = sdist
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let Some(mut archive) = open_sdist(sdist, &name)? else {
        warn!("Skip checking metadata from sdist {}", name);
        return Ok(());
    };

    let unreadable = |e: std::io::Error| {
        Error::rejected(format!(
            "Cannot open {} as a Tar file. Error: {}",
            sdist.display(),
            e
        ))
    };
    for entry in archive.entries().map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path().map_err(unreadable)?;
        if path.file_name().is_some_and(|n| n == "PKG-INFO") {
            return Ok(());
        }
    }

    Err(Error::rejected_with(
        format!(
            "{} does not include metadata (there is no PKG-INFO file). \
             It is not a valid sdist and cannot be downloaded from PyPI.",
            name
        ),
        "Consider editing your requirements file to download the package from git \
         or a direct download URL instead.",
    ))
}

fn open_sdist(path: &Path, name: &str) -> Result<Option<Archive<Box<dyn Read>>>> {
    let open = || {
        File::open(path)
            .map_err(|e| Error::IoError(format!("Failed to open {}: {}", path.display(), e)))
    };

    let reader: Box<dyn Read> = if name.ends_with(".tar.gz") {
        Box::new(GzDecoder::new(open()?))
    } else if name.ends_with(".tar.xz") {
        Box::new(XzDecoder::new(open()?))
    } else if name.ends_with(".tar") {
        Box::new(open()?)
    } else {
        return Ok(None);
    };

    Ok(Some(Archive::new(reader)))
}
