// src/packages/pip/mod.rs

//! pip backend
//!
//! Every requirement of a package's requirements files must already be
//! pinned. Index requirements are downloaded from the package index, plain
//! URL requirements directly, and git requirements are archived from the
//! pinned commit. Everything lands in `<output>/deps/pip`, which an offline
//! `pip install --no-index --find-links` can consume.

mod distributions;
mod metadata;
mod requirements;

pub use distributions::{
    canonicalize_version, check_metadata_in_sdist, parse_project_page, project_page_url,
    select_distributions, DistributionArtifact, DistributionKind, IndexClient, IndexFile,
    SimpleIndexClient,
};
pub use metadata::{get_pip_metadata, pyproject_metadata, PackageMetadata};
pub use requirements::{
    process_options, validate_provided_hashes, validate_requirements, GlobalOptions, Requirement,
    RequirementKind, RequirementsFile, DEFAULT_BUILD_REQUIREMENTS_FILE, DEFAULT_REQUIREMENTS_FILE,
};

use super::ManifestParser;
use crate::config;
use crate::error::{Error, Result};
use crate::fetch::{ArtifactFetcher, FetchJob};
use crate::filesystem::RootedPath;
use crate::output::{EnvironmentVariable, ProjectFile, RequestOutput, OUTPUT_DIR_PLACEHOLDER};
use crate::process::{CommandRunner, RetryPolicy, Sleep, SystemRunner, ThreadSleep};
use crate::purl::PackageUrl;
use crate::request::{PackageInput, PackageManager, Request};
use crate::sbom::{Component, PropertySet, ToComponent};
use crate::scm::{clone_as_tarball, extract_git_info, GitRepo, RepoId};
use requirements::{
    allowed_extensions, hashes_required, parse_hash_spec, parse_url, WHEEL_FILE_EXTENSION,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Resolved dependencies
// =============================================================================

/// Where a resolved dependency came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySource {
    Index { version: String, index_url: String },
    /// `git+<url>@<commit>`
    Vcs { vcs_url: String },
    /// URL without fragment and its `algorithm:digest`
    Url { download_url: String, checksum: String },
}

/// One fetched dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipDependency {
    pub name: String,
    pub source: DependencySource,
    /// Requirements file path relative to the source root
    pub requirement_file: String,
    /// The requirements file gave no checksum for this artifact
    pub missing_req_file_checksum: bool,
    pub binary: bool,
    pub build_dependency: bool,
}

impl PipDependency {
    pub fn kind(&self) -> RequirementKind {
        match self.source {
            DependencySource::Index { .. } => RequirementKind::Pypi,
            DependencySource::Vcs { .. } => RequirementKind::Vcs,
            DependencySource::Url { .. } => RequirementKind::Url,
        }
    }

    pub fn purl(&self) -> PackageUrl {
        let purl = PackageUrl::pypi(&self.name);
        match &self.source {
            DependencySource::Index { version, index_url } => {
                let purl = purl.with_version(version);
                if index_url.trim_end_matches('/')
                    != config::default_pypi_index_url().trim_end_matches('/')
                {
                    purl.with_qualifier("repository_url", index_url)
                } else {
                    purl
                }
            }
            DependencySource::Vcs { vcs_url } => purl.with_qualifier("vcs_url", vcs_url),
            DependencySource::Url {
                download_url,
                checksum,
            } => purl
                .with_qualifier("download_url", download_url)
                .with_qualifier("checksum", checksum),
        }
    }
}

impl ToComponent for PipDependency {
    fn to_component(&self) -> Component {
        let version = match &self.source {
            DependencySource::Index { version, .. } => Some(version.as_str()),
            _ => None,
        };
        let mut properties = PropertySet {
            pip_package_binary: self.binary,
            pip_build_dependency: self.build_dependency,
            ..Default::default()
        };
        if self.missing_req_file_checksum {
            properties
                .missing_hash_in_file
                .insert(self.requirement_file.clone());
        }
        Component::new(&self.name, version, self.purl().to_string()).with_properties(properties)
    }
}

/// Everything resolved for one pip package directory
#[derive(Debug, Clone)]
pub struct ResolvedPipPackage {
    pub metadata: PackageMetadata,
    pub purl: PackageUrl,
    pub dependencies: Vec<PipDependency>,
    /// Requirements files that were processed, runtime then build
    pub requirement_files: Vec<RootedPath>,
}

impl ResolvedPipPackage {
    pub fn components(&self) -> Vec<Component> {
        let main = Component::new(
            &self.metadata.name,
            self.metadata.version.as_deref(),
            self.purl.to_string(),
        );
        std::iter::once(main)
            .chain(self.dependencies.iter().map(ToComponent::to_component))
            .collect()
    }
}

/// Purl of the package being built: its repository and subpath
fn main_package_purl(metadata: &PackageMetadata, package_dir: &RootedPath, repo_id: &RepoId) -> PackageUrl {
    let purl = PackageUrl::pypi(&metadata.name);
    let purl = match &metadata.version {
        Some(version) => purl.with_version(version),
        None => purl,
    };
    purl.with_qualifier("vcs_url", &repo_id.as_vcs_url_qualifier())
        .with_subpath(&package_dir.subpath_from_root().to_string_lossy())
}

// =============================================================================
// Parser
// =============================================================================

/// [`ManifestParser`] for pip requirements files
pub struct PipParser {
    runner: Arc<dyn CommandRunner>,
    sleeper: Arc<dyn Sleep>,
    policy: RetryPolicy,
    index: Arc<dyn IndexClient>,
    fetcher: ArtifactFetcher,
    default_index_url: String,
}

impl PipParser {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        sleeper: Arc<dyn Sleep>,
        policy: RetryPolicy,
        index: Arc<dyn IndexClient>,
        fetcher: ArtifactFetcher,
    ) -> Self {
        Self {
            runner,
            sleeper,
            policy,
            index,
            fetcher,
            default_index_url: config::default_pypi_index_url(),
        }
    }

    /// Parser using the host git, HTTP and the process-wide settings
    pub fn from_config() -> Result<Self> {
        let parser = Self::new(
            Arc::new(SystemRunner::from_config()),
            Arc::new(ThreadSleep),
            RetryPolicy::from_config(),
            Arc::new(SimpleIndexClient::from_config()?),
            ArtifactFetcher::from_config()?.with_progress(true),
        );
        Ok(parser.with_index_url(config::get_config().pip.index_url.clone()))
    }

    /// Index used when a requirements file does not set `--index-url`
    pub fn with_index_url(mut self, index_url: impl Into<String>) -> Self {
        self.default_index_url = index_url.into();
        self
    }

    /// Resolve and fetch one package directory
    pub fn resolve_package(
        &self,
        package_dir: &RootedPath,
        output_dir: &RootedPath,
        repo_id: &RepoId,
        requirements_files: Option<&[PathBuf]>,
        requirements_build_files: Option<&[PathBuf]>,
        allow_binary: bool,
    ) -> Result<ResolvedPipPackage> {
        let metadata = get_pip_metadata(package_dir, repo_id)?;
        let purl = main_package_purl(&metadata, package_dir, repo_id);

        let req_files =
            resolve_requirement_files(package_dir, requirements_files, DEFAULT_REQUIREMENTS_FILE)?;
        let build_files = resolve_requirement_files(
            package_dir,
            requirements_build_files,
            DEFAULT_BUILD_REQUIREMENTS_FILE,
        )?;

        let pip_deps_dir = output_dir.join_within_root("deps/pip")?;
        std::fs::create_dir_all(pip_deps_dir.path()).map_err(|e| {
            Error::IoError(format!(
                "Failed to create {}: {}",
                pip_deps_dir.path().display(),
                e
            ))
        })?;

        let mut dependencies = Vec::new();
        for file in &req_files {
            dependencies.extend(self.download_from_file(file, &pip_deps_dir, allow_binary)?);
        }
        for file in &build_files {
            let mut build = self.download_from_file(file, &pip_deps_dir, allow_binary)?;
            build.iter_mut().for_each(|dep| dep.build_dependency = true);
            dependencies.extend(build);
        }

        Ok(ResolvedPipPackage {
            metadata,
            purl,
            dependencies,
            requirement_files: req_files.into_iter().chain(build_files).collect(),
        })
    }

    fn download_from_file(
        &self,
        req_file: &RootedPath,
        pip_deps_dir: &RootedPath,
        allow_binary: bool,
    ) -> Result<Vec<PipDependency>> {
        if !req_file.path().exists() {
            return Err(Error::rejected_with(
                format!(
                    "The requirements file does not exist: {}",
                    req_file.path().display()
                ),
                "Please check that you have specified correct requirements file paths",
            ));
        }

        let file = RequirementsFile::read(req_file)?;
        let options = process_options(&file.options)?;
        let require_hashes = hashes_required(&options, &file.requirements);
        validate_requirements(&file.requirements, allow_binary)?;
        validate_provided_hashes(&file.requirements, require_hashes)?;

        let requirement_file = req_file.subpath_from_root().to_string_lossy().into_owned();
        let index_url = options
            .index_url
            .clone()
            .unwrap_or_else(|| self.default_index_url.clone());

        let mut dependencies = Vec::new();
        for req in &file.requirements {
            info!("-- Processing requirement line '{}'", req.download_line);
            match req.kind {
                RequirementKind::Pypi => dependencies.extend(self.process_pypi(
                    req,
                    &requirement_file,
                    &index_url,
                    pip_deps_dir,
                    allow_binary,
                )?),
                RequirementKind::Vcs => {
                    dependencies.push(self.process_vcs(req, &requirement_file, pip_deps_dir)?)
                }
                RequirementKind::Url => dependencies.push(self.process_url(
                    req,
                    &requirement_file,
                    pip_deps_dir,
                    &options.trusted_hosts,
                )?),
            }
            info!("-- Finished processing requirement line '{}'", req.download_line);
        }
        Ok(dependencies)
    }

    fn process_pypi(
        &self,
        req: &Requirement,
        requirement_file: &str,
        index_url: &str,
        pip_deps_dir: &RootedPath,
        allow_binary: bool,
    ) -> Result<Vec<PipDependency>> {
        let files = self.index.project_files(index_url, &req.package)?;
        let artifacts = select_distributions(req, files, pip_deps_dir, allow_binary, index_url)?;

        let jobs: Vec<FetchJob> = artifacts
            .iter()
            .map(|artifact| {
                FetchJob::new(artifact.url.clone(), artifact.path.clone())
                    .with_checksums(artifact.checksums_to_match().clone())
            })
            .collect();
        self.fetcher.fetch_jobs(&jobs)?;

        artifacts
            .into_iter()
            .map(|artifact| {
                if artifact.kind == DistributionKind::Sdist {
                    check_metadata_in_sdist(&artifact.path)?;
                }
                debug!("Successfully processed '{}'", artifact.filename());
                Ok(PipDependency {
                    name: req.package.clone(),
                    source: DependencySource::Index {
                        version: artifact.version.clone(),
                        index_url: artifact.index_url.clone(),
                    },
                    requirement_file: requirement_file.to_string(),
                    missing_req_file_checksum: artifact.declared_checksums.is_empty(),
                    binary: artifact.kind == DistributionKind::Wheel,
                    build_dependency: false,
                })
            })
            .collect()
    }

    fn process_vcs(
        &self,
        req: &Requirement,
        requirement_file: &str,
        pip_deps_dir: &RootedPath,
    ) -> Result<PipDependency> {
        let git_info = extract_git_info(req.url()?)?;
        let dest = pip_deps_dir.join_within_root(external_requirement_path(req)?)?;

        clone_as_tarball(
            self.runner.clone(),
            self.sleeper.as_ref(),
            self.policy,
            &git_info.url,
            &git_info.git_ref,
            dest.path(),
        )?;

        Ok(PipDependency {
            name: req.package.clone(),
            source: DependencySource::Vcs {
                vcs_url: format!("git+{}@{}", git_info.url, git_info.git_ref),
            },
            requirement_file: requirement_file.to_string(),
            // git dependencies cannot be hashed
            missing_req_file_checksum: true,
            binary: false,
            build_dependency: false,
        })
    }

    fn process_url(
        &self,
        req: &Requirement,
        requirement_file: &str,
        pip_deps_dir: &RootedPath,
        trusted_hosts: &BTreeSet<String>,
    ) -> Result<PipDependency> {
        let parsed = parse_url(req.url()?)?;
        let dest = pip_deps_dir.join_within_root(external_requirement_path(req)?)?;
        if let Some(parent) = dest.path().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let insecure = is_trusted_host(&parsed, trusted_hosts);
        let hash_spec = req
            .declared_hashes()
            .into_iter()
            .next()
            .ok_or_else(|| Error::rejected(format!("No hash for {}", req.download_line)))?;
        let checksums = BTreeSet::from([parse_hash_spec(&hash_spec)?]);

        let mut download_url = parsed.clone();
        download_url.set_fragment(None);
        self.fetcher.fetch_jobs(&[FetchJob::new(download_url.as_str(), dest.path())
            .with_checksums(checksums)
            .insecure(insecure)])?;

        Ok(PipDependency {
            name: req.package.clone(),
            source: DependencySource::Url {
                download_url: download_url.to_string(),
                checksum: hash_spec,
            },
            requirement_file: requirement_file.to_string(),
            missing_req_file_checksum: false,
            binary: parsed.path().ends_with(WHEEL_FILE_EXTENSION),
            build_dependency: false,
        })
    }
}

impl ManifestParser for PipParser {
    fn package_manager(&self) -> PackageManager {
        PackageManager::Pip
    }

    fn fetch_source(&self, request: &Request) -> Result<RequestOutput> {
        let packages: Vec<&PackageInput> = request.packages_for(PackageManager::Pip).collect();
        if packages.is_empty() {
            return Ok(RequestOutput::empty());
        }

        let repo = GitRepo::open(request.source_dir.path(), self.runner.clone())?;
        let repo_id = repo.repo_id()?;

        let mut components = Vec::new();
        let mut project_files = Vec::new();
        for package in packages {
            let PackageInput::Pip {
                path,
                requirements_files,
                requirements_build_files,
                allow_binary,
            } = package
            else {
                continue;
            };

            let package_dir = request.source_dir.join_within_root(path)?;
            info!(
                "Fetching the pip dependencies at subpath {}",
                package_dir.subpath_from_root().display()
            );
            let resolved = self.resolve_package(
                &package_dir,
                &request.output_dir,
                &repo_id,
                requirements_files.as_deref(),
                requirements_build_files.as_deref(),
                *allow_binary,
            )?;

            components.extend(resolved.components());
            for file in &resolved.requirement_files {
                project_files.extend(replace_external_requirements(file)?);
            }
        }

        Ok(RequestOutput::from_parts(
            components,
            environment_variables(),
            project_files,
        ))
    }
}

/// Variables pointing an offline pip at the downloaded artifacts
pub fn environment_variables() -> Vec<EnvironmentVariable> {
    vec![
        EnvironmentVariable::new("PIP_FIND_LINKS", &format!("{}/deps/pip", OUTPUT_DIR_PLACEHOLDER)),
        EnvironmentVariable::new("PIP_NO_INDEX", "true"),
    ]
}

/// Explicit files relative to the package, or the default file when present
fn resolve_requirement_files(
    package_dir: &RootedPath,
    explicit: Option<&[PathBuf]>,
    default: &str,
) -> Result<Vec<RootedPath>> {
    match explicit {
        Some(files) => files
            .iter()
            .map(|file| package_dir.join_within_root(file))
            .collect(),
        None => {
            let file = package_dir.join_within_root(default)?;
            Ok(if file.path().is_file() { vec![file] } else { Vec::new() })
        }
    }
}

/// `--trusted-host` entries match `host` or `host:port`
fn is_trusted_host(url: &url::Url, trusted_hosts: &BTreeSet<String>) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    if let Some(port) = url.port() {
        if trusted_hosts.contains(&format!("{}:{}", host, port)) {
            debug!("Disabling SSL verification, {}:{} is a --trusted-host", host, port);
            return true;
        }
    }
    if trusted_hosts.contains(host) {
        debug!("Disabling SSL verification, {} is a --trusted-host", host);
        return true;
    }
    false
}

/// Where a url or vcs requirement is stored under `deps/pip`
///
/// - url: `external-<name>/<name>-external-<alg>-<digest><ext>`; wheels
///   keep their file name
/// - vcs: `<host>/<namespace>/<repo>/<repo>-external-gitcommit-<ref>.tar.gz`
pub fn external_requirement_path(req: &Requirement) -> Result<PathBuf> {
    match req.kind {
        RequirementKind::Url => {
            let hash_spec = req
                .declared_hashes()
                .into_iter()
                .next()
                .ok_or_else(|| Error::rejected(format!("No hash for {}", req.download_line)))?;
            let checksum = parse_hash_spec(&hash_spec)?;
            let url = parse_url(req.url()?)?;
            let ext = allowed_extensions(true)
                .into_iter()
                .find(|ext| url.path().ends_with(ext))
                .unwrap_or_default();

            if ext == WHEEL_FILE_EXTENSION {
                let filename = url.path().rsplit('/').next().unwrap_or_default();
                let filename = urlencoding::decode(filename)
                    .map(|f| f.into_owned())
                    .unwrap_or_else(|_| filename.to_string());
                return Ok(PathBuf::from(crate::filesystem::path::sanitize_filename(
                    &filename,
                )?));
            }

            let package = &req.package;
            Ok(Path::new(&format!("external-{}", package)).join(format!(
                "{}-external-{}-{}{}",
                package,
                checksum.algorithm(),
                checksum.hexdigest(),
                ext
            )))
        }
        RequirementKind::Vcs => {
            let info = extract_git_info(req.url()?)?;
            let mut path = PathBuf::from(&info.host);
            path.extend(info.namespace.split('/').filter(|s| !s.is_empty()));
            path.push(&info.repo);
            path.push(format!(
                "{}-external-gitcommit-{}.tar.gz",
                info.repo, info.git_ref
            ));
            Ok(path)
        }
        RequirementKind::Pypi => Err(Error::UnexpectedFormat(format!(
            "Index requirement '{}' has no external file",
            req.download_line
        ))),
    }
}

/// A copy of the requirements file pointing url/vcs requirements at `deps/pip`
///
/// `None` when the file has nothing to replace.
pub fn replace_external_requirements(req_file: &RootedPath) -> Result<Option<ProjectFile>> {
    let file = RequirementsFile::read(req_file)?;
    if file
        .requirements
        .iter()
        .all(|req| req.kind == RequirementKind::Pypi)
    {
        return Ok(None);
    }

    let requirements = file
        .requirements
        .iter()
        .map(|req| match req.kind {
            RequirementKind::Pypi => Ok(req.clone()),
            RequirementKind::Url | RequirementKind::Vcs => {
                let path = external_requirement_path(req)?;
                Ok(req.with_url(&format!(
                    "file://{}/deps/pip/{}",
                    OUTPUT_DIR_PLACEHOLDER,
                    path.to_string_lossy()
                )))
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let replaced = RequirementsFile::from_parts(req_file, requirements, file.options.clone());
    Ok(Some(ProjectFile {
        abspath: req_file.path().to_path_buf(),
        template: replaced.generate_file_content(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::FakeTransport;
    use crate::hash::sha256;
    use crate::process::testing::{FakeRunner, RecordingSleep};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::collections::{BTreeMap, HashMap};

    /// Serves fixed project pages
    #[derive(Default)]
    struct FakeIndex {
        projects: HashMap<String, Vec<IndexFile>>,
    }

    impl IndexClient for FakeIndex {
        fn project_files(&self, _index_url: &str, project: &str) -> Result<Vec<IndexFile>> {
            self.projects
                .get(project)
                .cloned()
                .ok_or_else(|| Error::FetchError(format!("PyPI query failed: no project {}", project)))
        }
    }

    fn sdist_bytes(name: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(0);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, format!("{}/PKG-INFO", name), &b""[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn index_file(filename: &str, body: &[u8]) -> IndexFile {
        IndexFile {
            filename: filename.to_string(),
            url: format!("https://files.example.com/{}", filename),
            hashes: BTreeMap::from([("sha256".to_string(), sha256(body))]),
            yanked: false,
        }
    }

    struct Fixture {
        _source: tempfile::TempDir,
        _output: tempfile::TempDir,
        source: RootedPath,
        output: RootedPath,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let source = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        for (path, content) in files {
            let full = source.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        Fixture {
            source: RootedPath::new(source.path()).unwrap(),
            output: RootedPath::new(output.path()).unwrap(),
            _source: source,
            _output: output,
        }
    }

    fn parser(index: FakeIndex, transport: FakeTransport) -> PipParser {
        PipParser::new(
            Arc::new(FakeRunner::new(Vec::new())),
            Arc::new(RecordingSleep::default()),
            RetryPolicy {
                max_tries: 1,
                delay: std::time::Duration::ZERO,
            },
            Arc::new(index),
            ArtifactFetcher::new(Arc::new(transport), 2),
        )
        .with_index_url("https://pypi.org/simple/")
    }

    fn repo_id() -> RepoId {
        RepoId::new("https://github.com/org/app.git", "a".repeat(40))
    }

    #[test]
    fn test_resolve_index_and_url_requirements() {
        let sdist = sdist_bytes("foo-1.0");
        let archive = b"url archive".to_vec();
        let fx = fixture(&[
            ("pyproject.toml", "[project]\nname = \"app\"\nversion = \"0.1\"\n"),
            (
                "requirements.txt",
                &format!(
                    "foo==1.0\nbar @ https://example.com/bar-2.0.tar.gz#cachito_hash=sha256:{}\n",
                    sha256(&archive)
                ),
            ),
            ("requirements-build.txt", "foo==1.0\n"),
        ]);

        let index = FakeIndex {
            projects: HashMap::from([("foo".to_string(), vec![index_file("foo-1.0.tar.gz", &sdist)])]),
        };
        let transport = FakeTransport::new()
            .serve("https://files.example.com/foo-1.0.tar.gz", &sdist)
            .serve("https://example.com/bar-2.0.tar.gz", &archive);

        let resolved = parser(index, transport)
            .resolve_package(&fx.source, &fx.output, &repo_id(), None, None, false)
            .unwrap();

        assert_eq!(resolved.metadata.name, "app");
        assert_eq!(
            resolved.purl.to_string(),
            format!("pkg:pypi/app@0.1?vcs_url=git%2Bhttps://github.com/org/app.git%40{}", "a".repeat(40))
        );
        assert_eq!(resolved.dependencies.len(), 3);

        let foo = &resolved.dependencies[0];
        assert_eq!(foo.purl().to_string(), "pkg:pypi/foo@1.0");
        assert!(foo.missing_req_file_checksum);
        assert!(!foo.build_dependency);

        let bar = &resolved.dependencies[1];
        assert_eq!(bar.kind(), RequirementKind::Url);
        assert!(!bar.missing_req_file_checksum);
        assert!(fx
            .output
            .path()
            .join(format!("deps/pip/external-bar/bar-external-sha256-{}.tar.gz", sha256(&archive)))
            .is_file());

        assert!(resolved.dependencies[2].build_dependency);

        let components = resolved.components();
        assert_eq!(components[0].name, "app");
        let properties = &components[1].properties;
        assert!(properties.missing_hash_in_file.contains("requirements.txt"));
    }

    #[test]
    fn test_checksum_mismatch_is_fatal_and_purged() {
        let sdist = sdist_bytes("foo-1.0");
        let fx = fixture(&[
            ("pyproject.toml", "[project]\nname = \"app\"\n"),
            ("requirements.txt", "foo==1.0\n"),
        ]);
        let index = FakeIndex {
            projects: HashMap::from([("foo".to_string(), vec![index_file("foo-1.0.tar.gz", &sdist)])]),
        };
        let transport =
            FakeTransport::new().serve("https://files.example.com/foo-1.0.tar.gz", b"tampered");

        let err = parser(index, transport)
            .resolve_package(&fx.source, &fx.output, &repo_id(), None, None, false)
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(!fx.output.path().join("deps/pip/foo-1.0.tar.gz").exists());
    }

    #[test]
    fn test_missing_requirements_file_is_rejected() {
        let fx = fixture(&[("pyproject.toml", "[project]\nname = \"app\"\n")]);
        let err = parser(FakeIndex::default(), FakeTransport::new())
            .resolve_package(
                &fx.source,
                &fx.output,
                &repo_id(),
                Some(&[PathBuf::from("missing.txt")]),
                None,
                false,
            )
            .unwrap_err();
        assert!(err.to_string().contains("The requirements file does not exist"));
    }

    #[test]
    fn test_no_default_requirements_files() {
        let fx = fixture(&[("pyproject.toml", "[project]\nname = \"app\"\n")]);
        let resolved = parser(FakeIndex::default(), FakeTransport::new())
            .resolve_package(&fx.source, &fx.output, &repo_id(), None, None, false)
            .unwrap();
        assert!(resolved.dependencies.is_empty());
        assert!(resolved.requirement_files.is_empty());
    }

    #[test]
    fn test_dependency_purls() {
        let base = PipDependency {
            name: "foo".into(),
            source: DependencySource::Index {
                version: "1.0".into(),
                index_url: "https://mirror.example.com/simple".into(),
            },
            requirement_file: "requirements.txt".into(),
            missing_req_file_checksum: false,
            binary: false,
            build_dependency: false,
        };
        assert_eq!(
            base.purl().to_string(),
            "pkg:pypi/foo@1.0?repository_url=https://mirror.example.com/simple"
        );

        let vcs = PipDependency {
            source: DependencySource::Vcs {
                vcs_url: "git+https://github.com/org/foo@abc".into(),
            },
            ..base.clone()
        };
        assert_eq!(
            vcs.purl().to_string(),
            "pkg:pypi/foo?vcs_url=git%2Bhttps://github.com/org/foo%40abc"
        );
        assert_eq!(vcs.to_component().version, None);

        let url = PipDependency {
            source: DependencySource::Url {
                download_url: "https://example.com/foo.tar.gz".into(),
                checksum: "sha256:abc".into(),
            },
            ..base
        };
        assert_eq!(
            url.purl().to_string(),
            "pkg:pypi/foo?checksum=sha256:abc&download_url=https://example.com/foo.tar.gz"
        );
    }

    #[test]
    fn test_external_requirement_paths() {
        let url = Requirement::from_line(
            "Foo_Bar @ https://example.com/foo.tar.gz",
            &["--hash".to_string(), "sha256:abc".to_string()],
        )
        .unwrap();
        assert_eq!(
            external_requirement_path(&url).unwrap(),
            PathBuf::from("external-foo-bar/foo-bar-external-sha256-abc.tar.gz")
        );

        let wheel = Requirement::from_line(
            "foo @ https://example.com/dl/foo-1.0-py3-none-any.whl#cachito_hash=sha256:abc",
            &[],
        )
        .unwrap();
        assert_eq!(
            external_requirement_path(&wheel).unwrap(),
            PathBuf::from("foo-1.0-py3-none-any.whl")
        );

        let vcs = Requirement::from_line(
            "pyarn @ git+https://github.com/containerbuildsystem/pyarn@0123456789abcdef0123456789abcdef01234567",
            &[],
        )
        .unwrap();
        assert_eq!(
            external_requirement_path(&vcs).unwrap(),
            PathBuf::from(
                "github.com/containerbuildsystem/pyarn/pyarn-external-gitcommit-0123456789abcdef0123456789abcdef01234567.tar.gz"
            )
        );
    }

    #[test]
    fn test_replace_external_requirements() {
        let fx = fixture(&[
            ("plain.txt", "foo==1.0\n"),
            (
                "mixed.txt",
                "--require-hashes\nfoo==1.0 --hash=sha256:aaa\nbar @ https://example.com/bar.tar.gz --hash=sha256:bbb\n",
            ),
        ]);
        let plain = fx.source.join_within_root("plain.txt").unwrap();
        assert!(replace_external_requirements(&plain).unwrap().is_none());

        let mixed = fx.source.join_within_root("mixed.txt").unwrap();
        let replaced = replace_external_requirements(&mixed).unwrap().unwrap();
        assert_eq!(replaced.abspath, mixed.path());
        assert_eq!(
            replaced.template,
            "--require-hashes\n\
             foo==1.0 --hash=sha256:aaa\n\
             bar @ file://${output_dir}/deps/pip/external-bar/bar-external-sha256-bbb.tar.gz --hash=sha256:bbb\n"
        );
    }

    #[test]
    fn test_trusted_hosts() {
        let hosts = BTreeSet::from(["example.com".to_string(), "other.com:8443".to_string()]);
        let url = |u: &str| url::Url::parse(u).unwrap();
        assert!(is_trusted_host(&url("https://example.com/x"), &hosts));
        assert!(is_trusted_host(&url("https://other.com:8443/x"), &hosts));
        assert!(!is_trusted_host(&url("https://other.com/x"), &hosts));
    }
}
