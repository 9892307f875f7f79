// src/packages/gomod/mod.rs

//! Go modules backend
//!
//! For every gomod package in a request:
//! 1. dependencies are downloaded (`go mod download`) or re-vendored and
//!    checked against the committed vendor directory
//! 2. the main module and go.work members are listed (`go list -m`)
//! 3. modules imported by code are listed (`go list -deps all`)
//! 4. packages are listed once per workspace member (`go list -deps ./...`)
//! 5. the graph builder merges all of it into modules and packages
//!
//! The module cache the go tool filled is copied into the output directory
//! so an offline build can use it as a file:// proxy.

mod go;
mod parse;
mod work;

pub use go::{go_env, GoDirectives, GoTool, GoVersion};
pub use parse::{
    load_json_stream, parse_go_sum, parse_module_stream, parse_package_stream,
    parse_vendor_modules, GoModuleJson, GoPackageJson,
};
pub use work::{GoWork, GoWorkUse, ParsedGoWork};

use super::ManifestParser;
use crate::config;
use crate::error::{Error, Result};
use crate::filesystem::{copy_tree, RootedPath};
use crate::output::{EnvironmentVariable, RequestOutput, OUTPUT_DIR_PLACEHOLDER};
use crate::process::{CommandRunner, RetryPolicy, RunParams, Sleep, SystemRunner, ThreadSleep};
use crate::request::{Flag, Mode, PackageManager, Request};
use crate::resolver::{
    ChecksumManifest, GraphBuilder, Module, ParsedModule, Replacement, ResolvedPackage,
    WorkspaceContext,
};
use crate::sbom::{Component, ToComponent};
use crate::scm::GitRepo;
use crate::vendor::{self, VendorConsistencyChecker};
use crate::version::{GitHistory, ModuleVersionResolver};
use std::path::{Component as PathComponent, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

const GO_LIST_DEPS_JSON: &str = "-json=ImportPath,Module,Standard,Deps";

/// The graph resolved for one module directory
#[derive(Debug, Clone)]
pub struct ResolvedGoModule {
    pub main_module: Module,
    pub modules: Vec<Module>,
    pub packages: Vec<ResolvedPackage>,
}

impl ResolvedGoModule {
    /// Main module first, then the other modules, then packages
    pub fn components(&self) -> Vec<Component> {
        std::iter::once(self.main_module.to_component())
            .chain(self.modules.iter().map(ToComponent::to_component))
            .chain(self.packages.iter().map(ToComponent::to_component))
            .collect()
    }
}

/// Shared state for every module directory of one request
struct GoContext {
    go: GoTool,
    repo: GitRepo,
    repo_name: String,
    version_resolver: ModuleVersionResolver,
    env: RunParams,
    mode: Mode,
}

/// [`ManifestParser`] for Go modules
pub struct GomodParser {
    runner: Arc<dyn CommandRunner>,
    sleeper: Arc<dyn Sleep>,
    policy: RetryPolicy,
    go_binary: Option<PathBuf>,
    proxy_url: String,
}

impl GomodParser {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        sleeper: Arc<dyn Sleep>,
        policy: RetryPolicy,
        proxy_url: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            sleeper,
            policy,
            go_binary: None,
            proxy_url: proxy_url.into(),
        }
    }

    /// Parser running the host tools with the process-wide settings
    pub fn from_config() -> Self {
        Self::new(
            Arc::new(SystemRunner::from_config()),
            Arc::new(ThreadSleep),
            RetryPolicy::from_config(),
            config::get_config().gomod.proxy_url.clone(),
        )
    }

    /// Use this go binary instead of looking one up on `PATH`
    pub fn with_go_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.go_binary = Some(binary.into());
        self
    }

    fn go_tool(&self) -> Result<GoTool> {
        match &self.go_binary {
            Some(binary) => Ok(GoTool::new(
                binary,
                self.runner.clone(),
                self.sleeper.clone(),
                self.policy,
            )),
            None => GoTool::locate(self.runner.clone(), self.sleeper.clone(), self.policy),
        }
    }

    fn resolve_module(&self, ctx: &GoContext, app_dir: &RootedPath) -> Result<ResolvedGoModule> {
        check_suspicious_symlinks(app_dir)?;

        let params = ctx.env.in_dir(app_dir.path());
        let directives = GoDirectives::read(&app_dir.path().join("go.mod"))?;
        ctx.go.check_required(&directives, &params)?;

        let go_work = GoWork::discover(&ctx.go, app_dir, &ctx.env)?;
        let workspace_paths = match &go_work {
            Some(work) => work.workspace_paths()?,
            None => Vec::new(),
        };

        let downloaded = if app_dir.path().join("vendor").is_dir() {
            vendor_deps(ctx, app_dir, go_work.is_some(), &params)?
        } else {
            parse_module_stream(&ctx.go.run_with_retry(&["mod", "download", "-json"], &params)?)?
        };

        let (main_parsed, workspace_modules) =
            parse_local_modules(&ctx.go.run(&["list", "-e", "-m", "-json"], &params)?, app_dir)?;

        let main_module = Module {
            name: main_parsed.path.clone(),
            original_name: main_parsed.path.clone(),
            real_path: main_real_path(&ctx.repo_name, app_dir),
            version: ctx
                .version_resolver
                .get_golang_version(&main_parsed.path, app_dir)?,
            main: true,
            missing_hash_in_file: None,
        };
        debug!("Main module {} at {}", main_module.name, main_module.version);

        let package_modules = parse_package_stream(
            &ctx.go.run(&["list", "-e", "-deps", GO_LIST_DEPS_JSON, "all"], &params)?,
        )?
        .into_iter()
        .filter_map(|package| package.module)
        .filter(|module| !module.main);

        let mut import_graph = workspace_modules;
        import_graph.extend(package_modules);
        let candidates = GraphBuilder::dedup(import_graph, downloaded);

        // Missing hashes in a workspace are reported against go.work.sum
        let checksums = match &go_work {
            Some(work) => ChecksumManifest {
                file: work.dir.join_within_root("go.work.sum")?.subpath_from_root(),
                entries: work.checksummed_modules()?,
            },
            None => {
                let go_sum = app_dir.join_within_root("go.sum")?;
                ChecksumManifest {
                    file: go_sum.subpath_from_root(),
                    entries: parse_go_sum(&go_sum),
                }
            }
        };

        let workspace = WorkspaceContext {
            members: workspace_paths.clone(),
        };
        let builder = GraphBuilder::new(
            &main_module,
            app_dir,
            &ctx.version_resolver,
            go_work.as_ref().map(|_| &workspace),
        );
        let modules = builder.build(&candidates, &checksums)?;

        let package_dirs = if workspace_paths.is_empty() {
            vec![app_dir.clone()]
        } else {
            workspace_paths
        };
        let mut parsed_packages = Vec::new();
        for dir in &package_dirs {
            let stream = ctx.go.run(
                &["list", "-e", "-deps", GO_LIST_DEPS_JSON, "./..."],
                &ctx.env.in_dir(dir.path()),
            )?;
            parsed_packages.extend(parse_package_stream(&stream)?);
        }

        let all_modules: Vec<Module> = std::iter::once(main_module.clone())
            .chain(modules.iter().cloned())
            .collect();
        let packages = GraphBuilder::create_packages(&all_modules, parsed_packages)?;

        info!(
            "Resolved {}: {} modules, {} packages",
            main_module.name,
            modules.len() + 1,
            packages.len()
        );
        Ok(ResolvedGoModule {
            main_module,
            modules,
            packages,
        })
    }
}

impl ManifestParser for GomodParser {
    fn package_manager(&self) -> PackageManager {
        PackageManager::Gomod
    }

    fn fetch_source(&self, request: &Request) -> Result<RequestOutput> {
        let app_dirs = request
            .packages_for(PackageManager::Gomod)
            .map(|package| request.source_dir.join_within_root(package.path()))
            .collect::<Result<Vec<_>>>()?;
        if app_dirs.is_empty() {
            return Ok(RequestOutput::empty());
        }
        check_go_mod_present(&app_dirs)?;

        let go = self.go_tool()?;
        let repo = GitRepo::open(request.source_dir.path(), self.runner.clone())?;
        let history = GitHistory::new(repo.clone(), self.sleeper.clone(), self.policy);
        let version_resolver = ModuleVersionResolver::from_history(&history)?;
        let repo_name = repo.repo_id()?.repository_name()?;

        let scratch = tempfile::tempdir()
            .map_err(|e| Error::IoError(format!("Failed to create temp dir: {e}")))?;
        let env = go_env(
            scratch.path(),
            &self.proxy_url,
            request.has_flag(Flag::CgoDisable),
        );
        go.disable_telemetry(&env.in_dir(request.source_dir.path()))?;

        let ctx = GoContext {
            go,
            repo,
            repo_name,
            version_resolver,
            env,
            mode: request.mode,
        };

        let mut components = Vec::new();
        for app_dir in &app_dirs {
            info!(
                "Fetching the gomod dependencies at subpath {}",
                app_dir.subpath_from_root().display()
            );
            components.extend(self.resolve_module(&ctx, app_dir)?.components());
        }

        let cache_dest = request
            .output_dir
            .join_within_root("deps/gomod/pkg/mod/cache/download")?;
        copy_tree(
            &scratch.path().join("pkg/mod/cache/download"),
            cache_dest.path(),
        )?;

        // The module cache is read-only; let the go tool remove it
        if let Err(e) = ctx.go.run(&["clean", "-modcache"], &ctx.env) {
            debug!("Failed to clean the temporary module cache: {}", e);
        }

        Ok(RequestOutput::from_parts(
            components,
            environment_variables(),
            Vec::new(),
        ))
    }
}

/// Variables pointing an offline build at the copied module cache
pub fn environment_variables() -> Vec<EnvironmentVariable> {
    let gomod = format!("{}/deps/gomod", OUTPUT_DIR_PLACEHOLDER);
    vec![
        EnvironmentVariable::new("GOCACHE", &gomod),
        EnvironmentVariable::new("GOMODCACHE", &format!("{}/pkg/mod", gomod)),
        EnvironmentVariable::new("GOPATH", &gomod),
        EnvironmentVariable::new("GOPROXY", "file://${GOMODCACHE}/cache/download"),
    ]
}

fn vendor_deps(
    ctx: &GoContext,
    app_dir: &RootedPath,
    is_workspace: bool,
    params: &RunParams,
) -> Result<Vec<ParsedModule>> {
    let subcommand = if is_workspace { "work" } else { "mod" };
    ctx.go.run_with_retry(&[subcommand, "vendor"], params)?;

    let change = VendorConsistencyChecker::new(&ctx.repo).check(app_dir)?;
    vendor::enforce(&change, ctx.mode, &format!("go {} vendor", subcommand))?;

    parse_vendor_modules(app_dir)
}

/// Every gomod package directory must contain a go.mod
pub fn check_go_mod_present(app_dirs: &[RootedPath]) -> Result<()> {
    let missing: Vec<String> = app_dirs
        .iter()
        .filter(|dir| !dir.path().join("go.mod").is_file())
        .map(|dir| dir.path().display().to_string())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(Error::rejected_with(
        format!(
            "The go.mod file must be present for the Go module(s) at: {}",
            missing.join("; ")
        ),
        "Please double-check that you have specified correct paths to your Go modules",
    ))
}

/// Fail on symlinks inside the module that lead outside the source root
pub fn check_suspicious_symlinks(app_dir: &RootedPath) -> Result<()> {
    let walker = WalkDir::new(app_dir.path())
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|e| {
            Error::IoError(format!("Failed to walk {}: {}", app_dir.path().display(), e))
        })?;
        if !entry.path_is_symlink() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(app_dir.path())
            .map_err(|e| Error::IoError(format!("Failed to relativize path: {}", e)))?;
        app_dir.join_within_root(rel)?;
    }
    Ok(())
}

/// Split `go list -m -json` output into the main module and workspace members
///
/// The main module is the one whose directory is `app_dir`. Every other
/// module becomes a local replacement of itself, relative to `app_dir`.
pub fn parse_local_modules(
    stream: &str,
    app_dir: &RootedPath,
) -> Result<(ParsedModule, Vec<ParsedModule>)> {
    let mut main = None;
    let mut members = Vec::new();

    for module in load_json_stream::<GoModuleJson>(stream)? {
        let dir = module.dir.clone().ok_or_else(|| {
            Error::UnexpectedFormat(format!("go list -m reported {} without a Dir", module.path))
        })?;
        let dir = app_dir.join_within_root(&dir)?;

        if dir.path() == app_dir.path() {
            let mut parsed = ParsedModule::new(module.path, None);
            parsed.main = true;
            main = Some(parsed);
        } else {
            let rel = relative_module_path(app_dir.path(), dir.path());
            let mut parsed =
                ParsedModule::new(module.path, None).with_replace(Replacement::new(rel, None));
            parsed.main = true;
            members.push(parsed);
        }
    }

    let main = main.ok_or_else(|| {
        Error::UnexpectedFormat(format!(
            "go list -m did not report a module for {}",
            app_dir.path().display()
        ))
    })?;
    Ok((main, members))
}

/// `host/org/repo[/subpath]` for the main module's source location
fn main_real_path(repo_name: &str, app_dir: &RootedPath) -> String {
    let subpath = app_dir.subpath_from_root();
    if subpath == Path::new(".") {
        repo_name.to_string()
    } else {
        format!("{}/{}", repo_name, subpath.to_string_lossy())
    }
}

/// `./sub` or `../sibling` path from `from` to `to`
fn relative_module_path(from: &Path, to: &Path) -> String {
    let from: Vec<PathComponent> = from.components().collect();
    let to: Vec<PathComponent> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<String> = vec!["..".to_string(); from.len() - common];
    parts.extend(
        to[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );

    match parts.first() {
        None => ".".to_string(),
        Some(first) if first == ".." => parts.join("/"),
        Some(_) => format!("./{}", parts.join("/")),
    }
}
