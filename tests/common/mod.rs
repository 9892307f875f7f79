// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use depfetch::fetch::Transport;
use depfetch::packages::pip::{IndexClient, IndexFile};
use depfetch::process::{CommandOutput, CommandRunner, RunParams, Sleep};
use depfetch::{Error, Result};
use indicatif::ProgressBar;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// One scripted answer, optionally bound to a working directory
struct Rule {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    outputs: Vec<CommandOutput>,
}

impl Rule {
    /// Match strength, `None` when the rule does not apply
    fn score(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Option<usize> {
        if self.program != program || !args.starts_with(&self.args) {
            return None;
        }
        match &self.cwd {
            Some(dir) if Some(dir.as_path()) != cwd => None,
            Some(_) => Some(self.args.len() * 2 + 1),
            None => Some(self.args.len() * 2),
        }
    }
}

/// Answers commands from a table of `(program, args prefix)` rules.
///
/// The program is matched on its file name so `/usr/local/go/bin/go` and
/// `go` are the same. The longest matching prefix wins, and a rule bound to
/// the command's working directory beats an unbound one. A rule can be
/// registered several times to script consecutive answers, the last one
/// repeating. Unmatched commands fail with rc=127.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    pub calls: Mutex<Vec<(String, Vec<String>, RunParams)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(self, cwd: Option<&Path>, program: &str, args: &[&str], output: CommandOutput) -> Self {
        {
            let mut rules = self.rules.lock().unwrap();
            let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            let cwd = cwd.map(Path::to_path_buf);
            match rules
                .iter_mut()
                .find(|r| r.program == program && r.args == args && r.cwd == cwd)
            {
                Some(rule) => rule.outputs.push(output),
                None => rules.push(Rule {
                    program: program.to_string(),
                    args,
                    cwd,
                    outputs: vec![output],
                }),
            }
        }
        self
    }

    pub fn on(self, program: &str, args: &[&str], output: CommandOutput) -> Self {
        self.add(None, program, args, output)
    }

    pub fn ok(self, program: &str, args: &[&str], stdout: &str) -> Self {
        self.add(None, program, args, CommandOutput::success(stdout))
    }

    /// Like [`ScriptedRunner::ok`], only for commands run in `cwd`
    pub fn ok_in(self, cwd: &Path, program: &str, args: &[&str], stdout: &str) -> Self {
        self.add(Some(cwd), program, args, CommandOutput::success(stdout))
    }

    /// Every recorded invocation as `program arg arg ...`
    pub fn command_lines(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(program, args, _)| {
                std::iter::once(program_name(program))
                    .chain(args.iter().cloned())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }

    pub fn count(&self, line: &str) -> usize {
        self.command_lines().iter().filter(|l| *l == line).count()
    }
}

fn program_name(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[String], params: &RunParams) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec(), params.clone()));

        let name = program_name(program);
        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .filter_map(|r| r.score(&name, args, params.cwd.as_deref()).map(|s| (s, r)))
            .max_by_key(|(score, _)| *score)
            .map(|(_, rule)| rule);

        Ok(match rule {
            Some(rule) if rule.outputs.len() > 1 => rule.outputs.remove(0),
            Some(rule) => rule.outputs[0].clone(),
            None => CommandOutput::failure(127, format!("unscripted: {} {}", name, args.join(" "))),
        })
    }
}

/// Returns immediately
pub struct NoSleep;

impl Sleep for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

/// Serves fixed bodies by URL
#[derive(Default)]
pub struct StaticTransport {
    bodies: HashMap<String, Vec<u8>>,
    pub requests: Mutex<Vec<String>>,
}

impl StaticTransport {
    pub fn serve(mut self, url: &str, body: &[u8]) -> Self {
        self.bodies.insert(url.to_string(), body.to_vec());
        self
    }
}

impl Transport for StaticTransport {
    fn download(
        &self,
        url: &str,
        dest: &Path,
        _insecure: bool,
        _progress: Option<&ProgressBar>,
    ) -> Result<u64> {
        self.requests.lock().unwrap().push(url.to_string());
        let body = self
            .bodies
            .get(url)
            .ok_or_else(|| Error::DownloadError(format!("HTTP 404 Not Found from {}", url)))?;
        std::fs::create_dir_all(dest.parent().unwrap())?;
        std::fs::write(dest, body)?;
        Ok(body.len() as u64)
    }
}

/// A package index with fixed project pages
#[derive(Default)]
pub struct StaticIndex {
    pub projects: HashMap<String, Vec<IndexFile>>,
}

impl IndexClient for StaticIndex {
    fn project_files(&self, _index_url: &str, project: &str) -> Result<Vec<IndexFile>> {
        self.projects
            .get(project)
            .cloned()
            .ok_or_else(|| Error::FetchError(format!("PyPI query failed: no project {}", project)))
    }
}

/// Create files below `root`, making parent directories as needed
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }
}

/// Source and output directories for one test.
///
/// Returns (TempDir, source, output) - keep the TempDir alive to prevent cleanup.
pub fn source_and_output(files: &[(&str, &str)]) -> (TempDir, PathBuf, PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().canonicalize().unwrap();
    let source = root.join("source");
    let output = root.join("output");
    std::fs::create_dir_all(&source).unwrap();
    write_tree(&source, files);
    (temp, source, output)
}

// =============================================================================
// Real git
// =============================================================================

pub fn git_available() -> bool {
    which::which("git").is_ok()
}

/// Run git in `dir` with a fixed identity, panicking on failure
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(["-c", "commit.gpgsign=false", "-c", "tag.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Initialize a repository with everything in `dir` committed
pub fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "--allow-empty", "-m", "initial"]);
}
