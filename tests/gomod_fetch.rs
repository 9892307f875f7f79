// tests/gomod_fetch.rs

//! End-to-end Go module resolution against a scripted go tool and git

mod common;

use common::{source_and_output, NoSleep, ScriptedRunner};
use depfetch::packages::gomod::GomodParser;
use depfetch::packages::ManifestParser;
use depfetch::process::{CommandOutput, RetryPolicy};
use depfetch::request::{Flag, PackageInput, Request};
use depfetch::sbom::Component;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";
// 2023-11-14 22:13:20 UTC
const COMMIT_TIME: &str = "1700000000";
const LIST_DEPS: &str = "-json=ImportPath,Module,Standard,Deps";

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_tries: 3,
        delay: Duration::ZERO,
    }
}

/// git answers for a checkout at `root` with `v0.1.0` as the only reachable tag
fn with_git(runner: ScriptedRunner, root: &Path) -> ScriptedRunner {
    runner
        .ok("git", &["rev-parse", "--show-toplevel"], &format!("{}\n", root.display()))
        .ok("git", &["remote"], "origin\n")
        .ok("git", &["remote", "get-url", "origin"], "https://github.com/org/app.git\n")
        .ok("git", &["fetch", "--force", "--tags", "origin"], "")
        .ok("git", &["rev-parse", "HEAD"], &format!("{}\n", COMMIT))
        .ok("git", &["show", "-s", "--format=%ct"], &format!("{}\n", COMMIT_TIME))
        .ok("git", &["tag", "--points-at"], "")
        .ok("git", &["tag", "--merged"], "v0.1.0\n")
}

fn with_go_basics(runner: ScriptedRunner) -> ScriptedRunner {
    runner
        .ok("go", &["env", "GOTELEMETRY"], "off\n")
        .ok("go", &["version"], "go version go1.22.1 linux/amd64\n")
        .ok("go", &["clean", "-modcache"], "")
}

fn purls(components: &[Component]) -> Vec<&str> {
    components.iter().map(|c| c.purl.as_str()).collect()
}

#[test]
fn test_single_module_end_to_end() {
    let (_temp, source, output) = source_and_output(&[
        ("go.mod", "module github.com/org/app\n\ngo 1.21\n"),
        (
            "go.sum",
            "github.com/dep/lib v1.2.0 h1:abc=\ngithub.com/dep/lib v1.2.0/go.mod h1:def=\n",
        ),
        ("main.go", "package main\n"),
        ("cmd/tool/main.go", "package main\n"),
    ]);

    let downloaded = r#"{"Path": "github.com/dep/lib", "Version": "v1.2.0"}
{"Path": "golang.org/x/text", "Version": "v0.14.0"}"#;
    let all_deps = r#"{"ImportPath": "fmt", "Standard": true}
{"ImportPath": "github.com/dep/lib/util", "Module": {"Path": "github.com/dep/lib", "Version": "v1.2.0"}}
{"ImportPath": "github.com/org/app", "Module": {"Path": "github.com/org/app", "Main": true}}"#;
    let app_deps = r#"{"ImportPath": "fmt", "Standard": true}
{"ImportPath": "github.com/dep/lib/util", "Module": {"Path": "github.com/dep/lib", "Version": "v1.2.0"}}
{"ImportPath": "github.com/org/app", "Module": {"Path": "github.com/org/app", "Main": true}}
{"ImportPath": "github.com/org/app/cmd/tool", "Module": {"Path": "github.com/org/app", "Main": true}}"#;

    let runner = with_go_basics(with_git(ScriptedRunner::new(), &source))
        .ok("go", &["env", "GOWORK"], "\n")
        .on(
            "go",
            &["mod", "download", "-json"],
            CommandOutput::failure(1, "dial tcp: i/o timeout"),
        )
        .ok("go", &["mod", "download", "-json"], downloaded)
        .ok(
            "go",
            &["list", "-e", "-m", "-json"],
            &format!(
                r#"{{"Path": "github.com/org/app", "Main": true, "Dir": "{}"}}"#,
                source.display()
            ),
        )
        .ok("go", &["list", "-e", "-deps", LIST_DEPS, "all"], all_deps)
        .ok("go", &["list", "-e", "-deps", LIST_DEPS, "./..."], app_deps);
    let runner = Arc::new(runner);

    let request = Request::new(&source, &output, vec![PackageInput::gomod(".")])
        .unwrap()
        .with_flags([Flag::CgoDisable]);
    let parser = GomodParser::new(runner.clone(), Arc::new(NoSleep), policy(), "https://proxy.golang.org,direct")
        .with_go_binary("/usr/local/go/bin/go");

    let result = parser.fetch_source(&request).unwrap();

    let version = "v0.1.1-0.20231114221320-0123456789ab";
    assert_eq!(
        purls(&result.components),
        vec![
            format!("pkg:golang/github.com/org/app@{}?type=module", version).as_str(),
            "pkg:golang/github.com/dep/lib@v1.2.0?type=module",
            "pkg:golang/golang.org/x/text@v0.14.0?type=module",
            "pkg:golang/fmt?type=package",
            "pkg:golang/github.com/dep/lib/util@v1.2.0?type=package",
            format!("pkg:golang/github.com/org/app@{}?type=package", version).as_str(),
            format!("pkg:golang/github.com/org/app/cmd/tool@{}?type=package", version).as_str(),
        ]
    );

    // Only the module missing from go.sum is flagged
    let text = &result.components[2];
    assert!(text.properties.missing_hash_in_file.contains("go.sum"));
    assert!(result.components[1].properties.missing_hash_in_file.is_empty());
    assert_eq!(result.components[3].version, None);

    // The transient download failure was retried
    assert_eq!(runner.count("go mod download -json"), 2);

    let env: Vec<(&str, &str)> = result
        .environment_variables
        .iter()
        .map(|v| (v.name.as_str(), v.value.as_str()))
        .collect();
    assert!(env.contains(&("GOMODCACHE", "${output_dir}/deps/gomod/pkg/mod")));
    assert!(env.contains(&("GOPROXY", "file://${GOMODCACHE}/cache/download")));

    let calls = runner.calls.lock().unwrap();
    let (_, _, params) = calls
        .iter()
        .find(|(program, args, _)| program.ends_with("go") && args[0] == "list")
        .unwrap();
    assert_eq!(params.env.get("CGO_ENABLED").map(String::as_str), Some("0"));
    assert_eq!(params.env.get("GOTOOLCHAIN").map(String::as_str), Some("local"));
}

#[test]
fn test_workspace_members_are_main_modules() {
    let (_temp, source, output) = source_and_output(&[
        ("go.mod", "module github.com/org/app\n"),
        ("go.work", "go 1.21\n\nuse (\n\t.\n\t./tools\n)\n"),
        ("go.sum", ""),
        ("tools/go.mod", "module github.com/org/app/tools\n"),
        ("tools/go.sum", "github.com/dep/lib v1.2.0 h1:abc=\n"),
    ]);
    let tools = source.join("tools");

    let modules = format!(
        r#"{{"Path": "github.com/org/app", "Main": true, "Dir": "{}"}}
{{"Path": "github.com/org/app/tools", "Main": true, "Dir": "{}"}}"#,
        source.display(),
        tools.display()
    );
    let app_deps = r#"{"ImportPath": "github.com/dep/lib/util", "Module": {"Path": "github.com/dep/lib", "Version": "v1.2.0"}}
{"ImportPath": "github.com/org/app", "Module": {"Path": "github.com/org/app", "Main": true}}"#;
    let tools_deps = r#"{"ImportPath": "github.com/org/app/tools/gen", "Module": {"Path": "github.com/org/app/tools", "Main": true}}
{"ImportPath": "github.com/dep/lib", "Module": {"Path": "github.com/dep/lib", "Version": "v1.2.0"}}"#;

    let runner = with_go_basics(with_git(ScriptedRunner::new(), &source))
        .ok("go", &["env", "GOWORK"], &format!("{}\n", source.join("go.work").display()))
        .ok(
            "go",
            &["work", "edit", "-json"],
            r#"{"Go": "1.21", "Use": [{"DiskPath": "."}, {"DiskPath": "./tools"}]}"#,
        )
        .ok(
            "go",
            &["mod", "download", "-json"],
            r#"{"Path": "github.com/dep/lib", "Version": "v1.2.0"}"#,
        )
        .ok("go", &["list", "-e", "-m", "-json"], &modules)
        .ok("go", &["list", "-e", "-deps", LIST_DEPS, "all"], tools_deps)
        .ok_in(&source, "go", &["list", "-e", "-deps", LIST_DEPS, "./..."], app_deps)
        .ok_in(&tools, "go", &["list", "-e", "-deps", LIST_DEPS, "./..."], tools_deps);

    let request = Request::new(&source, &output, vec![PackageInput::gomod(".")]).unwrap();
    let parser = GomodParser::new(Arc::new(runner), Arc::new(NoSleep), policy(), "off")
        .with_go_binary("go");

    let result = parser.fetch_source(&request).unwrap();
    let purls = purls(&result.components);

    // The member gets its own pseudo-version: no `tools/` tags exist
    let tools_version = "v0.0.0-20231114221320-0123456789ab";
    assert!(purls.contains(
        &format!(
            "pkg:golang/github.com/org/app/tools@{}?type=module",
            tools_version
        )
        .as_str()
    ));
    assert!(purls.contains(
        &format!(
            "pkg:golang/github.com/org/app/tools/gen@{}?type=package",
            tools_version
        )
        .as_str()
    ));

    // go.work checksums are the union of every member's go.sum
    let lib = result
        .components
        .iter()
        .find(|c| c.purl == "pkg:golang/github.com/dep/lib@v1.2.0?type=module")
        .unwrap();
    assert!(lib.properties.missing_hash_in_file.is_empty());

    // Both members use dep/lib: one module, one package per member
    let lib_modules = purls
        .iter()
        .filter(|p| p.starts_with("pkg:golang/github.com/dep/lib@") && p.ends_with("type=module"))
        .count();
    assert_eq!(lib_modules, 1);
    assert!(purls.contains(&"pkg:golang/github.com/dep/lib/util@v1.2.0?type=package"));
    assert!(purls.contains(&"pkg:golang/github.com/dep/lib@v1.2.0?type=package"));
}

#[test]
fn test_workspace_missing_hash_reported_against_go_work_sum() {
    let (_temp, source, output) = source_and_output(&[
        ("go.mod", "module github.com/org/app\n"),
        ("go.work", "go 1.21\n\nuse (\n\t.\n\t./tools\n)\n"),
        ("go.sum", ""),
        ("tools/go.mod", "module github.com/org/app/tools\n"),
        ("tools/go.sum", ""),
    ]);
    let tools = source.join("tools");

    let modules = format!(
        r#"{{"Path": "github.com/org/app", "Main": true, "Dir": "{}"}}
{{"Path": "github.com/org/app/tools", "Main": true, "Dir": "{}"}}"#,
        source.display(),
        tools.display()
    );
    let app_deps = r#"{"ImportPath": "github.com/org/app", "Module": {"Path": "github.com/org/app", "Main": true}}"#;
    let tools_deps = r#"{"ImportPath": "github.com/org/app/tools/gen", "Module": {"Path": "github.com/org/app/tools", "Main": true}}
{"ImportPath": "github.com/dep/lib", "Module": {"Path": "github.com/dep/lib", "Version": "v1.2.0"}}"#;

    let runner = with_go_basics(with_git(ScriptedRunner::new(), &source))
        .ok("go", &["env", "GOWORK"], &format!("{}\n", source.join("go.work").display()))
        .ok(
            "go",
            &["work", "edit", "-json"],
            r#"{"Go": "1.21", "Use": [{"DiskPath": "."}, {"DiskPath": "./tools"}]}"#,
        )
        .ok(
            "go",
            &["mod", "download", "-json"],
            r#"{"Path": "github.com/dep/lib", "Version": "v1.2.0"}"#,
        )
        .ok("go", &["list", "-e", "-m", "-json"], &modules)
        .ok("go", &["list", "-e", "-deps", LIST_DEPS, "all"], tools_deps)
        .ok_in(&source, "go", &["list", "-e", "-deps", LIST_DEPS, "./..."], app_deps)
        .ok_in(&tools, "go", &["list", "-e", "-deps", LIST_DEPS, "./..."], tools_deps);

    let request = Request::new(&source, &output, vec![PackageInput::gomod(".")]).unwrap();
    let parser = GomodParser::new(Arc::new(runner), Arc::new(NoSleep), policy(), "off")
        .with_go_binary("go");

    let result = parser.fetch_source(&request).unwrap();
    let lib = result
        .components
        .iter()
        .find(|c| c.purl == "pkg:golang/github.com/dep/lib@v1.2.0?type=module")
        .unwrap();
    assert!(lib.properties.missing_hash_in_file.contains("go.work.sum"));
    assert!(!lib.properties.missing_hash_in_file.contains("go.sum"));
}

#[test]
fn test_missing_go_mod_is_rejected_before_running_tools() {
    let (_temp, source, output) = source_and_output(&[("README.md", "")]);
    let runner = Arc::new(ScriptedRunner::new());

    let request = Request::new(&source, &output, vec![PackageInput::gomod(".")]).unwrap();
    let parser = GomodParser::new(runner.clone(), Arc::new(NoSleep), policy(), "off").with_go_binary("go");

    let err = parser.fetch_source(&request).unwrap_err();
    assert!(err.is_rejection());
    assert!(err.to_string().contains("The go.mod file must be present"));
    assert!(runner.command_lines().is_empty());
}

#[test]
fn test_no_gomod_packages_is_a_no_op() {
    let (_temp, source, output) = source_and_output(&[]);
    let runner = Arc::new(ScriptedRunner::new());

    let request = Request::new(&source, &output, vec![PackageInput::pip(".")]).unwrap();
    let parser = GomodParser::new(runner.clone(), Arc::new(NoSleep), policy(), "off");

    let result = parser.fetch_source(&request).unwrap();
    assert!(result.components.is_empty());
    assert!(runner.command_lines().is_empty());
}
