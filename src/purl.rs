// src/purl.rs

//! Package URL construction
//!
//! Builds `pkg:<type>/<name>@<version>?<qualifiers>#<subpath>` identifiers.
//! Name and subpath segments are percent-encoded individually so that `/`
//! separators survive; qualifiers are sorted by key, empty ones are dropped,
//! and values keep `:` and `/` readable.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

static PYPI_NAME_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-_.]+").unwrap());

/// A package URL under construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageUrl {
    purl_type: String,
    name: String,
    version: Option<String>,
    qualifiers: BTreeMap<String, String>,
    subpath: Option<String>,
}

impl PackageUrl {
    /// Start a purl; `name` may contain `/`-separated namespace segments
    pub fn new(purl_type: &str, name: &str) -> Self {
        Self {
            purl_type: purl_type.to_lowercase(),
            name: name.trim_matches('/').to_string(),
            version: None,
            qualifiers: BTreeMap::new(),
            subpath: None,
        }
    }

    /// A pypi purl with the canonical form of `name`
    pub fn pypi(name: &str) -> Self {
        Self::new("pypi", &canonicalize_pypi_name(name))
    }

    pub fn with_version(mut self, version: &str) -> Self {
        if !version.is_empty() {
            self.version = Some(version.to_string());
        }
        self
    }

    /// Add a qualifier; empty values are never emitted
    pub fn with_qualifier(mut self, key: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.qualifiers.insert(key.to_lowercase(), value.to_string());
        }
        self
    }

    /// Set the subpath; `.` and empty paths mean "no subpath"
    pub fn with_subpath(mut self, subpath: &str) -> Self {
        let trimmed = subpath.trim_matches('/');
        if !trimmed.is_empty() && trimmed != "." {
            self.subpath = Some(trimmed.to_string());
        }
        self
    }
}

impl fmt::Display for PackageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkg:{}/{}", self.purl_type, encode_segments(&self.name))?;

        if let Some(version) = &self.version {
            write!(f, "@{}", encode(version, ":"))?;
        }

        if !self.qualifiers.is_empty() {
            let rendered: Vec<String> = self
                .qualifiers
                .iter()
                .map(|(key, value)| format!("{}={}", key, encode(value, ":/")))
                .collect();
            write!(f, "?{}", rendered.join("&"))?;
        }

        if let Some(subpath) = &self.subpath {
            write!(f, "#{}", encode_segments(subpath))?;
        }

        Ok(())
    }
}

/// Canonical pypi project name: lowercase with runs of `-_.` collapsed to `-`
pub fn canonicalize_pypi_name(name: &str) -> String {
    PYPI_NAME_SEPARATORS
        .replace_all(&name.to_lowercase(), "-")
        .into_owned()
}

fn encode_segments(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| encode(segment, ":"))
        .collect::<Vec<_>>()
        .join("/")
}

/// Percent-encode `value`, leaving the characters in `keep` readable
fn encode(value: &str, keep: &str) -> String {
    let mut encoded = urlencoding::encode(value).into_owned();
    for c in keep.chars() {
        let escaped = format!("%{:02X}", c as u32);
        encoded = encoded.replace(&escaped, &c.to_string());
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_golang_module_purl() {
        let purl = PackageUrl::new("golang", "github.com/my-org/my-repo")
            .with_version("v1.0.0")
            .with_qualifier("type", "module");
        assert_eq!(
            purl.to_string(),
            "pkg:golang/github.com/my-org/my-repo@v1.0.0?type=module"
        );
    }

    #[test]
    fn test_version_with_plus_is_encoded() {
        let purl = PackageUrl::new("golang", "github.com/org/dep").with_version("v2.0.0+incompatible");
        assert_eq!(purl.to_string(), "pkg:golang/github.com/org/dep@v2.0.0%2Bincompatible");
    }

    #[test]
    fn test_pypi_vcs_purl() {
        let purl = PackageUrl::pypi("Git_Dependency").with_qualifier(
            "vcs_url",
            &format!("git+https://github.com/acme/mypkg.git@{}", "a".repeat(40)),
        );
        assert_eq!(
            purl.to_string(),
            format!(
                "pkg:pypi/git-dependency?vcs_url=git%2Bhttps://github.com/acme/mypkg.git%40{}",
                "a".repeat(40)
            )
        );
    }

    #[test]
    fn test_qualifiers_sorted_and_empty_dropped() {
        let purl = PackageUrl::pypi("foo")
            .with_version("1.0")
            .with_qualifier("download_url", "https://example.org/foo-1.0.tar.gz")
            .with_qualifier("checksum", "sha256:abcdef")
            .with_qualifier("repository_url", "");
        assert_eq!(
            purl.to_string(),
            "pkg:pypi/foo@1.0?checksum=sha256:abcdef&download_url=https://example.org/foo-1.0.tar.gz"
        );
    }

    #[test]
    fn test_subpath() {
        let purl = PackageUrl::pypi("foo")
            .with_version("1.0.0")
            .with_qualifier("vcs_url", "git+ssh://git@github.com/my-org/my-repo@fff")
            .with_subpath("path/to/package");
        assert_eq!(
            purl.to_string(),
            "pkg:pypi/foo@1.0.0?vcs_url=git%2Bssh://git%40github.com/my-org/my-repo%40fff#path/to/package"
        );

        let root = PackageUrl::pypi("foo").with_subpath(".");
        assert_eq!(root.to_string(), "pkg:pypi/foo");
    }

    #[test]
    fn test_canonicalize_pypi_name() {
        assert_eq!(canonicalize_pypi_name("Django"), "django");
        assert_eq!(canonicalize_pypi_name("zope.interface"), "zope-interface");
        assert_eq!(canonicalize_pypi_name("my__weird-._name"), "my-weird-name");
    }
}
