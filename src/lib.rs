// src/lib.rs

//! depfetch: dependency prefetching for hermetic builds
//!
//! Given a source tree and a list of packages in it, depfetch resolves each
//! package's complete dependency set, downloads every artifact into an
//! output directory with checksum verification, and reports what it found.
//!
//! # Architecture
//!
//! - Backends: one [`packages::ManifestParser`] per ecosystem (Go modules, pip)
//! - Ecosystem tools are only asked read-only questions (`go list`, `go mod download`)
//! - Containment: every path taken from user input resolves through [`filesystem::RootedPath`]
//! - Output: components with package URLs, environment variables for the
//!   offline build, and project files to rewrite

pub mod config;
mod error;
pub mod fetch;
pub mod filesystem;
pub mod hash;
pub mod output;
pub mod packages;
pub mod process;
pub mod purl;
pub mod request;
pub mod resolver;
pub mod sbom;
pub mod scm;
pub mod vendor;
pub mod version;
pub mod workspace;

pub use error::{Error, Result};
pub use hash::{ChecksumInfo, HashAlgorithm};
pub use output::RequestOutput;
pub use packages::{resolve_packages, ManifestParser};
pub use purl::PackageUrl;
pub use request::{Flag, Mode, PackageInput, PackageManager, Request};
