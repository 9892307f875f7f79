// src/packages/traits.rs

//! Common trait for package manager backends

use crate::error::Result;
use crate::output::RequestOutput;
use crate::request::{PackageManager, Request};

/// One package ecosystem's resolution backend
///
/// An implementation handles every package entry of its ecosystem in a
/// request: it runs the ecosystem's read-only listing commands, builds the
/// dependency graph, prefetches artifacts into the output directory and
/// reports components plus the values an offline build needs.
pub trait ManifestParser {
    /// The ecosystem this parser handles
    fn package_manager(&self) -> PackageManager;

    /// Resolve and prefetch all of this ecosystem's packages in `request`
    fn fetch_source(&self, request: &Request) -> Result<RequestOutput>;
}
