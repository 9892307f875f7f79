// src/packages/mod.rs

//! Package manager backends
//!
//! Each ecosystem implements [`ManifestParser`]. A request is dispatched to
//! the parsers of the ecosystems it names and their outputs are merged.

pub mod gomod;
pub mod pip;
pub mod traits;

pub use traits::ManifestParser;

use crate::error::Result;
use crate::output::RequestOutput;
use crate::request::{PackageManager, Request};
use tracing::info;

/// The backend for a package manager, wired to the host tools
pub fn parser_for(manager: PackageManager) -> Result<Box<dyn ManifestParser>> {
    Ok(match manager {
        PackageManager::Gomod => Box::new(gomod::GomodParser::from_config()),
        PackageManager::Pip => Box::new(pip::PipParser::from_config()?),
    })
}

/// Package managers named by a request, in order of first appearance
pub fn requested_managers(request: &Request) -> Vec<PackageManager> {
    let mut managers = Vec::new();
    for package in &request.packages {
        let manager = package.package_manager();
        if !managers.contains(&manager) {
            managers.push(manager);
        }
    }
    managers
}

/// Resolve every package of a request with the host backends
pub fn resolve_packages(request: &Request) -> Result<RequestOutput> {
    let parsers = requested_managers(request)
        .into_iter()
        .map(parser_for)
        .collect::<Result<Vec<_>>>()?;
    resolve_with(&parsers, request)
}

/// Run the given parsers over a request and merge their outputs
///
/// Parsers whose ecosystem the request does not name are skipped. The first
/// failure aborts the whole request.
pub fn resolve_with(parsers: &[Box<dyn ManifestParser>], request: &Request) -> Result<RequestOutput> {
    let mut output = RequestOutput::empty();
    for manager in requested_managers(request) {
        for parser in parsers.iter().filter(|p| p.package_manager() == manager) {
            info!("Fetching {} dependencies", manager);
            output = output.merge(parser.fetch_source(request)?);
        }
    }
    Ok(output)
}
