// src/resolver/mod.rs

//! Dependency graph resolution
//!
//! Parsers emit [`ParsedModule`] and [`ParsedPackage`] records; the
//! [`GraphBuilder`] normalizes them into the deduplicated, replace-aware
//! graph of [`Module`] and [`Package`] values that components are emitted for.

mod graph;
mod model;

pub use graph::{ChecksumManifest, GraphBuilder, WorkspaceContext};
pub use model::{
    Module, Package, ParsedModule, ParsedPackage, Replacement, ResolvedPackage, StandardPackage,
};
