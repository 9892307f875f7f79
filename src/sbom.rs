// src/sbom.rs

//! Bill-of-materials entries
//!
//! A [`Component`] is the emitted record for one resolved unit: name,
//! optional version, package URL and a small set of well-known properties.
//! Records with the same purl are merged rather than duplicated, see
//! [`PropertySet::merge`].

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;

pub const PROPERTY_MISSING_HASH_IN_FILE: &str = "depfetch:missing_hash:in_file";
pub const PROPERTY_PIP_PACKAGE_BINARY: &str = "depfetch:pip:package:binary";
pub const PROPERTY_PIP_BUILD_DEPENDENCY: &str = "depfetch:pip:build-dependency";

/// A single name/value property as serialized
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Property {
    pub name: String,
    pub value: String,
}

/// The properties a component may carry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySet {
    /// Checksum manifests that should have listed the component
    pub missing_hash_in_file: BTreeSet<String>,
    pub pip_package_binary: bool,
    pub pip_build_dependency: bool,
}

impl PropertySet {
    /// Combine the properties of two records for the same purl
    ///
    /// Missing-hash files accumulate. A component is binary if either record
    /// was, and a build dependency only if both were.
    pub fn merge(&self, other: &PropertySet) -> PropertySet {
        PropertySet {
            missing_hash_in_file: self
                .missing_hash_in_file
                .union(&other.missing_hash_in_file)
                .cloned()
                .collect(),
            pip_package_binary: self.pip_package_binary || other.pip_package_binary,
            pip_build_dependency: self.pip_build_dependency && other.pip_build_dependency,
        }
    }

    pub fn to_properties(&self) -> Vec<Property> {
        let mut properties: Vec<Property> = self
            .missing_hash_in_file
            .iter()
            .map(|file| Property {
                name: PROPERTY_MISSING_HASH_IN_FILE.to_string(),
                value: file.clone(),
            })
            .collect();
        if self.pip_package_binary {
            properties.push(Property {
                name: PROPERTY_PIP_PACKAGE_BINARY.to_string(),
                value: "true".to_string(),
            });
        }
        if self.pip_build_dependency {
            properties.push(Property {
                name: PROPERTY_PIP_BUILD_DEPENDENCY.to_string(),
                value: "true".to_string(),
            });
        }
        properties
    }
}

impl Serialize for PropertySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let properties = self.to_properties();
        let mut seq = serializer.serialize_seq(Some(properties.len()))?;
        for property in &properties {
            seq.serialize_element(property)?;
        }
        seq.end()
    }
}

/// One entry of the bill of materials
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub purl: String,
    #[serde(rename = "type")]
    pub component_type: &'static str,
    pub properties: PropertySet,
}

impl Component {
    pub fn new(name: &str, version: Option<&str>, purl: String) -> Self {
        Self {
            name: name.to_string(),
            version: version.map(String::from),
            purl,
            component_type: "library",
            properties: PropertySet::default(),
        }
    }

    pub fn with_properties(mut self, properties: PropertySet) -> Self {
        self.properties = properties;
        self
    }
}

/// Maps a resolved node to its bill-of-materials entry
pub trait ToComponent {
    fn to_component(&self) -> Component;
}
