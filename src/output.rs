// src/output.rs

//! Result of resolving a request
//!
//! Besides the component list, resolution produces the values a later
//! offline build needs: environment variables pointing at the prefetched
//! caches and rewritten project files. Values may reference
//! `${output_dir}`, which the consumer substitutes.

use crate::sbom::Component;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Placeholder for the output directory in generated values
pub const OUTPUT_DIR_PLACEHOLDER: &str = "${output_dir}";

/// An environment variable for the offline build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

impl EnvironmentVariable {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// A file to write before the offline build, with `${output_dir}` placeholders
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectFile {
    pub abspath: PathBuf,
    pub template: String,
}

/// Everything produced for a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestOutput {
    pub components: Vec<Component>,
    pub environment_variables: Vec<EnvironmentVariable>,
    pub project_files: Vec<ProjectFile>,
}

impl RequestOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an output, merging duplicates
    ///
    /// Components with the same purl collapse into the first occurrence with
    /// merged properties; environment variables dedupe by name and project
    /// files by path, the first occurrence winning. Order is preserved.
    pub fn from_parts(
        components: Vec<Component>,
        environment_variables: Vec<EnvironmentVariable>,
        project_files: Vec<ProjectFile>,
    ) -> Self {
        let mut output = Self::default();
        output.extend_components(components);
        for variable in environment_variables {
            if !output
                .environment_variables
                .iter()
                .any(|existing| existing.name == variable.name)
            {
                output.environment_variables.push(variable);
            }
        }
        for file in project_files {
            if !output
                .project_files
                .iter()
                .any(|existing| existing.abspath == file.abspath)
            {
                output.project_files.push(file);
            }
        }
        output
    }

    fn extend_components(&mut self, components: Vec<Component>) {
        let mut index: HashMap<String, usize> = self
            .components
            .iter()
            .enumerate()
            .map(|(i, c)| (c.purl.clone(), i))
            .collect();

        for component in components {
            match index.get(&component.purl) {
                Some(&i) => {
                    let merged = self.components[i].properties.merge(&component.properties);
                    self.components[i].properties = merged;
                }
                None => {
                    index.insert(component.purl.clone(), self.components.len());
                    self.components.push(component);
                }
            }
        }
    }

    /// Combine with the output of another package
    pub fn merge(self, other: RequestOutput) -> RequestOutput {
        let mut components = self.components;
        components.extend(other.components);
        let mut variables = self.environment_variables;
        variables.extend(other.environment_variables);
        let mut files = self.project_files;
        files.extend(other.project_files);
        Self::from_parts(components, variables, files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbom::PropertySet;

    fn component(name: &str, purl: &str, missing: Option<&str>) -> Component {
        let mut properties = PropertySet::default();
        if let Some(file) = missing {
            properties.missing_hash_in_file.insert(file.to_string());
        }
        Component::new(name, Some("v1.0.0"), purl.to_string()).with_properties(properties)
    }

    #[test]
    fn test_duplicate_components_merge() {
        let output = RequestOutput::from_parts(
            vec![
                component("b", "pkg:golang/b@v1.0.0?type=module", Some("a/go.sum")),
                component("a", "pkg:golang/a@v1.0.0?type=module", None),
                component("b", "pkg:golang/b@v1.0.0?type=module", Some("b/go.sum")),
            ],
            vec![],
            vec![],
        );

        assert_eq!(output.components.len(), 2);
        assert_eq!(output.components[0].name, "b");
        assert_eq!(output.components[0].properties.missing_hash_in_file.len(), 2);
        assert_eq!(output.components[1].name, "a");
    }

    #[test]
    fn test_environment_variables_dedupe_by_name() {
        let output = RequestOutput::from_parts(
            vec![],
            vec![
                EnvironmentVariable::new("GOPATH", "${output_dir}/deps/gomod"),
                EnvironmentVariable::new("GOPATH", "/elsewhere"),
            ],
            vec![],
        );
        assert_eq!(output.environment_variables.len(), 1);
        assert_eq!(output.environment_variables[0].value, "${output_dir}/deps/gomod");
    }

    #[test]
    fn test_merge_outputs() {
        let gomod = RequestOutput::from_parts(
            vec![component("a", "pkg:golang/a@v1.0.0?type=module", None)],
            vec![EnvironmentVariable::new("GOFLAGS", "-mod=mod")],
            vec![],
        );
        let pip = RequestOutput::from_parts(
            vec![component("b", "pkg:pypi/b@1.0", None)],
            vec![EnvironmentVariable::new("PIP_NO_INDEX", "true")],
            vec![ProjectFile {
                abspath: PathBuf::from("/src/requirements.txt"),
                template: "b @ file://${output_dir}/deps/pip/b.tar.gz\n".to_string(),
            }],
        );

        let merged = gomod.merge(pip);
        assert_eq!(merged.components.len(), 2);
        assert_eq!(merged.environment_variables.len(), 2);
        assert_eq!(merged.project_files.len(), 1);
    }
}
