//! `{token}` substitution for deployment action parameters.

use crate::types::ProjectDescriptor;
use std::collections::BTreeMap;

/// Values substituted into `{name}` tokens.
///
/// Unknown tokens are left untouched so typos surface in error messages.
#[derive(Debug, Clone, Default)]
pub struct PathTemplate {
    values: BTreeMap<&'static str, String>,
}

impl PathTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens describing a project: `{projectName}`, `{projectPath}`,
    /// `{playerBuildOutput}` and `{addressableBuildOutput}`.
    pub fn for_project(project: &ProjectDescriptor) -> Self {
        Self::new()
            .with("projectName", project.name.clone())
            .with("projectPath", project.source_path.display().to_string())
            .with(
                "playerBuildOutput",
                project.player_build_output.display().to_string(),
            )
            .with(
                "addressableBuildOutput",
                project.addressable_build_output.display().to_string(),
            )
    }

    pub fn with(mut self, token: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(token, value.into());
        self
    }

    pub fn resolve(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    let token = &after[..end];
                    match self.values.get(token) {
                        Some(value) => out.push_str(value),
                        None => {
                            out.push('{');
                            out.push_str(token);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}
