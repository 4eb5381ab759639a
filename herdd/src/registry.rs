//! Project and tool-installation lookup.

use herd_common::{HerdConfig, ProjectDescriptor};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No projects are defined")]
    NoProjects,

    #[error("Project '{0}' is defined more than once")]
    DuplicateProject(String),

    #[error("Project '{project}' uses tool version '{version}', which has no installation path")]
    UndefinedToolVersion { project: String, version: String },
}

/// Named projects and the tool installations that build them.
///
/// Descriptors are fixed after initialization except for `branch`, which the
/// build coordinator changes while holding its running-builds lock.
#[derive(Debug)]
pub struct ProjectRegistry {
    projects: RwLock<Vec<ProjectDescriptor>>,
    tools: BTreeMap<String, PathBuf>,
}

impl ProjectRegistry {
    pub fn initialize(config: &HerdConfig) -> Result<Self, RegistryError> {
        if config.projects.is_empty() {
            return Err(RegistryError::NoProjects);
        }

        for (version, path) in &config.tools {
            info!("Found tool installation {} at {}", version, path.display());
        }

        let mut seen = HashSet::new();
        let mut projects = Vec::with_capacity(config.projects.len());
        for project in &config.projects {
            if !seen.insert(project.name.as_str()) {
                return Err(RegistryError::DuplicateProject(project.name.clone()));
            }
            if !config.tools.contains_key(&project.tool_version) {
                return Err(RegistryError::UndefinedToolVersion {
                    project: project.name.clone(),
                    version: project.tool_version.clone(),
                });
            }
            let descriptor = ProjectDescriptor::from(project);
            info!(
                "Found project {} (source control: {}, {} deployment action(s))",
                descriptor,
                descriptor.source_control,
                descriptor.deployment.len()
            );
            projects.push(descriptor);
        }

        Ok(Self {
            projects: RwLock::new(projects),
            tools: config.tools.clone(),
        })
    }

    /// Snapshot of the named project.
    pub fn find_project(&self, name: &str) -> Option<ProjectDescriptor> {
        self.read().iter().find(|p| p.name == name).cloned()
    }

    pub fn find_tool_path(&self, version: &str) -> Option<PathBuf> {
        self.tools.get(version).cloned()
    }

    pub fn projects(&self) -> Vec<ProjectDescriptor> {
        self.read().clone()
    }

    pub fn project_names(&self) -> Vec<String> {
        self.read().iter().map(|p| p.name.clone()).collect()
    }

    pub fn tool_versions(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Returns false when the project does not exist.
    pub(crate) fn set_branch(&self, name: &str, branch: &str) -> bool {
        let mut projects = self
            .projects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match projects.iter_mut().find(|p| p.name == name) {
            Some(project) => {
                project.branch = Some(branch.to_string());
                true
            }
            None => false,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ProjectDescriptor>> {
        self.projects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_common::ProjectConfig;
    use std::path::Path;

    fn config(text: &str) -> HerdConfig {
        HerdConfig::from_toml(text, Path::new("test.toml")).unwrap()
    }

    const TWO_PROJECTS: &str = r#"
[tools]
"2022.3.10f1" = "/opt/unity/2022.3.10f1/Editor/Unity"
"2021.3.5f1" = "/opt/unity/2021.3.5f1/Editor/Unity"

[[projects]]
name = "Game"
source_path = "/work/game"
tool_version = "2022.3.10f1"
branch = "main"

[[projects]]
name = "Tools"
source_path = "/work/tools"
tool_version = "2021.3.5f1"
"#;

    #[test]
    fn initialize_loads_projects_and_tools() {
        let registry = ProjectRegistry::initialize(&config(TWO_PROJECTS)).unwrap();
        assert_eq!(registry.project_names(), vec!["Game", "Tools"]);
        assert_eq!(registry.tool_versions(), vec!["2021.3.5f1", "2022.3.10f1"]);

        let game = registry.find_project("Game").unwrap();
        assert_eq!(game.branch.as_deref(), Some("main"));
        assert_eq!(
            registry.find_tool_path(&game.tool_version),
            Some(PathBuf::from("/opt/unity/2022.3.10f1/Editor/Unity"))
        );
    }

    #[test]
    fn lookups_miss_cleanly() {
        let registry = ProjectRegistry::initialize(&config(TWO_PROJECTS)).unwrap();
        assert!(registry.find_project("game").is_none());
        assert!(registry.find_tool_path("6000.0.1f1").is_none());
    }

    #[test]
    fn rejects_empty_project_list() {
        let err = ProjectRegistry::initialize(&HerdConfig::default()).unwrap_err();
        assert_eq!(err, RegistryError::NoProjects);
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut cfg = config(TWO_PROJECTS);
        let duplicate: ProjectConfig = cfg.projects[0].clone();
        cfg.projects.push(duplicate);
        let err = ProjectRegistry::initialize(&cfg).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateProject("Game".to_string()));
    }

    #[test]
    fn rejects_undefined_tool_version() {
        let mut cfg = config(TWO_PROJECTS);
        cfg.projects[1].tool_version = "6000.0.1f1".to_string();
        let err = ProjectRegistry::initialize(&cfg).unwrap_err();
        assert!(matches!(err, RegistryError::UndefinedToolVersion { ref project, .. } if project == "Tools"));
    }

    #[test]
    fn set_branch_updates_snapshot() {
        let registry = ProjectRegistry::initialize(&config(TWO_PROJECTS)).unwrap();
        assert!(registry.set_branch("Tools", "release"));
        assert_eq!(
            registry.find_project("Tools").unwrap().branch.as_deref(),
            Some("release")
        );
        assert!(!registry.set_branch("Missing", "main"));
    }
}
