//! Project discovery.
//!
//! A project is an immediate child directory of the projects root that
//! contains the specification document and a test suite.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::ProjectsConfig;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("projects root {} is not readable: {source}", path.display())]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no project named {0:?} under the projects root")]
    UnknownProject(String),
}

/// Discovers eligible projects, sorted by directory name.
pub fn discover(config: &ProjectsConfig) -> Result<Vec<PathBuf>, RegistryError> {
    let root_err = |source| RegistryError::Root {
        path: config.root.clone(),
        source,
    };

    let mut projects = Vec::new();
    for entry in std::fs::read_dir(&config.root).map_err(root_err)? {
        let path = entry.map_err(root_err)?.path();
        if !path.is_dir() {
            continue;
        }
        if is_project(&path, config) {
            projects.push(path);
        } else {
            debug!(dir = %path.display(), "Skipping directory without spec or tests");
        }
    }
    projects.sort();
    Ok(projects)
}

/// Discovers projects and keeps only those named in `names`, in discovery
/// order. An empty `names` keeps everything.
pub fn select(config: &ProjectsConfig, names: &[String]) -> Result<Vec<PathBuf>, RegistryError> {
    let projects = discover(config)?;
    if names.is_empty() {
        return Ok(projects);
    }
    if let Some(missing) = names
        .iter()
        .find(|name| !projects.iter().any(|p| project_name(p) == name.as_str()))
    {
        return Err(RegistryError::UnknownProject(missing.clone()));
    }
    Ok(projects
        .into_iter()
        .filter(|p| names.iter().any(|n| n == project_name(p)))
        .collect())
}

/// Directory name used to identify a project in logs and telemetry.
pub fn project_name(root: &Path) -> &str {
    root.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

/// True if `dir` holds the spec file and a test suite.
pub fn is_project(dir: &Path, config: &ProjectsConfig) -> bool {
    dir.join(&config.spec_file).is_file() && has_tests(dir, config)
}

/// A marker directory (e.g. `tests/`) or any top-level file with "test" in
/// its name.
fn has_tests(dir: &Path, config: &ProjectsConfig) -> bool {
    if config.test_markers.iter().any(|m| dir.join(m).is_dir()) {
        return true;
    }
    std::fs::read_dir(dir).is_ok_and(|entries| {
        entries.filter_map(Result::ok).any(|entry| {
            entry.path().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.to_lowercase().contains("test"))
        })
    })
}
