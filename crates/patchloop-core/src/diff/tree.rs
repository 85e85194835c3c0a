//! Atomic application of a [`Patch`] to a project tree.
//!
//! Every file's final content is computed in memory before anything is
//! written. Writes go through a temp file in the destination directory and
//! a rename. If a write fails partway, files already committed are restored.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use super::{ApplyError, FileEdit, Patch, apply_hunks};

/// Paths (relative to the project root) whose content changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedResult {
    pub changed_paths: Vec<PathBuf>,
}

/// One file's content before and after the patch.
#[derive(Debug)]
struct StagedFile {
    relative: PathBuf,
    absolute: PathBuf,
    before: Option<String>,
    after: Option<String>,
}

impl StagedFile {
    fn is_change(&self) -> bool {
        self.before != self.after
    }
}

/// Applies `patch` under `project_root`, all or nothing.
pub fn apply(project_root: &Path, patch: &Patch) -> Result<AppliedResult, ApplyError> {
    let staged = stage(project_root, patch)?;
    commit(&staged)
}

/// Computes the final content of every touched path without writing.
fn stage(project_root: &Path, patch: &Patch) -> Result<Vec<StagedFile>, ApplyError> {
    let mut staged: Vec<StagedFile> = Vec::new();
    let mut index: HashMap<PathBuf, usize> = HashMap::new();

    for edit in &patch.edits {
        let relative = checked_relative(edit.path())?;
        let slot = match index.get(&relative) {
            Some(&slot) => slot,
            None => {
                let absolute = project_root.join(&relative);
                let before = read_optional(&absolute).map_err(|source| ApplyError::Io {
                    path: relative.clone(),
                    source,
                })?;
                staged.push(StagedFile {
                    relative: relative.clone(),
                    absolute,
                    after: before.clone(),
                    before,
                });
                index.insert(relative.clone(), staged.len() - 1);
                staged.len() - 1
            }
        };

        let file = &mut staged[slot];
        file.after = match edit {
            FileEdit::Delete { .. } => None,
            FileEdit::Create { lines, .. } => Some(lines.iter().map(|l| format!("{l}\n")).collect()),
            FileEdit::Modify { hunks, .. } => {
                let base = file.after.as_deref().unwrap_or("");
                let patched =
                    apply_hunks(base, hunks).map_err(|reason| ApplyError::ContextMismatch {
                        path: relative.clone(),
                        reason,
                    })?;
                Some(patched)
            }
        };
    }

    Ok(staged)
}

fn commit(staged: &[StagedFile]) -> Result<AppliedResult, ApplyError> {
    let mut committed: Vec<(&StagedFile, Vec<PathBuf>)> = Vec::new();

    for file in staged.iter().filter(|f| f.is_change()) {
        let result = match &file.after {
            Some(content) => write_file(&file.absolute, content),
            None => fs::remove_file(&file.absolute).map(|()| Vec::new()),
        };
        match result {
            Ok(created_dirs) => {
                debug!(path = %file.relative.display(), "Committed patched file");
                committed.push((file, created_dirs));
            }
            Err(source) => {
                rollback(&committed);
                return Err(ApplyError::Io {
                    path: file.relative.clone(),
                    source,
                });
            }
        }
    }

    Ok(AppliedResult {
        changed_paths: committed.iter().map(|(f, _)| f.relative.clone()).collect(),
    })
}

/// Best-effort restore of already committed files, newest first.
fn rollback(committed: &[(&StagedFile, Vec<PathBuf>)]) {
    for (file, created_dirs) in committed.iter().rev() {
        let restored = match &file.before {
            Some(content) => write_file(&file.absolute, content).map(|_| ()),
            None => fs::remove_file(&file.absolute),
        };
        if let Err(e) = restored {
            warn!(path = %file.relative.display(), error = %e, "Failed to roll back patched file");
        }
        for dir in created_dirs.iter().rev() {
            // Fails unless the directory is empty.
            let _ = fs::remove_dir(dir);
        }
    }
}

/// Writes `content` via temp file + rename. Returns directories it created.
fn write_file(path: &Path, content: &str) -> io::Result<Vec<PathBuf>> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let created_dirs = create_parents(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;

    match fs::metadata(path) {
        Ok(meta) => fs::set_permissions(tmp.path(), meta.permissions())?,
        Err(_) => set_default_permissions(tmp.path())?,
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(created_dirs)
}

#[cfg(unix)]
fn set_default_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_default_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// `create_dir_all` that reports which directories were missing.
fn create_parents(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(d) = current {
        if d.as_os_str().is_empty() || d.exists() {
            break;
        }
        missing.push(d.to_path_buf());
        current = d.parent();
    }
    fs::create_dir_all(dir)?;
    missing.reverse();
    Ok(missing)
}

fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Normalises a diff path and rejects anything that could escape the root.
fn checked_relative(path: &Path) -> Result<PathBuf, ApplyError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ApplyError::UnsafePath {
                    path: path.to_path_buf(),
                });
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(ApplyError::UnsafePath {
            path: path.to_path_buf(),
        });
    }
    Ok(clean)
}
