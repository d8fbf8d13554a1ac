//! Path validation against the set of allowed roots.
//!
//! Checks run on the resolved (symlink-following) path, not the literal
//! string, so a symlink pointing outside a watched root is rejected even
//! though its literal path looks fine.

use std::path::{Component, Path, PathBuf};

use crate::error::PipelineError;

/// Pure check that a candidate path stays inside the allowed roots.
#[derive(Debug, Clone)]
pub struct PathValidator {
    roots: Vec<PathBuf>,
}

impl PathValidator {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Validate a candidate file path.
    ///
    /// Rejects parent-directory segments and home-directory shorthand in the
    /// literal path, then canonicalizes and requires the resolved path to be
    /// a regular file under at least one allowed root.
    pub fn validate(&self, path: &Path) -> Result<PathBuf, PipelineError> {
        reject_suspect_components(path)?;

        let resolved = path.canonicalize().map_err(|e| {
            PipelineError::PathTraversal(format!(
                "cannot resolve {}: {}",
                path.display(),
                e
            ))
        })?;

        if !resolved.is_file() {
            return Err(PipelineError::PathTraversal(format!(
                "not a regular file: {}",
                resolved.display()
            )));
        }

        for root in &self.roots {
            // Roots may not exist yet at construction time, so resolve lazily.
            if let Ok(root) = root.canonicalize() {
                if resolved.starts_with(&root) {
                    return Ok(resolved);
                }
            }
        }

        Err(PipelineError::PathTraversal(format!(
            "resolves outside every allowed root: {}",
            resolved.display()
        )))
    }

    /// Validate an archive member name before extraction.
    ///
    /// Member names must be relative, free of parent-directory segments, and
    /// free of home shorthand. One bad name aborts the whole expansion.
    pub fn validate_entry_name(name: &str) -> Result<(), PipelineError> {
        if name.is_empty() {
            return Err(PipelineError::PathTraversal(
                "empty archive member name".to_string(),
            ));
        }
        if name.starts_with('/') || name.starts_with('\\') {
            return Err(PipelineError::PathTraversal(format!(
                "absolute archive member name: {name}"
            )));
        }
        for component in Path::new(name).components() {
            match component {
                Component::ParentDir => {
                    return Err(PipelineError::PathTraversal(format!(
                        "parent segment in archive member name: {name}"
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PipelineError::PathTraversal(format!(
                        "absolute archive member name: {name}"
                    )));
                }
                Component::Normal(part) => {
                    if part.to_string_lossy().starts_with('~') {
                        return Err(PipelineError::PathTraversal(format!(
                            "home shorthand in archive member name: {name}"
                        )));
                    }
                }
                Component::CurDir => {}
            }
        }
        Ok(())
    }
}

fn reject_suspect_components(path: &Path) -> Result<(), PipelineError> {
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(PipelineError::PathTraversal(format!(
                    "parent segment in path: {}",
                    path.display()
                )));
            }
            Component::Normal(part) if part.to_string_lossy().starts_with('~') => {
                return Err(PipelineError::PathTraversal(format!(
                    "home shorthand in path: {}",
                    path.display()
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn accepts_file_under_allowed_root() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("note.txt");
        File::create(&file).unwrap();

        let validator = PathValidator::new(vec![root.path().to_path_buf()]);
        let resolved = validator.validate(&file).unwrap();
        assert!(resolved.is_file());
    }

    #[test]
    fn rejects_file_outside_every_root() {
        let root = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let file = elsewhere.path().join("stray.txt");
        File::create(&file).unwrap();

        let validator = PathValidator::new(vec![root.path().to_path_buf()]);
        assert!(matches!(
            validator.validate(&file),
            Err(PipelineError::PathTraversal(_))
        ));
    }

    #[test]
    fn rejects_parent_segments_before_resolving() {
        let root = TempDir::new().unwrap();
        let validator = PathValidator::new(vec![root.path().to_path_buf()]);
        let sneaky = root.path().join("..").join("escape.txt");
        assert!(matches!(
            validator.validate(&sneaky),
            Err(PipelineError::PathTraversal(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escaping_the_root() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("secret.txt");
        File::create(&target).unwrap();

        let link = root.path().join("innocent.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let validator = PathValidator::new(vec![root.path().to_path_buf()]);
        assert!(matches!(
            validator.validate(&link),
            Err(PipelineError::PathTraversal(_))
        ));
    }

    #[test]
    fn rejects_hostile_entry_names() {
        for name in ["../../etc/passwd", "/etc/passwd", "~/payload", "a/../../b"] {
            assert!(
                PathValidator::validate_entry_name(name).is_err(),
                "expected rejection for {name}"
            );
        }
    }

    #[test]
    fn accepts_plain_entry_names() {
        for name in ["report.pdf", "nested/dir/file.txt", "./ok.txt"] {
            assert!(
                PathValidator::validate_entry_name(name).is_ok(),
                "expected acceptance for {name}"
            );
        }
    }
}
