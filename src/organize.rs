//! Final placement of cleared files into the destination tree.
//!
//! Placement never overwrites: the destination name is claimed atomically
//! (hard link, or exclusive create for cross-device moves), and a taken
//! name advances a `_1`, `_2`, ... counter before the extension. Concurrent
//! workers placing distinct files that share a basename each get their own
//! name; a partially copied file is never visible under its final name.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::classify::Category;
use crate::error::PipelineError;

pub struct Organizer {
    destination: PathBuf,
}

impl Organizer {
    pub fn new(destination: PathBuf) -> Self {
        Self { destination }
    }

    /// Move `source` into the directory for `category`.
    pub fn place_in(&self, source: &Path, category: Category) -> Result<PathBuf, PipelineError> {
        let dir = self.destination.join(category.dir_name());
        std::fs::create_dir_all(&dir)?;

        let dest = claim_and_move(&dir, source)?;
        info!(from = %source.display(), to = %dest.display(), %category, "file organized");
        Ok(dest)
    }
}

/// Move `source` into `dir` under its own file name, claiming the first
/// free name atomically so a racing writer can never be overwritten.
pub(crate) fn claim_and_move(dir: &Path, source: &Path) -> Result<PathBuf, PipelineError> {
    let file_name = source.file_name().ok_or_else(|| {
        PipelineError::MoveIo(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("path has no file name: {}", source.display()),
        ))
    })?;
    let name = file_name.to_string_lossy();
    let (stem, suffix) = split_name(&name);

    let mut counter = 0u32;
    loop {
        let candidate = if counter == 0 {
            dir.join(file_name)
        } else {
            dir.join(format!("{stem}_{counter}{suffix}"))
        };
        match try_claim_move(source, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(taken = %candidate.display(), "destination name taken, advancing counter");
                counter += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Move `source` to `dest`, failing with `AlreadyExists` if `dest` is taken.
///
/// A plain rename cannot be used here: on Unix it silently replaces an
/// existing destination, so a free-name check followed by rename loses one
/// of two racing files. A hard link refuses to clobber, which makes the
/// claim atomic on one filesystem; across filesystems the name is claimed
/// with an exclusive create and the content staged next to it.
fn try_claim_move(source: &Path, dest: &Path) -> std::io::Result<()> {
    match std::fs::hard_link(source, dest) {
        Ok(()) => std::fs::remove_file(source),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e),
        Err(_) => {
            OpenOptions::new().write(true).create_new(true).open(dest)?;
            let staging = staging_path(dest)?;
            if let Err(e) =
                std::fs::copy(source, &staging).and_then(|_| std::fs::rename(&staging, dest))
            {
                let _ = std::fs::remove_file(&staging);
                let _ = std::fs::remove_file(dest);
                return Err(e);
            }
            std::fs::remove_file(source)
        }
    }
}

/// Split a file name into (stem, suffix-with-dot), keeping compound
/// tarball suffixes whole so `backup.tar.gz` becomes `backup_1.tar.gz`.
fn split_name(name: &str) -> (&str, &str) {
    let lower = name.to_lowercase();
    for compound in [".tar.gz", ".tar.bz2", ".tar.xz"] {
        if lower.ends_with(compound) {
            let split = name.len() - compound.len();
            return (&name[..split], &name[split..]);
        }
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name, ""),
    }
}

fn staging_path(dest: &Path) -> Result<PathBuf, std::io::Error> {
    let dir = dest.parent().ok_or_else(|| {
        std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("destination has no parent: {}", dest.display()),
        )
    })?;
    let name = dest.file_name().unwrap_or_default().to_string_lossy();
    Ok(dir.join(format!(".{name}.partial")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn places_file_under_its_category_directory() {
        let source_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();
        let file = source_dir.path().join("report.pdf");
        std::fs::write(&file, b"pdf bytes").unwrap();

        let organizer = Organizer::new(dest_dir.path().to_path_buf());
        let placed = organizer.place_in(&file, Category::Documents).unwrap();

        assert_eq!(placed, dest_dir.path().join("documents/report.pdf"));
        assert!(placed.is_file());
        assert!(!file.exists());
    }

    #[test]
    fn collision_appends_counter_before_extension() {
        let source_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();
        let organizer = Organizer::new(dest_dir.path().to_path_buf());

        for expected in ["report.pdf", "report_1.pdf", "report_2.pdf"] {
            let file = source_dir.path().join("report.pdf");
            std::fs::write(&file, b"pdf bytes").unwrap();
            let placed = organizer.place_in(&file, Category::Documents).unwrap();
            assert_eq!(placed, dest_dir.path().join("documents").join(expected));
        }
    }

    #[test]
    fn racing_writers_with_same_name_lose_neither_file() {
        let dest = TempDir::new().unwrap();
        let dir = dest.path().to_path_buf();

        let handles: Vec<_> = ["worker A data", "worker B data"]
            .into_iter()
            .map(|content| {
                let dir = dir.clone();
                std::thread::spawn(move || {
                    let source_dir = TempDir::new().unwrap();
                    let source = source_dir.path().join("report.pdf");
                    std::fs::write(&source, content).unwrap();
                    claim_and_move(&dir, &source).unwrap()
                })
            })
            .collect();

        let placed: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_ne!(placed[0], placed[1]);

        let mut contents: Vec<String> = placed
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap())
            .collect();
        contents.sort();
        assert_eq!(contents, ["worker A data", "worker B data"]);
    }

    #[test]
    fn compound_tarball_names_keep_their_suffix_on_collision() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("backup.tar.gz"), b"x").unwrap();

        let source = TempDir::new().unwrap();
        let file = source.path().join("backup.tar.gz");
        std::fs::write(&file, b"y").unwrap();

        let dest = claim_and_move(dir.path(), &file).unwrap();
        assert_eq!(dest, dir.path().join("backup_1.tar.gz"));
        assert_eq!(std::fs::read(dir.path().join("backup.tar.gz")).unwrap(), b"x");
    }

    #[test]
    fn extensionless_names_get_plain_counter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("README"), b"x").unwrap();

        let source = TempDir::new().unwrap();
        let file = source.path().join("README");
        std::fs::write(&file, b"y").unwrap();

        let dest = claim_and_move(dir.path(), &file).unwrap();
        assert_eq!(dest, dir.path().join("README_1"));
    }
}
