//! Archive expansion with bomb protection.
//!
//! Expansion is all-or-nothing: entries are listed and charged against the
//! shared accumulator before anything is written, extraction happens into an
//! isolated workspace owned by the caller, and one bad member name or limit
//! violation aborts the entire expansion. The accumulator is threaded through
//! every expansion of one top-level archive so nested containers cannot
//! split a payload across many small inner archives to dodge the caps.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::config::ArchiveLimits;
use crate::error::{ArchiveLimit, PipelineError};
use crate::security::PathValidator;

/// Cumulative extraction cost across one expansion tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveAccumulator {
    pub files_extracted: u64,
    pub bytes_extracted: u64,
}

impl ArchiveAccumulator {
    /// Charge one projected entry against the limits before it is written.
    fn charge(&mut self, limits: &ArchiveLimits, size: u64) -> Result<(), PipelineError> {
        if self.files_extracted + 1 > limits.max_files {
            return Err(PipelineError::ArchiveLimitExceeded(ArchiveLimit::MaxFiles));
        }
        if size > limits.max_file_size {
            return Err(PipelineError::ArchiveLimitExceeded(
                ArchiveLimit::MaxFileSize,
            ));
        }
        if self.bytes_extracted.saturating_add(size) > limits.max_total_size {
            return Err(PipelineError::ArchiveLimitExceeded(
                ArchiveLimit::MaxTotalSize,
            ));
        }
        self.files_extracted += 1;
        self.bytes_extracted = self.bytes_extracted.saturating_add(size);
        Ok(())
    }
}

enum ArchiveKind {
    Zip,
    Tar { gzipped: bool },
}

fn detect_kind(path: &Path) -> Option<ArchiveKind> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())?;
    if name.ends_with(".zip") || name.ends_with(".jar") {
        Some(ArchiveKind::Zip)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveKind::Tar { gzipped: true })
    } else if name.ends_with(".tar") {
        Some(ArchiveKind::Tar { gzipped: false })
    } else {
        None
    }
}

pub struct ArchiveExpander {
    limits: ArchiveLimits,
}

impl ArchiveExpander {
    pub fn new(limits: ArchiveLimits) -> Self {
        Self { limits }
    }

    /// Whether the file name looks like a container format the expander can
    /// open. Formats classified as archives but not listed here (rar, 7z)
    /// are organized without expansion.
    pub fn supports(path: &Path) -> bool {
        detect_kind(path).is_some()
    }

    /// Expand `archive` into `workspace`, returning the extracted regular
    /// files. `depth` counts nesting from the top-level container; the same
    /// accumulator must be passed for every expansion in one tree.
    pub fn expand(
        &self,
        archive: &Path,
        workspace: &Path,
        acc: &mut ArchiveAccumulator,
        depth: u32,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        if depth > self.limits.max_depth {
            return Err(PipelineError::ArchiveLimitExceeded(ArchiveLimit::MaxDepth));
        }

        let files = match detect_kind(archive) {
            Some(ArchiveKind::Zip) => self.expand_zip(archive, workspace, acc),
            Some(ArchiveKind::Tar { gzipped }) => {
                self.expand_tar(archive, workspace, acc, gzipped)
            }
            None => Err(PipelineError::ArchiveCorrupt(format!(
                "unsupported archive format: {}",
                archive.display()
            ))),
        }?;

        verify_within_workspace(&files, workspace)?;

        info!(
            archive = %archive.display(),
            files = files.len(),
            total_files = acc.files_extracted,
            total_bytes = acc.bytes_extracted,
            depth,
            "archive expanded"
        );
        Ok(files)
    }

    fn expand_zip(
        &self,
        archive: &Path,
        workspace: &Path,
        acc: &mut ArchiveAccumulator,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let file = File::open(archive)
            .map_err(|e| PipelineError::ArchiveCorrupt(format!("cannot open archive: {e}")))?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| PipelineError::ArchiveCorrupt(format!("not a valid zip: {e}")))?;

        // Listing pass: every name validated and every declared size charged
        // before a single byte is written.
        for index in 0..zip.len() {
            let entry = zip
                .by_index(index)
                .map_err(|e| PipelineError::ArchiveCorrupt(format!("bad zip entry: {e}")))?;
            PathValidator::validate_entry_name(entry.name())?;
            if entry.is_file() {
                acc.charge(&self.limits, entry.size())?;
            }
        }

        let mut files = Vec::new();
        for index in 0..zip.len() {
            let mut entry = zip
                .by_index(index)
                .map_err(|e| PipelineError::ArchiveCorrupt(format!("bad zip entry: {e}")))?;
            if !entry.is_file() {
                continue;
            }
            let relative = entry.enclosed_name().ok_or_else(|| {
                PipelineError::PathTraversal(format!(
                    "unsafe zip member name: {}",
                    entry.name()
                ))
            })?;
            let dest = workspace.join(relative);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let declared = entry.size();
            let mut out = File::create(&dest)?;
            // Cap the copy at the declared size so a lying header cannot
            // write past what was charged.
            std::io::copy(&mut (&mut entry).take(declared), &mut out)?;
            debug!(member = %dest.display(), size = declared, "extracted zip member");
            files.push(dest);
        }
        Ok(files)
    }

    fn expand_tar(
        &self,
        archive: &Path,
        workspace: &Path,
        acc: &mut ArchiveAccumulator,
        gzipped: bool,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        // Listing pass over headers only.
        let mut listing = tar::Archive::new(open_tar_reader(archive, gzipped)?);
        let entries = listing
            .entries()
            .map_err(|e| PipelineError::ArchiveCorrupt(format!("not a valid tar: {e}")))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| PipelineError::ArchiveCorrupt(format!("bad tar entry: {e}")))?;
            let name = entry
                .path()
                .map_err(|e| PipelineError::ArchiveCorrupt(format!("bad tar member name: {e}")))?
                .to_string_lossy()
                .into_owned();
            PathValidator::validate_entry_name(&name)?;
            if entry.header().entry_type().is_file() {
                acc.charge(&self.limits, entry.header().size().unwrap_or(0))?;
            }
        }

        // Extraction pass; the reader must be reopened since tar streams are
        // single-use.
        let mut extracting = tar::Archive::new(open_tar_reader(archive, gzipped)?);
        let entries = extracting
            .entries()
            .map_err(|e| PipelineError::ArchiveCorrupt(format!("not a valid tar: {e}")))?;
        let mut files = Vec::new();
        for entry in entries {
            let mut entry =
                entry.map_err(|e| PipelineError::ArchiveCorrupt(format!("bad tar entry: {e}")))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .map_err(|e| PipelineError::ArchiveCorrupt(format!("bad tar member name: {e}")))?
                .into_owned();
            let unpacked = entry.unpack_in(workspace)?;
            if !unpacked {
                return Err(PipelineError::PathTraversal(format!(
                    "tar member escaped workspace: {}",
                    relative.display()
                )));
            }
            let dest = workspace.join(&relative);
            debug!(member = %dest.display(), "extracted tar member");
            files.push(dest);
        }
        Ok(files)
    }
}

fn open_tar_reader(archive: &Path, gzipped: bool) -> Result<Box<dyn Read>, PipelineError> {
    let file = File::open(archive)
        .map_err(|e| PipelineError::ArchiveCorrupt(format!("cannot open archive: {e}")))?;
    if gzipped {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Re-check every produced file resolves inside the workspace. Catches
/// symlinked members and anything else the format layer let slip through.
fn verify_within_workspace(files: &[PathBuf], workspace: &Path) -> Result<(), PipelineError> {
    let workspace = workspace
        .canonicalize()
        .map_err(PipelineError::MoveIo)?;
    for file in files {
        let resolved = file.canonicalize().map_err(|e| {
            PipelineError::PathTraversal(format!(
                "extracted member does not resolve: {} ({e})",
                file.display()
            ))
        })?;
        if !resolved.starts_with(&workspace) {
            return Err(PipelineError::PathTraversal(format!(
                "extracted member escaped workspace: {}",
                file.display()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn small_limits() -> ArchiveLimits {
        ArchiveLimits {
            max_files: 10,
            max_total_size: 10_000,
            max_depth: 3,
            max_file_size: 5_000,
        }
    }

    fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn build_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn zip_expansion_extracts_members_and_accounts_cost() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("bundle.zip");
        build_zip(&archive, &[("a.txt", b"hello"), ("sub/b.txt", b"world!")]);

        let workspace = TempDir::new().unwrap();
        let mut acc = ArchiveAccumulator::default();
        let expander = ArchiveExpander::new(small_limits());
        let files = expander
            .expand(&archive, workspace.path(), &mut acc, 0)
            .unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(acc.files_extracted, 2);
        assert_eq!(acc.bytes_extracted, 11);
        assert_eq!(
            std::fs::read(workspace.path().join("a.txt")).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn traversal_member_name_aborts_before_any_write() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("evil.zip");
        build_zip(
            &archive,
            &[("ok.txt", b"fine"), ("../../etc/passwd", b"pwned")],
        );

        let workspace = TempDir::new().unwrap();
        let mut acc = ArchiveAccumulator::default();
        let expander = ArchiveExpander::new(small_limits());
        let err = expander
            .expand(&archive, workspace.path(), &mut acc, 0)
            .unwrap_err();

        assert!(matches!(err, PipelineError::PathTraversal(_)));
        assert_eq!(std::fs::read_dir(workspace.path()).unwrap().count(), 0);
    }

    #[test]
    fn file_count_limit_aborts_whole_expansion() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("many.zip");
        let entries: Vec<(String, Vec<u8>)> = (0..4)
            .map(|i| (format!("file_{i}.txt"), b"x".to_vec()))
            .collect();
        let borrowed: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(n, d)| (n.as_str(), d.as_slice()))
            .collect();
        build_zip(&archive, &borrowed);

        let limits = ArchiveLimits {
            max_files: 3,
            ..small_limits()
        };
        let workspace = TempDir::new().unwrap();
        let mut acc = ArchiveAccumulator::default();
        let err = ArchiveExpander::new(limits)
            .expand(&archive, workspace.path(), &mut acc, 0)
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::ArchiveLimitExceeded(ArchiveLimit::MaxFiles)
        ));
        assert_eq!(std::fs::read_dir(workspace.path()).unwrap().count(), 0);
    }

    #[test]
    fn oversized_member_aborts() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("fat.zip");
        let payload = vec![b'z'; 6_000];
        build_zip(&archive, &[("fat.bin", &payload)]);

        let workspace = TempDir::new().unwrap();
        let mut acc = ArchiveAccumulator::default();
        let err = ArchiveExpander::new(small_limits())
            .expand(&archive, workspace.path(), &mut acc, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ArchiveLimitExceeded(ArchiveLimit::MaxFileSize)
        ));
    }

    #[test]
    fn shared_accumulator_enforces_total_across_expansions() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.zip");
        let second = dir.path().join("second.zip");
        let payload = vec![b'a'; 3_000];
        build_zip(&first, &[("a.bin", &payload)]);
        build_zip(&second, &[("b.bin", &payload)]);

        let limits = ArchiveLimits {
            max_total_size: 5_000,
            ..small_limits()
        };
        let expander = ArchiveExpander::new(limits);
        let mut acc = ArchiveAccumulator::default();

        let ws1 = TempDir::new().unwrap();
        expander
            .expand(&first, ws1.path(), &mut acc, 0)
            .unwrap();

        // Individually under every limit, but the tree total tips over.
        let ws2 = TempDir::new().unwrap();
        let err = expander
            .expand(&second, ws2.path(), &mut acc, 1)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ArchiveLimitExceeded(ArchiveLimit::MaxTotalSize)
        ));
    }

    #[test]
    fn depth_limit_rejects_before_opening() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("deep.zip");
        build_zip(&archive, &[("a.txt", b"x")]);

        let workspace = TempDir::new().unwrap();
        let mut acc = ArchiveAccumulator::default();
        let err = ArchiveExpander::new(small_limits())
            .expand(&archive, workspace.path(), &mut acc, 4)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ArchiveLimitExceeded(ArchiveLimit::MaxDepth)
        ));
    }

    #[test]
    fn tar_gz_expansion_works() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("bundle.tar.gz");
        build_tar_gz(&archive, &[("notes/readme.md", b"# hi")]);

        let workspace = TempDir::new().unwrap();
        let mut acc = ArchiveAccumulator::default();
        let files = ArchiveExpander::new(small_limits())
            .expand(&archive, workspace.path(), &mut acc, 0)
            .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(
            std::fs::read(workspace.path().join("notes/readme.md")).unwrap(),
            b"# hi"
        );
    }

    #[test]
    fn garbage_file_reports_archive_corrupt() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"this is not a zip file").unwrap();

        let workspace = TempDir::new().unwrap();
        let mut acc = ArchiveAccumulator::default();
        let err = ArchiveExpander::new(small_limits())
            .expand(&archive, workspace.path(), &mut acc, 0)
            .unwrap_err();
        assert!(matches!(err, PipelineError::ArchiveCorrupt(_)));
    }
}
