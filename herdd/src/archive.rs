//! Zip archives of build output directories.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::FileOptions;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("I/O error while archiving {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not walk {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Files written.
    pub files: usize,
    /// Empty directories written.
    pub empty_dirs: usize,
    /// Symbolic links left out of the archive.
    pub skipped_links: usize,
}

/// Write every file under `dir` to a deflated zip at `dest`.
///
/// Entry names are relative to `dir` and use `/` separators. Symbolic links
/// are not followed and not archived. Blocking; run it on a blocking thread
/// from async code.
pub fn archive_directory(dir: &Path, dest: &Path) -> Result<ArchiveSummary, ArchiveError> {
    if !dir.is_dir() {
        return Err(ArchiveError::NotADirectory(dir.to_path_buf()));
    }

    let file = File::create(dest).map_err(|source| ArchiveError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut summary = ArchiveSummary {
        files: 0,
        empty_dirs: 0,
        skipped_links: 0,
    };
    // Directory entry name -> has children.
    let mut dirs: BTreeMap<String, bool> = BTreeMap::new();

    let walk = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1);
    for entry in walk {
        let entry = entry?;
        let kind = entry.file_type();
        if kind.is_symlink() {
            warn!("Skipping symbolic link {}", entry.path().display());
            summary.skipped_links += 1;
            continue;
        }

        let name = entry_name(dir, entry.path());
        if let Some((parent, _)) = name.rsplit_once('/') {
            dirs.insert(parent.to_string(), true);
        }
        if kind.is_dir() {
            dirs.entry(name).or_insert(false);
        } else {
            zip.start_file(name, options)?;
            let contents = std::fs::read(entry.path()).map_err(|source| ArchiveError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
            zip.write_all(&contents).map_err(|source| ArchiveError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
            summary.files += 1;
        }
    }

    for (name, _) in dirs.into_iter().filter(|(_, has_children)| !has_children) {
        zip.add_directory(format!("{name}/"), options)?;
        summary.empty_dirs += 1;
    }

    let mut writer = zip.finish()?;
    writer.flush().map_err(|source| ArchiveError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    Ok(summary)
}

fn entry_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
