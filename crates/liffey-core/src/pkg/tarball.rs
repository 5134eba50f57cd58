//! Streaming tarball extraction.
//!
//! npm tarballs are gzipped tar archives with (almost always) a `package/`
//! prefix on every entry. The extractor walks the archive lazily from any
//! `io::Read` source, so it can be driven directly by a download stream
//! without buffering the tarball in memory.

use super::error::PkgError;
use flate2::read::GzDecoder;
use std::collections::HashSet;
use std::fs;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::Archive;

/// Read buffer in front of the gzip decoder.
const GZIP_BUFFER_SIZE: usize = 1 << 20;

/// Write buffer for extracted files.
const FILE_BUFFER_SIZE: usize = 1 << 16;

/// Extract a gzipped tar stream into `dest`.
///
/// A leading `package/` component is stripped from each entry name and
/// entries whose stripped name is empty are dropped. Regular files keep
/// their tar mode bits; directories are created `0755`; symlinks that the
/// filesystem refuses are replaced by a `<name>.symlink` placeholder file.
/// Entries with absolute paths or `..` components fail the extraction.
///
/// # Errors
/// Returns `PKG_EXTRACT_FAILED` on any tar, gzip, or filesystem failure.
pub fn extract_tar_gz<R: Read>(src: R, dest: &Path) -> Result<(), PkgError> {
    let buffered = BufReader::with_capacity(GZIP_BUFFER_SIZE, src);
    let gz = GzDecoder::new(buffered);
    let mut archive = Archive::new(gz);

    // Directories already created this walk, to skip redundant syscalls.
    let mut created_dirs: HashSet<PathBuf> = HashSet::new();

    for entry in archive
        .entries()
        .map_err(|e| PkgError::extract_failed(format!("Failed to read tarball: {e}")))?
    {
        let mut entry =
            entry.map_err(|e| PkgError::extract_failed(format!("Failed to read tar entry: {e}")))?;

        let raw_path = entry
            .path()
            .map_err(|e| PkgError::extract_failed(format!("Failed to read entry path: {e}")))?
            .into_owned();

        let name = sanitize_entry_path(&raw_path)?;
        let name = match name.strip_prefix("package") {
            Ok(stripped) => stripped,
            Err(_) => &name,
        };
        if name.as_os_str().is_empty() {
            continue;
        }

        let target = dest.join(name);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            ensure_dir(&target, &mut created_dirs)?;
        } else if entry_type.is_file() {
            if let Some(parent) = target.parent() {
                ensure_dir(parent, &mut created_dirs)?;
            }

            let mode = entry
                .header()
                .mode()
                .map_err(|e| PkgError::extract_failed(format!("Bad mode in tar header: {e}")))?
                & 0o777;

            let file = fs::File::create(&target).map_err(|e| {
                PkgError::extract_failed(format!("Failed to create {}: {e}", target.display()))
            })?;
            let mut writer = BufWriter::with_capacity(FILE_BUFFER_SIZE, file);
            io::copy(&mut entry, &mut writer).map_err(|e| {
                PkgError::extract_failed(format!("Failed to write {}: {e}", target.display()))
            })?;
            writer.flush().map_err(|e| {
                PkgError::extract_failed(format!("Failed to flush {}: {e}", target.display()))
            })?;
            drop(writer);

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&target, fs::Permissions::from_mode(mode)).map_err(|e| {
                    PkgError::extract_failed(format!(
                        "Failed to set mode on {}: {e}",
                        target.display()
                    ))
                })?;
            }
            #[cfg(not(unix))]
            let _ = mode;
        } else if entry_type.is_symlink() {
            if let Some(parent) = target.parent() {
                ensure_dir(parent, &mut created_dirs)?;
            }

            let link_name = entry
                .link_name()
                .map_err(|e| PkgError::extract_failed(format!("Bad symlink in tarball: {e}")))?
                .ok_or_else(|| {
                    PkgError::extract_failed(format!(
                        "Symlink entry {} has no target",
                        target.display()
                    ))
                })?
                .into_owned();

            let _ = fs::remove_file(&target);
            create_symlink(&link_name, &target)?;
        }
        // All other type flags (hard links, fifos, pax extensions) are ignored.
    }

    Ok(())
}

/// Reject absolute paths and `..` components before they touch the filesystem.
fn sanitize_entry_path(path: &Path) -> Result<&Path, PkgError> {
    if path.is_absolute() {
        return Err(PkgError::extract_failed(format!(
            "Tarball contains absolute path: {}",
            path.display()
        )));
    }
    for component in path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(PkgError::extract_failed(format!(
                "Tarball contains path traversal: {}",
                path.display()
            )));
        }
    }
    Ok(path)
}

fn ensure_dir(dir: &Path, created: &mut HashSet<PathBuf>) -> Result<(), PkgError> {
    if created.contains(dir) {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(dir)
            .map_err(|e| {
                PkgError::extract_failed(format!("Failed to create {}: {e}", dir.display()))
            })?;
    }
    #[cfg(not(unix))]
    fs::create_dir_all(dir)
        .map_err(|e| PkgError::extract_failed(format!("Failed to create {}: {e}", dir.display())))?;

    created.insert(dir.to_path_buf());
    Ok(())
}

/// Create a symlink, falling back to a `<name>.symlink` placeholder file
/// when the filesystem refuses.
fn create_symlink(link_name: &Path, target: &Path) -> Result<(), PkgError> {
    #[cfg(unix)]
    {
        if std::os::unix::fs::symlink(link_name, target).is_ok() {
            return Ok(());
        }
    }

    let mut placeholder = target.as_os_str().to_os_string();
    placeholder.push(".symlink");
    fs::write(&placeholder, format!("Symlink to: {}", link_name.display())).map_err(|e| {
        PkgError::extract_failed(format!(
            "Failed to create symlink placeholder for {}: {e}",
            target.display()
        ))
    })
}
