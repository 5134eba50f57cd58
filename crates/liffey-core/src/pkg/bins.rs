//! Bin shim placement in `node_modules/.bin`.
//!
//! Shims are relative symlinks so the whole `node_modules` tree can be
//! relocated without breaking them. Shim placement runs strictly after
//! every package has been extracted.

use super::error::PkgError;
use super::lockfile::{BinField, InstallPlan};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Deserialize)]
struct PackageManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    bin: Option<BinField>,
}

/// Create `.bin` shims for every plan entry that declares binaries.
///
/// Entries without a `bin` map in the lockfile fall back to the installed
/// `package.json`. Missing script targets are warnings, not failures.
///
/// # Errors
/// Returns `NODE_MODULES_WRITE_FAILED` only if the `.bin` directory itself
/// cannot be created.
pub fn install_bin_shims(plan: &InstallPlan, node_modules: &Path) -> Result<(), PkgError> {
    let bin_dir = node_modules.join(".bin");
    fs::create_dir_all(&bin_dir).map_err(|e| {
        PkgError::node_modules_write_failed(format!("Failed to create .bin directory: {e}"))
    })?;

    for (pkg_path, entry) in &plan.packages {
        let Some(bin_map) = resolve_bin_map(entry.bin.as_ref(), pkg_path, node_modules) else {
            continue;
        };

        for (command, script_path) in bin_map {
            if command.is_empty() || script_path.is_empty() {
                continue;
            }
            place_shim(&bin_dir, node_modules, pkg_path, &command, &script_path);
        }
    }

    Ok(())
}

/// The effective command -> script map for a package, from the lockfile
/// entry or, failing that, the installed `package.json`.
fn resolve_bin_map(
    declared: Option<&BinField>,
    pkg_path: &str,
    node_modules: &Path,
) -> Option<BTreeMap<String, String>> {
    let (field, manifest_name) = match declared {
        Some(field) => (field.clone(), None),
        None => {
            let manifest_path = node_modules.join(pkg_path).join("package.json");
            let contents = fs::read_to_string(&manifest_path).ok()?;
            let manifest: PackageManifest = serde_json::from_str(&contents).ok()?;
            (manifest.bin?, manifest.name)
        }
    };

    match field {
        BinField::Map(map) => Some(map),
        BinField::Single(script) => {
            // A bare script path takes the package's own name as the
            // command, or the final path segment when unnamed.
            let name = manifest_name.unwrap_or_else(|| pkg_path.to_string());
            let name = name.rsplit('/').next().unwrap_or(&name).to_string();
            Some(BTreeMap::from([(name, script)]))
        }
    }
}

fn place_shim(
    bin_dir: &Path,
    node_modules: &Path,
    pkg_path: &str,
    command: &str,
    script_path: &str,
) {
    let script_full = join_script_path(&node_modules.join(pkg_path), script_path);
    if !script_full.exists() {
        warn!(command, script = script_path, "bin script not found, skipping shim");
        return;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(&script_full, fs::Permissions::from_mode(0o755)) {
            warn!(command, error = %e, "failed to make bin script executable");
            return;
        }
    }

    let link = bin_dir.join(command);
    if fs::symlink_metadata(&link).is_ok() {
        if let Err(e) = fs::remove_file(&link) {
            warn!(command, error = %e, "failed to remove existing shim");
            return;
        }
    }

    let target = relative_bin_target(pkg_path, script_path);

    #[cfg(unix)]
    let created = std::os::unix::fs::symlink(&target, &link);
    #[cfg(not(unix))]
    let created = Err::<(), std::io::Error>(std::io::Error::other("symlinks unsupported"));

    match created {
        Ok(()) => match fs::symlink_metadata(&link) {
            Ok(_) => debug!(command, target = %target.display(), "created bin shim"),
            Err(e) => warn!(command, error = %e, "shim verification failed"),
        },
        Err(e) => warn!(command, error = %e, "failed to create bin shim"),
    }
}

/// Join a package-relative script path, collapsing `.` and `..` segments.
fn join_script_path(base: &Path, rel: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in rel.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                path.pop();
            }
            other => path.push(other),
        }
    }
    path
}

/// The symlink target from `.bin/` to a package script, kept relative.
fn relative_bin_target(pkg_path: &str, script_path: &str) -> PathBuf {
    let mut rel = PathBuf::from("..");
    for part in pkg_path.split('/') {
        if !part.is_empty() {
            rel.push(part);
        }
    }
    for part in script_path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                rel.pop();
            }
            other => rel.push(other),
        }
    }
    rel
}
