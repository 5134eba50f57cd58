//! npm lockfile ingestion and install planning.
//!
//! Two input shapes are accepted: the legacy top-level `dependencies` map
//! (name -> entry) and the v2/v3 `packages` map (path -> entry, where the
//! empty key is the root project). Path keys are normalized by stripping
//! the leading `node_modules/` prefix; nested keys keep their remainder
//! (`a/node_modules/b`).

use super::error::PkgError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Lockfile filename consumed by the installer.
pub const LOCKFILE_NAME: &str = "package-lock.json";

/// The `bin` field of a package, either a bare script path or a map of
/// command name to script path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinField {
    Single(String),
    Map(BTreeMap<String, String>),
}

/// One installable entry from the lockfile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LockEntry {
    #[serde(default)]
    pub version: Option<String>,
    /// Tarball URL. Entries without one are skipped.
    #[serde(default)]
    pub resolved: Option<String>,
    /// Integrity tag (`sha1-...` or `sha512-...`).
    #[serde(default)]
    pub integrity: Option<String>,
    #[serde(default)]
    pub cpu: Vec<String>,
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub bin: Option<BinField>,
}

#[derive(Debug, Deserialize)]
struct RawLockfile {
    #[serde(default)]
    dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    packages: BTreeMap<String, serde_json::Value>,
}

/// The derived install plan: every installable entry plus per-platform
/// indexes. Built once from the lockfile, read-only afterwards.
#[derive(Debug, Default)]
pub struct InstallPlan {
    /// Normalized package path -> entry.
    pub packages: BTreeMap<String, LockEntry>,
    /// OS name -> package paths restricted to it.
    pub os_index: BTreeMap<String, Vec<String>>,
    /// CPU architecture -> package paths restricted to it.
    pub cpu_index: BTreeMap<String, Vec<String>>,
    /// Package paths marked optional.
    pub optional: Vec<String>,
}

impl InstallPlan {
    /// Parse lockfile JSON and derive the plan.
    ///
    /// # Errors
    /// Returns `PKG_LOCK_INVALID_JSON` when the document is not valid JSON
    /// of the expected outer shape. Individual entries that do not decode
    /// are skipped, as conventional installers tolerate them.
    pub fn parse(json: &str) -> Result<Self, PkgError> {
        let raw: RawLockfile = serde_json::from_str(json)
            .map_err(|e| PkgError::lock_invalid_json(format!("Error parsing lockfile: {e}")))?;

        // The modern `packages` map is authoritative when present; the
        // legacy `dependencies` map is the installable set otherwise.
        let entries = if raw.packages.is_empty() {
            raw.dependencies
        } else {
            raw.packages
        };

        let mut plan = Self::default();
        for (key, value) in entries {
            if key.is_empty() {
                // Root project entry.
                continue;
            }
            let path = normalize_package_path(&key).to_string();
            let entry: LockEntry = match serde_json::from_value(value) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(package = %path, error = %e, "skipping undecodable lockfile entry");
                    continue;
                }
            };

            for os in &entry.os {
                plan.os_index.entry(os.clone()).or_default().push(path.clone());
            }
            for cpu in &entry.cpu {
                plan.cpu_index.entry(cpu.clone()).or_default().push(path.clone());
            }
            if entry.optional {
                plan.optional.push(path.clone());
            }
            plan.packages.insert(path, entry);
        }

        Ok(plan)
    }
}

/// Strip the leading `node_modules/` prefix from a lockfile path key.
#[must_use]
pub fn normalize_package_path(key: &str) -> &str {
    key.strip_prefix("node_modules/").unwrap_or(key)
}
