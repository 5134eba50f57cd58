//! Recursive dependency resolution and lockfile generation.
//!
//! Resolution walks the declared dependency graph concurrently, memoizing
//! by `name@range`. Before a range is resolved over the network, any
//! already-resolved version of the same name that satisfies it is reused,
//! so the tree converges on one version per name where the ranges allow.

use super::error::PkgError;
use super::lockfile::BinField;
use super::registry::RegistryClient;
use super::spec::PackageSpec;
use super::version::matching_versions;
use futures::future::{try_join_all, BoxFuture};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{info, warn};

/// Recursion guard: dependency graphs with cycles whose ranges never hit
/// the memo would otherwise recurse forever.
const MAX_DEPTH: usize = 100;

/// A fully resolved package and its resolved subtree.
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: String,
    pub tarball_url: String,
    pub integrity: String,
    /// Concrete dependency versions (name -> version) after resolution.
    pub dependencies: BTreeMap<String, String>,
    /// Declared peer ranges, kept for the unmet-peer report.
    pub peer_dependencies: BTreeMap<String, String>,
    /// Resolved children, keyed by dependency name.
    pub resolved_deps: BTreeMap<String, ResolvedPackage>,
    pub os: Vec<String>,
    pub cpu: Vec<String>,
    pub bin: Option<BinField>,
}

/// Memoized concurrent resolver over the registry metadata API.
pub struct Resolver {
    registry: RegistryClient,
    http_slots: Arc<Semaphore>,
    memo: RwLock<HashMap<String, ResolvedPackage>>,
}

impl Resolver {
    #[must_use]
    pub fn new(registry: RegistryClient, http_slots: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            http_slots,
            memo: RwLock::new(HashMap::new()),
        })
    }

    /// Resolve a list of top-level specs concurrently.
    ///
    /// # Errors
    /// The first failing resolve cancels its siblings and is returned.
    pub async fn resolve_all(
        self: &Arc<Self>,
        specs: &[PackageSpec],
    ) -> Result<Vec<ResolvedPackage>, PkgError> {
        try_join_all(specs.iter().map(|spec| {
            self.clone()
                .resolve(spec.name.clone(), spec.range_or_latest().to_string(), 0)
        }))
        .await
    }

    /// Warn about peer dependencies of the top-level list that the list
    /// itself does not satisfy. Peers are reported, never resolved or
    /// installed. Resolution goes through the shared memo, so the main
    /// resolve pass afterwards does not refetch.
    ///
    /// # Errors
    /// Fails if any top-level spec fails to resolve.
    pub async fn report_unmet_peers(
        self: &Arc<Self>,
        specs: &[PackageSpec],
    ) -> Result<(), PkgError> {
        let resolved = self.resolve_all(specs).await?;

        for pkg in &resolved {
            for (peer_name, peer_range) in &pkg.peer_dependencies {
                let declared = specs.iter().any(|s| s.name == *peer_name);
                if !declared {
                    warn!(
                        package = %pkg.name,
                        peer = %peer_name,
                        range = %peer_range,
                        "unmet peer dependency"
                    );
                }
            }
        }
        Ok(())
    }

    /// Resolve one `name@range` pair, recursively resolving its
    /// dependencies.
    fn resolve(
        self: Arc<Self>,
        name: String,
        range: String,
        depth: usize,
    ) -> BoxFuture<'static, Result<ResolvedPackage, PkgError>> {
        Box::pin(async move {
            if depth > MAX_DEPTH {
                return Err(PkgError::spec_invalid(format!(
                    "Dependency tree too deep while resolving {name}"
                )));
            }

            // Compatibility reuse, first-wins: any already-resolved
            // version of this name that satisfies the range short-circuits
            // the network entirely.
            {
                let memo = self.memo.read().await;
                for pkg in memo.values() {
                    if pkg.name == name {
                        if let Ok(matches) = matching_versions(&range, &[pkg.version.clone()]) {
                            if !matches.is_empty() {
                                return Ok(pkg.clone());
                            }
                        }
                    }
                }
            }

            let memo_key = format!("{name}@{range}");

            let packument = {
                let _slot = self
                    .http_slots
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| PkgError::registry(format!("HTTP slot unavailable: {e}")))?;
                self.registry.fetch_packument(&name).await?
            };

            let version_names = packument.version_names();
            let matches = match matching_versions(&range, &version_names) {
                Ok(m) if !m.is_empty() => m,
                _ => {
                    // Not a satisfiable range; try it as a dist-tag.
                    let Some(tag_version) = packument.dist_tags.get(&range) else {
                        warn!(package = %name, range = %range, "tag does not exist");
                        return Err(PkgError::version_not_found(&name, &range));
                    };
                    info!(package = %name, version = %tag_version, "Using '{}' tag", range);
                    match matching_versions(tag_version, &version_names) {
                        Ok(m) if !m.is_empty() => m,
                        _ => return Err(PkgError::version_not_found(&name, &range)),
                    }
                }
            };

            // Last element of the ascending match list is the greatest
            // satisfying version.
            let version = matches
                .last()
                .map(ToString::to_string)
                .ok_or_else(|| PkgError::version_not_found(&name, &range))?;
            let meta = packument
                .versions
                .get(&version)
                .ok_or_else(|| PkgError::version_not_found(&name, &version))?;

            let dist = meta.dist.as_ref();
            let tarball_url = dist
                .and_then(|d| d.tarball.clone())
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    PkgError::metadata_incomplete(format!(
                        "Missing tarball URL in metadata for {name}@{version}"
                    ))
                })?;
            let integrity = dist
                .and_then(|d| d.integrity.clone())
                .filter(|i| !i.is_empty())
                .ok_or_else(|| {
                    PkgError::metadata_incomplete(format!(
                        "Missing integrity hash in metadata for {name}@{version}"
                    ))
                })?;

            // Resolve children concurrently; the first failure cancels the
            // rest of this package's subtree.
            let children = try_join_all(meta.dependencies.iter().map(|(dep_name, dep_range)| {
                let resolver = self.clone();
                let dep_name = dep_name.clone();
                let dep_range = dep_range.clone();
                async move {
                    let pkg = resolver
                        .resolve(dep_name.clone(), dep_range.clone(), depth + 1)
                        .await
                        .map_err(|e| {
                            PkgError::new(
                                e.code(),
                                format!(
                                    "Failed to resolve {dep_name}@{dep_range}: {}",
                                    e.message()
                                ),
                            )
                        })?;
                    Ok::<_, PkgError>((dep_name, pkg))
                }
            }))
            .await?;

            let mut dependencies = BTreeMap::new();
            let mut resolved_deps = BTreeMap::new();
            for (dep_name, dep_pkg) in children {
                dependencies.insert(dep_name.clone(), dep_pkg.version.clone());
                resolved_deps.insert(dep_name, dep_pkg);
            }

            let pkg = ResolvedPackage {
                name,
                version,
                tarball_url,
                integrity,
                dependencies,
                peer_dependencies: meta.peer_dependencies.clone(),
                resolved_deps,
                os: meta.os.clone(),
                cpu: meta.cpu.clone(),
                bin: meta.bin.clone(),
            };

            self.memo.write().await.insert(memo_key, pkg.clone());
            Ok(pkg)
        })
    }
}

#[derive(Deserialize)]
struct Manifest {
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
}

/// Read the declared dependencies of `<project_dir>/package.json` as specs.
///
/// # Errors
/// `PKG_PACKAGE_JSON_NOT_FOUND` / `PKG_PACKAGE_JSON_INVALID`.
pub fn read_manifest_specs(project_dir: &Path) -> Result<Vec<PackageSpec>, PkgError> {
    let path = project_dir.join("package.json");
    let contents =
        std::fs::read_to_string(&path).map_err(|_| PkgError::package_json_not_found(&path))?;
    let manifest: Manifest = serde_json::from_str(&contents)
        .map_err(|e| PkgError::package_json_invalid(format!("Invalid package.json: {e}")))?;

    Ok(manifest
        .dependencies
        .into_iter()
        .map(|(name, range)| PackageSpec::new(name, range))
        .collect())
}

/// Serialize a resolved (and hoisted) top-level list as a v3 lockfile.
///
/// # Errors
/// `PKG_LOCK_WRITE_FAILED` when an entry is missing its name or version.
pub fn generate_lockfile(dependencies: &[ResolvedPackage]) -> Result<String, PkgError> {
    let mut packages: BTreeMap<String, serde_json::Value> = BTreeMap::new();

    let root_deps: BTreeMap<&str, &str> = dependencies
        .iter()
        .filter(|d| !d.name.is_empty() && !d.version.is_empty())
        .map(|d| (d.name.as_str(), d.version.as_str()))
        .collect();
    packages.insert(
        String::new(),
        serde_json::json!({ "dependencies": root_deps }),
    );

    let mut seen = HashSet::new();
    for dep in dependencies {
        add_package(
            dep,
            format!("node_modules/{}", dep.name),
            &mut packages,
            &mut seen,
        )?;
    }

    let doc = serde_json::json!({
        "lockfileVersion": 3,
        "requires": true,
        "packages": packages,
    });
    serde_json::to_string_pretty(&doc)
        .map_err(|e| PkgError::lock_write_failed(format!("Failed to generate lockfile: {e}")))
}

fn add_package(
    pkg: &ResolvedPackage,
    path: String,
    packages: &mut BTreeMap<String, serde_json::Value>,
    seen: &mut HashSet<String>,
) -> Result<(), PkgError> {
    if pkg.name.is_empty() || pkg.version.is_empty() {
        return Err(PkgError::lock_write_failed(
            "Invalid package: missing name or version",
        ));
    }
    if !seen.insert(path.clone()) {
        return Ok(());
    }

    packages.insert(path.clone(), entry_value(pkg));

    for dep in pkg.resolved_deps.values() {
        add_package(
            dep,
            format!("{path}/node_modules/{}", dep.name),
            packages,
            seen,
        )?;
    }
    Ok(())
}

fn entry_value(pkg: &ResolvedPackage) -> serde_json::Value {
    let mut entry = serde_json::json!({
        "name": pkg.name,
        "version": pkg.version,
        "resolved": pkg.tarball_url,
        "integrity": pkg.integrity,
    });
    if !pkg.dependencies.is_empty() {
        entry["dependencies"] = serde_json::json!(pkg.dependencies);
    }
    if !pkg.os.is_empty() {
        entry["os"] = serde_json::json!(pkg.os);
    }
    if !pkg.cpu.is_empty() {
        entry["cpu"] = serde_json::json!(pkg.cpu);
    }
    if let Some(bin) = &pkg.bin {
        entry["bin"] = serde_json::json!(bin);
    }
    entry
}
