//! Install orchestration: lockfile in, `node_modules` out.
//!
//! The orchestrator rebuilds `node_modules` from scratch each run, fans
//! the plan out as one fetch-extract task per package, and cancels the
//! whole group on the first failure. Bin shims are placed only after
//! every task has completed.

use super::bins::install_bin_shims;
use super::error::PkgError;
use super::fetch::{fetch_and_extract, FetchContext};
use super::lockfile::{InstallPlan, LOCKFILE_NAME};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Default bound on concurrent tarball downloads.
pub const DEFAULT_HTTP_PERMITS: usize = 64;

/// Environment variable overriding the extraction bound.
pub const TAR_WORKERS_ENV: &str = "TAR_WORKERS";

/// Concurrency knobs for an install run.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub http_permits: usize,
    pub extract_permits: usize,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            http_permits: DEFAULT_HTTP_PERMITS,
            extract_permits: default_extract_permits(),
        }
    }
}

impl InstallOptions {
    /// Build options from the environment.
    ///
    /// `TAR_WORKERS` accepts a positive float; anything else falls back to
    /// the default with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        let default = default_extract_permits();
        let extract_permits = match std::env::var(TAR_WORKERS_ENV) {
            Ok(raw) => match raw.trim().parse::<f64>() {
                Ok(v) if v > 0.0 => {
                    info!(tar_workers = v, "using custom TAR_WORKERS value");
                    v.ceil() as usize
                }
                _ => {
                    warn!(value = %raw, default, "invalid TAR_WORKERS value, using default");
                    default
                }
            },
            Err(_) => default,
        };

        Self {
            http_permits: DEFAULT_HTTP_PERMITS,
            extract_permits,
        }
    }
}

/// Extraction permits default to 1.5x the logical CPU count.
fn default_extract_permits() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    ((cpus as f64) * 1.5).ceil() as usize
}

/// Host OS in npm's naming (`process.platform`).
#[must_use]
pub fn npm_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

/// Host architecture in npm's naming (`process.arch`).
#[must_use]
pub fn npm_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        other => other,
    }
}

/// Timing for one installed package.
#[derive(Debug, Clone, Serialize)]
pub struct PackageTiming {
    pub package: String,
    pub ms: u64,
}

/// Summary of an install run, also serialized as the `CPU_PROFILE` output.
#[derive(Debug, Default, Serialize)]
pub struct InstallReport {
    pub installed: Vec<PackageTiming>,
    pub skipped_no_url: Vec<String>,
    pub skipped_os: Vec<String>,
    pub total_ms: u64,
}

enum UnitOutcome {
    Installed(PackageTiming),
    SkippedNoUrl(String),
    SkippedOs(String),
}

/// Install `<project_dir>/package-lock.json` into
/// `<project_dir>/node_modules`.
///
/// # Errors
/// `PKG_LOCK_NOT_FOUND` / `PKG_LOCK_INVALID_JSON` for lockfile problems,
/// plus any unit failure, which cancels the remaining units.
pub async fn install_lockfile(
    project_dir: &Path,
    options: &InstallOptions,
) -> Result<InstallReport, PkgError> {
    let lockfile_path = project_dir.join(LOCKFILE_NAME);
    let contents = fs::read_to_string(&lockfile_path).map_err(|e| {
        PkgError::lock_not_found(format!("Error reading {}: {e}", lockfile_path.display()))
    })?;
    let plan = InstallPlan::parse(&contents)?;
    install_plan(&plan, &project_dir.join("node_modules"), options).await
}

/// Materialize an already-derived plan into `node_modules`.
///
/// # Errors
/// Any unit failure aborts the run; see [`install_lockfile`].
pub async fn install_plan(
    plan: &InstallPlan,
    node_modules: &Path,
    options: &InstallOptions,
) -> Result<InstallReport, PkgError> {
    let started = Instant::now();

    clean_node_modules(node_modules)?;
    fs::create_dir_all(node_modules.join(".bin")).map_err(|e| {
        PkgError::node_modules_write_failed(format!("Error creating node_modules: {e}"))
    })?;

    let ctx = FetchContext::new(options.http_permits, options.extract_permits)?;
    let host_os = npm_os();

    info!(packages = plan.packages.len(), "downloading packages");

    let mut units: JoinSet<Result<UnitOutcome, PkgError>> = JoinSet::new();
    for (path, entry) in &plan.packages {
        let ctx = ctx.clone();
        let path = path.clone();
        let entry = entry.clone();
        let node_modules = node_modules.to_path_buf();

        units.spawn(async move {
            let Some(url) = entry.resolved.filter(|u| !u.is_empty()) else {
                info!(package = %path, "skipping: no download URL");
                return Ok(UnitOutcome::SkippedNoUrl(path));
            };

            if !entry.os.is_empty() && !entry.os.iter().any(|os| os == host_os) {
                info!(package = %path, host_os, "skipping: not compatible with host OS");
                return Ok(UnitOutcome::SkippedOs(path));
            }

            // Scoped names create their @scope/ parent here.
            let dest = node_modules.join(&path);
            fs::create_dir_all(&dest).map_err(|e| {
                PkgError::node_modules_write_failed(format!(
                    "Error creating directory for {path}: {e}"
                ))
            })?;

            let integrity = entry.integrity.unwrap_or_default();
            let unit_started = Instant::now();
            fetch_and_extract(&ctx, &url, &integrity, &dest)
                .await
                .map_err(|e| PkgError::new(e.code(), format!("{path}: {}", e.message())))?;

            Ok(UnitOutcome::Installed(PackageTiming {
                package: path,
                ms: unit_started.elapsed().as_millis() as u64,
            }))
        });
    }

    let mut report = InstallReport::default();
    while let Some(joined) = units.join_next().await {
        match joined {
            Ok(Ok(UnitOutcome::Installed(timing))) => report.installed.push(timing),
            Ok(Ok(UnitOutcome::SkippedNoUrl(path))) => report.skipped_no_url.push(path),
            Ok(Ok(UnitOutcome::SkippedOs(path))) => report.skipped_os.push(path),
            Ok(Err(e)) => {
                units.abort_all();
                while units.join_next().await.is_some() {}
                return Err(e);
            }
            Err(join_err) => {
                if join_err.is_cancelled() {
                    continue;
                }
                units.abort_all();
                while units.join_next().await.is_some() {}
                return Err(PkgError::extract_failed(format!(
                    "Install task failed: {join_err}"
                )));
            }
        }
    }

    install_bin_shims(plan, node_modules)?;

    report.installed.sort_by(|a, b| a.package.cmp(&b.package));
    report.skipped_no_url.sort();
    report.skipped_os.sort();
    report.total_ms = started.elapsed().as_millis() as u64;

    info!(
        installed = report.installed.len(),
        skipped = report.skipped_no_url.len() + report.skipped_os.len(),
        total_ms = report.total_ms,
        "installation complete"
    );

    Ok(report)
}

/// Remove any pre-existing `node_modules` tree.
fn clean_node_modules(node_modules: &Path) -> Result<(), PkgError> {
    if let Ok(meta) = fs::symlink_metadata(node_modules) {
        info!(path = %node_modules.display(), "removing existing node_modules");
        let removed = if meta.is_dir() {
            fs::remove_dir_all(node_modules)
        } else {
            fs::remove_file(node_modules)
        };
        removed.map_err(|e| {
            PkgError::node_modules_write_failed(format!("Error cleaning node_modules: {e}"))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::error::codes;
    use crate::pkg::testutil::{gzipped_tarball, integrity_for, FixtureServer};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::tempdir;

    fn options(http: usize, tar: usize) -> InstallOptions {
        InstallOptions {
            http_permits: http,
            extract_permits: tar,
        }
    }

    /// Register a tarball route and return its lockfile entry JSON.
    fn fixture_package(
        server: &FixtureServer,
        name: &str,
        files: &[(&str, &str)],
        extra: serde_json::Value,
    ) -> serde_json::Value {
        let tarball = gzipped_tarball(files);
        let integrity = integrity_for(&tarball);
        let route = format!("/tarballs/{}.tgz", name.replace('/', "-"));
        server.route(&route, 200, tarball);

        let mut entry = serde_json::json!({
            "version": "1.0.0",
            "resolved": server.url(&route),
            "integrity": integrity,
        });
        if let Some(extra) = extra.as_object() {
            for (k, v) in extra {
                entry[k] = v.clone();
            }
        }
        entry
    }

    fn write_lockfile(dir: &Path, packages: &BTreeMap<String, serde_json::Value>) {
        let mut map = serde_json::Map::new();
        map.insert(String::new(), serde_json::json!({"name": "fixture-project"}));
        for (name, entry) in packages {
            map.insert(format!("node_modules/{name}"), entry.clone());
        }
        let doc = serde_json::json!({
            "name": "fixture-project",
            "version": "1.0.0",
            "lockfileVersion": 3,
            "packages": map,
        });
        fs::write(
            dir.join(LOCKFILE_NAME),
            serde_json::to_string_pretty(&doc).unwrap(),
        )
        .unwrap();
    }

    /// Collect (relative path, contents) of every file under a directory.
    fn snapshot_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
        fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
            for entry in fs::read_dir(dir).unwrap() {
                let entry = entry.unwrap();
                let path = entry.path();
                let file_type = entry.file_type().unwrap();
                if file_type.is_dir() {
                    walk(root, &path, out);
                } else {
                    let rel = path.strip_prefix(root).unwrap().display().to_string();
                    let contents = if file_type.is_symlink() {
                        fs::read_link(&path).unwrap().display().to_string().into_bytes()
                    } else {
                        fs::read(&path).unwrap()
                    };
                    out.insert(rel, contents);
                }
            }
        }
        let mut out = BTreeMap::new();
        walk(root, root, &mut out);
        out
    }

    #[tokio::test]
    async fn test_install_lockfile_round_trip() {
        let server = FixtureServer::start().await;
        let mut packages = BTreeMap::new();
        packages.insert(
            "is-odd".to_string(),
            fixture_package(
                &server,
                "is-odd",
                &[
                    ("package/package.json", r#"{"name": "is-odd", "version": "3.0.1"}"#),
                    ("package/index.js", "module.exports = n => n % 2 === 1;"),
                    ("package/LICENSE", "MIT"),
                    ("package/README.md", "# is-odd"),
                ],
                serde_json::json!({"version": "3.0.1"}),
            ),
        );
        packages.insert(
            "@scope/pkg".to_string(),
            fixture_package(&server, "@scope/pkg", &[("package/index.js", "ok")], serde_json::json!({})),
        );

        let dir = tempdir().unwrap();
        write_lockfile(dir.path(), &packages);

        let report = install_lockfile(dir.path(), &options(4, 2)).await.unwrap();
        assert_eq!(report.installed.len(), 2);

        let nm = dir.path().join("node_modules");
        for file in ["package.json", "index.js", "LICENSE", "README.md"] {
            assert!(nm.join("is-odd").join(file).exists(), "missing {file}");
        }
        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(nm.join("is-odd/package.json")).unwrap())
                .unwrap();
        assert_eq!(manifest["name"], "is-odd");

        // Scoped package lands under @scope/pkg, not an encoded name.
        assert!(nm.join("@scope/pkg/index.js").exists());
        assert!(!nm.join("@scope%2Fpkg").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_places_relative_bin_shims() {
        let server = FixtureServer::start().await;
        let mut packages = BTreeMap::new();
        packages.insert(
            "is-odd".to_string(),
            fixture_package(
                &server,
                "is-odd",
                &[
                    ("package/package.json", r#"{"name": "is-odd"}"#),
                    ("package/cli.js", "#!/usr/bin/env node\n"),
                ],
                serde_json::json!({"bin": {"is-odd": "cli.js"}}),
            ),
        );

        let dir = tempdir().unwrap();
        write_lockfile(dir.path(), &packages);
        install_lockfile(dir.path(), &options(4, 2)).await.unwrap();

        use std::os::unix::fs::PermissionsExt;
        let nm = dir.path().join("node_modules");
        let link = nm.join(".bin/is-odd");
        let target = fs::read_link(&link).unwrap();
        assert!(target.is_relative());
        assert_eq!(target, std::path::PathBuf::from("../is-odd/cli.js"));

        let mode = fs::metadata(nm.join("is-odd/cli.js")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let server = FixtureServer::start().await;
        let mut packages = BTreeMap::new();
        packages.insert(
            "left-pad".to_string(),
            fixture_package(
                &server,
                "left-pad",
                &[("package/index.js", "module.exports = String.prototype.padStart;")],
                serde_json::json!({}),
            ),
        );

        let dir = tempdir().unwrap();
        write_lockfile(dir.path(), &packages);

        install_lockfile(dir.path(), &options(4, 2)).await.unwrap();
        let first = snapshot_tree(&dir.path().join("node_modules"));

        install_lockfile(dir.path(), &options(4, 2)).await.unwrap();
        let second = snapshot_tree(&dir.path().join("node_modules"));

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_os_filtered_entry_is_not_materialized_or_fetched() {
        let server = FixtureServer::start().await;
        let mut packages = BTreeMap::new();
        packages.insert(
            "wincred".to_string(),
            fixture_package(
                &server,
                "wincred",
                &[("package/index.js", "x")],
                serde_json::json!({"os": ["win32"], "optional": true}),
            ),
        );
        packages.insert(
            "plain".to_string(),
            fixture_package(&server, "plain", &[("package/index.js", "y")], serde_json::json!({})),
        );

        let dir = tempdir().unwrap();
        write_lockfile(dir.path(), &packages);
        let report = install_lockfile(dir.path(), &options(4, 2)).await.unwrap();

        assert_eq!(report.skipped_os, vec!["wincred".to_string()]);
        assert!(!dir.path().join("node_modules/wincred").exists());
        assert_eq!(server.hit_count("/tarballs/wincred.tgz"), 0);
        assert_eq!(server.hit_count("/tarballs/plain.tgz"), 1);
    }

    #[tokio::test]
    async fn test_entry_without_url_is_skipped() {
        let server = FixtureServer::start().await;
        let mut packages = BTreeMap::new();
        packages.insert("phantom".to_string(), serde_json::json!({"version": "1.0.0"}));
        packages.insert(
            "plain".to_string(),
            fixture_package(&server, "plain", &[("package/index.js", "y")], serde_json::json!({})),
        );

        let dir = tempdir().unwrap();
        write_lockfile(dir.path(), &packages);
        let report = install_lockfile(dir.path(), &options(4, 2)).await.unwrap();

        assert_eq!(report.skipped_no_url, vec!["phantom".to_string()]);
        assert!(!dir.path().join("node_modules/phantom").exists());
    }

    #[tokio::test]
    async fn test_integrity_mismatch_fails_the_install() {
        let server = FixtureServer::start().await;
        let tarball = gzipped_tarball(&[("package/index.js", "x")]);
        server.route("/tarballs/bad.tgz", 200, tarball);

        let mut packages = BTreeMap::new();
        packages.insert(
            "bad".to_string(),
            serde_json::json!({
                "version": "1.0.0",
                "resolved": server.url("/tarballs/bad.tgz"),
                // Valid base64, but the digest of different bytes.
                "integrity": integrity_for(b"garbage digest bytes"),
            }),
        );

        let dir = tempdir().unwrap();
        write_lockfile(dir.path(), &packages);
        let err = install_lockfile(dir.path(), &options(4, 2)).await.unwrap_err();
        assert_eq!(err.code(), codes::PKG_INTEGRITY_MISMATCH);
    }

    #[tokio::test]
    async fn test_missing_lockfile() {
        let dir = tempdir().unwrap();
        let err = install_lockfile(dir.path(), &options(4, 2)).await.unwrap_err();
        assert_eq!(err.code(), codes::PKG_LOCK_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_http_semaphore_bounds_concurrency() {
        let server = FixtureServer::start().await;
        let mut packages = BTreeMap::new();
        for i in 0..8 {
            let name = format!("pkg{i}");
            let tarball = gzipped_tarball(&[("package/index.js", "x")]);
            let integrity = integrity_for(&tarball);
            let route = format!("/tarballs/{name}.tgz");
            server.route_with_delay(&route, 200, tarball, Duration::from_millis(40));
            packages.insert(
                name,
                serde_json::json!({
                    "version": "1.0.0",
                    "resolved": server.url(&route),
                    "integrity": integrity,
                }),
            );
        }

        let dir = tempdir().unwrap();
        write_lockfile(dir.path(), &packages);
        install_lockfile(dir.path(), &options(2, 2)).await.unwrap();

        assert!(
            server.max_in_flight() <= 2,
            "saw {} concurrent requests with 2 permits",
            server.max_in_flight()
        );
    }

    #[tokio::test]
    async fn test_first_failure_cancels_siblings() {
        let server = FixtureServer::start().await;
        let mut packages = BTreeMap::new();
        for i in 0..16 {
            let name = format!("pkg{i:02}");
            // Every route 404s, so the first unit to run fails the group.
            packages.insert(
                name.clone(),
                serde_json::json!({
                    "version": "1.0.0",
                    "resolved": server.url(&format!("/tarballs/{name}.tgz")),
                    "integrity": "sha512-AAAA",
                }),
            );
        }

        let dir = tempdir().unwrap();
        write_lockfile(dir.path(), &packages);
        let err = install_lockfile(dir.path(), &options(1, 1)).await.unwrap_err();
        assert_eq!(err.code(), codes::PKG_DOWNLOAD_STATUS);

        // Siblings were aborted before issuing their requests.
        assert!(
            server.total_hits() < 16,
            "expected cancellation to stop further requests, saw {}",
            server.total_hits()
        );
    }

    #[test]
    fn test_npm_platform_names() {
        // Rust platform names that differ from npm's must be mapped.
        assert_ne!(npm_os(), "macos");
        assert_ne!(npm_os(), "windows");
        assert_ne!(npm_arch(), "x86_64");
        assert_ne!(npm_arch(), "aarch64");
    }
}
