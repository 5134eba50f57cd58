//! `liffey install-lockfile` and `liffey install` command implementations.

use liffey_core::pkg::{
    generate_lockfile, hoist_dependencies, install_lockfile, read_manifest_specs,
    render_dep_tree, InstallOptions, InstallReport, RegistryClient, Resolver,
    DEFAULT_HTTP_PERMITS, LOCKFILE_NAME,
};
use miette::{IntoDiagnostic, Result, WrapErr};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

/// Environment variable naming the timing-profile output path.
pub const CPU_PROFILE_ENV: &str = "CPU_PROFILE";

/// Install `<dir>/package-lock.json` into `<dir>/node_modules`.
pub fn install_from_lockfile(dir: &Path) -> Result<()> {
    let options = InstallOptions::from_env();
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let report = runtime
        .block_on(install_lockfile(dir, &options))
        .into_diagnostic()?;

    write_cpu_profile(&report)?;
    println!(
        "Installed {} packages ({} skipped)",
        report.installed.len(),
        report.skipped_no_url.len() + report.skipped_os.len()
    );
    Ok(())
}

/// Resolve `<dir>/package.json`, write the lockfile, and install it.
pub fn resolve_and_install(dir: &Path) -> Result<()> {
    let specs = read_manifest_specs(dir).into_diagnostic()?;
    let registry = RegistryClient::from_env().into_diagnostic()?;

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let resolved = runtime
        .block_on(async {
            let resolver = Resolver::new(registry, Arc::new(Semaphore::new(DEFAULT_HTTP_PERMITS)));
            // The peer pass primes the memo, so the main resolve reuses
            // its fetches.
            resolver.report_unmet_peers(&specs).await?;
            resolver.resolve_all(&specs).await
        })
        .into_diagnostic()?;
    drop(runtime);

    let hoisted = hoist_dependencies(resolved);
    print!("{}", render_dep_tree(&hoisted));

    let lockfile = generate_lockfile(&hoisted).into_diagnostic()?;
    let lockfile_path = dir.join(LOCKFILE_NAME);
    std::fs::write(&lockfile_path, lockfile)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to write {}", lockfile_path.display()))?;
    info!(path = %lockfile_path.display(), "wrote lockfile");

    install_from_lockfile(dir)
}

/// When `CPU_PROFILE` is set, write the run's timing profile there.
fn write_cpu_profile(report: &InstallReport) -> Result<()> {
    let Ok(path) = std::env::var(CPU_PROFILE_ENV) else {
        return Ok(());
    };
    let profile = serde_json::to_string_pretty(report).into_diagnostic()?;
    std::fs::write(&path, profile)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to write CPU profile to {path}"))?;
    info!(path, "wrote install timing profile");
    Ok(())
}
