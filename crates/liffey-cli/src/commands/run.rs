//! `liffey run` command implementation.

use miette::{miette, Result};
use std::path::Path;
use std::process::Command;
use tracing::info;

/// Execute `<dir>/node_modules/.bin/<script>` with forwarded stdio,
/// exiting with the child's exit code.
pub fn run(dir: &Path, script: &str, args: &[String]) -> Result<()> {
    // Project-relative path, resolved inside the child's working
    // directory so shim-relative symlinks keep working.
    let script_path = Path::new("./node_modules/.bin").join(script);

    info!(script, ?args, cwd = %dir.display(), "running script");

    let status = Command::new(&script_path)
        .args(args)
        .current_dir(dir)
        .status()
        .map_err(|e| miette!("Error executing script '{script}': {e}"))?;

    std::process::exit(status.code().unwrap_or(1));
}
