//! Package installer functionality.
//!
//! Provides:
//! - Lockfile ingestion and install planning
//! - Concurrent tarball download with streaming integrity verification
//!   and tar extraction
//! - Bin shim placement in `node_modules/.bin`
//! - Registry metadata fetching and semver range matching
//! - Memoized recursive dependency resolution, hoisting, and lockfile
//!   generation

pub mod bins;
pub mod error;
pub mod fetch;
pub mod hoist;
pub mod install;
pub mod integrity;
pub mod lockfile;
pub mod registry;
pub mod resolve;
pub mod spec;
pub mod tarball;
pub mod tree;
pub mod version;

#[cfg(test)]
mod testutil;

pub use bins::install_bin_shims;
pub use error::{codes as pkg_codes, PkgError};
pub use fetch::{fetch_and_extract, FetchContext};
pub use hoist::hoist_dependencies;
pub use install::{
    install_lockfile, install_plan, npm_arch, npm_os, InstallOptions, InstallReport,
    DEFAULT_HTTP_PERMITS, TAR_WORKERS_ENV,
};
pub use integrity::{verify_digest, IntegrityDigest};
pub use lockfile::{BinField, InstallPlan, LockEntry, LOCKFILE_NAME};
pub use registry::{Packument, RegistryClient, DEFAULT_REGISTRY, REGISTRY_ENV};
pub use resolve::{
    generate_lockfile, read_manifest_specs, ResolvedPackage, Resolver,
};
pub use spec::PackageSpec;
pub use tarball::extract_tar_gz;
pub use tree::render_dep_tree;
pub use version::matching_versions;
