//! Installer error types.

use std::fmt;
use std::io;

/// Installer error codes.
pub mod codes {
    pub const PKG_LOCK_NOT_FOUND: &str = "PKG_LOCK_NOT_FOUND";
    pub const PKG_LOCK_INVALID_JSON: &str = "PKG_LOCK_INVALID_JSON";
    pub const PKG_LOCK_WRITE_FAILED: &str = "PKG_LOCK_WRITE_FAILED";
    pub const PKG_DOWNLOAD_FAILED: &str = "PKG_DOWNLOAD_FAILED";
    pub const PKG_DOWNLOAD_STATUS: &str = "PKG_DOWNLOAD_STATUS";
    pub const PKG_INTEGRITY_UNSUPPORTED: &str = "PKG_INTEGRITY_UNSUPPORTED";
    pub const PKG_INTEGRITY_MALFORMED: &str = "PKG_INTEGRITY_MALFORMED";
    pub const PKG_INTEGRITY_MISMATCH: &str = "PKG_INTEGRITY_MISMATCH";
    pub const PKG_EXTRACT_FAILED: &str = "PKG_EXTRACT_FAILED";
    pub const PKG_REGISTRY_ERROR: &str = "PKG_REGISTRY_ERROR";
    pub const PKG_METADATA_INCOMPLETE: &str = "PKG_METADATA_INCOMPLETE";
    pub const PKG_VERSION_NOT_FOUND: &str = "PKG_VERSION_NOT_FOUND";
    pub const PKG_SPEC_INVALID: &str = "PKG_SPEC_INVALID";
    pub const PKG_PACKAGE_JSON_NOT_FOUND: &str = "PKG_PACKAGE_JSON_NOT_FOUND";
    pub const PKG_PACKAGE_JSON_INVALID: &str = "PKG_PACKAGE_JSON_INVALID";
    pub const NODE_MODULES_WRITE_FAILED: &str = "NODE_MODULES_WRITE_FAILED";
}

/// Installer error: a stable code plus a human-readable message.
#[derive(Debug, Clone)]
pub struct PkgError {
    code: &'static str,
    message: String,
}

impl PkgError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Lockfile missing at the expected path.
    pub fn lock_not_found(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_LOCK_NOT_FOUND, msg)
    }

    /// Lockfile exists but is not valid JSON (or not the expected shape).
    pub fn lock_invalid_json(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_LOCK_INVALID_JSON, msg)
    }

    /// Generated lockfile could not be serialized or written.
    pub fn lock_write_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_LOCK_WRITE_FAILED, msg)
    }

    /// Tarball download failed before a response arrived.
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_DOWNLOAD_FAILED, msg)
    }

    /// Tarball download returned a non-success status.
    pub fn download_status(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_DOWNLOAD_STATUS, msg)
    }

    /// Integrity tag names an algorithm we do not implement.
    pub fn integrity_unsupported(tag: &str) -> Self {
        Self::new(
            codes::PKG_INTEGRITY_UNSUPPORTED,
            format!("Unsupported integrity check: {tag}"),
        )
    }

    /// Integrity tag's digest is not valid base64.
    pub fn integrity_malformed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_INTEGRITY_MALFORMED, msg)
    }

    /// Computed digest does not match the integrity tag.
    pub fn integrity_mismatch(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_INTEGRITY_MISMATCH, msg)
    }

    /// I/O or format failure while walking a tarball.
    pub fn extract_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_EXTRACT_FAILED, msg)
    }

    /// Registry request failed or returned a non-success status.
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_REGISTRY_ERROR, msg)
    }

    /// Registry metadata is missing a tarball URL or integrity hash.
    pub fn metadata_incomplete(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_METADATA_INCOMPLETE, msg)
    }

    /// Range is neither a satisfiable semver range nor a known dist-tag.
    #[must_use]
    pub fn version_not_found(name: &str, range: &str) -> Self {
        Self::new(
            codes::PKG_VERSION_NOT_FOUND,
            format!("No version of {name} satisfies '{range}'"),
        )
    }

    /// Package spec or version range could not be parsed.
    pub fn spec_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_SPEC_INVALID, msg)
    }

    /// `package.json` missing at the expected path.
    #[must_use]
    pub fn package_json_not_found(path: &std::path::Path) -> Self {
        Self::new(
            codes::PKG_PACKAGE_JSON_NOT_FOUND,
            format!("package.json not found: {}", path.display()),
        )
    }

    /// `package.json` exists but could not be parsed.
    pub fn package_json_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_PACKAGE_JSON_INVALID, msg)
    }

    /// `node_modules` could not be cleaned or created.
    pub fn node_modules_write_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::NODE_MODULES_WRITE_FAILED, msg)
    }
}

impl fmt::Display for PkgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PkgError {}

impl From<io::Error> for PkgError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::PKG_EXTRACT_FAILED, e.to_string())
    }
}
