//! Streaming integrity verification for downloaded tarballs.
//!
//! npm integrity tags look like `sha512-<base64>` where the base64 tail is
//! the raw digest of the tarball bytes. The digest is fed incrementally as
//! the response body streams through, so verification adds no extra pass
//! over the data.

use super::error::PkgError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::Sha1;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

/// Incremental digest selected from an integrity tag's algorithm prefix.
#[derive(Debug)]
pub enum IntegrityDigest {
    Sha1(Box<Sha1>),
    Sha512(Box<Sha512>),
}

impl IntegrityDigest {
    /// Select a digest implementation from the tag's `<alg>-` prefix.
    ///
    /// # Errors
    /// Returns `PKG_INTEGRITY_UNSUPPORTED` for any algorithm other than
    /// `sha1` or `sha512`.
    pub fn for_tag(tag: &str) -> Result<Self, PkgError> {
        if tag.starts_with("sha1-") {
            Ok(Self::Sha1(Box::new(Sha1::new())))
        } else if tag.starts_with("sha512-") {
            Ok(Self::Sha512(Box::new(Sha512::new())))
        } else {
            Err(PkgError::integrity_unsupported(tag))
        }
    }

    /// Feed a chunk of the byte stream into the digest.
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(bytes),
            Self::Sha512(h) => h.update(bytes),
        }
    }

    /// Consume the digest and return the raw hash bytes.
    #[must_use]
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Compare a computed digest against an integrity tag.
///
/// The tag's base64 tail is decoded and compared in constant time against
/// the digest bytes.
///
/// # Errors
/// Returns `PKG_INTEGRITY_MALFORMED` if the tail is not valid base64, and
/// `PKG_INTEGRITY_MISMATCH` if the digests differ.
pub fn verify_digest(tag: &str, actual: &[u8]) -> Result<(), PkgError> {
    let encoded = match tag.split_once('-') {
        Some((_, tail)) => tail,
        None => "",
    };

    let expected = BASE64
        .decode(encoded)
        .map_err(|e| PkgError::integrity_malformed(format!("Invalid integrity hash: {e}")))?;

    if bool::from(expected.ct_eq(actual)) {
        Ok(())
    } else {
        Err(PkgError::integrity_mismatch("integrity check failed"))
    }
}
