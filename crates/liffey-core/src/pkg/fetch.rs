//! Per-package fetch–verify–extract unit.
//!
//! Each unit acquires an HTTP slot, downloads its tarball, and streams the
//! body straight into the tar extractor under a separate extraction slot.
//! There is no intermediate buffering: response chunks flow through a
//! bounded channel into a blocking extraction task, and the integrity
//! digest is computed on the bytes as the extractor consumes them.

use super::error::PkgError;
use super::integrity::{verify_digest, IntegrityDigest};
use super::tarball::extract_tar_gz;
use bytes::{Buf, Bytes};
use futures::StreamExt;
use reqwest::Client;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

/// Whole-request timeout for a tarball download, body included.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Chunks in flight between the download stream and the extractor.
const CHUNK_CHANNEL_CAPACITY: usize = 16;

/// Shared state for all fetch-extract units of one install run.
#[derive(Clone)]
pub struct FetchContext {
    pub client: Client,
    /// Bounds concurrent downloads, held from request through body end.
    pub http_slots: Arc<Semaphore>,
    /// Bounds concurrent tar walks.
    pub extract_slots: Arc<Semaphore>,
}

impl FetchContext {
    /// Build a context with the given semaphore bounds.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(http_permits: usize, extract_permits: usize) -> Result<Self, PkgError> {
        let client = Client::builder()
            .user_agent(concat!("liffey/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PkgError::download_failed(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            http_slots: Arc::new(Semaphore::new(http_permits)),
            extract_slots: Arc::new(Semaphore::new(extract_permits)),
        })
    }
}

/// Download `url`, extract it into `dest`, and verify `integrity`.
///
/// The download holds an HTTP slot for its whole duration; the tar walk
/// additionally holds an extraction slot. Digest comparison happens after
/// the extractor finishes and its slot is released, and a mismatch is
/// fatal regardless of extraction success.
///
/// # Errors
/// `PKG_DOWNLOAD_FAILED`, `PKG_DOWNLOAD_STATUS`,
/// `PKG_INTEGRITY_UNSUPPORTED`, `PKG_EXTRACT_FAILED`,
/// `PKG_INTEGRITY_MALFORMED`, or `PKG_INTEGRITY_MISMATCH`.
pub async fn fetch_and_extract(
    ctx: &FetchContext,
    url: &str,
    integrity: &str,
    dest: &Path,
) -> Result<(), PkgError> {
    let _http_slot = ctx
        .http_slots
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| PkgError::download_failed(format!("HTTP slot unavailable: {e}")))?;

    debug!(url, "downloading");
    let response = ctx
        .client
        .get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await
        .map_err(|e| PkgError::download_failed(format!("Error downloading {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(PkgError::download_status(format!(
            "Download of {url} failed with status {}",
            response.status().as_u16()
        )));
    }

    let digest = IntegrityDigest::for_tag(integrity)?;

    let extract_slot = ctx
        .extract_slots
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| PkgError::extract_failed(format!("Extraction slot unavailable: {e}")))?;

    debug!(dest = %dest.display(), "extracting");
    let (tx, rx) = mpsc::channel::<Bytes>(CHUNK_CHANNEL_CAPACITY);
    let dest = dest.to_path_buf();
    let extractor = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, PkgError> {
        let mut reader = DigestReader {
            inner: ChunkReader {
                rx,
                current: Bytes::new(),
            },
            digest,
        };
        extract_tar_gz(&mut reader, &dest)?;
        // Hash whatever trails the end-of-archive marker so the digest
        // covers the full body.
        io::copy(&mut reader, &mut io::sink())
            .map_err(|e| PkgError::extract_failed(format!("Failed to drain stream: {e}")))?;
        Ok(reader.digest.finalize())
    });

    let mut stream = response.bytes_stream();
    let mut stream_error = None;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if tx.send(bytes).await.is_err() {
                    // Extractor stopped reading; its join result explains why.
                    break;
                }
            }
            Err(e) => {
                stream_error = Some(PkgError::download_failed(format!(
                    "Error downloading {url}: {e}"
                )));
                break;
            }
        }
    }
    drop(tx);

    let extract_result = extractor
        .await
        .map_err(|e| PkgError::extract_failed(format!("Extractor task failed: {e}")))?;

    // A body that died mid-stream is the root cause; report it over the
    // truncation error the extractor saw.
    if let Some(err) = stream_error {
        return Err(err);
    }
    let actual = extract_result?;
    drop(extract_slot);

    verify_digest(integrity, &actual)
}

/// Blocking `Read` over the chunk channel feeding the extractor.
struct ChunkReader {
    rx: mpsc::Receiver<Bytes>,
    current: Bytes,
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while !self.current.has_remaining() {
            match self.rx.blocking_recv() {
                Some(chunk) => self.current = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.remaining());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

/// Tee that digests every byte its consumer reads.
struct DigestReader<R> {
    inner: R,
    digest: IntegrityDigest,
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.digest.update(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::error::codes;
    use crate::pkg::testutil::{gzipped_tarball, integrity_for, FixtureServer};
    use tempfile::tempdir;

    fn test_ctx() -> FetchContext {
        FetchContext::new(4, 2).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_extract_verify_round_trip() {
        let tarball = gzipped_tarball(&[("package/package.json", "{}"), ("package/index.js", "ok")]);
        let integrity = integrity_for(&tarball);
        let server = FixtureServer::start().await;
        server.route("/pkg.tgz", 200, tarball);

        let dir = tempdir().unwrap();
        let dest = dir.path().join("pkg");
        fetch_and_extract(&test_ctx(), &server.url("/pkg.tgz"), &integrity, &dest)
            .await
            .unwrap();

        assert!(dest.join("package.json").exists());
        assert_eq!(std::fs::read_to_string(dest.join("index.js")).unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_fetch_integrity_mismatch_is_fatal() {
        let tarball = gzipped_tarball(&[("package/index.js", "ok")]);
        // Valid base64, wrong digest.
        let wrong = integrity_for(b"different bytes entirely");
        let server = FixtureServer::start().await;
        server.route("/pkg.tgz", 200, tarball);

        let dir = tempdir().unwrap();
        let dest = dir.path().join("pkg");
        let err = fetch_and_extract(&test_ctx(), &server.url("/pkg.tgz"), &wrong, &dest)
            .await
            .unwrap_err();

        assert_eq!(err.code(), codes::PKG_INTEGRITY_MISMATCH);
        // No rollback: extracted contents stay on disk.
        assert!(dest.join("index.js").exists());
    }

    #[tokio::test]
    async fn test_fetch_unsupported_integrity() {
        let tarball = gzipped_tarball(&[("package/index.js", "ok")]);
        let server = FixtureServer::start().await;
        server.route("/pkg.tgz", 200, tarball);

        let dir = tempdir().unwrap();
        let err = fetch_and_extract(
            &test_ctx(),
            &server.url("/pkg.tgz"),
            "md5-AAAA",
            &dir.path().join("pkg"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), codes::PKG_INTEGRITY_UNSUPPORTED);
    }

    #[tokio::test]
    async fn test_fetch_http_status_error() {
        let server = FixtureServer::start().await;
        server.route("/present.tgz", 200, vec![]);

        let dir = tempdir().unwrap();
        let err = fetch_and_extract(
            &test_ctx(),
            &server.url("/missing.tgz"),
            "sha512-AAAA",
            &dir.path().join("pkg"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), codes::PKG_DOWNLOAD_STATUS);
    }

    #[tokio::test]
    async fn test_fetch_connection_error() {
        let dir = tempdir().unwrap();
        // Nothing listens on port 1.
        let err = fetch_and_extract(
            &test_ctx(),
            "http://127.0.0.1:1/pkg.tgz",
            "sha512-AAAA",
            &dir.path().join("pkg"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), codes::PKG_DOWNLOAD_FAILED);
    }

    #[tokio::test]
    async fn test_fetch_corrupt_gzip_is_extract_error() {
        let server = FixtureServer::start().await;
        server.route("/pkg.tgz", 200, b"this is not gzip".to_vec());
        let integrity = integrity_for(b"this is not gzip");

        let dir = tempdir().unwrap();
        let err = fetch_and_extract(
            &test_ctx(),
            &server.url("/pkg.tgz"),
            &integrity,
            &dir.path().join("pkg"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), codes::PKG_EXTRACT_FAILED);
    }
}
