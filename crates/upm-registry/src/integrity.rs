//! Archive checksums and integrity digests.
//!
//! Every archive carries two digests of the same bytes: a SHA-1 `shasum`
//! (lowercase hex) and a stronger SHA-512 `integrity` string in
//! subresource-integrity form (`sha512-<base64>`).

use std::io::Read;
use std::path::Path;

use base64::Engine;
use sha1::Sha1;
use sha2::{Digest, Sha512};

/// Prefix of integrity strings produced by this crate.
pub const INTEGRITY_PREFIX: &str = "sha512-";

/// The pair of digests recorded for an archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveDigests {
    /// SHA-1 hex digest.
    pub shasum: String,
    /// SHA-512 subresource-integrity string.
    pub integrity: String,
}

impl ArchiveDigests {
    /// Compute both digests over an in-memory buffer.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = DualHasher::default();
        hasher.update(data);
        hasher.finish()
    }

    /// Compute both digests by streaming a file from disk.
    pub fn compute_file(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = DualHasher::default();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finish())
    }

    /// Verify that the given data matches both digests.
    pub fn verify(&self, data: &[u8]) -> bool {
        ArchiveDigests::compute(data) == *self
    }
}

impl std::fmt::Display for ArchiveDigests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.shasum, self.integrity)
    }
}

#[derive(Default)]
struct DualHasher {
    sha1: Sha1,
    sha512: Sha512,
}

impl DualHasher {
    fn update(&mut self, data: &[u8]) {
        self.sha1.update(data);
        self.sha512.update(data);
    }

    fn finish(self) -> ArchiveDigests {
        let shasum = hex::encode(self.sha1.finalize());
        let encoded = base64::engine::general_purpose::STANDARD.encode(self.sha512.finalize());
        ArchiveDigests {
            shasum,
            integrity: format!("{INTEGRITY_PREFIX}{encoded}"),
        }
    }
}

/// Compute only the SHA-1 hex digest of a file, as stored in attachments.
pub fn shasum_file(path: &Path) -> std::io::Result<String> {
    ArchiveDigests::compute_file(path).map(|d| d.shasum)
}
