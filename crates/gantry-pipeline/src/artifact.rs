//! Stage artifacts: the handoff between pipeline stages.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A named output of one stage, consumed by the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    /// Filesystem location: a file or a directory (source checkouts).
    pub path: PathBuf,
    /// Content identity. File artifacts use a sha256 of the bytes;
    /// the source artifact uses the checked-out revision.
    pub digest: String,
}

impl Artifact {
    pub fn new(name: &str, path: PathBuf, digest: String) -> Self {
        Self {
            name: name.to_string(),
            path,
            digest,
        }
    }

    /// Build a file artifact, digesting its contents.
    pub fn from_file(name: &str, path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            digest: sha256_hex(&bytes),
        })
    }

    /// Whether the artifact is still present on disk.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_artifact_digests_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.json");
        std::fs::write(&path, b"{}").unwrap();

        let artifact = Artifact::from_file("image", &path).unwrap();
        assert_eq!(artifact.digest, sha256_hex(b"{}"));
        assert!(artifact.exists());
    }

    #[test]
    fn same_bytes_same_digest() {
        assert_eq!(sha256_hex(b"abc"), sha256_hex(b"abc"));
        assert_ne!(sha256_hex(b"abc"), sha256_hex(b"abd"));
    }

    #[test]
    fn deleted_artifact_no_longer_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.txt");
        std::fs::write(&path, b"x").unwrap();
        let artifact = Artifact::from_file("x", &path).unwrap();

        std::fs::remove_file(&path).unwrap();
        assert!(!artifact.exists());
    }
}
