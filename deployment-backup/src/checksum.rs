//! Artifact checksums.
//!
//! A [`BackupChecksum`] maps a logical file name to its SHA-256 digest. The
//! local bundle and the remote instance each produce one for every artifact;
//! a copy is only trusted when both agree exactly.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupChecksum(BTreeMap<String, String>);

impl BackupChecksum {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, file: impl Into<String>, digest: impl Into<String>) {
        self.0.insert(file.into(), digest.into());
    }

    pub fn get(&self, file: &str) -> Option<&str> {
        self.0.get(file).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Same key set and the same digest under every key.
    pub fn matches(&self, other: &BackupChecksum) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        self.0
            .iter()
            .all(|(file, digest)| other.0.get(file) == Some(digest))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for BackupChecksum {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for BackupChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .0
            .iter()
            .map(|(file, digest)| format!("{}:{}", file, digest))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{{{}}}", entries)
    }
}

/// Hex SHA-256 of an in-memory buffer.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex SHA-256 of everything a reader yields, streamed in chunks.
pub async fn sha256_reader<R: AsyncRead + Unpin>(reader: R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut stream = ReaderStream::new(reader);
    while let Some(chunk) = stream.next().await {
        hasher.update(&chunk?);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hex SHA-256 of a file on disk.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let file = tokio::fs::File::open(path).await?;
    sha256_reader(file).await
}
