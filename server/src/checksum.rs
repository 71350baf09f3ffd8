//! MD5 digests of content files that every client must match.

use std::path::{Path, PathBuf};

use log::{debug, info};
use md5::{Digest, Md5};
use protocol::packets::{ChecksumPacket, MD5_DIGEST_LEN};

use crate::error::Result;

pub fn md5_digest(bytes: &[u8]) -> [u8; MD5_DIGEST_LEN] {
    Md5::digest(bytes).into()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    pub path: PathBuf,
    pub digest: [u8; MD5_DIGEST_LEN],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumMismatch {
    Count { expected: usize, received: usize },
    File(PathBuf),
}

impl std::fmt::Display for ChecksumMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumMismatch::Count { expected, received } => {
                write!(f, "expected {} checksums, received {}", expected, received)
            }
            ChecksumMismatch::File(path) => write!(f, "{} does not match", path.display()),
        }
    }
}

/// Expected digests, in the order clients report them.
#[derive(Debug, Clone, Default)]
pub struct ChecksumManager {
    entries: Vec<ChecksumEntry>,
}

impl ChecksumManager {
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let digest = md5_digest(&std::fs::read(path)?);
            debug!("Checksum {} = {}", path.display(), hex::encode(digest));
            entries.push(ChecksumEntry {
                path: path.clone(),
                digest,
            });
        }
        if !entries.is_empty() {
            info!("Loaded {} content checksums", entries.len());
        }
        Ok(Self { entries })
    }

    pub fn from_entries(entries: Vec<ChecksumEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChecksumEntry] {
        &self.entries
    }

    pub fn path(&self, index: usize) -> Option<&Path> {
        self.entries.get(index).map(|entry| entry.path.as_path())
    }

    /// Compares the client's digests with the expected ones, in order.
    pub fn verify(&self, packet: &ChecksumPacket) -> std::result::Result<(), ChecksumMismatch> {
        if packet.digests.len() != self.entries.len() {
            return Err(ChecksumMismatch::Count {
                expected: self.entries.len(),
                received: packet.digests.len(),
            });
        }
        match self
            .entries
            .iter()
            .zip(&packet.digests)
            .find(|(entry, digest)| entry.digest != **digest)
        {
            Some((entry, digest)) => {
                debug!(
                    "Checksum mismatch for {}: expected {}, got {}",
                    entry.path.display(),
                    hex::encode(entry.digest),
                    hex::encode(digest)
                );
                Err(ChecksumMismatch::File(entry.path.clone()))
            }
            None => Ok(()),
        }
    }
}
