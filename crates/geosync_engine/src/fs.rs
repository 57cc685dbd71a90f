//! Filesystem-backed collaborators.
//!
//! Both sites keep resources under `<root>/<replicator>/<resource_id>`.
//! Digests are SHA-256 over the file contents.

use crate::error::{EngineError, EngineResult};
use crate::transport::{LocalChecksummer, ResourceFeed, Transfer};
use geosync_core::{Checksum, ChecksumProvider, CoreError, CoreResult, ResourceId};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// Directory layout of one site.
#[derive(Debug, Clone)]
pub struct FsLayout {
    root: PathBuf,
}

impl FsLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory of a replicator class.
    pub fn class_dir(&self, replicator: &str) -> PathBuf {
        self.root.join(replicator)
    }

    /// Returns the path of a resource.
    pub fn resource_path(&self, replicator: &str, resource_id: ResourceId) -> PathBuf {
        self.class_dir(replicator).join(resource_id.to_string())
    }
}

/// SHA-256 of a file, or `None` if it does not exist.
pub fn sha256_file(path: &Path) -> io::Result<Option<Checksum>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(Some(Checksum::from_bytes(hasher.finalize().to_vec())))
}

/// Copies resources from the primary layout to the secondary layout.
#[derive(Debug, Clone)]
pub struct FsTransfer {
    primary: FsLayout,
    secondary: FsLayout,
}

impl FsTransfer {
    /// Creates a transfer between two layouts.
    pub fn new(primary: FsLayout, secondary: FsLayout) -> Self {
        Self { primary, secondary }
    }
}

impl Transfer for FsTransfer {
    fn transfer(&self, replicator: &str, resource_id: ResourceId) -> EngineResult<()> {
        let source = self.primary.resource_path(replicator, resource_id);
        if !source.is_file() {
            return Err(EngineError::ResourceMissing {
                replicator: replicator.to_string(),
                resource_id,
            });
        }

        fs::create_dir_all(self.secondary.class_dir(replicator))?;
        let target = self.secondary.resource_path(replicator, resource_id);
        let partial = target.with_extension("partial");
        fs::copy(&source, &partial)?;
        fs::rename(&partial, &target)?;
        Ok(())
    }
}

/// Checksums the secondary's copies.
#[derive(Debug, Clone)]
pub struct Sha256Checksummer {
    layout: FsLayout,
}

impl Sha256Checksummer {
    /// Creates a checksummer over `layout`.
    pub fn new(layout: FsLayout) -> Self {
        Self { layout }
    }
}

impl LocalChecksummer for Sha256Checksummer {
    fn local_checksum(&self, replicator: &str, resource_id: ResourceId) -> EngineResult<Checksum> {
        sha256_file(&self.layout.resource_path(replicator, resource_id))?.ok_or_else(|| {
            EngineError::ResourceMissing {
                replicator: replicator.to_string(),
                resource_id,
            }
        })
    }
}

/// Reads primary checksums by hashing the primary's files.
#[derive(Debug, Clone)]
pub struct FsChecksumProvider {
    layout: FsLayout,
}

impl FsChecksumProvider {
    /// Creates a provider over the primary `layout`.
    pub fn new(layout: FsLayout) -> Self {
        Self { layout }
    }
}

impl ChecksumProvider for FsChecksumProvider {
    fn primary_checksum(&self, replicator: &str, resource_id: ResourceId) -> CoreResult<Option<Checksum>> {
        sha256_file(&self.layout.resource_path(replicator, resource_id))
            .map_err(|e| CoreError::ChecksumProvider(e.to_string()))
    }
}

/// Lists resources present in the primary layout.
#[derive(Debug, Clone)]
pub struct FsResourceFeed {
    layout: FsLayout,
}

impl FsResourceFeed {
    /// Creates a feed over the primary `layout`.
    pub fn new(layout: FsLayout) -> Self {
        Self { layout }
    }
}

impl ResourceFeed for FsResourceFeed {
    fn resource_ids(&self, replicator: &str) -> EngineResult<Vec<ResourceId>> {
        let entries = match fs::read_dir(self.layout.class_dir(replicator)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            // Skip anything that is not a plain numeric id, e.g. partial copies.
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok()) {
                ids.push(ResourceId::new(id));
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}
