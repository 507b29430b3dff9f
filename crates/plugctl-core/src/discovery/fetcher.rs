//! Artifact Fetcher
//!
//! Downloads inventories and plugin binaries from OCI registries or local paths

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use sha2::{Digest, Sha256};

use crate::discovery::source::{DiscoverySource, SourceKind};
use crate::error::{PluginError, Result};
use crate::inventory::manifest::manifest_path;
use crate::inventory::Artifact;

/// File expected inside an inventory image
pub const INVENTORY_FILE: &str = "inventory.json";

/// Retrieves raw inventory payloads and plugin binaries
pub trait ArtifactFetcher: Send + Sync {
    /// Raw inventory payload of a source
    fn fetch_inventory(&self, source: &DiscoverySource) -> Result<Vec<u8>>;

    /// Write the binary of `artifact` to `dest`
    fn fetch_plugin(&self, artifact: &Artifact, dest: &Path) -> Result<()>;
}

/// Fetcher backed by the local filesystem and the `oras` CLI
pub struct DefaultFetcher {
    /// Scratch directory for image pulls
    work_dir: PathBuf,
}

impl DefaultFetcher {
    pub fn new(work_dir: PathBuf) -> Self {
        Self { work_dir }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    // ========== OCI Operations ==========

    /// Pull an image's files into `out_dir`
    fn oras_pull(&self, reference: &str, out_dir: &Path) -> Result<()> {
        fs::create_dir_all(out_dir)?;

        let output = Command::new("oras")
            .args(["pull", reference, "--output"])
            .arg(out_dir)
            .output()
            .map_err(|e| PluginError::Fetch {
                locator: reference.to_string(),
                message: if e.kind() == std::io::ErrorKind::NotFound {
                    "oras CLI not found in PATH".to_string()
                } else {
                    e.to_string()
                },
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PluginError::Fetch {
                locator: reference.to_string(),
                message: format!("oras pull failed: {}", stderr.trim()),
            });
        }

        Ok(())
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir> {
        fs::create_dir_all(&self.work_dir)?;
        Ok(tempfile::TempDir::new_in(&self.work_dir)?)
    }
}

impl ArtifactFetcher for DefaultFetcher {
    fn fetch_inventory(&self, source: &DiscoverySource) -> Result<Vec<u8>> {
        match source.kind {
            SourceKind::Local => {
                let path = manifest_path(Path::new(&source.locator));
                fs::read(&path).map_err(|e| PluginError::Fetch {
                    locator: path.display().to_string(),
                    message: e.to_string(),
                })
            }
            SourceKind::Oci => {
                let scratch = self.scratch_dir()?;
                self.oras_pull(&source.locator, scratch.path())?;

                let path = scratch.path().join(INVENTORY_FILE);
                fs::read(&path).map_err(|_| PluginError::Fetch {
                    locator: source.locator.clone(),
                    message: format!("image does not contain {}", INVENTORY_FILE),
                })
            }
        }
    }

    fn fetch_plugin(&self, artifact: &Artifact, dest: &Path) -> Result<()> {
        if let Some(local) = local_reference(&artifact.reference) {
            if !local.is_file() {
                return Err(PluginError::Fetch {
                    locator: artifact.reference.clone(),
                    message: "file not found".to_string(),
                });
            }
            fs::copy(&local, dest)?;
            return Ok(());
        }

        let scratch = self.scratch_dir()?;
        self.oras_pull(&artifact.reference, scratch.path())?;

        let binary = first_file(scratch.path())?.ok_or_else(|| PluginError::Fetch {
            locator: artifact.reference.clone(),
            message: "image contains no files".to_string(),
        })?;
        fs::copy(&binary, dest)?;

        Ok(())
    }
}

/// Path for references that point at the filesystem
pub fn local_reference(reference: &str) -> Option<PathBuf> {
    let stripped = reference.strip_prefix("file://").unwrap_or(reference);
    let path = Path::new(stripped);
    if reference.starts_with("file://") || path.is_absolute() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

fn first_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files.into_iter().next())
}

// ========== Digests ==========

pub fn compute_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

pub fn compute_file_digest(path: &Path) -> Result<String> {
    let content = fs::read(path)?;
    Ok(compute_digest(&content))
}

/// Check a downloaded file against an expected `sha256:<hex>` digest.
/// A bare hex digest is accepted too.
pub fn verify_digest(path: &Path, expected: &str, reference: &str) -> Result<()> {
    let actual = compute_file_digest(path)?;
    let normalized = if expected.contains(':') {
        expected.to_ascii_lowercase()
    } else {
        format!("sha256:{}", expected.to_ascii_lowercase())
    };

    if actual != normalized {
        return Err(PluginError::DigestMismatch {
            reference: reference.to_string(),
            expected: normalized,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_fetcher() -> (DefaultFetcher, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = DefaultFetcher::new(temp_dir.path().join("work"));
        (fetcher, temp_dir)
    }

    #[test]
    fn test_local_reference() {
        assert_eq!(
            local_reference("file:///opt/bin/tool"),
            Some(PathBuf::from("/opt/bin/tool"))
        );
        assert_eq!(local_reference("/opt/bin/tool"), Some(PathBuf::from("/opt/bin/tool")));
        assert_eq!(local_reference("registry.example.com/tool:v1.0.0"), None);
    }

    #[test]
    fn test_fetch_local_inventory() {
        let (fetcher, temp) = create_test_fetcher();
        let dir = temp.path().join("source");
        fs::create_dir_all(&dir).unwrap();
        fs::write(manifest_path(&dir), r#"{"plugins": []}"#).unwrap();

        let source = DiscoverySource::local("dev", dir.to_str().unwrap());
        let bytes = fetcher.fetch_inventory(&source).unwrap();
        assert_eq!(bytes, br#"{"plugins": []}"#);
    }

    #[test]
    fn test_fetch_local_plugin() {
        let (fetcher, temp) = create_test_fetcher();
        let src = temp.path().join("plugin-bin");
        fs::write(&src, b"#!/bin/sh\necho hi\n").unwrap();

        let artifact = Artifact {
            os: None,
            arch: None,
            reference: src.to_string_lossy().to_string(),
            digest: Some(compute_digest(b"#!/bin/sh\necho hi\n")),
        };
        let dest = temp.path().join("installed");
        fetcher.fetch_plugin(&artifact, &dest).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"#!/bin/sh\necho hi\n");
        verify_digest(&dest, artifact.digest.as_deref().unwrap(), &artifact.reference).unwrap();
    }

    #[test]
    fn test_fetch_missing_local_plugin() {
        let (fetcher, temp) = create_test_fetcher();
        let artifact = Artifact {
            os: None,
            arch: None,
            reference: temp.path().join("missing").to_string_lossy().to_string(),
            digest: None,
        };
        let err = fetcher
            .fetch_plugin(&artifact, &temp.path().join("dest"))
            .unwrap_err();
        assert!(matches!(err, PluginError::Fetch { .. }));
    }

    #[test]
    fn test_verify_digest_mismatch() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file");
        fs::write(&path, b"content").unwrap();

        let bare = compute_digest(b"content");
        let bare = bare.trim_start_matches("sha256:");
        assert!(verify_digest(&path, bare, "file").is_ok());

        let err = verify_digest(&path, "sha256:deadbeef", "file").unwrap_err();
        assert!(matches!(err, PluginError::DigestMismatch { .. }));
    }
}
