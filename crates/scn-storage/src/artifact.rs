//! Immutable on-disk artifact storage.
//!
//! Artifacts are written under `{project_id}/{run_id}/{filename}` with an
//! atomic temp-file rename, so a half-written llms.txt is never visible and
//! re-dispatched jobs do not clobber an existing file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn artifact_relative_path(
        &self,
        project_id: Uuid,
        run_id: Uuid,
        filename: &str,
    ) -> PathBuf {
        PathBuf::from(project_id.to_string())
            .join(run_id.to_string())
            .join(filename)
    }

    /// Store bytes immutably via atomic temp-file rename. A second call for
    /// the same run and filename is reported as deduplicated, not an error.
    pub async fn store_bytes(
        &self,
        project_id: Uuid,
        run_id: Uuid,
        filename: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.artifact_relative_path(project_id, run_id, filename);
        let absolute_path = self.root.join(&relative_path);

        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating artifact directory {}", parent.display()))?;
        }

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking artifact path {}", absolute_path.display()))?
        {
            return Ok(StoredArtifact {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: true,
            });
        }

        let temp_name = format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len());
        let temp_path = absolute_path
            .parent()
            .expect("artifact path always has parent")
            .join(temp_name);

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp artifact file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp artifact file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp artifact file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(StoredArtifact {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: false,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(StoredArtifact {
                    content_hash,
                    relative_path,
                    absolute_path,
                    byte_size: bytes.len(),
                    deduplicated: true,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming temp artifact {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}
