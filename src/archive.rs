//! Archive creation/extraction — an external collaborator by contract
//! (§6): the Cache Engine only ever sees `(archive_path, size_bytes)` and
//! a destination directory, never archive internals.
//!
//! [`TarZstdArchiver`] is the default, concrete realization so the engine
//! is runnable without a host-supplied implementation; any conforming
//! [`Archiver`] may replace it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[derive(Debug, Clone, Copy)]
pub struct CompressionOptions {
    pub level: i32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self { level: 3 }
    }
}

#[async_trait]
pub trait Archiver: Send + Sync {
    async fn create_archive(
        &self,
        paths: &[PathBuf],
        work_dir: &Path,
        compression: CompressionOptions,
    ) -> anyhow::Result<(PathBuf, u64)>;

    async fn extract_archive(&self, archive_path: &Path, dest_dir: &Path) -> anyhow::Result<()>;
}

pub struct TarZstdArchiver;

#[async_trait]
impl Archiver for TarZstdArchiver {
    async fn create_archive(
        &self,
        paths: &[PathBuf],
        work_dir: &Path,
        compression: CompressionOptions,
    ) -> anyhow::Result<(PathBuf, u64)> {
        let paths = paths.to_vec();
        let work_dir = work_dir.to_path_buf();

        tokio::task::spawn_blocking(move || -> anyhow::Result<(PathBuf, u64)> {
            // The final filename is a placeholder until the caller hashes
            // the produced bytes and renames via `put_from_path` (§4.1);
            // the engine never re-derives the hash from this path's name.
            let staging_path = work_dir.join("staging.tar.zst");
            let file = std::fs::File::create(&staging_path)?;
            let encoder = zstd::stream::write::Encoder::new(file, compression.level)?;
            let mut tar_builder = tar::Builder::new(encoder);

            for path in &paths {
                let name = path
                    .file_name()
                    .ok_or_else(|| anyhow::anyhow!("path '{}' has no file name", path.display()))?;
                if path.is_dir() {
                    tar_builder.append_dir_all(name, path)?;
                } else {
                    let mut f = std::fs::File::open(path)?;
                    tar_builder.append_file(name, &mut f)?;
                }
            }

            let encoder = tar_builder.into_inner()?;
            encoder.finish()?;

            let size_bytes = std::fs::metadata(&staging_path)?.len();
            Ok((staging_path, size_bytes))
        })
        .await?
    }

    async fn extract_archive(&self, archive_path: &Path, dest_dir: &Path) -> anyhow::Result<()> {
        let archive_path = archive_path.to_path_buf();
        let dest_dir = dest_dir.to_path_buf();

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            std::fs::create_dir_all(&dest_dir)?;
            let file = std::fs::File::open(&archive_path)?;
            let decoder = zstd::stream::read::Decoder::new(file)?;
            let mut archive = tar::Archive::new(decoder);
            archive.unpack(&dest_dir)?;
            Ok(())
        })
        .await?
    }
}
