//! Overwriting tree copy.
//!
//! Unlike `cp -r`, copying a directory onto an existing directory merges the two: files present
//! in the source replace their counterparts, everything else at the destination is left alone.
//! This is the semantics of a device "push", which is why the loopback transport uses it.

use anyhow::{Context, Result};
use async_recursion::async_recursion;
use tracing::instrument;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub bytes_copied: u64,
    pub files_copied: usize,
    pub directories_created: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_copied: self.bytes_copied + other.bytes_copied,
            files_copied: self.files_copied + other.files_copied,
            directories_created: self.directories_created + other.directories_created,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} files pushed, {} directories created ({} bytes)",
            self.files_copied, self.directories_created, self.bytes_copied,
        )
    }
}

#[instrument]
async fn copy_file(src: &std::path::Path, dst: &std::path::Path) -> Result<Summary> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed creating directory {:?}", &parent))?;
    }
    if tokio::fs::symlink_metadata(dst)
        .await
        .is_ok_and(|md| md.is_dir())
    {
        return Err(anyhow::anyhow!(
            "cannot overwrite directory {:?} with file {:?}",
            dst,
            src
        ));
    }
    let bytes_copied = tokio::fs::copy(src, dst)
        .await
        .with_context(|| format!("failed copying {:?} to {:?}", &src, &dst))?;
    Ok(Summary {
        bytes_copied,
        files_copied: 1,
        ..Default::default()
    })
}

/// Copies `src` onto `dst`.
///
/// A file source is written to `dst`, or into `dst` when `dst` is an existing directory. A
/// directory source has its contents merged into `dst`, which is created when missing. Symlinks
/// in the source are followed.
#[instrument]
pub async fn copy_overwrite(src: &std::path::Path, dst: &std::path::Path) -> Result<Summary> {
    let src_metadata = tokio::fs::metadata(src)
        .await
        .with_context(|| format!("failed reading metadata from {:?}", &src))?;
    if src_metadata.is_dir() {
        return copy_dir(src, dst).await;
    }
    let dst_is_dir = tokio::fs::metadata(dst).await.is_ok_and(|md| md.is_dir());
    if dst_is_dir {
        let file_name = src
            .file_name()
            .with_context(|| format!("source {:?} has no file name", &src))?;
        return copy_file(src, &dst.join(file_name)).await;
    }
    copy_file(src, dst).await
}

#[async_recursion]
async fn copy_dir(src: &std::path::Path, dst: &std::path::Path) -> Result<Summary> {
    let mut summary = Summary::default();
    match tokio::fs::symlink_metadata(dst).await {
        Ok(md) if md.is_dir() => {}
        Ok(_) => {
            tracing::debug!("replacing non-directory {:?} with a directory", dst);
            tokio::fs::remove_file(dst)
                .await
                .with_context(|| format!("failed removing {:?}", &dst))?;
            tokio::fs::create_dir_all(dst)
                .await
                .with_context(|| format!("failed creating directory {:?}", &dst))?;
            summary.directories_created += 1;
        }
        Err(_) => {
            tokio::fs::create_dir_all(dst)
                .await
                .with_context(|| format!("failed creating directory {:?}", &dst))?;
            summary.directories_created += 1;
        }
    }
    let mut entries = tokio::fs::read_dir(src)
        .await
        .with_context(|| format!("cannot open directory {:?} for reading", &src))?;
    let mut join_set = tokio::task::JoinSet::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {:?}", &src))?
    {
        let entry_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let do_copy = || async move {
            let md = tokio::fs::metadata(&entry_path)
                .await
                .with_context(|| format!("failed reading metadata from {:?}", &entry_path))?;
            if md.is_dir() {
                copy_dir(&entry_path, &dst_path).await
            } else {
                copy_file(&entry_path, &dst_path).await
            }
        };
        join_set.spawn(do_copy());
    }
    // ReadDir holds a file descriptor, release it before waiting on the children
    drop(entries);
    while let Some(res) = join_set.join_next().await {
        summary = summary + res??;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;

    #[tokio::test]
    async fn copies_tree_into_missing_destination() -> Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let src = tmp_dir.path().join("foo");
        let dst = tmp_dir.path().join("device").join("foo");
        let summary = copy_overwrite(&src, &dst).await?;
        assert_eq!(summary.files_copied, 6);
        assert_eq!(tokio::fs::read_to_string(dst.join("bar/3.txt")).await?, "3");
        // symlink contents are copied as regular files
        assert_eq!(tokio::fs::read_to_string(dst.join("baz/5.txt")).await?, "2");
        Ok(())
    }

    #[tokio::test]
    async fn merges_into_existing_directory() -> Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let src = tmp_dir.path().join("foo");
        let dst = tmp_dir.path().join("dst");
        tokio::fs::create_dir_all(dst.join("bar")).await?;
        tokio::fs::write(dst.join("bar/1.txt"), "stale").await?;
        tokio::fs::write(dst.join("extra.txt"), "keep me").await?;
        copy_overwrite(&src, &dst).await?;
        assert_eq!(tokio::fs::read_to_string(dst.join("bar/1.txt")).await?, "1");
        assert_eq!(tokio::fs::read_to_string(dst.join("extra.txt")).await?, "keep me");
        Ok(())
    }

    #[tokio::test]
    async fn file_into_existing_directory() -> Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let src = tmp_dir.path().join("foo").join("0.txt");
        let dst = tmp_dir.path().join("foo").join("bar");
        let summary = copy_overwrite(&src, &dst).await?;
        assert_eq!(summary.files_copied, 1);
        assert_eq!(tokio::fs::read_to_string(dst.join("0.txt")).await?, "0");
        Ok(())
    }

    #[tokio::test]
    async fn file_creates_missing_parents() -> Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let src = tmp_dir.path().join("foo").join("0.txt");
        let dst = tmp_dir.path().join("a").join("b").join("renamed.txt");
        copy_overwrite(&src, &dst).await?;
        assert_eq!(tokio::fs::read_to_string(&dst).await?, "0");
        Ok(())
    }
}
