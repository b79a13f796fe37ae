//! Host-side disk usage, measured like `du -sb`.

use anyhow::{Context, Result};
use async_recursion::async_recursion;

/// Apparent size in bytes of `path` and, for directories, of everything beneath it.
///
/// Directory entries count with their own apparent size, as `du -sb` does. Symlinks are not
/// followed. Entries below `path` that cannot be read are skipped with a warning.
pub async fn disk_usage(path: &std::path::Path) -> Result<u64> {
    let metadata = tokio::fs::symlink_metadata(path)
        .await
        .with_context(|| format!("failed reading metadata from {:?}", &path))?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }
    Ok(metadata.len() + dir_usage(path).await?)
}

#[async_recursion]
async fn dir_usage(dir: &std::path::Path) -> Result<u64> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("cannot open directory {:?} for reading", &dir))?;
    let mut total = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                tracing::warn!("failed traversing directory {:?}: {}", dir, error);
                break;
            }
        };
        let path = entry.path();
        let metadata = match tokio::fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::warn!("skipping {:?}: {}", path, error);
                continue;
            }
        };
        total += metadata.len();
        if metadata.is_dir() {
            match dir_usage(&path).await {
                Ok(size) => total += size,
                Err(error) => tracing::warn!("skipping contents of {:?}: {:#}", path, error),
            }
        }
    }
    Ok(total)
}

/// Sum of [`disk_usage`] over several paths.
pub async fn total_disk_usage<P: AsRef<std::path::Path>>(paths: &[P]) -> Result<u64> {
    let mut total = 0;
    for path in paths {
        total += disk_usage(path.as_ref()).await?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn file_size() -> Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let size = disk_usage(&tmp_dir.path().join("foo").join("0.txt")).await?;
        assert_eq!(size, 1);
        Ok(())
    }

    #[tokio::test]
    async fn directory_counts_entries_and_contents() -> Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let foo = tmp_dir.path().join("foo");
        let bar_dir_size = tokio::fs::symlink_metadata(foo.join("bar")).await?.len();
        // bar holds three 1-byte files
        assert_eq!(disk_usage(&foo.join("bar")).await?, bar_dir_size + 3);
        let total = disk_usage(&foo).await?;
        assert!(total >= 5, "total {total} must include every regular file");
        Ok(())
    }

    #[tokio::test]
    async fn symlinks_are_not_followed() -> Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let link = tmp_dir.path().join("foo").join("baz").join("5.txt");
        let link_size = tokio::fs::symlink_metadata(&link).await?.len();
        assert_eq!(disk_usage(&link).await?, link_size);
        Ok(())
    }

    #[tokio::test]
    async fn total_over_several_paths() -> Result<()> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let bar = tmp_dir.path().join("foo").join("bar");
        let files = [bar.join("1.txt"), bar.join("2.txt"), bar.join("3.txt")];
        assert_eq!(total_disk_usage(&files).await?, 3);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn unreadable_directory_is_skipped() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let tmp_dir = testutils::setup_test_dir().await?;
        let foo = tmp_dir.path().join("foo");
        let bar = foo.join("bar");
        let full = disk_usage(&foo).await?;
        std::fs::set_permissions(&bar, std::fs::Permissions::from_mode(0o000))?;
        let readable = std::fs::read_dir(&bar).is_ok();
        let res = disk_usage(&foo).await;
        std::fs::set_permissions(&bar, std::fs::Permissions::from_mode(0o755))?;
        if readable {
            // permissions are not enforced for this user
            assert_eq!(res?, full);
            return Ok(());
        }
        // bar itself still counts, its three 1-byte files do not
        assert_eq!(res?, full - 3);
        assert!(logs_contain("skipping contents of"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_path_is_an_error() {
        let res = disk_usage(std::path::Path::new("/definitely/not/here")).await;
        assert!(res.is_err());
    }
}
