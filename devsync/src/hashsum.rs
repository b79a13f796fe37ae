//! Content hashing shared by the host and the device side.
//!
//! The device runs the `hashsum` binary, the host links the same code. Both emit one line per
//! regular file: `<sha256 hex><two spaces><absolute path>`. Files and directories that cannot
//! be read are skipped and reported separately, so one unreadable entry never hides the rest.

use std::path::Path;

use anyhow::{Context, Result};
use async_recursion::async_recursion;
use sha2::Digest;
use tokio::io::AsyncReadExt;

/// Length of a hex encoded SHA-256 digest.
pub const HASH_LEN: usize = 64;

const SEPARATOR: &str = "  ";
const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHash {
    pub path: String,
    pub hash: String,
}

impl std::fmt::Display for FileHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}{}{}", self.hash, SEPARATOR, self.path)
    }
}

pub async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed opening {:?}", &path))?;
    let mut hasher = sha2::Sha256::new();
    let mut buffer = vec![0; READ_BUFFER_SIZE];
    loop {
        let n = file
            .read(&mut buffer)
            .await
            .with_context(|| format!("failed reading {:?}", &path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hashes of a tree along with the entries that could not be read.
#[derive(Debug, Default)]
pub struct TreeHashes {
    /// Sorted by path
    pub hashes: Vec<FileHash>,
    pub unreadable: Vec<anyhow::Error>,
}

impl TreeHashes {
    fn skip(&mut self, error: anyhow::Error) {
        tracing::warn!("skipping unreadable entry: {:#}", error);
        self.unreadable.push(error);
    }
}

#[async_recursion]
async fn hash_dir(dir: &Path, out: &mut TreeHashes) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("cannot open directory {:?} for reading", &dir))?;
    let mut join_set = tokio::task::JoinSet::new();
    let mut subdirs = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                out.skip(
                    anyhow::Error::new(error)
                        .context(format!("failed traversing directory {:?}", &dir)),
                );
                break;
            }
        };
        let path = entry.path();
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(error) => {
                out.skip(
                    anyhow::Error::new(error)
                        .context(format!("failed reading file type of {:?}", &path)),
                );
                continue;
            }
        };
        if file_type.is_dir() {
            subdirs.push(path);
            continue;
        }
        // symlinks count when they point at a regular file, linked directories are skipped
        let is_file = if file_type.is_symlink() {
            tokio::fs::metadata(&path)
                .await
                .is_ok_and(|md| md.is_file())
        } else {
            file_type.is_file()
        };
        if !is_file {
            continue;
        }
        join_set.spawn(async move {
            let hash = hash_file(&path).await?;
            Ok::<_, anyhow::Error>(FileHash {
                path: path.to_string_lossy().into_owned(),
                hash,
            })
        });
    }
    while let Some(res) = join_set.join_next().await {
        match res.context("hashing task panicked")? {
            Ok(file_hash) => out.hashes.push(file_hash),
            Err(error) => out.skip(error),
        }
    }
    for subdir in subdirs {
        if let Err(error) = hash_dir(&subdir, out).await {
            out.skip(error);
        }
    }
    Ok(())
}

/// Hashes every regular file at or below `path`.
///
/// The root is canonicalized so that reported paths are absolute. Only a root that cannot be
/// resolved or read is an error; unreadable entries below it end up in
/// [`TreeHashes::unreadable`].
pub async fn hash_tree(path: &Path) -> Result<TreeHashes> {
    let root = tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("failed resolving {:?}", &path))?;
    let metadata = tokio::fs::metadata(&root)
        .await
        .with_context(|| format!("failed reading metadata from {:?}", &root))?;
    let mut tree = TreeHashes::default();
    if metadata.is_dir() {
        hash_dir(&root, &mut tree).await?;
    } else {
        tree.hashes.push(FileHash {
            path: root.to_string_lossy().into_owned(),
            hash: hash_file(&root).await?,
        });
    }
    tree.hashes.sort();
    Ok(tree)
}

/// Parses a single hasher output line; anything malformed yields `None`.
pub fn parse_line(line: &str) -> Option<FileHash> {
    let (hash, path) = line.split_once(SEPARATOR)?;
    if hash.len() != HASH_LEN || !hash.bytes().all(|b| b.is_ascii_hexdigit()) || path.is_empty() {
        return None;
    }
    Some(FileHash {
        path: path.to_string(),
        hash: hash.to_ascii_lowercase(),
    })
}

/// Parses hasher output, silently dropping malformed lines (warnings, linker noise and such).
pub fn parse_output<S: AsRef<str>>(lines: &[S]) -> Vec<FileHash> {
    lines
        .iter()
        .filter_map(|line| {
            let parsed = parse_line(line.as_ref());
            if parsed.is_none() {
                tracing::debug!("ignoring hasher output line {:?}", line.as_ref());
            }
            parsed
        })
        .collect()
}
