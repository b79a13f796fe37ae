//! Deciding which host files differ from their device counterparts.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::hashsum::FileHash;

/// A single host file (or tree) that has to be copied to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPush {
    pub host_path: PathBuf,
    pub device_path: String,
}

/// Path of `file` relative to `root`, without a leading separator. Empty for the root itself.
fn relative_path<'a>(root: &str, file: &'a str) -> &'a str {
    file.strip_prefix(root)
        .map(|rel| rel.trim_start_matches('/'))
        .unwrap_or(file)
}

fn join_device_path(base: &str, rel: &str) -> String {
    if rel.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), rel)
}

/// Inputs of one host/device comparison.
#[derive(Debug)]
pub struct Comparison<'a> {
    /// Canonical host path the host hashes were computed under
    pub host_root: &'a str,
    pub host_is_dir: bool,
    /// Device path as the caller passed it
    pub device_path: &'a str,
    /// Device path after symlink resolution
    pub resolved_device_path: &'a str,
    pub ignore_filenames: bool,
}

/// Returns the host files whose content is not present on the device.
///
/// Device entries that do not correspond to any host file are dropped before the comparison
/// (unless `ignore_filenames`), they are never deleted. A host file counts as changed when its
/// hash matches none of the remaining device hashes.
pub fn changed_files(
    comparison: &Comparison<'_>,
    host_hashes: &[FileHash],
    device_hashes: Vec<FileHash>,
) -> Vec<PendingPush> {
    let device_hashes = if comparison.ignore_filenames {
        device_hashes
    } else {
        let host_files: Vec<&str> = host_hashes
            .iter()
            .map(|h| relative_path(comparison.host_root, &h.path))
            .collect();
        device_hashes
            .into_iter()
            .filter(|h| host_files.iter().any(|rel| h.path.contains(rel)))
            .collect()
    };
    if host_hashes.len() > device_hashes.len() {
        tracing::info!(
            "{} files do not exist on the device",
            host_hashes.len() - device_hashes.len()
        );
    }
    let known: HashSet<&str> = device_hashes.iter().map(|h| h.hash.as_str()).collect();
    host_hashes
        .iter()
        .filter(|h| !known.contains(h.hash.as_str()))
        .map(|h| PendingPush {
            host_path: PathBuf::from(&h.path),
            device_path: if comparison.host_is_dir {
                join_device_path(
                    comparison.device_path,
                    relative_path(comparison.host_root, &h.path),
                )
            } else {
                comparison.resolved_device_path.to_string()
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fh(path: &str, hash: char) -> FileHash {
        FileHash {
            path: path.to_string(),
            hash: hash.to_string().repeat(64),
        }
    }

    fn dir_comparison(ignore_filenames: bool) -> Comparison<'static> {
        Comparison {
            host_root: "/host/out",
            host_is_dir: true,
            device_path: "/sdcard/out",
            resolved_device_path: "/storage/emulated/0/out",
            ignore_filenames,
        }
    }

    #[test]
    fn unchanged_tree_has_no_changes() {
        let host = vec![fh("/host/out/a", 'a'), fh("/host/out/sub/b", 'b')];
        let device = vec![
            fh("/storage/emulated/0/out/a", 'a'),
            fh("/storage/emulated/0/out/sub/b", 'b'),
        ];
        assert!(changed_files(&dir_comparison(false), &host, device).is_empty());
    }

    #[test]
    fn changed_and_missing_files_map_to_device_paths() {
        let host = vec![
            fh("/host/out/a", 'a'),
            fh("/host/out/sub/b", 'b'),
            fh("/host/out/new", 'n'),
        ];
        let device = vec![
            fh("/storage/emulated/0/out/a", 'a'),
            fh("/storage/emulated/0/out/sub/b", 'x'),
        ];
        let changed = changed_files(&dir_comparison(false), &host, device);
        assert_eq!(
            changed,
            vec![
                PendingPush {
                    host_path: PathBuf::from("/host/out/sub/b"),
                    device_path: "/sdcard/out/sub/b".to_string(),
                },
                PendingPush {
                    host_path: PathBuf::from("/host/out/new"),
                    device_path: "/sdcard/out/new".to_string(),
                },
            ]
        );
    }

    #[test]
    fn device_only_files_do_not_mask_changes() {
        // the extra device file carries the new content of `alpha`, but has no host counterpart
        let host = vec![fh("/host/out/alpha", 'n')];
        let device = vec![
            fh("/storage/emulated/0/out/alpha", 'a'),
            fh("/storage/emulated/0/out/other", 'n'),
        ];
        assert_eq!(changed_files(&dir_comparison(false), &host, device.clone()).len(), 1);
        // when file names are ignored any matching content counts
        assert!(changed_files(&dir_comparison(true), &host, device).is_empty());
    }

    #[test]
    fn single_file_uses_resolved_device_path() {
        let comparison = Comparison {
            host_root: "/host/lib.so",
            host_is_dir: false,
            device_path: "/sdcard/lib.so",
            resolved_device_path: "/storage/emulated/0/lib.so",
            ignore_filenames: false,
        };
        let host = vec![fh("/host/lib.so", 'a')];
        let changed = changed_files(&comparison, &host, vec![]);
        assert_eq!(
            changed,
            vec![PendingPush {
                host_path: PathBuf::from("/host/lib.so"),
                device_path: "/storage/emulated/0/lib.so".to_string(),
            }]
        );
    }

    #[test]
    fn relative_paths() {
        assert_eq!(relative_path("/a/b", "/a/b/c/d"), "c/d");
        assert_eq!(relative_path("/a/b", "/a/b"), "");
        assert_eq!(join_device_path("/x/", "c/d"), "/x/c/d");
        assert_eq!(join_device_path("/x", ""), "/x");
    }
}
