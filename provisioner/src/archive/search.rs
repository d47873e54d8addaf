//! Bounded search for an executable inside an extracted tree.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Bounds for [`find_executable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchLimits {
    /// Deepest directory level inspected below the root (the root is 0).
    pub max_depth: usize,
    /// Maximum directory entries inspected before giving up.
    pub max_entries: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_entries: 10_000,
        }
    }
}

/// Locate the executable called `name` below `root`.
///
/// The walk is breadth-first over sorted directory listings. A file named
/// exactly `name` or `name.exe` is returned as soon as it is seen; a file
/// whose stem equals `name` is remembered and returned only when no exact
/// match exists within the limits. Symbolic links are not followed.
///
/// # Errors
///
/// Returns an error only when `root` itself cannot be read. Unreadable
/// subdirectories are skipped.
///
/// # Examples
///
/// ```
/// use mediadeps_provisioner::archive::{SearchLimits, find_executable};
///
/// let dir = tempfile::tempdir().unwrap();
/// std::fs::create_dir_all(dir.path().join("ffmpeg-7.0/bin")).unwrap();
/// std::fs::write(dir.path().join("ffmpeg-7.0/bin/ffmpeg"), b"").unwrap();
///
/// let found = find_executable(dir.path(), "ffmpeg", &SearchLimits::default()).unwrap();
/// assert_eq!(found, Some(dir.path().join("ffmpeg-7.0/bin/ffmpeg")));
/// ```
pub fn find_executable(
    root: &Path,
    name: &str,
    limits: &SearchLimits,
) -> io::Result<Option<PathBuf>> {
    let bare = strip_exe(name);
    let mut queue = VecDeque::from([(root.to_path_buf(), 0_usize)]);
    let mut inspected = 0_usize;
    let mut fallback: Option<PathBuf> = None;

    while let Some((dir, depth)) = queue.pop_front() {
        let entries = match sorted_entries(&dir) {
            Ok(entries) => entries,
            Err(err) if dir == root => return Err(err),
            Err(err) => {
                log::debug!("skipping unreadable directory {}: {err}", dir.display());
                continue;
            }
        };
        for path in entries {
            inspected += 1;
            if inspected > limits.max_entries {
                log::warn!(
                    "stopped searching for {name} after {} entries",
                    limits.max_entries
                );
                return Ok(fallback);
            }
            let Ok(file_type) = fs::symlink_metadata(&path).map(|meta| meta.file_type()) else {
                continue;
            };
            if file_type.is_dir() {
                if depth < limits.max_depth {
                    queue.push_back((path, depth + 1));
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            match classify(&path, bare) {
                Match::Exact => return Ok(Some(path)),
                Match::Stem if fallback.is_none() => fallback = Some(path),
                Match::Stem | Match::None => {}
            }
        }
    }
    Ok(fallback)
}

enum Match {
    Exact,
    Stem,
    None,
}

fn classify(path: &Path, bare: &str) -> Match {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return Match::None;
    };
    if strip_exe(file_name) == bare {
        return Match::Exact;
    }
    match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) if stem == bare => Match::Stem,
        _ => Match::None,
    }
}

fn strip_exe(name: &str) -> &str {
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".exe") {
        &name[..len - 4]
    } else {
        name
    }
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn tree() -> TempDir {
        TempDir::new().expect("temp dir")
    }

    fn touch(root: &Path, relative: &str) -> PathBuf {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(&path, b"").expect("touch");
        path
    }

    #[rstest]
    fn finds_nested_exact_match(tree: TempDir) {
        touch(tree.path(), "README.txt");
        let target = touch(tree.path(), "subdir/ffmpeg");

        let found = find_executable(tree.path(), "ffmpeg", &SearchLimits::default()).expect("walk");

        assert_eq!(found, Some(target));
    }

    #[rstest]
    fn finds_windows_suffixed_name(tree: TempDir) {
        let target = touch(tree.path(), "ffmpeg-master-latest-win64-gpl/bin/ffmpeg.exe");
        touch(tree.path(), "ffmpeg-master-latest-win64-gpl/bin/ffprobe.exe");

        let found =
            find_executable(tree.path(), "ffmpeg.exe", &SearchLimits::default()).expect("walk");

        assert_eq!(found, Some(target));
    }

    #[rstest]
    fn exact_match_beats_shallower_stem_match(tree: TempDir) {
        touch(tree.path(), "ffmpeg.1");
        let target = touch(tree.path(), "deep/bin/ffmpeg");

        let found = find_executable(tree.path(), "ffmpeg", &SearchLimits::default()).expect("walk");

        assert_eq!(found, Some(target));
    }

    #[rstest]
    fn stem_match_is_the_fallback(tree: TempDir) {
        let target = touch(tree.path(), "bin/tool.sh");

        let found = find_executable(tree.path(), "tool", &SearchLimits::default()).expect("walk");

        assert_eq!(found, Some(target));
    }

    #[rstest]
    fn missing_executable_is_not_an_error(tree: TempDir) {
        touch(tree.path(), "docs/readme.md");

        let found = find_executable(tree.path(), "ffmpeg", &SearchLimits::default()).expect("walk");

        assert_eq!(found, None);
    }

    #[rstest]
    fn depth_limit_bounds_the_walk(tree: TempDir) {
        touch(tree.path(), "a/b/c/ffmpeg");
        let limits = SearchLimits {
            max_depth: 2,
            ..SearchLimits::default()
        };

        assert_eq!(find_executable(tree.path(), "ffmpeg", &limits).expect("walk"), None);
    }

    #[rstest]
    fn entry_limit_bounds_the_walk(tree: TempDir) {
        for index in 0..20 {
            touch(tree.path(), &format!("noise-{index:02}"));
        }
        touch(tree.path(), "zz/ffmpeg");
        let limits = SearchLimits {
            max_entries: 10,
            ..SearchLimits::default()
        };

        assert_eq!(find_executable(tree.path(), "ffmpeg", &limits).expect("walk"), None);
    }

    #[test]
    fn unreadable_root_is_an_error() {
        let err = find_executable(
            Path::new("/definitely/not/here"),
            "ffmpeg",
            &SearchLimits::default(),
        );
        assert!(err.is_err());
    }

    #[rstest]
    #[case("ffmpeg.exe", "ffmpeg")]
    #[case("FFMPEG.EXE", "FFMPEG")]
    #[case("ffmpeg", "ffmpeg")]
    #[case(".exe", ".exe")]
    fn strip_exe_handles_suffix(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(strip_exe(input), expected);
    }
}
