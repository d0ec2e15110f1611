// SPDX-License-Identifier: Apache-2.0

use glob::{Pattern, glob};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Source of candidate paths for a polling cycle
pub trait FileFinder: Send + Sync {
    /// Return the deduplicated set of files that currently exist and match.
    fn find_files(&self) -> Result<Vec<PathBuf>>;
}

/// GlobFileFinder finds files matching include patterns while excluding others.
///
/// Matched paths are resolved to their real path, so a file reached through a
/// symlink and through its own name is reported once.
#[derive(Debug, Clone)]
pub struct GlobFileFinder {
    include: Vec<String>,
    exclude: Vec<Pattern>,
}

impl GlobFileFinder {
    /// Create a new GlobFileFinder. Every pattern is compiled up front so a
    /// malformed one is a configuration error rather than a per-cycle failure.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Self> {
        for pattern in &include {
            Pattern::new(pattern).map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;
        }

        let exclude = exclude
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { include, exclude })
    }

    fn is_excluded(&self, path: &Path, real_path: &Path) -> bool {
        self.exclude
            .iter()
            .any(|pattern| pattern.matches_path(path) || pattern.matches_path(real_path))
    }
}

impl FileFinder for GlobFileFinder {
    fn find_files(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.include {
            let matches =
                glob(pattern).map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;

            for entry in matches {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        // Unreadable directory while walking: skip it, keep the rest
                        debug!("Skipping unreadable glob entry: {}", e);
                        continue;
                    }
                };

                // Follows symlinks; a dangling link or a vanished file fails here
                let real_path = match fs::canonicalize(&path) {
                    Ok(p) => p,
                    Err(e) => {
                        debug!("Failed to resolve {:?}: {}", path, e);
                        continue;
                    }
                };

                if !real_path.is_file() {
                    continue;
                }

                if self.is_excluded(&path, &real_path) {
                    continue;
                }

                if seen.insert(real_path.clone()) {
                    paths.push(real_path);
                }
            }
        }

        paths.sort();
        Ok(paths)
    }
}

/// Finder returning a fixed list, or failing when the list is `None`
#[cfg(test)]
pub struct MockFileFinder {
    pub paths: std::sync::Mutex<Option<Vec<PathBuf>>>,
}

#[cfg(test)]
impl MockFileFinder {
    pub fn new(paths: Option<Vec<PathBuf>>) -> Self {
        Self {
            paths: std::sync::Mutex::new(paths),
        }
    }
}

#[cfg(test)]
impl FileFinder for MockFileFinder {
    fn find_files(&self) -> Result<Vec<PathBuf>> {
        self.paths
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Io(std::io::Error::other("listing failed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_files(dir: &TempDir) -> Vec<PathBuf> {
        let files = vec!["test1.log", "test2.log", "other.txt", "ignored.log"];

        for name in &files {
            let path = dir.path().join(name);
            fs::write(&path, format!("content of {}", name)).unwrap();
        }

        files.iter().map(|f| dir.path().join(f)).collect()
    }

    fn names(files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_finder_basic() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![pattern], vec![]).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(names(&files), vec!["ignored.log", "test1.log", "test2.log"]);
        assert!(files.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn test_finder_with_exclude() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let include = format!("{}/*.log", dir.path().display());
        let exclude = format!("{}/ignored.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![include], vec![exclude]).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(names(&files), vec!["test1.log", "test2.log"]);
    }

    #[test]
    fn test_finder_exclude_matches_real_path() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);
        let real = fs::canonicalize(dir.path()).unwrap();

        let include = format!("{}/*.log", dir.path().display());
        let exclude = format!("{}/test*.log", real.display());
        let finder = GlobFileFinder::new(vec![include], vec![exclude]).unwrap();

        assert_eq!(names(&finder.find_files().unwrap()), vec!["ignored.log"]);
    }

    #[test]
    fn test_finder_no_duplicates() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        // Include the same pattern twice, plus an overlapping one
        let pattern = format!("{}/*.log", dir.path().display());
        let overlap = format!("{}/test*", dir.path().display());
        let finder = GlobFileFinder::new(vec![pattern.clone(), pattern, overlap], vec![]).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_finder_resolves_symlinks() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let links = dir.path().join("links");
        fs::create_dir(&logs).unwrap();
        fs::create_dir(&links).unwrap();
        fs::write(logs.join("app.log"), "line\n").unwrap();
        std::os::unix::fs::symlink(logs.join("app.log"), links.join("app.log")).unwrap();

        let finder = GlobFileFinder::new(
            vec![
                format!("{}/*.log", logs.display()),
                format!("{}/*.log", links.display()),
            ],
            vec![],
        )
        .unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0], fs::canonicalize(logs.join("app.log")).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_finder_skips_dangling_symlink() {
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone.log"), dir.path().join("link.log"))
            .unwrap();

        let finder =
            GlobFileFinder::new(vec![format!("{}/*.log", dir.path().display())], vec![]).unwrap();
        assert!(finder.find_files().unwrap().is_empty());
    }

    #[test]
    fn test_finder_skips_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("dir.log")).unwrap();
        fs::write(dir.path().join("file.log"), "x").unwrap();

        let finder =
            GlobFileFinder::new(vec![format!("{}/*.log", dir.path().display())], vec![]).unwrap();
        assert_eq!(names(&finder.find_files().unwrap()), vec!["file.log"]);
    }

    #[test]
    fn test_finder_empty_include() {
        let finder = GlobFileFinder::new(vec![], vec![]).unwrap();
        let files = finder.find_files().unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_finder_zero_matches_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let finder =
            GlobFileFinder::new(vec![format!("{}/nothing/*.log", dir.path().display())], vec![])
                .unwrap();
        assert!(finder.find_files().unwrap().is_empty());
    }

    #[test]
    fn test_finder_rejects_malformed_patterns() {
        assert!(matches!(
            GlobFileFinder::new(vec!["/var/log/[.log".to_string()], vec![]),
            Err(Error::InvalidGlob(_))
        ));
        assert!(matches!(
            GlobFileFinder::new(vec!["/var/log/*.log".to_string()], vec!["***".to_string()]),
            Err(Error::InvalidGlob(_))
        ));
    }

    #[test]
    fn test_finder_discovers_file_created_after_start() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("existing.log"), "initial content").unwrap();

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![pattern], vec![]).unwrap();

        assert_eq!(names(&finder.find_files().unwrap()), vec!["existing.log"]);

        fs::write(dir.path().join("newfile.log"), "new file content\nline 2\n").unwrap();
        fs::write(dir.path().join("other.txt"), "text file").unwrap();

        assert_eq!(
            names(&finder.find_files().unwrap()),
            vec!["existing.log", "newfile.log"]
        );
    }
}
