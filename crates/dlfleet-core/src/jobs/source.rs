//! Job-definition sources: a directory of line-oriented URL files.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::FleetError;

use super::JobId;

/// Marker that starts an inline comment.
const INLINE_COMMENT: &str = "  ";

/// One job file, parsed.
#[derive(Debug, Clone)]
pub struct JobSource {
    pub id: JobId,
    pub items: Vec<String>,
    pub output: PathBuf,
}

/// Items in a job file: non-blank lines not starting with `#`, `;` or `]`,
/// with inline comments after a double space removed. De-duplicated, order kept.
pub fn parse_job_file(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for raw in text.lines() {
        let line = raw.trim_start();
        if line.is_empty() || line.starts_with(&['#', ';', ']'][..]) {
            continue;
        }
        let item = match line.find(INLINE_COMMENT) {
            Some(idx) => &line[..idx],
            None => line,
        }
        .trim();
        if item.is_empty() {
            continue;
        }
        if seen.insert(item.to_string()) {
            items.push(item.to_string());
        }
    }
    items
}

/// Enumerate job files under `dir` (non-recursive, hidden files skipped, sorted).
/// Each job downloads into `output_root/<file stem>`. Empty files are skipped.
pub fn scan_sources(dir: &Path, output_root: &Path) -> Result<Vec<JobSource>, FleetError> {
    let to_err = |source| FleetError::Sources {
        path: dir.to_path_buf(),
        source,
    };
    let dir = fs::canonicalize(dir).map_err(to_err)?;
    let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
        .map_err(|source| FleetError::Sources {
            path: dir.clone(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            let hidden = p
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(true);
            !hidden && p.is_file()
        })
        .collect();
    paths.sort();

    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let text = match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping unreadable job file: {}", e);
                continue;
            }
        };
        let items = parse_job_file(&text);
        if items.is_empty() {
            tracing::debug!(path = %path.display(), "skipping job file without items");
            continue;
        }
        let id = JobId::new(path);
        let output = output_root.join(id.name());
        sources.push(JobSource { id, items, output });
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_dedupes() {
        let text = "\
# header
https://a.test/1
; also a comment
] bracket line

https://a.test/2  # inline note
https://a.test/1
   https://a.test/3   
https://a.test/2
";
        assert_eq!(
            parse_job_file(text),
            vec!["https://a.test/1", "https://a.test/2", "https://a.test/3"]
        );
    }

    #[test]
    fn single_space_is_not_a_comment_marker() {
        assert_eq!(
            parse_job_file("ytsearch:cat videos\n"),
            vec!["ytsearch:cat videos"]
        );
    }

    #[test]
    fn scan_lists_job_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "https://b.test/1\n").unwrap();
        std::fs::write(
            dir.path().join("a.txt"),
            "https://a.test/1\nhttps://a.test/2\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("empty.txt"), "# nothing\n").unwrap();
        std::fs::write(dir.path().join(".hidden"), "https://h.test/1\n").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let out = Path::new("/downloads");
        let sources = scan_sources(dir.path(), out).unwrap();
        let names: Vec<String> = sources.iter().map(|s| s.id.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(sources[0].items.len(), 2);
        assert_eq!(sources[0].output, Path::new("/downloads/a"));
        assert!(sources[0].id.path().is_absolute());
    }

    #[test]
    fn scan_missing_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan_sources(&dir.path().join("missing"), Path::new("/out")).unwrap_err();
        assert!(matches!(err, FleetError::Sources { .. }));
    }
}
