//! Archive line format.
//!
//! A line is either a bare identifier or a tab-separated status record whose
//! last column is the identifier:
//! `status \t elapsed_secs \t unix_ts \t size \t metadata \t identifier`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Completed,
    AlreadyExists,
}

impl RecordStatus {
    fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Completed => "completed",
            RecordStatus::AlreadyExists => "exists",
        }
    }
}

/// One completed item, as appended to the archive.
#[derive(Debug, Clone)]
pub struct ArchiveRecord {
    pub id: String,
    pub status: RecordStatus,
    pub elapsed: Duration,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub size: Option<u64>,
    pub metadata: String,
}

impl ArchiveRecord {
    pub fn new(id: impl Into<String>, status: RecordStatus) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            id: id.into(),
            status,
            elapsed: Duration::ZERO,
            timestamp,
            size: None,
            metadata: String::new(),
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn to_line(&self) -> String {
        let size = self
            .size
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let metadata = self.metadata.replace(['\t', '\n', '\r'], " ");
        format!(
            "{}\t{:.1}\t{}\t{}\t{}\t{}",
            self.status.as_str(),
            self.elapsed.as_secs_f64(),
            self.timestamp,
            size,
            metadata,
            self.id
        )
    }
}

/// Identifier carried by an archive line, if any.
pub fn identifier_from_line(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    if line.trim().is_empty() || line.trim_start().starts_with('#') {
        return None;
    }
    let id = match line.rsplit_once('\t') {
        Some((_, last)) => last.trim(),
        None => line.trim(),
    };
    (!id.is_empty()).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_and_structured_lines() {
        assert_eq!(
            identifier_from_line("https://example.com/a"),
            Some("https://example.com/a")
        );
        let rec = ArchiveRecord::new("https://example.com/b", RecordStatus::Completed)
            .with_elapsed(Duration::from_millis(1500))
            .with_size(Some(2048))
            .with_metadata("yt-dlp\tvideo");
        let line = rec.to_line();
        assert!(line.starts_with("completed\t1.5\t"));
        assert_eq!(line.split('\t').count(), 6);
        assert_eq!(identifier_from_line(&line), Some("https://example.com/b"));
    }

    #[test]
    fn blank_and_comment_lines_have_no_identifier() {
        assert_eq!(identifier_from_line(""), None);
        assert_eq!(identifier_from_line("   "), None);
        assert_eq!(identifier_from_line("# header"), None);
        assert_eq!(identifier_from_line("completed\t1.0\t0\t-\t\t"), None);
    }
}
