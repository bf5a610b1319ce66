//! Advisory-locked line files shared between slots and between processes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

/// Holds an advisory `flock` until dropped.
#[cfg(unix)]
struct FileLock {
    fd: std::os::unix::io::RawFd,
}

#[cfg(unix)]
impl FileLock {
    fn acquire(file: &File, operation: libc::c_int) -> io::Result<Self> {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        loop {
            let r = unsafe { libc::flock(fd, operation) };
            if r == 0 {
                return Ok(Self { fd });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn exclusive(file: &File) -> io::Result<Self> {
        Self::acquire(file, libc::LOCK_EX)
    }

    fn shared(file: &File) -> io::Result<Self> {
        Self::acquire(file, libc::LOCK_SH)
    }
}

#[cfg(unix)]
impl Drop for FileLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.fd, libc::LOCK_UN);
        }
    }
}

// No advisory locking off unix; appends are still single write calls.
#[cfg(not(unix))]
struct FileLock;

#[cfg(not(unix))]
impl FileLock {
    fn exclusive(_file: &File) -> io::Result<Self> {
        Ok(FileLock)
    }

    fn shared(_file: &File) -> io::Result<Self> {
        Ok(FileLock)
    }
}

/// Append one line under an exclusive lock, creating the file (and parent dir) if needed.
pub(crate) fn append_line_locked(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let _lock = FileLock::exclusive(&file)?;
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    let mut writer = &file;
    writer.write_all(buf.as_bytes())?;
    writer.flush()
}

/// Read all lines under a shared lock. Invalid UTF-8 is replaced, not rejected.
pub(crate) fn read_lines_locked(path: &Path) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    let _lock = FileLock::shared(&file)?;
    let mut bytes = Vec::new();
    let mut reader = &file;
    reader.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes)
        .lines()
        .map(str::to_string)
        .collect())
}
