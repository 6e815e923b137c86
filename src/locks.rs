use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::clock::now_utc;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock busy: {}", .0.display())]
    Busy(PathBuf),
    #[error("lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the single-writer lock for one item lives.
pub fn item_lock_path(root: &Path, item_id: &str) -> PathBuf {
    root.join("locks").join(format!("{item_id}.lock"))
}

/// Held while the file exists; the file records the holder's pid and start time.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: File,
}

impl FileLock {
    /// Waits up to `timeout`. A lock file untouched for `stale_after` is
    /// treated as left behind by a dead writer and broken.
    pub fn acquire(path: &Path, timeout: Duration, stale_after: Duration) -> Result<Self, LockError> {
        let start = Instant::now();
        loop {
            if let Some(guard) = try_acquire(path)? {
                return Ok(guard);
            }
            if break_if_stale(path, stale_after)? {
                continue;
            }
            if start.elapsed() >= timeout {
                return Err(LockError::Busy(path.to_path_buf()));
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn try_acquire(path: &Path) -> Result<Option<FileLock>, LockError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => {
            let mut lock = FileLock {
                path: path.to_path_buf(),
                file,
            };
            writeln!(lock.file, "pid={}", std::process::id())?;
            writeln!(lock.file, "acquired_at={}", now_utc())?;
            Ok(Some(lock))
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(err) => Err(LockError::Io(err)),
    }
}

/// True when the lock at `path` is gone, either released meanwhile or broken here.
fn break_if_stale(path: &Path, stale_after: Duration) -> Result<bool, LockError> {
    let modified = match std::fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(LockError::Io(err)),
    };
    let age = modified.elapsed().unwrap_or_default();
    if age < stale_after {
        return Ok(false);
    }

    let holder = std::fs::read_to_string(path).unwrap_or_default();
    // Only the waiter whose rename lands breaks this particular file.
    let claimed = path.with_extension(format!("stale-{}", std::process::id()));
    match std::fs::rename(path, &claimed) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(LockError::Io(err)),
    }
    let _ = std::fs::remove_file(&claimed);
    tracing::warn!(
        path = %path.display(),
        holder = %holder.trim().replace('\n', " "),
        age_secs = age.as_secs(),
        "broke stale item lock"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};
    use uuid::Uuid;

    use super::{item_lock_path, FileLock, LockError};

    const FRESH: Duration = Duration::from_secs(60);

    fn lock_root() -> PathBuf {
        std::env::temp_dir().join(format!("itemflow-lock-test-{}", Uuid::now_v7()))
    }

    #[test]
    fn item_locks_live_under_the_locks_directory() {
        let path = item_lock_path(std::path::Path::new("/srv/itemflow"), "itm-abc123");
        assert_eq!(path, PathBuf::from("/srv/itemflow/locks/itm-abc123.lock"));
    }

    #[test]
    fn second_writer_is_turned_away_until_release() {
        let root = lock_root();
        let path = item_lock_path(&root, "itm-000001");
        let first = FileLock::acquire(&path, Duration::from_millis(20), FRESH)
            .expect("initial lock should succeed");
        let record = std::fs::read_to_string(&path).expect("lock file is readable");
        assert!(record.contains(&format!("pid={}", std::process::id())));
        assert!(record.contains("acquired_at="));

        let err = FileLock::acquire(&path, Duration::from_millis(20), FRESH)
            .expect_err("lock should time out when already held");
        assert!(matches!(err, LockError::Busy(_)));

        drop(first);
        assert!(!path.exists());
        let again = FileLock::acquire(&path, Duration::from_millis(20), FRESH)
            .expect("released lock should be acquirable");
        drop(again);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn abandoned_lock_file_is_broken_after_it_goes_stale() {
        let root = lock_root();
        let path = item_lock_path(&root, "itm-000002");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("locks dir");
        std::fs::write(&path, "pid=999999\nacquired_at=2026-03-01T09:00:00.000000Z\n")
            .expect("leftover lock");
        let leftover = std::fs::File::options()
            .write(true)
            .open(&path)
            .expect("open leftover");
        leftover
            .set_modified(SystemTime::now() - Duration::from_secs(120))
            .expect("backdate leftover");
        drop(leftover);

        let guard = FileLock::acquire(&path, Duration::from_millis(20), FRESH)
            .expect("stale lock should be broken");
        let record = std::fs::read_to_string(&path).expect("lock file is readable");
        assert!(record.contains(&format!("pid={}", std::process::id())));

        drop(guard);
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(root);
    }
}
