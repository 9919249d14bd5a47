// Utility functions

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Name of the cooperative cancellation sentinel inside a work directory
pub const SENTINEL_FILE_NAME: &str = ".kill";

/// Name of the progress snapshot inside a work directory
pub const SNAPSHOT_FILE_NAME: &str = ".research-progress.json";

/// Name of the follow-up message queue inside a work directory
pub const MESSAGES_FILE_NAME: &str = ".messages.json";

/// Convert a work directory string to a Path reference.
#[inline]
pub fn as_path(work_dir: &str) -> &Path {
    Path::new(work_dir)
}

/// Get the sentinel file path for a work directory.
///
/// # Example
/// ```ignore
/// use crate::utils::sentinel_path;
///
/// // Instead of: Path::new(&work_dir).join(".kill")
/// let path = sentinel_path(&work_dir);
/// ```
#[inline]
pub fn sentinel_path(work_dir: &str) -> PathBuf {
    as_path(work_dir).join(SENTINEL_FILE_NAME)
}

/// Get the progress snapshot path for a work directory.
#[inline]
pub fn snapshot_path(work_dir: &str) -> PathBuf {
    as_path(work_dir).join(SNAPSHOT_FILE_NAME)
}

#[inline]
pub fn messages_path(work_dir: &str) -> PathBuf {
    as_path(work_dir).join(MESSAGES_FILE_NAME)
}

/// Safely acquire a mutex lock, recovering from poisoning by returning the guard.
/// The mutex state may be inconsistent, so use with caution.
pub fn lock_mutex_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Mutex was poisoned, recovering: {}", poisoned);
            poisoned.into_inner()
        }
    }
}

/// Collapse whitespace runs (including newlines) into single spaces
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_chars` characters, appending `marker` when cut
pub fn truncate_chars(s: &str, max_chars: usize, marker: &str) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &s[..byte_idx], marker),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_path() {
        let path = as_path("/home/user/research");
        assert_eq!(path, Path::new("/home/user/research"));
    }

    #[test]
    fn test_sentinel_path() {
        assert_eq!(
            sentinel_path("/tmp/work"),
            PathBuf::from("/tmp/work/.kill")
        );
    }

    #[test]
    fn test_snapshot_path() {
        assert_eq!(
            snapshot_path("/tmp/work"),
            PathBuf::from("/tmp/work/.research-progress.json")
        );
        assert_eq!(
            messages_path("/tmp/work"),
            PathBuf::from("/tmp/work/.messages.json")
        );
    }

    #[test]
    fn test_lock_mutex_recover_after_poison() {
        let mutex = std::sync::Arc::new(Mutex::new(5));
        let clone = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison it");
        })
        .join();

        assert!(mutex.is_poisoned());
        assert_eq!(*lock_mutex_recover(&mutex), 5);
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("a\n  b\tc "), "a b c");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10, "..."), "hello");
        assert_eq!(truncate_chars("hello", 5, "..."), "hello");
        assert_eq!(truncate_chars("hello world", 5, "..."), "hello...");
        // Multi-byte characters are counted, not bytes
        assert_eq!(truncate_chars("ééééé", 2, "!"), "éé!");
    }
}
