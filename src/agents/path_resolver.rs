// Worker executable path resolution

use std::path::{Path, PathBuf};

pub struct WorkerPathResolver;

impl WorkerPathResolver {
    /// Resolve the worker program.
    ///
    /// Paths containing a separator are taken as-is when they exist; bare
    /// names are looked up in common install locations and then on `PATH`.
    pub fn resolve(program: &str) -> Option<PathBuf> {
        let as_path = Path::new(program);
        if as_path.components().count() > 1 || as_path.is_absolute() {
            return as_path.exists().then(|| as_path.to_path_buf());
        }

        let standard_paths = [
            dirs::home_dir().map(|h| h.join(".local/bin").join(program)),
            Some(PathBuf::from("/usr/local/bin").join(program)),
            Some(PathBuf::from("/opt/homebrew/bin").join(program)),
        ];

        for path in standard_paths.iter().flatten() {
            if path.is_file() {
                log::info!("[WorkerPathResolver] Found {} at: {:?}", program, path);
                return Some(path.clone());
            }
        }

        match which::which(program) {
            Ok(path) => {
                log::info!("[WorkerPathResolver] Found {} via PATH at: {:?}", program, path);
                Some(path)
            }
            Err(e) => {
                log::debug!("[WorkerPathResolver] {} not found: {}", program, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_resolve_finds_sh() {
        let path = WorkerPathResolver::resolve("sh").expect("sh is on PATH");
        assert!(path.exists());
    }

    #[test]
    fn test_resolve_returns_none_for_nonexistent_command() {
        assert!(WorkerPathResolver::resolve("this-command-definitely-does-not-exist-12345").is_none());
    }

    #[test]
    fn test_resolve_explicit_missing_path() {
        assert!(WorkerPathResolver::resolve("/nonexistent/dir/worker").is_none());
    }

    #[test]
    fn test_resolve_explicit_existing_path() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let path = temp.path().to_str().unwrap().to_string();
        assert_eq!(WorkerPathResolver::resolve(&path), Some(temp.path().to_path_buf()));
    }
}
