//! Data directory layout.

use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "WEFT_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `WEFT_DATA_DIR` environment variable
/// 2. `~/.weft`
/// 3. `.weft` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".weft");
    }

    PathBuf::from(".weft")
}

/// Create the data directory if needed.
pub async fn ensure_data_dir(dir: &std::path::Path) -> Result<(), std::io::Error> {
    tokio::fs::create_dir_all(dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_data_dir_ends_with_weft() {
        if std::env::var(DATA_DIR_ENV).is_err() {
            assert!(resolve_data_dir().ends_with(".weft"));
        }
    }

    #[tokio::test]
    async fn ensure_data_dir_creates_nested() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("a").join("b");
        ensure_data_dir(&dir).await.unwrap();
        assert!(dir.is_dir());
    }
}
