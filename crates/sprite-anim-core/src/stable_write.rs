//! Wait until a file under write has stopped growing before touching it.

use std::path::Path;
use std::time::Duration;

/// Tunable parameters for [`wait_for_stable`].
#[derive(Debug, Clone, Copy)]
pub struct StableWriteConfig {
    pub interval: Duration,
    pub check_count: u32,
    pub timeout: Duration,
}

impl Default for StableWriteConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(300),
            check_count: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Poll `path`'s size and mtime every `config.interval`; return `true` once
/// both have held steady across `config.check_count` consecutive polls.
///
/// Returns `false` if the path disappears or can't be stat'd, or if
/// `config.timeout` elapses first.
pub async fn wait_for_stable(path: &Path, config: StableWriteConfig) -> bool {
    let deadline = tokio::time::Instant::now() + config.timeout;
    let mut last: Option<(u64, std::time::SystemTime)> = None;
    let mut stable_polls = 0u32;

    loop {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }

        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(_) => return false,
        };
        let mtime = match metadata.modified() {
            Ok(m) => m,
            Err(_) => return false,
        };
        let current = (metadata.len(), mtime);

        if Some(current) == last {
            stable_polls += 1;
            if stable_polls >= config.check_count {
                return true;
            }
        } else {
            stable_polls = 1;
            last = Some(current);
        }

        tokio::time::sleep(config.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[tokio::test]
    async fn stable_file_is_detected_quickly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("still.png");
        std::fs::write(&path, b"already complete").unwrap();

        let config = StableWriteConfig {
            interval: Duration::from_millis(10),
            check_count: 3,
            timeout: Duration::from_secs(2),
        };
        assert!(wait_for_stable(&path, config).await);
    }

    #[tokio::test]
    async fn missing_file_returns_false() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.png");
        let config = StableWriteConfig {
            interval: Duration::from_millis(10),
            check_count: 2,
            timeout: Duration::from_millis(200),
        };
        assert!(!wait_for_stable(&path, config).await);
    }

    #[tokio::test]
    async fn growing_file_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("growing.png");
        std::fs::write(&path, b"a").unwrap();

        let config = StableWriteConfig {
            interval: Duration::from_millis(20),
            check_count: 3,
            timeout: Duration::from_millis(150),
        };

        let path_clone = path.clone();
        let writer = tokio::spawn(async move {
            for i in 0..20u8 {
                tokio::time::sleep(Duration::from_millis(15)).await;
                let mut f = std::fs::OpenOptions::new()
                    .append(true)
                    .open(&path_clone)
                    .unwrap();
                f.write_all(&[i]).unwrap();
            }
        });

        assert!(!wait_for_stable(&path, config).await);
        writer.abort();
    }
}
