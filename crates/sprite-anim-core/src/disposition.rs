//! Post-job disposition: move the input into `processed/` on success, or into
//! a fresh timestamped run directory under `failed/<stem>/` on failure.

use std::path::{Path, PathBuf};

use crate::job::ConvertResult;

/// Move `input_path` into `processed_dir`, appending `_1, _2, …` to the stem
/// on a name collision. Creates `processed_dir` if needed.
pub async fn move_to_processed(input_path: &Path, processed_dir: &Path) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(processed_dir).await?;

    let file_name = input_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = input_path
        .extension()
        .map(|e| e.to_string_lossy().into_owned());

    let mut dest = processed_dir.join(&file_name);
    let mut counter = 1u32;
    while path_exists(&dest).await {
        let name = match &ext {
            Some(ext) => format!("{stem}_{counter}.{ext}"),
            None => format!("{stem}_{counter}"),
        };
        dest = processed_dir.join(name);
        counter += 1;
    }

    tokio::fs::rename(input_path, &dest).await?;
    Ok(dest)
}

/// Move `input_path` into a fresh `failed_dir/<stem>/<timestamp>[_n]/` run
/// directory and write `error.txt` inside it with the result's error message.
/// Updates `result.error_log_path` to the written file.
pub async fn move_to_failed(
    input_path: &Path,
    failed_dir: &Path,
    result: &mut ConvertResult,
) -> std::io::Result<PathBuf> {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem_dir = failed_dir.join(&stem);
    tokio::fs::create_dir_all(&stem_dir).await?;

    let run_dir = unique_run_dir(&stem_dir).await?;
    tokio::fs::create_dir_all(&run_dir).await?;

    let file_name = input_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    let dest = run_dir.join(&file_name);
    tokio::fs::rename(input_path, &dest).await?;

    let message = result.error_message.clone().unwrap_or_default();
    let error_path = run_dir.join("error.txt");
    tokio::fs::write(&error_path, format!("{message}\n")).await?;
    result.error_log_path = Some(error_path);

    Ok(run_dir)
}

/// Append a numeric suffix while the timestamped candidate path already
/// exists, so two failures for the same stem in the same second never
/// collide (invariant: successive failure run directories are distinct).
async fn unique_run_dir(stem_dir: &Path) -> std::io::Result<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut candidate = stem_dir.join(&timestamp);
    let mut n = 1u32;
    while path_exists(&candidate).await {
        candidate = stem_dir.join(format!("{timestamp}_{n}"));
        n += 1;
    }
    Ok(candidate)
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn move_to_processed_appends_suffix_on_collision() {
        let dir = tempdir().unwrap();
        let processed = dir.path().join("processed");
        tokio::fs::create_dir_all(&processed).await.unwrap();
        tokio::fs::write(processed.join("walk.png"), b"existing")
            .await
            .unwrap();

        let input = dir.path().join("walk.png");
        tokio::fs::write(&input, b"new").await.unwrap();

        let dest = move_to_processed(&input, &processed).await.unwrap();
        assert_eq!(dest, processed.join("walk_1.png"));
        assert!(!input.exists());
    }

    #[tokio::test]
    async fn move_to_failed_creates_timestamped_run_dir_with_error_txt() {
        let dir = tempdir().unwrap();
        let failed = dir.path().join("failed");
        let input = dir.path().join("walk.png");
        tokio::fs::write(&input, b"data").await.unwrap();

        let mut result = ConvertResult::failed(
            input.clone(),
            "walk".to_string(),
            "2026-01-01T00:00:00Z".to_string(),
        );
        result.error_message = Some("boom".to_string());

        let run_dir = move_to_failed(&input, &failed, &mut result).await.unwrap();
        assert!(run_dir.starts_with(failed.join("walk")));
        assert!(run_dir.join("walk.png").is_file());
        let error_txt = std::fs::read_to_string(run_dir.join("error.txt")).unwrap();
        assert_eq!(error_txt, "boom\n");
        assert_eq!(result.error_log_path, Some(run_dir.join("error.txt")));
    }

    #[tokio::test]
    async fn successive_failures_for_same_stem_get_distinct_run_dirs() {
        let dir = tempdir().unwrap();
        let failed = dir.path().join("failed");

        let input_a = dir.path().join("walk.png");
        tokio::fs::write(&input_a, b"a").await.unwrap();
        let mut result_a = ConvertResult::failed(input_a.clone(), "walk".into(), "t".into());
        let run_a = move_to_failed(&input_a, &failed, &mut result_a).await.unwrap();

        let input_b = dir.path().join("walk.png");
        tokio::fs::write(&input_b, b"b").await.unwrap();
        let mut result_b = ConvertResult::failed(input_b.clone(), "walk".into(), "t".into());
        let run_b = move_to_failed(&input_b, &failed, &mut result_b).await.unwrap();

        assert_ne!(run_a, run_b);
    }
}
