//! Single-worker job queue: serialises external-tool invocations per workspace.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::disposition;
use crate::error::CoreError;
use crate::job::{resolve_with_sidecar, ConvertResult, JobSpec};
use crate::profile::{self, ConversionProfile};
use crate::runner;
use crate::settings::Settings;

/// A callback invoked with every terminal `ConvertResult`, on the worker's
/// own task. Must be fast or offload heavier work elsewhere.
pub type CompleteCallback =
    Arc<dyn Fn(ConvertResult) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct QueuedJob {
    job: JobSpec,
    profile: ConversionProfile,
}

/// Point-in-time snapshot of queue statistics, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub queue_length: i64,
    pub running: bool,
    pub total_processed: u64,
    pub recent_success: u64,
    pub recent_failures: u64,
    pub last_error: Option<String>,
}

struct Counters {
    total_processed: AtomicU64,
    recent_success: AtomicU64,
    recent_failures: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl Counters {
    fn new() -> Self {
        Self {
            total_processed: AtomicU64::new(0),
            recent_success: AtomicU64::new(0),
            recent_failures: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }
}

/// Per-workspace single-worker job queue. `enqueue` is non-blocking; the
/// worker processes jobs strictly sequentially (invariant iv: at most one
/// external-tool invocation in flight per workspace).
pub struct JobQueue {
    settings: Arc<Settings>,
    sender: Mutex<mpsc::UnboundedSender<QueuedJob>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<QueuedJob>>>,
    counters: Arc<Counters>,
    queue_len: Arc<AtomicI64>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    on_job_complete: Arc<Mutex<Option<CompleteCallback>>>,
}

impl JobQueue {
    pub fn new(settings: Arc<Settings>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            settings,
            sender: Mutex::new(sender),
            receiver: Mutex::new(Some(receiver)),
            counters: Arc::new(Counters::new()),
            queue_len: Arc::new(AtomicI64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            on_job_complete: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_on_job_complete(&self, callback: CompleteCallback) {
        *self.on_job_complete.lock().unwrap() = Some(callback);
    }

    pub fn enqueue(&self, job: JobSpec, profile: ConversionProfile) {
        self.queue_len.fetch_add(1, Ordering::SeqCst);
        debug!(job_name = %job.job_name, "queue: job enqueued");
        let _ = self.sender.lock().unwrap().send(QueuedJob { job, profile });
    }

    /// Spawn exactly one worker task. Idempotent: a second call while already
    /// running is a no-op.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let receiver = self.receiver.lock().unwrap().take();
        let Some(receiver) = receiver else {
            self.running.store(false, Ordering::SeqCst);
            return;
        };

        let settings = self.settings.clone();
        let running = self.running.clone();
        let counters = self.counters.clone();
        let queue_len = self.queue_len.clone();
        let on_job_complete = self.on_job_complete.clone();

        let handle = tokio::spawn(worker_loop(
            settings,
            receiver,
            running,
            counters,
            queue_len,
            on_job_complete,
        ));
        *self.worker.lock().unwrap() = Some(handle);
    }

    /// Cancel the worker task and await its exit, then rebuild the channel so
    /// a later `start()` can run again.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = sender;
        *self.receiver.lock().unwrap() = Some(receiver);
        self.queue_len.store(0, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queue_length: self.queue_len.load(Ordering::SeqCst),
            running: self.is_running(),
            total_processed: self.counters.total_processed.load(Ordering::SeqCst),
            recent_success: self.counters.recent_success.load(Ordering::SeqCst),
            recent_failures: self.counters.recent_failures.load(Ordering::SeqCst),
            last_error: self.counters.last_error.lock().unwrap().clone(),
        }
    }
}

async fn worker_loop(
    settings: Arc<Settings>,
    mut receiver: mpsc::UnboundedReceiver<QueuedJob>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    queue_len: Arc<AtomicI64>,
    on_job_complete: Arc<Mutex<Option<CompleteCallback>>>,
) {
    while running.load(Ordering::SeqCst) {
        let queued = match tokio::time::timeout(Duration::from_secs(1), receiver.recv()).await {
            Ok(Some(queued)) => queued,
            Ok(None) => break,
            Err(_) => continue,
        };
        queue_len.fetch_sub(1, Ordering::SeqCst);

        let (mut result, processed_dir, failed_dir) = process_queued(&settings, queued).await;
        finish_and_dispose(&counters, &processed_dir, &failed_dir, &mut result).await;

        if let Some(callback) = on_job_complete.lock().unwrap().clone() {
            callback(result).await;
        }
    }
}

async fn process_queued(settings: &Settings, queued: QueuedJob) -> (ConvertResult, PathBuf, PathBuf) {
    let QueuedJob { job, mut profile } = queued;
    let processed_dir = job.processed_dir.clone().unwrap_or_else(|| settings.processed_dir.clone());
    let failed_dir = job.failed_dir.clone().unwrap_or_else(|| settings.failed_dir.clone());

    let result = match resolve_with_sidecar(&profile, &job.input_path, job.auto_detect_grid) {
        Ok(resolved) => {
            profile = resolved.profile;
            let mut job = job;
            job.auto_detect_grid = resolved.auto_detect_grid;

            info!(job_name = %job.job_name, "queue: running job");
            match runner::run_job(settings, &job, &mut profile).await {
                Ok(result) => result,
                Err(e) => synthesize_error_result(&job, &e).await,
            }
        }
        Err(e) => {
            error!(error_code = %e.code_str(), "queue: sidecar override rejected job before spawn");
            ConvertResult {
                error_code: Some(e.code_str()),
                error_message: Some(e.to_string()),
                ..ConvertResult::failed(job.input_path.clone(), job.job_name.clone(), now_iso())
            }
        }
    };

    (result, processed_dir, failed_dir)
}

async fn finish_and_dispose(
    counters: &Counters,
    processed_dir: &Path,
    failed_dir: &Path,
    result: &mut ConvertResult,
) {
    counters.total_processed.fetch_add(1, Ordering::SeqCst);
    if result.success {
        counters.recent_success.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = disposition::move_to_processed(&result.input_path, processed_dir).await {
            error!(error = %e, "queue: failed to move input to processed/");
        }
    } else {
        counters.recent_failures.fetch_add(1, Ordering::SeqCst);
        *counters.last_error.lock().unwrap() = result.error_message.clone();
        if let Err(e) = disposition::move_to_failed(&result.input_path, failed_dir, result).await {
            error!(error = %e, "queue: failed to move input to failed/");
        }
    }
}

/// Build a `ConvertResult` for a runner-internal exception (tool missing,
/// I/O failure) and persist `error.txt` / `job.log` the way the runner would
/// have, since the runner itself never got as far as writing them.
async fn synthesize_error_result(job: &JobSpec, err: &CoreError) -> ConvertResult {
    let started_at = now_iso();
    let error_code = match err {
        CoreError::SpawnFailed(_) => "ASEPRITE_ERROR".to_string(),
        _ => "UNEXPECTED_EXCEPTION".to_string(),
    };

    let mut result = ConvertResult::failed(job.input_path.clone(), job.job_name.clone(), started_at.clone());
    result.error_code = Some(error_code.clone());
    result.error_message = Some(err.to_string());
    result.completed_at = Some(now_iso());

    let out_dir = job.output_dir.join(&job.job_name);
    if tokio::fs::create_dir_all(&out_dir).await.is_ok() {
        let error_path = out_dir.join("error.txt");
        let message = result.error_message.clone().unwrap_or_default();
        if tokio::fs::write(&error_path, format!("{message}\n")).await.is_ok() {
            result.error_log_path = Some(error_path);
        }

        let log = serde_json::json!({
            "status": "failed",
            "error_code": error_code,
            "message": result.error_message,
            "started_at": started_at,
            "completed_at": result.completed_at,
        });
        if let Ok(serialized) = serde_json::to_string_pretty(&log) {
            let _ = tokio::fs::write(out_dir.join("job.log"), serialized.replace("\r\n", "\n")).await;
        }
    }

    result
}

/// Process `files` synchronously, in order, without touching the queue.
/// Applies sidecar overrides per file (tool overrides are already baked into
/// `profile` by the caller, preserving the batch-wide asymmetry from
/// `convert_inbox`'s original behaviour) and handles disposition identically
/// to the worker loop. `processed_dir`/`failed_dir` fall back to `settings`
/// when not given.
pub async fn process_batch(
    settings: &Settings,
    files: &[PathBuf],
    profile: &ConversionProfile,
    out_dir: &Path,
    processed_dir: Option<&Path>,
    failed_dir: Option<&Path>,
) -> Vec<ConvertResult> {
    let counters = Counters::new();
    let processed_dir = processed_dir.map(Path::to_path_buf).unwrap_or_else(|| settings.processed_dir.clone());
    let failed_dir = failed_dir.map(Path::to_path_buf).unwrap_or_else(|| settings.failed_dir.clone());
    let mut results = Vec::with_capacity(files.len());

    for file in files {
        let mut result = process_one(settings, file, profile, out_dir).await;
        finish_and_dispose(&counters, &processed_dir, &failed_dir, &mut result).await;
        results.push(result);
    }

    results
}

/// Process exactly one file outside the queue, with tool-call overrides
/// applied *after* the sidecar so they carry the highest precedence (§3:
/// "tool-call arguments > sidecar override > profile > built-in defaults").
/// This is the `convert_file` dispatcher operation's entry point; unlike
/// `process_batch`/`convert_inbox` it does not share the batch-path asymmetry
/// (Open Question (a)) since there's only ever one file in play.
#[allow(clippy::too_many_arguments)]
pub async fn convert_one_file(
    settings: &Settings,
    input_path: &Path,
    out_dir: &Path,
    job_name: Option<String>,
    profile: ConversionProfile,
    grid_rows: Option<u32>,
    grid_cols: Option<u32>,
    fps: Option<u32>,
    processed_dir: Option<&Path>,
    failed_dir: Option<&Path>,
) -> ConvertResult {
    let counters = Counters::new();
    let processed_dir = processed_dir.map(Path::to_path_buf).unwrap_or_else(|| settings.processed_dir.clone());
    let failed_dir = failed_dir.map(Path::to_path_buf).unwrap_or_else(|| settings.failed_dir.clone());

    let resolved_job_name = job_name.clone().unwrap_or_else(|| {
        input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "job".to_string())
    });

    let mut result = match resolve_with_sidecar(&profile, input_path, true) {
        Ok(mut resolved) => {
            if let Err(e) = profile::apply_tool_overrides(&mut resolved.profile, grid_rows, grid_cols, fps) {
                result_for_error(input_path, &resolved_job_name, &e)
            } else {
                let mut job = JobSpec::from_file(input_path.to_path_buf(), out_dir.to_path_buf(), job_name);
                job.auto_detect_grid = resolved.auto_detect_grid;
                match runner::run_job(settings, &job, &mut resolved.profile).await {
                    Ok(result) => result,
                    Err(e) => synthesize_error_result(&job, &e).await,
                }
            }
        }
        Err(e) => result_for_error(input_path, &resolved_job_name, &e),
    };

    finish_and_dispose(&counters, &processed_dir, &failed_dir, &mut result).await;
    result
}

fn result_for_error(input_path: &Path, job_name: &str, err: &CoreError) -> ConvertResult {
    ConvertResult {
        error_code: Some(err.code_str()),
        error_message: Some(err.to_string()),
        ..ConvertResult::failed(input_path.to_path_buf(), job_name.to_string(), now_iso())
    }
}

async fn process_one(
    settings: &Settings,
    file: &Path,
    profile: &ConversionProfile,
    out_dir: &Path,
) -> ConvertResult {
    let job_name = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "job".to_string());

    let resolved = match resolve_with_sidecar(profile, file, true) {
        Ok(resolved) => resolved,
        Err(e) => {
            return ConvertResult {
                error_code: Some(e.code_str()),
                error_message: Some(e.to_string()),
                ..ConvertResult::failed(file.to_path_buf(), job_name, now_iso())
            };
        }
    };

    let mut job = JobSpec::from_file(file.to_path_buf(), out_dir.to_path_buf(), None);
    job.auto_detect_grid = resolved.auto_detect_grid;
    let mut job_profile = resolved.profile;

    match runner::run_job(settings, &job, &mut job_profile).await {
        Ok(result) => result,
        Err(e) => synthesize_error_result(&job, &e).await,
    }
}

/// Apply tool-call-supplied grid/fps overrides onto a profile copy before
/// batch or single-file processing. Thin re-export so call sites don't need
/// to reach into `profile` directly.
pub fn apply_tool_overrides(
    profile: &mut ConversionProfile,
    grid_rows: Option<u32>,
    grid_cols: Option<u32>,
    fps: Option<u32>,
) -> Result<(), CoreError> {
    profile::apply_tool_overrides(profile, grid_rows, grid_cols, fps)
}

fn now_iso() -> String {
    chrono::Local::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn make_settings(dir: &Path) -> Settings {
        let mut settings = Settings::from_env(dir);
        settings.aseprite_exe = PathBuf::from("/definitely/not/a/real/aseprite/binary");
        settings.ensure_directories().unwrap();
        settings
    }

    #[tokio::test]
    async fn enqueue_start_stop_processes_job_and_moves_to_failed() {
        let dir = tempdir().unwrap();
        let settings = Arc::new(make_settings(dir.path()));

        let input = settings.inbox_dir.join("walk.png");
        std::fs::write(&input, b"fake").unwrap();

        let queue = JobQueue::new(settings.clone());
        let job = JobSpec::from_file(input.clone(), settings.out_dir.clone(), None);
        let profile = ConversionProfile::game_default();

        queue.enqueue(job, profile);
        queue.start();

        let mut waited = Duration::ZERO;
        while queue.stats().total_processed == 0 && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        queue.stop().await;

        let stats = queue.stats();
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.recent_failures, 1);
        assert!(!input.exists());
        assert!(settings.failed_dir.join("walk").is_dir());
    }

    #[tokio::test]
    async fn process_batch_runs_files_in_order_and_disposes_each() {
        let dir = tempdir().unwrap();
        let settings = make_settings(dir.path());

        let a = settings.inbox_dir.join("a.png");
        let b = settings.inbox_dir.join("b.png");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let profile = ConversionProfile::game_default();
        let results = process_batch(&settings, &[a.clone(), b.clone()], &profile, &settings.out_dir, None, None).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].job_name, "a");
        assert_eq!(results[1].job_name, "b");
        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[tokio::test]
    async fn on_job_complete_callback_runs_after_disposition() {
        let dir = tempdir().unwrap();
        let settings = Arc::new(make_settings(dir.path()));
        let input = settings.inbox_dir.join("walk.png");
        std::fs::write(&input, b"fake").unwrap();

        let queue = JobQueue::new(settings.clone());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        queue.set_on_job_complete(Arc::new(move |_result| {
            let seen = seen_clone.clone();
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        }));

        queue.enqueue(
            JobSpec::from_file(input, settings.out_dir.clone(), None),
            ConversionProfile::game_default(),
        );
        queue.start();

        let mut waited = Duration::ZERO;
        while seen.load(Ordering::SeqCst) == 0 && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        queue.stop().await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn convert_one_file_applies_tool_overrides_over_sidecar() {
        let dir = tempdir().unwrap();
        let settings = make_settings(dir.path());
        let input = settings.inbox_dir.join("walk.png");
        std::fs::write(&input, b"fake").unwrap();
        std::fs::write(
            dir.path().join("inbox").join("walk.job.json"),
            r#"{"grid": {"rows": 3, "cols": 4}, "timing": {"fps": 8}}"#,
        )
        .unwrap();

        let result = convert_one_file(
            &settings,
            &input,
            &settings.out_dir,
            None,
            ConversionProfile::game_default(),
            Some(2),
            None,
            Some(12),
            None,
            None,
        )
        .await;

        // The tool doesn't spawn (no real aseprite binary), but the job.log
        // written for the synthesized error still reflects the grid the
        // runner attempted with before failing to spawn.
        assert!(!result.success);
        assert!(settings.failed_dir.join("walk").is_dir());
    }

    #[tokio::test]
    async fn convert_one_file_respects_processed_dir_override() {
        let dir = tempdir().unwrap();
        let settings = make_settings(dir.path());
        let input = settings.inbox_dir.join("walk.png");
        std::fs::write(&input, b"fake").unwrap();
        let custom_failed = dir.path().join("custom_failed");

        let result = convert_one_file(
            &settings,
            &input,
            &settings.out_dir,
            None,
            ConversionProfile::game_default(),
            None,
            None,
            None,
            None,
            Some(&custom_failed),
        )
        .await;

        assert!(!result.success);
        assert!(custom_failed.join("walk").is_dir());
        assert!(!settings.failed_dir.join("walk").is_dir());
    }
}
