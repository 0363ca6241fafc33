//! Per-workspace context and the process-wide registry keyed by resolved
//! workspace root (§3 Data model: "process-wide state: a mapping from
//! resolved workspace path to a WorkspaceContext").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::diagnostics::{self, DoctorReport, StatusReport, WatcherHealthReport};
use crate::job::JobSpec;
use crate::queue::JobQueue;
use crate::settings::Settings;
use crate::watcher::{FolderWatcher, WatcherConfig};

/// Owns a `Settings`, a `JobQueue`, and an optional `FolderWatcher` for one
/// workspace root. Lazily created on first use, never destroyed within a
/// process (§3 Invariants / Lifecycles).
pub struct WorkspaceContext {
    pub settings: Settings,
    pub queue: JobQueue,
    watcher: Mutex<Option<FolderWatcher>>,
}

impl WorkspaceContext {
    fn new(settings: Settings) -> Self {
        let _ = settings.ensure_directories();
        let queue = JobQueue::new(Arc::new(settings.clone()));
        Self {
            settings,
            queue,
            watcher: Mutex::new(None),
        }
    }

    /// Idempotently (re)start the watcher and the queue worker. Newly
    /// stable files in `inbox/` are enqueued against `profile_name`
    /// (falling back to the workspace default when `None`).
    pub fn start_watching(self: &Arc<Self>, profile_name: Option<String>) {
        self.queue.start();

        let mut guard = self.watcher.lock().unwrap();
        if guard.is_none() {
            *guard = Some(FolderWatcher::new(
                self.settings.inbox_dir.clone(),
                WatcherConfig::default(),
            ));
        }

        let ctx = self.clone();
        if let Some(watcher) = guard.as_mut() {
            watcher.start(move |path| {
                let profile = ctx.settings.get_profile(profile_name.as_deref());
                let job = JobSpec::from_file(path, ctx.settings.out_dir.clone(), None);
                ctx.queue.enqueue(job, profile);
            });
        }
    }

    /// Stop the watcher and the queue worker; returns the watcher's
    /// lifetime `files_processed` count (0 if it was never started).
    pub async fn stop_watching(&self) -> u64 {
        let mut taken = {
            let mut guard = self.watcher.lock().unwrap();
            guard.take()
        };

        let files_processed = if let Some(watcher) = taken.as_mut() {
            watcher.stop().await;
            watcher.health().files_processed
        } else {
            0
        };

        if let Some(watcher) = taken {
            *self.watcher.lock().unwrap() = Some(watcher);
        }

        self.queue.stop().await;
        files_processed
    }

    pub fn status(&self) -> StatusReport {
        let watcher = self
            .watcher
            .lock()
            .unwrap()
            .as_ref()
            .map(|w| WatcherHealthReport::from(&w.health()));

        StatusReport {
            aseprite: diagnostics::tool_status(&self.settings),
            workspace_root: self.settings.workspace_root.clone(),
            inbox_dir: self.settings.inbox_dir.clone(),
            out_dir: self.settings.out_dir.clone(),
            processed_dir: self.settings.processed_dir.clone(),
            failed_dir: self.settings.failed_dir.clone(),
            queue: self.queue.stats(),
            watcher,
        }
    }

    pub fn doctor(&self) -> DoctorReport {
        diagnostics::doctor(&self.settings)
    }
}

static CONTEXTS: Lazy<Mutex<HashMap<PathBuf, Arc<WorkspaceContext>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Look up or lazily create the context for `workspace_root`, which must
/// already be resolved to an absolute path by the caller (typically via
/// `path_policy::resolve_workspace_path`).
pub fn context_for(workspace_root: &Path) -> Arc<WorkspaceContext> {
    let mut contexts = CONTEXTS.lock().unwrap();
    contexts
        .entry(workspace_root.to_path_buf())
        .or_insert_with(|| Arc::new(WorkspaceContext::new(Settings::from_env(workspace_root))))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn context_for_is_cached_per_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let a = context_for(&root);
        let b = context_for(&root);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn context_for_creates_workspace_subdirectories() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("fresh-workspace");
        std::fs::create_dir_all(&root).unwrap();
        let root = root.canonicalize().unwrap();

        let ctx = context_for(&root);
        assert!(ctx.settings.inbox_dir.is_dir());
        assert!(ctx.settings.out_dir.is_dir());
        assert!(ctx.settings.processed_dir.is_dir());
        assert!(ctx.settings.failed_dir.is_dir());
    }

    #[tokio::test]
    async fn start_and_stop_watching_is_idempotent_and_reports_health() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("watch-workspace");
        std::fs::create_dir_all(&root).unwrap();
        let root = root.canonicalize().unwrap();

        let ctx = context_for(&root);
        ctx.start_watching(None);
        ctx.start_watching(None);
        assert!(ctx.status().queue.running);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let processed = ctx.stop_watching().await;
        assert_eq!(processed, 0);
        assert!(!ctx.status().queue.running);
    }
}
