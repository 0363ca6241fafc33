//! Folder watcher: emits newly-stable files dropped into a directory.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::stable_write::{wait_for_stable, StableWriteConfig};

const PROCESSED_SET_PRUNE_THRESHOLD: usize = 10_000;
const DEFAULT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    pub extensions: Vec<String>,
    pub stable_write: StableWriteConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            stable_write: StableWriteConfig::default(),
        }
    }
}

/// Read-only snapshot of watcher health, cheap to clone and safe to expose
/// across the MCP surface.
#[derive(Debug, Clone)]
pub struct WatcherHealth {
    pub running: bool,
    pub files_processed: u64,
    pub last_activity: Option<SystemTime>,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_scan_at: Option<SystemTime>,
}

struct Counters {
    running: AtomicBool,
    files_processed: AtomicU64,
    error_count: AtomicU64,
    last_activity: Mutex<Option<SystemTime>>,
    last_error: Mutex<Option<String>>,
    last_scan_at: Mutex<Option<SystemTime>>,
}

impl Counters {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            files_processed: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_activity: Mutex::new(None),
            last_error: Mutex::new(None),
            last_scan_at: Mutex::new(None),
        }
    }

    fn snapshot(&self) -> WatcherHealth {
        WatcherHealth {
            running: self.running.load(Ordering::SeqCst),
            files_processed: self.files_processed.load(Ordering::SeqCst),
            error_count: self.error_count.load(Ordering::SeqCst),
            last_activity: *self.last_activity.lock().unwrap(),
            last_error: self.last_error.lock().unwrap().clone(),
            last_scan_at: *self.last_scan_at.lock().unwrap(),
        }
    }

    fn record_emit(&self) {
        self.files_processed.fetch_add(1, Ordering::SeqCst);
        *self.last_activity.lock().unwrap() = Some(SystemTime::now());
    }

    fn record_error(&self, message: String) {
        self.error_count.fetch_add(1, Ordering::SeqCst);
        *self.last_error.lock().unwrap() = Some(message);
    }

    fn record_scan(&self) {
        *self.last_scan_at.lock().unwrap() = Some(SystemTime::now());
    }
}

/// Watches one directory for newly-written, stable image files.
///
/// The caller-supplied callback runs on the watcher's own task and is
/// expected to be fast and non-blocking (typically scheduling work onto a
/// queue rather than doing it inline).
pub struct FolderWatcher {
    dir: PathBuf,
    config: WatcherConfig,
    counters: Arc<Counters>,
    task: Option<JoinHandle<()>>,
}

impl FolderWatcher {
    pub fn new(dir: PathBuf, config: WatcherConfig) -> Self {
        Self {
            dir,
            config,
            counters: Arc::new(Counters::new()),
            task: None,
        }
    }

    pub fn health(&self) -> WatcherHealth {
        self.counters.snapshot()
    }

    /// Start the background watch loop. Idempotent: a second call while
    /// already running is a no-op.
    pub fn start<F>(&mut self, on_file: F)
    where
        F: Fn(PathBuf) + Send + Sync + 'static,
    {
        if self.task.is_some() {
            return;
        }

        let dir = self.dir.clone();
        let config = self.config.clone();
        let counters = self.counters.clone();
        let on_file = Arc::new(on_file);

        counters.running.store(true, Ordering::SeqCst);
        self.task = Some(tokio::spawn(run_loop(dir, config, counters, on_file)));
    }

    /// Stop the background task and wait for it to exit.
    pub async fn stop(&mut self) {
        self.counters.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

async fn run_loop(
    dir: PathBuf,
    config: WatcherConfig,
    counters: Arc<Counters>,
    on_file: Arc<dyn Fn(PathBuf) + Send + Sync>,
) {
    match try_event_stream(&dir, &config, &counters, &on_file).await {
        Ok(()) => {}
        Err(e) => {
            counters.record_error(format!("event-stream backend unavailable: {e}"));
            poll_loop(&dir, &config, &counters, &on_file).await;
        }
    }
}

/// Event-stream backend: subscribe to OS-level notifications, debounce with
/// the stable-write guard, and fall back to polling if the watch itself
/// cannot be established. Runs until cancelled.
async fn try_event_stream(
    dir: &Path,
    config: &WatcherConfig,
    counters: &Arc<Counters>,
    on_file: &Arc<dyn Fn(PathBuf) + Send + Sync>,
) -> notify::Result<()> {
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        },
        Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;

    let mut processed: HashSet<PathBuf> = HashSet::new();

    loop {
        let event = match raw_rx.recv().await {
            Some(event) => event,
            None => return Ok(()),
        };

        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            continue;
        }

        for path in event.paths {
            counters.record_scan();
            if !is_valid_file(&path, &config.extensions) || processed.contains(&path) {
                continue;
            }

            if wait_for_stable(&path, config.stable_write).await {
                processed.insert(path.clone());
                counters.record_emit();
                on_file(path);
            }

            prune_processed_set(&mut processed, dir);
        }
    }
}

/// Polling fallback: enumerate the directory on each tick, track mtimes by
/// hand, and run a short stable-write check before emitting.
async fn poll_loop(
    dir: &Path,
    config: &WatcherConfig,
    counters: &Arc<Counters>,
    on_file: &Arc<dyn Fn(PathBuf) + Send + Sync>,
) {
    let mut seen: HashMap<PathBuf, SystemTime> = HashMap::new();
    let mut processed: HashSet<PathBuf> = HashSet::new();
    let short_timeout = StableWriteConfig {
        interval: config.stable_write.interval,
        check_count: config.stable_write.check_count,
        timeout: Duration::from_secs(5),
    };
    let mut backoff = Duration::ZERO;

    loop {
        if !counters.running.load(Ordering::SeqCst) {
            return;
        }

        if backoff > Duration::ZERO {
            tokio::time::sleep(backoff).await;
        }

        let entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                counters.record_error(format!("poll scan failed: {e}"));
                backoff = (backoff + Duration::from_millis(500)).min(Duration::from_secs(5));
                continue;
            }
        };
        backoff = Duration::ZERO;
        counters.record_scan();

        let mut entries = entries;
        let mut present = HashSet::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(_) => break,
            };
            let path = entry.path();
            present.insert(path.clone());

            if !is_valid_file(&path, &config.extensions) || processed.contains(&path) {
                continue;
            }

            let mtime = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(_) => continue,
            };

            let previously_seen = seen.get(&path).copied();
            seen.insert(path.clone(), mtime);

            if previously_seen == Some(mtime) && wait_for_stable(&path, short_timeout).await {
                processed.insert(path.clone());
                counters.record_emit();
                on_file(path);
            }
        }

        seen.retain(|p, _| present.contains(p));
        processed.retain(|p| present.contains(p));
        prune_processed_set(&mut processed, dir);

        tokio::time::sleep(config.poll_interval).await;
    }
}

fn prune_processed_set(processed: &mut HashSet<PathBuf>, _dir: &Path) {
    if processed.len() > PROCESSED_SET_PRUNE_THRESHOLD {
        processed.retain(|p| p.exists());
    }
}

/// List valid image files directly under `inbox_dir`, oldest `mtime` first
/// (ties broken by filename), capped at `limit`. Used by the batch
/// `convert_inbox` operation, which is independent of the watcher/queue.
pub fn scan_inbox(inbox_dir: &Path, limit: usize) -> Vec<PathBuf> {
    let extensions = WatcherConfig::default().extensions;
    let Ok(entries) = std::fs::read_dir(inbox_dir) else {
        return Vec::new();
    };

    let mut files: Vec<(SystemTime, String, PathBuf)> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| is_valid_file(path, &extensions))
        .filter_map(|path| {
            let mtime = path.metadata().and_then(|m| m.modified()).ok()?;
            let name = path.file_name()?.to_string_lossy().into_owned();
            Some((mtime, name, path))
        })
        .collect();

    files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    files.into_iter().take(limit).map(|(_, _, path)| path).collect()
}

fn is_valid_file(path: &Path, extensions: &[String]) -> bool {
    if !path.is_file() {
        return false;
    }
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };
    if name.starts_with('.') {
        return false;
    }
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_lowercase(),
        None => return false,
    };
    extensions.iter().any(|allowed| allowed == &ext)
}
