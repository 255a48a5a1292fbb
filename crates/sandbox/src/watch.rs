//! File table, staleness detection and the polling watcher thread.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::types::FileRole;

/// Samples modification stamps for watched paths.
pub trait StampSource: Send {
    /// Returns `None` when the path cannot be stat'd.
    fn stamp(&self, path: &Path) -> Option<SystemTime>;
}

/// Reads stamps from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStamps;

impl StampSource for FsStamps {
    fn stamp(&self, path: &Path) -> Option<SystemTime> {
        fs::metadata(path).and_then(|meta| meta.modified()).ok()
    }
}

#[derive(Debug, Clone)]
pub struct WatchedFile {
    path: PathBuf,
    role: FileRole,
    stamp: Option<SystemTime>,
    dependents: BTreeSet<usize>,
}

impl WatchedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn role(&self) -> FileRole {
        self.role
    }

    pub fn stamp(&self) -> Option<SystemTime> {
        self.stamp
    }

    /// Indices of the files that include this one.
    pub fn dependents(&self) -> &BTreeSet<usize> {
        &self.dependents
    }
}

/// Every file the session reads, indexed by insertion order. Entries are never removed.
pub struct WatchedFileTable {
    files: Vec<WatchedFile>,
    stamps: Box<dyn StampSource>,
}

impl Default for WatchedFileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchedFileTable {
    pub fn new() -> Self {
        Self::with_stamp_source(FsStamps)
    }

    pub fn with_stamp_source(stamps: impl StampSource + 'static) -> Self {
        Self {
            files: Vec::new(),
            stamps: Box::new(stamps),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&WatchedFile> {
        self.files.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &WatchedFile)> {
        self.files.iter().enumerate()
    }

    pub fn index_of(&self, path: &Path) -> Option<usize> {
        let key = normalize(path);
        self.files.iter().position(|file| file.path == key)
    }

    /// Registers `path` with `role`, returning the existing index when the path is known.
    pub fn add(&mut self, path: &Path, role: FileRole) -> usize {
        if let Some(index) = self.index_of(path) {
            return index;
        }
        let path = normalize(path);
        let stamp = self.stamps.stamp(&path);
        tracing::debug!(path = %path.display(), %role, "watching file");
        self.files.push(WatchedFile {
            path,
            role,
            stamp,
            dependents: BTreeSet::new(),
        });
        self.files.len() - 1
    }

    /// Registers an included file on behalf of `parent`. Idempotent per path.
    pub fn add_dependency(&mut self, parent: usize, path: &Path) -> usize {
        let index = self.add(path, FileRole::Dependency);
        if index != parent {
            self.files[index].dependents.insert(parent);
        }
        index
    }

    /// Compares a fresh stamp with the stored one and reports each change exactly once.
    ///
    /// Unreadable paths count as unchanged so transient filesystem states never
    /// trigger a reload.
    pub fn check_staleness(&mut self, index: usize) -> bool {
        let Some(file) = self.files.get_mut(index) else {
            return false;
        };
        let Some(current) = self.stamps.stamp(&file.path) else {
            return false;
        };
        if file.stamp == Some(current) {
            return false;
        }
        file.stamp = Some(current);
        true
    }

    /// Every index whose content includes `index`, directly or through other includes.
    pub fn transitive_dependents(&self, index: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            let Some(file) = self.files.get(current) else {
                continue;
            };
            for &parent in &file.dependents {
                if seen.insert(parent) {
                    stack.push(parent);
                }
            }
        }
        seen
    }
}

/// Canonical form of `path`. A file that does not exist yet keeps its name
/// under the canonical parent, so it matches once created.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|dir| dir.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

/// Shared handle used by the watcher thread and the main loop.
pub type SharedFileTable = Arc<Mutex<WatchedFileTable>>;

pub fn lock_table(table: &SharedFileTable) -> MutexGuard<'_, WatchedFileTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Creates the single-slot channel carrying the index of a changed file.
pub fn change_slot() -> (ChangeNotifier, ChangeReceiver) {
    let (tx, rx) = bounded(1);
    (ChangeNotifier { tx }, ChangeReceiver { rx })
}

#[derive(Clone)]
pub struct ChangeNotifier {
    tx: Sender<usize>,
}

impl ChangeNotifier {
    /// Publishes `index` unless a previous change is still pending.
    pub fn offer(&self, index: usize) -> bool {
        match self.tx.try_send(index) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.tx.is_full()
    }
}

pub struct ChangeReceiver {
    rx: Receiver<usize>,
}

impl ChangeReceiver {
    pub fn take(&self) -> Option<usize> {
        self.rx.try_recv().ok()
    }
}

/// One watcher pass: publishes the first stale file, or nothing while the slot is occupied.
///
/// Files after the published one keep their old stamps and are picked up by
/// the next pass.
pub fn poll_once(table: &SharedFileTable, notifier: &ChangeNotifier) -> Option<usize> {
    if notifier.is_occupied() {
        return None;
    }
    let mut table = lock_table(table);
    for index in 0..table.len() {
        if table.check_staleness(index) {
            if notifier.offer(index) {
                return Some(index);
            }
            return None;
        }
    }
    None
}

pub struct WatcherHandle {
    join: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WatcherHandle {
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// Spawns the polling thread. It exits once `shutdown` is raised.
pub fn spawn_watcher(
    table: SharedFileTable,
    notifier: ChangeNotifier,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> Result<WatcherHandle> {
    let flag = shutdown.clone();
    let join = thread::Builder::new()
        .name("file-watcher".into())
        .spawn(move || {
            tracing::debug!(interval_ms = interval.as_millis() as u64, "file watcher started");
            while !flag.load(Ordering::SeqCst) {
                if let Some(index) = poll_once(&table, &notifier) {
                    tracing::debug!(index, "file change detected");
                }
                let mut slept = Duration::ZERO;
                while slept < interval && !flag.load(Ordering::SeqCst) {
                    let step = SLEEP_SLICE.min(interval - slept);
                    thread::sleep(step);
                    slept += step;
                }
            }
            tracing::debug!("file watcher stopped");
        })
        .context("failed to spawn file watcher thread")?;

    Ok(WatcherHandle {
        join: Some(join),
        shutdown,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::UNIX_EPOCH;

    #[derive(Clone, Default)]
    pub(crate) struct FakeStamps {
        stamps: Arc<Mutex<HashMap<PathBuf, SystemTime>>>,
    }

    impl FakeStamps {
        pub(crate) fn touch(&self, path: &str, secs: u64) {
            self.stamps
                .lock()
                .unwrap()
                .insert(PathBuf::from(path), UNIX_EPOCH + Duration::from_secs(secs));
        }
    }

    impl StampSource for FakeStamps {
        fn stamp(&self, path: &Path) -> Option<SystemTime> {
            self.stamps.lock().unwrap().get(path).copied()
        }
    }

    #[test]
    fn staleness_reported_once_per_change() {
        let stamps = FakeStamps::default();
        stamps.touch("/virtual/a.frag", 1);
        let mut table = WatchedFileTable::with_stamp_source(stamps.clone());
        let index = table.add(Path::new("/virtual/a.frag"), FileRole::Fragment);

        assert!(!table.check_staleness(index));
        stamps.touch("/virtual/a.frag", 2);
        assert!(table.check_staleness(index));
        assert!(!table.check_staleness(index));
    }

    #[test]
    fn unreadable_path_is_unchanged() {
        let mut table = WatchedFileTable::with_stamp_source(FakeStamps::default());
        let index = table.add(Path::new("/virtual/missing.frag"), FileRole::Fragment);
        assert!(!table.check_staleness(index));
        assert!(!table.check_staleness(42));
    }

    #[test]
    fn add_dependency_is_idempotent() {
        let mut table = WatchedFileTable::with_stamp_source(FakeStamps::default());
        let frag = table.add(Path::new("/virtual/a.frag"), FileRole::Fragment);
        let vert = table.add(Path::new("/virtual/a.vert"), FileRole::Vertex);
        let first = table.add_dependency(frag, Path::new("/virtual/lib.glsl"));
        let second = table.add_dependency(vert, Path::new("/virtual/lib.glsl"));
        assert_eq!(first, second);
        assert_eq!(table.len(), 3);
        let deps: Vec<_> = table.get(first).unwrap().dependents().iter().copied().collect();
        assert_eq!(deps, vec![frag, vert]);
    }

    #[test]
    fn transitive_dependents_follow_nested_includes() {
        let mut table = WatchedFileTable::with_stamp_source(FakeStamps::default());
        let frag = table.add(Path::new("/virtual/a.frag"), FileRole::Fragment);
        let outer = table.add_dependency(frag, Path::new("/virtual/outer.glsl"));
        let inner = table.add_dependency(outer, Path::new("/virtual/inner.glsl"));
        let found = table.transitive_dependents(inner);
        assert!(found.contains(&frag));
        assert!(found.contains(&outer));
    }

    #[test]
    fn burst_of_changes_yields_single_event() {
        let stamps = FakeStamps::default();
        stamps.touch("/virtual/a.frag", 1);
        let table = Arc::new(Mutex::new(WatchedFileTable::with_stamp_source(stamps.clone())));
        lock_table(&table).add(Path::new("/virtual/a.frag"), FileRole::Fragment);
        let (notifier, receiver) = change_slot();

        for secs in 2..12 {
            stamps.touch("/virtual/a.frag", secs);
        }
        assert_eq!(poll_once(&table, &notifier), Some(0));
        assert_eq!(poll_once(&table, &notifier), None);
        assert_eq!(receiver.take(), Some(0));
        assert_eq!(receiver.take(), None);
        assert_eq!(poll_once(&table, &notifier), None);
    }

    #[test]
    fn occupied_slot_defers_detection() {
        let stamps = FakeStamps::default();
        stamps.touch("/virtual/a.frag", 1);
        stamps.touch("/virtual/b.glsl", 1);
        let table = Arc::new(Mutex::new(WatchedFileTable::with_stamp_source(stamps.clone())));
        {
            let mut guard = lock_table(&table);
            let frag = guard.add(Path::new("/virtual/a.frag"), FileRole::Fragment);
            guard.add_dependency(frag, Path::new("/virtual/b.glsl"));
        }
        let (notifier, receiver) = change_slot();

        stamps.touch("/virtual/a.frag", 2);
        assert_eq!(poll_once(&table, &notifier), Some(0));
        stamps.touch("/virtual/b.glsl", 2);
        assert_eq!(poll_once(&table, &notifier), None);

        assert_eq!(receiver.take(), Some(0));
        assert_eq!(poll_once(&table, &notifier), Some(1));
    }

    #[test]
    fn watcher_thread_stops_on_shutdown() {
        let table = Arc::new(Mutex::new(WatchedFileTable::with_stamp_source(
            FakeStamps::default(),
        )));
        let (notifier, _receiver) = change_slot();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handle =
            spawn_watcher(table, notifier, Duration::from_millis(10), shutdown.clone()).unwrap();
        handle.stop();
        assert!(shutdown.load(Ordering::SeqCst));
    }
}
