//! Durable per-session checkpoints keyed by session id.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::state::{ResearchState, SessionSummary};
use crate::error::CheckpointError;
use crate::persistence;

/// Storage for research state between phases.
///
/// `save` must be durable before it returns: the workflow only emits an event
/// after the matching save succeeded.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<ResearchState>, CheckpointError>;

    async fn save(&self, session_id: &str, state: &ResearchState) -> Result<(), CheckpointError>;

    /// Summaries of every stored session, most recently updated first.
    async fn list(&self) -> Result<Vec<SessionSummary>, CheckpointError>;

    /// Take exclusive write ownership of a session.
    ///
    /// Fails with [`CheckpointError::Locked`] while any other owner, in this
    /// process or another one sharing the store, holds the session.
    async fn lease(&self, session_id: &str) -> Result<CheckpointLease, CheckpointError>;
}

/// Exclusive ownership of one session's checkpoint. Released on drop.
pub struct CheckpointLease {
    session_id: String,
    _guard: Box<dyn Send + Sync>,
}

impl CheckpointLease {
    /// Wrap a store-specific guard whose `Drop` releases the session.
    pub fn new(session_id: impl Into<String>, guard: impl Send + Sync + 'static) -> Self {
        Self {
            session_id: session_id.into(),
            _guard: Box::new(guard),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl std::fmt::Debug for CheckpointLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointLease")
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Reject ids that could escape the checkpoint directory.
pub fn validate_session_id(session_id: &str) -> Result<(), CheckpointError> {
    let ok = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id != "."
        && !session_id.contains("..")
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CheckpointError::InvalidSessionId {
            session_id: session_id.to_string(),
        })
    }
}

/// One JSON file per session under a directory, written atomically.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, CheckpointError> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    fn lock_path_for(&self, session_id: &str) -> Result<PathBuf, CheckpointError> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.lock")))
    }
}

/// A lock file whose content is the owning process id. Removed on drop.
struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove session lock");
        }
    }
}

/// An unreadable lock younger than this is assumed to be mid-write.
const LOCK_WRITE_GRACE: Duration = Duration::from_secs(10);

enum LockOwner {
    Live(Option<u32>),
    Stale(Option<u32>),
    Gone,
}

fn acquire_lock_file(path: PathBuf, session_id: &str) -> Result<LockFile, CheckpointError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| CheckpointError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    // One retry after reclaiming a stale lock; `create_new` arbitrates races.
    for _ in 0..2 {
        match create_lock_file(&path) {
            Ok(()) => {
                debug!(session_id, path = %path.display(), "Session lock acquired");
                return Ok(LockFile { path });
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => match read_lock_owner(&path) {
                LockOwner::Live(pid) => {
                    debug!(session_id, ?pid, "Session lock held");
                    return Err(CheckpointError::Locked {
                        session_id: session_id.to_string(),
                    });
                }
                LockOwner::Stale(pid) => {
                    info!(session_id, ?pid, "Reclaiming stale session lock");
                    if let Err(e) = fs::remove_file(&path)
                        && e.kind() != ErrorKind::NotFound
                    {
                        return Err(CheckpointError::Write { path, source: e });
                    }
                }
                LockOwner::Gone => {}
            },
            Err(source) => return Err(CheckpointError::Write { path, source }),
        }
    }
    Err(CheckpointError::Locked {
        session_id: session_id.to_string(),
    })
}

fn create_lock_file(path: &Path) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)?;
    let written = file
        .write_all(std::process::id().to_string().as_bytes())
        .and_then(|()| file.sync_all());
    if let Err(e) = written {
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(())
}

fn read_lock_owner(path: &Path) -> LockOwner {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return LockOwner::Gone,
        Err(_) => return LockOwner::Live(None),
    };
    match raw.trim().parse::<u32>() {
        Ok(pid) if is_process_alive(pid) => LockOwner::Live(Some(pid)),
        Ok(pid) => LockOwner::Stale(Some(pid)),
        Err(_) => {
            let fresh = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_none_or(|age| age < LOCK_WRITE_GRACE);
            if fresh {
                LockOwner::Live(None)
            } else {
                LockOwner::Stale(None)
            }
        }
    }
}

/// Whether `pid` names a running process. Unverifiable owners count as alive.
fn is_process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    if pid == std::process::id() {
        return true;
    }

    #[cfg(unix)]
    {
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(true)
    }

    #[cfg(not(unix))]
    {
        true
    }
}

fn read_state(path: &Path, session_id: &str) -> Result<Option<ResearchState>, CheckpointError> {
    match persistence::load_json::<ResearchState>(path) {
        Ok(state) => Ok(state),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => Err(CheckpointError::Corrupt {
            session_id: session_id.to_string(),
            message: e.to_string(),
        }),
        Err(source) => Err(CheckpointError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, session_id: &str) -> Result<Option<ResearchState>, CheckpointError> {
        let path = self.path_for(session_id)?;
        let id = session_id.to_string();
        tokio::task::spawn_blocking(move || read_state(&path, &id))
            .await
            .map_err(|e| CheckpointError::Read {
                path: self.dir.clone(),
                source: std::io::Error::other(e),
            })?
    }

    async fn save(&self, session_id: &str, state: &ResearchState) -> Result<(), CheckpointError> {
        let path = self.path_for(session_id)?;
        let state = state.clone();
        let target = path.clone();
        tokio::task::spawn_blocking(move || persistence::atomic_write_json(&target, &state))
            .await
            .map_err(std::io::Error::other)
            .and_then(|r| r)
            .map_err(|source| CheckpointError::Write {
                path: path.clone(),
                source,
            })?;
        debug!(session_id, path = %path.display(), "Checkpoint saved");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, CheckpointError> {
        let dir = self.dir.clone();
        let summaries = tokio::task::spawn_blocking(move || {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(source) => return Err(CheckpointError::Read { path: dir, source }),
            };
            let mut summaries = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match read_state(&path, id) {
                    Ok(Some(state)) => summaries.push(state.summary()),
                    Ok(None) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
                }
            }
            Ok(summaries)
        })
        .await
        .map_err(|e| CheckpointError::Read {
            path: self.dir.clone(),
            source: std::io::Error::other(e),
        })??;
        Ok(sorted(summaries))
    }

    async fn lease(&self, session_id: &str) -> Result<CheckpointLease, CheckpointError> {
        let path = self.lock_path_for(session_id)?;
        let id = session_id.to_string();
        let lock = tokio::task::spawn_blocking(move || acquire_lock_file(path, &id))
            .await
            .map_err(|e| CheckpointError::Write {
                path: self.dir.clone(),
                source: std::io::Error::other(e),
            })??;
        Ok(CheckpointLease::new(session_id, lock))
    }
}

fn sorted(mut summaries: Vec<SessionSummary>) -> Vec<SessionSummary> {
    summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    summaries
}

/// Process-local store for tests and embedding.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    states: RwLock<HashMap<String, ResearchState>>,
    leases: Arc<Mutex<HashSet<String>>>,
    saves: AtomicUsize,
}

struct MemoryLease {
    session_id: String,
    leases: Arc<Mutex<HashSet<String>>>,
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.remove(&self.session_id);
    }
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, session_id: &str) -> Result<Option<ResearchState>, CheckpointError> {
        validate_session_id(session_id)?;
        Ok(self.states.read().await.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, state: &ResearchState) -> Result<(), CheckpointError> {
        validate_session_id(session_id)?;
        self.states
            .write()
            .await
            .insert(session_id.to_string(), state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, CheckpointError> {
        let states = self.states.read().await;
        Ok(sorted(states.values().map(ResearchState::summary).collect()))
    }

    async fn lease(&self, session_id: &str) -> Result<CheckpointLease, CheckpointError> {
        validate_session_id(session_id)?;
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if !leases.insert(session_id.to_string()) {
            return Err(CheckpointError::Locked {
                session_id: session_id.to_string(),
            });
        }
        let guard = MemoryLease {
            session_id: session_id.to_string(),
            leases: Arc::clone(&self.leases),
        };
        Ok(CheckpointLease::new(session_id, guard))
    }
}
