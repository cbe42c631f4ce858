//! Registry of live trampoline sessions
//!
//! One session per git invocation, keyed by a random token. The registry is
//! the only state shared between concurrent invocations; a session is
//! reachable only through its own token.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::debug;
use uuid::Uuid;

/// Per-invocation credential state
#[derive(Debug)]
pub struct TrampolineSession {
    token: String,
    working_dir: PathBuf,
    is_background_task: bool,
    // git erased the credential it was given: don't hand out another one
    credential_rejected: AtomicBool,
    // a prompt was refused because the invocation runs in the background
    prompt_suppressed: AtomicBool,
    // the invocation was cancelled or timed out: answer nothing from now on
    cancelled: AtomicBool,
    requests: AtomicUsize,
}

impl TrampolineSession {
    fn new(working_dir: &Path, is_background_task: bool) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            working_dir: working_dir.to_path_buf(),
            is_background_task,
            credential_rejected: AtomicBool::new(false),
            prompt_suppressed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn is_background_task(&self) -> bool {
        self.is_background_task
    }

    pub fn credential_rejected(&self) -> bool {
        self.credential_rejected.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_credential_rejected(&self) {
        self.credential_rejected.store(true, Ordering::SeqCst);
    }

    pub fn prompt_suppressed(&self) -> bool {
        self.prompt_suppressed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_prompt_suppressed(&self) {
        self.prompt_suppressed.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Number of helper calls served for this session
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct TrampolineRegistry {
    sessions: Mutex<HashMap<String, Arc<TrampolineSession>>>,
    directory_locks: Mutex<HashMap<PathBuf, Weak<tokio::sync::Mutex<()>>>>,
}

impl TrampolineRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new session; it stays reachable until the guard is dropped
    pub fn register(
        self: &Arc<Self>,
        working_dir: &Path,
        is_background_task: bool,
    ) -> SessionGuard {
        let session = Arc::new(TrampolineSession::new(working_dir, is_background_task));
        self.sessions().insert(session.token.clone(), session.clone());
        debug!(dir = %working_dir.display(), background = is_background_task, "trampoline session registered");
        SessionGuard {
            registry: self.clone(),
            session,
        }
    }

    pub fn lookup(&self, token: &str) -> Option<Arc<TrampolineSession>> {
        self.sessions().get(token).cloned()
    }

    /// Release a session before its guard is dropped.
    ///
    /// Used when the invocation is cancelled: helpers still running while the
    /// child is being terminated get no answer.
    pub fn revoke(&self, session: &TrampolineSession) {
        session.cancelled.store(true, Ordering::SeqCst);
        self.remove(&session.token);
        debug!("trampoline session revoked");
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, token: &str) {
        self.sessions().remove(token);
    }

    // A panic while holding the map leaves it consistent; keep serving
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<TrampolineSession>>> {
        match self.sessions.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Lock serializing non-reentrant credential handling for one directory
    pub fn directory_lock(&self, working_dir: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.directory_locks.lock() {
            Ok(l) => l,
            Err(poisoned) => poisoned.into_inner(),
        };
        // 顺带清理已无人持有的锁
        locks.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = locks.get(working_dir).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(working_dir.to_path_buf(), Arc::downgrade(&lock));
        lock
    }
}

/// De-registers its session on drop: normal return, error, panic or a
/// cancelled future all release the token.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<TrampolineRegistry>,
    session: Arc<TrampolineSession>,
}

impl SessionGuard {
    pub fn session(&self) -> &Arc<TrampolineSession> {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.session.token);
        debug!(
            requests = self.session.request_count(),
            "trampoline session released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_release() {
        let registry = TrampolineRegistry::new();
        let guard = registry.register(Path::new("/repo/a"), false);
        let token = guard.session().token().to_string();

        let session = registry.lookup(&token).unwrap();
        assert_eq!(session.working_dir(), Path::new("/repo/a"));
        assert!(!session.is_background_task());

        drop(guard);
        assert!(registry.lookup(&token).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_tokens_are_unique_per_session() {
        let registry = TrampolineRegistry::new();
        let a = registry.register(Path::new("/repo/a"), false);
        let b = registry.register(Path::new("/repo/a"), true);
        assert_ne!(a.session().token(), b.session().token());
        assert_eq!(registry.len(), 2);
        assert!(registry.lookup(b.session().token()).unwrap().is_background_task());
    }

    #[test]
    fn test_session_latches() {
        let registry = TrampolineRegistry::new();
        let guard = registry.register(Path::new("/repo"), true);
        let session = guard.session();
        assert!(!session.credential_rejected());
        session.mark_credential_rejected();
        session.mark_prompt_suppressed();
        session.record_request();
        assert!(session.credential_rejected());
        assert!(session.prompt_suppressed());
        assert_eq!(session.request_count(), 1);
    }

    #[test]
    fn test_revoke_releases_token_before_guard_drops() {
        let registry = TrampolineRegistry::new();
        let guard = registry.register(Path::new("/repo"), false);
        let token = guard.session().token().to_string();

        registry.revoke(guard.session());
        assert!(guard.session().is_cancelled());
        assert!(registry.lookup(&token).is_none());

        drop(guard);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_survives_poisoned_lock() {
        let registry = TrampolineRegistry::new();
        let poisoner = registry.clone();
        let _ = std::thread::spawn(move || {
            let _held = poisoner.sessions.lock().unwrap();
            panic!("poison the session map");
        })
        .join();
        assert!(registry.sessions.is_poisoned());

        let guard = registry.register(Path::new("/repo"), false);
        assert!(registry.lookup(guard.session().token()).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_directory_lock_is_shared_per_directory() {
        let registry = TrampolineRegistry::new();
        let a1 = registry.directory_lock(Path::new("/repo/a"));
        let a2 = registry.directory_lock(Path::new("/repo/a"));
        let b = registry.directory_lock(Path::new("/repo/b"));
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }
}
