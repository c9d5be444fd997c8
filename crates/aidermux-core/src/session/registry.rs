//! Session registry - scope resolution and session ownership
//!
//! One registry instance is constructed by the application entry point
//! and handed to every caller; there is no process-wide session table.
//! Scope keys are resolved display paths; at most one session exists per
//! distinct key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::scope;
use crate::session::Session;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<PathBuf, Arc<Session>>>,
    config: Config,
}

impl SessionRegistry {
    pub fn new(config: Config) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Resolve the scope key a working path belongs to.
    ///
    /// The deepest existing session whose scope is an ancestor-or-equal
    /// of the working directory wins, provided its path is strictly
    /// longer than the natural root; ties favor the natural root. With
    /// `subtree_only`, the working directory itself is used unless a
    /// strictly deeper session already covers it.
    pub fn resolve(&self, working_path: &Path, subtree_only: bool) -> Result<PathBuf> {
        let working_dir = scope::working_dir(working_path)?;
        let natural_root = scope::natural_root(working_path)?;

        let deepest_ancestor = {
            let sessions = self.sessions.read().unwrap_or_else(|p| p.into_inner());
            sessions
                .keys()
                .filter(|key| working_dir.starts_with(key) && key.exists())
                .max_by_key(|key| key.as_os_str().len())
                .cloned()
        };

        let root_len = natural_root.as_os_str().len();
        let resolved = match deepest_ancestor {
            Some(ancestor) if ancestor.as_os_str().len() > root_len => ancestor,
            _ if subtree_only => working_dir,
            _ => natural_root,
        };

        debug!(
            working = %working_path.display(),
            scope = %resolved.display(),
            subtree_only,
            "scope resolved"
        );
        Ok(resolved)
    }

    /// The session for a scope key, created on first use. The check and
    /// insert happen under one write lock, so two near-simultaneous
    /// resolutions of the same key get the same session.
    pub fn get_or_create(&self, scope_key: &Path, subtree_only: bool) -> Arc<Session> {
        let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
        if let Some(session) = sessions.get(scope_key) {
            return Arc::clone(session);
        }
        let session = Arc::new(Session::new(
            scope_key.to_path_buf(),
            subtree_only,
            self.config.clone(),
        ));
        sessions.insert(scope_key.to_path_buf(), Arc::clone(&session));
        info!(scope = %scope_key.display(), "session created");
        session
    }

    /// Resolve a working path and return its session, creating one when
    /// the scope is unseen.
    pub fn session_for(&self, working_path: &Path, subtree_only: bool) -> Result<Arc<Session>> {
        let key = self.resolve(working_path, subtree_only)?;
        Ok(self.get_or_create(&key, subtree_only))
    }

    /// The session for an exact scope key, if one exists.
    pub fn get(&self, scope_key: &Path) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(scope_key)
            .cloned()
    }

    /// Explicit exit: tear the session down and forget its scope.
    pub fn remove(&self, scope_key: &Path) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(scope_key);
        match removed {
            Some(session) => {
                session.exit();
                info!(scope = %scope_key.display(), "session removed");
                true
            }
            None => false,
        }
    }

    /// All live scope keys.
    pub fn scope_keys(&self) -> Vec<PathBuf> {
        self.sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Tear down every session.
    pub fn shutdown(&self) {
        let drained: Vec<(PathBuf, Arc<Session>)> = self
            .sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .drain()
            .collect();
        for (key, session) in drained {
            debug!(scope = %key.display(), "shutting down session");
            session.exit();
        }
        info!("all sessions shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MuxError;

    /// A `/repo`-shaped fixture: git root with `sub/` and `other/`
    /// subdirectories and a file in each.
    fn repo_fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join(".git")).unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::create_dir(root.join("other")).unwrap();
        std::fs::write(root.join("sub/file.txt"), "x\n").unwrap();
        std::fs::write(root.join("other/file.txt"), "x\n").unwrap();
        dir
    }

    #[test]
    fn test_resolve_prefers_deepest_ancestor_session() {
        let dir = repo_fixture();
        let root = dir.path().canonicalize().unwrap();
        let registry = SessionRegistry::new(Config::default());

        registry.get_or_create(&root, false);
        registry.get_or_create(&root.join("sub"), true);

        let resolved = registry.resolve(&root.join("sub/file.txt"), false).unwrap();
        assert_eq!(resolved, root.join("sub"));
    }

    #[test]
    fn test_resolve_falls_back_to_natural_root() {
        let dir = repo_fixture();
        let root = dir.path().canonicalize().unwrap();
        let registry = SessionRegistry::new(Config::default());

        registry.get_or_create(&root, false);

        // No session at other/; the ancestor at the root ties with the
        // natural root, and ties favor the root.
        let resolved = registry
            .resolve(&root.join("other/file.txt"), false)
            .unwrap();
        assert_eq!(resolved, root);
    }

    #[test]
    fn test_resolve_without_any_session_uses_vcs_root() {
        let dir = repo_fixture();
        let root = dir.path().canonicalize().unwrap();
        let registry = SessionRegistry::new(Config::default());

        let resolved = registry.resolve(&root.join("sub/file.txt"), false).unwrap();
        assert_eq!(resolved, root);
    }

    #[test]
    fn test_subtree_only_uses_working_directory() {
        let dir = repo_fixture();
        let root = dir.path().canonicalize().unwrap();
        let registry = SessionRegistry::new(Config::default());

        // A session at the natural root is not deeper, so the working
        // directory itself becomes the scope.
        registry.get_or_create(&root, false);
        let resolved = registry.resolve(&root.join("sub/file.txt"), true).unwrap();
        assert_eq!(resolved, root.join("sub"));
    }

    #[test]
    fn test_subtree_only_reuses_deeper_session() {
        let dir = repo_fixture();
        let root = dir.path().canonicalize().unwrap();
        let registry = SessionRegistry::new(Config::default());

        registry.get_or_create(&root.join("sub"), true);
        let resolved = registry.resolve(&root.join("sub/file.txt"), true).unwrap();
        assert_eq!(resolved, root.join("sub"));
    }

    #[test]
    fn test_resolve_unusable_path_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(Config::default());
        let err = registry
            .resolve(&dir.path().join("nope/missing.txt"), false)
            .unwrap_err();
        assert!(matches!(err, MuxError::NoScopeRoot(_)));
    }

    #[test]
    fn test_get_or_create_is_idempotent_per_key() {
        let dir = repo_fixture();
        let root = dir.path().canonicalize().unwrap();
        let registry = SessionRegistry::new(Config::default());

        let first = registry.get_or_create(&root, false);
        let second = registry.get_or_create(&root, false);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.scope_keys().len(), 1);
    }

    #[test]
    fn test_remove_forgets_scope() {
        let dir = repo_fixture();
        let root = dir.path().canonicalize().unwrap();
        let registry = SessionRegistry::new(Config::default());

        registry.get_or_create(&root, false);
        assert!(registry.remove(&root));
        assert!(registry.get(&root).is_none());
        assert!(!registry.remove(&root));
    }

    #[test]
    fn test_resolve_outside_vcs_uses_directory() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        std::fs::create_dir(&plain).unwrap();
        std::fs::write(plain.join("notes.txt"), "x\n").unwrap();
        let registry = SessionRegistry::new(Config::default());

        let resolved = registry.resolve(&plain.join("notes.txt"), false).unwrap();
        assert_eq!(resolved, plain.canonicalize().unwrap());
    }
}
