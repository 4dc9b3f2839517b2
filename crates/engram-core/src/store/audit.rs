//! Content Artifact Store
//!
//! Persists artifact documents in a working tree and records a linear,
//! totally ordered history. Two backends behind one tagged type: a
//! git2-backed repository, and a no-audit fallback for environments without
//! the revision subsystem (raw filesystem writes, sentinel revision).

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use git2::{Repository, Signature, Sort, StatusOptions};

use crate::error::{MemoryError, Result};

/// Revision reported by the no-audit backend.
pub const NO_GIT_REVISION: &str = "no-git";

/// Commit author used for engine writes.
const AUTHOR_NAME: &str = "engram";
const AUTHOR_EMAIL: &str = "engram@localhost";

/// Upper bound on revision-subsystem subprocess calls.
const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(5);

/// One entry of an artifact's history, newest first.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub revision: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

// ============================================================================
// AUDIT STORE
// ============================================================================

/// Artifact store with a tagged backend
pub enum AuditStore {
    Git(GitAudit),
    Plain(NoAudit),
}

impl AuditStore {
    /// Open (creating if needed) the artifact store rooted at `root`.
    pub fn open(root: &Path, enable_git: bool) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        if enable_git {
            Ok(AuditStore::Git(GitAudit::open(root)?))
        } else {
            tracing::info!("Revision subsystem disabled, using no-audit artifact store");
            Ok(AuditStore::Plain(NoAudit {
                root: root.to_path_buf(),
            }))
        }
    }

    pub fn root(&self) -> &Path {
        match self {
            AuditStore::Git(git) => &git.root,
            AuditStore::Plain(plain) => &plain.root,
        }
    }

    /// Write a new artifact and commit.
    pub fn add(&mut self, relative_path: &str, bytes: &str, message: &str) -> Result<String> {
        match self {
            AuditStore::Git(git) => {
                git.write_and_stage(relative_path, bytes)?;
                git.commit(message)
            }
            AuditStore::Plain(plain) => plain.write(relative_path, bytes),
        }
    }

    /// Update an existing artifact and commit.
    pub fn update(&mut self, relative_path: &str, bytes: &str, message: &str) -> Result<String> {
        self.add(relative_path, bytes, message)
    }

    /// Stage a write without committing; pair with `commit_transaction`.
    pub fn stage(&mut self, relative_path: &str, bytes: &str) -> Result<()> {
        match self {
            AuditStore::Git(git) => git.write_and_stage(relative_path, bytes),
            AuditStore::Plain(plain) => plain.write(relative_path, bytes).map(|_| ()),
        }
    }

    /// Finalise any staged changes as a single commit.
    pub fn commit_transaction(&mut self, message: &str) -> Result<String> {
        match self {
            AuditStore::Git(git) => git.commit(message),
            AuditStore::Plain(_) => Ok(NO_GIT_REVISION.to_string()),
        }
    }

    /// Delete an artifact and commit.
    pub fn purge(&mut self, relative_path: &str, message: &str) -> Result<String> {
        match self {
            AuditStore::Git(git) => {
                let full = git.root.join(relative_path);
                if full.exists() {
                    std::fs::remove_file(&full)?;
                }
                let mut index = git.repo.index()?;
                index.remove_path(Path::new(relative_path))?;
                index.write()?;
                git.commit(message)
            }
            AuditStore::Plain(plain) => {
                let full = plain.root.join(relative_path);
                if full.exists() {
                    std::fs::remove_file(&full)?;
                }
                Ok(NO_GIT_REVISION.to_string())
            }
        }
    }

    /// Opaque revision id of the current tip; `None` while empty.
    pub fn head(&self) -> Result<Option<String>> {
        match self {
            AuditStore::Git(git) => git.head(),
            AuditStore::Plain(_) => Ok(Some(NO_GIT_REVISION.to_string())),
        }
    }

    /// Ordered history for one artifact, newest first. Empty for no-audit.
    pub fn history(&self, relative_path: &str) -> Result<Vec<HistoryEntry>> {
        match self {
            AuditStore::Git(git) => git.history(relative_path),
            AuditStore::Plain(_) => Ok(Vec::new()),
        }
    }

    /// Read an artifact's bytes from the working tree.
    pub fn read(&self, relative_path: &str) -> Result<String> {
        let full = self.root().join(relative_path);
        std::fs::read_to_string(&full).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MemoryError::NotFound(format!("artifact file {}", relative_path))
            } else {
                MemoryError::Io(e)
            }
        })
    }

    pub fn exists(&self, relative_path: &str) -> bool {
        self.root().join(relative_path).is_file()
    }

    /// All artifact documents present in the working tree.
    pub fn list_documents(&self) -> Result<Vec<String>> {
        let mut docs = Vec::new();
        for entry in std::fs::read_dir(self.root())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_file() && name.ends_with(".md") {
                docs.push(name);
            }
        }
        docs.sort();
        Ok(docs)
    }

    /// Working-tree paths that differ from the committed state: crash
    /// remnants from a write that never reached its commit.
    pub fn uncommitted_documents(&self) -> Result<Vec<String>> {
        match self {
            AuditStore::Git(git) => git.uncommitted_documents(),
            AuditStore::Plain(_) => Ok(Vec::new()),
        }
    }

    /// Repository housekeeping. Subprocess-backed, bounded at 5 seconds.
    pub fn gc(&self) -> Result<()> {
        match self {
            AuditStore::Git(git) => git.gc(),
            AuditStore::Plain(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for AuditStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditStore::Git(git) => f.debug_struct("AuditStore::Git").field("root", &git.root).finish(),
            AuditStore::Plain(plain) => f
                .debug_struct("AuditStore::Plain")
                .field("root", &plain.root)
                .finish(),
        }
    }
}

// ============================================================================
// GIT BACKEND
// ============================================================================

/// git2-backed artifact store
pub struct GitAudit {
    root: PathBuf,
    repo: Repository,
}

impl GitAudit {
    fn open(root: &Path) -> Result<Self> {
        let repo = match Repository::open(root) {
            Ok(repo) => repo,
            Err(_) => Repository::init(root)?,
        };
        Ok(Self {
            root: root.to_path_buf(),
            repo,
        })
    }

    fn signature(&self) -> Result<Signature<'static>> {
        Ok(Signature::now(AUTHOR_NAME, AUTHOR_EMAIL)?)
    }

    fn write_and_stage(&mut self, relative_path: &str, bytes: &str) -> Result<()> {
        let full = self.root.join(relative_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, bytes)?;
        let mut index = self.repo.index()?;
        index.add_path(Path::new(relative_path))?;
        index.write()?;
        Ok(())
    }

    /// Commit the staged index. History only advances here.
    fn commit(&mut self, message: &str) -> Result<String> {
        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature()?;

        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(oid.to_string())
    }

    fn head(&self) -> Result<Option<String>> {
        match self.repo.head() {
            Ok(head) => Ok(head.peel_to_commit().ok().map(|c| c.id().to_string())),
            Err(_) => Ok(None),
        }
    }

    fn history(&self, relative_path: &str) -> Result<Vec<HistoryEntry>> {
        if self.head()?.is_none() {
            return Ok(Vec::new());
        }

        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;
        walk.set_sorting(Sort::TIME)?;

        let path = Path::new(relative_path);
        let mut entries = Vec::new();
        for oid in walk {
            let commit = self.repo.find_commit(oid?)?;
            let blob_now = commit.tree()?.get_path(path).ok().map(|e| e.id());
            let blob_before = match commit.parent(0) {
                Ok(parent) => parent.tree()?.get_path(path).ok().map(|e| e.id()),
                Err(_) => None,
            };
            if blob_now != blob_before {
                let when = commit.time();
                let timestamp = Utc
                    .timestamp_opt(when.seconds(), 0)
                    .single()
                    .unwrap_or_else(Utc::now);
                entries.push(HistoryEntry {
                    revision: commit.id().to_string(),
                    author: commit
                        .author()
                        .name()
                        .unwrap_or(AUTHOR_NAME)
                        .to_string(),
                    timestamp,
                    message: commit.message().unwrap_or("").trim().to_string(),
                });
            }
        }
        Ok(entries)
    }

    fn uncommitted_documents(&self) -> Result<Vec<String>> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = self.repo.statuses(Some(&mut opts))?;

        let mut remnants = Vec::new();
        for entry in statuses.iter() {
            let status = entry.status();
            let is_pending = status.is_wt_new()
                || status.is_wt_modified()
                || status.is_index_new()
                || status.is_index_modified();
            if !is_pending {
                continue;
            }
            if let Some(path) = entry.path() {
                if path.ends_with(".md") {
                    remnants.push(path.to_string());
                }
            }
        }
        remnants.sort();
        Ok(remnants)
    }

    fn gc(&self) -> Result<()> {
        let mut child = Command::new("git")
            .args(["gc", "--auto", "--quiet"])
            .current_dir(&self.root)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let deadline = Instant::now() + SUBPROCESS_TIMEOUT;
        loop {
            match child.try_wait()? {
                Some(status) => {
                    if !status.success() {
                        tracing::warn!("git gc exited with {}", status);
                    }
                    return Ok(());
                }
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(MemoryError::Busy("git gc exceeded its time bound".into()));
                }
                None => std::thread::sleep(Duration::from_millis(50)),
            }
        }
    }
}

// ============================================================================
// NO-AUDIT BACKEND
// ============================================================================

/// Fallback artifact store without versioning
pub struct NoAudit {
    root: PathBuf,
}

impl NoAudit {
    fn write(&self, relative_path: &str, bytes: &str) -> Result<String> {
        let full = self.root.join(relative_path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, bytes)?;
        Ok(NO_GIT_REVISION.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_git_add_advances_head_and_history() {
        let dir = TempDir::new().unwrap();
        let mut store = AuditStore::open(dir.path(), true).unwrap();
        assert_eq!(store.head().unwrap(), None);

        let rev1 = store.add("d-1.md", "first version", "record: d-1").unwrap();
        assert_eq!(store.head().unwrap(), Some(rev1.clone()));

        let rev2 = store.update("d-1.md", "second version", "update: d-1").unwrap();
        assert_ne!(rev1, rev2);

        let history = store.history("d-1.md").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].revision, rev2);
        assert_eq!(history[0].message, "update: d-1");
        assert_eq!(history[1].revision, rev1);
    }

    #[test]
    fn test_history_is_per_artifact() {
        let dir = TempDir::new().unwrap();
        let mut store = AuditStore::open(dir.path(), true).unwrap();
        store.add("d-1.md", "one", "record: d-1").unwrap();
        store.add("d-2.md", "two", "record: d-2").unwrap();

        assert_eq!(store.history("d-1.md").unwrap().len(), 1);
        assert_eq!(store.history("d-2.md").unwrap().len(), 1);
        assert!(store.history("d-3.md").unwrap().is_empty());
    }

    #[test]
    fn test_staged_writes_commit_as_one_transaction() {
        let dir = TempDir::new().unwrap();
        let mut store = AuditStore::open(dir.path(), true).unwrap();
        store.stage("d-1.md", "one").unwrap();
        store.stage("d-2.md", "two").unwrap();
        let rev = store.commit_transaction("supersede: d-1 -> d-2").unwrap();

        assert_eq!(store.head().unwrap(), Some(rev.clone()));
        assert_eq!(store.history("d-1.md").unwrap()[0].revision, rev);
        assert_eq!(store.history("d-2.md").unwrap()[0].revision, rev);
    }

    #[test]
    fn test_uncommitted_documents_surface_crash_remnants() {
        let dir = TempDir::new().unwrap();
        let mut store = AuditStore::open(dir.path(), true).unwrap();
        store.add("d-1.md", "committed", "record").unwrap();

        // Simulate a crash between write and commit
        std::fs::write(dir.path().join("d-2.md"), "orphan").unwrap();
        let remnants = store.uncommitted_documents().unwrap();
        assert_eq!(remnants, vec!["d-2.md".to_string()]);
    }

    #[test]
    fn test_purge_removes_file_and_commits() {
        let dir = TempDir::new().unwrap();
        let mut store = AuditStore::open(dir.path(), true).unwrap();
        store.add("d-1.md", "body", "record").unwrap();
        store.purge("d-1.md", "purge: d-1").unwrap();

        assert!(!store.exists("d-1.md"));
        // History still remembers the artifact's lifetime
        assert!(store.history("d-1.md").unwrap().len() >= 2);
    }

    #[test]
    fn test_no_audit_backend_uses_sentinel() {
        let dir = TempDir::new().unwrap();
        let mut store = AuditStore::open(dir.path(), false).unwrap();
        let rev = store.add("d-1.md", "body", "record").unwrap();
        assert_eq!(rev, NO_GIT_REVISION);
        assert_eq!(store.head().unwrap(), Some(NO_GIT_REVISION.to_string()));
        assert!(store.history("d-1.md").unwrap().is_empty());
        assert_eq!(store.read("d-1.md").unwrap(), "body");
    }

    #[test]
    fn test_list_documents() {
        let dir = TempDir::new().unwrap();
        let mut store = AuditStore::open(dir.path(), false).unwrap();
        store.add("d-b.md", "b", "m").unwrap();
        store.add("d-a.md", "a", "m").unwrap();
        assert_eq!(
            store.list_documents().unwrap(),
            vec!["d-a.md".to_string(), "d-b.md".to_string()]
        );
    }
}
