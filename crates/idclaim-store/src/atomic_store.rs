//! Lock-scoped atomic mutation of a JSONL-backed store.

use crate::{MemoryStore, StoreError};
use chrono::Utc;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn store_lock_path(store_path: &Path) -> PathBuf {
    let mut path: OsString = store_path.as_os_str().to_os_string();
    path.push(".lock");
    PathBuf::from(path)
}

#[derive(Debug, thiserror::Error)]
pub enum AtomicStoreMutationError<E> {
    #[error("store lock busy: {lock_path}")]
    LockBusy { lock_path: String },

    #[error("failed to acquire store lock {lock_path}: {message}")]
    LockIo { lock_path: String, message: String },

    #[error(transparent)]
    Store(StoreError),

    #[error("{0}")]
    Mutation(E),
}

impl<E> AtomicStoreMutationError<E> {
    fn lock_io(lock_path: &Path, err: std::io::Error) -> Self {
        Self::LockIo {
            lock_path: lock_path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Lock contention clears once the other writer finishes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LockBusy { .. } => true,
            Self::Store(err) => err.is_retryable(),
            Self::LockIo { .. } | Self::Mutation(_) => false,
        }
    }
}

/// Run one mutation against the store file at `path` under its lock file.
///
/// The mutator returns `(value, changed)`; the store is written back before
/// the lock is released only when `changed` is true.
pub fn mutate_store_jsonl<T, E, F>(
    path: impl AsRef<Path>,
    mutator: F,
) -> Result<T, AtomicStoreMutationError<E>>
where
    F: FnOnce(&mut MemoryStore) -> Result<(T, bool), E>,
{
    let path = path.as_ref();
    let _lock = LockFile::acquire(path)?;

    let mut store = MemoryStore::load_jsonl(path).map_err(AtomicStoreMutationError::Store)?;
    let (value, changed) = mutator(&mut store).map_err(AtomicStoreMutationError::Mutation)?;
    if changed {
        store
            .save_jsonl(path)
            .map_err(AtomicStoreMutationError::Store)?;
    }
    Ok(value)
}

/// Exclusive `<store>.lock` marker, removed on drop.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire<E>(store_path: &Path) -> Result<Self, AtomicStoreMutationError<E>> {
        let path = store_lock_path(store_path);
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|err| AtomicStoreMutationError::lock_io(&path, err))?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(AtomicStoreMutationError::LockBusy {
                    lock_path: path.display().to_string(),
                });
            }
            Err(err) => return Err(AtomicStoreMutationError::lock_io(&path, err)),
        };
        // Holder details for whoever finds a stale lock.
        let _ = write!(
            file,
            "pid={}\nutc={}\n",
            std::process::id(),
            Utc::now().to_rfc3339()
        );
        Ok(Self { path })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Index;
    use idclaim_kernel::IdentifierDomain;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "idclaim-atomic-{prefix}-{}-{unique}.jsonl",
            std::process::id()
        ))
    }

    #[test]
    fn changed_mutation_persists_and_releases_lock() {
        let path = temp_path("persist");
        let created = mutate_store_jsonl(&path, |store| {
            let index = store.create_index(Index::new("default", "as", IdentifierDomain::As))?;
            Ok::<_, StoreError>((index, true))
        })
        .expect("mutation should succeed");
        assert!(!created.meta.uid.is_empty());
        assert!(!store_lock_path(&path).exists());

        let reloaded = MemoryStore::load_jsonl(&path).expect("store should reload");
        assert_eq!(reloaded.indexes().count(), 1);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn unchanged_mutation_does_not_write() {
        let path = temp_path("readonly");
        let count = mutate_store_jsonl(&path, |store| {
            Ok::<_, StoreError>((store.indexes().count(), false))
        })
        .expect("read should succeed");
        assert_eq!(count, 0);
        assert!(!path.exists());
    }

    #[test]
    fn held_lock_reports_busy() {
        let path = temp_path("busy");
        let lock = store_lock_path(&path);
        fs::write(&lock, "pid=0\n").expect("lock fixture should write");

        let err = mutate_store_jsonl(&path, |_| Ok::<_, StoreError>(((), false)))
            .expect_err("held lock must fail");
        assert!(matches!(err, AtomicStoreMutationError::LockBusy { .. }));
        assert!(err.is_retryable());
        let _ = fs::remove_file(lock);
    }
}
