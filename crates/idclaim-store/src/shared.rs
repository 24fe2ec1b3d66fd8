//! Store handle shared between the engine and the invokers.
//!
//! Two backends:
//! - memory: one `MemoryStore` behind a mutex
//! - jsonl: every access loads the file under its lock and writes it back
//!   when the mutation changed anything

use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use crate::atomic_store::{AtomicStoreMutationError, mutate_store_jsonl};
use crate::{MemoryStore, StoreError};

#[derive(Debug)]
enum Backend {
    Memory(Mutex<MemoryStore>),
    Jsonl {
        path: PathBuf,
        /// Serializes writers in this process; the lock file covers others.
        local: Mutex<()>,
    },
}

#[derive(Debug)]
pub struct SharedStore {
    backend: Backend,
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SharedStore {
    pub fn in_memory() -> Self {
        Self::from_store(MemoryStore::default())
    }

    pub fn from_store(store: MemoryStore) -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(store)),
        }
    }

    pub fn jsonl(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Jsonl {
                path: path.into(),
                local: Mutex::new(()),
            },
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::Memory(_) => None,
            Backend::Jsonl { path, .. } => Some(path),
        }
    }

    pub fn read<T>(&self, reader: impl FnOnce(&MemoryStore) -> T) -> Result<T, StoreError> {
        match &self.backend {
            Backend::Memory(store) => Ok(reader(&store.lock())),
            Backend::Jsonl { path, local } => {
                let _local = local.lock();
                let store = MemoryStore::load_jsonl(path)?;
                Ok(reader(&store))
            }
        }
    }

    /// Apply `mutator` atomically: on error nothing it did is kept.
    pub fn mutate<T, E>(
        &self,
        mutator: impl FnOnce(&mut MemoryStore) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        match &self.backend {
            Backend::Memory(store) => {
                let mut guard = store.lock();
                let mut draft = guard.clone();
                let value = mutator(&mut draft)?;
                *guard = draft;
                Ok(value)
            }
            Backend::Jsonl { path, local } => {
                let _local = local.lock();
                mutate_store_jsonl(path, |store| {
                    let before = store.revision();
                    let value = mutator(store)?;
                    let changed = store.revision() != before;
                    Ok((value, changed))
                })
                .map_err(|err| match err {
                    AtomicStoreMutationError::Mutation(err) => err,
                    AtomicStoreMutationError::Store(err) => E::from(err),
                    AtomicStoreMutationError::LockBusy { lock_path } => E::from(StoreError::Lock {
                        lock_path,
                        message: "held by another writer".to_string(),
                        busy: true,
                    }),
                    AtomicStoreMutationError::LockIo { lock_path, message } => {
                        E::from(StoreError::Lock {
                            lock_path,
                            message,
                            busy: false,
                        })
                    }
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Index;
    use idclaim_kernel::IdentifierDomain;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn failed_memory_mutation_leaves_state_untouched() {
        let shared = SharedStore::in_memory();
        let result: Result<(), StoreError> = shared.mutate(|store| {
            store.create_index(Index::new("default", "as", IdentifierDomain::As))?;
            store.create_index(Index::new("default", "as", IdentifierDomain::As))?;
            Ok(())
        });
        assert!(matches!(result, Err(StoreError::AlreadyExists { .. })));
        let count = shared
            .read(|store| store.indexes().count())
            .expect("read should succeed");
        assert_eq!(count, 0);
    }

    #[test]
    fn jsonl_backend_persists_between_handles() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "idclaim-shared-{}-{unique}.jsonl",
            std::process::id()
        ));

        let writer = SharedStore::jsonl(&path);
        writer
            .mutate(|store| {
                store.create_index(Index::new("default", "vlan", IdentifierDomain::Vlan))
            })
            .expect("create should persist");

        let reader = SharedStore::jsonl(&path);
        let names: Vec<String> = reader
            .read(|store| store.indexes().map(|i| i.meta.name.clone()).collect())
            .expect("read should succeed");
        assert_eq!(names, vec!["vlan".to_string()]);
        let _ = std::fs::remove_file(path);
    }
}
