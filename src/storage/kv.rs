/// Store clé→valeur opaque, implémenté par l'hôte
///
/// Les valeurs sont des chaînes (JSON par convention). Deux implémentations
/// de référence: mémoire pure et fichiers JSON sous un répertoire racine.

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;

#[async_trait]
pub trait KVStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;

    /// Rend les écritures durables; no-op pour les backends non débouncés
    async fn persist(&self) -> Result<()> {
        Ok(())
    }
}

/// Store mémoire, pour les tests et les sessions éphémères
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, String>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KVStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

/// Store fichier: un fichier JSON par clé sous un répertoire racine
///
/// La map mémoire reste autoritaire; `persist()` écrit les clés sales.
/// Une erreur IO est logguée, jamais propagée au-delà du persist.
pub struct FileKvStore {
    root: PathBuf,
    entries: DashMap<String, String>,
    dirty: Mutex<std::collections::HashSet<String>>,
}

impl FileKvStore {
    /// Ouvre le répertoire et charge les entrées existantes
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let store = Self {
            root,
            entries: DashMap::new(),
            dirty: Mutex::new(std::collections::HashSet::new()),
        };
        store.load_existing().await?;
        Ok(store)
    }

    async fn load_existing(&self) -> Result<()> {
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        let mut loaded = 0usize;
        while let Some(entry) = dir.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read_to_string(entry.path()).await {
                Ok(content) => match serde_json::from_str::<(String, String)>(&content) {
                    Ok((key, value)) => {
                        self.entries.insert(key, value);
                        loaded += 1;
                    }
                    Err(e) => warn!("Entrée illisible {:?}: {}", entry.path(), e),
                },
                Err(e) => warn!("Lecture impossible {:?}: {}", entry.path(), e),
            }
        }
        debug!("FileKvStore: {} entrées chargées depuis {:?}", loaded, self.root);
        Ok(())
    }

    /// Nom de fichier stable pour une clé arbitraire
    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let short: String = digest.iter().take(12).map(|b| format!("{:02x}", b)).collect();
        self.root.join(format!("{}.json", short))
    }
}

#[async_trait]
impl KVStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        self.dirty.lock().insert(key.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        self.dirty.lock().remove(key);
        let path = self.path_for(key);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Suppression impossible {:?}: {}", path, e);
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        self.dirty.lock().clear();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let dirty: Vec<String> = {
            let mut guard = self.dirty.lock();
            guard.drain().collect()
        };
        for key in dirty {
            let Some(value) = self.entries.get(&key).map(|e| e.value().clone()) else {
                continue;
            };
            let payload = serde_json::to_string(&(key.clone(), value))?;
            let path = self.path_for(&key);
            if let Err(e) = tokio::fs::write(&path, payload).await {
                // L'état mémoire reste autoritaire; on retentera au
                // prochain persist
                warn!("Écriture impossible {:?}: {}", path, e);
                self.dirty.lock().insert(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryKvStore::new();
        store.set("k", "v".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileKvStore::open(dir.path()).await.unwrap();
            store.set("feature:t1", "{\"x\":1}".to_string()).await.unwrap();
            store.persist().await.unwrap();
        }
        let reopened = FileKvStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get("feature:t1").await.unwrap().as_deref(),
            Some("{\"x\":1}")
        );
    }

    #[tokio::test]
    async fn test_file_store_unpersisted_writes_stay_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::open(dir.path()).await.unwrap();
        store.set("k", "v".to_string()).await.unwrap();
        // Pas de persist: lisible en mémoire, rien sur disque
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        let reopened = FileKvStore::open(dir.path()).await.unwrap();
        assert!(reopened.get("k").await.unwrap().is_none());
    }
}
