use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use walletlink_lib::Topic;

use crate::sequence::Sequence;
use crate::{EngineError, Result};

/// Persistence for sequences, keyed by topic.
///
/// This should be implemented by the host application (e.g., using a local
/// database). Each engine owns its own store.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    async fn get(&self, topic: &Topic) -> Result<Option<Sequence>>;

    /// Insert or replace the sequence stored under `sequence.topic`.
    async fn set(&self, sequence: &Sequence) -> Result<()>;

    /// Remove a sequence, returning it if it was present.
    async fn delete(&self, topic: &Topic) -> Result<Option<Sequence>>;

    async fn get_all(&self) -> Result<Vec<Sequence>>;

    async fn has(&self, topic: &Topic) -> Result<bool> {
        Ok(self.get(topic).await?.is_some())
    }
}

fn lock_error(context: &str) -> EngineError {
    EngineError::Storage(format!("InMemorySequenceStore: lock poisoned during {}", context))
}

/// Volatile store; sequences are lost with the process.
#[derive(Default)]
pub struct InMemorySequenceStore {
    sequences: RwLock<HashMap<Topic, Sequence>>,
}

impl InMemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns 0 if the lock is poisoned.
    pub fn len(&self) -> usize {
        self.sequences.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    async fn get(&self, topic: &Topic) -> Result<Option<Sequence>> {
        let sequences = self.sequences.read().map_err(|_| lock_error("get"))?;
        Ok(sequences.get(topic).cloned())
    }

    async fn set(&self, sequence: &Sequence) -> Result<()> {
        let mut sequences = self.sequences.write().map_err(|_| lock_error("set"))?;
        sequences.insert(sequence.topic.clone(), sequence.clone());
        Ok(())
    }

    async fn delete(&self, topic: &Topic) -> Result<Option<Sequence>> {
        let mut sequences = self.sequences.write().map_err(|_| lock_error("delete"))?;
        Ok(sequences.remove(topic))
    }

    async fn get_all(&self) -> Result<Vec<Sequence>> {
        let sequences = self.sequences.read().map_err(|_| lock_error("get_all"))?;
        Ok(sequences.values().cloned().collect())
    }

    async fn has(&self, topic: &Topic) -> Result<bool> {
        let sequences = self.sequences.read().map_err(|_| lock_error("has"))?;
        Ok(sequences.contains_key(topic))
    }
}

/// File-based store: one pretty-printed JSON document per topic.
///
/// File names are the hex encoding of the topic so any topic string maps to a
/// safe path. Writes go through a temporary file and a rename, so a crash
/// never leaves a half-written sequence behind.
pub struct FileSequenceStore {
    base_path: PathBuf,
}

impl FileSequenceStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }

    fn sequence_path(&self, topic: &Topic) -> PathBuf {
        self.base_path
            .join(format!("{}.json", hex::encode(topic.as_str())))
    }
}

#[async_trait]
impl SequenceStore for FileSequenceStore {
    async fn get(&self, topic: &Topic) -> Result<Option<Sequence>> {
        let path = self.sequence_path(topic);
        if !path.exists() {
            return Ok(None);
        }

        let json = std::fs::read_to_string(path)?;
        let sequence: Sequence = serde_json::from_str(&json)?;
        Ok(Some(sequence))
    }

    async fn set(&self, sequence: &Sequence) -> Result<()> {
        let path = self.sequence_path(&sequence.topic);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(sequence)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn delete(&self, topic: &Topic) -> Result<Option<Sequence>> {
        let existing = self.get(topic).await?;
        if existing.is_some() {
            std::fs::remove_file(self.sequence_path(topic))?;
        }
        Ok(existing)
    }

    async fn get_all(&self) -> Result<Vec<Sequence>> {
        let mut result = Vec::new();

        for entry in std::fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let path = entry.path();

            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            let json = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Sequence>(&json) {
                Ok(sequence) => result.push(sequence),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable sequence file");
                }
            }
        }

        Ok(result)
    }

    async fn has(&self, topic: &Topic) -> Result<bool> {
        Ok(self.sequence_path(topic).exists())
    }
}
